//! # Bison Roboteq 驱动层
//!
//! 两台 Roboteq 电机控制器（前桥、后桥，各驱两轮）挂在同一条
//! CANopen 总线上，本 crate 提供：
//! - 实时事件循环（CANopen 主站），独占总线的专用线程
//! - 每从站一个的驱动器门面：引导、带超时的同步 SDO、PDO 快照
//! - 传输层 + 双驱动器的组合控制器
//! - SI 关节空间与控制器定点表示之间的单位换算
//! - 聚合电机控制器（反馈、指令、急停/安全停车）
//! - 瞬态错误滤波器
//!
//! 大多数使用者只需要 [`MotorsController`] 与 [`RoboteqErrorFilter`]。

pub mod bus;
pub mod controller;
pub mod conversion;
pub mod driver;
mod error;
pub mod error_filter;
pub mod motors;
pub mod registers;

#[cfg(feature = "mock-slave")]
pub mod testing;

pub use bus::{BusHandle, RawDriverFeedback};
pub use controller::{AdapterFactory, CanSettings, CanopenController};
pub use conversion::{
    DrivetrainSettings, FaultFlag, MotorState, MotorStateConverter,
    RoboteqVelocityCommandConverter, RuntimeError, ScriptFlag, MAX_ROBOTEQ_CMD,
};
pub use driver::RoboteqDriver;
pub use error::{ResultExt, RoboteqError};
pub use error_filter::{ErrorCategory, ErrorFilterSettings, RoboteqErrorFilter};
pub use motors::{DriverState, MotorsController, RoboteqData};
