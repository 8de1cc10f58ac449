//! # Bison 底盘系统层
//!
//! 把驱动层、GPIO 层与急停逻辑装配成框架可见的硬件系统：
//! - [`BisonSystem`]：生命周期转换与实时 `read`/`write` 周期
//! - [`EStopManager`]：版本相关的急停读取/触发/复位策略
//! - [`SystemNode`]：遥测快照与 `clear_errors` 服务的接缝
//!
//! 实时控制框架、发布/订阅传输层与机器人行为管理都在仓库之外，
//! 通过 [`interface`] 与 [`node`] 中的最小接缝对接。

mod error;
pub mod estop;
pub mod interface;
pub mod node;
pub mod settings;
pub mod system;

pub use error::SystemError;
pub use estop::{
    EStopManager, EStopManagerResources, EStopStrategy, V10xEStopStrategy, V12xEStopStrategy,
};
pub use interface::{CallbackResult, HardwareInfo, HardwareInterface};
pub use node::{DriverSideState, DriverStateMsg, DriverStatePublisher, SystemNode};
pub use settings::{sort_joint_names, HardwareVariant, SystemSettings, JOINT_ORDER};
pub use system::{BisonSystem, GpioBuilder};
