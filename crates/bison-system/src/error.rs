//! 系统层错误类型定义

use bison_gpio::GpioError;
use bison_roboteq::RoboteqError;
use thiserror::Error;

/// 系统层错误类型
#[derive(Error, Debug)]
pub enum SystemError {
    /// 配置错误（关节名、硬件参数），`on_init` 阶段致命
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Roboteq driver error: {0}")]
    Roboteq(#[from] RoboteqError),

    #[error("GPIO error: {0}")]
    Gpio(#[from] GpioError),

    /// 急停复位前置条件不满足：上一拍指令不为零
    #[error("E-stop reset failed: last velocity commands are not zero, motion pending")]
    EStopMotionPending,

    /// 复位过程被并发触发打断
    #[error("E-stop reset interrupted by a new E-stop trigger")]
    EStopResetInterrupted,

    /// 复位流程走完但急停仍然在触发态
    #[error("E-stop reset failed: {0}")]
    EStopResetFailed(String),

    /// 生命周期对象尚未构造（调用顺序错误）
    #[error("{0} is not constructed, wrong lifecycle order")]
    NotConstructed(&'static str),
}
