//! # Bison GPIO 控制层
//!
//! 安全电路一侧的硬件接口：看门狗脚、急停复位脚、电机/辅助/数字电源
//! 使能脚、充电器使能脚与若干输入脚（充电检测、两段式主开关、关机请求）。
//!
//! 对上层暴露 [`GpioController`] trait，两个硬件版本各有一个实现：
//! - **V12X**：完整的安全电路。软件看门狗必须持续翻转硬件才允许使能
//!   电机；停掉看门狗即触发硬件急停锁存。
//! - **V10X**：没有硬件急停组件，急停为纯软件行为；不存在的引脚一律
//!   以固定结果 / 错误返回。

use thiserror::Error;

#[cfg(target_os = "linux")]
pub mod driver;
#[cfg(target_os = "linux")]
pub mod watchdog;

pub mod controller;

pub use controller::{GpioController, GpioEvent, GpioEventCallback};
#[cfg(target_os = "linux")]
pub use controller::{V10xGpioController, V12xGpioController};
#[cfg(target_os = "linux")]
pub use driver::GpioDriver;

/// 引脚方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// 控制核心用到的全部 GPIO 引脚
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpioPin {
    /// 看门狗心跳输出
    Watchdog,
    /// 急停状态读取 / 复位脉冲（平时 INPUT，复位期间翻成 OUTPUT）
    EStopReset,
    /// 电机主电源
    VMotOn,
    /// 驱动器使能
    MotorOn,
    /// 辅助电源使能
    AuxPwEn,
    /// 充电器使能
    ChrgEn,
    /// 风扇开关
    FanSw,
    /// 数字电源关断（低有效语义由配置处理）
    VdigOff,
    /// 充电器插入检测（输入）
    ChrgSense,
    /// 两段式主开关，第 2 段 = 电机供电（输入）
    MainSw,
    /// 关机请求（输入）
    ShdnInit,
}

impl GpioPin {
    /// 内核里注册的线名
    pub fn line_name(self) -> &'static str {
        match self {
            Self::Watchdog => "WATCHDOG",
            Self::EStopReset => "E_STOP_RESET",
            Self::VMotOn => "VMOT_ON",
            Self::MotorOn => "MOTOR_ON",
            Self::AuxPwEn => "AUX_PW_EN",
            Self::ChrgEn => "CHRG_EN",
            Self::FanSw => "FAN_SW",
            Self::VdigOff => "VDIG_OFF",
            Self::ChrgSense => "CHRG_SENSE",
            Self::MainSw => "MAIN_SW",
            Self::ShdnInit => "SHDN_INIT",
        }
    }
}

/// 单个引脚的配置与当前已知状态
#[derive(Debug, Clone, Copy)]
pub struct GpioInfo {
    pub pin: GpioPin,
    pub direction: Direction,
    pub active_low: bool,
    /// 进程退出时输出脚恢复到的值
    pub init_value: bool,
}

impl GpioInfo {
    pub const fn output(pin: GpioPin) -> Self {
        Self {
            pin,
            direction: Direction::Output,
            active_low: false,
            init_value: false,
        }
    }

    pub const fn input(pin: GpioPin) -> Self {
        Self {
            pin,
            direction: Direction::Input,
            active_low: false,
            init_value: false,
        }
    }

    pub const fn active_low(mut self) -> Self {
        self.active_low = true;
        self
    }
}

/// GPIO 层错误
#[derive(Error, Debug)]
pub enum GpioError {
    #[error("Failed to open GPIO chip: {0}")]
    ChipOpen(String),
    #[error("GPIO line '{0}' not found on chip")]
    LineNotFound(&'static str),
    #[error("Pin {0:?} is not available on this hardware variant")]
    PinNotAvailable(GpioPin),
    #[error("Cannot set value for INPUT pin {0:?}")]
    NotAnOutput(GpioPin),
    #[error("{0} is not supported in this hardware variant")]
    NotSupported(&'static str),
    #[error("E-stop reset interrupted by a concurrent E-stop trigger")]
    EStopResetInterrupted,
    #[error("E-stop reset failed: {0}")]
    EStopResetFailed(String),
    #[error("GPIO monitor thread failed to start within the timeout")]
    MonitorStartTimeout,
    #[error("GPIO IO error: {0}")]
    Io(#[from] std::io::Error),
}
