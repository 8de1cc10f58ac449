//! GPIO 控制器：硬件版本多态
//!
//! 两个版本只在急停两条叶子操作上有实质差异，用一个 trait 加两个
//! 具体实现表达，不做更深的层次。

use crate::{GpioError, GpioPin};

/// 输入脚边沿事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioEvent {
    pub pin: GpioPin,
    pub value: bool,
}

pub type GpioEventCallback = Box<dyn Fn(GpioEvent) + Send + Sync>;

/// 面向急停管理器与系统生命周期的 GPIO 控制面
pub trait GpioController: Send + Sync {
    /// 启动监视线程并给动力域上电
    fn start(&self) -> Result<(), GpioError>;

    /// 触发急停（V12X：停看门狗；V10X：无硬件动作）
    fn e_stop_trigger(&self) -> Result<(), GpioError>;

    /// 复位急停；可能耗时数百毫秒，且可被并发触发打断
    fn e_stop_reset(&self) -> Result<(), GpioError>;

    fn motor_power_enable(&self, enable: bool) -> Result<(), GpioError>;
    fn fan_enable(&self, enable: bool) -> Result<(), GpioError>;
    fn aux_power_enable(&self, enable: bool) -> Result<(), GpioError>;
    fn digital_power_enable(&self, enable: bool) -> Result<(), GpioError>;
    fn charger_enable(&self, enable: bool) -> Result<(), GpioError>;

    fn is_pin_active(&self, pin: GpioPin) -> Result<bool, GpioError>;
    fn is_pin_available(&self, pin: GpioPin) -> bool;

    /// 注册输入脚边沿事件回调（激活阶段由系统调用）
    fn configure_edge_event_callback(&self, callback: GpioEventCallback);
}

#[cfg(target_os = "linux")]
pub use imp::{V10xGpioController, V12xGpioController};

#[cfg(target_os = "linux")]
mod imp {
    use super::{GpioController, GpioEvent, GpioEventCallback};
    use crate::driver::GpioDriver;
    use crate::watchdog::Watchdog;
    use crate::{Direction, GpioError, GpioInfo, GpioPin};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tracing::info;

    /// 急停复位脉冲时长与打断检查步长
    const E_STOP_RESET_PULSE: Duration = Duration::from_millis(100);
    const E_STOP_RESET_STEP: Duration = Duration::from_millis(10);

    /// V12X：完整安全电路
    pub struct V12xGpioController {
        driver: Arc<GpioDriver>,
        watchdog: Watchdog,
        /// 置位表示有并发触发要求打断正在进行的复位
        abort_reset: AtomicBool,
    }

    impl V12xGpioController {
        const PINS: [GpioInfo; 11] = [
            GpioInfo::output(GpioPin::Watchdog),
            GpioInfo::input(GpioPin::EStopReset),
            GpioInfo::output(GpioPin::VMotOn),
            GpioInfo::output(GpioPin::MotorOn),
            GpioInfo::output(GpioPin::AuxPwEn),
            GpioInfo::output(GpioPin::ChrgEn),
            GpioInfo::output(GpioPin::FanSw),
            GpioInfo::output(GpioPin::VdigOff),
            GpioInfo::input(GpioPin::ChrgSense).active_low(),
            GpioInfo::input(GpioPin::MainSw),
            GpioInfo::input(GpioPin::ShdnInit),
        ];

        pub fn new(chip_path: &str) -> Result<Self, GpioError> {
            let driver = Arc::new(GpioDriver::new(chip_path, &Self::PINS)?);
            let watchdog = Watchdog::new(driver.clone())?;
            Ok(Self {
                driver,
                watchdog,
                abort_reset: AtomicBool::new(false),
            })
        }

        pub fn watchdog_enabled(&self) -> bool {
            self.watchdog.is_enabled()
        }
    }

    impl GpioController for V12xGpioController {
        fn start(&self) -> Result<(), GpioError> {
            info!("Starting V12X GPIO controller");
            self.driver.monitor_on()?;
            self.driver.set_pin_value(GpioPin::VMotOn, true)?;
            self.motor_power_enable(true)?;
            Ok(())
        }

        fn e_stop_trigger(&self) -> Result<(), GpioError> {
            self.abort_reset.store(true, Ordering::Release);
            self.watchdog.turn_off()
        }

        fn e_stop_reset(&self) -> Result<(), GpioError> {
            self.abort_reset.store(false, Ordering::Release);

            // 复位期间安全电路要求看门狗心跳存在
            self.watchdog.turn_on()?;
            self.driver
                .change_pin_direction(GpioPin::EStopReset, Direction::Output)?;
            self.driver.set_pin_value(GpioPin::EStopReset, true)?;

            let steps =
                (E_STOP_RESET_PULSE.as_millis() / E_STOP_RESET_STEP.as_millis()).max(1) as u32;
            for _ in 0..steps {
                if self.abort_reset.load(Ordering::Acquire) {
                    let _ = self
                        .driver
                        .change_pin_direction(GpioPin::EStopReset, Direction::Input);
                    let _ = self.watchdog.turn_off();
                    return Err(GpioError::EStopResetInterrupted);
                }
                spin_sleep::sleep(E_STOP_RESET_STEP);
            }

            self.driver
                .change_pin_direction(GpioPin::EStopReset, Direction::Input)?;

            // 回读确认：脚仍然非活动说明锁存没解开（按钮仍被按住等）
            if !self.driver.is_pin_active(GpioPin::EStopReset)? {
                let _ = self.watchdog.turn_off();
                return Err(GpioError::EStopResetFailed(
                    "E-stop is still latched, check for pressed E-stop buttons or other \
                     triggers"
                        .to_string(),
                ));
            }
            Ok(())
        }

        fn motor_power_enable(&self, enable: bool) -> Result<(), GpioError> {
            self.driver.set_pin_value(GpioPin::MotorOn, enable)
        }

        fn fan_enable(&self, enable: bool) -> Result<(), GpioError> {
            self.driver.set_pin_value(GpioPin::FanSw, enable)
        }

        fn aux_power_enable(&self, enable: bool) -> Result<(), GpioError> {
            self.driver.set_pin_value(GpioPin::AuxPwEn, enable)
        }

        fn digital_power_enable(&self, enable: bool) -> Result<(), GpioError> {
            // 引脚语义是“关断”，取反
            self.driver.set_pin_value(GpioPin::VdigOff, !enable)
        }

        fn charger_enable(&self, enable: bool) -> Result<(), GpioError> {
            self.driver.set_pin_value(GpioPin::ChrgEn, enable)
        }

        fn is_pin_active(&self, pin: GpioPin) -> Result<bool, GpioError> {
            self.driver.is_pin_active(pin)
        }

        fn is_pin_available(&self, pin: GpioPin) -> bool {
            self.driver.is_pin_available(pin)
        }

        fn configure_edge_event_callback(&self, callback: GpioEventCallback) {
            self.driver
                .set_edge_event_callback(Box::new(move |pin, value| {
                    callback(GpioEvent { pin, value })
                }));
        }
    }

    /// V10X：没有硬件急停组件，急停为纯软件行为
    pub struct V10xGpioController {
        driver: Arc<GpioDriver>,
    }

    impl V10xGpioController {
        const PINS: [GpioInfo; 2] = [
            GpioInfo::input(GpioPin::MainSw),
            GpioInfo::output(GpioPin::MotorOn),
        ];

        pub fn new(chip_path: &str) -> Result<Self, GpioError> {
            Ok(Self {
                driver: Arc::new(GpioDriver::new(chip_path, &Self::PINS)?),
            })
        }
    }

    impl GpioController for V10xGpioController {
        fn start(&self) -> Result<(), GpioError> {
            info!("Starting V10X GPIO controller");
            self.driver.monitor_on()?;
            self.motor_power_enable(true)?;
            Ok(())
        }

        /// 本版本没有硬件急停，触发在电机控制器一侧完成
        fn e_stop_trigger(&self) -> Result<(), GpioError> {
            Ok(())
        }

        /// 只校验主开关在第 2 段（电机已供电），不动任何 GPIO
        fn e_stop_reset(&self) -> Result<(), GpioError> {
            if !self.driver.is_pin_active(GpioPin::MainSw)? {
                return Err(GpioError::EStopResetFailed(
                    "motors are not powered up, the main switch is not in the STAGE2 position"
                        .to_string(),
                ));
            }
            Ok(())
        }

        fn motor_power_enable(&self, enable: bool) -> Result<(), GpioError> {
            if enable && !self.driver.is_pin_active(GpioPin::MainSw)? {
                return Err(GpioError::EStopResetFailed(
                    "cannot enable motors: the main switch is not in the STAGE2 position"
                        .to_string(),
                ));
            }
            self.driver.set_pin_value(GpioPin::MotorOn, enable)
        }

        fn fan_enable(&self, _enable: bool) -> Result<(), GpioError> {
            Err(GpioError::NotSupported("Fan control"))
        }

        fn aux_power_enable(&self, _enable: bool) -> Result<(), GpioError> {
            Err(GpioError::NotSupported("AUX power control"))
        }

        fn digital_power_enable(&self, _enable: bool) -> Result<(), GpioError> {
            Err(GpioError::NotSupported("Digital power control"))
        }

        fn charger_enable(&self, _enable: bool) -> Result<(), GpioError> {
            Err(GpioError::NotSupported("Charger control"))
        }

        fn is_pin_active(&self, pin: GpioPin) -> Result<bool, GpioError> {
            self.driver.is_pin_active(pin)
        }

        fn is_pin_available(&self, pin: GpioPin) -> bool {
            self.driver.is_pin_available(pin)
        }

        fn configure_edge_event_callback(&self, callback: GpioEventCallback) {
            self.driver
                .set_edge_event_callback(Box::new(move |pin, value| {
                    callback(GpioEvent { pin, value })
                }));
        }
    }
}
