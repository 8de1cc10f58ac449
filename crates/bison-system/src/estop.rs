//! 急停管理器
//!
//! 每个硬件版本一套策略，管理器一次持有一套（仅在实时路径之外
//! 更换）。策略共享一份 [`EStopManagerResources`]；其中的
//! `motor_controller_write_mtx` 与实时写循环用的是同一把锁，复位/
//! 触发不会与一串 SDO 指令交错。

use crate::error::SystemError;
use bison_gpio::{GpioController, GpioError, GpioPin};
use bison_roboteq::{MotorsController, RoboteqErrorFilter};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// 急停策略共享的资源包
pub struct EStopManagerResources {
    pub gpio_controller: Arc<dyn GpioController>,
    pub motors_controller: Arc<MotorsController>,
    pub error_filter: Arc<RoboteqErrorFilter>,
    /// 与实时写循环共用的互斥锁
    pub motor_controller_write_mtx: Arc<Mutex<()>>,
}

/// 版本相关的急停策略
pub trait EStopStrategy: Send + Sync {
    /// 读取急停状态（可能带有副作用：发现外部触发时把系统压入安全态）
    fn read_e_stop_state(&self) -> Result<bool, SystemError>;
    /// 触发急停；首次成功后重复触发是空操作
    fn trigger_e_stop(&self) -> Result<(), SystemError>;
    /// 复位急停；前置条件不满足或被打断时报错
    fn reset_e_stop(&self) -> Result<(), SystemError>;
    /// 当前触发状态（无副作用）
    fn is_triggered(&self) -> bool;
}

/// 策略共有的状态：触发标志 + 串行化触发/复位的互斥锁
struct StrategyState {
    triggered: AtomicBool,
    manipulation_mtx: Mutex<()>,
}

impl StrategyState {
    fn new() -> Self {
        Self {
            // 配置完成前一律视为触发态
            triggered: AtomicBool::new(true),
            manipulation_mtx: Mutex::new(()),
        }
    }
}

/// V12X：硬件急停，看门狗心跳驱动安全电路
pub struct V12xEStopStrategy {
    resources: Arc<EStopManagerResources>,
    state: StrategyState,
}

impl V12xEStopStrategy {
    pub fn new(resources: Arc<EStopManagerResources>) -> Self {
        Self {
            resources,
            state: StrategyState::new(),
        }
    }
}

impl EStopStrategy for V12xEStopStrategy {
    fn read_e_stop_state(&self) -> Result<bool, SystemError> {
        // E_STOP_RESET 输入侧活动电平 = 未触发；非活动说明安全板或
        // 控制器在外部触发了急停，必须停掉软件看门狗避免失控复位
        let pin_active = self
            .resources
            .gpio_controller
            .is_pin_active(GpioPin::EStopReset)?;
        if !pin_active && !self.state.triggered.load(Ordering::Acquire) {
            warn!("E-stop triggered externally, disabling the software watchdog");
            self.resources.gpio_controller.e_stop_trigger()?;
            self.state.triggered.store(true, Ordering::Release);
        }
        Ok(self.state.triggered.load(Ordering::Acquire))
    }

    fn trigger_e_stop(&self) -> Result<(), SystemError> {
        // 先动 GPIO（内部置打断标志），这样进行中的复位会立即收到打断；
        // 随后才拿操纵锁更新状态
        self.resources.gpio_controller.e_stop_trigger()?;
        let _lock = self.state.manipulation_mtx.lock();
        self.state.triggered.store(true, Ordering::Release);
        info!("E-stop triggered");
        Ok(())
    }

    fn reset_e_stop(&self) -> Result<(), SystemError> {
        let _lock = self.state.manipulation_mtx.lock();
        let _write_lock = self.resources.motor_controller_write_mtx.lock();

        if !self.resources.motors_controller.last_commands_zero() {
            return Err(SystemError::EStopMotionPending);
        }

        self.resources
            .gpio_controller
            .e_stop_reset()
            .map_err(|e| match e {
                GpioError::EStopResetInterrupted => SystemError::EStopResetInterrupted,
                other => SystemError::Gpio(other),
            })?;

        self.resources.error_filter.set_clear_errors_flag();

        self.state.triggered.store(false, Ordering::Release);
        if self.read_e_stop_state()? {
            return Err(SystemError::EStopResetFailed(
                "E-stop is still triggered after the reset procedure".to_string(),
            ));
        }
        info!("E-stop reset");
        Ok(())
    }

    fn is_triggered(&self) -> bool {
        self.state.triggered.load(Ordering::Acquire)
    }
}

/// V10X：纯软件急停，借道控制器的安全停车
pub struct V10xEStopStrategy {
    resources: Arc<EStopManagerResources>,
    state: StrategyState,
    max_safety_stop_attempts: u32,
}

impl V10xEStopStrategy {
    pub fn new(resources: Arc<EStopManagerResources>, max_safety_stop_attempts: u32) -> Self {
        Self {
            resources,
            state: StrategyState::new(),
            max_safety_stop_attempts: max_safety_stop_attempts.max(1),
        }
    }

    fn motors_powered(&self) -> Result<bool, SystemError> {
        Ok(self
            .resources
            .gpio_controller
            .is_pin_active(GpioPin::MainSw)?)
    }
}

impl EStopStrategy for V10xEStopStrategy {
    fn read_e_stop_state(&self) -> Result<bool, SystemError> {
        let motors_powered = self.motors_powered()?;
        let driver_error = self.resources.error_filter.is_any_error();

        if !self.state.triggered.load(Ordering::Acquire) && (!motors_powered || driver_error) {
            warn!(
                "Auto-triggering E-stop (motors powered: {}, driver error: {})",
                motors_powered, driver_error
            );
            self.trigger_e_stop()?;
        }
        Ok(self.state.triggered.load(Ordering::Acquire))
    }

    fn trigger_e_stop(&self) -> Result<(), SystemError> {
        let _lock = self.state.manipulation_mtx.lock();
        let _write_lock = self.resources.motor_controller_write_mtx.lock();

        let mut last_error = None;
        for attempt in 1..=self.max_safety_stop_attempts {
            match self.resources.motors_controller.turn_on_safety_stop() {
                Ok(()) => {
                    self.state.triggered.store(true, Ordering::Release);
                    info!("E-stop triggered (safety stop)");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Safety stop attempt {}/{} failed: {}",
                        attempt, self.max_safety_stop_attempts, e
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.map(SystemError::Roboteq).unwrap_or_else(|| {
            SystemError::EStopResetFailed("safety stop could not be engaged".to_string())
        }))
    }

    fn reset_e_stop(&self) -> Result<(), SystemError> {
        let _lock = self.state.manipulation_mtx.lock();
        let _write_lock = self.resources.motor_controller_write_mtx.lock();

        if !self.resources.motors_controller.last_commands_zero() {
            return Err(SystemError::EStopMotionPending);
        }
        if !self.motors_powered()? {
            return Err(SystemError::EStopResetFailed(
                "motors are not powered up, the main switch is not in the STAGE2 position"
                    .to_string(),
            ));
        }
        if self.resources.error_filter.is_any_error() {
            return Err(SystemError::EStopResetFailed(
                "Roboteq drivers are in an error state".to_string(),
            ));
        }

        self.resources.error_filter.set_clear_errors_flag();

        // 确认：重查两个条件而不是递归调用 read_e_stop_state，
        // 后者的自动触发路径会再次申请操纵锁
        if !self.motors_powered()? || self.resources.error_filter.is_any_error() {
            self.state.triggered.store(true, Ordering::Release);
            return Err(SystemError::EStopResetFailed(
                "E-stop is still triggered after the reset procedure".to_string(),
            ));
        }
        self.state.triggered.store(false, Ordering::Release);
        info!("E-stop reset");
        Ok(())
    }

    fn is_triggered(&self) -> bool {
        self.state.triggered.load(Ordering::Acquire)
    }
}

/// 策略的属主；实时路径只通过它访问急停
pub struct EStopManager {
    strategy: Box<dyn EStopStrategy>,
}

impl EStopManager {
    pub fn new(strategy: Box<dyn EStopStrategy>) -> Self {
        Self { strategy }
    }

    /// 更换策略；只允许在实时路径停止时调用
    pub fn set_strategy(&mut self, strategy: Box<dyn EStopStrategy>) {
        self.strategy = strategy;
    }

    pub fn read_e_stop_state(&self) -> Result<bool, SystemError> {
        self.strategy.read_e_stop_state()
    }

    pub fn trigger_e_stop(&self) -> Result<(), SystemError> {
        self.strategy.trigger_e_stop()
    }

    pub fn reset_e_stop(&self) -> Result<(), SystemError> {
        self.strategy.reset_e_stop()
    }

    pub fn is_triggered(&self) -> bool {
        self.strategy.is_triggered()
    }
}
