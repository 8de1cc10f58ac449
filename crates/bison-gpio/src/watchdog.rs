//! 软件看门狗
//!
//! 看门狗线程以固定周期翻转 `WATCHDOG` 脚，硬件安全电路据此判断
//! 软件存活；心跳消失即锁存急停。停掉线程（而不是停住电平）就是
//! V12X 版本触发急停的方式。

use crate::driver::GpioDriver;
use crate::{GpioError, GpioPin};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// 翻转半周期
const WATCHDOG_TOGGLE_PERIOD: Duration = Duration::from_millis(10);

pub struct Watchdog {
    driver: Arc<GpioDriver>,
    enabled: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    /// `WATCHDOG` 脚必须已由驱动配置为输出
    pub fn new(driver: Arc<GpioDriver>) -> Result<Self, GpioError> {
        if !driver.is_pin_available(GpioPin::Watchdog) {
            return Err(GpioError::PinNotAvailable(GpioPin::Watchdog));
        }
        Ok(Self {
            driver,
            enabled: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        })
    }

    /// 启动心跳线程（幂等）
    pub fn turn_on(&self) -> Result<(), GpioError> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }

        self.enabled.store(true, Ordering::Release);
        let driver = self.driver.clone();
        let enabled = self.enabled.clone();

        let handle = std::thread::Builder::new()
            .name("bison-watchdog".to_string())
            .spawn(move || {
                info!("Watchdog thread started");
                let mut level = false;
                while enabled.load(Ordering::Acquire) {
                    level = !level;
                    if let Err(e) = driver.set_pin_value(GpioPin::Watchdog, level) {
                        warn!("Failed to toggle watchdog pin: {}", e);
                    }
                    spin_sleep::sleep(WATCHDOG_TOGGLE_PERIOD);
                }
                // 线程退出时把脚压回非活动电平
                if let Err(e) = driver.set_pin_value(GpioPin::Watchdog, false) {
                    warn!("Failed to park watchdog pin: {}", e);
                }
                info!("Watchdog thread stopped");
            })
            .map_err(|e| GpioError::ChipOpen(format!("failed to spawn watchdog thread: {e}")))?;

        *thread = Some(handle);
        Ok(())
    }

    /// 停止心跳线程（幂等）；硬件安全电路随之锁存急停
    pub fn turn_off(&self) -> Result<(), GpioError> {
        self.enabled.store(false, Ordering::Release);
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                return Err(GpioError::EStopResetFailed(
                    "watchdog thread panicked while stopping".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        let _ = self.turn_off();
    }
}
