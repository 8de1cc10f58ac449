//! 字符设备 GPIO 驱动
//!
//! 每个引脚单独向内核申请一条线（方向、低有效都在申请时声明），
//! 急停复位脚在复位脉冲期间会改申请方向。输入脚由一个监视线程以
//! 固定节拍轮询，电平变化合成边沿事件投递给订阅回调；轮询周期
//! 同时充当去抖窗口。

use crate::{Direction, GpioError, GpioInfo, GpioPin};
use gpiod::{Chip, Lines};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};

/// 输入轮询节拍（同时是去抖窗口）
const MONITOR_PERIOD: Duration = Duration::from_millis(10);

/// 监视线程就绪等待上限
const MONITOR_START_TIMEOUT: Duration = Duration::from_millis(50);

enum LineRequest {
    Output(Lines<gpiod::Output>),
    Input(Lines<gpiod::Input>),
}

struct LineState {
    info: GpioInfo,
    offset: u32,
    /// `None` 仅出现在改方向失败之后（线已释放、重申请未成功）
    request: Option<LineRequest>,
    /// 最近一次写入/读到的逻辑值
    value: bool,
}

impl LineState {
    fn request(&self) -> Result<&LineRequest, GpioError> {
        self.request
            .as_ref()
            .ok_or(GpioError::PinNotAvailable(self.info.pin))
    }
}

/// 边沿事件回调
pub type EdgeCallback = Box<dyn Fn(GpioPin, bool) + Send + Sync>;

/// GPIO 字符设备驱动
pub struct GpioDriver {
    chip: Chip,
    lines: Arc<Mutex<HashMap<GpioPin, LineState>>>,
    callback: Arc<Mutex<Option<EdgeCallback>>>,
    monitor_enabled: Arc<AtomicBool>,
    monitor_thread: Mutex<Option<JoinHandle<()>>>,
    monitor_ready: Arc<(Mutex<bool>, Condvar)>,
}

impl GpioDriver {
    /// 打开芯片并申请全部配置的线
    pub fn new(chip_path: &str, pins: &[GpioInfo]) -> Result<Self, GpioError> {
        if pins.is_empty() {
            return Err(GpioError::ChipOpen("empty GPIO pin list".to_string()));
        }

        let chip =
            Chip::new(chip_path).map_err(|e| GpioError::ChipOpen(format!("{chip_path}: {e}")))?;

        let mut lines = HashMap::new();
        for info in pins {
            let offset = find_line_offset(&chip, info.pin)?;
            let request = request_line(&chip, offset, info, info.init_value)?;
            let value = match &request {
                LineRequest::Output(_) => info.init_value,
                LineRequest::Input(request) => request.get_values([false])?[0],
            };
            lines.insert(
                info.pin,
                LineState {
                    info: *info,
                    offset,
                    request: Some(request),
                    value,
                },
            );
        }

        Ok(Self {
            chip,
            lines: Arc::new(Mutex::new(lines)),
            callback: Arc::new(Mutex::new(None)),
            monitor_enabled: Arc::new(AtomicBool::new(false)),
            monitor_thread: Mutex::new(None),
            monitor_ready: Arc::new((Mutex::new(false), Condvar::new())),
        })
    }

    pub fn is_pin_available(&self, pin: GpioPin) -> bool {
        self.lines.lock().contains_key(&pin)
    }

    /// 读引脚逻辑电平（低有效换算已由内核完成）
    pub fn is_pin_active(&self, pin: GpioPin) -> Result<bool, GpioError> {
        let mut lines = self.lines.lock();
        let state = lines.get_mut(&pin).ok_or(GpioError::PinNotAvailable(pin))?;
        let value = match state.request()? {
            LineRequest::Input(request) => request.get_values([false])?[0],
            // 输出脚回读最近写入值
            LineRequest::Output(_) => state.value,
        };
        state.value = value;
        Ok(value)
    }

    /// 写输出脚
    pub fn set_pin_value(&self, pin: GpioPin, value: bool) -> Result<(), GpioError> {
        let mut lines = self.lines.lock();
        let state = lines.get_mut(&pin).ok_or(GpioError::PinNotAvailable(pin))?;
        match state.request()? {
            LineRequest::Output(request) => request.set_values([value])?,
            LineRequest::Input(_) => return Err(GpioError::NotAnOutput(pin)),
        }
        state.value = value;
        Ok(())
    }

    /// 改申请方向（急停复位脉冲用）
    ///
    /// 输出方向的初始值取引脚最近一次的已知值。
    pub fn change_pin_direction(&self, pin: GpioPin, direction: Direction) -> Result<(), GpioError> {
        let mut lines = self.lines.lock();
        let state = lines.get_mut(&pin).ok_or(GpioError::PinNotAvailable(pin))?;
        if state.info.direction == direction {
            return Ok(());
        }

        let mut info = state.info;
        info.direction = direction;

        // 旧申请先释放，内核不允许同一条线双重持有
        drop(state.request.take());

        let request = request_line(&self.chip, state.offset, &info, state.value)?;
        if let LineRequest::Input(request) = &request {
            state.value = request.get_values([false])?[0];
        }
        state.request = Some(request);
        state.info = info;
        Ok(())
    }

    /// 注册边沿事件回调（在监视线程上执行，必须轻量）
    pub fn set_edge_event_callback(&self, callback: EdgeCallback) {
        *self.callback.lock() = Some(callback);
    }

    /// 启动输入监视线程
    pub fn monitor_on(&self) -> Result<(), GpioError> {
        let mut thread = self.monitor_thread.lock();
        if thread.is_some() {
            return Ok(());
        }

        *self.monitor_ready.0.lock() = false;
        self.monitor_enabled.store(true, Ordering::Release);

        let lines = self.lines.clone();
        let callback = self.callback.clone();
        let enabled = self.monitor_enabled.clone();
        let ready = self.monitor_ready.clone();

        let handle = std::thread::Builder::new()
            .name("bison-gpio-monitor".to_string())
            .spawn(move || {
                {
                    let (lock, cond) = &*ready;
                    *lock.lock() = true;
                    cond.notify_all();
                }

                let mut events = Vec::new();
                while enabled.load(Ordering::Acquire) {
                    // 锁内只做电平采样；回调在锁外执行，允许订阅方
                    // 重入驱动（急停处理正是这么做的）
                    {
                        let mut lines = lines.lock();
                        for state in lines.values_mut() {
                            let Some(LineRequest::Input(request)) = &state.request else {
                                continue;
                            };
                            let value = match request.get_values([false]) {
                                Ok(values) => values[0],
                                Err(e) => {
                                    error!(
                                        "Failed to read GPIO pin {:?}: {}",
                                        state.info.pin, e
                                    );
                                    continue;
                                }
                            };
                            if value != state.value {
                                state.value = value;
                                events.push((state.info.pin, value));
                            }
                        }
                    }
                    for (pin, value) in events.drain(..) {
                        debug!("GPIO edge on {:?} -> {}", pin, value);
                        if let Some(callback) = callback.lock().as_ref() {
                            callback(pin, value);
                        }
                    }
                    spin_sleep::sleep(MONITOR_PERIOD);
                }
            })
            .map_err(|e| GpioError::ChipOpen(format!("failed to spawn monitor thread: {e}")))?;

        let (lock, cond) = &*self.monitor_ready;
        let mut started = lock.lock();
        if !*started && cond.wait_for(&mut started, MONITOR_START_TIMEOUT).timed_out() {
            self.monitor_enabled.store(false, Ordering::Release);
            return Err(GpioError::MonitorStartTimeout);
        }

        *thread = Some(handle);
        Ok(())
    }

    /// 停止输入监视线程（幂等）
    pub fn monitor_off(&self) {
        self.monitor_enabled.store(false, Ordering::Release);
        if let Some(handle) = self.monitor_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GpioDriver {
    fn drop(&mut self) {
        self.monitor_off();
        // 输出脚恢复初始电平，安全电路回到已知状态
        let lines = self.lines.lock();
        for state in lines.values() {
            if let Some(LineRequest::Output(request)) = &state.request {
                if let Err(e) = request.set_values([state.info.init_value]) {
                    warn!(
                        "Failed to restore init value of {:?} on drop: {}",
                        state.info.pin, e
                    );
                }
            }
        }
    }
}

fn find_line_offset(chip: &Chip, pin: GpioPin) -> Result<u32, GpioError> {
    let name = pin.line_name();
    for offset in 0..chip.num_lines() {
        if let Ok(info) = chip.line_info(offset) {
            if info.name == name {
                return Ok(offset);
            }
        }
    }
    Err(GpioError::LineNotFound(name))
}

fn request_line(
    chip: &Chip,
    offset: u32,
    info: &GpioInfo,
    output_value: bool,
) -> Result<LineRequest, GpioError> {
    let active = if info.active_low {
        gpiod::Active::Low
    } else {
        gpiod::Active::High
    };
    match info.direction {
        Direction::Output => {
            let options = gpiod::Options::output([offset])
                .values([output_value])
                .active(active)
                .consumer("bison_gpio");
            Ok(LineRequest::Output(chip.request_lines(options)?))
        }
        Direction::Input => {
            let options = gpiod::Options::input([offset])
                .active(active)
                .consumer("bison_gpio");
            Ok(LineRequest::Input(chip.request_lines(options)?))
        }
    }
}
