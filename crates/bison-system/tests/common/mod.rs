#![allow(dead_code)]

//! Shared test fixtures: a scriptable GPIO controller double and
//! parameter-table helpers. The CAN side reuses the mock slave bus from
//! `bison_roboteq::testing`.

use bison_gpio::{GpioController, GpioError, GpioEvent, GpioEventCallback, GpioPin};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Scriptable in-memory GPIO controller.
///
/// Pin levels are plain map entries; `e_stop_trigger` models the V12X
/// watchdog kill, `e_stop_reset` re-arms the E-stop line unless a failure
/// has been injected. Every safety-relevant call is recorded.
pub struct MockGpioController {
    pins: Mutex<HashMap<GpioPin, bool>>,
    watchdog_enabled: AtomicBool,
    reset_failure: Mutex<Option<GpioError>>,
    calls: Mutex<Vec<&'static str>>,
    callback: Mutex<Option<GpioEventCallback>>,
}

impl MockGpioController {
    pub fn new() -> Self {
        let mut pins = HashMap::new();
        // E_STOP_RESET active = not latched, MAIN_SW active = STAGE2
        pins.insert(GpioPin::EStopReset, true);
        pins.insert(GpioPin::MainSw, true);
        pins.insert(GpioPin::MotorOn, false);
        Self {
            pins: Mutex::new(pins),
            watchdog_enabled: AtomicBool::new(false),
            reset_failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            callback: Mutex::new(None),
        }
    }

    pub fn set_pin(&self, pin: GpioPin, value: bool) {
        self.pins.lock().insert(pin, value);
    }

    /// Set a pin and deliver the edge to the registered subscriber.
    pub fn fire_edge(&self, pin: GpioPin, value: bool) {
        self.set_pin(pin, value);
        if let Some(callback) = self.callback.lock().as_ref() {
            callback(GpioEvent { pin, value });
        }
    }

    pub fn inject_reset_failure(&self, error: GpioError) {
        *self.reset_failure.lock() = Some(error);
    }

    pub fn watchdog_enabled(&self) -> bool {
        self.watchdog_enabled.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }
}

impl GpioController for MockGpioController {
    fn start(&self) -> Result<(), GpioError> {
        self.record("start");
        self.watchdog_enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn e_stop_trigger(&self) -> Result<(), GpioError> {
        self.record("e_stop_trigger");
        self.watchdog_enabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn e_stop_reset(&self) -> Result<(), GpioError> {
        self.record("e_stop_reset");
        if let Some(error) = self.reset_failure.lock().take() {
            return Err(error);
        }
        self.watchdog_enabled.store(true, Ordering::SeqCst);
        self.pins.lock().insert(GpioPin::EStopReset, true);
        Ok(())
    }

    fn motor_power_enable(&self, enable: bool) -> Result<(), GpioError> {
        self.pins.lock().insert(GpioPin::MotorOn, enable);
        Ok(())
    }

    fn fan_enable(&self, _enable: bool) -> Result<(), GpioError> {
        Ok(())
    }

    fn aux_power_enable(&self, _enable: bool) -> Result<(), GpioError> {
        Ok(())
    }

    fn digital_power_enable(&self, _enable: bool) -> Result<(), GpioError> {
        Ok(())
    }

    fn charger_enable(&self, _enable: bool) -> Result<(), GpioError> {
        Ok(())
    }

    fn is_pin_active(&self, pin: GpioPin) -> Result<bool, GpioError> {
        self.pins
            .lock()
            .get(&pin)
            .copied()
            .ok_or(GpioError::PinNotAvailable(pin))
    }

    fn is_pin_available(&self, pin: GpioPin) -> bool {
        self.pins.lock().contains_key(&pin)
    }

    fn configure_edge_event_callback(&self, callback: GpioEventCallback) {
        *self.callback.lock() = Some(callback);
    }
}

/// Hardware parameter table for a V12X robot with test-friendly timeouts.
pub fn test_parameters(variant: &str) -> HashMap<String, String> {
    [
        ("hardware_variant", variant),
        ("motor_torque_constant", "0.11"),
        ("gear_ratio", "30.08"),
        ("gearbox_efficiency", "0.75"),
        ("encoder_resolution", "1600"),
        ("max_rpm_motor_speed", "3600"),
        ("master_can_id", "3"),
        ("front_driver_can_id", "1"),
        ("rear_driver_can_id", "2"),
        ("sdo_operation_timeout_ms", "100"),
        ("pdo_feedback_timeout_ms", "15"),
        ("roboteq_state_period_ms", "1000"),
        ("max_safety_stop_attempts", "3"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn test_joints() -> Vec<String> {
    vec![
        "fl_wheel_joint".to_string(),
        "fr_wheel_joint".to_string(),
        "rl_wheel_joint".to_string(),
        "rr_wheel_joint".to_string(),
    ]
}

pub fn shared_mock_gpio() -> (Arc<MockGpioController>, Arc<dyn GpioController>) {
    let mock = Arc::new(MockGpioController::new());
    let as_trait: Arc<dyn GpioController> = mock.clone();
    (mock, as_trait)
}
