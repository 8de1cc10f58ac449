//! E-stop strategy tests: V12X (hardware watchdog path) and V10X
//! (software safety-stop path), with a scripted GPIO double and real
//! motors controllers speaking to mock slaves.

mod common;

use bison_gpio::{GpioError, GpioPin};
use bison_roboteq::testing::{mock_harness, test_description, MockRoboteqBus, FRONT_NODE, REAR_NODE};
use bison_roboteq::{registers, CanSettings, DrivetrainSettings, MotorsController, RoboteqErrorFilter};
use bison_system::{
    EStopManager, EStopManagerResources, SystemError, V10xEStopStrategy, V12xEStopStrategy,
};
use common::{shared_mock_gpio, MockGpioController};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    gpio: Arc<MockGpioController>,
    motors: Arc<MotorsController>,
    filter: Arc<RoboteqErrorFilter>,
    resources: Arc<EStopManagerResources>,
    buses: Vec<MockRoboteqBus>,
}

fn fixture() -> Fixture {
    let (factory, buses) = mock_harness(1);
    let motors = Arc::new(MotorsController::new(
        factory,
        test_description(),
        CanSettings {
            sdo_operation_timeout: Duration::from_millis(100),
            ..CanSettings::default()
        },
        DrivetrainSettings {
            motor_torque_constant: 0.11,
            gear_ratio: 30.08,
            gearbox_efficiency: 0.75,
            encoder_resolution: 1600.0,
            max_rpm_motor_speed: 3600.0,
        },
    ));
    motors.initialize().unwrap();

    let (gpio, gpio_trait) = shared_mock_gpio();
    let filter = Arc::new(RoboteqErrorFilter::with_defaults());
    let resources = Arc::new(EStopManagerResources {
        gpio_controller: gpio_trait,
        motors_controller: motors.clone(),
        error_filter: filter.clone(),
        motor_controller_write_mtx: Arc::new(Mutex::new(())),
    });

    Fixture {
        gpio,
        motors,
        filter,
        resources,
        buses,
    }
}

#[test]
fn test_v12x_trigger_is_idempotent() {
    let f = fixture();
    let manager = EStopManager::new(Box::new(V12xEStopStrategy::new(f.resources.clone())));

    manager.trigger_e_stop().unwrap();
    assert!(manager.is_triggered());
    assert!(!f.gpio.watchdog_enabled());

    // repeated trigger after success is a no-op
    manager.trigger_e_stop().unwrap();
    assert!(manager.is_triggered());
}

#[test]
fn test_v12x_reset_clears_triggered_state() {
    let f = fixture();
    let manager = EStopManager::new(Box::new(V12xEStopStrategy::new(f.resources.clone())));

    manager.trigger_e_stop().unwrap();
    manager.reset_e_stop().unwrap();
    assert!(!manager.is_triggered());
    assert!(f.gpio.watchdog_enabled());
    assert!(f.gpio.calls().contains(&"e_stop_reset"));
}

#[test]
fn test_v12x_reset_rejects_pending_motion() {
    let f = fixture();
    let manager = EStopManager::new(Box::new(V12xEStopStrategy::new(f.resources.clone())));

    // last written command vector {0, 0, 0, 0.5}
    f.motors.write_speed(0.0, 0.0, 0.0, 0.5).unwrap();

    let err = manager.reset_e_stop().unwrap_err();
    assert!(matches!(err, SystemError::EStopMotionPending));
    // no GPIO change may be observed
    assert!(!f.gpio.calls().contains(&"e_stop_reset"));
    assert!(manager.is_triggered());
}

#[test]
fn test_v12x_reset_interrupted_by_trigger() {
    let f = fixture();
    let manager = EStopManager::new(Box::new(V12xEStopStrategy::new(f.resources.clone())));

    f.gpio
        .inject_reset_failure(GpioError::EStopResetInterrupted);
    let err = manager.reset_e_stop().unwrap_err();
    assert!(matches!(err, SystemError::EStopResetInterrupted));
    assert!(manager.is_triggered());
}

#[test]
fn test_v12x_external_trigger_detected_on_read() {
    let f = fixture();
    let manager = EStopManager::new(Box::new(V12xEStopStrategy::new(f.resources.clone())));
    manager.reset_e_stop().unwrap();
    assert!(!manager.is_triggered());

    // safety board pulls the line down
    f.gpio.set_pin(GpioPin::EStopReset, false);
    assert!(manager.read_e_stop_state().unwrap());
    assert!(manager.is_triggered());
    // the software watchdog must have been disabled
    assert!(!f.gpio.watchdog_enabled());
}

#[test]
fn test_v10x_trigger_engages_safety_stop() {
    let f = fixture();
    let manager = EStopManager::new(Box::new(V10xEStopStrategy::new(f.resources.clone(), 3)));

    manager.trigger_e_stop().unwrap();
    assert!(manager.is_triggered());

    for node_id in [FRONT_NODE, REAR_NODE] {
        let downloads = f.buses[0].node(node_id).downloads();
        assert!(downloads.contains(&(registers::SAFETY_STOP, 1)));
        assert!(downloads.contains(&(registers::SAFETY_STOP, 2)));
    }
}

#[test]
fn test_v10x_reset_requires_stage2() {
    let f = fixture();
    let manager = EStopManager::new(Box::new(V10xEStopStrategy::new(f.resources.clone(), 3)));

    f.gpio.set_pin(GpioPin::MainSw, false);
    let err = manager.reset_e_stop().unwrap_err();
    assert!(format!("{err}").contains("STAGE2"), "{err}");
    assert!(manager.is_triggered());
}

#[test]
fn test_v10x_reset_requires_clean_error_filter() {
    let f = fixture();
    let manager = EStopManager::new(Box::new(V10xEStopStrategy::new(f.resources.clone(), 3)));

    f.filter
        .update_error(bison_roboteq::ErrorCategory::WriteSdo, true);
    f.filter
        .update_error(bison_roboteq::ErrorCategory::WriteSdo, true);
    let err = manager.reset_e_stop().unwrap_err();
    assert!(format!("{err}").contains("error state"), "{err}");
}

#[test]
fn test_v10x_auto_triggers_on_driver_error() {
    let f = fixture();
    let manager = EStopManager::new(Box::new(V10xEStopStrategy::new(f.resources.clone(), 3)));
    manager.reset_e_stop().unwrap();
    assert!(!manager.is_triggered());

    f.filter
        .update_error(bison_roboteq::ErrorCategory::ReadPdo, true);
    assert!(manager.read_e_stop_state().unwrap());
    assert!(manager.is_triggered());
}

#[test]
fn test_v10x_reset_succeeds_when_preconditions_hold() {
    let f = fixture();
    let manager = EStopManager::new(Box::new(V10xEStopStrategy::new(f.resources.clone(), 3)));

    manager.trigger_e_stop().unwrap();
    manager.reset_e_stop().unwrap();
    assert!(!manager.is_triggered());
}
