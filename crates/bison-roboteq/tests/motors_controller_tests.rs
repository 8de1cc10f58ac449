//! Motors controller integration tests: feedback pipeline, staleness
//! detection and the command write path, all against the mock slave bus.

use bison_roboteq::testing::{
    mock_harness, test_description, MockFeedback, MockRoboteqBus, FRONT_NODE, REAR_NODE,
};
use bison_roboteq::{registers, CanSettings, DrivetrainSettings, MotorsController};
use std::f64::consts::PI;
use std::thread::sleep;
use std::time::Duration;

fn test_settings() -> CanSettings {
    CanSettings {
        master_can_id: 3,
        front_driver_can_id: FRONT_NODE,
        rear_driver_can_id: REAR_NODE,
        sdo_operation_timeout: Duration::from_millis(100),
        pdo_feedback_timeout: Duration::from_millis(15),
    }
}

fn drivetrain_settings() -> DrivetrainSettings {
    DrivetrainSettings {
        motor_torque_constant: 0.11,
        gear_ratio: 30.08,
        gearbox_efficiency: 0.75,
        encoder_resolution: 1600.0,
        max_rpm_motor_speed: 3600.0,
    }
}

fn make_controller() -> (MotorsController, Vec<MockRoboteqBus>) {
    let (factory, buses) = mock_harness(1);
    let controller = MotorsController::new(
        factory,
        test_description(),
        test_settings(),
        drivetrain_settings(),
    );
    controller.initialize().unwrap();
    (controller, buses)
}

#[test]
fn test_feedback_is_converted_and_mapped_left_right() {
    let (controller, buses) = make_controller();

    buses[0].node(FRONT_NODE).set_feedback(MockFeedback {
        // channel 1 = right, channel 2 = left
        position: [48128, -48128], // one wheel revolution: 1600 * 30.08
        velocity: [3008, -3008],   // motor RPM, one wheel at 100 RPM
        current: [100, -100],      // 10.0 A
        fault_flags: 0b0001_0000,  // emergency_stop
        script_flags: 0,
        runtime_flags: [0b0000_0010, 0], // motor 1 stall
    });

    // let a few PDO rounds arrive
    sleep(Duration::from_millis(30));
    controller.update_system_feedback().unwrap();

    let front = controller.front_data();
    assert!(!front.data_too_old);
    assert!(!front.can_error);

    assert!((front.right.position - 2.0 * PI).abs() < 1e-9);
    assert!((front.left.position + 2.0 * PI).abs() < 1e-9);
    let wheel_100_rpm = 100.0 / 60.0 * 2.0 * PI;
    assert!((front.right.velocity - wheel_100_rpm).abs() < 1e-9);
    let expected_effort = 10.0 * 0.11 * 30.08 * 0.75;
    assert!((front.right.effort - expected_effort).abs() < 1e-9);

    assert!(front.fault.emergency_stop);
    assert!(front.right_runtime.motor_stall);
    assert!(!front.left_runtime.motor_stall);

    controller.deinitialize();
}

#[test]
fn test_pdo_staleness_is_per_driver() {
    let (controller, buses) = make_controller();

    sleep(Duration::from_millis(30));
    controller.update_system_feedback().unwrap();
    assert!(!controller.front_data().data_too_old);
    assert!(!controller.rear_data().data_too_old);

    // suppress front PDOs only; 15 ms feedback timeout must expire
    buses[0].node(FRONT_NODE).set_pdo_enabled(false);
    sleep(Duration::from_millis(40));
    controller.update_system_feedback().unwrap();
    assert!(controller.front_data().data_too_old);
    assert!(!controller.rear_data().data_too_old);

    // recovery on the next rounds
    buses[0].node(FRONT_NODE).set_pdo_enabled(true);
    sleep(Duration::from_millis(30));
    controller.update_system_feedback().unwrap();
    assert!(!controller.front_data().data_too_old);

    controller.deinitialize();
}

#[test]
fn test_write_speed_emits_converted_commands() {
    let (controller, buses) = make_controller();

    // 1 rad/s with gear_ratio 30.08 / max_rpm 3600 -> command 80 everywhere
    controller.write_speed(1.0, 1.0, 1.0, 1.0).unwrap();

    for (bus_node, channel) in [
        (FRONT_NODE, registers::CMD_CHANNEL_1),
        (FRONT_NODE, registers::CMD_CHANNEL_2),
        (REAR_NODE, registers::CMD_CHANNEL_1),
        (REAR_NODE, registers::CMD_CHANNEL_2),
    ] {
        assert_eq!(
            buses[0].node(bus_node).commands_for(channel),
            vec![80],
            "node {bus_node} channel {channel:?}"
        );
    }

    assert_eq!(controller.last_commands(), [1.0, 1.0, 1.0, 1.0]);
    assert!(!controller.last_commands_zero());

    controller.write_speed(0.0, 0.0, 0.0, 0.0).unwrap();
    assert!(controller.last_commands_zero());

    controller.deinitialize();
}

#[test]
fn test_left_right_channel_assignment_on_write() {
    let (controller, buses) = make_controller();

    // distinct per-wheel speeds: fl, fr, rl, rr
    controller.write_speed(0.1, 0.2, 0.3, 0.4).unwrap();

    let front = buses[0].node(FRONT_NODE);
    let rear = buses[0].node(REAR_NODE);
    // channel 1 carries the right wheel, channel 2 the left wheel
    assert_eq!(front.commands_for(registers::CMD_CHANNEL_1), vec![16]); // 0.2 rad/s
    assert_eq!(front.commands_for(registers::CMD_CHANNEL_2), vec![8]); // 0.1 rad/s
    assert_eq!(rear.commands_for(registers::CMD_CHANNEL_1), vec![32]); // 0.4 rad/s
    assert_eq!(rear.commands_for(registers::CMD_CHANNEL_2), vec![24]); // 0.3 rad/s

    controller.deinitialize();
}

#[test]
fn test_update_drivers_state_polls_sdo_values() {
    let (controller, buses) = make_controller();

    buses[0]
        .node(REAR_NODE)
        .set_object(registers::TEMPERATURE, (-5i8) as u8 as u32, 1);

    controller.update_drivers_state().unwrap();

    let front = controller.front_data();
    assert!((front.driver_state.temperature - 32.0).abs() < 1e-9);
    assert!((front.driver_state.voltage - 36.0).abs() < 1e-9);
    assert!((front.driver_state.current - 4.5).abs() < 1e-9);

    let rear = controller.rear_data();
    assert!((rear.driver_state.temperature + 5.0).abs() < 1e-9);

    controller.deinitialize();
}

#[test]
fn test_can_fault_interrupts_read_and_write() {
    let (controller, buses) = make_controller();

    sleep(Duration::from_millis(30));
    controller.update_system_feedback().unwrap();

    // a bus-level fault latches the per-driver CAN error flags
    buses[0].inject_bus_fault();
    sleep(Duration::from_millis(20));

    let err = controller.update_system_feedback().unwrap_err();
    assert!(format!("{err}").contains("CAN error"), "{err}");
    assert!(controller.front_data().can_error);
    assert!(controller.rear_data().can_error);

    // a successful SDO write does not count while the bus is faulted
    let err = controller.write_speed(0.0, 0.0, 0.0, 0.0).unwrap_err();
    assert!(format!("{err}").contains("CAN error"), "{err}");

    controller.deinitialize();
}

#[test]
fn test_estop_and_safety_stop_reach_both_drivers() {
    let (controller, buses) = make_controller();

    controller.turn_on_estop().unwrap();
    controller.turn_off_estop().unwrap();
    controller.turn_on_safety_stop().unwrap();

    for node_id in [FRONT_NODE, REAR_NODE] {
        let node = buses[0].node(node_id);
        let downloads = node.downloads();
        assert!(downloads.contains(&(registers::TURN_ON_ESTOP, 1)));
        assert!(downloads.contains(&(registers::TURN_OFF_ESTOP, 1)));
        // safety stop hits both channels
        assert!(downloads.contains(&(registers::SAFETY_STOP, 1)));
        assert!(downloads.contains(&(registers::SAFETY_STOP, 2)));
    }

    controller.deinitialize();
}

#[test]
fn test_activate_resets_scripts_and_sends_zeros() {
    let (controller, buses) = make_controller();

    controller.activate().unwrap();

    for node_id in [FRONT_NODE, REAR_NODE] {
        let node = buses[0].node(node_id);
        let downloads = node.downloads();
        assert!(downloads.contains(&(
            registers::RESET_SCRIPT,
            registers::RESET_SCRIPT_MAGIC as u32
        )));
        assert_eq!(node.commands_for(registers::CMD_CHANNEL_1), vec![0]);
        assert_eq!(node.commands_for(registers::CMD_CHANNEL_2), vec![0]);
    }

    controller.deinitialize();
}
