//! 单位换算与标志位解码
//!
//! SI 关节空间与 Roboteq 定点表示之间的双向换算。换算系数在构造时
//! 由传动参数一次性推导，实时路径上只剩乘法。

use std::f64::consts::PI;

/// 传动系统参数（`on_init` 后不可变）
#[derive(Debug, Clone, Copy)]
pub struct DrivetrainSettings {
    /// 电机转矩常数（N·m/A）
    pub motor_torque_constant: f64,
    /// 减速比
    pub gear_ratio: f64,
    /// 减速箱效率
    pub gearbox_efficiency: f64,
    /// 编码器分辨率（脉冲/电机转）
    pub encoder_resolution: f64,
    /// 驱动器 MXRPM 参数（指令 ±1000 对应的电机转速）
    pub max_rpm_motor_speed: f64,
}

/// Roboteq GO 指令的定点范围
pub const MAX_ROBOTEQ_CMD: i32 = 1000;

/// 轮速（rad/s）→ Roboteq GO 指令
///
/// 换算步骤：轮 rad/s → 电机 rad/s（×减速比）→ 电机转/秒（×1/2π）→
/// 电机转/分（×60）→ 相对 MXRPM 的千分比。
#[derive(Debug, Clone, Copy)]
pub struct RoboteqVelocityCommandConverter {
    radians_per_second_to_cmd: f64,
}

impl RoboteqVelocityCommandConverter {
    pub fn new(settings: &DrivetrainSettings) -> Self {
        Self {
            radians_per_second_to_cmd: settings.gear_ratio * (1.0 / (2.0 * PI))
                * 60.0
                * (1000.0 / settings.max_rpm_motor_speed),
        }
    }

    /// 超出 ±1000 的结果被截断
    pub fn convert(&self, radians_per_second: f64) -> i32 {
        let cmd = (radians_per_second * self.radians_per_second_to_cmd).round();
        (cmd as i64).clamp(-(MAX_ROBOTEQ_CMD as i64), MAX_ROBOTEQ_CMD as i64) as i32
    }
}

/// 驱动器原生反馈 → SI 轮状态
///
/// 位置：编码器脉冲 → 电机转 → 轮转 → rad；
/// 速度：电机 RPM → 轮 RPM → 轮转/秒 → rad/s；
/// 力矩：0.1 A → A → 电机 N·m → 轮理想 N·m → 轮实际 N·m。
#[derive(Debug, Clone, Copy)]
pub struct MotorStateConverter {
    position_to_radians: f64,
    velocity_to_radians_per_second: f64,
    current_to_newton_meters: f64,
}

impl MotorStateConverter {
    pub fn new(settings: &DrivetrainSettings) -> Self {
        Self {
            position_to_radians: (1.0 / settings.encoder_resolution)
                * (1.0 / settings.gear_ratio)
                * (2.0 * PI),
            velocity_to_radians_per_second: (1.0 / settings.gear_ratio)
                * (1.0 / 60.0)
                * (2.0 * PI),
            current_to_newton_meters: (1.0 / 10.0)
                * settings.motor_torque_constant
                * settings.gear_ratio
                * settings.gearbox_efficiency,
        }
    }

    /// 编码器脉冲数 → 轮位置（rad）
    pub fn position(&self, ticks: i32) -> f64 {
        ticks as f64 * self.position_to_radians
    }

    /// 电机转速（RPM）→ 轮速（rad/s）
    pub fn velocity(&self, rpm: i32) -> f64 {
        rpm as f64 * self.velocity_to_radians_per_second
    }

    /// 电机电流（0.1 A）→ 轮力矩（N·m）
    pub fn effort(&self, deciamps: i16) -> f64 {
        deciamps as f64 * self.current_to_newton_meters
    }
}

/// 单个轮子的 SI 状态
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorState {
    /// 位置（rad）
    pub position: f64,
    /// 速度（rad/s）
    pub velocity: f64,
    /// 力矩（N·m）
    pub effort: f64,
}

fn bit_set(flags: u8, bit: u8) -> bool {
    flags & (1 << bit) != 0
}

fn collect_flag_names(names: &[(&'static str, bool)]) -> String {
    let mut log = String::new();
    for (name, set) in names {
        if *set {
            if !log.is_empty() {
                log.push(' ');
            }
            log.push_str(name);
        }
    }
    log
}

/// 驱动器故障标志（对象 2106:7 低字节）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultFlag {
    pub overheat: bool,
    pub overvoltage: bool,
    pub undervoltage: bool,
    pub short_circuit: bool,
    pub emergency_stop: bool,
    pub motor_or_sensor_setup_fault: bool,
    pub mosfet_failure: bool,
    pub default_config_loaded_at_startup: bool,
    /// 原始字节，解码不丢位
    pub raw: u8,
}

impl FaultFlag {
    pub fn decode(raw: u8) -> Self {
        Self {
            overheat: bit_set(raw, 0),
            overvoltage: bit_set(raw, 1),
            undervoltage: bit_set(raw, 2),
            short_circuit: bit_set(raw, 3),
            emergency_stop: bit_set(raw, 4),
            motor_or_sensor_setup_fault: bit_set(raw, 5),
            mosfet_failure: bit_set(raw, 6),
            default_config_loaded_at_startup: bit_set(raw, 7),
            raw,
        }
    }

    /// 置位标志的诊断串（空串表示无故障）
    pub fn error_log(&self) -> String {
        collect_flag_names(&[
            ("overheat", self.overheat),
            ("overvoltage", self.overvoltage),
            ("undervoltage", self.undervoltage),
            ("short_circuit", self.short_circuit),
            ("emergency_stop", self.emergency_stop),
            ("motor_or_sensor_setup_fault", self.motor_or_sensor_setup_fault),
            ("mosfet_failure", self.mosfet_failure),
            (
                "default_config_loaded_at_startup",
                self.default_config_loaded_at_startup,
            ),
        ])
    }
}

/// MicroBasic 脚本标志（对象 2106:7 高字节）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptFlag {
    pub loop_error: bool,
    pub encoder_disconnected: bool,
    pub amp_limiter: bool,
    pub raw: u8,
}

impl ScriptFlag {
    pub fn decode(raw: u8) -> Self {
        Self {
            loop_error: bit_set(raw, 0),
            encoder_disconnected: bit_set(raw, 1),
            amp_limiter: bit_set(raw, 2),
            raw,
        }
    }

    pub fn error_log(&self) -> String {
        collect_flag_names(&[
            ("loop_error", self.loop_error),
            ("encoder_disconnected", self.encoder_disconnected),
            ("amp_limiter", self.amp_limiter),
        ])
    }
}

/// 单电机运行期标志（对象 2106:8，每电机一个字节）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeError {
    pub amps_limit_active: bool,
    pub motor_stall: bool,
    pub loop_error: bool,
    pub safety_stop_active: bool,
    pub forward_limit_triggered: bool,
    pub reverse_limit_triggered: bool,
    pub amps_trigger_activated: bool,
    pub raw: u8,
}

impl RuntimeError {
    pub fn decode(raw: u8) -> Self {
        Self {
            amps_limit_active: bit_set(raw, 0),
            motor_stall: bit_set(raw, 1),
            loop_error: bit_set(raw, 2),
            safety_stop_active: bit_set(raw, 3),
            forward_limit_triggered: bit_set(raw, 4),
            reverse_limit_triggered: bit_set(raw, 5),
            amps_trigger_activated: bit_set(raw, 6),
            raw,
        }
    }

    /// 诊断串；安全停车位属于正常工况（急停期间常态置位），不计入
    pub fn error_log(&self) -> String {
        collect_flag_names(&[
            ("amps_limit_active", self.amps_limit_active),
            ("motor_stall", self.motor_stall),
            ("loop_error", self.loop_error),
            ("forward_limit_triggered", self.forward_limit_triggered),
            ("reverse_limit_triggered", self.reverse_limit_triggered),
            ("amps_trigger_activated", self.amps_trigger_activated),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DrivetrainSettings {
        // Bison 底盘的标定参数
        DrivetrainSettings {
            motor_torque_constant: 0.11,
            gear_ratio: 30.08,
            gearbox_efficiency: 0.75,
            encoder_resolution: 1600.0,
            max_rpm_motor_speed: 3600.0,
        }
    }

    /// 1 rad/s 在标定参数下对应指令 80
    #[test]
    fn test_command_reference_point() {
        let converter = RoboteqVelocityCommandConverter::new(&settings());
        assert_eq!(converter.convert(1.0), 80);
    }

    /// 零点、奇对称与饱和
    #[test]
    fn test_command_symmetry_and_clamp() {
        let converter = RoboteqVelocityCommandConverter::new(&settings());
        assert_eq!(converter.convert(0.0), 0);
        for velocity in [0.1, 0.5, 1.0, 3.0, 7.0, 100.0] {
            assert_eq!(converter.convert(-velocity), -converter.convert(velocity));
            assert!(converter.convert(velocity).abs() <= MAX_ROBOTEQ_CMD);
        }
        assert_eq!(converter.convert(1e9), MAX_ROBOTEQ_CMD);
        assert_eq!(converter.convert(-1e9), -MAX_ROBOTEQ_CMD);
    }

    /// 位置换算在一个编码器量化步长内可逆
    #[test]
    fn test_position_roundtrip_within_one_tick() {
        let s = settings();
        let converter = MotorStateConverter::new(&s);
        let quantum = 2.0 * PI / (s.encoder_resolution * s.gear_ratio);

        for theta in [0.0, 0.5, -1.25, 3.1, 42.0] {
            let ticks = (theta / quantum).round() as i32;
            let back = converter.position(ticks);
            assert!((back - theta).abs() <= quantum, "theta={theta} back={back}");
        }
    }

    /// 速度与力矩换算的参考点
    #[test]
    fn test_feedback_reference_points() {
        let s = settings();
        let converter = MotorStateConverter::new(&s);

        // 电机 3008 RPM = 轮 100 RPM = 100/60 转/秒
        let expected = 100.0 / 60.0 * 2.0 * PI;
        assert!((converter.velocity(3008) - expected).abs() < 1e-9);

        // 10.0 A × 0.11 × 30.08 × 0.75
        let expected = 10.0 * 0.11 * 30.08 * 0.75;
        assert!((converter.effort(100) - expected).abs() < 1e-9);
        assert!(converter.effort(-100) < 0.0);
    }

    /// 故障字节全位具名，raw 保留原值
    #[test]
    fn test_fault_flag_decode() {
        let flag = FaultFlag::decode(0b0001_0001);
        assert!(flag.overheat);
        assert!(flag.emergency_stop);
        assert!(!flag.overvoltage);
        assert_eq!(flag.raw, 0b0001_0001);
        assert_eq!(flag.error_log(), "overheat emergency_stop");

        assert_eq!(FaultFlag::decode(0).error_log(), "");
    }

    /// 安全停车位不计入运行期诊断串
    #[test]
    fn test_runtime_error_suppresses_safety_stop() {
        let flag = RuntimeError::decode(0b0000_1010);
        assert!(flag.motor_stall);
        assert!(flag.safety_stop_active);
        assert_eq!(flag.error_log(), "motor_stall");
    }

    #[test]
    fn test_script_flag_decode() {
        let flag = ScriptFlag::decode(0b0000_0010);
        assert!(flag.encoder_disconnected);
        assert_eq!(flag.error_log(), "encoder_disconnected");
    }
}
