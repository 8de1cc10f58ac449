//! 硬件参数解析与关节规约
//!
//! 框架给出的关节顺序由上游 URDF 决定，不可依赖；`on_init` 时按
//! `fl|fr|rl|rr` 后缀一次性求出排列，此后所有数组都走规范序
//! [fl, fr, rl, rr]。四个后缀必须各恰好匹配一个关节名，否则初始化
//! 失败。

use crate::error::SystemError;
use bison_roboteq::{CanSettings, DrivetrainSettings};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 规范关节顺序的后缀
pub const JOINT_ORDER: [&str; 4] = ["fl", "fr", "rl", "rr"];

/// 硬件版本判别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareVariant {
    V12X,
    V10X,
}

impl FromStr for HardwareVariant {
    type Err = SystemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "V12X" => Ok(Self::V12X),
            "V10X" => Ok(Self::V10X),
            other => Err(SystemError::InvalidConfig(format!(
                "unknown hardware variant '{other}' (expected V12X or V10X)"
            ))),
        }
    }
}

/// `on_init` 冻结的全部系统参数
#[derive(Debug, Clone)]
pub struct SystemSettings {
    pub hardware_variant: HardwareVariant,
    pub drivetrain: DrivetrainSettings,
    pub can: CanSettings,
    /// 预编译主站描述文件的路径（初始化时读取的唯一文件）
    pub master_description_path: PathBuf,
    pub gpio_chip_path: String,
    /// SDO 轮询驱动器状态的周期
    pub roboteq_state_period: Duration,
    pub max_roboteq_initialization_attempts: u32,
    pub max_roboteq_activation_attempts: u32,
    pub max_safety_stop_attempts: u32,
}

impl SystemSettings {
    /// 从框架参数表解析；缺项或格式错误都是致命的
    pub fn from_parameters(parameters: &HashMap<String, String>) -> Result<Self, SystemError> {
        Ok(Self {
            hardware_variant: required::<HardwareVariant>(parameters, "hardware_variant")?,
            drivetrain: DrivetrainSettings {
                motor_torque_constant: required(parameters, "motor_torque_constant")?,
                gear_ratio: required(parameters, "gear_ratio")?,
                gearbox_efficiency: required(parameters, "gearbox_efficiency")?,
                encoder_resolution: required(parameters, "encoder_resolution")?,
                max_rpm_motor_speed: required(parameters, "max_rpm_motor_speed")?,
            },
            can: CanSettings {
                master_can_id: required(parameters, "master_can_id")?,
                front_driver_can_id: required(parameters, "front_driver_can_id")?,
                rear_driver_can_id: required(parameters, "rear_driver_can_id")?,
                sdo_operation_timeout: optional_millis(
                    parameters,
                    "sdo_operation_timeout_ms",
                    Duration::from_millis(4),
                )?,
                pdo_feedback_timeout: optional_millis(
                    parameters,
                    "pdo_feedback_timeout_ms",
                    Duration::from_millis(15),
                )?,
            },
            master_description_path: PathBuf::from(
                parameters
                    .get("master_description_path")
                    .cloned()
                    .unwrap_or_else(|| "config/master.toml".to_string()),
            ),
            gpio_chip_path: parameters
                .get("gpio_chip_path")
                .cloned()
                .unwrap_or_else(|| "/dev/gpiochip0".to_string()),
            roboteq_state_period: optional_millis(
                parameters,
                "roboteq_state_period_ms",
                Duration::from_secs(1),
            )?,
            max_roboteq_initialization_attempts: optional(
                parameters,
                "max_roboteq_initialization_attempts",
                3,
            )?,
            max_roboteq_activation_attempts: optional(
                parameters,
                "max_roboteq_activation_attempts",
                3,
            )?,
            max_safety_stop_attempts: optional(parameters, "max_safety_stop_attempts", 20)?,
        })
    }
}

fn required<T: FromStr>(
    parameters: &HashMap<String, String>,
    key: &str,
) -> Result<T, SystemError>
where
    T::Err: std::fmt::Display,
{
    let raw = parameters.get(key).ok_or_else(|| {
        SystemError::InvalidConfig(format!("required hardware parameter '{key}' was not defined"))
    })?;
    raw.parse::<T>().map_err(|e| {
        SystemError::InvalidConfig(format!("hardware parameter '{key}'='{raw}' is invalid: {e}"))
    })
}

fn optional<T: FromStr>(
    parameters: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, SystemError>
where
    T::Err: std::fmt::Display,
{
    match parameters.get(key) {
        Some(raw) => raw.parse::<T>().map_err(|e| {
            SystemError::InvalidConfig(format!(
                "hardware parameter '{key}'='{raw}' is invalid: {e}"
            ))
        }),
        None => Ok(default),
    }
}

fn optional_millis(
    parameters: &HashMap<String, String>,
    key: &str,
    default: Duration,
) -> Result<Duration, SystemError> {
    Ok(Duration::from_millis(optional(
        parameters,
        key,
        default.as_millis() as u64,
    )?))
}

/// 按 `fl|fr|rl|rr` 后缀把框架给出的关节名排成规范序
pub fn sort_joint_names(joints: &[String]) -> Result<[String; 4], SystemError> {
    if joints.len() != JOINT_ORDER.len() {
        return Err(SystemError::InvalidConfig(format!(
            "wrong number of joints defined: {}, {} expected",
            joints.len(),
            JOINT_ORDER.len()
        )));
    }

    let mut sorted: [String; 4] = Default::default();
    for (slot, sequence) in JOINT_ORDER.iter().enumerate() {
        let mut matches = joints.iter().filter(|name| name.contains(sequence));
        let first = matches.next().ok_or_else(|| {
            SystemError::InvalidConfig(format!(
                "'{sequence}' joint not defined (exactly one joint name containing this \
                 sequence is required)"
            ))
        })?;
        if matches.next().is_some() {
            return Err(SystemError::InvalidConfig(format!(
                "multiple joint names contain '{sequence}', exactly one is required"
            )));
        }
        sorted[slot] = first.clone();
    }
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_parameters() -> HashMap<String, String> {
        [
            ("hardware_variant", "V12X"),
            ("motor_torque_constant", "0.11"),
            ("gear_ratio", "30.08"),
            ("gearbox_efficiency", "0.75"),
            ("encoder_resolution", "1600"),
            ("max_rpm_motor_speed", "3600"),
            ("master_can_id", "3"),
            ("front_driver_can_id", "1"),
            ("rear_driver_can_id", "2"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    /// 默认值与必填项解析
    #[test]
    fn test_parse_with_defaults() {
        let settings = SystemSettings::from_parameters(&base_parameters()).unwrap();
        assert_eq!(settings.hardware_variant, HardwareVariant::V12X);
        assert_eq!(settings.can.master_can_id, 3);
        assert_eq!(settings.can.sdo_operation_timeout, Duration::from_millis(4));
        assert_eq!(settings.can.pdo_feedback_timeout, Duration::from_millis(15));
        assert_eq!(settings.roboteq_state_period, Duration::from_secs(1));
        assert_eq!(settings.max_roboteq_initialization_attempts, 3);
        assert_eq!(settings.max_safety_stop_attempts, 20);
    }

    /// 缺失必填项是致命错误
    #[test]
    fn test_missing_required_parameter() {
        let mut parameters = base_parameters();
        parameters.remove("gear_ratio");
        let err = SystemSettings::from_parameters(&parameters).unwrap_err();
        assert!(format!("{err}").contains("gear_ratio"));
    }

    /// 非法数字被拒绝
    #[test]
    fn test_malformed_parameter() {
        let mut parameters = base_parameters();
        parameters.insert("master_can_id".into(), "not-a-number".into());
        assert!(SystemSettings::from_parameters(&parameters).is_err());
    }

    /// 关节名按后缀规约，与输入顺序无关
    #[test]
    fn test_sort_joint_names() {
        let joints = vec![
            "rr_wheel_joint".to_string(),
            "fl_wheel_joint".to_string(),
            "rl_wheel_joint".to_string(),
            "fr_wheel_joint".to_string(),
        ];
        let sorted = sort_joint_names(&joints).unwrap();
        assert_eq!(
            sorted,
            [
                "fl_wheel_joint".to_string(),
                "fr_wheel_joint".to_string(),
                "rl_wheel_joint".to_string(),
                "rr_wheel_joint".to_string(),
            ]
        );
    }

    /// 找不齐四个后缀是致命错误
    #[test]
    fn test_sort_joint_names_missing_suffix() {
        let joints = vec![
            "fl_wheel_joint".to_string(),
            "fr_wheel_joint".to_string(),
            "rl_wheel_joint".to_string(),
            "left_wheel_joint".to_string(),
        ];
        let err = sort_joint_names(&joints).unwrap_err();
        assert!(format!("{err}").contains("'rr'"));
    }

    #[test]
    fn test_wrong_joint_count() {
        let joints = vec!["fl".to_string(), "fr".to_string()];
        assert!(sort_joint_names(&joints).is_err());
    }
}
