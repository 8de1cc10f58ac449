//! Roboteq 控制器对象字典
//!
//! 对象号在固件 v60 与 v80 之间保持稳定（参数名有变动，对象号没有），
//! 这里的常量以 v80 的手册为准。

use bison_canopen::ObjectId;

/// 速度指令，通道 1（右轮）
pub const CMD_CHANNEL_1: ObjectId = ObjectId::new(0x2000, 1);
/// 速度指令，通道 2（左轮）
pub const CMD_CHANNEL_2: ObjectId = ObjectId::new(0x2000, 2);

/// 编码器位置，通道 1 / 2
pub const POSITION_CHANNEL_1: ObjectId = ObjectId::new(0x2106, 1);
pub const POSITION_CHANNEL_2: ObjectId = ObjectId::new(0x2106, 2);
/// 电机转速，通道 1 / 2
pub const VELOCITY_CHANNEL_1: ObjectId = ObjectId::new(0x2106, 3);
pub const VELOCITY_CHANNEL_2: ObjectId = ObjectId::new(0x2106, 4);
/// 电机电流（0.1 A），通道 1 / 2
pub const CURRENT_CHANNEL_1: ObjectId = ObjectId::new(0x2106, 5);
pub const CURRENT_CHANNEL_2: ObjectId = ObjectId::new(0x2106, 6);
/// 故障标志（低字节）+ 脚本标志（高字节）
pub const FAULT_SCRIPT_FLAGS: ObjectId = ObjectId::new(0x2106, 7);
/// 运行期标志，电机 1（低字节）/ 电机 2（高字节）
pub const RUNTIME_FLAGS: ObjectId = ObjectId::new(0x2106, 8);

/// 散热器温度（°C，i8）
pub const TEMPERATURE: ObjectId = ObjectId::new(0x210F, 1);
/// 母线电压（0.1 V，u16）
pub const VOLTAGE: ObjectId = ObjectId::new(0x210D, 2);
/// 电池电流（0.1 A，i16），通道 1 / 2
pub const BATTERY_CURRENT_1: ObjectId = ObjectId::new(0x210C, 1);
pub const BATTERY_CURRENT_2: ObjectId = ObjectId::new(0x210C, 2);

/// MicroBasic 脚本重启（写 2 触发）
pub const RESET_SCRIPT: ObjectId = ObjectId::new(0x2018, 0);
/// Cmd_ESTOP：进入急停
pub const TURN_ON_ESTOP: ObjectId = ObjectId::new(0x200C, 0);
/// Cmd_MGO：退出急停
pub const TURN_OFF_ESTOP: ObjectId = ObjectId::new(0x200D, 0);
/// Cmd_SFT：安全停车（写通道号）
pub const SAFETY_STOP: ObjectId = ObjectId::new(0x202C, 0);

/// 设备类型（CiA 301 强制对象，引导时读取）
pub const DEVICE_TYPE: ObjectId = ObjectId::new(0x1000, 0);
/// 身份对象：厂商号（引导时与描述文件比对）
pub const IDENTITY_VENDOR_ID: ObjectId = ObjectId::new(0x1018, 1);

/// `RESET_SCRIPT` 的触发值
pub const RESET_SCRIPT_MAGIC: u8 = 2;
