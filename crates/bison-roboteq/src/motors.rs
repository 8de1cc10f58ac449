//! 电机控制器：周期性反馈聚合与指令下发
//!
//! 持有 CANopen 控制器和两份宿主侧聚合数据（前/后驱动器各一份）。
//! 反馈路径把 PDO 镜像换算成 SI 关节量并做新鲜度判定；指令路径把
//! SI 轮速换算成定点指令逐驱动器写入。任一驱动器报告总线故障时，
//! 读写路径立即上抛，当前周期中断。
//!
//! 通道约定（接线决定）：通道 2 → 左轮，通道 1 → 右轮。

use crate::bus::RawDriverFeedback;
use crate::controller::{AdapterFactory, CanSettings, CanopenController};
use crate::conversion::{
    DrivetrainSettings, FaultFlag, MotorState, MotorStateConverter,
    RoboteqVelocityCommandConverter, RuntimeError, ScriptFlag,
};
use crate::driver::RoboteqDriver;
use crate::error::{ResultExt, RoboteqError};
use bison_canopen::MasterDescription;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

/// 激活流程里脚本重启与零速指令之间的稳定时间
const ACTIVATION_SETTLE: Duration = Duration::from_secs(1);

/// SDO 轮询得到的驱动器状态（SI 单位）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriverState {
    /// 散热器温度（°C）
    pub temperature: f64,
    /// 母线电压（V）
    pub voltage: f64,
    /// 两通道电池电流之和（A）
    pub current: f64,
    pub battery_current_1: f64,
    pub battery_current_2: f64,
}

impl DriverState {
    fn set(&mut self, temperature: i16, voltage: u16, amps_1: i16, amps_2: i16) {
        self.temperature = temperature as f64;
        self.voltage = voltage as f64 / 10.0;
        self.battery_current_1 = amps_1 as f64 / 10.0;
        self.battery_current_2 = amps_2 as f64 / 10.0;
        self.current = self.battery_current_1 + self.battery_current_2;
    }
}

/// 单驱动器的宿主侧聚合数据
#[derive(Debug, Clone, Default)]
pub struct RoboteqData {
    /// 左轮（通道 2）
    pub left: MotorState,
    /// 右轮（通道 1）
    pub right: MotorState,
    pub fault: FaultFlag,
    pub script: ScriptFlag,
    pub left_runtime: RuntimeError,
    pub right_runtime: RuntimeError,
    pub driver_state: DriverState,
    /// 最近一轮 PDO 比 `pdo_feedback_timeout` 还旧
    pub data_too_old: bool,
    /// 低层总线故障标志
    pub can_error: bool,
}

impl RoboteqData {
    fn update_from_feedback(
        &mut self,
        converter: &MotorStateConverter,
        feedback: &RawDriverFeedback,
        data_too_old: bool,
        can_error: bool,
    ) {
        // 通道 2 → 左，通道 1 → 右
        self.left = MotorState {
            position: converter.position(feedback.position[1]),
            velocity: converter.velocity(feedback.velocity[1]),
            effort: converter.effort(feedback.current[1]),
        };
        self.right = MotorState {
            position: converter.position(feedback.position[0]),
            velocity: converter.velocity(feedback.velocity[0]),
            effort: converter.effort(feedback.current[0]),
        };
        self.fault = FaultFlag::decode(feedback.fault_flags);
        self.script = ScriptFlag::decode(feedback.script_flags);
        self.left_runtime = RuntimeError::decode(feedback.runtime_flags[1]);
        self.right_runtime = RuntimeError::decode(feedback.runtime_flags[0]);
        self.data_too_old = data_too_old;
        self.can_error = can_error;
    }
}

/// 前后两个驱动器的聚合控制器
pub struct MotorsController {
    controller: CanopenController,
    command_converter: RoboteqVelocityCommandConverter,
    state_converter: MotorStateConverter,
    pdo_feedback_timeout: Duration,
    front_data: Mutex<RoboteqData>,
    rear_data: Mutex<RoboteqData>,
    /// 最近一次请求的轮速 [fl, fr, rl, rr]，急停复位要求全零
    last_commands: Mutex<[f64; 4]>,
}

impl MotorsController {
    pub fn new(
        factory: AdapterFactory,
        description: MasterDescription,
        can_settings: CanSettings,
        drivetrain_settings: DrivetrainSettings,
    ) -> Self {
        Self {
            pdo_feedback_timeout: can_settings.pdo_feedback_timeout,
            controller: CanopenController::new(factory, description, can_settings),
            command_converter: RoboteqVelocityCommandConverter::new(&drivetrain_settings),
            state_converter: MotorStateConverter::new(&drivetrain_settings),
            front_data: Mutex::new(RoboteqData::default()),
            rear_data: Mutex::new(RoboteqData::default()),
            last_commands: Mutex::new([0.0; 4]),
        }
    }

    pub fn initialize(&self) -> Result<(), RoboteqError> {
        self.controller.initialize()
    }

    pub fn deinitialize(&self) {
        self.controller.deinitialize();
    }

    /// 激活流程：重启脚本，等 1 s，再发零速指令，等 1 s
    pub fn activate(&self) -> Result<(), RoboteqError> {
        info!("Activating Roboteq drivers");
        let front = self.controller.front_driver()?;
        let rear = self.controller.rear_driver()?;

        front
            .reset_script()
            .context("Front driver reset Roboteq script exception")?;
        rear.reset_script()
            .context("Rear driver reset Roboteq script exception")?;
        spin_sleep::sleep(ACTIVATION_SETTLE);

        (|| {
            front.send_cmd_channel_1(0)?;
            front.send_cmd_channel_2(0)
        })()
        .context("Front driver send 0 command exception")?;
        (|| {
            rear.send_cmd_channel_1(0)?;
            rear.send_cmd_channel_2(0)
        })()
        .context("Rear driver send 0 command exception")?;
        spin_sleep::sleep(ACTIVATION_SETTLE);

        Ok(())
    }

    /// PDO 反馈聚合与新鲜度判定
    ///
    /// 任一驱动器置位总线故障标志时上抛（聚合数据仍然更新完毕，
    /// 遥测侧能看到故障现场）。
    pub fn update_system_feedback(&self) -> Result<(), RoboteqError> {
        let front = self.controller.front_driver()?;
        let rear = self.controller.rear_driver()?;

        let front_feedback = front.feedback();
        let rear_feedback = rear.feedback();
        let now = Instant::now();

        let front_too_old =
            now.duration_since(front_feedback.timestamp) > self.pdo_feedback_timeout;
        let rear_too_old = now.duration_since(rear_feedback.timestamp) > self.pdo_feedback_timeout;
        let front_can_error = front.is_can_error();
        let rear_can_error = rear.is_can_error();

        self.front_data.lock().update_from_feedback(
            &self.state_converter,
            &front_feedback,
            front_too_old,
            front_can_error,
        );
        self.rear_data.lock().update_from_feedback(
            &self.state_converter,
            &rear_feedback,
            rear_too_old,
            rear_can_error,
        );

        if front_can_error {
            return Err(RoboteqError::CanNetwork {
                name: front.name().to_string(),
            }
            .context("CAN error detected when trying to read Roboteq feedback"));
        }
        if rear_can_error {
            return Err(RoboteqError::CanNetwork {
                name: rear.name().to_string(),
            }
            .context("CAN error detected when trying to read Roboteq feedback"));
        }
        Ok(())
    }

    /// SDO 轮询驱动器状态（温度、电压、两路电池电流），预期节拍 1 Hz
    pub fn update_drivers_state(&self) -> Result<(), RoboteqError> {
        let front = self.controller.front_driver()?;
        let rear = self.controller.rear_driver()?;

        Self::poll_driver_state(&front, &self.front_data)
            .context("Error when trying to read front Roboteq driver state")?;
        Self::poll_driver_state(&rear, &self.rear_data)
            .context("Error when trying to read rear Roboteq driver state")?;
        Ok(())
    }

    fn poll_driver_state(
        driver: &RoboteqDriver,
        data: &Mutex<RoboteqData>,
    ) -> Result<(), RoboteqError> {
        let temperature = driver.read_temperature()?;
        let voltage = driver.read_voltage()?;
        let amps_1 = driver.read_battery_current_1()?;
        let amps_2 = driver.read_battery_current_2()?;
        data.lock()
            .driver_state
            .set(temperature, voltage, amps_1, amps_2);
        Ok(())
    }

    /// 写四轮速度（rad/s）
    ///
    /// 请求值先记入宿主侧的最近指令，再逐驱动器下发；写全部成功后
    /// 仍要检查总线故障标志，带故障的成功不算成功。
    pub fn write_speed(
        &self,
        speed_fl: f64,
        speed_fr: f64,
        speed_rl: f64,
        speed_rr: f64,
    ) -> Result<(), RoboteqError> {
        *self.last_commands.lock() = [speed_fl, speed_fr, speed_rl, speed_rr];

        let front = self.controller.front_driver()?;
        let rear = self.controller.rear_driver()?;

        (|| {
            front.send_cmd_channel_1(self.command_converter.convert(speed_fr))?;
            front.send_cmd_channel_2(self.command_converter.convert(speed_fl))
        })()
        .context("Front driver send Roboteq cmd failed")?;
        (|| {
            rear.send_cmd_channel_1(self.command_converter.convert(speed_rr))?;
            rear.send_cmd_channel_2(self.command_converter.convert(speed_rl))
        })()
        .context("Rear driver send Roboteq cmd failed")?;

        if front.is_can_error() {
            return Err(RoboteqError::CanNetwork {
                name: front.name().to_string(),
            });
        }
        if rear.is_can_error() {
            return Err(RoboteqError::CanNetwork {
                name: rear.name().to_string(),
            });
        }
        Ok(())
    }

    /// 两驱动器进入急停；部分失败按聚合失败处理
    pub fn turn_on_estop(&self) -> Result<(), RoboteqError> {
        let front = self.controller.front_driver()?;
        let rear = self.controller.rear_driver()?;
        front
            .turn_on_estop()
            .context("Exception when trying to turn on estop on the front driver")?;
        rear.turn_on_estop()
            .context("Exception when trying to turn on estop on the rear driver")?;
        Ok(())
    }

    /// 两驱动器退出急停
    pub fn turn_off_estop(&self) -> Result<(), RoboteqError> {
        let front = self.controller.front_driver()?;
        let rear = self.controller.rear_driver()?;
        front
            .turn_off_estop()
            .context("Exception when trying to turn off estop on the front driver")?;
        rear.turn_off_estop()
            .context("Exception when trying to turn off estop on the rear driver")?;
        Ok(())
    }

    /// 两驱动器、各两通道的安全停车
    pub fn turn_on_safety_stop(&self) -> Result<(), RoboteqError> {
        let front = self.controller.front_driver()?;
        let rear = self.controller.rear_driver()?;
        (|| {
            front.turn_on_safety_stop_channel_1()?;
            front.turn_on_safety_stop_channel_2()
        })()
        .context("Exception when trying to turn on safety stop on the front driver")?;
        (|| {
            rear.turn_on_safety_stop_channel_1()?;
            rear.turn_on_safety_stop_channel_2()
        })()
        .context("Exception when trying to turn on safety stop on the rear driver")?;
        Ok(())
    }

    /// 前驱动器聚合数据快照
    pub fn front_data(&self) -> RoboteqData {
        self.front_data.lock().clone()
    }

    /// 后驱动器聚合数据快照
    pub fn rear_data(&self) -> RoboteqData {
        self.rear_data.lock().clone()
    }

    /// 最近一次请求的轮速 [fl, fr, rl, rr]
    pub fn last_commands(&self) -> [f64; 4] {
        *self.last_commands.lock()
    }

    /// 急停复位前置条件：最近指令全零
    pub fn last_commands_zero(&self) -> bool {
        self.last_commands.lock().iter().all(|&v| v == 0.0)
    }
}
