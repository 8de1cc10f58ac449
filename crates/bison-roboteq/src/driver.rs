//! Roboteq 驱动器门面
//!
//! 每个从站节点一个实例。同步 SDO 的实现方式是「提交异步操作 +
//! 带超时等待 + 超时后取消」：主机在名义超时之外多等 750µs，给事件
//! 循环一个把中止帧发出去的机会，然后才宣告失败。
//!
//! 读、写各有一把锁：同方向的 SDO 串行，读写之间允许并发（在途表
//! 按方向分槽，协议上由从站按命令字区分）。

use crate::bus::{BusClient, BusRequest, RawDriverFeedback, SdoKind, SdoSubmit, SDO_CANCEL_GRACE};
use crate::error::RoboteqError;
use crate::registers;
use bison_canopen::sdo::SdoValue;
use bison_canopen::{nmt, NmtCommand, ObjectId};
use crossbeam_channel::{bounded, RecvTimeoutError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::bus::NodeShared;
use crate::conversion::MAX_ROBOTEQ_CMD;

/// 从复位到 boot-up 报文的等待上限
const BOOT_TIMEOUT: Duration = Duration::from_secs(5);

/// 单个 Roboteq 从站的驱动器门面
pub struct RoboteqDriver {
    shared: Arc<NodeShared>,
    client: BusClient,
    sdo_operation_timeout: Duration,
    /// 描述文件给出的厂商号校验值
    expected_vendor_id: Option<u32>,
    read_lock: Mutex<()>,
    write_lock: Mutex<()>,
    /// `boot()` 时记录的引导纪元，`wait_for_boot()` 等它被推过
    boot_epoch_mark: AtomicU64,
}

impl RoboteqDriver {
    pub(crate) fn new(
        shared: Arc<NodeShared>,
        client: BusClient,
        sdo_operation_timeout: Duration,
        expected_vendor_id: Option<u32>,
    ) -> Self {
        Self {
            shared,
            client,
            sdo_operation_timeout,
            expected_vendor_id,
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
            boot_epoch_mark: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn node_id(&self) -> u8 {
        self.shared.node_id
    }

    /// 提交 NMT 复位并立即返回；配合 [`wait_for_boot`](Self::wait_for_boot)
    pub fn boot(&self) -> Result<(), RoboteqError> {
        self.shared.booted.store(false, Ordering::Release);
        self.boot_epoch_mark
            .store(self.shared.boot_epoch(), Ordering::Release);
        self.client.submit(BusRequest::Send(nmt::command(
            NmtCommand::ResetNode,
            self.shared.node_id,
        )))
    }

    /// 阻塞到引导完成或失败
    ///
    /// 引导过程等价于 CANopen 主站的标准流程：等 boot-up 报文，读设备
    /// 类型（`1000:0`），读厂商号（`1018:1`）并与描述文件比对，最后
    /// NMT start。任何一步失败都携带原始诊断信息上抛；`1000:0` 上偶发
    /// 的 `05040000` 中止同样按引导失败处理，不做静默重试。
    pub fn wait_for_boot(&self) -> Result<(), RoboteqError> {
        if self.shared.booted.load(Ordering::Acquire) {
            return Ok(());
        }

        let node = self.shared.node_id;
        let mark = self.boot_epoch_mark.load(Ordering::Acquire);
        if !self.shared.wait_boot_epoch_past(mark, BOOT_TIMEOUT) {
            return Err(RoboteqError::Boot {
                node,
                reason: "no boot-up message received within the boot timeout".to_string(),
            });
        }

        let device_type: u32 = self
            .sync_sdo_read(registers::DEVICE_TYPE)
            .map_err(|e| RoboteqError::Boot {
                node,
                reason: e.to_string(),
            })?;
        debug!("Node {} reports device type {:#010X}", node, device_type);

        let vendor_id: u32 = self
            .sync_sdo_read(registers::IDENTITY_VENDOR_ID)
            .map_err(|e| RoboteqError::Boot {
                node,
                reason: e.to_string(),
            })?;
        if let Some(expected) = self.expected_vendor_id {
            if vendor_id != expected {
                return Err(RoboteqError::Boot {
                    node,
                    reason: format!(
                        "value of object 1018:01 from CANopen device ({vendor_id:#X}) is \
                         different to value in the master description ({expected:#X})"
                    ),
                });
            }
        }

        self.client.submit(BusRequest::Send(nmt::command(
            NmtCommand::Start,
            node,
        )))?;
        self.shared.booted.store(true, Ordering::Release);
        info!("Driver '{}' (node {}) booted", self.name(), node);
        Ok(())
    }

    pub fn is_booted(&self) -> bool {
        self.shared.booted.load(Ordering::Acquire)
    }

    /// 低层总线故障标志（只在传输层重建时清除）
    pub fn is_can_error(&self) -> bool {
        self.shared.can_error.load(Ordering::Acquire)
    }

    /// 最近一次 PDO 镜像快照；从不阻塞总线
    pub fn feedback(&self) -> RawDriverFeedback {
        (**self.shared.feedback.load()).clone()
    }

    fn sync_sdo<T: SdoValue>(
        &self,
        kind: SdoKind,
        id: ObjectId,
        value: Option<T>,
    ) -> Result<[u8; 4], RoboteqError> {
        let guard = match kind {
            SdoKind::Read => self.read_lock.lock(),
            SdoKind::Write => self.write_lock.lock(),
        };

        let (reply_tx, reply_rx) = bounded(1);
        let (data, len) = match value {
            Some(value) => (value.encode(), T::SIZE),
            None => ([0u8; 4], 0),
        };
        self.client.submit(BusRequest::Sdo(SdoSubmit {
            node: self.shared.node_id,
            kind,
            id,
            data,
            len,
            timeout: self.sdo_operation_timeout,
            reply: reply_tx,
        }))?;

        let result = match reply_rx.recv_timeout(self.sdo_operation_timeout + SDO_CANCEL_GRACE) {
            Ok(Ok(outcome)) => Ok(outcome.data),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => {
                // 事件循环没能按时取消；补发取消请求后由主机宣告超时
                let _ = self.client.submit(BusRequest::CancelSdo {
                    node: self.shared.node_id,
                    kind,
                });
                Err(RoboteqError::SdoTimeout {
                    node: self.shared.node_id,
                    id,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(RoboteqError::BusDown),
        };

        drop(guard);
        result
    }

    fn sync_sdo_read<T: SdoValue>(&self, id: ObjectId) -> Result<T, RoboteqError> {
        let data = self.sync_sdo::<T>(SdoKind::Read, id, None)?;
        Ok(T::decode(&data))
    }

    fn sync_sdo_write<T: SdoValue>(&self, id: ObjectId, value: T) -> Result<(), RoboteqError> {
        self.sync_sdo(SdoKind::Write, id, Some(value)).map(|_| ())
    }

    /// 散热器温度（°C）
    pub fn read_temperature(&self) -> Result<i16, RoboteqError> {
        Ok(self.sync_sdo_read::<i8>(registers::TEMPERATURE)? as i16)
    }

    /// 母线电压（0.1 V）
    pub fn read_voltage(&self) -> Result<u16, RoboteqError> {
        self.sync_sdo_read::<u16>(registers::VOLTAGE)
    }

    /// 电池电流，通道 1（0.1 A）
    pub fn read_battery_current_1(&self) -> Result<i16, RoboteqError> {
        self.sync_sdo_read::<i16>(registers::BATTERY_CURRENT_1)
    }

    /// 电池电流，通道 2（0.1 A）
    pub fn read_battery_current_2(&self) -> Result<i16, RoboteqError> {
        self.sync_sdo_read::<i16>(registers::BATTERY_CURRENT_2)
    }

    /// 通道 1 速度指令；超出 ±1000 被截断
    pub fn send_cmd_channel_1(&self, cmd: i32) -> Result<(), RoboteqError> {
        self.sync_sdo_write(
            registers::CMD_CHANNEL_1,
            cmd.clamp(-MAX_ROBOTEQ_CMD, MAX_ROBOTEQ_CMD),
        )
    }

    /// 通道 2 速度指令；超出 ±1000 被截断
    pub fn send_cmd_channel_2(&self, cmd: i32) -> Result<(), RoboteqError> {
        self.sync_sdo_write(
            registers::CMD_CHANNEL_2,
            cmd.clamp(-MAX_ROBOTEQ_CMD, MAX_ROBOTEQ_CMD),
        )
    }

    /// 重启 MicroBasic 脚本
    pub fn reset_script(&self) -> Result<(), RoboteqError> {
        self.sync_sdo_write(registers::RESET_SCRIPT, registers::RESET_SCRIPT_MAGIC)
    }

    /// Cmd_ESTOP：控制器进入急停
    pub fn turn_on_estop(&self) -> Result<(), RoboteqError> {
        self.sync_sdo_write(registers::TURN_ON_ESTOP, 1u8)
    }

    /// Cmd_MGO：控制器退出急停
    pub fn turn_off_estop(&self) -> Result<(), RoboteqError> {
        self.sync_sdo_write(registers::TURN_OFF_ESTOP, 1u8)
    }

    /// Cmd_SFT：通道 1 安全停车
    pub fn turn_on_safety_stop_channel_1(&self) -> Result<(), RoboteqError> {
        self.sync_sdo_write(registers::SAFETY_STOP, 1u8)
    }

    /// Cmd_SFT：通道 2 安全停车
    pub fn turn_on_safety_stop_channel_2(&self) -> Result<(), RoboteqError> {
        self.sync_sdo_write(registers::SAFETY_STOP, 2u8)
    }
}
