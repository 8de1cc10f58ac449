//! # Bison CAN 适配层
//!
//! CAN 硬件抽象层，提供统一的 CAN 接口抽象。
//!
//! 底盘上的两台电机驱动器挂在同一条 CANopen 总线上，上层（CANopen 主站与
//! Roboteq 驱动）只通过 [`CanAdapter`] 与硬件交互，便于在测试中替换为
//! 内存回环适配器。

use std::time::Duration;
use thiserror::Error;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::SocketCanAdapter;

pub mod mock;

pub use mock::{MockCanAdapter, MockCanRemote};

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device error: {0}")]
    Device(String),
    #[error("Read timeout")]
    Timeout,
    /// 总线级故障（错误帧、bus-off 等），上层据此置位 CAN 错误标志
    #[error("CAN bus fault: {0}")]
    BusFault(String),
    #[error("Adapter disconnected")]
    Disconnected,
}

/// 一帧 CANopen 报文
///
/// CANopen 只使用 11 位标准帧 ID，数据段最长 8 字节。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFrame {
    /// 标准帧 ID（COB-ID，11 位）
    pub id: u16,
    /// 有效数据长度
    pub dlc: u8,
    /// 数据段（仅前 `dlc` 字节有效）
    pub data: [u8; 8],
}

impl BusFrame {
    /// 从数据切片构造一帧
    ///
    /// # Panics
    /// `data` 超过 8 字节时 panic（调用方负责长度约束）。
    pub fn new(id: u16, data: &[u8]) -> Self {
        assert!(data.len() <= 8, "CAN frame payload must be at most 8 bytes");
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Self {
            id,
            dlc: data.len() as u8,
            data: buf,
        }
    }

    /// 有效数据段
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.dlc as usize]
    }
}

/// CAN 适配器抽象
///
/// `receive` 带超时返回，超时是正常情况（[`CanError::Timeout`]），
/// 事件循环以此为节拍检查其他状态。
pub trait CanAdapter {
    fn send(&mut self, frame: BusFrame) -> Result<(), CanError>;
    fn receive(&mut self) -> Result<BusFrame, CanError>;
    fn set_receive_timeout(&mut self, _timeout: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 构造与读取数据段
    #[test]
    fn test_bus_frame_payload() {
        let frame = BusFrame::new(0x601, &[0x40, 0x00, 0x10, 0x00]);
        assert_eq!(frame.id, 0x601);
        assert_eq!(frame.dlc, 4);
        assert_eq!(frame.payload(), &[0x40, 0x00, 0x10, 0x00]);
    }

    #[test]
    #[should_panic]
    fn test_bus_frame_too_long() {
        BusFrame::new(0x100, &[0u8; 9]);
    }
}
