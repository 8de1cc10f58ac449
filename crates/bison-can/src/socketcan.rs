//! SocketCAN CAN 适配器实现
//!
//! 基于 Linux 内核的 SocketCAN 子系统。波特率等总线参数由系统工具
//! （`ip link`）配置，不在应用层设置；接口必须已处于 UP 状态。
//!
//! 错误帧不被过滤：总线级故障以 [`CanError::BusFault`] 的形式上抛，
//! 由上层锁存 CAN 错误标志。

use crate::{BusFrame, CanAdapter, CanError};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, Socket, SocketOptions, StandardId};
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tracing::{trace, warn};

/// SocketCAN 适配器
///
/// 实现 [`CanAdapter`]，持有一个已打开的 CAN socket。
pub struct SocketCanAdapter {
    socket: CanSocket,
    /// 接口名称（如 "panther_can"）
    interface: String,
}

impl SocketCanAdapter {
    /// 打开 CAN 接口
    ///
    /// 打开 socket 之前先检查接口是否存在，不存在时返回带修复提示的错误。
    ///
    /// # 错误
    /// - [`CanError::Device`]: 接口不存在或无法打开
    /// - [`CanError::Io`]: 系统调用失败（如权限不足）
    pub fn new(interface: impl Into<String>) -> Result<Self, CanError> {
        let interface = interface.into();

        if !Path::new(&format!("/sys/class/net/{interface}")).exists() {
            return Err(CanError::Device(format!(
                "CAN interface '{interface}' does not exist. Check wiring and run:\n  \
                 sudo ip link set up {interface} type can bitrate 1000000"
            )));
        }

        let socket = CanSocket::open(&interface)
            .map_err(|e| CanError::Device(format!("failed to open '{interface}': {e}")))?;

        // 接收错误帧，用于检测总线级故障
        if let Err(e) = socket.set_error_filter_accept_all() {
            warn!("Could not enable CAN error frame reception: {}", e);
        }

        trace!("SocketCAN adapter opened on '{}'", interface);

        Ok(Self { socket, interface })
    }

    /// 接口名称
    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl CanAdapter for SocketCanAdapter {
    fn send(&mut self, frame: BusFrame) -> Result<(), CanError> {
        let id = StandardId::new(frame.id)
            .ok_or_else(|| CanError::Device(format!("invalid standard CAN id {:#x}", frame.id)))?;
        let can_frame = CanFrame::new(id, frame.payload())
            .ok_or_else(|| CanError::Device("invalid CAN frame payload".to_string()))?;

        self.socket.write_frame(&can_frame).map_err(CanError::from)
    }

    fn receive(&mut self) -> Result<BusFrame, CanError> {
        loop {
            let frame = match self.socket.read_frame() {
                Ok(frame) => frame,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(CanError::Timeout);
                }
                Err(e) => return Err(CanError::Io(e)),
            };

            match frame {
                CanFrame::Data(data) => {
                    return Ok(BusFrame::new((data.raw_id() & 0x7FF) as u16, data.data()));
                }
                // 远程帧在本协议中没有用途
                CanFrame::Remote(_) => continue,
                CanFrame::Error(err) => {
                    let err = err.into_error();
                    return Err(CanError::BusFault(err.to_string()));
                }
            }
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        if let Err(e) = self.socket.set_read_timeout(timeout) {
            warn!("Failed to set CAN read timeout on '{}': {}", self.interface, e);
        }
    }
}
