//! 驱动层错误类型定义

use bison_can::CanError;
use bison_canopen::sdo::abort_code_description;
use bison_canopen::{CanopenError, ObjectId};
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum RoboteqError {
    /// CAN 传输层错误
    #[error("CAN adapter error: {0}")]
    Can(#[from] CanError),

    /// CANopen 协议/描述文件错误
    #[error("CANopen protocol error: {0}")]
    Canopen(#[from] CanopenError),

    /// 事件循环线程未能在初始化超时内就绪
    #[error("CAN transport initialization failed: {0}")]
    TransportInit(String),

    /// 事件循环已退出（提交通道关闭或已满）
    #[error("CAN transport is down")]
    BusDown,

    /// 传输层尚未初始化（或已反初始化）
    #[error("CANopen controller is not initialized")]
    NotInitialized,

    /// SDO 操作在 `sdo_operation_timeout + 750µs` 内未完成
    #[error("SDO operation on object {id} of node {node} timed out")]
    SdoTimeout { node: u8, id: ObjectId },

    /// 从站以中止码拒绝了 SDO 操作
    #[error("SDO operation on object {id} of node {node} aborted: {}", abort_code_description(*.code))]
    SdoAbort { node: u8, id: ObjectId, code: u32 },

    /// 从站引导失败，诊断信息原样保留
    #[error("Boot of node {node} failed: {reason}")]
    Boot { node: u8, reason: String },

    /// 总线级故障（错误帧 / bus-off），读写周期必须立即中断
    #[error("CAN error detected on the {name} driver")]
    CanNetwork { name: String },

    /// 带上下文的包装，对应调用链上逐层补充的诊断信息
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<RoboteqError>,
    },
}

impl RoboteqError {
    /// 给错误补充一层上下文
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// `Result` 扩展：`err.context(...)` 的链式写法
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, RoboteqError>;
}

impl<T> ResultExt<T> for Result<T, RoboteqError> {
    fn context(self, context: impl Into<String>) -> Result<T, RoboteqError> {
        self.map_err(|e| e.context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 上下文包装保留底层错误信息
    #[test]
    fn test_context_chain_display() {
        let err = RoboteqError::SdoTimeout {
            node: 1,
            id: ObjectId::new(0x2000, 1),
        }
        .context("Front driver send Roboteq cmd failed");

        let msg = format!("{err}");
        assert!(msg.contains("Front driver send Roboteq cmd failed"));

        let source = std::error::Error::source(&err).unwrap();
        assert!(format!("{source}").contains("2000:01"));
    }

    /// 中止码被翻译成可读文本
    #[test]
    fn test_abort_display() {
        let err = RoboteqError::SdoAbort {
            node: 2,
            id: ObjectId::new(0x1000, 0),
            code: 0x0504_0000,
        };
        assert!(format!("{err}").contains("timed out"));
    }
}
