//! # Bison CANopen 协议层
//!
//! CANopen（CiA 301）报文编解码的最小实现，覆盖本项目用到的子集：
//! - NMT 命令与心跳（boot-up）报文
//! - 加速（expedited）SDO 传输，双向（客户端与服务端，后者供测试桩使用）
//! - TPDO 映射解码，映射关系来自预编译的主站描述文件
//!
//! 分段 SDO 传输、MPDO、SYNC/TIME 等不在本项目的对象字典需求内，未实现。

use thiserror::Error;

pub mod description;
pub mod nmt;
pub mod pdo;
pub mod sdo;

pub use description::{MasterDescription, NodeDescription, PdoDescription, PdoEntry};
pub use nmt::{NmtCommand, NmtState};
pub use pdo::{decode_tpdo, PdoValue};
pub use sdo::{ObjectId, SdoResponse, SdoServerRequest, SdoValue};

/// COB-ID 功能码基址
pub mod cob {
    /// NMT 命令（主站广播）
    pub const NMT: u16 = 0x000;
    /// SDO 服务端→客户端（响应）
    pub const SDO_TX: u16 = 0x580;
    /// SDO 客户端→服务端（请求）
    pub const SDO_RX: u16 = 0x600;
    /// 心跳 / boot-up
    pub const HEARTBEAT: u16 = 0x700;
}

/// 协议层错误
#[derive(Error, Debug)]
pub enum CanopenError {
    /// 报文不符合协议（长度、命令字等）
    #[error("Malformed CANopen frame: {0}")]
    Codec(String),
    #[error("Failed to read master description: {0}")]
    DescriptionIo(#[from] std::io::Error),
    #[error("Failed to parse master description: {0}")]
    DescriptionParse(#[from] toml::de::Error),
    /// 描述文件内容不自洽（PDO 映射超长、节点重复等）
    #[error("Invalid master description: {0}")]
    InvalidDescription(String),
}
