//! NMT（网络管理）命令与心跳报文

use crate::cob;
use bison_can::BusFrame;

/// NMT 命令字
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NmtCommand {
    Start = 0x01,
    Stop = 0x02,
    EnterPreOperational = 0x80,
    ResetNode = 0x81,
    ResetCommunication = 0x82,
}

impl NmtCommand {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Start),
            0x02 => Some(Self::Stop),
            0x80 => Some(Self::EnterPreOperational),
            0x81 => Some(Self::ResetNode),
            0x82 => Some(Self::ResetCommunication),
            _ => None,
        }
    }
}

/// 心跳报文携带的 NMT 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmtState {
    /// boot-up 报文（状态字节 0x00），节点完成初始化
    BootUp,
    Stopped,
    Operational,
    PreOperational,
    Unknown(u8),
}

impl NmtState {
    pub fn from_byte(byte: u8) -> Self {
        // 最高位是心跳 toggle 位，按协议忽略
        match byte & 0x7F {
            0x00 => Self::BootUp,
            0x04 => Self::Stopped,
            0x05 => Self::Operational,
            0x7F => Self::PreOperational,
            other => Self::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::BootUp => 0x00,
            Self::Stopped => 0x04,
            Self::Operational => 0x05,
            Self::PreOperational => 0x7F,
            Self::Unknown(other) => other,
        }
    }
}

/// 编码一条 NMT 命令（`node = 0` 为广播）
pub fn command(cmd: NmtCommand, node: u8) -> BusFrame {
    BusFrame::new(cob::NMT, &[cmd as u8, node])
}

/// 解析 NMT 命令帧（测试桩的从站侧使用）
pub fn parse_command(frame: &BusFrame) -> Option<(NmtCommand, u8)> {
    if frame.id != cob::NMT || frame.dlc < 2 {
        return None;
    }
    Some((NmtCommand::from_byte(frame.data[0])?, frame.data[1]))
}

/// 编码一条心跳报文（从站侧）
pub fn heartbeat(node: u8, state: NmtState) -> BusFrame {
    BusFrame::new(cob::HEARTBEAT + node as u16, &[state.to_byte()])
}

/// 解析心跳 / boot-up 报文，返回 (节点号, 状态)
pub fn parse_heartbeat(frame: &BusFrame) -> Option<(u8, NmtState)> {
    let node = frame.id.checked_sub(cob::HEARTBEAT)?;
    if node == 0 || node > 127 || frame.dlc < 1 {
        return None;
    }
    Some((node as u8, NmtState::from_byte(frame.data[0])))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// NMT 复位命令编码
    #[test]
    fn test_nmt_reset_node_encode() {
        let frame = command(NmtCommand::ResetNode, 1);
        assert_eq!(frame.id, 0x000);
        assert_eq!(frame.payload(), &[0x81, 1]);

        let (cmd, node) = parse_command(&frame).unwrap();
        assert_eq!(cmd, NmtCommand::ResetNode);
        assert_eq!(node, 1);
    }

    /// boot-up 报文解析
    #[test]
    fn test_bootup_heartbeat() {
        let frame = heartbeat(2, NmtState::BootUp);
        assert_eq!(frame.id, 0x702);
        let (node, state) = parse_heartbeat(&frame).unwrap();
        assert_eq!(node, 2);
        assert_eq!(state, NmtState::BootUp);
    }

    /// toggle 位不影响状态解析
    #[test]
    fn test_heartbeat_toggle_bit_ignored() {
        let frame = BusFrame::new(0x701, &[0x85]);
        let (_, state) = parse_heartbeat(&frame).unwrap();
        assert_eq!(state, NmtState::Operational);
    }

    /// 非心跳帧不被误判
    #[test]
    fn test_parse_heartbeat_rejects_other_frames() {
        assert!(parse_heartbeat(&BusFrame::new(0x581, &[0x00])).is_none());
        assert!(parse_heartbeat(&BusFrame::new(0x700, &[0x00])).is_none());
    }
}
