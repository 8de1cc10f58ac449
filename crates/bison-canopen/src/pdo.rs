//! TPDO 解码
//!
//! 事件循环收到从站 PDO 帧后，按主站描述文件给出的映射把数据段切成
//! 对象字典条目。值以零扩展的 `u32` 原样保存，符号扩展由知道对象类型
//! 的上层（Roboteq 驱动层）完成。

use crate::description::NodeDescription;
use crate::sdo::ObjectId;
use bison_can::BusFrame;

/// 一次 PDO 更新中的一个对象值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdoValue {
    pub id: ObjectId,
    /// 小端读出、零扩展的原始值
    pub raw: u32,
    /// 原始字节数
    pub size: u8,
}

impl PdoValue {
    /// 按 i32 解释（4 字节条目）
    pub fn as_i32(&self) -> i32 {
        self.raw as i32
    }

    /// 按 i16 解释（2 字节条目，符号扩展）
    pub fn as_i16(&self) -> i16 {
        self.raw as u16 as i16
    }

    /// 按 u16 解释
    pub fn as_u16(&self) -> u16 {
        self.raw as u16
    }
}

/// 尝试把一帧按 `node` 的 TPDO 映射解码
///
/// 帧不属于该节点的任何 TPDO 时返回 `None`；数据段短于映射长度的帧
/// 视为坏帧，同样返回 `None`（调用方计入 PDO 错误统计）。
pub fn decode_tpdo(node: &NodeDescription, frame: &BusFrame) -> Option<Vec<PdoValue>> {
    let pdo = node
        .tpdo
        .iter()
        .find(|pdo| pdo.cob_base + node.id as u16 == frame.id)?;

    let mapped_len: usize = pdo.entry.iter().map(|e| e.size as usize).sum();
    if (frame.dlc as usize) < mapped_len {
        return None;
    }

    let mut values = Vec::with_capacity(pdo.entry.len());
    let mut offset = 0usize;
    for entry in &pdo.entry {
        let size = entry.size as usize;
        let mut raw = [0u8; 4];
        raw[..size].copy_from_slice(&frame.data[offset..offset + size]);
        values.push(PdoValue {
            id: ObjectId::new(entry.index, entry.sub),
            raw: u32::from_le_bytes(raw),
            size: entry.size,
        });
        offset += size;
    }
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::MasterDescription;

    fn sample_node() -> NodeDescription {
        let description = MasterDescription::from_toml(
            r#"
            [bus]
            interface = "can0"
            bitrate = 1000000

            [[node]]
            id = 1
            name = "front"

            [[node.tpdo]]
            cob_base = 0x380
            entry = [
                { index = 0x2106, sub = 5, size = 2 },
                { index = 0x2106, sub = 6, size = 2 },
                { index = 0x2106, sub = 7, size = 2 },
                { index = 0x2106, sub = 8, size = 2 },
            ]
        "#,
        )
        .unwrap();
        description.node(1).unwrap().clone()
    }

    /// 按映射切分数据段，窄类型符号扩展正确
    #[test]
    fn test_decode_mixed_entries() {
        let node = sample_node();
        let current: i16 = -85; // -8.5 A
        let mut data = Vec::new();
        data.extend_from_slice(&current.to_le_bytes());
        data.extend_from_slice(&10i16.to_le_bytes());
        data.extend_from_slice(&0x0102u16.to_le_bytes());
        data.extend_from_slice(&0x0304u16.to_le_bytes());

        let frame = BusFrame::new(0x381, &data);
        let values = decode_tpdo(&node, &frame).unwrap();

        assert_eq!(values.len(), 4);
        assert_eq!(values[0].id, ObjectId::new(0x2106, 5));
        assert_eq!(values[0].as_i16(), -85);
        assert_eq!(values[1].as_i16(), 10);
        assert_eq!(values[2].as_u16(), 0x0102);
        assert_eq!(values[3].as_u16(), 0x0304);
    }

    /// 帧 ID 不属于该节点时不解码
    #[test]
    fn test_wrong_cob_ignored() {
        let node = sample_node();
        let frame = BusFrame::new(0x382, &[0u8; 8]);
        assert!(decode_tpdo(&node, &frame).is_none());
    }

    /// 短帧视为坏帧
    #[test]
    fn test_short_frame_rejected() {
        let node = sample_node();
        let frame = BusFrame::new(0x381, &[0u8; 4]);
        assert!(decode_tpdo(&node, &frame).is_none());
    }
}
