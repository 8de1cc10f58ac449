//! 主站描述文件
//!
//! 总线拓扑与 PDO 映射由车型配置仓库中的工具预编译成一份 TOML 工件，
//! 随固件一起部署。这是核心在初始化时读取的唯一文件：节点号、厂商号
//! 校验值和每条 TPDO 的对象布局都来自这里，代码本身不写死映射。
//!
//! 示例（两驱动器底盘）：
//!
//! ```toml
//! [bus]
//! interface = "panther_can"
//! bitrate = 1000000
//!
//! [[node]]
//! id = 1
//! name = "front"
//! vendor_id = 0x272
//!
//! [[node.tpdo]]
//! cob_base = 0x180
//! entry = [
//!     { index = 0x2106, sub = 1, size = 4 },
//!     { index = 0x2106, sub = 2, size = 4 },
//! ]
//! ```

use crate::CanopenError;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// 预编译的主站描述
#[derive(Debug, Clone, Deserialize)]
pub struct MasterDescription {
    pub bus: BusDescription,
    #[serde(rename = "node", default)]
    pub nodes: Vec<NodeDescription>,
}

/// 总线参数
#[derive(Debug, Clone, Deserialize)]
pub struct BusDescription {
    /// SocketCAN 接口名
    pub interface: String,
    /// 位速率（bit/s），仅作记录；实际由系统工具配置
    pub bitrate: u32,
}

/// 一个从站节点
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDescription {
    pub id: u8,
    pub name: String,
    /// boot 期间与对象 `1018:1` 比对；缺省则跳过校验
    pub vendor_id: Option<u32>,
    #[serde(default)]
    pub tpdo: Vec<PdoDescription>,
}

/// 一条从站→主站 PDO 的映射
#[derive(Debug, Clone, Deserialize)]
pub struct PdoDescription {
    /// COB-ID 基址（实际 COB = 基址 + 节点号）
    pub cob_base: u16,
    #[serde(default)]
    pub entry: Vec<PdoEntry>,
}

/// PDO 内一个对象字典条目
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PdoEntry {
    pub index: u16,
    pub sub: u8,
    /// 字节数（1、2 或 4）
    pub size: u8,
}

impl MasterDescription {
    /// 从文件加载并校验
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CanopenError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// 从 TOML 文本加载并校验
    pub fn from_toml(content: &str) -> Result<Self, CanopenError> {
        let description: Self = toml::from_str(content)?;
        description.validate()?;
        Ok(description)
    }

    /// 按节点号查找
    pub fn node(&self, id: u8) -> Option<&NodeDescription> {
        self.nodes.iter().find(|node| node.id == id)
    }

    fn validate(&self) -> Result<(), CanopenError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id == 0 || node.id > 127 {
                return Err(CanopenError::InvalidDescription(format!(
                    "node id {} out of range 1..=127",
                    node.id
                )));
            }
            if !seen.insert(node.id) {
                return Err(CanopenError::InvalidDescription(format!(
                    "duplicate node id {}",
                    node.id
                )));
            }
            for pdo in &node.tpdo {
                let bytes: usize = pdo.entry.iter().map(|e| e.size as usize).sum();
                if bytes > 8 {
                    return Err(CanopenError::InvalidDescription(format!(
                        "TPDO {:#05X} of node {} maps {} bytes (max 8)",
                        pdo.cob_base, node.id, bytes
                    )));
                }
                if pdo.entry.iter().any(|e| !matches!(e.size, 1 | 2 | 4)) {
                    return Err(CanopenError::InvalidDescription(format!(
                        "TPDO {:#05X} of node {} has an entry with unsupported size",
                        pdo.cob_base, node.id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [bus]
        interface = "panther_can"
        bitrate = 1000000

        [[node]]
        id = 1
        name = "front"
        vendor_id = 0x272

        [[node.tpdo]]
        cob_base = 0x180
        entry = [
            { index = 0x2106, sub = 1, size = 4 },
            { index = 0x2106, sub = 2, size = 4 },
        ]

        [[node]]
        id = 2
        name = "rear"
    "#;

    #[test]
    fn test_parse_sample() {
        let description = MasterDescription::from_toml(SAMPLE).unwrap();
        assert_eq!(description.bus.interface, "panther_can");
        assert_eq!(description.nodes.len(), 2);

        let front = description.node(1).unwrap();
        assert_eq!(front.name, "front");
        assert_eq!(front.vendor_id, Some(0x272));
        assert_eq!(front.tpdo[0].entry.len(), 2);

        assert!(description.node(7).is_none());
    }

    /// 重复节点号被拒绝
    #[test]
    fn test_duplicate_node_rejected() {
        let bad = r#"
            [bus]
            interface = "can0"
            bitrate = 1000000

            [[node]]
            id = 1
            name = "a"

            [[node]]
            id = 1
            name = "b"
        "#;
        assert!(matches!(
            MasterDescription::from_toml(bad),
            Err(CanopenError::InvalidDescription(_))
        ));
    }

    /// 超过 8 字节的映射被拒绝
    #[test]
    fn test_oversized_pdo_rejected() {
        let bad = r#"
            [bus]
            interface = "can0"
            bitrate = 1000000

            [[node]]
            id = 1
            name = "a"

            [[node.tpdo]]
            cob_base = 0x180
            entry = [
                { index = 0x2106, sub = 1, size = 4 },
                { index = 0x2106, sub = 2, size = 4 },
                { index = 0x2106, sub = 3, size = 4 },
            ]
        "#;
        assert!(MasterDescription::from_toml(bad).is_err());
    }
}
