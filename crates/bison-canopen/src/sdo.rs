//! 加速（expedited）SDO 传输编解码
//!
//! 本项目对象字典里的条目都不超过 4 字节，因此只实现加速传输：
//! 一问一答，各一帧。客户端侧（主站）与服务端侧（测试桩从站）都在这里。
//!
//! 命令字节布局（CiA 301 §7.2.4）：
//! - 下载请求：`0x23/0x27/0x2B/0x2F`（ccs=1, e=1, s=1, n=4-len）
//! - 下载响应：`0x60`
//! - 上传请求：`0x40`
//! - 上传响应：`0x43/0x47/0x4B/0x4F`（scs=2, e=1, s=1, n=4-len）
//! - 中止：`0x80` + 4 字节中止码

use crate::cob;
use bison_can::BusFrame;

/// 对象字典地址（索引 + 子索引）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub index: u16,
    pub sub: u8,
}

impl ObjectId {
    pub const fn new(index: u16, sub: u8) -> Self {
        Self { index, sub }
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04X}:{:02X}", self.index, self.sub)
    }
}

/// 可经由加速 SDO 传输的标量类型
pub trait SdoValue: Copy {
    /// 编码后的字节数（1、2 或 4）
    const SIZE: usize;
    fn encode(self) -> [u8; 4];
    fn decode(data: &[u8; 4]) -> Self;
}

macro_rules! impl_sdo_value {
    ($ty:ty, $size:expr) => {
        impl SdoValue for $ty {
            const SIZE: usize = $size;
            fn encode(self) -> [u8; 4] {
                let mut buf = [0u8; 4];
                buf[..$size].copy_from_slice(&self.to_le_bytes());
                buf
            }
            fn decode(data: &[u8; 4]) -> Self {
                let mut bytes = [0u8; $size];
                bytes.copy_from_slice(&data[..$size]);
                Self::from_le_bytes(bytes)
            }
        }
    };
}

impl_sdo_value!(u8, 1);
impl_sdo_value!(i8, 1);
impl_sdo_value!(u16, 2);
impl_sdo_value!(i16, 2);
impl_sdo_value!(u32, 4);
impl_sdo_value!(i32, 4);

fn put_object_id(buf: &mut [u8; 8], id: ObjectId) {
    buf[1..3].copy_from_slice(&id.index.to_le_bytes());
    buf[3] = id.sub;
}

fn get_object_id(data: &[u8; 8]) -> ObjectId {
    ObjectId::new(u16::from_le_bytes([data[1], data[2]]), data[3])
}

/// 上传（读）请求
pub fn upload_request(node: u8, id: ObjectId) -> BusFrame {
    let mut buf = [0u8; 8];
    buf[0] = 0x40;
    put_object_id(&mut buf, id);
    BusFrame::new(cob::SDO_RX + node as u16, &buf)
}

/// 下载（写）请求，`len` ∈ {1, 2, 4}
pub fn download_request(node: u8, id: ObjectId, data: [u8; 4], len: usize) -> BusFrame {
    debug_assert!(matches!(len, 1 | 2 | 4));
    let mut buf = [0u8; 8];
    buf[0] = 0x23 | (((4 - len) as u8) << 2);
    put_object_id(&mut buf, id);
    buf[4..8].copy_from_slice(&data);
    BusFrame::new(cob::SDO_RX + node as u16, &buf)
}

/// 客户端中止（主站取消超时的操作时发出）
pub fn abort_request(node: u8, id: ObjectId, code: u32) -> BusFrame {
    let mut buf = [0u8; 8];
    buf[0] = 0x80;
    put_object_id(&mut buf, id);
    buf[4..8].copy_from_slice(&code.to_le_bytes());
    BusFrame::new(cob::SDO_RX + node as u16, &buf)
}

/// SDO 服务端响应（主站视角的接收方向）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoResponse {
    /// 上传成功，数据已按小端填入
    UploadOk {
        id: ObjectId,
        data: [u8; 4],
        len: usize,
    },
    /// 下载确认
    DownloadOk { id: ObjectId },
    /// 服务端中止
    Abort { id: ObjectId, code: u32 },
}

/// 解析 `0x580 + node` 帧，返回 (节点号, 响应)
pub fn parse_response(frame: &BusFrame) -> Option<(u8, SdoResponse)> {
    let node = frame.id.checked_sub(cob::SDO_TX)?;
    if node == 0 || node > 127 || frame.dlc < 8 {
        return None;
    }
    let node = node as u8;
    let id = get_object_id(&frame.data);

    let response = match frame.data[0] {
        0x60 => SdoResponse::DownloadOk { id },
        0x80 => SdoResponse::Abort {
            id,
            code: u32::from_le_bytes([frame.data[4], frame.data[5], frame.data[6], frame.data[7]]),
        },
        cmd if cmd & 0xE3 == 0x43 => {
            let len = 4 - ((cmd >> 2) & 0x03) as usize;
            let mut data = [0u8; 4];
            data.copy_from_slice(&frame.data[4..8]);
            SdoResponse::UploadOk { id, data, len }
        }
        _ => return None,
    };
    Some((node, response))
}

/// SDO 客户端请求（从站/测试桩视角的接收方向）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoServerRequest {
    Upload(ObjectId),
    Download {
        id: ObjectId,
        data: [u8; 4],
        len: usize,
    },
    Abort { id: ObjectId, code: u32 },
}

/// 解析 `0x600 + node` 帧，返回 (节点号, 请求)
pub fn parse_request(frame: &BusFrame) -> Option<(u8, SdoServerRequest)> {
    let node = frame.id.checked_sub(cob::SDO_RX)?;
    if node == 0 || node > 127 || frame.dlc < 8 {
        return None;
    }
    let node = node as u8;
    let id = get_object_id(&frame.data);

    let request = match frame.data[0] {
        0x40 => SdoServerRequest::Upload(id),
        0x80 => SdoServerRequest::Abort {
            id,
            code: u32::from_le_bytes([frame.data[4], frame.data[5], frame.data[6], frame.data[7]]),
        },
        cmd if cmd & 0xE3 == 0x23 => {
            let len = 4 - ((cmd >> 2) & 0x03) as usize;
            let mut data = [0u8; 4];
            data.copy_from_slice(&frame.data[4..8]);
            SdoServerRequest::Download { id, data, len }
        }
        _ => return None,
    };
    Some((node, request))
}

/// 上传响应（从站侧）
pub fn upload_response(node: u8, id: ObjectId, data: [u8; 4], len: usize) -> BusFrame {
    debug_assert!(matches!(len, 1 | 2 | 4));
    let mut buf = [0u8; 8];
    buf[0] = 0x43 | (((4 - len) as u8) << 2);
    put_object_id(&mut buf, id);
    buf[4..8].copy_from_slice(&data);
    BusFrame::new(cob::SDO_TX + node as u16, &buf)
}

/// 下载确认（从站侧）
pub fn download_response(node: u8, id: ObjectId) -> BusFrame {
    let mut buf = [0u8; 8];
    buf[0] = 0x60;
    put_object_id(&mut buf, id);
    BusFrame::new(cob::SDO_TX + node as u16, &buf)
}

/// 服务端中止（从站侧）
pub fn abort_response(node: u8, id: ObjectId, code: u32) -> BusFrame {
    let mut buf = [0u8; 8];
    buf[0] = 0x80;
    put_object_id(&mut buf, id);
    buf[4..8].copy_from_slice(&code.to_le_bytes());
    BusFrame::new(cob::SDO_TX + node as u16, &buf)
}

/// SDO 超时中止码（客户端取消时发出的码）
pub const ABORT_TIMED_OUT: u32 = 0x0504_0000;

/// 把中止码翻译成人类可读的描述
///
/// 未知的码原样以十六进制给出，诊断信息不丢失。
pub fn abort_code_description(code: u32) -> String {
    let known = match code {
        0x0503_0000 => "toggle bit not alternated",
        0x0504_0000 => "SDO protocol timed out",
        0x0504_0001 => "invalid command specifier",
        0x0601_0000 => "unsupported access to object",
        0x0601_0001 => "attempt to read a write-only object",
        0x0601_0002 => "attempt to write a read-only object",
        0x0602_0000 => "object does not exist in the object dictionary",
        0x0604_0041 => "object cannot be mapped to the PDO",
        0x0607_0010 => "data type does not match",
        0x0609_0011 => "sub-index does not exist",
        0x0609_0030 => "value range of parameter exceeded",
        0x0800_0000 => "general error",
        0x0800_0020 => "data cannot be transferred or stored",
        0x0800_0022 => "data cannot be transferred because of the present device state",
        _ => return format!("abort code {code:#010X}"),
    };
    format!("{known} ({code:#010X})")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 下载请求编码：i32 全长（0x23）
    #[test]
    fn test_download_request_i32() {
        let value: i32 = -250;
        let frame = download_request(1, ObjectId::new(0x2000, 1), value.encode(), i32::SIZE);
        assert_eq!(frame.id, 0x601);
        assert_eq!(frame.data[0], 0x23);
        assert_eq!(&frame.data[1..4], &[0x00, 0x20, 0x01]);
        assert_eq!(
            i32::from_le_bytes([frame.data[4], frame.data[5], frame.data[6], frame.data[7]]),
            -250
        );
    }

    /// 下载请求编码：u8 的 n 位（0x2F）
    #[test]
    fn test_download_request_u8_command_byte() {
        let frame = download_request(2, ObjectId::new(0x2018, 0), 2u8.encode(), u8::SIZE);
        assert_eq!(frame.data[0], 0x2F);
    }

    /// 上传往返：请求 → 从站解析 → 响应 → 主站解析
    #[test]
    fn test_upload_roundtrip() {
        let id = ObjectId::new(0x210D, 2);
        let request = upload_request(1, id);
        let (node, parsed) = parse_request(&request).unwrap();
        assert_eq!(node, 1);
        assert_eq!(parsed, SdoServerRequest::Upload(id));

        let voltage: u16 = 360; // 36.0 V
        let response = upload_response(1, id, voltage.encode(), u16::SIZE);
        let (node, parsed) = parse_response(&response).unwrap();
        assert_eq!(node, 1);
        match parsed {
            SdoResponse::UploadOk { id: got, data, len } => {
                assert_eq!(got, id);
                assert_eq!(len, 2);
                assert_eq!(u16::decode(&data), 360);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    /// 中止帧携带中止码
    #[test]
    fn test_abort_response_roundtrip() {
        let id = ObjectId::new(0x1000, 0);
        let frame = abort_response(1, id, ABORT_TIMED_OUT);
        let (_, parsed) = parse_response(&frame).unwrap();
        assert_eq!(
            parsed,
            SdoResponse::Abort {
                id,
                code: ABORT_TIMED_OUT
            }
        );
        assert!(abort_code_description(ABORT_TIMED_OUT).contains("timed out"));
    }

    /// 负数的窄类型编解码保持符号
    #[test]
    fn test_sdo_value_sign_preserved() {
        let value: i16 = -123;
        assert_eq!(i16::decode(&value.encode()), -123);
        let value: i8 = -40;
        assert_eq!(i8::decode(&value.encode()), -40);
    }
}
