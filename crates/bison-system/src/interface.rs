//! 实时控制框架的接缝
//!
//! 框架本体不在本仓库。这里只定义它调用硬件层时可见的最小面：
//! 生命周期回调、周期性的 `read`/`write` 与各转换的返回码。

use std::collections::HashMap;
use std::time::Duration;

/// 生命周期转换的返回码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Success,
    /// 本次转换失败，可重试（留在原状态）
    Failure,
    /// 不可恢复，框架执行错误转换
    Error,
}

/// 框架在 `on_init` 时交给硬件层的描述
#[derive(Debug, Clone, Default)]
pub struct HardwareInfo {
    pub name: String,
    /// 关节名，顺序由上游 URDF 决定，硬件层自行规约
    pub joints: Vec<String>,
    /// 字符串形式的硬件参数表
    pub parameters: HashMap<String, String>,
}

/// 框架可见的硬件系统接口
pub trait HardwareInterface {
    fn on_init(&mut self, info: &HardwareInfo) -> CallbackResult;
    fn on_configure(&mut self) -> CallbackResult;
    fn on_activate(&mut self) -> CallbackResult;
    fn on_deactivate(&mut self) -> CallbackResult;
    fn on_cleanup(&mut self) -> CallbackResult;
    fn on_shutdown(&mut self) -> CallbackResult;
    fn on_error(&mut self) -> CallbackResult;

    /// 实时读周期：刷新关节状态反馈
    fn read(&mut self, period: Duration) -> CallbackResult;
    /// 实时写周期：下发关节速度指令
    fn write(&mut self, period: Duration) -> CallbackResult;
}
