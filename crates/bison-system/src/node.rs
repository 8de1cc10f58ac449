//! 遥测节点
//!
//! 发布/订阅传输层本体在仓库之外；这里只维护接缝：实时读周期把
//! [`DriverStateMsg`] 快照丢进一个容量为 1 的通道（满了就丢，等价
//! 于实时发布器的 trylock 语义），一个 best-effort 执行线程把快照
//! 交给注册的发布回调。`clear_errors` 服务的处理入口也在这里：置
//! 滤波器清错标志后立即返回。

use arc_swap::ArcSwap;
use bison_roboteq::{ErrorCategory, FaultFlag, RoboteqData, RoboteqErrorFilter, RuntimeError, ScriptFlag};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// 单侧驱动器的遥测字段
#[derive(Debug, Clone, Default)]
pub struct DriverSideState {
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
    pub fault_flag: FaultFlag,
    pub script_flag: ScriptFlag,
    pub left_motor_runtime_error: RuntimeError,
    pub right_motor_runtime_error: RuntimeError,
    pub data_timed_out: bool,
    pub can_net_err: bool,
}

impl DriverSideState {
    fn from_data(data: &RoboteqData) -> Self {
        Self {
            voltage: data.driver_state.voltage,
            current: data.driver_state.current,
            temperature: data.driver_state.temperature,
            fault_flag: data.fault,
            script_flag: data.script,
            left_motor_runtime_error: data.left_runtime,
            right_motor_runtime_error: data.right_runtime,
            data_timed_out: data.data_too_old,
            can_net_err: data.can_error,
        }
    }
}

/// 遥测话题的消息体
#[derive(Debug, Clone, Default)]
pub struct DriverStateMsg {
    pub front: DriverSideState,
    pub rear: DriverSideState,
    /// 滤波器聚合裁决
    pub error: bool,
    pub write_sdo_error: bool,
    pub read_sdo_error: bool,
    pub read_pdo_error: bool,
}

impl DriverStateMsg {
    /// 由两侧聚合数据与滤波器裁决拼装
    pub fn build(
        front: &RoboteqData,
        rear: &RoboteqData,
        error_filter: &RoboteqErrorFilter,
    ) -> Self {
        Self {
            front: DriverSideState::from_data(front),
            rear: DriverSideState::from_data(rear),
            error: error_filter.is_any_error(),
            write_sdo_error: error_filter.is_error(ErrorCategory::WriteSdo),
            read_sdo_error: error_filter.is_error(ErrorCategory::ReadSdo),
            read_pdo_error: error_filter.is_error(ErrorCategory::ReadPdo),
        }
    }
}

/// 外部传输层注册的发布回调
pub type DriverStatePublisher = Box<dyn Fn(&DriverStateMsg) + Send + Sync>;

/// 系统侧节点：快照转发线程 + 清错服务入口
pub struct SystemNode {
    snapshot: Arc<ArcSwap<DriverStateMsg>>,
    tx: Sender<DriverStateMsg>,
    publisher: Arc<Mutex<Option<DriverStatePublisher>>>,
    clear_errors: Arc<dyn Fn() + Send + Sync>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SystemNode {
    pub fn new(clear_errors: impl Fn() + Send + Sync + 'static) -> Self {
        // 容量 1：实时侧从不阻塞，慢消费者只看到最新快照
        let (tx, rx) = bounded(1);
        let snapshot = Arc::new(ArcSwap::from_pointee(DriverStateMsg::default()));
        let publisher: Arc<Mutex<Option<DriverStatePublisher>>> = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));

        let thread = spawn_executor(rx, snapshot.clone(), publisher.clone(), running.clone());

        Self {
            snapshot,
            tx,
            publisher,
            clear_errors: Arc::new(clear_errors),
            running,
            thread: Some(thread),
        }
    }

    /// 注册发布回调（外部传输层在激活时调用）
    pub fn set_publisher(&self, publisher: DriverStatePublisher) {
        *self.publisher.lock() = Some(publisher);
    }

    /// 实时路径的发布入口：从不阻塞，队列满时丢弃本拍快照
    pub fn publish_driver_state(&self, msg: DriverStateMsg) {
        match self.tx.try_send(msg) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                warn!("System node executor is gone, driver state dropped")
            }
        }
    }

    /// 最近一次发布的快照（拉取式消费者用）
    pub fn latest(&self) -> Arc<DriverStateMsg> {
        self.snapshot.load_full()
    }

    /// `clear_errors` 服务处理入口：置清错标志，立即返回
    pub fn handle_clear_errors(&self) -> (bool, String) {
        info!("Clearing errors");
        (self.clear_errors)();
        (true, "Errors cleared".to_string())
    }

    /// 停止执行线程（幂等）
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SystemNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_executor(
    rx: Receiver<DriverStateMsg>,
    snapshot: Arc<ArcSwap<DriverStateMsg>>,
    publisher: Arc<Mutex<Option<DriverStatePublisher>>>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while running.load(Ordering::Acquire) {
            let Ok(msg) = rx.recv_timeout(Duration::from_millis(100)) else {
                continue;
            };
            let msg = Arc::new(msg);
            snapshot.store(msg.clone());
            if let Some(publisher) = publisher.lock().as_ref() {
                publisher(&msg);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread::sleep;

    /// 快照经执行线程转发到注册的发布回调
    #[test]
    fn test_publish_reaches_registered_publisher() {
        let node = SystemNode::new(|| {});
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = seen.clone();
        node.set_publisher(Box::new(move |msg| {
            assert!(msg.front.voltage > 0.0);
            seen_cb.fetch_add(1, Ordering::SeqCst);
        }));

        let mut msg = DriverStateMsg::default();
        msg.front.voltage = 36.0;
        node.publish_driver_state(msg);

        sleep(Duration::from_millis(200));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(node.latest().front.voltage > 35.0);
    }

    /// 清错服务立即返回成功并调用注入的动作
    #[test]
    fn test_clear_errors_handler() {
        let cleared = Arc::new(AtomicBool::new(false));
        let cleared_cb = cleared.clone();
        let node = SystemNode::new(move || cleared_cb.store(true, Ordering::SeqCst));

        let (success, message) = node.handle_clear_errors();
        assert!(success);
        assert_eq!(message, "Errors cleared");
        assert!(cleared.load(Ordering::SeqCst));
    }

    /// 队列满时实时侧不阻塞
    #[test]
    fn test_publish_never_blocks() {
        let mut node = SystemNode::new(|| {});
        node.shutdown();
        for _ in 0..10 {
            node.publish_driver_state(DriverStateMsg::default());
        }
    }
}
