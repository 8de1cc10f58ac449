//! CAN 传输层：实时事件循环
//!
//! 一个专用线程独占整条总线：套接字、主站描述、PDO 镜像、在途 SDO 表
//! 都在线程内构造（[`BusGraph`]），也在线程内销毁。上层通过
//! [`BusClient`] 提交工作，通过 [`NodeShared`] 里的原子量与 ArcSwap
//! 快照读取状态，自己从不碰总线。
//!
//! 线程尝试以 SCHED_FIFO 优先级 50 运行；没有实时内核时降级继续，
//! 只打一条警告。

use crate::error::RoboteqError;
use crate::registers;
use arc_swap::ArcSwap;
use bison_can::{BusFrame, CanAdapter, CanError};
use bison_canopen::pdo::decode_tpdo;
use bison_canopen::sdo::{self, SdoResponse, ABORT_TIMED_OUT};
use bison_canopen::{nmt, MasterDescription, NmtCommand, NmtState, ObjectId};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 主机侧在名义 SDO 超时之外多等的时间，给事件循环一个完成取消的机会
pub(crate) const SDO_CANCEL_GRACE: Duration = Duration::from_micros(750);

/// 事件循环就绪信号的等待上限
const BUS_INIT_TIMEOUT: Duration = Duration::from_secs(3);

/// 接收节拍，同时是请求/超时检查的最大延迟
const RECEIVE_TICK: Duration = Duration::from_millis(1);

/// CAN 线程的 SCHED_FIFO 优先级
const CAN_THREAD_SCHED_PRIORITY: u8 = 50;

/// 单驱动器的 PDO 镜像快照
///
/// 通道下标 0 对应硬件通道 1，下标 1 对应通道 2。
#[derive(Debug, Clone)]
pub struct RawDriverFeedback {
    /// 编码器位置（脉冲数）
    pub position: [i32; 2],
    /// 电机转速（RPM）
    pub velocity: [i32; 2],
    /// 电机电流（0.1 A）
    pub current: [i16; 2],
    /// 故障标志字节
    pub fault_flags: u8,
    /// 脚本标志字节
    pub script_flags: u8,
    /// 运行期标志，电机 1 / 电机 2
    pub runtime_flags: [u8; 2],
    /// 首条 TPDO 到达时刻（CLOCK_MONOTONIC）
    pub timestamp: Instant,
}

impl RawDriverFeedback {
    fn new(now: Instant) -> Self {
        Self {
            position: [0; 2],
            velocity: [0; 2],
            current: [0; 2],
            fault_flags: 0,
            script_flags: 0,
            runtime_flags: [0; 2],
            timestamp: now,
        }
    }
}

/// 事件循环与驱动器门面共享的单节点状态
///
/// 单写（事件循环）多读，读取端只经过原子量和 ArcSwap。
pub struct NodeShared {
    pub(crate) node_id: u8,
    pub(crate) name: String,
    pub(crate) feedback: ArcSwap<RawDriverFeedback>,
    /// 低层总线故障标志；只在重建传输层时清除
    pub(crate) can_error: AtomicBool,
    pub(crate) booted: AtomicBool,
    boot_epoch: Mutex<u64>,
    boot_cond: Condvar,
}

impl NodeShared {
    pub(crate) fn new(node_id: u8, name: impl Into<String>) -> Self {
        Self {
            node_id,
            name: name.into(),
            feedback: ArcSwap::from_pointee(RawDriverFeedback::new(Instant::now())),
            can_error: AtomicBool::new(false),
            booted: AtomicBool::new(false),
            boot_epoch: Mutex::new(0),
            boot_cond: Condvar::new(),
        }
    }

    pub(crate) fn boot_epoch(&self) -> u64 {
        *self.boot_epoch.lock()
    }

    fn bump_boot_epoch(&self) {
        let mut epoch = self.boot_epoch.lock();
        *epoch += 1;
        self.boot_cond.notify_all();
    }

    /// 等待 boot-up 报文把纪元推过 `mark`；超时返回 `false`
    pub(crate) fn wait_boot_epoch_past(&self, mark: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut epoch = self.boot_epoch.lock();
        while *epoch <= mark {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if self
                .boot_cond
                .wait_until(&mut epoch, deadline)
                .timed_out()
            {
                return *epoch > mark;
            }
        }
        true
    }
}

/// SDO 方向（每个方向各有一把驱动器级的锁，在途表也按方向分槽）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SdoKind {
    Read,
    Write,
}

/// SDO 完成结果（读操作携带数据，写操作为全零）
#[derive(Debug, Clone, Copy)]
pub(crate) struct SdoOutcome {
    pub data: [u8; 4],
}

pub(crate) struct SdoSubmit {
    pub node: u8,
    pub kind: SdoKind,
    pub id: ObjectId,
    pub data: [u8; 4],
    pub len: usize,
    pub timeout: Duration,
    pub reply: Sender<Result<SdoOutcome, RoboteqError>>,
}

pub(crate) enum BusRequest {
    /// 原样发送一帧（NMT 等）
    Send(BusFrame),
    Sdo(SdoSubmit),
    /// 主机侧放弃等待后的取消：清掉在途槽并向从站发中止帧
    CancelSdo { node: u8, kind: SdoKind },
}

/// 提交端句柄（可克隆，驱动器门面各持一份）
#[derive(Clone)]
pub(crate) struct BusClient {
    requests: Sender<BusRequest>,
}

impl BusClient {
    pub(crate) fn submit(&self, request: BusRequest) -> Result<(), RoboteqError> {
        self.requests
            .send_timeout(request, Duration::from_millis(10))
            .map_err(|_| RoboteqError::BusDown)
    }
}

/// 事件循环的属主句柄；`shutdown`（或 Drop）停止并合流线程
pub struct BusHandle {
    client: BusClient,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BusHandle {
    pub(crate) fn client(&self) -> BusClient {
        self.client.clone()
    }

    pub fn shutdown(&mut self) {
        if let Some(handle) = self.thread.take() {
            info!("Shutting down CAN event loop");
            self.running.store(false, Ordering::Release);
            if handle.join().is_err() {
                error!("CAN event loop thread panicked");
            }
        }
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 启动事件循环线程
///
/// `factory` 在新线程里被调用，整张总线对象图都归线程所有。调用方
/// 在就绪条件上最多等 [`BUS_INIT_TIMEOUT`]；超时或图构造失败都以
/// [`RoboteqError::TransportInit`] 返回。
pub(crate) fn start(
    factory: impl FnOnce() -> Result<Box<dyn CanAdapter + Send>, CanError> + Send + 'static,
    description: MasterDescription,
    nodes: Vec<Arc<NodeShared>>,
) -> Result<BusHandle, RoboteqError> {
    let (requests_tx, requests_rx) = bounded(64);
    let running = Arc::new(AtomicBool::new(true));
    let ready = Arc::new((Mutex::new(None::<Result<(), String>>), Condvar::new()));

    let thread_running = running.clone();
    let thread_ready = ready.clone();
    let thread = std::thread::Builder::new()
        .name("bison-can".to_string())
        .spawn(move || {
            configure_realtime_scheduling();

            let adapter = match factory() {
                Ok(adapter) => adapter,
                Err(e) => {
                    signal_ready(&thread_ready, Err(e.to_string()));
                    return;
                }
            };

            let mut graph = BusGraph::new(adapter, description, nodes, requests_rx, thread_running);

            // 主站复位：广播 reset-node，所有从站重新协商
            if let Err(e) = graph.reset_master() {
                signal_ready(&thread_ready, Err(e.to_string()));
                return;
            }

            signal_ready(&thread_ready, Ok(()));
            graph.run();
            info!("CAN event loop exited");
        })
        .map_err(|e| RoboteqError::TransportInit(format!("failed to spawn CAN thread: {e}")))?;

    let (lock, cond) = &*ready;
    let mut status = lock.lock();
    if status.is_none() {
        let _ = cond.wait_for(&mut status, BUS_INIT_TIMEOUT);
    }

    match status.take() {
        Some(Ok(())) => Ok(BusHandle {
            client: BusClient {
                requests: requests_tx,
            },
            running,
            thread: Some(thread),
        }),
        Some(Err(reason)) => {
            running.store(false, Ordering::Release);
            let _ = thread.join();
            Err(RoboteqError::TransportInit(reason))
        }
        None => {
            // 线程没能按时就绪；置停止标志后放弃等待
            running.store(false, Ordering::Release);
            drop(thread);
            Err(RoboteqError::TransportInit(
                "CAN communication not initialized within the init timeout".to_string(),
            ))
        }
    }
}

fn signal_ready(ready: &(Mutex<Option<Result<(), String>>>, Condvar), value: Result<(), String>) {
    let (lock, cond) = ready;
    *lock.lock() = Some(value);
    cond.notify_all();
}

fn configure_realtime_scheduling() {
    use thread_priority::{
        set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
        ThreadPriority, ThreadPriorityValue, ThreadSchedulePolicy,
    };

    let Ok(priority) = ThreadPriorityValue::try_from(CAN_THREAD_SCHED_PRIORITY) else {
        return;
    };
    match set_thread_priority_and_policy(
        thread_native_id(),
        ThreadPriority::Crossplatform(priority),
        ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
    ) {
        Ok(()) => info!(
            "FIFO RT scheduling policy with priority {} set (CAN thread)",
            CAN_THREAD_SCHED_PRIORITY
        ),
        Err(e) => warn!(
            "Could not enable FIFO RT scheduling policy (CAN thread): {}. \
             An RT kernel is recommended for better performance.",
            e
        ),
    }
}

struct PendingSdo {
    id: ObjectId,
    deadline: Instant,
    reply: Sender<Result<SdoOutcome, RoboteqError>>,
}

/// 事件循环的对象图：构造于线程内，销毁于线程内
struct BusGraph {
    adapter: Box<dyn CanAdapter + Send>,
    description: MasterDescription,
    nodes: Vec<Arc<NodeShared>>,
    requests: Receiver<BusRequest>,
    running: Arc<AtomicBool>,
    pending: HashMap<(u8, SdoKind), PendingSdo>,
}

impl BusGraph {
    fn new(
        mut adapter: Box<dyn CanAdapter + Send>,
        description: MasterDescription,
        nodes: Vec<Arc<NodeShared>>,
        requests: Receiver<BusRequest>,
        running: Arc<AtomicBool>,
    ) -> Self {
        adapter.set_receive_timeout(RECEIVE_TICK);
        Self {
            adapter,
            description,
            nodes,
            requests,
            running,
            pending: HashMap::new(),
        }
    }

    fn reset_master(&mut self) -> Result<(), CanError> {
        self.adapter.send(nmt::command(NmtCommand::ResetNode, 0))
    }

    fn run(&mut self) {
        while self.running.load(Ordering::Acquire) {
            while let Ok(request) = self.requests.try_recv() {
                self.handle_request(request);
            }

            match self.adapter.receive() {
                Ok(frame) => self.dispatch(frame),
                Err(CanError::Timeout) => {}
                Err(CanError::BusFault(e)) => {
                    warn!("CAN bus fault: {}", e);
                    self.latch_can_error();
                }
                Err(e) => {
                    error!("CAN adapter failure, stopping event loop: {}", e);
                    self.latch_can_error();
                    break;
                }
            }

            self.expire_pending();
        }

        self.fail_all_pending();
    }

    fn handle_request(&mut self, request: BusRequest) {
        match request {
            BusRequest::Send(frame) => {
                if let Err(e) = self.adapter.send(frame) {
                    warn!("Failed to send frame {:#05X}: {}", frame.id, e);
                }
            }
            BusRequest::Sdo(submit) => self.handle_sdo_submit(submit),
            BusRequest::CancelSdo { node, kind } => {
                if let Some(pending) = self.pending.remove(&(node, kind)) {
                    debug!("Cancelling SDO {} on node {}", pending.id, node);
                    let abort = sdo::abort_request(node, pending.id, ABORT_TIMED_OUT);
                    if let Err(e) = self.adapter.send(abort) {
                        warn!("Failed to send SDO abort to node {}: {}", node, e);
                    }
                }
            }
        }
    }

    fn handle_sdo_submit(&mut self, submit: SdoSubmit) {
        // 驱动器侧的方向锁保证同槽不会有并发提交
        debug_assert!(!self.pending.contains_key(&(submit.node, submit.kind)));

        let frame = match submit.kind {
            SdoKind::Read => sdo::upload_request(submit.node, submit.id),
            SdoKind::Write => sdo::download_request(submit.node, submit.id, submit.data, submit.len),
        };

        if let Err(e) = self.adapter.send(frame) {
            let _ = submit.reply.send(Err(RoboteqError::Can(e)));
            return;
        }

        self.pending.insert(
            (submit.node, submit.kind),
            PendingSdo {
                id: submit.id,
                deadline: Instant::now() + submit.timeout,
                reply: submit.reply,
            },
        );
    }

    fn dispatch(&mut self, frame: BusFrame) {
        if let Some((node, state)) = nmt::parse_heartbeat(&frame) {
            if state == NmtState::BootUp {
                if let Some(shared) = self.node_shared(node) {
                    debug!("Boot-up message received from node {}", node);
                    shared.bump_boot_epoch();
                }
            }
            return;
        }

        if let Some((node, response)) = sdo::parse_response(&frame) {
            self.complete_sdo(node, response);
            return;
        }

        self.dispatch_pdo(frame);
    }

    fn dispatch_pdo(&mut self, frame: BusFrame) {
        for shared in &self.nodes {
            let Some(node_desc) = self.description.node(shared.node_id) else {
                continue;
            };
            let Some(values) = decode_tpdo(node_desc, &frame) else {
                continue;
            };

            let mut feedback = (**shared.feedback.load()).clone();
            for value in &values {
                match value.id {
                    id if id == registers::POSITION_CHANNEL_1 => {
                        feedback.position[0] = value.as_i32();
                        // 首条 TPDO 作为一轮反馈的时间基准
                        feedback.timestamp = Instant::now();
                    }
                    id if id == registers::POSITION_CHANNEL_2 => {
                        feedback.position[1] = value.as_i32()
                    }
                    id if id == registers::VELOCITY_CHANNEL_1 => {
                        feedback.velocity[0] = value.as_i32()
                    }
                    id if id == registers::VELOCITY_CHANNEL_2 => {
                        feedback.velocity[1] = value.as_i32()
                    }
                    id if id == registers::CURRENT_CHANNEL_1 => {
                        feedback.current[0] = value.as_i16()
                    }
                    id if id == registers::CURRENT_CHANNEL_2 => {
                        feedback.current[1] = value.as_i16()
                    }
                    id if id == registers::FAULT_SCRIPT_FLAGS => {
                        let raw = value.as_u16();
                        feedback.fault_flags = (raw & 0x00FF) as u8;
                        feedback.script_flags = (raw >> 8) as u8;
                    }
                    id if id == registers::RUNTIME_FLAGS => {
                        let raw = value.as_u16();
                        feedback.runtime_flags[0] = (raw & 0x00FF) as u8;
                        feedback.runtime_flags[1] = (raw >> 8) as u8;
                    }
                    other => debug!("Unmapped PDO entry {} from node {}", other, shared.node_id),
                }
            }
            shared.feedback.store(Arc::new(feedback));
            return;
        }
    }

    fn complete_sdo(&mut self, node: u8, response: SdoResponse) {
        match response {
            SdoResponse::UploadOk { id, data, .. } => {
                if let Some(pending) = self.take_matching(node, SdoKind::Read, id) {
                    let _ = pending.reply.send(Ok(SdoOutcome { data }));
                } else {
                    debug!("Stale SDO upload response for {} from node {}", id, node);
                }
            }
            SdoResponse::DownloadOk { id } => {
                if let Some(pending) = self.take_matching(node, SdoKind::Write, id) {
                    let _ = pending.reply.send(Ok(SdoOutcome { data: [0; 4] }));
                } else {
                    debug!("Stale SDO download response for {} from node {}", id, node);
                }
            }
            SdoResponse::Abort { id, code } => {
                let pending = self
                    .take_matching(node, SdoKind::Read, id)
                    .or_else(|| self.take_matching(node, SdoKind::Write, id));
                match pending {
                    Some(pending) => {
                        let _ = pending.reply.send(Err(RoboteqError::SdoAbort { node, id, code }));
                    }
                    None => debug!("Stale SDO abort for {} from node {}", id, node),
                }
            }
        }
    }

    fn take_matching(&mut self, node: u8, kind: SdoKind, id: ObjectId) -> Option<PendingSdo> {
        match self.pending.get(&(node, kind)) {
            Some(pending) if pending.id == id => self.pending.remove(&(node, kind)),
            _ => None,
        }
    }

    fn expire_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let now = Instant::now();
        let expired: Vec<(u8, SdoKind)> = self
            .pending
            .iter()
            .filter(|(_, pending)| now >= pending.deadline)
            .map(|(key, _)| *key)
            .collect();

        for (node, kind) in expired {
            if let Some(pending) = self.pending.remove(&(node, kind)) {
                let abort = sdo::abort_request(node, pending.id, ABORT_TIMED_OUT);
                if let Err(e) = self.adapter.send(abort) {
                    warn!("Failed to send SDO abort to node {}: {}", node, e);
                }
                let _ = pending.reply.send(Err(RoboteqError::SdoTimeout {
                    node,
                    id: pending.id,
                }));
            }
        }
    }

    fn fail_all_pending(&mut self) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.reply.send(Err(RoboteqError::BusDown));
        }
    }

    fn latch_can_error(&self) {
        for shared in &self.nodes {
            shared.can_error.store(true, Ordering::Release);
        }
    }

    fn node_shared(&self, node: u8) -> Option<&Arc<NodeShared>> {
        self.nodes.iter().find(|shared| shared.node_id == node)
    }
}
