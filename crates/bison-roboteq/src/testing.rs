//! Mock Roboteq slaves for integration tests (`mock-slave` feature).
//!
//! A single background task emulates every slave on the wire: it answers
//! NMT resets with boot-up heartbeats, serves expedited SDO uploads from an
//! in-memory object dictionary, records downloads, and streams TPDOs while
//! operational. Fault injection is per node: individual objects can be
//! silenced (SDO timeout) and PDO emission can be switched off (staleness).

use crate::controller::AdapterFactory;
use crate::registers;
use bison_can::mock::{mock_can_pair, MockCanAdapter, MockCanRemote};
use bison_can::{CanAdapter, CanError};
use bison_canopen::{nmt, sdo, MasterDescription, NmtCommand, NmtState, ObjectId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub const FRONT_NODE: u8 = 1;
pub const REAR_NODE: u8 = 2;
pub const VENDOR_ID: u32 = 0x272;

const PDO_PERIOD: Duration = Duration::from_millis(5);

/// Master description matching the mock's TPDO layout.
pub fn test_description() -> MasterDescription {
    let toml = format!(
        r#"
        [bus]
        interface = "panther_can"
        bitrate = 1000000

        {}
        {}
        "#,
        node_description(FRONT_NODE, "front"),
        node_description(REAR_NODE, "rear"),
    );
    MasterDescription::from_toml(&toml).expect("test description must parse")
}

fn node_description(id: u8, name: &str) -> String {
    format!(
        r#"
        [[node]]
        id = {id}
        name = "{name}"
        vendor_id = {VENDOR_ID}

        [[node.tpdo]]
        cob_base = 0x180
        entry = [
            {{ index = 0x2106, sub = 1, size = 4 }},
            {{ index = 0x2106, sub = 2, size = 4 }},
        ]

        [[node.tpdo]]
        cob_base = 0x280
        entry = [
            {{ index = 0x2106, sub = 3, size = 4 }},
            {{ index = 0x2106, sub = 4, size = 4 }},
        ]

        [[node.tpdo]]
        cob_base = 0x380
        entry = [
            {{ index = 0x2106, sub = 5, size = 2 }},
            {{ index = 0x2106, sub = 6, size = 2 }},
            {{ index = 0x2106, sub = 7, size = 2 }},
            {{ index = 0x2106, sub = 8, size = 2 }},
        ]
        "#
    )
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MockFeedback {
    pub position: [i32; 2],
    pub velocity: [i32; 2],
    pub current: [i16; 2],
    pub fault_flags: u8,
    pub script_flags: u8,
    pub runtime_flags: [u8; 2],
}

pub struct MockNode {
    node_id: u8,
    operational: AtomicBool,
    pdo_enabled: AtomicBool,
    ignored: Mutex<HashSet<ObjectId>>,
    objects: Mutex<HashMap<ObjectId, (u32, usize)>>,
    downloads: Mutex<Vec<(ObjectId, u32)>>,
    feedback: Mutex<MockFeedback>,
}

impl MockNode {
    fn new(node_id: u8) -> Self {
        let mut objects = HashMap::new();
        objects.insert(registers::DEVICE_TYPE, (0x0000_0000, 4));
        objects.insert(registers::IDENTITY_VENDOR_ID, (VENDOR_ID, 4));
        objects.insert(registers::TEMPERATURE, (32i8 as u8 as u32, 1));
        objects.insert(registers::VOLTAGE, (360, 2)); // 36.0 V
        objects.insert(registers::BATTERY_CURRENT_1, (25i16 as u16 as u32, 2)); // 2.5 A
        objects.insert(registers::BATTERY_CURRENT_2, (20i16 as u16 as u32, 2)); // 2.0 A
        Self {
            node_id,
            operational: AtomicBool::new(false),
            pdo_enabled: AtomicBool::new(true),
            ignored: Mutex::new(HashSet::new()),
            objects: Mutex::new(objects),
            downloads: Mutex::new(Vec::new()),
            feedback: Mutex::new(MockFeedback::default()),
        }
    }

    /// Silence an object: uploads and downloads get no response at all.
    pub fn ignore_object(&self, id: ObjectId) {
        self.ignored.lock().insert(id);
    }

    pub fn stop_ignoring(&self, id: ObjectId) {
        self.ignored.lock().remove(&id);
    }

    pub fn set_object(&self, id: ObjectId, value: u32, len: usize) {
        self.objects.lock().insert(id, (value, len));
    }

    pub fn set_feedback(&self, feedback: MockFeedback) {
        *self.feedback.lock() = feedback;
    }

    pub fn set_pdo_enabled(&self, enabled: bool) {
        self.pdo_enabled.store(enabled, Ordering::Release);
    }

    /// Every SDO download received so far, in order.
    pub fn downloads(&self) -> Vec<(ObjectId, u32)> {
        self.downloads.lock().clone()
    }

    /// Forget recorded downloads (phase separation in tests).
    pub fn clear_downloads(&self) {
        self.downloads.lock().clear();
    }

    pub fn commands_for(&self, id: ObjectId) -> Vec<i32> {
        self.downloads()
            .into_iter()
            .filter(|(object, _)| *object == id)
            .map(|(_, raw)| raw as i32)
            .collect()
    }

    pub fn is_operational(&self) -> bool {
        self.operational.load(Ordering::Acquire)
    }
}

pub struct MockRoboteqBus {
    pub nodes: Vec<Arc<MockNode>>,
    fault: Arc<dyn Fn() + Send + Sync>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MockRoboteqBus {
    pub fn spawn(remote: MockCanRemote, node_ids: &[u8]) -> Self {
        let nodes: Vec<Arc<MockNode>> = node_ids.iter().map(|&id| Arc::new(MockNode::new(id))).collect();
        let running = Arc::new(AtomicBool::new(true));

        let remote = Arc::new(remote);
        let fault_remote = remote.clone();
        let fault: Arc<dyn Fn() + Send + Sync> = Arc::new(move || fault_remote.inject_bus_fault());

        let task_nodes = nodes.clone();
        let task_running = running.clone();
        let thread = std::thread::spawn(move || {
            run_bus(&remote, task_nodes, task_running);
        });

        Self {
            nodes,
            fault,
            running,
            thread: Some(thread),
        }
    }

    pub fn node(&self, id: u8) -> Arc<MockNode> {
        self.nodes
            .iter()
            .find(|node| node.node_id == id)
            .expect("unknown mock node id")
            .clone()
    }

    /// Inject a one-shot bus-level fault on the master adapter.
    pub fn inject_bus_fault(&self) {
        (self.fault)();
    }
}

impl Drop for MockRoboteqBus {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_bus(remote: &MockCanRemote, nodes: Vec<Arc<MockNode>>, running: Arc<AtomicBool>) {
    let mut last_pdo = Instant::now();
    while running.load(Ordering::Acquire) {
        if let Ok(frame) = remote.recv_timeout(Duration::from_millis(1)) {
            handle_frame(remote, &nodes, &frame);
        }

        if last_pdo.elapsed() >= PDO_PERIOD {
            last_pdo = Instant::now();
            for node in &nodes {
                if node.is_operational() && node.pdo_enabled.load(Ordering::Acquire) {
                    emit_pdos(remote, node);
                }
            }
        }
    }
}

fn handle_frame(remote: &MockCanRemote, nodes: &[Arc<MockNode>], frame: &bison_can::BusFrame) {
    if let Some((command, target)) = nmt::parse_command(frame) {
        for node in nodes {
            if target != 0 && target != node.node_id {
                continue;
            }
            match command {
                NmtCommand::ResetNode | NmtCommand::ResetCommunication => {
                    node.operational.store(false, Ordering::Release);
                    let _ = remote.send(nmt::heartbeat(node.node_id, NmtState::BootUp));
                }
                NmtCommand::Start => node.operational.store(true, Ordering::Release),
                NmtCommand::Stop | NmtCommand::EnterPreOperational => {
                    node.operational.store(false, Ordering::Release)
                }
            }
        }
        return;
    }

    if let Some((target, request)) = sdo::parse_request(frame) {
        let Some(node) = nodes.iter().find(|node| node.node_id == target) else {
            return;
        };
        match request {
            sdo::SdoServerRequest::Upload(id) => {
                if node.ignored.lock().contains(&id) {
                    return;
                }
                match node.objects.lock().get(&id) {
                    Some(&(value, len)) => {
                        let _ = remote.send(sdo::upload_response(
                            target,
                            id,
                            value.to_le_bytes(),
                            len,
                        ));
                    }
                    None => {
                        let _ = remote.send(sdo::abort_response(target, id, 0x0602_0000));
                    }
                }
            }
            sdo::SdoServerRequest::Download { id, data, .. } => {
                if node.ignored.lock().contains(&id) {
                    return;
                }
                node.downloads.lock().push((id, u32::from_le_bytes(data)));
                let _ = remote.send(sdo::download_response(target, id));
            }
            // Client-side cancellation of a silenced op: nothing to do
            sdo::SdoServerRequest::Abort { .. } => {}
        }
    }
}

fn emit_pdos(remote: &MockCanRemote, node: &MockNode) {
    let feedback = *node.feedback.lock();
    let id = node.node_id as u16;

    let mut tpdo1 = Vec::with_capacity(8);
    tpdo1.extend_from_slice(&feedback.position[0].to_le_bytes());
    tpdo1.extend_from_slice(&feedback.position[1].to_le_bytes());
    let _ = remote.send(bison_can::BusFrame::new(0x180 + id, &tpdo1));

    let mut tpdo2 = Vec::with_capacity(8);
    tpdo2.extend_from_slice(&feedback.velocity[0].to_le_bytes());
    tpdo2.extend_from_slice(&feedback.velocity[1].to_le_bytes());
    let _ = remote.send(bison_can::BusFrame::new(0x280 + id, &tpdo2));

    let mut tpdo3 = Vec::with_capacity(8);
    tpdo3.extend_from_slice(&feedback.current[0].to_le_bytes());
    tpdo3.extend_from_slice(&feedback.current[1].to_le_bytes());
    let fault_script = u16::from_le_bytes([feedback.fault_flags, feedback.script_flags]);
    tpdo3.extend_from_slice(&fault_script.to_le_bytes());
    let runtime = u16::from_le_bytes([feedback.runtime_flags[0], feedback.runtime_flags[1]]);
    tpdo3.extend_from_slice(&runtime.to_le_bytes());
    let _ = remote.send(bison_can::BusFrame::new(0x380 + id, &tpdo3));
}

/// Harness: `count` independent wire pairs, each with its own mock bus.
/// The factory hands adapters out in order, one per transport bring-up.
pub fn mock_harness(count: usize) -> (AdapterFactory, Vec<MockRoboteqBus>) {
    let mut adapters = VecDeque::new();
    let mut buses = Vec::new();
    for _ in 0..count {
        let (adapter, remote) = mock_can_pair();
        adapters.push_back(adapter);
        buses.push(MockRoboteqBus::spawn(remote, &[FRONT_NODE, REAR_NODE]));
    }

    let queue: Arc<Mutex<VecDeque<MockCanAdapter>>> = Arc::new(Mutex::new(adapters));
    let factory: AdapterFactory = Arc::new(move || {
        queue
            .lock()
            .pop_front()
            .map(|adapter| Box::new(adapter) as Box<dyn CanAdapter + Send>)
            .ok_or_else(|| CanError::Device("mock harness ran out of adapters".to_string()))
    });
    (factory, buses)
}
