//! In-memory loopback adapter used by integration tests.
//!
//! `MockCanAdapter` plugs into the master-side event loop exactly like the
//! SocketCAN adapter; `MockCanRemote` is the "far end of the wire" handed to
//! a simulated slave task. Frames travel over bounded channels, so tests run
//! without a CAN interface (or a kernel at all).

use crate::{BusFrame, CanAdapter, CanError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Master-side endpoint of the loopback bus.
pub struct MockCanAdapter {
    tx: Sender<BusFrame>,
    rx: Receiver<BusFrame>,
    receive_timeout: Duration,
    fault: Arc<AtomicBool>,
}

/// Slave-side endpoint, driven by test code or a mock slave task.
pub struct MockCanRemote {
    tx: Sender<BusFrame>,
    rx: Receiver<BusFrame>,
    fault: Arc<AtomicBool>,
}

/// Create a connected adapter/remote pair.
pub fn mock_can_pair() -> (MockCanAdapter, MockCanRemote) {
    let (master_tx, slave_rx) = bounded(256);
    let (slave_tx, master_rx) = bounded(256);
    let fault = Arc::new(AtomicBool::new(false));
    (
        MockCanAdapter {
            tx: master_tx,
            rx: master_rx,
            receive_timeout: Duration::from_millis(1),
            fault: fault.clone(),
        },
        MockCanRemote {
            tx: slave_tx,
            rx: slave_rx,
            fault,
        },
    )
}

impl CanAdapter for MockCanAdapter {
    fn send(&mut self, frame: BusFrame) -> Result<(), CanError> {
        self.tx.send(frame).map_err(|_| CanError::Disconnected)
    }

    fn receive(&mut self) -> Result<BusFrame, CanError> {
        if self.fault.swap(false, Ordering::AcqRel) {
            return Err(CanError::BusFault("injected bus fault".to_string()));
        }
        match self.rx.recv_timeout(self.receive_timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(CanError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(CanError::Disconnected),
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.receive_timeout = timeout;
    }
}

impl MockCanRemote {
    /// Inject a frame towards the master.
    pub fn send(&self, frame: BusFrame) -> Result<(), CanError> {
        self.tx.send(frame).map_err(|_| CanError::Disconnected)
    }

    /// Pop the next master-emitted frame, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<BusFrame, CanError> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(CanError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(CanError::Disconnected),
        }
    }

    /// Non-blocking variant of [`recv_timeout`](Self::recv_timeout).
    pub fn try_recv(&self) -> Option<BusFrame> {
        self.rx.try_recv().ok()
    }

    /// Make the adapter's next `receive` report a bus-level fault
    /// (the loopback equivalent of a CAN error frame).
    pub fn inject_bus_fault(&self) {
        self.fault.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_roundtrip() {
        let (mut adapter, remote) = mock_can_pair();

        adapter.send(BusFrame::new(0x601, &[1, 2, 3])).unwrap();
        let frame = remote.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(frame.id, 0x601);
        assert_eq!(frame.payload(), &[1, 2, 3]);

        remote.send(BusFrame::new(0x581, &[4, 5])).unwrap();
        let frame = adapter.receive().unwrap();
        assert_eq!(frame.id, 0x581);
        assert_eq!(frame.payload(), &[4, 5]);
    }

    #[test]
    fn test_receive_timeout() {
        let (mut adapter, _remote) = mock_can_pair();
        adapter.set_receive_timeout(Duration::from_millis(5));
        assert!(matches!(adapter.receive(), Err(CanError::Timeout)));
    }
}
