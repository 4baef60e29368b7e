//! Shared test doubles: an in-memory serial pair, a manually stepped
//! clock, and a loopback transport for session-level tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use xslot::error::{Error, Result};
use xslot::hal::{Clock, SerialLink};
use xslot::transport::{ReceiveCallback, Transport};

/// One direction of the in-memory serial pair.
struct Pipe {
    buf: Mutex<VecDeque<u8>>,
    cond: Condvar,
}

impl Pipe {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            buf: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        })
    }

    fn push(&self, bytes: &[u8]) {
        let mut buf = self.buf.lock();
        buf.extend(bytes);
        self.cond.notify_all();
    }

    fn pop_into(&self, out: &mut [u8], timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut buf = self.buf.lock();
        while buf.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            self.cond.wait_for(&mut buf, deadline - now);
        }
        let n = out.len().min(buf.len());
        for slot in out.iter_mut().take(n) {
            *slot = buf.pop_front().unwrap();
        }
        n
    }
}

/// One endpoint of an in-memory serial connection.
#[derive(Clone)]
pub struct MockSerial {
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
}

impl MockSerial {
    /// Create a crossed pair: bytes written to one end are read from the
    /// other.
    pub fn pair() -> (MockSerial, MockSerial) {
        let a = Pipe::new();
        let b = Pipe::new();
        (
            MockSerial {
                rx: Arc::clone(&a),
                tx: Arc::clone(&b),
            },
            MockSerial { rx: b, tx: a },
        )
    }

    /// Feed bytes toward the peer endpoint.
    pub fn send(&self, bytes: &[u8]) {
        self.tx.push(bytes);
    }

    /// Feed an ASCII line (with CRLF) toward the peer endpoint.
    pub fn send_line(&self, line: &str) {
        self.send(line.as_bytes());
        self.send(b"\r\n");
    }

    /// Read one CRLF-terminated line sent by the peer.
    pub fn read_line(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let mut line = Vec::new();
        loop {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let mut byte = [0u8; 1];
            if self.rx.pop_into(&mut byte, deadline - now) == 0 {
                return None;
            }
            if byte[0] == b'\n' {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return String::from_utf8(line).ok();
            }
            line.push(byte[0]);
        }
    }
}

impl SerialLink for MockSerial {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        Ok(self.rx.pop_into(buf, timeout))
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.tx.push(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn SerialLink>> {
        Ok(Box::new(self.clone()))
    }
}

/// Manually stepped monotonic clock.
pub struct TestClock(Mutex<u64>);

impl TestClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(0)))
    }

    pub fn set(&self, ms: u64) {
        *self.0.lock() = ms;
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u64 {
        *self.0.lock()
    }
}

/// Records outbound frames and lets tests inject inbound ones, standing in
/// for a real wire.
pub struct LoopbackTransport {
    state: Arc<LoopbackState>,
}

pub struct LoopbackState {
    running: AtomicBool,
    sent: Mutex<Vec<Vec<u8>>>,
    recv_cb: Mutex<Option<ReceiveCallback>>,
}

/// Test-side handle onto a [`LoopbackTransport`] owned by a session.
#[derive(Clone)]
pub struct LoopbackHandle {
    state: Arc<LoopbackState>,
}

impl LoopbackTransport {
    pub fn new() -> (Box<LoopbackTransport>, LoopbackHandle) {
        let state = Arc::new(LoopbackState {
            running: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            recv_cb: Mutex::new(None),
        });
        (
            Box::new(LoopbackTransport {
                state: Arc::clone(&state),
            }),
            LoopbackHandle { state },
        )
    }
}

impl Transport for LoopbackTransport {
    fn start(&mut self) -> Result<()> {
        self.state.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotInitialized);
        }
        self.state.sent.lock().push(frame.to_vec());
        Ok(())
    }

    fn probe(&mut self) -> Result<()> {
        Ok(())
    }

    fn configure(&mut self, _cell_id: u8, _power_dbm: i8) -> Result<()> {
        Ok(())
    }

    fn set_receive_callback(&mut self, cb: ReceiveCallback) {
        *self.state.recv_cb.lock() = Some(cb);
    }

    fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }
}

impl LoopbackHandle {
    /// Deliver raw frame bytes as if they arrived from the wire. Runs the
    /// session's inbound path on the calling thread, like a reader thread
    /// would.
    pub fn deliver(&self, bytes: &[u8]) {
        let cb = self.state.recv_cb.lock().clone();
        if let Some(cb) = cb {
            cb(bytes);
        }
    }

    /// All frames the session has sent, oldest first.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.sent.lock().clone()
    }

    /// Drop recorded frames.
    pub fn clear_sent(&self) {
        self.state.sent.lock().clear();
    }
}

/// Poll until `cond` holds or the timeout elapses; returns whether it held.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
