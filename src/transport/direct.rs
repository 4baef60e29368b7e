//! Direct UART transport for HMI links.
//!
//! No AT protocol: the wire carries raw X-Slot frames. A reader thread
//! feeds incoming bytes through a [`Reframer`] that recovers frame
//! boundaries from the unsynchronized stream and gates every candidate on
//! its CRC before delivery.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hal::{self, SerialLink};
use crate::protocol::frame::Frame;
use crate::protocol::{CRC_SIZE, HEADER_SIZE, MAX_DATA_LEN, MIN_FRAME_SIZE, OFFSET_LEN, SYNC_BYTE};
use crate::transport::{ReceiveCallback, Transport};

/// Receive accumulator size.
const RX_BUFFER_SIZE: usize = 256;

/// How long the probe watches the line for a sync byte.
const PROBE_WINDOW: Duration = Duration::from_millis(500);

/// Reader poll slice; bounds the latency of `stop()`.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Recovers X-Slot frames from an unsynchronized byte stream.
///
/// Algorithm per candidate: discard until a sync byte, wait for a full
/// header, reject impossible LEN by dropping the sync byte, wait for the
/// complete frame, verify the CRC. A CRC failure also drops just the sync
/// byte, so a frame starting inside another frame's payload is recovered.
#[derive(Debug, Default)]
pub struct Reframer {
    buf: Vec<u8>,
    crc_errors: u64,
}

impl Reframer {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(RX_BUFFER_SIZE),
            crc_errors: 0,
        }
    }

    /// Append raw bytes from the wire.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        // A stalled peer must not grow the accumulator without bound.
        if self.buf.len() > 4 * RX_BUFFER_SIZE {
            let cut = self.buf.len() - RX_BUFFER_SIZE;
            self.buf.drain(..cut);
        }
    }

    /// Extract the next complete, CRC-valid frame, if any.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let sync = match self.buf.iter().position(|&b| b == SYNC_BYTE) {
                Some(pos) => pos,
                None => {
                    self.buf.clear();
                    return None;
                }
            };
            if sync > 0 {
                self.buf.drain(..sync);
            }

            if self.buf.len() < MIN_FRAME_SIZE {
                return None;
            }

            let data_len = self.buf[OFFSET_LEN] as usize;
            if data_len > MAX_DATA_LEN {
                self.buf.drain(..1);
                continue;
            }

            let total = HEADER_SIZE + data_len + CRC_SIZE;
            if self.buf.len() < total {
                return None;
            }

            if Frame::verify_crc(&self.buf[..total]) {
                return Some(self.buf.drain(..total).collect());
            }

            self.crc_errors += 1;
            self.buf.drain(..1);
        }
    }

    /// Number of sync candidates rejected by the CRC gate.
    pub fn crc_errors(&self) -> u64 {
        self.crc_errors
    }
}

struct DirectShared {
    running: AtomicBool,
    recv_cb: RwLock<Option<ReceiveCallback>>,
    crc_errors: AtomicU64,
}

pub struct DirectTransport {
    port: String,
    baudrate: u32,
    shared: Arc<DirectShared>,
    writer: Mutex<Option<Box<dyn SerialLink>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    injected: Mutex<Option<Box<dyn SerialLink>>>,
}

impl DirectTransport {
    pub fn new(config: &Config) -> Self {
        Self {
            port: config.uart_port.clone(),
            baudrate: config.uart_baudrate,
            shared: Arc::new(DirectShared {
                running: AtomicBool::new(false),
                recv_cb: RwLock::new(None),
                crc_errors: AtomicU64::new(0),
            }),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            injected: Mutex::new(None),
        }
    }

    /// Drive an already-open link instead of opening the configured port.
    pub fn with_link(config: &Config, link: Box<dyn SerialLink>) -> Self {
        let transport = Self::new(config);
        *transport.injected.lock() = Some(link);
        transport
    }

    /// Frames dropped by the CRC gate since start.
    pub fn crc_error_count(&self) -> u64 {
        self.shared.crc_errors.load(Ordering::Relaxed)
    }

    fn open_link(&self) -> Result<Box<dyn SerialLink>> {
        match self.injected.lock().as_ref() {
            Some(link) => link.try_clone(),
            None => hal::open(&self.port, self.baudrate),
        }
    }
}

impl Transport for DirectTransport {
    fn start(&mut self) -> Result<()> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let link = self.open_link()?;
        let mut rx = link.try_clone()?;
        *self.writer.lock() = Some(link);

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("xslot-direct-rx".into())
            .spawn(move || reader_loop(&mut *rx, &shared));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(_) => {
                self.shared.running.store(false, Ordering::SeqCst);
                *self.writer.lock() = None;
                return Err(Error::NoDevice);
            }
        };
        *self.reader.lock() = Some(handle);

        info!("direct transport up on {}", self.port);
        Ok(())
    }

    fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.reader.lock().take() {
            let _ = handle.join();
        }
        *self.writer.lock() = None;
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        if frame.is_empty() {
            return Err(Error::InvalidParam);
        }
        let mut writer = self.writer.lock();
        let link = writer.as_mut().ok_or(Error::NotInitialized)?;
        link.write_all(frame)?;
        link.flush()
    }

    fn probe(&mut self) -> Result<()> {
        let mut link = self.open_link()?;

        // An HMI is assumed present if anything frame-like crosses the
        // line inside the probe window.
        let deadline = Instant::now() + PROBE_WINDOW;
        let mut chunk = [0u8; 32];
        while Instant::now() < deadline {
            let n = link.read(&mut chunk, READ_SLICE)?;
            if chunk[..n].contains(&SYNC_BYTE) {
                return Ok(());
            }
        }
        Err(Error::NoDevice)
    }

    fn configure(&mut self, _cell_id: u8, _power_dbm: i8) -> Result<()> {
        // Wireless parameters have no meaning on a direct link.
        Ok(())
    }

    fn set_receive_callback(&mut self, cb: ReceiveCallback) {
        *self.shared.recv_cb.write() = Some(cb);
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

impl Drop for DirectTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reader_loop(link: &mut dyn SerialLink, shared: &Arc<DirectShared>) {
    let mut reframer = Reframer::new();
    let mut chunk = [0u8; 64];

    while shared.running.load(Ordering::Relaxed) {
        let n = match link.read(&mut chunk, READ_SLICE) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(_) => {
                thread::sleep(READ_SLICE);
                continue;
            }
        };

        reframer.push(&chunk[..n]);
        while let Some(frame) = reframer.next_frame() {
            let cb = shared.recv_cb.read().clone();
            if let Some(cb) = cb {
                cb(frame.as_slice());
            }
        }
        let dropped = reframer.crc_errors();
        if dropped > shared.crc_errors.load(Ordering::Relaxed) {
            debug!("reframer dropped {dropped} corrupt frame candidates");
            shared.crc_errors.store(dropped, Ordering::Relaxed);
        }
    }
}
