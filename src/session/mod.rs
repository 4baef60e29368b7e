//! Session manager: mode probe, lifecycle, and inbound dispatch.
//!
//! The session owns one transport, the node table, the outbound sequence
//! counter, and the four host upcall slots. Inbound frames arrive on the
//! transport's reader thread; dispatch touches the node table, fires the
//! matching upcall, and sends automatic replies (PONG, WRITE_ACK) back
//! through the same transport.

mod node_table;

pub use node_table::NodeTable;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hal::{Clock, MonotonicClock};
use crate::protocol::frame::{Command, Frame};
use crate::protocol::message::{self, ReportFormat, WRITE_ACK_OK};
use crate::protocol::MAX_FRAME_SIZE;
use crate::transport::{DirectTransport, NullTransport, TpMeshTransport, Transport};
use crate::types::{
    BacnetObject, DataCallback, NodeInfo, NodeStatusCallback, ReportCallback, RunMode,
    WriteCallback, ADDR_BROADCAST, ADDR_HUB, MAX_NODES,
};

/// Upper bound on objects parsed out of one REPORT.
pub const MAX_REPORT_OBJECTS: usize = 16;

struct SessionInner {
    config: RwLock<Config>,
    mode: RwLock<RunMode>,
    running: AtomicBool,
    seq: AtomicU8,
    transport: RwLock<Option<Box<dyn Transport>>>,
    nodes: Mutex<NodeTable>,
    data_cb: RwLock<Option<DataCallback>>,
    node_cb: RwLock<Option<NodeStatusCallback>>,
    write_cb: RwLock<Option<WriteCallback>>,
    report_cb: RwLock<Option<ReportCallback>>,
    crc_errors: AtomicU64,
}

/// An X-Slot protocol session.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session with a validated configuration.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a session with an explicit clock (primarily for tests).
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                config: RwLock::new(config),
                mode: RwLock::new(RunMode::None),
                running: AtomicBool::new(false),
                seq: AtomicU8::new(0),
                transport: RwLock::new(None),
                nodes: Mutex::new(NodeTable::new(MAX_NODES, clock)),
                data_cb: RwLock::new(None),
                node_cb: RwLock::new(None),
                write_cb: RwLock::new(None),
                report_cb: RwLock::new(None),
                crc_errors: AtomicU64::new(0),
            }),
        })
    }

    /// Probe for a device and start the matching transport.
    ///
    /// TPMesh is tried first (mode `Wireless`), then a direct HMI link
    /// (mode `Hmi`). If neither answers, the null transport is installed,
    /// the mode stays `None`, and `NoDevice` is reported once.
    pub fn start(&self) -> Result<()> {
        if self.inner.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let config = self.inner.config.read().clone();

        let mut tpmesh = Box::new(TpMeshTransport::new(&config));
        if tpmesh.probe().is_ok() {
            return self.start_with(tpmesh, RunMode::Wireless);
        }

        let mut direct = Box::new(DirectTransport::new(&config));
        if direct.probe().is_ok() {
            return self.start_with(direct, RunMode::Hmi);
        }

        warn!("no X-Slot device detected on {}", config.uart_port);
        self.start_with(Box::new(NullTransport::new()), RunMode::None)?;
        Err(Error::NoDevice)
    }

    /// Start with an explicitly chosen transport and mode. Used by the
    /// automatic probe in [`start`](Self::start) and available to hosts
    /// with custom transports.
    pub fn start_with(&self, mut transport: Box<dyn Transport>, mode: RunMode) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        transport.set_receive_callback(Arc::new(move |bytes| {
            if let Some(inner) = weak.upgrade() {
                inner.on_frame_bytes(bytes);
            }
        }));

        if let Err(e) = transport.start() {
            *self.inner.mode.write() = RunMode::None;
            return Err(e);
        }

        *self.inner.transport.write() = Some(transport);
        *self.inner.mode.write() = mode;
        self.inner.running.store(true, Ordering::SeqCst);
        info!("session started in {mode} mode");
        Ok(())
    }

    /// Stop the transport and mark the session down. Idempotent. No
    /// upcalls fire after this returns.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Take the transport out of the slot before joining its reader so
        // an in-flight auto-reply cannot deadlock against us.
        let transport = self.inner.transport.write().take();
        if let Some(mut transport) = transport {
            transport.stop();
        }
        info!("session stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Mode selected by the last `start()`.
    pub fn mode(&self) -> RunMode {
        *self.inner.mode.read()
    }

    /// Report objects to the hub (incremental wire format).
    pub fn report(&self, objects: &[BacnetObject]) -> Result<()> {
        if objects.is_empty() {
            return Err(Error::InvalidParam);
        }
        let local = self.local_addr();
        let frame = message::build_report(
            local,
            ADDR_HUB,
            self.next_seq(),
            objects,
            ReportFormat::Incremental,
        )?;
        self.inner.send_frame(&frame)
    }

    /// Write one object on a remote node.
    pub fn write(&self, target: u16, obj: &BacnetObject) -> Result<()> {
        let frame = message::build_write(self.local_addr(), target, self.next_seq(), obj)?;
        self.inner.send_frame(&frame)
    }

    /// Query objects by ID from a remote node.
    pub fn query(&self, target: u16, object_ids: &[u16]) -> Result<()> {
        if object_ids.is_empty() {
            return Err(Error::InvalidParam);
        }
        let frame =
            message::build_query(self.local_addr(), target, self.next_seq(), object_ids)?;
        self.inner.send_frame(&frame)
    }

    /// Answer a QUERY with a full-format object batch.
    pub fn respond(&self, target: u16, objects: &[BacnetObject]) -> Result<()> {
        if objects.is_empty() {
            return Err(Error::InvalidParam);
        }
        let frame =
            message::build_response(self.local_addr(), target, self.next_seq(), objects)?;
        self.inner.send_frame(&frame)
    }

    /// Send a PING to a node.
    pub fn ping(&self, target: u16) -> Result<()> {
        let frame = message::build_ping(self.local_addr(), target, self.next_seq());
        self.inner.send_frame(&frame)
    }

    /// Encode and transmit an arbitrary frame. All outbound traffic funnels
    /// through this.
    pub fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.inner.send_frame(frame)
    }

    /// Snapshot of the node table.
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.inner.nodes.lock().nodes()
    }

    pub fn node(&self, addr: u16) -> Option<NodeInfo> {
        self.inner.nodes.lock().get(addr)
    }

    pub fn is_node_online(&self, addr: u16) -> bool {
        self.inner.nodes.lock().is_online(addr)
    }

    /// Sweep the node table, firing the node-status callback (with
    /// `online = false`) once per node that has gone quiet for longer than
    /// `timeout_ms`.
    pub fn check_node_timeouts(&self, timeout_ms: u64) {
        let transitions = {
            let mut nodes = self.inner.nodes.lock();
            let mut gone = Vec::new();
            nodes.check_timeouts(timeout_ms, |addr, _| gone.push(addr));
            gone
        };
        // Fire outside the table lock so a callback may query the session.
        let cb = self.inner.node_cb.read().clone();
        for addr in transitions {
            debug!("node 0x{addr:04X} went offline");
            if let Some(cb) = &cb {
                cb(addr, false);
            }
        }
    }

    /// Apply new wireless parameters, pushing them to the module when the
    /// session runs in wireless mode.
    pub fn update_wireless_config(&self, cell_id: u8, power_dbm: i8) -> Result<()> {
        if !(-30..=36).contains(&power_dbm) {
            return Err(Error::InvalidParam);
        }
        {
            let mut config = self.inner.config.write();
            config.cell_id = cell_id;
            config.power_dbm = power_dbm;
        }

        if *self.inner.mode.read() == RunMode::Wireless {
            let mut transport = self.inner.transport.write();
            if let Some(transport) = transport.as_mut() {
                return transport.configure(cell_id, power_dbm);
            }
        }
        Ok(())
    }

    /// Register the raw-data upcall (QUERY/RESPONSE payloads).
    pub fn set_data_callback(&self, cb: DataCallback) {
        *self.inner.data_cb.write() = Some(cb);
    }

    /// Register the node online/offline upcall.
    pub fn set_node_callback(&self, cb: NodeStatusCallback) {
        *self.inner.node_cb.write() = Some(cb);
    }

    /// Register the remote-write upcall.
    pub fn set_write_callback(&self, cb: WriteCallback) {
        *self.inner.write_cb.write() = Some(cb);
    }

    /// Register the report upcall.
    pub fn set_report_callback(&self, cb: ReportCallback) {
        *self.inner.report_cb.write() = Some(cb);
    }

    /// Frames dropped by the inbound CRC gate since creation.
    pub fn crc_error_count(&self) -> u64 {
        self.inner.crc_errors.load(Ordering::Relaxed)
    }

    fn local_addr(&self) -> u16 {
        self.inner.config.read().local_addr
    }

    fn next_seq(&self) -> u8 {
        self.inner.seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SessionInner {
    fn send_frame(&self, frame: &Frame) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::NotInitialized);
        }
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = frame.encode(&mut buf)?;

        let transport = self.transport.read();
        let transport = transport.as_ref().ok_or(Error::NotInitialized)?;
        transport.send(&buf[..n])
    }

    /// Inbound path; runs on the transport's reader thread.
    fn on_frame_bytes(&self, bytes: &[u8]) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(Error::Crc) => {
                self.crc_errors.fetch_add(1, Ordering::Relaxed);
                debug!("dropping frame with bad CRC");
                return;
            }
            Err(_) => return,
        };

        let local = self.config.read().local_addr;
        if frame.to() != local && frame.to() != ADDR_BROADCAST {
            return;
        }

        let newly_online = self.nodes.lock().touch(frame.from(), 0);
        if newly_online {
            let cb = self.node_cb.read().clone();
            if let Some(cb) = cb {
                cb(frame.from(), true);
            }
        }

        match frame.command() {
            Some(Command::Ping) => {
                let pong = message::build_pong(local, frame.from(), frame.seq());
                if self.send_frame(&pong).is_err() {
                    debug!("failed to answer PING from 0x{:04X}", frame.from());
                }
            }
            Some(Command::Pong) => {
                // The touch above already refreshed the node.
            }
            Some(Command::Report) => match message::parse_report(&frame, MAX_REPORT_OBJECTS) {
                Ok(objects) if !objects.is_empty() => {
                    self.nodes
                        .lock()
                        .set_object_count(frame.from(), objects.len() as u8);
                    let cb = self.report_cb.read().clone();
                    if let Some(cb) = cb {
                        cb(frame.from(), &objects);
                    }
                }
                _ => debug!("dropping malformed REPORT from 0x{:04X}", frame.from()),
            },
            Some(Command::Query) | Some(Command::Response) => {
                let cb = self.data_cb.read().clone();
                if let Some(cb) = cb {
                    cb(frame.from(), frame.data());
                }
            }
            Some(Command::Write) => {
                match message::parse_write(&frame) {
                    Ok(obj) => {
                        let cb = self.write_cb.read().clone();
                        if let Some(cb) = cb {
                            cb(frame.from(), &obj);
                        }
                    }
                    Err(_) => debug!("dropping malformed WRITE from 0x{:04X}", frame.from()),
                }
                // The writer expects an acknowledgment either way.
                let ack =
                    message::build_write_ack(local, frame.from(), frame.seq(), WRITE_ACK_OK);
                if self.send_frame(&ack).is_err() {
                    debug!("failed to acknowledge WRITE from 0x{:04X}", frame.from());
                }
            }
            Some(Command::WriteAck) => {
                // Outbound writes are fire-and-forget at this layer.
            }
            None => {}
        }
    }
}
