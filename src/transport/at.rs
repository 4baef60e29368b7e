//! TPMesh AT driver.
//!
//! Owns the UART and is its single reader. A background thread accumulates
//! lines and feeds a two-state receiver machine:
//!
//! - `Idle`: lines starting with `+` are URCs and go to the URC callback;
//!   everything else (echo, garbage) is ignored.
//! - `WaitingResponse`: an exact `OK` line completes the pending command
//!   with success; URC lines (`+` prefix) go to the URC callback, never to
//!   the pending command — `+SEND:…,SEND OK` and `+SEND:…,SEND ERROR` are
//!   URCs, not terminators; any other line containing `ERROR` completes
//!   the command with failure; everything else is appended to the response
//!   accumulator.
//!
//! Synchronous submission writes `AT<cmd>\r\n` and parks on a condition
//! variable until the reader signals completion or the timeout expires; a
//! timeout forcibly resets the machine to `Idle`.
//!
//! `AT+SEND` never goes through the synchronous path: the reader thread is
//! also the thread that delivers inbound frames, and an auto-reply sent
//! from that context must not park waiting for an `OK` only the reader
//! itself could consume. Queued sends are written by the reader whenever
//! the machine is idle; the elicited `OK` is ignored and physical
//! completion arrives later as a `+SEND:` URC.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hal::{self, SerialLink};
use crate::transport::urc::{self, Urc};

/// Default timeout for synchronous commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum payload of one `AT+SEND`.
const MAX_SEND_LEN: usize = 400;

/// Bound on queued fire-and-forget sends awaiting an idle receiver.
const TX_QUEUE_LIMIT: usize = 32;

/// Reader poll slice; bounds the latency of `stop()`.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Settle time after `AT+LP=` resets the module.
const LP_SETTLE: Duration = Duration::from_secs(3);

/// How long to re-probe after the low-power reset before giving up.
const LP_REPROBE_WINDOW: Duration = Duration::from_secs(5);

/// Callback invoked on the reader thread for every parsed URC.
pub type UrcCallback = Arc<dyn Fn(&Urc) + Send + Sync>;

/// Delivery type of `AT+SEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SendType {
    /// UM: best-effort unicast.
    BestEffort = 0,
    /// AM: acknowledged unicast.
    Acked = 1,
    /// FAST: latency-optimized.
    Fast = 2,
    /// FLOOD: network-wide broadcast.
    Flood = 3,
}

/// Parsed `AT+ADDR?` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressInfo {
    pub addr: u16,
    pub group_addr: Option<u16>,
    pub is_hub: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    Idle,
    WaitingResponse,
}

struct SubmitState {
    state: RxState,
    done: bool,
    success: bool,
    aborted: bool,
    lines: Vec<String>,
}

struct Shared {
    running: AtomicBool,
    submit: Mutex<SubmitState>,
    cond: Condvar,
    urc_cb: RwLock<Option<UrcCallback>>,
    writer: Mutex<Option<Box<dyn SerialLink>>>,
    tx_queue: Mutex<VecDeque<String>>,
}

impl Shared {
    fn complete(&self, st: &mut SubmitState, success: bool) {
        st.success = success;
        st.done = true;
        st.state = RxState::Idle;
        self.cond.notify_all();
    }

    fn process_line(&self, line: &str) {
        debug!("AT << {line}");

        let mut st = self.submit.lock();
        match st.state {
            RxState::WaitingResponse => {
                if line == "OK" {
                    self.complete(&mut st, true);
                } else if line.starts_with('+') {
                    // URCs never terminate a command, even when they carry
                    // "ERROR" in their result field.
                    drop(st);
                    self.dispatch_urc(line);
                } else if line.contains("ERROR") {
                    self.complete(&mut st, false);
                } else {
                    st.lines.push(line.to_string());
                }
            }
            RxState::Idle => {
                if line.starts_with('+') {
                    drop(st);
                    self.dispatch_urc(line);
                }
                // Anything else in Idle is command echo or noise.
            }
        }
    }

    fn dispatch_urc(&self, line: &str) {
        let Some(urc) = urc::parse(line) else {
            return;
        };
        if matches!(urc, Urc::Unknown(_)) {
            debug!("unrecognized URC: {line}");
        }
        let cb = self.urc_cb.read().clone();
        if let Some(cb) = cb {
            cb(&urc);
        }
    }

    /// Write at most one queued fire-and-forget command, only while the
    /// receiver is idle. Runs on the reader thread; the submit lock is held
    /// across the write so a synchronous command cannot interleave.
    fn drain_tx_queue(&self) {
        let st = self.submit.lock();
        if st.state != RxState::Idle {
            return;
        }
        let Some(cmd) = self.tx_queue.lock().pop_front() else {
            return;
        };
        debug!("AT >> AT{cmd}");
        let mut writer = self.writer.lock();
        if let Some(link) = writer.as_mut() {
            let written = link
                .write_all(format!("AT{cmd}\r\n").as_bytes())
                .and_then(|()| link.flush());
            if written.is_err() {
                warn!("failed to write queued command: AT{cmd}");
            }
        }
        drop(writer);
        drop(st);
    }
}

/// Line-oriented AT command driver for the TPMesh module.
pub struct AtDriver {
    port: String,
    baudrate: u32,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    injected: Mutex<Option<Box<dyn SerialLink>>>,
}

impl AtDriver {
    pub fn new(port: &str, baudrate: u32) -> Self {
        Self {
            port: port.to_string(),
            baudrate,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                submit: Mutex::new(SubmitState {
                    state: RxState::Idle,
                    done: false,
                    success: false,
                    aborted: false,
                    lines: Vec::new(),
                }),
                cond: Condvar::new(),
                urc_cb: RwLock::new(None),
                writer: Mutex::new(None),
                tx_queue: Mutex::new(VecDeque::new()),
            }),
            reader: Mutex::new(None),
            injected: Mutex::new(None),
        }
    }

    /// Drive an already-open link instead of opening the configured port.
    pub fn with_link(link: Box<dyn SerialLink>) -> Self {
        let driver = Self::new("", 0);
        *driver.injected.lock() = Some(link);
        driver
    }

    /// Install the URC callback. Safe to call before or after `start`.
    pub fn set_urc_callback(&self, cb: UrcCallback) {
        *self.shared.urc_cb.write() = Some(cb);
    }

    /// Open the serial device and spawn the reader thread. Idempotent.
    pub fn start(&self) -> Result<()> {
        if self.shared.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let link = match self.injected.lock().take() {
            Some(link) => link,
            None => hal::open(&self.port, self.baudrate)?,
        };
        let mut rx = link.try_clone()?;
        *self.shared.writer.lock() = Some(link);

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("xslot-at-rx".into())
            .spawn(move || reader_loop(&mut *rx, &shared));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(_) => {
                self.shared.running.store(false, Ordering::SeqCst);
                *self.shared.writer.lock() = None;
                return Err(Error::NoDevice);
            }
        };
        *self.reader.lock() = Some(handle);

        Ok(())
    }

    /// Stop the reader thread and close the device. Any in-flight
    /// synchronous caller observes `SendFailed`.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        {
            let mut st = self.shared.submit.lock();
            if st.state == RxState::WaitingResponse {
                st.aborted = true;
                self.shared.complete(&mut st, false);
            }
        }

        if let Some(handle) = self.reader.lock().take() {
            let _ = handle.join();
        }
        self.shared.tx_queue.lock().clear();
        *self.shared.writer.lock() = None;
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Submit `AT<cmd>` and wait for the terminating `OK`/`ERROR`.
    ///
    /// Returns the accumulated response lines on success. Fails with `Busy`
    /// if another command is waiting, `Timeout` if the module stays silent
    /// (the state machine resets to `Idle`), and `InvalidParam` on `ERROR`.
    pub fn submit(&self, cmd: &str, timeout: Duration) -> Result<Vec<String>> {
        if !self.is_running() {
            return Err(Error::NotInitialized);
        }

        {
            let mut st = self.shared.submit.lock();
            if st.state == RxState::WaitingResponse {
                return Err(Error::Busy);
            }
            st.state = RxState::WaitingResponse;
            st.done = false;
            st.success = false;
            st.aborted = false;
            st.lines.clear();
        }

        debug!("AT >> AT{cmd}");
        let written = {
            let mut writer = self.shared.writer.lock();
            match writer.as_mut() {
                Some(link) => link
                    .write_all(format!("AT{cmd}\r\n").as_bytes())
                    .and_then(|()| link.flush()),
                None => Err(Error::NoDevice),
            }
        };
        if let Err(e) = written {
            let mut st = self.shared.submit.lock();
            st.state = RxState::Idle;
            return Err(if e == Error::NoDevice {
                Error::NoDevice
            } else {
                Error::SendFailed
            });
        }

        let deadline = Instant::now() + timeout;
        let mut st = self.shared.submit.lock();
        while !st.done {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.shared.cond.wait_for(&mut st, deadline - now);
        }

        if !st.done {
            // Timed out: forcibly reset so the next command can run.
            st.state = RxState::Idle;
            warn!("AT command timed out: AT{cmd}");
            return Err(Error::Timeout);
        }

        st.done = false;
        if st.aborted {
            st.aborted = false;
            return Err(Error::SendFailed);
        }
        if st.success {
            Ok(std::mem::take(&mut st.lines))
        } else {
            Err(Error::InvalidParam)
        }
    }

    /// Probe the module with a bare `AT`.
    pub fn probe(&self) -> Result<()> {
        self.submit("", DEFAULT_TIMEOUT).map(drop)
    }

    /// Set the node address, optionally with a group address.
    pub fn set_address(&self, addr: u16, group_addr: Option<u16>) -> Result<()> {
        let cmd = match group_addr {
            Some(group) => format!("+ADDR={addr:04X},{group:04X}"),
            None => format!("+ADDR={addr:04X}"),
        };
        self.submit(&cmd, DEFAULT_TIMEOUT).map(drop)
    }

    /// Set the mesh cell ID.
    pub fn set_cell(&self, cell_id: u8) -> Result<()> {
        self.submit(&format!("+CELL={cell_id}"), DEFAULT_TIMEOUT)
            .map(drop)
    }

    /// Set the transmit power.
    pub fn set_power(&self, power_dbm: i8) -> Result<()> {
        self.submit(&format!("+PWR={power_dbm}"), DEFAULT_TIMEOUT)
            .map(drop)
    }

    /// Set the wakeup period for duty-cycled reception.
    pub fn set_wakeup(&self, period_ms: u16) -> Result<()> {
        self.submit(&format!("+WOR={period_ms}"), DEFAULT_TIMEOUT)
            .map(drop)
    }

    /// Set the control and data channel baud rates.
    pub fn set_baudrate(&self, ctrl_bps: u32, data_bps: u32) -> Result<()> {
        self.submit(&format!("+BPS=CTRL,{ctrl_bps}"), DEFAULT_TIMEOUT)?;
        self.submit(&format!("+BPS=DATA,{data_bps}"), DEFAULT_TIMEOUT)
            .map(drop)
    }

    /// Set the power mode. `AT+LP=` resets the module, so after a
    /// successful set the driver sleeps through the settle window and
    /// re-probes until the module answers again. Skipped when the module
    /// already reports the requested mode.
    pub fn set_low_power(&self, mode: u8) -> Result<()> {
        if let Ok(current) = self.query_low_power() {
            if current == mode {
                return Ok(());
            }
        }

        self.submit(&format!("+LP={mode}"), DEFAULT_TIMEOUT)?;

        thread::sleep(LP_SETTLE);
        let deadline = Instant::now() + LP_REPROBE_WINDOW;
        loop {
            if self.probe().is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            thread::sleep(Duration::from_millis(200));
        }
    }

    /// Query the current power mode.
    pub fn query_low_power(&self) -> Result<u8> {
        let lines = self.submit("+LP?", DEFAULT_TIMEOUT)?;
        bracket_field(&lines, "LP")
            .and_then(|v| v.parse().ok())
            .ok_or(Error::InvalidParam)
    }

    /// Query the module firmware version (raw response text).
    pub fn query_version(&self) -> Result<String> {
        Ok(self.submit("+VER?", DEFAULT_TIMEOUT)?.join("\n"))
    }

    /// Query the module serial number (raw response text).
    pub fn query_esn(&self) -> Result<String> {
        Ok(self.submit("+ESN?", DEFAULT_TIMEOUT)?.join("\n"))
    }

    /// Query the configured addresses and hub role.
    pub fn query_address(&self) -> Result<AddressInfo> {
        let lines = self.submit("+ADDR?", DEFAULT_TIMEOUT)?;

        let mut info = AddressInfo {
            addr: 0,
            group_addr: None,
            is_hub: false,
        };
        let mut have_addr = false;

        for line in &lines {
            if let Some(v) = bracket_field(std::slice::from_ref(line), "ROOT") {
                info.is_hub = v == "1";
            } else if let Some(v) = bracket_field(std::slice::from_ref(line), "GROUP_ADDR") {
                info.group_addr = parse_hex_field(&v);
            } else if let Some(v) = bracket_field(std::slice::from_ref(line), "ADDR") {
                if let Some(addr) = parse_hex_field(&v) {
                    info.addr = addr;
                    have_addr = true;
                }
            }
        }

        if have_addr {
            Ok(info)
        } else {
            Err(Error::InvalidParam)
        }
    }

    /// Query the mesh cell ID.
    pub fn query_cell(&self) -> Result<u8> {
        let lines = self.submit("+CELL?", DEFAULT_TIMEOUT)?;
        bracket_field(&lines, "CELL")
            .and_then(|v| v.parse().ok())
            .ok_or(Error::InvalidParam)
    }

    /// Query the transmit power.
    pub fn query_power(&self) -> Result<i8> {
        let lines = self.submit("+PWR?", DEFAULT_TIMEOUT)?;
        bracket_field(&lines, "PWR")
            .and_then(|v| v.parse().ok())
            .ok_or(Error::InvalidParam)
    }

    /// Queue one payload for transmission:
    /// `AT+SEND=<ADDR_HEX4>,<LEN>,<DATA_HEX>,<TYPE>`.
    ///
    /// Fire-and-forget: the reader thread writes the command once the
    /// receiver is idle, the elicited `OK` is ignored, and physical
    /// completion arrives later as a `+SEND:` URC. This keeps the send
    /// path safe to call from the URC callback itself (auto-replies run
    /// on the reader thread). Fails with `Busy` when the queue is full.
    pub fn send_data(&self, dest: u16, data: &[u8], send_type: SendType) -> Result<()> {
        if data.is_empty() || data.len() > MAX_SEND_LEN {
            return Err(Error::InvalidParam);
        }
        if !self.is_running() {
            return Err(Error::NotInitialized);
        }

        let mut cmd = String::with_capacity(16 + data.len() * 2);
        let _ = write!(cmd, "+SEND={dest:04X},{},", data.len());
        for byte in data {
            let _ = write!(cmd, "{byte:02X}");
        }
        let _ = write!(cmd, ",{}", send_type as u8);

        let mut queue = self.shared.tx_queue.lock();
        if queue.len() >= TX_QUEUE_LIMIT {
            return Err(Error::Busy);
        }
        queue.push_back(cmd);
        Ok(())
    }
}

impl Drop for AtDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Extract `value` from a `KEY[value]` response line.
fn bracket_field(lines: &[String], key: &str) -> Option<String> {
    let open = format!("{key}[");
    for line in lines {
        if let Some(rest) = line.trim().strip_prefix(&open) {
            if let Some(end) = rest.find(']') {
                return Some(rest[..end].to_string());
            }
        }
    }
    None
}

fn parse_hex_field(v: &str) -> Option<u16> {
    let v = v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")).unwrap_or(v);
    u16::from_str_radix(v, 16).ok()
}

fn reader_loop(link: &mut dyn SerialLink, shared: &Arc<Shared>) {
    let mut pending: Vec<u8> = Vec::with_capacity(512);
    let mut chunk = [0u8; 64];

    while shared.running.load(Ordering::Relaxed) {
        match link.read(&mut chunk, READ_SLICE) {
            Ok(0) => {}
            Ok(n) => {
                for &byte in &chunk[..n] {
                    if byte == b'\n' {
                        if pending.last() == Some(&b'\r') {
                            pending.pop();
                        }
                        if !pending.is_empty() {
                            if let Ok(line) = std::str::from_utf8(&pending) {
                                shared.process_line(line);
                            }
                        }
                        pending.clear();
                    } else {
                        // Bound the accumulator against a module gone haywire.
                        if pending.len() < 2048 {
                            pending.push(byte);
                        }
                    }
                }
            }
            Err(_) => {
                // Device error; back off and keep checking the run flag.
                thread::sleep(READ_SLICE);
            }
        }

        shared.drain_tx_queue();
    }
}
