//! Null transport, installed when no device answers the mode probe.
//!
//! `start`/`stop` succeed so the session can come up in a degraded state;
//! every data-path operation reports `NoDevice`.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::transport::{ReceiveCallback, Transport};

#[derive(Default)]
pub struct NullTransport {
    running: AtomicBool,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for NullTransport {
    fn start(&mut self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn send(&self, _frame: &[u8]) -> Result<()> {
        Err(Error::NoDevice)
    }

    fn probe(&mut self) -> Result<()> {
        Err(Error::NoDevice)
    }

    fn configure(&mut self, _cell_id: u8, _power_dbm: i8) -> Result<()> {
        Err(Error::NoDevice)
    }

    fn set_receive_callback(&mut self, _cb: ReceiveCallback) {}

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
