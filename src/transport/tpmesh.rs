//! TPMesh wireless transport.
//!
//! Wraps the AT driver: outbound frames become `AT+SEND` commands addressed
//! from the frame's own TO field, inbound frames arrive as the payload of
//! `+NNMI:` URCs. All other URCs are observed for diagnostics only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hal::SerialLink;
use crate::protocol::{MIN_FRAME_SIZE, OFFSET_TO};
use crate::transport::at::{AtDriver, SendType};
use crate::transport::urc::Urc;
use crate::transport::{ReceiveCallback, Transport};

pub struct TpMeshTransport {
    config: Config,
    driver: Arc<AtDriver>,
    recv_cb: Arc<RwLock<Option<ReceiveCallback>>>,
    running: AtomicBool,
}

impl TpMeshTransport {
    pub fn new(config: &Config) -> Self {
        Self::build(
            config,
            AtDriver::new(&config.uart_port, config.uart_baudrate),
        )
    }

    /// Drive an already-open link instead of opening the configured port.
    pub fn with_link(config: &Config, link: Box<dyn SerialLink>) -> Self {
        Self::build(config, AtDriver::with_link(link))
    }

    fn build(config: &Config, driver: AtDriver) -> Self {
        let driver = Arc::new(driver);
        let recv_cb: Arc<RwLock<Option<ReceiveCallback>>> = Arc::new(RwLock::new(None));

        let slot = Arc::clone(&recv_cb);
        driver.set_urc_callback(Arc::new(move |urc| match urc {
            Urc::Nnmi { src, rssi, data, .. } => {
                debug!("NNMI from 0x{src:04X} rssi {rssi} ({} bytes)", data.len());
                let cb = slot.read().clone();
                if let Some(cb) = cb {
                    cb(data.as_slice());
                }
            }
            Urc::Send { sn, result } => debug!("send #{sn} -> {result:?}"),
            Urc::Route { event, addr } => debug!("route {event:?} 0x{addr:04X}"),
            Urc::Ack { src, rssi, sn } => {
                debug!("delivery ack from 0x{src:04X} rssi {rssi} sn {sn}");
            }
            Urc::Boot => info!("TPMesh module rebooted"),
            Urc::Ready => debug!("TPMesh module ready"),
            Urc::Suspend | Urc::Resume | Urc::Flood(_) | Urc::Unknown(_) => {}
        }));

        Self {
            config: config.clone(),
            driver,
            recv_cb,
            running: AtomicBool::new(false),
        }
    }
}

impl Transport for TpMeshTransport {
    fn start(&mut self) -> Result<()> {
        self.driver.start()?;
        self.driver.probe()?;

        self.driver.set_address(self.config.local_addr, None)?;
        if self.config.cell_id > 0 {
            self.driver.set_cell(self.config.cell_id)?;
        }
        if self.config.power_dbm != 0 {
            self.driver.set_power(self.config.power_dbm)?;
        }
        self.driver
            .set_low_power(self.config.power_mode.at_mode())?;
        if self.config.wakeup_period_ms > 0 {
            self.driver.set_wakeup(self.config.wakeup_period_ms)?;
        }

        self.running.store(true, Ordering::SeqCst);
        info!(
            "TPMesh transport up: addr 0x{:04X}, cell {}, {} dBm",
            self.config.local_addr, self.config.cell_id, self.config.power_dbm
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.driver.stop();
    }

    fn send(&self, frame: &[u8]) -> Result<()> {
        if frame.len() < MIN_FRAME_SIZE {
            return Err(Error::InvalidParam);
        }
        // Destination rides in the frame's TO field (little-endian).
        let dest = u16::from(frame[OFFSET_TO]) | (u16::from(frame[OFFSET_TO + 1]) << 8);
        self.driver.send_data(dest, frame, SendType::BestEffort)
    }

    fn probe(&mut self) -> Result<()> {
        self.driver.start()?;
        let result = self.driver.probe();
        self.driver.stop();
        result
    }

    fn configure(&mut self, cell_id: u8, power_dbm: i8) -> Result<()> {
        if cell_id > 0 {
            self.driver.set_cell(cell_id)?;
        }
        if power_dbm != 0 {
            self.driver.set_power(power_dbm)?;
        }
        Ok(())
    }

    fn set_receive_callback(&mut self, cb: ReceiveCallback) {
        *self.recv_cb.write() = Some(cb);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for TpMeshTransport {
    fn drop(&mut self) {
        self.stop();
    }
}
