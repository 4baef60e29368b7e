//! Transport layer for X-Slot.
//!
//! Three implementations behind one interface: TPMesh (AT-command wireless
//! module), Direct (raw frames over UART, for HMI links), and Null (no
//! device present). The session owns exactly one transport at a time.

mod at;
mod direct;
mod null;
mod tpmesh;
mod urc;

pub use at::{AddressInfo, AtDriver, SendType, UrcCallback, DEFAULT_TIMEOUT};
pub use direct::{DirectTransport, Reframer};
pub use null::NullTransport;
pub use tpmesh::TpMeshTransport;
pub use urc::{RouteEvent, SendResult, Urc};

use std::sync::Arc;

use crate::error::Result;

/// Callback invoked with each complete received frame (raw bytes,
/// header through CRC). Runs on the transport's reader thread and must not
/// block on host calls.
pub type ReceiveCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Common capability set of all transports.
pub trait Transport: Send + Sync {
    /// Open the device and begin receiving.
    fn start(&mut self) -> Result<()>;

    /// Stop receiving and release the device. Idempotent.
    fn stop(&mut self);

    /// Transmit one encoded frame.
    fn send(&self, frame: &[u8]) -> Result<()>;

    /// Check whether a matching device answers on the configured port.
    fn probe(&mut self) -> Result<()>;

    /// Apply wireless parameters at runtime (no-op where not applicable).
    fn configure(&mut self, cell_id: u8, power_dbm: i8) -> Result<()>;

    /// Install the frame delivery callback.
    fn set_receive_callback(&mut self, cb: ReceiveCallback);

    /// Whether the transport is started.
    fn is_running(&self) -> bool;
}
