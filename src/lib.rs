//! # X-Slot
//!
//! Wireless interconnect SDK for DDC (Direct Digital Controller) building
//! automation nodes. X-Slot exchanges BACnet object values over a low-power
//! wireless mesh (a TPMesh module driven by AT commands over a UART) or over
//! a direct UART link to a local HMI.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Host DDC Application                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │             Session Manager (probe / dispatch)              │
//! │        ┌──────────────┐        ┌──────────────────┐         │
//! │        │  Node Table  │        │ Message Builders │         │
//! │        └──────────────┘        └──────────────────┘         │
//! ├─────────────────────────────────────────────────────────────┤
//! │              Frame Codec / BACnet Object Codec              │
//! ├─────────────────────────────────────────────────────────────┤
//! │      Transport (TPMesh AT driver / Direct UART / Null)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  HAL (serial port, clock)                   │
//! └─────────────────────────────────────────────────────────────┘
//!
//! A node runs in one of three roles, selected at `start()` by probing the
//! serial port: **edge** nodes report sensor/actuator objects to the hub,
//! the **hub** collects reports and issues remote writes, and an **HMI**
//! client queries and controls objects over a direct UART.

#![warn(clippy::all)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)] // Lengths are bounded by frame limits
#![allow(clippy::match_same_arms)] // Explicit arm per command is clearer

pub mod config;
pub mod error;
pub mod hal;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

pub use config::{Config, PowerMode};
pub use error::{Error, Result};
pub use session::Session;
pub use types::*;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{Config, PowerMode};
    pub use crate::error::{Error, Result};
    pub use crate::protocol::bacnet;
    pub use crate::protocol::frame::{Command, Frame};
    pub use crate::session::Session;
    pub use crate::types::*;
}
