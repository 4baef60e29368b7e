//! Error types for X-Slot.
//!
//! The taxonomy is closed: every fallible operation in the crate returns
//! exactly one of these kinds. Each kind maps to a stable numeric code that
//! is part of the wire-facing host contract and must never change.

use thiserror::Error;

/// Result type alias for X-Slot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for X-Slot.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Invalid argument or malformed data above the frame layer.
    #[error("invalid parameter")]
    InvalidParam,

    /// A blocking operation did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// Frame checksum mismatch.
    #[error("CRC check failed")]
    Crc,

    /// Output buffer too small for the encoded result.
    #[error("insufficient buffer space")]
    NoMemory,

    /// A command is already in flight.
    #[error("device busy")]
    Busy,

    /// Target node is not online.
    #[error("node offline")]
    Offline,

    /// No usable device on the configured serial port.
    #[error("no device detected")]
    NoDevice,

    /// Operation attempted before `start()` succeeded.
    #[error("not initialized")]
    NotInitialized,

    /// The transport failed to put bytes on the wire.
    #[error("send failed")]
    SendFailed,
}

impl Error {
    /// Stable numeric code for the host contract.
    pub const fn code(self) -> i32 {
        match self {
            Self::InvalidParam => -1,
            Self::Timeout => -2,
            Self::Crc => -3,
            Self::NoMemory => -4,
            Self::Busy => -5,
            Self::Offline => -6,
            Self::NoDevice => -7,
            Self::NotInitialized => -8,
            Self::SendFailed => -9,
        }
    }

    /// Map a numeric code back to an error kind. `0` and unknown codes
    /// return `None` (`0` is success and has no error value).
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(Self::InvalidParam),
            -2 => Some(Self::Timeout),
            -3 => Some(Self::Crc),
            -4 => Some(Self::NoMemory),
            -5 => Some(Self::Busy),
            -6 => Some(Self::Offline),
            -7 => Some(Self::NoDevice),
            -8 => Some(Self::NotInitialized),
            -9 => Some(Self::SendFailed),
            _ => None,
        }
    }

    /// Human-readable description for a numeric code (`strerror` analog).
    pub fn describe(code: i32) -> &'static str {
        match code {
            0 => "ok",
            -1 => "invalid parameter",
            -2 => "operation timed out",
            -3 => "CRC check failed",
            -4 => "insufficient buffer space",
            -5 => "device busy",
            -6 => "node offline",
            -7 => "no device detected",
            -8 => "not initialized",
            -9 => "send failed",
            _ => "unknown error",
        }
    }
}
