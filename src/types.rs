//! Core types used throughout X-Slot.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Hub (collector) reserved address.
pub const ADDR_HUB: u16 = 0xFFFE;

/// HMI client reserved address.
pub const ADDR_HMI: u16 = 0xFF00;

/// First address of the edge-node pool.
pub const ADDR_EDGE_MIN: u16 = 0xFFBE;

/// Last address of the edge-node pool.
pub const ADDR_EDGE_MAX: u16 = 0xFFFD;

/// Broadcast address.
pub const ADDR_BROADCAST: u16 = 0x0000;

/// Maximum number of nodes tracked by the session's node table.
pub const MAX_NODES: usize = 64;

/// Run mode selected by the transport probe at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunMode {
    /// No device detected; the null transport is installed.
    #[default]
    None,
    /// TPMesh wireless module answered the AT probe.
    Wireless,
    /// Direct UART link to an HMI.
    Hmi,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Wireless => write!(f, "wireless"),
            Self::Hmi => write!(f, "hmi"),
        }
    }
}

/// BACnet object type carried on the wire.
///
/// AI/AO/AV are analog (IEEE-754 32-bit float payload), BI/BO/BV are binary
/// (single byte), anything else rides as 16 raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    Other(u8),
}

impl ObjectType {
    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::AnalogInput,
            1 => Self::AnalogOutput,
            2 => Self::AnalogValue,
            3 => Self::BinaryInput,
            4 => Self::BinaryOutput,
            5 => Self::BinaryValue,
            other => Self::Other(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::AnalogInput => 0,
            Self::AnalogOutput => 1,
            Self::AnalogValue => 2,
            Self::BinaryInput => 3,
            Self::BinaryOutput => 4,
            Self::BinaryValue => 5,
            Self::Other(other) => other,
        }
    }

    pub const fn is_analog(self) -> bool {
        matches!(self, Self::AnalogInput | Self::AnalogOutput | Self::AnalogValue)
    }

    pub const fn is_binary(self) -> bool {
        matches!(self, Self::BinaryInput | Self::BinaryOutput | Self::BinaryValue)
    }

    /// Serialized size of the present value for this type.
    pub const fn value_size(self) -> usize {
        if self.is_analog() {
            4
        } else if self.is_binary() {
            1
        } else {
            16
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnalogInput => write!(f, "AI"),
            Self::AnalogOutput => write!(f, "AO"),
            Self::AnalogValue => write!(f, "AV"),
            Self::BinaryInput => write!(f, "BI"),
            Self::BinaryOutput => write!(f, "BO"),
            Self::BinaryValue => write!(f, "BV"),
            Self::Other(v) => write!(f, "OBJ({v})"),
        }
    }
}

/// Object flag: present value changed since last report.
pub const FLAG_CHANGED: u8 = 0x01;

/// Object flag: object is out of service.
pub const FLAG_OUT_OF_SERVICE: u8 = 0x02;

/// Present value of a BACnet object. The variant is fixed by the object
/// type; a mismatch is rejected at serialization time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresentValue {
    Analog(f32),
    Binary(u8),
    Raw([u8; 16]),
}

/// A BACnet object value as exchanged between nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BacnetObject {
    /// Object instance number.
    pub object_id: u16,
    /// Object type.
    pub object_type: ObjectType,
    /// Flag bitmask (`FLAG_CHANGED`, `FLAG_OUT_OF_SERVICE`). Bit 7 is
    /// reserved as the incremental-format marker and must stay clear.
    pub flags: u8,
    /// Present value; variant fixed by `object_type`.
    pub present_value: PresentValue,
}

impl BacnetObject {
    /// Create an analog object (AI/AO/AV).
    pub fn analog(object_id: u16, object_type: ObjectType, value: f32) -> Self {
        Self {
            object_id,
            object_type,
            flags: 0,
            present_value: PresentValue::Analog(value),
        }
    }

    /// Create a binary object (BI/BO/BV). Nonzero values normalize to 1.
    pub fn binary(object_id: u16, object_type: ObjectType, value: u8) -> Self {
        Self {
            object_id,
            object_type,
            flags: 0,
            present_value: PresentValue::Binary(u8::from(value != 0)),
        }
    }

    /// Create an object of a non-standard type carrying 16 raw bytes.
    pub fn raw(object_id: u16, object_type: ObjectType, value: [u8; 16]) -> Self {
        Self {
            object_id,
            object_type,
            flags: 0,
            present_value: PresentValue::Raw(value),
        }
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// The analog value, if this object carries one.
    pub fn analog_value(&self) -> Option<f32> {
        match self.present_value {
            PresentValue::Analog(v) => Some(v),
            _ => None,
        }
    }

    /// The binary value, if this object carries one.
    pub fn binary_value(&self) -> Option<u8> {
        match self.present_value {
            PresentValue::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// Whether the present-value variant matches the object type.
    pub fn is_consistent(&self) -> bool {
        match self.present_value {
            PresentValue::Analog(_) => self.object_type.is_analog(),
            PresentValue::Binary(_) => self.object_type.is_binary(),
            PresentValue::Raw(_) => {
                !self.object_type.is_analog() && !self.object_type.is_binary()
            }
        }
    }
}

/// Snapshot of one node-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node address.
    pub addr: u16,
    /// Monotonic timestamp of the last received frame, in milliseconds.
    pub last_seen_ms: u64,
    /// Signal strength of the last reception, dBm.
    pub rssi: i8,
    /// Online flag; flips to false only via the timeout sweep.
    pub online: bool,
    /// Number of objects in the node's last report.
    pub object_count: u8,
}

/// Raw-data upcall: QUERY/RESPONSE payload delivered to the host.
pub type DataCallback = Arc<dyn Fn(u16, &[u8]) + Send + Sync>;

/// Node status upcall: fired on first contact, re-online, and offline sweep.
pub type NodeStatusCallback = Arc<dyn Fn(u16, bool) + Send + Sync>;

/// Write-request upcall: a remote node wrote one of our objects.
pub type WriteCallback = Arc<dyn Fn(u16, &BacnetObject) + Send + Sync>;

/// Report upcall: a remote node reported a batch of objects.
pub type ReportCallback = Arc<dyn Fn(u16, &[BacnetObject]) + Send + Sync>;
