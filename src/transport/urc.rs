//! URC (Unsolicited Result Code) line parser for the TPMesh module.
//!
//! URCs are ASCII lines starting with `+`, emitted by the module outside of
//! command/response. Addresses are 4-digit uppercase hex, RSSI is decimal
//! (possibly negative), payload data is uppercase hex with exactly
//! `2 * LEN` digits. Lines that start with `+` but match no known shape
//! parse as [`Urc::Unknown`] carrying the raw text.

/// Result of a previously queued `AT+SEND`, delivered via `+SEND:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    HandleOk,
    HandleError,
    Prepare,
    SendOk,
    SendError,
    Joining,
    RouteFull,
}

impl SendResult {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "HANDLE OK" => Some(Self::HandleOk),
            "HANDLE ERROR" => Some(Self::HandleError),
            "PREPARE" => Some(Self::Prepare),
            "SEND OK" => Some(Self::SendOk),
            "SEND ERROR" => Some(Self::SendError),
            "JOINING" => Some(Self::Joining),
            "ROUTE FULL" => Some(Self::RouteFull),
            _ => None,
        }
    }
}

/// Mesh route table change reported via `+ROUTE:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteEvent {
    Create,
    Delete,
}

/// A parsed unsolicited line from the module.
#[derive(Debug, Clone, PartialEq)]
pub enum Urc {
    /// Inbound mesh data: the payload is a complete X-Slot frame.
    Nnmi {
        src: u16,
        dest: u16,
        rssi: i16,
        data: Vec<u8>,
    },
    /// Progress of a queued send.
    Send { sn: u32, result: SendResult },
    /// Route created or deleted for a node address.
    Route { event: RouteEvent, addr: u16 },
    /// Delivery confirmation for an acked send.
    Ack { src: u16, rssi: i16, sn: u32 },
    /// Flood frame observed; payload shape is module-defined.
    Flood(String),
    /// Module rebooted.
    Boot,
    /// Module AT interface is ready.
    Ready,
    /// Module suspended reception.
    Suspend,
    /// Module resumed reception.
    Resume,
    /// Unrecognized `+` line, raw text preserved.
    Unknown(String),
}

/// Parse one stripped line. Returns `None` when the line is not a URC
/// (does not start with `+`).
pub fn parse(line: &str) -> Option<Urc> {
    let line = line.trim_end();
    if !line.starts_with('+') {
        return None;
    }

    let urc = if let Some(rest) = line.strip_prefix("+NNMI:") {
        parse_nnmi(rest)
    } else if let Some(rest) = line.strip_prefix("+SEND:") {
        parse_send(rest)
    } else if let Some(rest) = line.strip_prefix("+ROUTE:") {
        parse_route(rest)
    } else if let Some(rest) = line.strip_prefix("+ACK:") {
        parse_ack(rest)
    } else if let Some(rest) = line.strip_prefix("+FLOOD:") {
        Some(Urc::Flood(rest.to_string()))
    } else if line == "+BOOT" {
        Some(Urc::Boot)
    } else if line == "+READY" {
        Some(Urc::Ready)
    } else if line == "+SUSPEND" {
        Some(Urc::Suspend)
    } else if line == "+RESUME" {
        Some(Urc::Resume)
    } else {
        None
    };

    Some(urc.unwrap_or_else(|| Urc::Unknown(line.to_string())))
}

fn parse_hex_u16(s: &str) -> Option<u16> {
    u16::from_str_radix(s, 16).ok()
}

/// `<SRC_HEX>,<DEST_HEX>,<RSSI_DEC>,<LEN_DEC>,<DATA_HEX>`
fn parse_nnmi(rest: &str) -> Option<Urc> {
    let mut parts = rest.splitn(5, ',');
    let src = parse_hex_u16(parts.next()?)?;
    let dest = parse_hex_u16(parts.next()?)?;
    let rssi: i16 = parts.next()?.parse().ok()?;
    let len: usize = parts.next()?.parse().ok()?;
    let hex = parts.next()?;

    if hex.len() != len * 2 {
        return None;
    }
    let data = decode_hex(hex)?;
    Some(Urc::Nnmi {
        src,
        dest,
        rssi,
        data,
    })
}

/// `<SN_DEC>,<RESULT_STRING>`
fn parse_send(rest: &str) -> Option<Urc> {
    let (sn, result) = rest.split_once(',')?;
    let sn: u32 = sn.parse().ok()?;
    let result = SendResult::parse(result.trim())?;
    Some(Urc::Send { sn, result })
}

/// `CREATE ADDR[0xXXXX]` or `DELETE ADDR[0xXXXX]`
fn parse_route(rest: &str) -> Option<Urc> {
    let (event, tail) = if let Some(tail) = rest.strip_prefix("CREATE ") {
        (RouteEvent::Create, tail)
    } else if let Some(tail) = rest.strip_prefix("DELETE ") {
        (RouteEvent::Delete, tail)
    } else {
        return None;
    };
    let addr = tail
        .strip_prefix("ADDR[0x")
        .and_then(|t| t.strip_suffix(']'))
        .and_then(parse_hex_u16)?;
    Some(Urc::Route { event, addr })
}

/// `<SRC_HEX>,<RSSI_DEC>,<SN_DEC>`
fn parse_ack(rest: &str) -> Option<Urc> {
    let mut parts = rest.splitn(3, ',');
    let src = parse_hex_u16(parts.next()?)?;
    let rssi: i16 = parts.next()?.parse().ok()?;
    let sn: u32 = parts.next()?.parse().ok()?;
    Some(Urc::Ack { src, rssi, sn })
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for i in (0..hex.len()).step_by(2) {
        out.push(u8::from_str_radix(hex.get(i..i + 2)?, 16).ok()?);
    }
    Some(out)
}
