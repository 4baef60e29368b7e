//! X-Slot frame structure and codec.
//!
//! Wire layout: `SYNC(1)=0xAA | FROM(2,LE) | TO(2,LE) | SEQ(1) | CMD(1) |
//! LEN(1) | DATA(LEN) | CRC16(2,LE)`, CRC computed over header + payload.

use crate::error::{Error, Result};
use crate::protocol::buffer::{ByteReader, ByteWriter};
use crate::protocol::{crc16, CRC_SIZE, HEADER_SIZE, MAX_DATA_LEN, MIN_FRAME_SIZE, SYNC_BYTE};

/// Command identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Keep-alive request.
    Ping = 0x01,
    /// Keep-alive response.
    Pong = 0x02,
    /// Object report (edge → hub).
    Report = 0x10,
    /// Object query (HMI → hub).
    Query = 0x11,
    /// Query response (hub → HMI).
    Response = 0x12,
    /// Remote write (hub → edge).
    Write = 0x20,
    /// Write acknowledgment (edge → hub).
    WriteAck = 0x21,
}

impl Command {
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Ping),
            0x02 => Some(Self::Pong),
            0x10 => Some(Self::Report),
            0x11 => Some(Self::Query),
            0x12 => Some(Self::Response),
            0x20 => Some(Self::Write),
            0x21 => Some(Self::WriteAck),
            _ => None,
        }
    }
}

/// A decoded (or to-be-encoded) protocol frame.
///
/// The sync byte is implied and the CRC is computed at encode time, so the
/// struct only carries addressing, sequencing, command, and payload.
#[derive(Clone, Copy)]
pub struct Frame {
    from: u16,
    to: u16,
    seq: u8,
    cmd: u8,
    len: u8,
    data: [u8; MAX_DATA_LEN],
}

impl Frame {
    /// Create an empty frame with the given addressing and command.
    pub fn new(from: u16, to: u16, seq: u8, cmd: Command) -> Self {
        Self {
            from,
            to,
            seq,
            cmd: cmd as u8,
            len: 0,
            data: [0; MAX_DATA_LEN],
        }
    }

    pub fn from(&self) -> u16 {
        self.from
    }

    pub fn to(&self) -> u16 {
        self.to
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }

    /// Raw command byte as received.
    pub fn cmd(&self) -> u8 {
        self.cmd
    }

    /// Typed command, if the byte maps to a known one.
    pub fn command(&self) -> Option<Command> {
        Command::from_u8(self.cmd)
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Replace the payload. Fails with `NoMemory` past 128 bytes.
    pub fn set_data(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_DATA_LEN {
            return Err(Error::NoMemory);
        }
        self.data[..payload.len()].copy_from_slice(payload);
        self.len = payload.len() as u8;
        Ok(())
    }

    /// Set the payload length after writing through `payload_mut`.
    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len.min(MAX_DATA_LEN) as u8;
    }

    /// Full payload buffer for in-place serialization.
    pub(crate) fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Total encoded size of this frame.
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.len as usize + CRC_SIZE
    }

    /// Encode into `out`, returning the number of bytes written.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize> {
        let total = self.total_size();
        if out.len() < total {
            return Err(Error::NoMemory);
        }

        let mut w = ByteWriter::new(out);
        w.write_u8(SYNC_BYTE);
        w.write_u16(self.from);
        w.write_u16(self.to);
        w.write_u8(self.seq);
        w.write_u8(self.cmd);
        w.write_u8(self.len);
        w.write_bytes(self.data());

        let crc = crc16(&out[..HEADER_SIZE + self.len as usize]);
        let mut w = ByteWriter::new(&mut out[HEADER_SIZE + self.len as usize..]);
        w.write_u16(crc);

        Ok(total)
    }

    /// Decode and validate a frame from `bytes`.
    ///
    /// Structural problems (short buffer, bad sync, LEN > 128) return
    /// `InvalidParam`; a checksum mismatch returns `Crc`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MIN_FRAME_SIZE {
            return Err(Error::InvalidParam);
        }

        let mut r = ByteReader::new(bytes);
        let sync = r.read_u8().ok_or(Error::InvalidParam)?;
        if sync != SYNC_BYTE {
            return Err(Error::InvalidParam);
        }

        let from = r.read_u16().ok_or(Error::InvalidParam)?;
        let to = r.read_u16().ok_or(Error::InvalidParam)?;
        let seq = r.read_u8().ok_or(Error::InvalidParam)?;
        let cmd = r.read_u8().ok_or(Error::InvalidParam)?;
        let len = r.read_u8().ok_or(Error::InvalidParam)?;

        if len as usize > MAX_DATA_LEN {
            return Err(Error::InvalidParam);
        }
        if bytes.len() < HEADER_SIZE + len as usize + CRC_SIZE {
            return Err(Error::InvalidParam);
        }

        let mut data = [0u8; MAX_DATA_LEN];
        if !r.read_bytes(&mut data[..len as usize]) {
            return Err(Error::InvalidParam);
        }

        let crc = r.read_u16().ok_or(Error::InvalidParam)?;
        if crc != crc16(&bytes[..HEADER_SIZE + len as usize]) {
            return Err(Error::Crc);
        }

        Ok(Self {
            from,
            to,
            seq,
            cmd,
            len,
            data,
        })
    }

    /// Standalone predicate: does `bytes` hold one structurally valid frame
    /// with a matching CRC?
    pub fn verify_crc(bytes: &[u8]) -> bool {
        if bytes.len() < MIN_FRAME_SIZE {
            return false;
        }
        if bytes[0] != SYNC_BYTE {
            return false;
        }
        let len = bytes[super::OFFSET_LEN] as usize;
        if len > MAX_DATA_LEN {
            return false;
        }
        if bytes.len() < HEADER_SIZE + len + CRC_SIZE {
            return false;
        }
        let stored = u16::from(bytes[HEADER_SIZE + len])
            | (u16::from(bytes[HEADER_SIZE + len + 1]) << 8);
        crc16(&bytes[..HEADER_SIZE + len]) == stored
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from
            && self.to == other.to
            && self.seq == other.seq
            && self.cmd == other.cmd
            && self.data() == other.data()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("from", &format_args!("0x{:04X}", self.from))
            .field("to", &format_args!("0x{:04X}", self.to))
            .field("seq", &self.seq)
            .field("cmd", &format_args!("0x{:02X}", self.cmd))
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_FRAME_SIZE;

    #[test]
    fn encode_decode_round_trip() {
        let mut frame = Frame::new(0xFFBE, 0xFFFE, 42, Command::Report);
        frame.set_data(&[1, 2, 3, 4, 5]).unwrap();

        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = frame.encode(&mut buf).unwrap();
        assert_eq!(n, 15);

        let decoded = Frame::decode(&buf[..n]).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.command(), Some(Command::Report));
    }

    #[test]
    fn rejects_bad_sync() {
        let frame = Frame::new(1, 2, 0, Command::Ping);
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = frame.encode(&mut buf).unwrap();
        buf[0] = 0x55;
        assert_eq!(Frame::decode(&buf[..n]), Err(Error::InvalidParam));
    }

    #[test]
    fn rejects_corrupted_crc() {
        let frame = Frame::new(1, 2, 0, Command::Ping);
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = frame.encode(&mut buf).unwrap();
        buf[n - 1] ^= 0xFF;
        assert_eq!(Frame::decode(&buf[..n]), Err(Error::Crc));
        assert!(!Frame::verify_crc(&buf[..n]));
    }

    #[test]
    fn payload_limit() {
        let mut frame = Frame::new(1, 2, 0, Command::Report);
        assert!(frame.set_data(&[0u8; MAX_DATA_LEN]).is_ok());
        assert_eq!(frame.set_data(&[0u8; MAX_DATA_LEN + 1]), Err(Error::NoMemory));
    }

    #[test]
    fn short_buffer_is_structural_error() {
        assert_eq!(Frame::decode(&[0xAA; 9]), Err(Error::InvalidParam));
    }
}
