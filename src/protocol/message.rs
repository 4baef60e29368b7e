//! Message layer: one builder and one parser per protocol command.
//!
//! Builders fill a [`Frame`] with the command's payload layout; parsers are
//! symmetric and reject frames whose command byte does not match. A REPORT
//! payload is parsed with automatic full/incremental format detection.

use crate::error::{Error, Result};
use crate::protocol::bacnet;
use crate::protocol::buffer::{ByteReader, ByteWriter};
use crate::protocol::frame::{Command, Frame};
use crate::protocol::MAX_DATA_LEN;
use crate::types::BacnetObject;

/// Status byte of a successful WRITE_ACK. Nonzero values are reserved.
pub const WRITE_ACK_OK: u8 = 0;

/// Wire format selection for REPORT payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// Compact format without flags; the default for reports.
    #[default]
    Incremental,
    /// Self-describing format with flags.
    Full,
}

/// Build a PING frame (empty payload).
pub fn build_ping(from: u16, to: u16, seq: u8) -> Frame {
    Frame::new(from, to, seq, Command::Ping)
}

/// Build a PONG frame (empty payload).
pub fn build_pong(from: u16, to: u16, seq: u8) -> Frame {
    Frame::new(from, to, seq, Command::Pong)
}

/// Build a REPORT frame carrying a batch of objects.
pub fn build_report(
    from: u16,
    to: u16,
    seq: u8,
    objects: &[BacnetObject],
    format: ReportFormat,
) -> Result<Frame> {
    if objects.is_empty() {
        return Err(Error::InvalidParam);
    }

    let mut frame = Frame::new(from, to, seq, Command::Report);
    let len = match format {
        ReportFormat::Incremental => {
            bacnet::serialize_incremental_batch(objects, frame.payload_mut())?
        }
        ReportFormat::Full => bacnet::serialize_batch(objects, frame.payload_mut())?,
    };
    frame.set_len(len);
    Ok(frame)
}

/// Build a QUERY frame: `COUNT(1) | OBJ_ID(2,LE)…`.
pub fn build_query(from: u16, to: u16, seq: u8, object_ids: &[u16]) -> Result<Frame> {
    if object_ids.is_empty() {
        return Err(Error::InvalidParam);
    }
    if 1 + object_ids.len() * 2 > MAX_DATA_LEN {
        return Err(Error::NoMemory);
    }

    let mut frame = Frame::new(from, to, seq, Command::Query);
    let mut w = ByteWriter::new(frame.payload_mut());
    w.write_u8(object_ids.len() as u8);
    for &id in object_ids {
        w.write_u16(id);
    }
    let len = w.offset();
    frame.set_len(len);
    Ok(frame)
}

/// Build a RESPONSE frame: full-format batch.
pub fn build_response(
    from: u16,
    to: u16,
    seq: u8,
    objects: &[BacnetObject],
) -> Result<Frame> {
    if objects.is_empty() {
        return Err(Error::InvalidParam);
    }

    let mut frame = Frame::new(from, to, seq, Command::Response);
    let len = bacnet::serialize_batch(objects, frame.payload_mut())?;
    frame.set_len(len);
    Ok(frame)
}

/// Build a WRITE frame: one full-format object.
pub fn build_write(from: u16, to: u16, seq: u8, obj: &BacnetObject) -> Result<Frame> {
    let mut frame = Frame::new(from, to, seq, Command::Write);
    let len = bacnet::serialize(obj, frame.payload_mut())?;
    frame.set_len(len);
    Ok(frame)
}

/// Build a WRITE_ACK frame with a single status byte.
pub fn build_write_ack(from: u16, to: u16, seq: u8, status: u8) -> Frame {
    let mut frame = Frame::new(from, to, seq, Command::WriteAck);
    let mut w = ByteWriter::new(frame.payload_mut());
    w.write_u8(status);
    frame.set_len(1);
    frame
}

/// Parse a REPORT payload, auto-detecting the wire format.
pub fn parse_report(frame: &Frame, max_count: usize) -> Result<Vec<BacnetObject>> {
    if frame.command() != Some(Command::Report) {
        return Err(Error::InvalidParam);
    }
    if frame.data().is_empty() {
        return Err(Error::InvalidParam);
    }
    bacnet::deserialize_objects(frame.data(), max_count)
}

/// Parse a RESPONSE payload (always full format).
pub fn parse_response(frame: &Frame, max_count: usize) -> Result<Vec<BacnetObject>> {
    if frame.command() != Some(Command::Response) {
        return Err(Error::InvalidParam);
    }
    bacnet::deserialize_batch(frame.data(), max_count)
}

/// Parse a QUERY payload into the requested object IDs, truncating at
/// `max_count`.
pub fn parse_query(frame: &Frame, max_count: usize) -> Result<Vec<u16>> {
    if frame.command() != Some(Command::Query) {
        return Err(Error::InvalidParam);
    }

    let data = frame.data();
    let mut r = ByteReader::new(data);
    let count = r.read_u8().ok_or(Error::InvalidParam)? as usize;
    let count = count.min(max_count);

    if data.len() < 1 + count * 2 {
        return Err(Error::InvalidParam);
    }

    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        ids.push(r.read_u16().ok_or(Error::InvalidParam)?);
    }
    Ok(ids)
}

/// Parse a WRITE payload into the single object it carries.
pub fn parse_write(frame: &Frame) -> Result<BacnetObject> {
    if frame.command() != Some(Command::Write) {
        return Err(Error::InvalidParam);
    }
    let (obj, _) = bacnet::deserialize(frame.data())?;
    Ok(obj)
}

/// Parse a WRITE_ACK payload into its status byte.
pub fn parse_write_ack(frame: &Frame) -> Result<u8> {
    if frame.command() != Some(Command::WriteAck) {
        return Err(Error::InvalidParam);
    }
    frame.data().first().copied().ok_or(Error::InvalidParam)
}
