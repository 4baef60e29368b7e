//! BACnet object serialization.
//!
//! Two deterministic wire formats:
//!
//! - **Full**: `OBJ_ID(2,LE) | OBJ_TYPE(1) | FLAGS(1) | VALUE`, self-
//!   describing, flags preserved. FLAGS bit 7 is reserved as the
//!   incremental marker and must be clear.
//! - **Incremental**: `OBJ_ID(2,LE) | TYPE_HINT(1) | VALUE`, three bytes of
//!   overhead. TYPE_HINT bit 7 is set; the low nibble carries only the
//!   value class, so the exact object type does not survive a round trip
//!   (analog recovers as AV, binary as BV, anything else as an unknown
//!   type). Flags are not carried and parse as zero.
//!
//! Batches prefix a one-byte COUNT. Batch parsing truncates at the caller's
//! `max_count`, silently discarding trailing objects.

use crate::error::{Error, Result};
use crate::protocol::buffer::{ByteReader, ByteWriter};
use crate::types::{BacnetObject, ObjectType, PresentValue};

/// TYPE_HINT bit marking the incremental format.
pub const INCREMENTAL_FLAG: u8 = 0x80;

/// Object type recovered for incremental values of the "other" class.
pub const TYPE_UNRECOVERABLE: u8 = 0xFF;

const VALUE_ANALOG: u8 = 0x00;
const VALUE_BINARY: u8 = 0x01;
const VALUE_OTHER: u8 = 0x02;

/// Whether a leading type byte announces the incremental format.
pub const fn is_incremental(type_byte: u8) -> bool {
    type_byte & INCREMENTAL_FLAG != 0
}

/// Serialized size of one object in the full format.
pub fn serialized_size(obj: &BacnetObject) -> usize {
    4 + obj.object_type.value_size()
}

/// Serialized size of one object in the incremental format.
pub fn incremental_size(obj: &BacnetObject) -> usize {
    3 + obj.object_type.value_size()
}

fn write_value(w: &mut ByteWriter<'_>, obj: &BacnetObject) -> Result<()> {
    let ok = match obj.present_value {
        PresentValue::Analog(v) => w.write_f32(v),
        PresentValue::Binary(v) => w.write_u8(v),
        PresentValue::Raw(ref v) => w.write_bytes(v),
    };
    if ok {
        Ok(())
    } else {
        Err(Error::NoMemory)
    }
}

fn check_encodable(obj: &BacnetObject) -> Result<()> {
    if !obj.is_consistent() {
        return Err(Error::InvalidParam);
    }
    Ok(())
}

/// Serialize one object in the full format. Returns bytes written.
pub fn serialize(obj: &BacnetObject, out: &mut [u8]) -> Result<usize> {
    check_encodable(obj)?;
    if obj.flags & INCREMENTAL_FLAG != 0 {
        return Err(Error::InvalidParam);
    }

    let mut w = ByteWriter::new(out);
    if !w.write_u16(obj.object_id)
        || !w.write_u8(obj.object_type.as_u8())
        || !w.write_u8(obj.flags)
    {
        return Err(Error::NoMemory);
    }
    write_value(&mut w, obj)?;
    Ok(w.offset())
}

/// Serialize a batch in the full format: `COUNT | obj…`.
pub fn serialize_batch(objects: &[BacnetObject], out: &mut [u8]) -> Result<usize> {
    if objects.is_empty() || objects.len() > u8::MAX as usize {
        return Err(Error::InvalidParam);
    }

    if out.is_empty() {
        return Err(Error::NoMemory);
    }
    out[0] = objects.len() as u8;
    let mut pos = 1;
    for obj in objects {
        pos += serialize(obj, &mut out[pos..])?;
    }
    Ok(pos)
}

/// Deserialize one full-format object. Returns the object and the bytes
/// consumed.
pub fn deserialize(data: &[u8]) -> Result<(BacnetObject, usize)> {
    let mut r = ByteReader::new(data);
    let object_id = r.read_u16().ok_or(Error::InvalidParam)?;
    let type_byte = r.read_u8().ok_or(Error::InvalidParam)?;
    let flags = r.read_u8().ok_or(Error::InvalidParam)?;
    let object_type = ObjectType::from_u8(type_byte);

    let present_value = read_value_for(&mut r, object_type)?;
    Ok((
        BacnetObject {
            object_id,
            object_type,
            flags,
            present_value,
        },
        r.offset(),
    ))
}

fn read_value_for(r: &mut ByteReader<'_>, object_type: ObjectType) -> Result<PresentValue> {
    if object_type.is_analog() {
        Ok(PresentValue::Analog(r.read_f32().ok_or(Error::InvalidParam)?))
    } else if object_type.is_binary() {
        Ok(PresentValue::Binary(r.read_u8().ok_or(Error::InvalidParam)?))
    } else {
        let mut raw = [0u8; 16];
        if !r.read_bytes(&mut raw) {
            return Err(Error::InvalidParam);
        }
        Ok(PresentValue::Raw(raw))
    }
}

/// Deserialize a full-format batch, truncating at `max_count`.
pub fn deserialize_batch(data: &[u8], max_count: usize) -> Result<Vec<BacnetObject>> {
    let mut r = ByteReader::new(data);
    let count = r.read_u8().ok_or(Error::InvalidParam)? as usize;
    let count = count.min(max_count);

    let mut objects = Vec::with_capacity(count);
    for _ in 0..count {
        let (obj, consumed) = deserialize(&data[r.offset()..])?;
        r.skip(consumed);
        objects.push(obj);
    }
    Ok(objects)
}

fn type_hint(object_type: ObjectType) -> u8 {
    let class = if object_type.is_analog() {
        VALUE_ANALOG
    } else if object_type.is_binary() {
        VALUE_BINARY
    } else {
        VALUE_OTHER
    };
    INCREMENTAL_FLAG | class
}

fn recover_type(hint: u8) -> ObjectType {
    match hint & 0x0F {
        VALUE_ANALOG => ObjectType::AnalogValue,
        VALUE_BINARY => ObjectType::BinaryValue,
        _ => ObjectType::Other(TYPE_UNRECOVERABLE),
    }
}

/// Serialize one object in the incremental format. Returns bytes written.
pub fn serialize_incremental(obj: &BacnetObject, out: &mut [u8]) -> Result<usize> {
    check_encodable(obj)?;

    let mut w = ByteWriter::new(out);
    if !w.write_u16(obj.object_id) || !w.write_u8(type_hint(obj.object_type)) {
        return Err(Error::NoMemory);
    }
    write_value(&mut w, obj)?;
    Ok(w.offset())
}

/// Serialize a batch in the incremental format: `COUNT | obj…`.
pub fn serialize_incremental_batch(
    objects: &[BacnetObject],
    out: &mut [u8],
) -> Result<usize> {
    if objects.is_empty() || objects.len() > u8::MAX as usize {
        return Err(Error::InvalidParam);
    }

    if out.is_empty() {
        return Err(Error::NoMemory);
    }
    out[0] = objects.len() as u8;
    let mut pos = 1;
    for obj in objects {
        pos += serialize_incremental(obj, &mut out[pos..])?;
    }
    Ok(pos)
}

/// Deserialize one incremental-format object. The exact object type is not
/// recoverable: analog values parse as AV, binary as BV, other as an
/// unknown type with the raw bytes preserved. Flags parse as zero.
pub fn deserialize_incremental(data: &[u8]) -> Result<(BacnetObject, usize)> {
    let mut r = ByteReader::new(data);
    let object_id = r.read_u16().ok_or(Error::InvalidParam)?;
    let hint = r.read_u8().ok_or(Error::InvalidParam)?;
    if !is_incremental(hint) {
        return Err(Error::InvalidParam);
    }

    let object_type = recover_type(hint);
    let present_value = read_value_for(&mut r, object_type)?;
    Ok((
        BacnetObject {
            object_id,
            object_type,
            flags: 0,
            present_value,
        },
        r.offset(),
    ))
}

/// Deserialize an incremental-format batch, truncating at `max_count`.
pub fn deserialize_incremental_batch(
    data: &[u8],
    max_count: usize,
) -> Result<Vec<BacnetObject>> {
    let mut r = ByteReader::new(data);
    let count = r.read_u8().ok_or(Error::InvalidParam)? as usize;
    let count = count.min(max_count);

    let mut objects = Vec::with_capacity(count);
    for _ in 0..count {
        let (obj, consumed) = deserialize_incremental(&data[r.offset()..])?;
        r.skip(consumed);
        objects.push(obj);
    }
    Ok(objects)
}

/// Deserialize a batched payload of either format.
///
/// Auto-detection examines the type byte of the first object (payload
/// offset 3, right after COUNT and OBJ_ID): bit 7 set means incremental.
pub fn deserialize_objects(data: &[u8], max_count: usize) -> Result<Vec<BacnetObject>> {
    if data.len() >= 4 && is_incremental(data[3]) {
        deserialize_incremental_batch(data, max_count)
    } else {
        deserialize_batch(data, max_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FLAG_CHANGED;

    #[test]
    fn full_format_layout() {
        // AI {id=0, flags=0x01, value=25.5} on the wire
        let obj = BacnetObject::analog(0, ObjectType::AnalogInput, 25.5).with_flags(FLAG_CHANGED);
        let mut buf = [0u8; 16];
        let n = serialize(&obj, &mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0xCC, 0x41]);
    }

    #[test]
    fn incremental_format_layout() {
        // Same object incrementally: TYPE_HINT=0x80 (incremental + analog)
        let obj = BacnetObject::analog(0, ObjectType::AnalogInput, 25.5).with_flags(FLAG_CHANGED);
        let mut buf = [0u8; 16];
        let n = serialize_incremental(&obj, &mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x00, 0x00, 0x80, 0x00, 0x00, 0xCC, 0x41]);
    }

    #[test]
    fn full_round_trip_preserves_everything() {
        let objs = [
            BacnetObject::analog(1, ObjectType::AnalogOutput, -3.25).with_flags(0x02),
            BacnetObject::binary(2, ObjectType::BinaryInput, 1).with_flags(0x01),
            BacnetObject::raw(3, ObjectType::Other(7), [0xAB; 16]),
        ];
        let mut buf = [0u8; 64];
        let n = serialize_batch(&objs, &mut buf).unwrap();
        let parsed = deserialize_batch(&buf[..n], 16).unwrap();
        assert_eq!(parsed.as_slice(), &objs);
    }

    #[test]
    fn incremental_round_trip_collapses_type() {
        let objs = [
            BacnetObject::analog(10, ObjectType::AnalogInput, 1.5),
            BacnetObject::binary(11, ObjectType::BinaryOutput, 0),
            BacnetObject::raw(12, ObjectType::Other(9), [1; 16]),
        ];
        let mut buf = [0u8; 64];
        let n = serialize_incremental_batch(&objs, &mut buf).unwrap();
        let parsed = deserialize_incremental_batch(&buf[..n], 16).unwrap();

        assert_eq!(parsed[0].object_type, ObjectType::AnalogValue);
        assert_eq!(parsed[0].analog_value(), Some(1.5));
        assert_eq!(parsed[1].object_type, ObjectType::BinaryValue);
        assert_eq!(parsed[1].binary_value(), Some(0));
        assert_eq!(parsed[2].object_type, ObjectType::Other(TYPE_UNRECOVERABLE));
        assert_eq!(parsed[2].present_value, PresentValue::Raw([1; 16]));
        for (p, o) in parsed.iter().zip(&objs) {
            assert_eq!(p.object_id, o.object_id);
            assert_eq!(p.flags, 0);
        }
    }

    #[test]
    fn auto_detect_picks_format() {
        let objs = [BacnetObject::analog(0, ObjectType::AnalogValue, 2.0)];
        let mut full = [0u8; 32];
        let mut incr = [0u8; 32];
        let nf = serialize_batch(&objs, &mut full).unwrap();
        let ni = serialize_incremental_batch(&objs, &mut incr).unwrap();

        assert_eq!(deserialize_objects(&full[..nf], 4).unwrap()[0].analog_value(), Some(2.0));
        assert_eq!(deserialize_objects(&incr[..ni], 4).unwrap()[0].analog_value(), Some(2.0));
    }

    #[test]
    fn batch_truncates_at_max_count() {
        let objs = [
            BacnetObject::binary(1, ObjectType::BinaryValue, 1),
            BacnetObject::binary(2, ObjectType::BinaryValue, 0),
            BacnetObject::binary(3, ObjectType::BinaryValue, 1),
        ];
        let mut buf = [0u8; 32];
        let n = serialize_batch(&objs, &mut buf).unwrap();
        let parsed = deserialize_batch(&buf[..n], 2).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].object_id, 2);
    }

    #[test]
    fn empty_batch_rejected() {
        let mut buf = [0u8; 8];
        assert_eq!(serialize_batch(&[], &mut buf), Err(Error::InvalidParam));
        assert_eq!(serialize_incremental_batch(&[], &mut buf), Err(Error::InvalidParam));
    }

    #[test]
    fn overflow_is_no_memory() {
        let obj = BacnetObject::analog(1, ObjectType::AnalogValue, 0.0);
        let mut buf = [0u8; 5];
        assert_eq!(serialize(&obj, &mut buf), Err(Error::NoMemory));
    }

    #[test]
    fn underflow_is_invalid_param() {
        let obj = BacnetObject::analog(1, ObjectType::AnalogValue, 7.0);
        let mut buf = [0u8; 16];
        let n = serialize(&obj, &mut buf).unwrap();
        assert_eq!(deserialize(&buf[..n - 1]).unwrap_err(), Error::InvalidParam);
    }

    #[test]
    fn reserved_flag_bit_rejected_on_encode() {
        let obj = BacnetObject::analog(1, ObjectType::AnalogValue, 7.0).with_flags(0x80);
        let mut buf = [0u8; 16];
        assert_eq!(serialize(&obj, &mut buf), Err(Error::InvalidParam));
    }

    #[test]
    fn inconsistent_value_rejected() {
        let obj = BacnetObject {
            object_id: 1,
            object_type: ObjectType::AnalogValue,
            flags: 0,
            present_value: PresentValue::Binary(1),
        };
        let mut buf = [0u8; 16];
        assert_eq!(serialize(&obj, &mut buf), Err(Error::InvalidParam));
    }
}
