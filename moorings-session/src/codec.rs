//! Binary codec for session items.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! i32               item count
//! -- only when count > 0 --
//! i32               index of the item with a null name, -1 for none
//! count × string    item names (7-bit encoded length, UTF-8 bytes)
//! count × i32       end offset of each value, relative to the value table
//! value table       per value: one type tag, then its payload
//! ```
//!
//! The format is shared with existing deployments and must not change.

use chrono::{DateTime, Utc};

use crate::error::{SessionError, SessionResult};
use crate::items::{SessionItems, SessionValue};
use crate::ticks;
use uuid::Uuid;

const NO_NULL_NAME: i32 = -1;

/// Type tag preceding each value payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum TypeTag {
    String = 1,
    Int32 = 2,
    Boolean = 3,
    DateTime = 4,
    Decimal = 5,
    Byte = 6,
    Char = 7,
    Single = 8,
    Double = 9,
    SByte = 10,
    Int16 = 11,
    Int64 = 12,
    UInt16 = 13,
    UInt32 = 14,
    UInt64 = 15,
    TimeSpan = 16,
    Guid = 17,
    Object = 20,
    Null = 21,
}

impl TypeTag {
    fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::String,
            2 => Self::Int32,
            3 => Self::Boolean,
            4 => Self::DateTime,
            5 => Self::Decimal,
            6 => Self::Byte,
            7 => Self::Char,
            8 => Self::Single,
            9 => Self::Double,
            10 => Self::SByte,
            11 => Self::Int16,
            12 => Self::Int64,
            13 => Self::UInt16,
            14 => Self::UInt32,
            15 => Self::UInt64,
            16 => Self::TimeSpan,
            17 => Self::Guid,
            20 => Self::Object,
            21 => Self::Null,
            _ => return None,
        })
    }

    fn of(value: &SessionValue) -> Self {
        match value {
            SessionValue::String(_) => Self::String,
            SessionValue::Int32(_) => Self::Int32,
            SessionValue::Boolean(_) => Self::Boolean,
            SessionValue::DateTime(_) => Self::DateTime,
            SessionValue::Decimal(_) => Self::Decimal,
            SessionValue::Byte(_) => Self::Byte,
            SessionValue::Char(_) => Self::Char,
            SessionValue::Single(_) => Self::Single,
            SessionValue::Double(_) => Self::Double,
            SessionValue::SByte(_) => Self::SByte,
            SessionValue::Int16(_) => Self::Int16,
            SessionValue::Int64(_) => Self::Int64,
            SessionValue::UInt16(_) => Self::UInt16,
            SessionValue::UInt32(_) => Self::UInt32,
            SessionValue::UInt64(_) => Self::UInt64,
            SessionValue::TimeSpan(_) => Self::TimeSpan,
            SessionValue::Guid(_) => Self::Guid,
            SessionValue::Object(_) => Self::Object,
            SessionValue::Null => Self::Null,
        }
    }
}

/// Encode items into the binary format. An empty collection encodes as a
/// bare zero count.
pub fn encode_items(items: &SessionItems) -> SessionResult<Vec<u8>> {
    let count = to_i32(items.len(), "item count")?;
    let mut out = Vec::new();
    out.extend_from_slice(&count.to_le_bytes());
    if count == 0 {
        return Ok(out);
    }

    out.extend_from_slice(&NO_NULL_NAME.to_le_bytes());
    for name in items.names() {
        write_string(&mut out, name)?;
    }

    let mut table = Vec::new();
    let mut offsets = Vec::with_capacity(items.len());
    for (_, value) in items.iter() {
        write_value(&mut table, value)?;
        offsets.push(to_i32(table.len(), "value table")?);
    }

    for offset in offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out.extend_from_slice(&table);
    Ok(out)
}

/// Decode items from the binary format. Zero-length input is an empty
/// collection; anything malformed is a [`SessionError::CorruptRecord`].
pub fn decode_items(bytes: &[u8]) -> SessionResult<SessionItems> {
    let mut items = SessionItems::new();
    if bytes.is_empty() {
        return Ok(items);
    }

    let mut reader = Reader::new(bytes);
    let count = reader.read_i32()?;
    if count < 0 {
        return Err(SessionError::corrupt(format!("negative item count {count}")));
    }
    if count == 0 {
        return reader.finish().map(|_| items);
    }

    let null_name = reader.read_i32()?;
    if null_name != NO_NULL_NAME {
        return Err(SessionError::corrupt(format!(
            "item {null_name} has a null name"
        )));
    }

    let mut names = Vec::new();
    for _ in 0..count {
        names.push(reader.read_string()?);
    }
    let mut offsets = Vec::with_capacity(names.len());
    for _ in 0..count {
        offsets.push(reader.read_i32()?);
    }

    let table = reader.rest();
    let mut start = 0usize;
    for (name, end) in names.into_iter().zip(offsets) {
        let end = usize::try_from(end)
            .ok()
            .filter(|end| *end >= start && *end <= table.len())
            .ok_or_else(|| {
                SessionError::corrupt(format!("value offset {end} for '{name}' out of bounds"))
            })?;
        let value = read_value(&table[start..end])
            .map_err(|e| SessionError::corrupt(format!("item '{name}': {e}")))?;
        items.insert(name, value);
        start = end;
    }
    if start != table.len() {
        return Err(SessionError::corrupt(format!(
            "{} trailing bytes after value table",
            table.len() - start
        )));
    }
    Ok(items)
}

fn to_i32(len: usize, what: &str) -> SessionResult<i32> {
    i32::try_from(len).map_err(|_| SessionError::Serialization(format!("{what} too large: {len}")))
}

/// Tick count of `instant`; instants the format cannot hold are rejected
/// before anything is written.
pub(crate) fn date_ticks(instant: &DateTime<Utc>) -> SessionResult<i64> {
    ticks::to_ticks(instant)
        .ok_or_else(|| SessionError::Serialization(format!("date {instant} out of range")))
}

fn write_7bit(out: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn write_string(out: &mut Vec<u8>, s: &str) -> SessionResult<()> {
    let len = to_i32(s.len(), "string")?;
    write_7bit(out, len as u32);
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_value(out: &mut Vec<u8>, value: &SessionValue) -> SessionResult<()> {
    out.push(TypeTag::of(value) as u8);
    match value {
        SessionValue::String(s) => write_string(out, s)?,
        SessionValue::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
        SessionValue::Boolean(v) => out.push(u8::from(*v)),
        SessionValue::DateTime(v) => out.extend_from_slice(&date_ticks(v)?.to_le_bytes()),
        SessionValue::Decimal(raw) => out.extend_from_slice(raw),
        SessionValue::Byte(v) => out.push(*v),
        SessionValue::Char(c) => {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
        SessionValue::Single(v) => out.extend_from_slice(&v.to_le_bytes()),
        SessionValue::Double(v) => out.extend_from_slice(&v.to_le_bytes()),
        SessionValue::SByte(v) => out.extend_from_slice(&v.to_le_bytes()),
        SessionValue::Int16(v) => out.extend_from_slice(&v.to_le_bytes()),
        SessionValue::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
        SessionValue::UInt16(v) => out.extend_from_slice(&v.to_le_bytes()),
        SessionValue::UInt32(v) => out.extend_from_slice(&v.to_le_bytes()),
        SessionValue::UInt64(v) => out.extend_from_slice(&v.to_le_bytes()),
        SessionValue::TimeSpan(span) => {
            let ticks = ticks::span_to_ticks(span).ok_or_else(|| {
                SessionError::Serialization(format!("time span {span} out of range"))
            })?;
            out.extend_from_slice(&ticks.to_le_bytes());
        }
        SessionValue::Guid(id) => out.extend_from_slice(&id.to_bytes_le()),
        SessionValue::Object(bytes) => out.extend_from_slice(bytes),
        SessionValue::Null => {}
    }
    Ok(())
}

/// Decode one value slot; the payload must fill the slot exactly.
fn read_value(slot: &[u8]) -> SessionResult<SessionValue> {
    let (&tag, payload) = slot
        .split_first()
        .ok_or_else(|| SessionError::corrupt("empty value slot"))?;
    let tag = TypeTag::from_byte(tag)
        .ok_or_else(|| SessionError::corrupt(format!("unknown type tag {tag}")))?;

    let mut reader = Reader::new(payload);
    let value = match tag {
        TypeTag::String => SessionValue::String(reader.read_string()?),
        TypeTag::Int32 => SessionValue::Int32(i32::from_le_bytes(reader.read_array()?)),
        TypeTag::Boolean => SessionValue::Boolean(reader.read_array::<1>()?[0] != 0),
        TypeTag::DateTime => {
            let raw = i64::from_le_bytes(reader.read_array()?);
            let instant = ticks::from_ticks(raw)
                .ok_or_else(|| SessionError::corrupt(format!("date ticks {raw} out of range")))?;
            SessionValue::DateTime(instant)
        }
        TypeTag::Decimal => SessionValue::Decimal(reader.read_array()?),
        TypeTag::Byte => SessionValue::Byte(reader.read_array::<1>()?[0]),
        TypeTag::Char => {
            let s = std::str::from_utf8(reader.rest())
                .map_err(|_| SessionError::corrupt("char is not valid UTF-8"))?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => SessionValue::Char(c),
                _ => return Err(SessionError::corrupt("char slot does not hold one character")),
            }
        }
        TypeTag::Single => SessionValue::Single(f32::from_le_bytes(reader.read_array()?)),
        TypeTag::Double => SessionValue::Double(f64::from_le_bytes(reader.read_array()?)),
        TypeTag::SByte => SessionValue::SByte(i8::from_le_bytes(reader.read_array()?)),
        TypeTag::Int16 => SessionValue::Int16(i16::from_le_bytes(reader.read_array()?)),
        TypeTag::Int64 => SessionValue::Int64(i64::from_le_bytes(reader.read_array()?)),
        TypeTag::UInt16 => SessionValue::UInt16(u16::from_le_bytes(reader.read_array()?)),
        TypeTag::UInt32 => SessionValue::UInt32(u32::from_le_bytes(reader.read_array()?)),
        TypeTag::UInt64 => SessionValue::UInt64(u64::from_le_bytes(reader.read_array()?)),
        TypeTag::TimeSpan => {
            SessionValue::TimeSpan(ticks::span_from_ticks(i64::from_le_bytes(reader.read_array()?)))
        }
        TypeTag::Guid => SessionValue::Guid(Uuid::from_bytes_le(reader.read_array()?)),
        TypeTag::Object => SessionValue::Object(reader.rest().to_vec()),
        TypeTag::Null => SessionValue::Null,
    };
    reader.finish()?;
    Ok(value)
}

/// Bounds-checked cursor over a byte slice.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> SessionResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                SessionError::corrupt(format!(
                    "truncated: wanted {n} bytes at offset {}, have {}",
                    self.pos,
                    self.buf.len() - self.pos
                ))
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> SessionResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_i32(&mut self) -> SessionResult<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_7bit(&mut self) -> SessionResult<u32> {
        let mut value = 0u32;
        for shift in (0..35).step_by(7) {
            let byte = self.read_array::<1>()?[0];
            if shift == 28 && byte > 0x0f {
                return Err(SessionError::corrupt("7-bit length overflows 32 bits"));
            }
            value |= u32::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(SessionError::corrupt("7-bit length overflows 32 bits"))
    }

    fn read_string(&mut self) -> SessionResult<String> {
        let len = self.read_7bit()?;
        if len > i32::MAX as u32 {
            return Err(SessionError::corrupt(format!("negative string length {len}")));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SessionError::corrupt("string is not valid UTF-8"))
    }

    /// Consume everything left.
    fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }

    /// Fail if any bytes are left.
    fn finish(&self) -> SessionResult<()> {
        match self.buf.len() - self.pos {
            0 => Ok(()),
            left => Err(SessionError::corrupt(format!("{left} unexpected trailing bytes"))),
        }
    }
}
