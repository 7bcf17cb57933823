//! Byte-buffer transcoding.
//!
//! PLC reads return raw byte buffers; these helpers decode a typed value at
//! a given offset and encode typed values for writes. Multi-byte values use
//! big-endian (network) order, which is what the supported controller
//! families put on the wire.

use super::error::PlcError;
use super::value::{DataType, Value};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// String decoding applied to `DataType::String` registers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StrEncoding {
    #[default]
    Utf8,
    Latin1,
}

fn take<'a>(buf: &'a [u8], offset: usize, need: usize) -> Result<&'a [u8], PlcError> {
    let end = offset.checked_add(need).ok_or(PlcError::ShortBuffer {
        need,
        offset,
        have: buf.len(),
    })?;
    buf.get(offset..end).ok_or(PlcError::ShortBuffer {
        need,
        offset,
        have: buf.len(),
    })
}

/// Decode a typed value from `buf` starting at `offset`.
///
/// For `String`, `length` bytes are consumed and trailing NULs stripped; for
/// fixed-width types `length` is ignored in favor of the type's wire width.
pub fn decode_at(
    buf: &[u8],
    offset: usize,
    data_type: DataType,
    length: usize,
    encoding: StrEncoding,
) -> Result<Value, PlcError> {
    match data_type {
        DataType::Uint16 => {
            let b = take(buf, offset, 2)?;
            Ok(Value::U16(u16::from_be_bytes([b[0], b[1]])))
        }
        DataType::Int16 => {
            let b = take(buf, offset, 2)?;
            Ok(Value::I16(i16::from_be_bytes([b[0], b[1]])))
        }
        DataType::Uint32 => {
            let b = take(buf, offset, 4)?;
            Ok(Value::U32(u32::from_be_bytes([b[0], b[1], b[2], b[3]])))
        }
        DataType::Int32 => {
            let b = take(buf, offset, 4)?;
            Ok(Value::I32(i32::from_be_bytes([b[0], b[1], b[2], b[3]])))
        }
        DataType::Float32 => {
            let b = take(buf, offset, 4)?;
            Ok(Value::F32(f32::from_be_bytes([b[0], b[1], b[2], b[3]])))
        }
        DataType::Uint64 => {
            let b = take(buf, offset, 8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            Ok(Value::U64(u64::from_be_bytes(raw)))
        }
        DataType::Int64 => {
            let b = take(buf, offset, 8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            Ok(Value::I64(i64::from_be_bytes(raw)))
        }
        DataType::Float64 => {
            let b = take(buf, offset, 8)?;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            Ok(Value::F64(f64::from_be_bytes(raw)))
        }
        DataType::Bool => {
            let b = take(buf, offset, 1)?;
            Ok(Value::Bool(b[0] != 0))
        }
        DataType::String => {
            let b = take(buf, offset, length)?;
            let trimmed: &[u8] = match b.iter().rposition(|&c| c != 0) {
                Some(last) => &b[..=last],
                None => &[],
            };
            let s = match encoding {
                StrEncoding::Utf8 => String::from_utf8_lossy(trimmed).into_owned(),
                StrEncoding::Latin1 => trimmed.iter().map(|&c| c as char).collect(),
            };
            Ok(Value::Str(s))
        }
    }
}

/// Encode a typed value to its big-endian wire form.
pub fn encode(value: &Value) -> Vec<u8> {
    match value {
        Value::U16(v) => v.to_be_bytes().to_vec(),
        Value::U32(v) => v.to_be_bytes().to_vec(),
        Value::U64(v) => v.to_be_bytes().to_vec(),
        Value::I16(v) => v.to_be_bytes().to_vec(),
        Value::I32(v) => v.to_be_bytes().to_vec(),
        Value::I64(v) => v.to_be_bytes().to_vec(),
        Value::F32(v) => v.to_be_bytes().to_vec(),
        Value::F64(v) => v.to_be_bytes().to_vec(),
        Value::Bool(v) => vec![u8::from(*v)],
        Value::Str(v) => v.as_bytes().to_vec(),
    }
}
