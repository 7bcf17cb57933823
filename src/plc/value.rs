//! Typed register values.
//!
//! Decoded register contents are represented as a [`Value`] variant over the
//! fixed primitive set the wire protocols can produce. Keeping the tag
//! explicit means "is this numeric" is a variant test, not a runtime type
//! check, and WAL files round-trip values without widening.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Register data type as declared in channel configuration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DataType {
    Uint16,
    Uint32,
    Uint64,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Bool,
    String,
}

impl DataType {
    /// Number of bytes a fixed-width value of this type occupies on the wire.
    ///
    /// `String` has no fixed width; its length comes from the register
    /// configuration.
    pub fn wire_width(&self) -> Option<usize> {
        match self {
            Self::Uint16 | Self::Int16 => Some(2),
            Self::Uint32 | Self::Int32 | Self::Float32 => Some(4),
            Self::Uint64 | Self::Int64 | Self::Float64 => Some(8),
            Self::Bool => Some(1),
            Self::String => None,
        }
    }
}

/// A decoded register value.
///
/// The serde representation keeps the tag (`{"t": "u16", "v": 42}`) so that
/// a WAL round-trip restores the exact variant, not a widened number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
pub enum Value {
    U16(u16),
    U32(u32),
    U64(u64),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    /// Whether this value participates in expression evaluation.
    ///
    /// Booleans and strings pass through transforms untouched.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::U16(_)
                | Self::U32(_)
                | Self::U64(_)
                | Self::I16(_)
                | Self::I32(_)
                | Self::I64(_)
                | Self::F32(_)
                | Self::F64(_)
        )
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::U16(v) => Some(f64::from(*v)),
            Self::U32(v) => Some(f64::from(*v)),
            Self::U64(v) => Some(*v as f64),
            Self::I16(v) => Some(f64::from(*v)),
            Self::I32(v) => Some(f64::from(*v)),
            Self::I64(v) => Some(*v as f64),
            Self::F32(v) => Some(f64::from(*v)),
            Self::F64(v) => Some(*v),
            Self::Bool(_) | Self::Str(_) => None,
        }
    }

    /// The declared type this value satisfies.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::U16(_) => DataType::Uint16,
            Self::U32(_) => DataType::Uint32,
            Self::U64(_) => DataType::Uint64,
            Self::I16(_) => DataType::Int16,
            Self::I32(_) => DataType::Int32,
            Self::I64(_) => DataType::Int64,
            Self::F32(_) => DataType::Float32,
            Self::F64(_) => DataType::Float64,
            Self::Bool(_) => DataType::Bool,
            Self::Str(_) => DataType::String,
        }
    }

    /// Parse a textual value against a declared type.
    ///
    /// Used by the ad-hoc write path, where the caller supplies the value as
    /// a string alongside the target data type.
    pub fn parse(data_type: DataType, raw: &str) -> Result<Self, ValueParseError> {
        let raw = raw.trim();
        let parsed = match data_type {
            DataType::Uint16 => raw.parse().map(Self::U16).ok(),
            DataType::Uint32 => raw.parse().map(Self::U32).ok(),
            DataType::Uint64 => raw.parse().map(Self::U64).ok(),
            DataType::Int16 => raw.parse().map(Self::I16).ok(),
            DataType::Int32 => raw.parse().map(Self::I32).ok(),
            DataType::Int64 => raw.parse().map(Self::I64).ok(),
            DataType::Float32 => raw.parse().map(Self::F32).ok(),
            DataType::Float64 => raw.parse().map(Self::F64).ok(),
            DataType::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => Some(Self::Bool(true)),
                "false" | "0" | "off" => Some(Self::Bool(false)),
                _ => None,
            },
            DataType::String => Some(Self::Str(raw.to_string())),
        };
        parsed.ok_or_else(|| ValueParseError {
            data_type,
            raw: raw.to_string(),
        })
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::U16(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

/// A textual value did not parse against its declared type.
#[derive(Debug, thiserror::Error)]
#[error("cannot parse '{raw}' as {data_type}")]
pub struct ValueParseError {
    pub data_type: DataType,
    pub raw: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_data_type_from_str() {
        assert_eq!(DataType::from_str("uint16").unwrap(), DataType::Uint16);
        assert_eq!(DataType::from_str("FLOAT64").unwrap(), DataType::Float64);
        assert!(DataType::from_str("decimal").is_err());
    }

    #[test]
    fn test_is_numeric() {
        assert!(Value::U16(1).is_numeric());
        assert!(Value::F64(1.5).is_numeric());
        assert!(!Value::Bool(true).is_numeric());
        assert!(!Value::Str("x".into()).is_numeric());
    }

    #[test]
    fn test_serde_preserves_variant() {
        let values = vec![
            Value::U16(7),
            Value::U64(u64::MAX),
            Value::I32(-42),
            Value::F32(1.25),
            Value::F64(-0.5),
            Value::Bool(true),
            Value::Str("line-3".into()),
        ];
        for v in values {
            let json = serde_json::to_string(&v).unwrap();
            let back: Value = serde_json::from_str(&json).unwrap();
            assert_eq!(back, v, "round-trip changed {json}");
        }
    }

    #[test]
    fn test_parse_typed() {
        assert_eq!(
            Value::parse(DataType::Uint16, "42").unwrap(),
            Value::U16(42)
        );
        assert_eq!(
            Value::parse(DataType::Bool, "on").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::parse(DataType::Float64, "-1.5").unwrap(),
            Value::F64(-1.5)
        );
        assert!(Value::parse(DataType::Uint16, "-1").is_err());
        assert!(Value::parse(DataType::Bool, "maybe").is_err());
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(Value::I16(-3).as_f64(), Some(-3.0));
        assert_eq!(Value::F32(0.5).as_f64(), Some(0.5));
        assert_eq!(Value::Str("7".into()).as_f64(), None);
    }
}
