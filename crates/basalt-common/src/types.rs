//! Attribute types and values for index keys.
//!
//! Every attribute type has a fixed encoded width so index entries can be laid
//! out in fixed-size slots. Values carry a total order that the index relies on
//! to keep pages sorted.

use crate::error::{BasaltError, Result};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Type of an indexed attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrType {
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit float, ordered by `f64::total_cmp`.
    Float64,
    /// Fixed-width string, zero-padded to the given number of bytes.
    Char(u16),
}

impl AttrType {
    /// Returns the encoded byte width of this type.
    pub fn size(&self) -> usize {
        match self {
            AttrType::Int32 => 4,
            AttrType::Int64 | AttrType::Float64 => 8,
            AttrType::Char(width) => *width as usize,
        }
    }
}

impl std::fmt::Display for AttrType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttrType::Int32 => write!(f, "INT32"),
            AttrType::Int64 => write!(f, "INT64"),
            AttrType::Float64 => write!(f, "FLOAT64"),
            AttrType::Char(width) => write!(f, "CHAR({})", width),
        }
    }
}

/// A typed attribute value.
#[derive(Debug, Clone)]
pub enum Value {
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Char(String),
}

impl Value {
    /// Returns the attribute type of this value.
    ///
    /// `Char` values report their own byte length as width.
    pub fn attr_type(&self) -> AttrType {
        match self {
            Value::Int32(_) => AttrType::Int32,
            Value::Int64(_) => AttrType::Int64,
            Value::Float64(_) => AttrType::Float64,
            Value::Char(s) => AttrType::Char(s.len().min(u16::MAX as usize) as u16),
        }
    }

    /// Returns true if this value can be stored in a slot of `attr_type`.
    pub fn fits(&self, attr_type: AttrType) -> bool {
        match (self, attr_type) {
            (Value::Int32(_), AttrType::Int32)
            | (Value::Int64(_), AttrType::Int64)
            | (Value::Float64(_), AttrType::Float64) => true,
            (Value::Char(s), AttrType::Char(width)) => s.len() <= width as usize,
            _ => false,
        }
    }

    /// Checks that this value matches `attr_type`.
    pub fn check_type(&self, attr_type: AttrType) -> Result<()> {
        match (self, attr_type) {
            (Value::Char(s), AttrType::Char(width)) if s.len() > width as usize => {
                Err(BasaltError::KeyTooLarge {
                    size: s.len(),
                    max: width as usize,
                })
            }
            _ if self.fits(attr_type) => Ok(()),
            _ => Err(BasaltError::TypeMismatch {
                expected: attr_type.to_string(),
                actual: self.attr_type().to_string(),
            }),
        }
    }

    /// Encodes this value into `out`, which must be exactly `attr_type.size()` bytes.
    pub fn encode_into(&self, attr_type: AttrType, out: &mut [u8]) -> Result<()> {
        self.check_type(attr_type)?;
        if out.len() != attr_type.size() {
            return Err(BasaltError::Internal(format!(
                "encode buffer is {} bytes, {} needs {}",
                out.len(),
                attr_type,
                attr_type.size()
            )));
        }

        let mut buf = out;
        match self {
            Value::Int32(v) => buf.put_i32_le(*v),
            Value::Int64(v) => buf.put_i64_le(*v),
            Value::Float64(v) => buf.put_f64_le(*v),
            Value::Char(s) => {
                if s.as_bytes().contains(&0) {
                    return Err(BasaltError::InvalidParameter {
                        name: "char value".to_string(),
                        value: s.escape_debug().to_string(),
                    });
                }
                buf.put_slice(s.as_bytes());
                let padding = buf.remaining_mut();
                buf.put_bytes(0, padding);
            }
        }
        Ok(())
    }

    /// Encodes this value into a new buffer of `attr_type.size()` bytes.
    pub fn encode(&self, attr_type: AttrType) -> Result<Vec<u8>> {
        let mut out = vec![0u8; attr_type.size()];
        self.encode_into(attr_type, &mut out)?;
        Ok(out)
    }

    /// Decodes a value of `attr_type` from `bytes`.
    pub fn decode(attr_type: AttrType, bytes: &[u8]) -> Result<Value> {
        if bytes.len() < attr_type.size() {
            return Err(BasaltError::Internal(format!(
                "cannot decode {} from {} bytes",
                attr_type,
                bytes.len()
            )));
        }

        let mut buf = &bytes[..attr_type.size()];
        let value = match attr_type {
            AttrType::Int32 => Value::Int32(buf.get_i32_le()),
            AttrType::Int64 => Value::Int64(buf.get_i64_le()),
            AttrType::Float64 => Value::Float64(buf.get_f64_le()),
            AttrType::Char(_) => {
                let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
                let s = std::str::from_utf8(&buf[..end]).map_err(|e| {
                    BasaltError::Internal(format!("invalid utf-8 in CHAR value: {}", e))
                })?;
                Value::Char(s.to_string())
            }
        };
        Ok(value)
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Int32(_) => 0,
            Value::Int64(_) => 1,
            Value::Float64(_) => 2,
            Value::Char(_) => 3,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Char(a), Value::Char(b)) => a.as_bytes().cmp(b.as_bytes()),
            // Mixed types never share an index; order by type to stay total.
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Char(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Char(v.to_string())
    }
}
