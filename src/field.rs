//! Stored field values and their serialized form inside a chunk.
//!
//! Each field is written as a vlong key, `field_number << TYPE_BITS | tag`, followed by the value:
//!
//! | Type    | Encoding                    |
//! |---------|-----------------------------|
//! | String  | vint byte length, UTF-8     |
//! | Binary  | vint byte length, bytes     |
//! | Int     | zigzag vint                 |
//! | Float   | IEEE 754 bits, u32 BE       |
//! | Long    | zigzag vlong                |
//! | Double  | IEEE 754 bits, u64 BE       |

use crate::error::{Error, Result};
use crate::format::{TYPE_BITS, TYPE_MASK};
use crate::varint::{ReadVarExt, WriteVarExt};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::io::{self, Write};

/// The type tag stored alongside each field value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Binary,
    Int,
    Float,
    Long,
    Double,
}

impl From<FieldType> for u8 {
    fn from(val: FieldType) -> u8 {
        match val {
            FieldType::String => 0x00,
            FieldType::Binary => 0x01,
            FieldType::Int => 0x02,
            FieldType::Float => 0x03,
            FieldType::Long => 0x04,
            FieldType::Double => 0x05,
        }
    }
}

impl TryFrom<u8> for FieldType {
    type Error = u8;
    fn try_from(val: u8) -> Result<FieldType, u8> {
        match val {
            0x00 => Ok(FieldType::String),
            0x01 => Ok(FieldType::Binary),
            0x02 => Ok(FieldType::Int),
            0x03 => Ok(FieldType::Float),
            0x04 => Ok(FieldType::Long),
            0x05 => Ok(FieldType::Double),
            _ => Err(val),
        }
    }
}

/// A stored value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    String(String),
    Binary(#[serde(with = "serde_bytes")] Vec<u8>),
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::String(_) => FieldType::String,
            FieldValue::Binary(_) => FieldType::Binary,
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Long(_) => FieldType::Long,
            FieldValue::Double(_) => FieldType::Double,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Write the key and value for this field.
    pub(crate) fn write_to<W: Write + ?Sized>(&self, field_number: u32, out: &mut W) -> io::Result<()> {
        let tag = u8::from(self.field_type()) as u64;
        out.write_vlong(((field_number as u64) << TYPE_BITS) | tag)?;
        match self {
            FieldValue::String(s) => {
                out.write_vint(value_len(s.len())?)?;
                out.write_all(s.as_bytes())
            }
            FieldValue::Binary(b) => {
                out.write_vint(value_len(b.len())?)?;
                out.write_all(b)
            }
            FieldValue::Int(v) => out.write_zint(*v),
            FieldValue::Float(v) => out.write_u32::<BigEndian>(v.to_bits()),
            FieldValue::Long(v) => out.write_zlong(*v),
            FieldValue::Double(v) => out.write_u64::<BigEndian>(v.to_bits()),
        }
    }
}

/// Lengths are stored as a vint, so string and binary values must stay below 4 GiB.
fn value_len(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("stored value of {} bytes is too large", len),
        )
    })
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Binary(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Long(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

/// Name and number of a field within a segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub number: u32,
}

/// The segment's field table: maps field numbers to their info.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FieldInfos {
    by_number: HashMap<u32, FieldInfo>,
    by_name: HashMap<String, u32>,
}

impl FieldInfos {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the field named `name`, assigning it the next free number if it's new.
    pub fn add(&mut self, name: &str) -> FieldInfo {
        if let Some(number) = self.by_name.get(name) {
            return self.by_number[number].clone();
        }
        let number = self.by_number.keys().max().map_or(0, |n| n + 1);
        let info = FieldInfo {
            name: name.to_string(),
            number,
        };
        self.by_name.insert(name.to_string(), number);
        self.by_number.insert(number, info.clone());
        info
    }

    pub fn by_number(&self, number: u32) -> Option<&FieldInfo> {
        self.by_number.get(&number)
    }

    pub fn by_name(&self, name: &str) -> Option<&FieldInfo> {
        self.by_name.get(name).and_then(|n| self.by_number.get(n))
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }
}

/// Split a field key into its field number and type.
pub(crate) fn split_key(key: u64, resource: &str) -> Result<(u32, FieldType)> {
    let tag = (key & TYPE_MASK) as u8;
    let field_type = FieldType::try_from(tag)
        .map_err(|t| Error::corrupt(resource, format!("unknown type flag: {}", t)))?;
    let number = u32::try_from(key >> TYPE_BITS)
        .map_err(|_| Error::corrupt(resource, format!("field key out of range: {}", key)))?;
    Ok((number, field_type))
}

/// Read a length-prefixed byte run out of a decompressed document.
pub(crate) fn read_slice<'a>(data: &mut &'a [u8]) -> io::Result<&'a [u8]> {
    let len = data.read_vint()? as usize;
    if len > data.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "field value runs past the end of the document",
        ));
    }
    let (value, rest) = data.split_at(len);
    *data = rest;
    Ok(value)
}

/// Advance past a value without materializing it.
pub(crate) fn skip_value(field_type: FieldType, data: &mut &[u8]) -> io::Result<()> {
    match field_type {
        FieldType::String | FieldType::Binary => {
            read_slice(data)?;
        }
        FieldType::Int | FieldType::Long => {
            data.read_vlong()?;
        }
        FieldType::Float => {
            data.read_u32::<BigEndian>()?;
        }
        FieldType::Double => {
            data.read_u64::<BigEndian>()?;
        }
    }
    Ok(())
}
