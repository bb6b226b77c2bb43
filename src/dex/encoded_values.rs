use std::cmp::max;

use crate::dex::error::DexError;
use crate::dex::ids::{IndexKind, IndexRemap};
use crate::dex::{read_u1, read_uleb128, write_u1, write_uleb128, write_x};

#[derive(Debug, PartialEq, Clone)]
pub struct EncodedAnnotation {
    pub type_idx: u32,
    pub elements: Vec<AnnotationElement>,
}

/// Deepest array or annotation nesting accepted in an encoded value.
pub const MAX_VALUE_DEPTH: usize = 64;

impl EncodedAnnotation {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<EncodedAnnotation, DexError> {
        EncodedAnnotation::read_nested(bytes, ix, 0)
    }

    fn read_nested(bytes: &[u8], ix: &mut usize, depth: usize) -> Result<EncodedAnnotation, DexError> {
        let type_idx = read_uleb128(bytes, ix)?;
        let size = read_uleb128(bytes, ix)? as usize;
        let mut elements = Vec::with_capacity(size.min(0x1000));

        for _ in 0..size {
            elements.push(AnnotationElement::read_nested(bytes, ix, depth)?);
        }

        Ok(EncodedAnnotation { type_idx, elements })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut written_bytes = 0;

        written_bytes += write_uleb128(bytes, self.type_idx);
        written_bytes += write_uleb128(bytes, self.elements.len() as u32);

        for element in &self.elements {
            written_bytes += element.write(bytes);
        }

        written_bytes
    }

    /// Maps the annotation type and every element, then restores element order by name.
    pub fn remap_indices(&mut self, remap: &dyn IndexRemap) -> Result<(), DexError> {
        self.type_idx = remap.remap(IndexKind::Type, self.type_idx)?;
        for element in self.elements.iter_mut() {
            element.name_idx = remap.remap(IndexKind::String, element.name_idx)?;
            element.value.remap_indices(remap)?;
        }
        self.elements.sort_by_key(|e| e.name_idx);
        Ok(())
    }
}


#[derive(Debug, PartialEq, Clone)]
pub struct AnnotationElement {
    pub name_idx: u32,
    pub value: EncodedValue,
}

impl AnnotationElement {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationElement, DexError> {
        AnnotationElement::read_nested(bytes, ix, 0)
    }

    fn read_nested(bytes: &[u8], ix: &mut usize, depth: usize) -> Result<AnnotationElement, DexError> {
        let name_idx = read_uleb128(bytes, ix)?;
        let value = EncodedValue::read_nested(bytes, ix, depth)?;

        Ok(AnnotationElement { name_idx, value })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_uleb128(bytes, self.name_idx) + self.value.write(bytes)
    }
}

const VALUE_BYTE: u8 = 0x00;
const VALUE_SHORT: u8 = 0x02;
const VALUE_CHAR: u8 = 0x03;
const VALUE_INT: u8 = 0x04;
const VALUE_LONG: u8 = 0x06;
const VALUE_FLOAT: u8 = 0x10;
const VALUE_DOUBLE: u8 = 0x11;
const VALUE_METHOD_TYPE: u8 = 0x15;
const VALUE_METHOD_HANDLE: u8 = 0x16;
const VALUE_STRING: u8 = 0x17;
const VALUE_TYPE: u8 = 0x18;
const VALUE_FIELD: u8 = 0x19;
const VALUE_METHOD: u8 = 0x1a;
const VALUE_ENUM: u8 = 0x1b;
const VALUE_ARRAY: u8 = 0x1c;
const VALUE_ANNOTATION: u8 = 0x1d;
const VALUE_NULL: u8 = 0x1e;
const VALUE_BOOLEAN: u8 = 0x1f;

#[derive(Debug, PartialEq, Clone)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    MethodType(u32),
    MethodHandle(u32),
    String(u32),
    Type(u32),
    Field(u32),
    Method(u32),
    Enum(u32),
    Array(Vec<EncodedValue>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
}

impl EncodedValue
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<EncodedValue, DexError> {
        EncodedValue::read_nested(bytes, ix, 0)
    }

    /// `depth` counts the arrays and annotations enclosing this value.
    fn read_nested(bytes: &[u8], ix: &mut usize, depth: usize) -> Result<EncodedValue, DexError> {
        let start = *ix;
        let header_byte = read_u1(bytes, ix)?;
        let value_arg = header_byte >> 5;
        let value_type = header_byte & 0x1F;
        let size = (value_arg + 1) as usize;

        let check_size = |width: usize| -> Result<(), DexError> {
            if size > width {
                fail!("encoded_value type 0x{:02x} with {} bytes at 0x{:x}", value_type, size, start);
            }
            Ok(())
        };

        let value = match value_type {
            VALUE_BYTE => {
                check_size(1)?;
                EncodedValue::Byte(read_u1(bytes, ix)? as i8)
            },
            VALUE_SHORT => {
                check_size(2)?;
                EncodedValue::Short(read_signed(bytes, ix, size)? as i16)
            },
            VALUE_CHAR => {
                check_size(2)?;
                EncodedValue::Char(read_unsigned(bytes, ix, size)? as u16)
            },
            VALUE_INT => {
                check_size(4)?;
                EncodedValue::Int(read_signed(bytes, ix, size)? as i32)
            },
            VALUE_LONG => {
                check_size(8)?;
                EncodedValue::Long(read_signed(bytes, ix, size)?)
            },
            VALUE_FLOAT => {
                check_size(4)?;
                EncodedValue::Float(f32::from_bits(read_right_extended(bytes, ix, size, 4)? as u32))
            },
            VALUE_DOUBLE => {
                check_size(8)?;
                EncodedValue::Double(f64::from_bits(read_right_extended(bytes, ix, size, 8)?))
            },
            VALUE_METHOD_TYPE | VALUE_METHOD_HANDLE | VALUE_STRING | VALUE_TYPE | VALUE_FIELD | VALUE_METHOD | VALUE_ENUM => {
                check_size(4)?;
                let val = read_unsigned(bytes, ix, size)? as u32;
                match value_type {
                    VALUE_METHOD_TYPE => EncodedValue::MethodType(val),
                    VALUE_METHOD_HANDLE => EncodedValue::MethodHandle(val),
                    VALUE_STRING => EncodedValue::String(val),
                    VALUE_TYPE => EncodedValue::Type(val),
                    VALUE_FIELD => EncodedValue::Field(val),
                    VALUE_METHOD => EncodedValue::Method(val),
                    _ => EncodedValue::Enum(val),
                }
            },
            VALUE_ARRAY | VALUE_ANNOTATION if depth >= MAX_VALUE_DEPTH => {
                fail!("encoded_value nesting exceeds {} levels at 0x{:x}", MAX_VALUE_DEPTH, start)
            },
            VALUE_ARRAY => EncodedValue::Array(read_array_nested(bytes, ix, depth + 1)?),
            VALUE_ANNOTATION => EncodedValue::Annotation(EncodedAnnotation::read_nested(bytes, ix, depth + 1)?),
            VALUE_NULL => EncodedValue::Null,
            VALUE_BOOLEAN => EncodedValue::Boolean(value_arg != 0),
            _ => fail!("Unknown encoded_value type 0x{:02x} at 0x{:x}", value_type, start),
        };
        Ok(value)
    }

    /// Writes the value with the shortest encoding its type allows.
    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        match self {
            EncodedValue::Byte(val) => {
                write_u1(bytes, VALUE_BYTE) + write_u1(bytes, *val as u8)
            },
            EncodedValue::Short(value) => write_signed(bytes, VALUE_SHORT, *value as i64),
            EncodedValue::Char(value) => write_unsigned(bytes, VALUE_CHAR, *value as u64),
            EncodedValue::Int(value) => write_signed(bytes, VALUE_INT, *value as i64),
            EncodedValue::Long(value) => write_signed(bytes, VALUE_LONG, *value),
            EncodedValue::Float(value) => write_right_extended(bytes, VALUE_FLOAT, value.to_bits() as u64, 4),
            EncodedValue::Double(value) => write_right_extended(bytes, VALUE_DOUBLE, value.to_bits(), 8),
            EncodedValue::MethodType(value) => write_unsigned(bytes, VALUE_METHOD_TYPE, *value as u64),
            EncodedValue::MethodHandle(value) => write_unsigned(bytes, VALUE_METHOD_HANDLE, *value as u64),
            EncodedValue::String(value) => write_unsigned(bytes, VALUE_STRING, *value as u64),
            EncodedValue::Type(value) => write_unsigned(bytes, VALUE_TYPE, *value as u64),
            EncodedValue::Field(value) => write_unsigned(bytes, VALUE_FIELD, *value as u64),
            EncodedValue::Method(value) => write_unsigned(bytes, VALUE_METHOD, *value as u64),
            EncodedValue::Enum(value) => write_unsigned(bytes, VALUE_ENUM, *value as u64),
            EncodedValue::Array(value) => {
                write_u1(bytes, VALUE_ARRAY) + write_encoded_array(value, bytes)
            },
            EncodedValue::Annotation(value) => {
                write_u1(bytes, VALUE_ANNOTATION) + value.write(bytes)
            },
            EncodedValue::Null => write_u1(bytes, VALUE_NULL),
            EncodedValue::Boolean(val) => {
                let v = if *val { 1 } else { 0 };
                write_u1(bytes, VALUE_BOOLEAN | (v << 5))
            }
        }
    }

    pub fn remap_indices(&mut self, remap: &dyn IndexRemap) -> Result<(), DexError>
    {
        match self {
            EncodedValue::String(i) => *i = remap.remap(IndexKind::String, *i)?,
            EncodedValue::Type(i) => *i = remap.remap(IndexKind::Type, *i)?,
            EncodedValue::Field(i) | EncodedValue::Enum(i) => *i = remap.remap(IndexKind::Field, *i)?,
            EncodedValue::Method(i) => *i = remap.remap(IndexKind::Method, *i)?,
            EncodedValue::MethodType(i) => *i = remap.remap(IndexKind::Proto, *i)?,
            EncodedValue::MethodHandle(i) => fail!("method handle value {} cannot be merged", i),
            EncodedValue::Array(values) => {
                for v in values.iter_mut() { v.remap_indices(remap)?; }
            },
            EncodedValue::Annotation(annotation) => annotation.remap_indices(remap)?,
            _ => {}
        }
        Ok(())
    }
}

fn read_unsigned(bytes: &[u8], ix: &mut usize, size: usize) -> Result<u64, DexError> {
    let mut result = 0u64;
    for i in 0..size {
        result |= (read_u1(bytes, ix)? as u64) << (8 * i);
    }
    Ok(result)
}

fn read_signed(bytes: &[u8], ix: &mut usize, size: usize) -> Result<i64, DexError> {
    let shift = 64 - 8 * size as u32;
    Ok(((read_unsigned(bytes, ix, size)? << shift) as i64) >> shift)
}

/// Floating point values drop trailing zero bytes, so the stored bytes are the high ones.
fn read_right_extended(bytes: &[u8], ix: &mut usize, size: usize, width: usize) -> Result<u64, DexError> {
    Ok(read_unsigned(bytes, ix, size)? << (8 * (width - size)))
}

fn signed_size(v: i64) -> usize {
    (1..8).find(|n| {
        let shift = 64 - 8 * *n as u32;
        (v << shift) >> shift == v
    }).unwrap_or(8)
}

fn unsigned_size(v: u64) -> usize {
    max(1, 8 - (v.leading_zeros() / 8) as usize)
}

fn write_header(bytes: &mut Vec<u8>, value_type: u8, size: usize) -> usize {
    write_u1(bytes, (((size - 1) as u8) << 5) | value_type)
}

fn write_signed(bytes: &mut Vec<u8>, value_type: u8, v: i64) -> usize {
    let size = signed_size(v);
    write_header(bytes, value_type, size) + write_x(bytes, &v.to_le_bytes()[..size])
}

fn write_unsigned(bytes: &mut Vec<u8>, value_type: u8, v: u64) -> usize {
    let size = unsigned_size(v);
    write_header(bytes, value_type, size) + write_x(bytes, &v.to_le_bytes()[..size])
}

fn write_right_extended(bytes: &mut Vec<u8>, value_type: u8, bits: u64, width: usize) -> usize {
    let trailing = ((bits.trailing_zeros() / 8) as usize).min(width);
    let size = max(1, width - trailing);
    write_header(bytes, value_type, size) + write_x(bytes, &bits.to_le_bytes()[width - size..width])
}


pub fn write_encoded_array(encoded_array: &[EncodedValue], bytes: &mut Vec<u8>) -> usize
{
    let mut c = write_uleb128(bytes, encoded_array.len() as u32);
    for value in encoded_array {
        c += value.write(bytes);
    }
    c
}

pub fn read_encoded_array(bytes: &[u8], ix: &mut usize) -> Result<Vec<EncodedValue>, DexError>
{
    read_array_nested(bytes, ix, 0)
}

fn read_array_nested(bytes: &[u8], ix: &mut usize, depth: usize) -> Result<Vec<EncodedValue>, DexError>
{
    let size = read_uleb128(bytes, ix)? as usize;

    let mut values = Vec::with_capacity(size.min(0x1000));
    for _ in 0..size
    {
        values.push(EncodedValue::read_nested(bytes, ix, depth)?);
    }

    Ok(values)
}
