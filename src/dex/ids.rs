//! Fixed-size id records and type lists.

use std::fmt;

use crate::dex::error::DexError;
use crate::dex::{read_u2, read_u4, write_u2, write_u4};

/// The unified index spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKind
{
    String,
    Type,
    Proto,
    Field,
    Method,
}

impl IndexKind
{
    pub const ALL: [IndexKind; 5] = [IndexKind::String, IndexKind::Type, IndexKind::Proto, IndexKind::Field, IndexKind::Method];

    pub fn name(self) -> &'static str
    {
        match self
        {
            IndexKind::String => "string",
            IndexKind::Type => "type",
            IndexKind::Proto => "proto",
            IndexKind::Field => "field",
            IndexKind::Method => "method",
        }
    }

    /// Maximum number of table entries. Everything but strings is addressed through
    /// 16-bit fields somewhere in the format; `0xffffffff` stays reserved as `NO_INDEX`.
    pub fn limit(self) -> usize
    {
        match self
        {
            IndexKind::String => u32::MAX as usize,
            _ => 1 << 16,
        }
    }
}

impl fmt::Display for IndexKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

/// Translates indices of one input into the merged index spaces.
pub trait IndexRemap
{
    fn remap(&self, kind: IndexKind, old: u32) -> Result<u32, DexError>;

    /// Like [`IndexRemap::remap`] but lets `NO_INDEX` through unchanged.
    fn remap_optional(&self, kind: IndexKind, old: u32) -> Result<u32, DexError>
    {
        if old == crate::dex::NO_INDEX { Ok(old) } else { self.remap(kind, old) }
    }
}

/// `type_list`: a u4 count followed by u2 type indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeList(pub Vec<u32>);

impl TypeList
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<TypeList, DexError>
    {
        let size = read_u4(bytes, ix)?;
        let mut v = Vec::with_capacity(size.min(0x1_0000) as usize);
        for _ in 0..size { v.push(read_u2(bytes, ix)? as u32); }
        Ok(TypeList(v))
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_u4(bytes, self.0.len() as u32);
        for i in &self.0 { c += write_u2(bytes, *i as u16); }
        c
    }

    pub fn is_empty(&self) -> bool
    {
        self.0.is_empty()
    }

    pub fn remap_indices(&mut self, remap: &dyn IndexRemap) -> Result<(), DexError>
    {
        for t in self.0.iter_mut() { *t = remap.remap(IndexKind::Type, *t)?; }
        Ok(())
    }
}

/// `proto_id_item` with its parameter list resolved. Field order gives the table order:
/// return type, then parameters lexicographically, with the shorty breaking ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtoId
{
    pub return_type_idx: u32,
    pub parameters: TypeList,
    pub shorty_idx: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawProtoId
{
    pub shorty_idx: u32,
    pub return_type_idx: u32,
    pub parameters_off: u32,
}

impl RawProtoId
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<RawProtoId, DexError>
    {
        Ok(RawProtoId {
            shorty_idx: read_u4(bytes, ix)?,
            return_type_idx: read_u4(bytes, ix)?,
            parameters_off: read_u4(bytes, ix)?,
        })
    }
}

/// `field_id_item`, ordered by class, name, type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId
{
    pub class_idx: u32,
    pub type_idx: u32,
    pub name_idx: u32,
}

impl FieldId
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<FieldId, DexError>
    {
        Ok(FieldId {
            class_idx: read_u2(bytes, ix)? as u32,
            type_idx: read_u2(bytes, ix)? as u32,
            name_idx: read_u4(bytes, ix)?,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_u2(bytes, self.class_idx as u16);
        c += write_u2(bytes, self.type_idx as u16);
        c += write_u4(bytes, self.name_idx);
        c
    }

    fn sort_key(&self) -> (u32, u32, u32)
    {
        (self.class_idx, self.name_idx, self.type_idx)
    }
}

impl Ord for FieldId
{
    fn cmp(&self, other: &Self) -> std::cmp::Ordering
    {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for FieldId
{
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering>
    {
        Some(self.cmp(other))
    }
}

/// `method_id_item`, ordered by class, name, proto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId
{
    pub class_idx: u32,
    pub proto_idx: u32,
    pub name_idx: u32,
}

impl MethodId
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<MethodId, DexError>
    {
        Ok(MethodId {
            class_idx: read_u2(bytes, ix)? as u32,
            proto_idx: read_u2(bytes, ix)? as u32,
            name_idx: read_u4(bytes, ix)?,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_u2(bytes, self.class_idx as u16);
        c += write_u2(bytes, self.proto_idx as u16);
        c += write_u4(bytes, self.name_idx);
        c
    }

    fn sort_key(&self) -> (u32, u32, u32)
    {
        (self.class_idx, self.name_idx, self.proto_idx)
    }
}

impl Ord for MethodId
{
    fn cmp(&self, other: &Self) -> std::cmp::Ordering
    {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for MethodId
{
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering>
    {
        Some(self.cmp(other))
    }
}

/// `class_def_item` as stored, with its data offsets still unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassDef
{
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: u32,
    pub interfaces_off: u32,
    pub source_file_idx: u32,
    pub annotations_off: u32,
    pub class_data_off: u32,
    pub static_values_off: u32,
}

impl ClassDef
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<ClassDef, DexError>
    {
        Ok(ClassDef {
            class_idx: read_u4(bytes, ix)?,
            access_flags: read_u4(bytes, ix)?,
            superclass_idx: read_u4(bytes, ix)?,
            interfaces_off: read_u4(bytes, ix)?,
            source_file_idx: read_u4(bytes, ix)?,
            annotations_off: read_u4(bytes, ix)?,
            class_data_off: read_u4(bytes, ix)?,
            static_values_off: read_u4(bytes, ix)?,
        })
    }
}
