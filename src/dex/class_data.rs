//! `class_data_item`: member lists stored as ULEB128 index deltas.

use crate::dex::code::CodeItem;
use crate::dex::error::DexError;
use crate::dex::ids::{IndexKind, IndexRemap};
use crate::dex::table_of_contents::{SectionKind, TableOfContents};
use crate::dex::{read_uleb128, write_uleb128};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedField
{
    pub field_idx: u32,
    pub access_flags: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMethod
{
    pub method_idx: u32,
    pub access_flags: u32,
    pub code: Option<CodeItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassDataItem {
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

impl ClassDataItem
{
    pub fn read_at(bytes: &[u8], toc: &TableOfContents, offset: u32) -> Result<ClassDataItem, DexError>
    {
        toc.expect_in(SectionKind::ClassData, offset)?;
        let ix = &mut (offset as usize);
        let static_field_size = read_uleb128(bytes, ix)?;
        let instance_field_size = read_uleb128(bytes, ix)?;
        let direct_method_size = read_uleb128(bytes, ix)?;
        let virtual_method_size = read_uleb128(bytes, ix)?;

        let static_fields = read_fields(bytes, ix, static_field_size)?;
        let instance_fields = read_fields(bytes, ix, instance_field_size)?;
        let direct_methods = read_methods(bytes, ix, toc, direct_method_size)?;
        let virtual_methods = read_methods(bytes, ix, toc, virtual_method_size)?;

        Ok(ClassDataItem { static_fields, instance_fields, direct_methods, virtual_methods })
    }

    /// Direct methods followed by virtual methods: the order code items are laid out in.
    pub fn methods(&self) -> impl Iterator<Item = &EncodedMethod>
    {
        self.direct_methods.iter().chain(self.virtual_methods.iter())
    }

    pub fn is_empty(&self) -> bool
    {
        self.static_fields.is_empty()
            && self.instance_fields.is_empty()
            && self.direct_methods.is_empty()
            && self.virtual_methods.is_empty()
    }

    /// Writes the item; `code_offsets` holds one entry per [`ClassDataItem::methods`] item,
    /// 0 for methods without code.
    pub fn write(&self, bytes: &mut Vec<u8>, code_offsets: &[u32]) -> Result<usize, DexError>
    {
        let method_count = self.direct_methods.len() + self.virtual_methods.len();
        if code_offsets.len() != method_count
        {
            return Err(DexError::internal(&format!("{} code offsets for {} methods", code_offsets.len(), method_count)));
        }

        let mut c = 0;
        c += write_uleb128(bytes, self.static_fields.len() as u32);
        c += write_uleb128(bytes, self.instance_fields.len() as u32);
        c += write_uleb128(bytes, self.direct_methods.len() as u32);
        c += write_uleb128(bytes, self.virtual_methods.len() as u32);

        for fields in [&self.static_fields, &self.instance_fields] {
            let mut last = 0;
            for f in fields.iter() {
                c += write_uleb128(bytes, f.field_idx - last);
                last = f.field_idx;
                c += write_uleb128(bytes, f.access_flags);
            }
        }

        let (direct_offsets, virtual_offsets) = code_offsets.split_at(self.direct_methods.len());
        for (methods, offsets) in [(&self.direct_methods, direct_offsets), (&self.virtual_methods, virtual_offsets)] {
            let mut last = 0;
            for (m, code_off) in methods.iter().zip(offsets) {
                c += write_uleb128(bytes, m.method_idx - last);
                last = m.method_idx;
                c += write_uleb128(bytes, m.access_flags);
                c += write_uleb128(bytes, *code_off);
            }
        }
        Ok(c)
    }

    /// Maps every member index and code item, then restores ascending index order in
    /// each list.
    pub fn remap_indices(&mut self, version: u32, remap: &dyn IndexRemap) -> Result<(), DexError>
    {
        for fields in [&mut self.static_fields, &mut self.instance_fields] {
            for f in fields.iter_mut() {
                f.field_idx = remap.remap(IndexKind::Field, f.field_idx)?;
            }
            fields.sort_by_key(|f| f.field_idx);
            if let Some(w) = fields.windows(2).find(|w| w[0].field_idx == w[1].field_idx) {
                fail!("field {} is listed twice in class_data_item", w[0].field_idx);
            }
        }
        for methods in [&mut self.direct_methods, &mut self.virtual_methods] {
            for m in methods.iter_mut() {
                m.method_idx = remap.remap(IndexKind::Method, m.method_idx)?;
                if let Some(code) = m.code.as_mut() {
                    code.remap_indices(version, remap)
                        .map_err(|e| err!(e, "code of method {}", m.method_idx))?;
                }
            }
            methods.sort_by_key(|m| m.method_idx);
            if let Some(w) = methods.windows(2).find(|w| w[0].method_idx == w[1].method_idx) {
                fail!("method {} is listed twice in class_data_item", w[0].method_idx);
            }
        }
        Ok(())
    }
}

fn read_fields(bytes: &[u8], ix: &mut usize, count: u32) -> Result<Vec<EncodedField>, DexError>
{
    let mut fields = Vec::with_capacity(count.min(0x1_0000) as usize);
    let mut field_idx = 0u32;
    for _ in 0..count {
        field_idx = field_idx.wrapping_add(read_uleb128(bytes, ix)?);
        fields.push(EncodedField { field_idx, access_flags: read_uleb128(bytes, ix)? });
    }
    Ok(fields)
}

fn read_methods(bytes: &[u8], ix: &mut usize, toc: &TableOfContents, count: u32) -> Result<Vec<EncodedMethod>, DexError>
{
    let mut methods = Vec::with_capacity(count.min(0x1_0000) as usize);
    let mut method_idx = 0u32;
    for _ in 0..count {
        method_idx = method_idx.wrapping_add(read_uleb128(bytes, ix)?);
        let access_flags = read_uleb128(bytes, ix)?;
        let code_off = read_uleb128(bytes, ix)?;
        let code = if code_off == 0 { None } else {
            Some(CodeItem::read_at(bytes, toc, code_off)
                .map_err(|e| err!(e, "code_item at 0x{:x} of method {}", code_off, method_idx))?)
        };
        methods.push(EncodedMethod { method_idx, access_flags, code });
    }
    Ok(methods)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Reverse;

    impl IndexRemap for Reverse {
        fn remap(&self, _kind: IndexKind, old: u32) -> Result<u32, DexError> {
            Ok(1000 - old)
        }
    }

    fn field(field_idx: u32) -> EncodedField {
        EncodedField { field_idx, access_flags: 1 }
    }

    fn method(method_idx: u32) -> EncodedMethod {
        EncodedMethod { method_idx, access_flags: 0x10001, code: None }
    }

    #[test]
    fn remap_resorts_delta_chains() {
        let mut data = ClassDataItem {
            static_fields: vec![field(1), field(5)],
            instance_fields: vec![],
            direct_methods: vec![method(2), method(3), method(900)],
            virtual_methods: vec![method(10)],
        };
        data.remap_indices(35, &Reverse).unwrap();
        let direct: Vec<u32> = data.direct_methods.iter().map(|m| m.method_idx).collect();
        assert_eq!(direct, vec![100, 997, 998]);
        assert_eq!(data.static_fields[0].field_idx, 995);

        let mut bytes = vec![];
        data.write(&mut bytes, &[0, 0, 0, 0]).unwrap();
        // counts, then static fields: delta 995 (2 bytes) + flags, delta 4 + flags
        assert_eq!(&bytes[..4], &[2, 0, 3, 1]);
        assert_eq!(&bytes[4..10], &[0xe3, 0x07, 0x01, 0x04, 0x01, 0x64]);
    }

    #[test]
    fn colliding_members_are_rejected() {
        struct Collapse;
        impl IndexRemap for Collapse {
            fn remap(&self, _kind: IndexKind, _old: u32) -> Result<u32, DexError> { Ok(7) }
        }
        let mut data = ClassDataItem { virtual_methods: vec![method(1), method(2)], ..Default::default() };
        assert!(data.remap_indices(35, &Collapse).is_err());
    }

    #[test]
    fn code_offset_count_must_match() {
        let data = ClassDataItem { direct_methods: vec![method(1)], ..Default::default() };
        assert!(data.write(&mut vec![], &[]).is_err());
        assert!(ClassDataItem::default().is_empty());
    }
}
