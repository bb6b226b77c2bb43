//! The DEX header and map list, parsed into one [`Section`] per [`SectionKind`].

use std::collections::HashSet;
use std::fmt;

use log::warn;
use rangemap::RangeMap;

use crate::dex::error::DexError;
use crate::dex::section::SectionWriter;
use crate::dex::{read_u2, read_u4, read_x, write_u4, write_x, ENDIAN_CONSTANT, HEADER_SIZE, REVERSE_ENDIAN_CONSTANT};

/// Oldest and newest `dex\nNNN\0` versions accepted as merge input.
pub const MIN_DEX_VERSION: u32 = 35;
pub const MAX_DEX_VERSION: u32 = 40;

/// Every section kind a map list can name, in the order the merger lays them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionKind
{
    Header,
    StringIds,
    TypeIds,
    ProtoIds,
    FieldIds,
    MethodIds,
    ClassDefs,
    CallSiteIds,
    MethodHandles,
    StringData,
    TypeLists,
    EncodedArrays,
    Annotations,
    AnnotationSets,
    AnnotationSetRefLists,
    AnnotationsDirectories,
    DebugInfo,
    Code,
    ClassData,
    HiddenApiClassData,
    MapList,
}

impl SectionKind
{
    pub const ALL: [SectionKind; 21] = [
        SectionKind::Header,
        SectionKind::StringIds,
        SectionKind::TypeIds,
        SectionKind::ProtoIds,
        SectionKind::FieldIds,
        SectionKind::MethodIds,
        SectionKind::ClassDefs,
        SectionKind::CallSiteIds,
        SectionKind::MethodHandles,
        SectionKind::StringData,
        SectionKind::TypeLists,
        SectionKind::EncodedArrays,
        SectionKind::Annotations,
        SectionKind::AnnotationSets,
        SectionKind::AnnotationSetRefLists,
        SectionKind::AnnotationsDirectories,
        SectionKind::DebugInfo,
        SectionKind::Code,
        SectionKind::ClassData,
        SectionKind::HiddenApiClassData,
        SectionKind::MapList,
    ];

    /// The `map_item.type` code.
    pub const fn type_code(self) -> u16
    {
        match self
        {
            SectionKind::Header => 0x0000,
            SectionKind::StringIds => 0x0001,
            SectionKind::TypeIds => 0x0002,
            SectionKind::ProtoIds => 0x0003,
            SectionKind::FieldIds => 0x0004,
            SectionKind::MethodIds => 0x0005,
            SectionKind::ClassDefs => 0x0006,
            SectionKind::CallSiteIds => 0x0007,
            SectionKind::MethodHandles => 0x0008,
            SectionKind::MapList => 0x1000,
            SectionKind::TypeLists => 0x1001,
            SectionKind::AnnotationSetRefLists => 0x1002,
            SectionKind::AnnotationSets => 0x1003,
            SectionKind::ClassData => 0x2000,
            SectionKind::Code => 0x2001,
            SectionKind::StringData => 0x2002,
            SectionKind::DebugInfo => 0x2003,
            SectionKind::Annotations => 0x2004,
            SectionKind::EncodedArrays => 0x2005,
            SectionKind::AnnotationsDirectories => 0x2006,
            SectionKind::HiddenApiClassData => 0xf000,
        }
    }

    pub fn from_type_code(code: u16) -> Option<SectionKind>
    {
        SectionKind::ALL.iter().copied().find(|k| k.type_code() == code)
    }

    /// Item alignment required inside the section.
    pub const fn alignment(self) -> u32
    {
        match self
        {
            SectionKind::StringData
            | SectionKind::EncodedArrays
            | SectionKind::Annotations
            | SectionKind::DebugInfo
            | SectionKind::ClassData => 1,
            _ => 4,
        }
    }

    /// Sections whose size and offset the header fixes before the map is read.
    pub const fn is_header_fixed(self) -> bool
    {
        matches!(
            self,
            SectionKind::Header
                | SectionKind::StringIds
                | SectionKind::TypeIds
                | SectionKind::ProtoIds
                | SectionKind::FieldIds
                | SectionKind::MethodIds
                | SectionKind::ClassDefs
                | SectionKind::MapList
        )
    }

    fn index(self) -> usize
    {
        self as usize
    }
}

impl fmt::Display for SectionKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:04x}", self.type_code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section
{
    pub kind: SectionKind,
    /// `None` while the section is absent.
    pub offset: Option<u32>,
    /// Item count.
    pub size: u32,
    /// Gap to the next section, inferred from offsets.
    pub byte_count: u32,
}

impl Section
{
    fn absent(kind: SectionKind) -> Self
    {
        Section { kind, offset: None, size: 0, byte_count: 0 }
    }

    pub fn exists(&self) -> bool
    {
        self.offset.is_some() && self.size > 0
    }

    /// Header-style offset: zero when the section is empty.
    pub fn header_offset(&self) -> u32
    {
        if self.exists() { self.offset.unwrap_or(0) } else { 0 }
    }
}

impl fmt::Display for Section
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.offset
        {
            Some(off) => write!(f, "Section[type={} off=0x{:x} size={} byteCount={}]", self.kind, off, self.size, self.byte_count),
            None => write!(f, "Section[type={} absent]", self.kind),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl Header
{
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<Header, DexError>
    {
        if bytes.len() < HEADER_SIZE as usize {
            fail!("Not enough bytes for header: {} < 0x{:x}", bytes.len(), HEADER_SIZE);
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&read_x(bytes, ix, 8)?);
        dex_version(&magic)?;
        let checksum = read_u4(bytes, ix)?;
        let mut signature = [0u8; 20];
        signature.copy_from_slice(&read_x(bytes, ix, 20)?);

        let header = Header {
            magic,
            checksum,
            signature,
            file_size: read_u4(bytes, ix)?,
            header_size: read_u4(bytes, ix)?,
            endian_tag: read_u4(bytes, ix)?,
            link_size: read_u4(bytes, ix)?,
            link_off: read_u4(bytes, ix)?,
            map_off: read_u4(bytes, ix)?,
            string_ids_size: read_u4(bytes, ix)?,
            string_ids_off: read_u4(bytes, ix)?,
            type_ids_size: read_u4(bytes, ix)?,
            type_ids_off: read_u4(bytes, ix)?,
            proto_ids_size: read_u4(bytes, ix)?,
            proto_ids_off: read_u4(bytes, ix)?,
            field_ids_size: read_u4(bytes, ix)?,
            field_ids_off: read_u4(bytes, ix)?,
            method_ids_size: read_u4(bytes, ix)?,
            method_ids_off: read_u4(bytes, ix)?,
            class_defs_size: read_u4(bytes, ix)?,
            class_defs_off: read_u4(bytes, ix)?,
            data_size: read_u4(bytes, ix)?,
            data_off: read_u4(bytes, ix)?,
        };

        if header.endian_tag == REVERSE_ENDIAN_CONSTANT {
            fail!("Unsupported big-endian dex file (endian tag 0x{:08x})", header.endian_tag);
        }
        if header.endian_tag != ENDIAN_CONSTANT {
            fail!("Unexpected endian tag 0x{:08x}", header.endian_tag);
        }
        if header.header_size != HEADER_SIZE {
            fail!("Unexpected header size 0x{:x}", header.header_size);
        }
        Ok(header)
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_x(bytes, &self.magic);
        c += write_u4(bytes, self.checksum);
        c += write_x(bytes, &self.signature);
        c += write_u4(bytes, self.file_size);
        c += write_u4(bytes, self.header_size);
        c += write_u4(bytes, self.endian_tag);
        c += write_u4(bytes, self.link_size);
        c += write_u4(bytes, self.link_off);
        c += write_u4(bytes, self.map_off);
        c += write_u4(bytes, self.string_ids_size);
        c += write_u4(bytes, self.string_ids_off);
        c += write_u4(bytes, self.type_ids_size);
        c += write_u4(bytes, self.type_ids_off);
        c += write_u4(bytes, self.proto_ids_size);
        c += write_u4(bytes, self.proto_ids_off);
        c += write_u4(bytes, self.field_ids_size);
        c += write_u4(bytes, self.field_ids_off);
        c += write_u4(bytes, self.method_ids_size);
        c += write_u4(bytes, self.method_ids_off);
        c += write_u4(bytes, self.class_defs_size);
        c += write_u4(bytes, self.class_defs_off);
        c += write_u4(bytes, self.data_size);
        c += write_u4(bytes, self.data_off);
        c
    }

    pub fn version(&self) -> u32
    {
        dex_version(&self.magic).unwrap_or(MIN_DEX_VERSION)
    }
}

/// Parses `dex\nNNN\0` and returns `NNN`.
pub fn dex_version(magic: &[u8; 8]) -> Result<u32, DexError>
{
    if &magic[..4] != b"dex\n" || magic[7] != 0 || !magic[4..7].iter().all(|b| b.is_ascii_digit())
    {
        fail!("Invalid magic value {:02x?}", magic);
    }
    let version = magic[4..7].iter().fold(0u32, |acc, d| acc * 10 + (d - b'0') as u32);
    if !(MIN_DEX_VERSION..=MAX_DEX_VERSION).contains(&version)
    {
        fail!("Unsupported dex version {:03}", version);
    }
    Ok(version)
}

pub fn magic_for_version(version: u32) -> [u8; 8]
{
    let digits = format!("{:03}", version.min(999));
    let d = digits.as_bytes();
    [b'd', b'e', b'x', b'\n', d[0], d[1], d[2], 0]
}

#[derive(Debug, Clone)]
pub struct TableOfContents
{
    pub header: Header,
    sections: [Section; 21],
    ranges: RangeMap<u32, SectionKind>,
}

impl PartialEq for TableOfContents
{
    fn eq(&self, other: &Self) -> bool
    {
        self.sections == other.sections
    }
}

impl TableOfContents
{
    pub(crate) fn with_header(header: Header) -> Self
    {
        TableOfContents {
            header,
            sections: SectionKind::ALL.map(Section::absent),
            ranges: RangeMap::new(),
        }
    }

    /// Parses and validates the header and the map list of `bytes`.
    pub fn read_from(bytes: &[u8]) -> Result<TableOfContents, DexError>
    {
        let header = Header::read(bytes, &mut 0)?;
        if header.file_size as usize > bytes.len()
        {
            fail!("Header file_size 0x{:x} exceeds buffer length 0x{:x}", header.file_size, bytes.len());
        }
        if header.file_size < HEADER_SIZE
        {
            fail!("Header file_size 0x{:x} is smaller than the header (0x{:x})", header.file_size, HEADER_SIZE);
        }
        if header.map_off == 0
        {
            fail!("Missing map list");
        }

        let mut toc = TableOfContents::with_header(header.clone());
        toc.set(SectionKind::Header, 0, 1);
        toc.set(SectionKind::StringIds, header.string_ids_off, header.string_ids_size);
        toc.set(SectionKind::TypeIds, header.type_ids_off, header.type_ids_size);
        toc.set(SectionKind::ProtoIds, header.proto_ids_off, header.proto_ids_size);
        toc.set(SectionKind::FieldIds, header.field_ids_off, header.field_ids_size);
        toc.set(SectionKind::MethodIds, header.method_ids_off, header.method_ids_size);
        toc.set(SectionKind::ClassDefs, header.class_defs_off, header.class_defs_size);
        toc.set(SectionKind::MapList, header.map_off, 1);

        toc.read_map(bytes)?;
        toc.compute_byte_counts(header.data_off, header.data_size)?;
        Ok(toc)
    }

    fn read_map(&mut self, bytes: &[u8]) -> Result<(), DexError>
    {
        let mut ix = self.header.map_off as usize;
        let count = read_u4(bytes, &mut ix)?;
        let mut seen = HashSet::new();
        let mut previous: Option<Section> = None;

        for _ in 0..count
        {
            let type_code = read_u2(bytes, &mut ix)?;
            let _unused = read_u2(bytes, &mut ix)?;
            let size = read_u4(bytes, &mut ix)?;
            let offset = read_u4(bytes, &mut ix)?;

            let kind = match SectionKind::from_type_code(type_code)
            {
                Some(kind) => kind,
                None => fail!("No such map item: 0x{:04x}", type_code),
            };
            if !seen.insert(kind)
            {
                fail!("Duplicate map item {} at 0x{:x}", kind, offset);
            }

            let section = &mut self.sections[kind.index()];
            let consistent = if kind.is_header_fixed() {
                section.size == size && section.header_offset() == offset
            } else {
                (section.size == 0 || section.size == size) && section.offset.map_or(true, |o| o == offset)
            };
            if !consistent
            {
                fail!("Unexpected map value for {}: size {} offset 0x{:x}, header declares {}", kind, size, offset, section);
            }
            section.size = size;
            section.offset = Some(offset);

            if let Some(prev) = previous
            {
                if prev.offset > section.offset
                {
                    fail!("Map is unsorted at {}, {}", prev, section);
                }
            }
            previous = Some(*section);
        }

        for kind in SectionKind::ALL
        {
            let section = &self.sections[kind.index()];
            if section.size > 0 && !seen.contains(&kind)
            {
                fail!("Section {} declared by the header is missing from the map", kind);
            }
        }
        if self.get(SectionKind::HiddenApiClassData).exists()
        {
            warn!("ignoring hiddenapi_class_data section");
        }
        Ok(())
    }

    /// Infers each section's byte length as the gap to the next section, or to the end of
    /// the data area for the last one.
    pub(crate) fn compute_byte_counts(&mut self, data_off: u32, data_size: u32) -> Result<(), DexError>
    {
        let end = data_off as u64 + data_size as u64;
        let mut present: Vec<SectionKind> = SectionKind::ALL
            .iter()
            .copied()
            .filter(|k| self.sections[k.index()].exists())
            .collect();
        present.sort_by_key(|k| (self.sections[k.index()].offset, k.index()));

        self.ranges = RangeMap::new();
        for (i, kind) in present.iter().enumerate()
        {
            let off = self.sections[kind.index()].offset.unwrap_or(0) as u64;
            let next = match present.get(i + 1) {
                Some(k) => self.sections[k.index()].offset.unwrap_or(0) as u64,
                None => end,
            };
            if off > end || next < off
            {
                fail!("Map-data gap mismatch at {}: data ends at 0x{:x}", self.sections[kind.index()], end);
            }
            let byte_count = (next - off) as u32;
            self.sections[kind.index()].byte_count = byte_count;
            if byte_count > 0
            {
                self.ranges.insert(off as u32..next as u32, *kind);
            }
        }
        Ok(())
    }

    pub(crate) fn set(&mut self, kind: SectionKind, offset: u32, size: u32)
    {
        let section = &mut self.sections[kind.index()];
        section.size = size;
        section.offset = if size > 0 { Some(offset) } else { None };
    }

    pub fn get(&self, kind: SectionKind) -> &Section
    {
        &self.sections[kind.index()]
    }

    /// Sections in canonical kind order.
    pub fn sections(&self) -> impl Iterator<Item = &Section>
    {
        self.sections.iter()
    }

    /// The section covering file offset `offset`, if any.
    pub fn section_at(&self, offset: u32) -> Option<SectionKind>
    {
        self.ranges.get(&offset).copied()
    }

    /// Checks that a referenced offset lands inside the section it claims to point at.
    pub fn expect_in(&self, kind: SectionKind, offset: u32) -> Result<(), DexError>
    {
        match self.section_at(offset)
        {
            Some(found) if found == kind => Ok(()),
            Some(found) => fail!("Offset 0x{:x} expected in section {} but lies in {}", offset, kind, found),
            None => fail!("Offset 0x{:x} expected in section {} lies outside every section", offset, kind),
        }
    }

    /// Writes the map list: every non-empty section as `{type, unused, size, offset}`,
    /// sorted by offset.
    pub fn write_map(&self, writer: &mut SectionWriter) -> usize
    {
        let mut entries: Vec<&Section> = self.sections.iter().filter(|s| s.exists()).collect();
        entries.sort_by_key(|s| (s.offset, s.kind));

        let mut c = writer.u4(entries.len() as u32);
        for s in entries
        {
            c += writer.u2(s.kind.type_code());
            c += writer.u2(0);
            c += writer.u4(s.size);
            c += writer.u4(s.offset.unwrap_or(0));
        }
        c
    }

    /// Writes the header fields in their fixed order, taking sizes and offsets from the
    /// sections.
    pub fn write_header(&self, bytes: &mut Vec<u8>) -> usize
    {
        let section = |kind: SectionKind| {
            let s = self.get(kind);
            (s.size, s.header_offset())
        };
        let (string_ids_size, string_ids_off) = section(SectionKind::StringIds);
        let (type_ids_size, type_ids_off) = section(SectionKind::TypeIds);
        let (proto_ids_size, proto_ids_off) = section(SectionKind::ProtoIds);
        let (field_ids_size, field_ids_off) = section(SectionKind::FieldIds);
        let (method_ids_size, method_ids_off) = section(SectionKind::MethodIds);
        let (class_defs_size, class_defs_off) = section(SectionKind::ClassDefs);

        let header = Header {
            map_off: self.get(SectionKind::MapList).header_offset(),
            string_ids_size,
            string_ids_off,
            type_ids_size,
            type_ids_off,
            proto_ids_size,
            proto_ids_off,
            field_ids_size,
            field_ids_off,
            method_ids_size,
            method_ids_off,
            class_defs_size,
            class_defs_off,
            ..self.header.clone()
        };
        header.write(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Header {
        Header {
            magic: magic_for_version(35),
            checksum: 0,
            signature: [0; 20],
            file_size: 0,
            header_size: HEADER_SIZE,
            endian_tag: ENDIAN_CONSTANT,
            link_size: 0,
            link_off: 0,
            map_off: 0,
            string_ids_size: 0,
            string_ids_off: 0,
            type_ids_size: 0,
            type_ids_off: 0,
            proto_ids_size: 0,
            proto_ids_off: 0,
            field_ids_size: 0,
            field_ids_off: 0,
            method_ids_size: 0,
            method_ids_off: 0,
            class_defs_size: 0,
            class_defs_off: 0,
            data_size: 0,
            data_off: 0,
        }
    }

    /// Header, one string id, one string_data item and the map.
    fn tiny_dex(map: &[(u16, u32, u32)]) -> Vec<u8> {
        let mut h = header();
        h.string_ids_size = 1;
        h.string_ids_off = 0x70;
        h.data_off = 0x74;
        h.map_off = 0x78;
        h.data_size = 4 + 4 + 12 * map.len() as u32;
        h.file_size = 0x74 + h.data_size;

        let mut bytes = vec![];
        h.write(&mut bytes);
        write_u4(&mut bytes, 0x74);
        bytes.extend_from_slice(&[0x01, b'a', 0x00, 0x00]);
        write_u4(&mut bytes, map.len() as u32);
        for (t, size, off) in map {
            bytes.extend_from_slice(&t.to_le_bytes());
            bytes.extend_from_slice(&[0, 0]);
            write_u4(&mut bytes, *size);
            write_u4(&mut bytes, *off);
        }
        bytes
    }

    #[test]
    fn test_header_roundtrip()
    {
        let h = header();
        let mut encoded_bytes = vec![];
        h.write(&mut encoded_bytes);
        assert_eq!(encoded_bytes.len(), 0x70);
        let decoded = Header::read(&encoded_bytes, &mut 0).unwrap();
        assert_eq!(h, decoded);
        assert_eq!(decoded.version(), 35);
    }

    #[test]
    fn reads_map_and_infers_byte_counts() {
        let bytes = tiny_dex(&[(0x0000, 1, 0), (0x0001, 1, 0x70), (0x2002, 1, 0x74), (0x1000, 1, 0x78)]);
        let toc = TableOfContents::read_from(&bytes).unwrap();

        assert_eq!(toc.get(SectionKind::Header).byte_count, 0x70);
        assert_eq!(toc.get(SectionKind::StringIds).byte_count, 4);
        let data = toc.get(SectionKind::StringData);
        assert_eq!((data.offset, data.size, data.byte_count), (Some(0x74), 1, 4));
        assert_eq!(toc.get(SectionKind::MapList).byte_count, 4 + 4 * 12);
        assert!(!toc.get(SectionKind::Code).exists());

        assert_eq!(toc.section_at(0x75), Some(SectionKind::StringData));
        assert!(toc.expect_in(SectionKind::StringData, 0x74).is_ok());
        assert!(toc.expect_in(SectionKind::Code, 0x74).is_err());
    }

    #[test]
    fn unsorted_map_is_rejected() {
        let bytes = tiny_dex(&[(0x0000, 1, 0), (0x2002, 1, 0x74), (0x0001, 1, 0x70), (0x1000, 1, 0x78)]);
        let e = TableOfContents::read_from(&bytes).unwrap_err();
        assert!(e.to_string().starts_with("Map is unsorted"), "{}", e);
    }

    #[test]
    fn map_disagreeing_with_header_names_section() {
        let bytes = tiny_dex(&[(0x0000, 1, 0), (0x0001, 2, 0x70), (0x2002, 1, 0x74), (0x1000, 1, 0x78)]);
        let e = TableOfContents::read_from(&bytes).unwrap_err();
        assert!(e.to_string().contains("0x0001"), "{}", e);
    }

    #[test]
    fn unknown_map_item() {
        let bytes = tiny_dex(&[(0x0000, 1, 0), (0x0001, 1, 0x70), (0x2009, 1, 0x74), (0x1000, 1, 0x78)]);
        let e = TableOfContents::read_from(&bytes).unwrap_err();
        assert!(e.to_string().contains("0x2009"), "{}", e);
    }

    #[test]
    fn bad_magic_and_endian() {
        let mut bytes = tiny_dex(&[(0x0000, 1, 0), (0x0001, 1, 0x70), (0x2002, 1, 0x74), (0x1000, 1, 0x78)]);
        bytes[0] = b'x';
        assert!(TableOfContents::read_from(&bytes).is_err());

        let mut bytes = tiny_dex(&[(0x0000, 1, 0), (0x0001, 1, 0x70), (0x2002, 1, 0x74), (0x1000, 1, 0x78)]);
        bytes[40..44].copy_from_slice(&REVERSE_ENDIAN_CONSTANT.to_le_bytes());
        let e = TableOfContents::read_from(&bytes).unwrap_err();
        assert!(e.to_string().contains("big-endian"));
    }

    #[test]
    fn version_bounds() {
        assert_eq!(dex_version(&magic_for_version(39)).unwrap(), 39);
        assert!(dex_version(&magic_for_version(34)).is_err());
        assert!(dex_version(&magic_for_version(41)).is_err());
        assert_eq!(&magic_for_version(38), b"dex\n038\0");
    }

    #[test]
    fn write_map_skips_empty_sections() {
        let mut toc = TableOfContents::with_header(header());
        toc.set(SectionKind::Header, 0, 1);
        toc.set(SectionKind::FieldIds, 0x70, 0);
        toc.set(SectionKind::StringIds, 0x70, 3);
        toc.set(SectionKind::MapList, 0x100, 1);
        let mut w = SectionWriter::new();
        toc.write_map(&mut w);
        let bytes = w.into_bytes().unwrap();
        assert_eq!(bytes.len(), 4 + 3 * 12);
        assert_eq!(&bytes[..4], &3u32.to_le_bytes());
        assert_eq!(&bytes[16..18], &0x0001u16.to_le_bytes());
    }
}
