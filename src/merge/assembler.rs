//! Lays out a renumbered [`DexImage`] as a DEX file.
//!
//! Sections are written in an order where every data reference points backwards:
//!
//! header, string_ids, type_ids, proto_ids, field_ids, method_ids, class_defs,
//! string_data, type_lists, encoded_arrays, annotations, annotation_sets,
//! annotation_set_ref_lists, annotations_directories, debug_info, code, class_data, map
//!
//! so ULEB128 code offsets in class data are known when they are written. The fixed
//! width offsets in the id sections are reserved as patch slots and filled in when their
//! target is emitted.

use std::collections::HashMap;

use log::debug;
use sha1::{Digest, Sha1};

use crate::dex::annotations::{AnnotationSetItem, AnnotationSetRefList, AnnotationsDirectoryItem};
use crate::dex::dex_file::{ClassDefItem, DexFile};
use crate::dex::encoded_values::write_encoded_array;
use crate::dex::error::DexError;
use crate::dex::ids::{FieldId, MethodId, ProtoId, TypeList};
use crate::dex::mutf8::{write_string_data, DexString};
use crate::dex::section::{PatchSlot, SectionWriter};
use crate::dex::table_of_contents::{magic_for_version, Header, SectionKind, TableOfContents};
use crate::dex::{write_u4, ENDIAN_CONSTANT, HEADER_SIZE};

/// The complete content of a merged file, in merged numbering.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DexImage
{
    pub version: u32,
    pub strings: Vec<DexString>,
    pub types: Vec<u32>,
    pub protos: Vec<ProtoId>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    pub classes: Vec<ClassDefItem>,
}

/// Running state of one data section. Items placed with [`DataSection::place`] are
/// shared: an encoding seen before resolves to the offset it was first written at.
struct DataSection
{
    kind: SectionKind,
    start: Option<u32>,
    count: u32,
    shared: HashMap<Vec<u8>, u32>,
}

impl DataSection
{
    fn new(kind: SectionKind) -> Self
    {
        DataSection { kind, start: None, count: 0, shared: HashMap::new() }
    }

    fn append(&mut self, w: &mut SectionWriter, encoded: &[u8]) -> u32
    {
        w.align(self.kind.alignment());
        let offset = w.position();
        self.start.get_or_insert(offset);
        self.count += 1;
        w.bytes(encoded);
        offset
    }

    fn place(&mut self, w: &mut SectionWriter, encoded: Vec<u8>) -> u32
    {
        if let Some(offset) = self.shared.get(&encoded) {
            return *offset;
        }
        let offset = self.append(w, &encoded);
        self.shared.insert(encoded, offset);
        offset
    }

    fn offset_of(&self, encoded: &[u8]) -> Result<u32, DexError>
    {
        match self.shared.get(encoded) {
            Some(offset) => Ok(*offset),
            None => Err(DexError::internal(&format!("reference to an item never written to section {}", self.kind))),
        }
    }

    fn finish(self, toc: &mut TableOfContents)
    {
        debug!("section {}: {} items at 0x{:x}", self.kind, self.count, self.start.unwrap_or(0));
        toc.set(self.kind, self.start.unwrap_or(0), self.count);
    }
}

/// Offsets of one class_def_item still waiting for their targets.
#[derive(Default)]
struct ClassSlots
{
    interfaces: Option<PatchSlot>,
    annotations: Option<PatchSlot>,
    class_data: Option<PatchSlot>,
    static_values: Option<PatchSlot>,
}

fn encode(write: impl FnOnce(&mut Vec<u8>) -> usize) -> Vec<u8>
{
    let mut bytes = vec![];
    write(&mut bytes);
    bytes
}

fn optional_slot(w: &mut SectionWriter, present: bool) -> Option<PatchSlot>
{
    if present {
        Some(w.mark())
    } else {
        w.u4(0);
        None
    }
}

fn blank_header(version: u32) -> Header
{
    Header {
        magic: magic_for_version(version),
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

/// Every annotation set a directory references, in layout order.
fn directory_sets(directory: &AnnotationsDirectoryItem) -> Vec<&AnnotationSetItem>
{
    let mut sets = vec![];
    sets.extend(directory.class_annotations.iter());
    sets.extend(directory.field_annotations.iter().map(|fa| &fa.annotations));
    sets.extend(directory.method_annotations.iter().map(|ma| &ma.annotations));
    for pa in &directory.parameter_annotations {
        sets.extend(pa.annotations.list.iter().flatten());
    }
    sets
}

fn encode_set(set: &AnnotationSetItem, items: &DataSection) -> Result<Vec<u8>, DexError>
{
    let mut bytes = vec![];
    write_u4(&mut bytes, set.entries.len() as u32);
    for item in &set.entries {
        write_u4(&mut bytes, items.offset_of(&encode(|b| item.write(b)))?);
    }
    Ok(bytes)
}

fn encode_ref_list(list: &AnnotationSetRefList, items: &DataSection, sets: &DataSection) -> Result<Vec<u8>, DexError>
{
    let mut bytes = vec![];
    write_u4(&mut bytes, list.list.len() as u32);
    for set in &list.list {
        let offset = match set {
            Some(set) => sets.offset_of(&encode_set(set, items)?)?,
            None => 0,
        };
        write_u4(&mut bytes, offset);
    }
    Ok(bytes)
}

fn encode_directory(
    directory: &AnnotationsDirectoryItem,
    items: &DataSection,
    sets: &DataSection,
    ref_lists: &DataSection,
) -> Result<Vec<u8>, DexError>
{
    let mut bytes = vec![];
    let class_annotations_off = match &directory.class_annotations {
        Some(set) => sets.offset_of(&encode_set(set, items)?)?,
        None => 0,
    };
    write_u4(&mut bytes, class_annotations_off);
    write_u4(&mut bytes, directory.field_annotations.len() as u32);
    write_u4(&mut bytes, directory.method_annotations.len() as u32);
    write_u4(&mut bytes, directory.parameter_annotations.len() as u32);
    for fa in &directory.field_annotations {
        write_u4(&mut bytes, fa.field_idx);
        write_u4(&mut bytes, sets.offset_of(&encode_set(&fa.annotations, items)?)?);
    }
    for ma in &directory.method_annotations {
        write_u4(&mut bytes, ma.method_idx);
        write_u4(&mut bytes, sets.offset_of(&encode_set(&ma.annotations, items)?)?);
    }
    for pa in &directory.parameter_annotations {
        write_u4(&mut bytes, pa.method_idx);
        write_u4(&mut bytes, ref_lists.offset_of(&encode_ref_list(&pa.annotations, items, sets)?)?);
    }
    Ok(bytes)
}

pub(crate) fn assemble(image: &DexImage) -> Result<Vec<u8>, DexError>
{
    let mut w = SectionWriter::new();
    let mut toc = TableOfContents::with_header(blank_header(image.version));
    w.bytes(&[0; HEADER_SIZE as usize]);
    toc.set(SectionKind::Header, 0, 1);

    /* Id sections */
    toc.set(SectionKind::StringIds, w.position(), image.strings.len() as u32);
    let string_slots: Vec<PatchSlot> = image.strings.iter().map(|_| w.mark()).collect();

    toc.set(SectionKind::TypeIds, w.position(), image.types.len() as u32);
    for descriptor_idx in &image.types {
        w.u4(*descriptor_idx);
    }

    toc.set(SectionKind::ProtoIds, w.position(), image.protos.len() as u32);
    let mut parameter_slots = vec![];
    for proto in &image.protos {
        w.u4(proto.shorty_idx);
        w.u4(proto.return_type_idx);
        if let Some(slot) = optional_slot(&mut w, !proto.parameters.is_empty()) {
            parameter_slots.push((slot, &proto.parameters));
        }
    }

    toc.set(SectionKind::FieldIds, w.position(), image.fields.len() as u32);
    for field in &image.fields {
        w.emit(|b| field.write(b));
    }
    toc.set(SectionKind::MethodIds, w.position(), image.methods.len() as u32);
    for method in &image.methods {
        w.emit(|b| method.write(b));
    }

    toc.set(SectionKind::ClassDefs, w.position(), image.classes.len() as u32);
    let mut class_slots = Vec::with_capacity(image.classes.len());
    for class in &image.classes {
        w.u4(class.class_idx);
        w.u4(class.access_flags);
        w.u4(class.superclass_idx);
        let interfaces = optional_slot(&mut w, !class.interfaces.is_empty());
        w.u4(class.source_file_idx);
        let annotations = optional_slot(&mut w, class.annotations.as_ref().map_or(false, |d| !d.is_empty()));
        let class_data = optional_slot(&mut w, class.class_data.as_ref().map_or(false, |d| !d.is_empty()));
        let static_values = optional_slot(&mut w, class.static_values.as_ref().map_or(false, |v| !v.is_empty()));
        class_slots.push(ClassSlots { interfaces, annotations, class_data, static_values });
    }

    /* Data */
    let data_off = w.position();

    let mut string_data = DataSection::new(SectionKind::StringData);
    for (slot, s) in string_slots.into_iter().zip(&image.strings) {
        let offset = string_data.append(&mut w, &encode(|b| write_string_data(b, s)));
        w.patch(slot, offset);
    }
    string_data.finish(&mut toc);

    let mut type_lists = DataSection::new(SectionKind::TypeLists);
    for (slot, parameters) in parameter_slots {
        let offset = type_lists.place(&mut w, encode(|b| parameters.write(b)));
        w.patch(slot, offset);
    }
    for (class, slots) in image.classes.iter().zip(class_slots.iter_mut()) {
        if let Some(slot) = slots.interfaces.take() {
            let offset = type_lists.place(&mut w, encode(|b| TypeList::write(&class.interfaces, b)));
            w.patch(slot, offset);
        }
    }
    type_lists.finish(&mut toc);

    let mut encoded_arrays = DataSection::new(SectionKind::EncodedArrays);
    for (class, slots) in image.classes.iter().zip(class_slots.iter_mut()) {
        if let (Some(slot), Some(values)) = (slots.static_values.take(), class.static_values.as_ref()) {
            let offset = encoded_arrays.place(&mut w, encode(|b| write_encoded_array(values, b)));
            w.patch(slot, offset);
        }
    }
    encoded_arrays.finish(&mut toc);

    let directories: Vec<&AnnotationsDirectoryItem> = image.classes.iter()
        .filter_map(|c| c.annotations.as_ref())
        .filter(|d| !d.is_empty())
        .collect();

    let mut items = DataSection::new(SectionKind::Annotations);
    for set in directories.iter().flat_map(|d| directory_sets(d)) {
        for item in &set.entries {
            items.place(&mut w, encode(|b| item.write(b)));
        }
    }

    let mut sets = DataSection::new(SectionKind::AnnotationSets);
    for set in directories.iter().flat_map(|d| directory_sets(d)) {
        let encoded = encode_set(set, &items)?;
        sets.place(&mut w, encoded);
    }

    let mut ref_lists = DataSection::new(SectionKind::AnnotationSetRefLists);
    for pa in directories.iter().flat_map(|d| d.parameter_annotations.iter()) {
        let encoded = encode_ref_list(&pa.annotations, &items, &sets)?;
        ref_lists.place(&mut w, encoded);
    }

    let mut directory_section = DataSection::new(SectionKind::AnnotationsDirectories);
    for (class, slots) in image.classes.iter().zip(class_slots.iter_mut()) {
        if let (Some(slot), Some(directory)) = (slots.annotations.take(), class.annotations.as_ref()) {
            let encoded = encode_directory(directory, &items, &sets, &ref_lists)?;
            let offset = directory_section.append(&mut w, &encoded);
            w.patch(slot, offset);
        }
    }
    items.finish(&mut toc);
    sets.finish(&mut toc);
    ref_lists.finish(&mut toc);
    directory_section.finish(&mut toc);

    let mut debug_info = DataSection::new(SectionKind::DebugInfo);
    let mut debug_offsets: Vec<Vec<u32>> = Vec::with_capacity(image.classes.len());
    for class in &image.classes {
        let mut offsets = vec![];
        for method in class.class_data.iter().flat_map(|d| d.methods()) {
            offsets.push(match method.code.as_ref().and_then(|c| c.debug_info.as_ref()) {
                Some(info) => debug_info.append(&mut w, &encode(|b| info.write(b))),
                None => 0,
            });
        }
        debug_offsets.push(offsets);
    }
    debug_info.finish(&mut toc);

    let mut code = DataSection::new(SectionKind::Code);
    let mut code_offsets: Vec<Vec<u32>> = Vec::with_capacity(image.classes.len());
    for (class, debug) in image.classes.iter().zip(&debug_offsets) {
        let mut offsets = vec![];
        for (method, debug_info_off) in class.class_data.iter().flat_map(|d| d.methods()).zip(debug) {
            offsets.push(match &method.code {
                Some(item) => {
                    let mut encoded = vec![];
                    item.write(&mut encoded, *debug_info_off)
                        .map_err(|e| err!(e, "code of method {}", method.method_idx))?;
                    code.append(&mut w, &encoded)
                }
                None => 0,
            });
        }
        code_offsets.push(offsets);
    }
    code.finish(&mut toc);

    let mut class_data = DataSection::new(SectionKind::ClassData);
    for ((class, slots), offsets) in image.classes.iter().zip(class_slots.iter_mut()).zip(&code_offsets) {
        if let (Some(slot), Some(data)) = (slots.class_data.take(), class.class_data.as_ref()) {
            let mut encoded = vec![];
            data.write(&mut encoded, offsets)?;
            let offset = class_data.append(&mut w, &encoded);
            w.patch(slot, offset);
        }
    }
    class_data.finish(&mut toc);

    w.align(SectionKind::MapList.alignment());
    toc.set(SectionKind::MapList, w.position(), 1);
    toc.write_map(&mut w);

    /* Header */
    let file_size = w.position();
    toc.header.file_size = file_size;
    toc.header.data_off = data_off;
    toc.header.data_size = file_size - data_off;
    let mut header = Vec::with_capacity(HEADER_SIZE as usize);
    toc.write_header(&mut header);
    w.overwrite(0, &header)?;

    let signature = Sha1::digest(&w.as_slice()[32..]);
    w.overwrite(12, signature.as_slice())?;
    let checksum = adler::adler32_slice(&w.as_slice()[12..]);
    w.overwrite(8, &checksum.to_le_bytes())?;

    let bytes = w.into_bytes()?;
    debug!("assembled {} bytes, {} classes", bytes.len(), image.classes.len());

    // the output must read back like any input
    DexFile::from_bytes(&bytes)
        .map_err(|e| DexError::internal(&format!("merged file does not read back: {}", e)))?;
    Ok(bytes)
}
