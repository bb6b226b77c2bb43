/* The source container: one parsed input DEX file */

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, warn};
use zip::read::ZipArchive;

use crate::dex::annotations::AnnotationsDirectoryItem;
use crate::dex::class_data::ClassDataItem;
use crate::dex::encoded_values::{read_encoded_array, EncodedValue};
use crate::dex::error::DexError;
use crate::dex::ids::{ClassDef, FieldId, MethodId, ProtoId, RawProtoId, TypeList};
use crate::dex::mutf8::DexString;
use crate::dex::section::SectionReader;
use crate::dex::table_of_contents::{SectionKind, TableOfContents};
use crate::dex::{read_u4, NO_INDEX};

/* Access flags */
pub const ACC_PUBLIC: u32 = 0x1;
pub const ACC_STATIC: u32 = 0x8;
pub const ACC_ABSTRACT: u32 = 0x400;
pub const ACC_CONSTRUCTOR: u32 = 0x10000;

/// Resolves pool indices of a DEX file into readable descriptors.
pub trait RefResolver {
    fn string(&self, idx: u32) -> String;
    fn type_desc(&self, idx: u32) -> String;
    fn field_ref(&self, idx: u32) -> (String, String, String);  // (class, name, type)
    fn method_ref(&self, idx: u32) -> (String, String, String); // (class, name, proto)
    fn proto(&self, idx: u32) -> String;
}

/// class_def_item with everything it points at decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDefItem {
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: u32,
    pub interfaces: TypeList,
    pub source_file_idx: u32,
    pub annotations: Option<AnnotationsDirectoryItem>,
    pub class_data: Option<ClassDataItem>,
    pub static_values: Option<Vec<EncodedValue>>,
}

#[derive(Debug)]
pub struct DexFile {
    bytes: Vec<u8>,
    toc: TableOfContents,
    version: u32,
    pub strings: Vec<DexString>,
    pub types: Vec<u32>,
    pub prototypes: Vec<ProtoId>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    pub class_defs: Vec<ClassDef>,
}

impl DexFile {

    pub fn from_bytes(bytes: &[u8]) -> Result<DexFile, DexError>
    {
        DexFile::from_vec(bytes.to_vec())
    }

    pub fn from_vec(bytes: Vec<u8>) -> Result<DexFile, DexError>
    {
        let toc = TableOfContents::read_from(&bytes)?;
        let version = toc.header.version();

        let strings = read_table(&bytes, &toc, SectionKind::StringIds, |bytes, ix| {
            let data_off = read_u4(bytes, ix)?;
            toc.expect_in(SectionKind::StringData, data_off)?;
            SectionReader::new(bytes, data_off)
                .string_data()
                .map_err(|e| err!(e, "string_data_item at 0x{:x}", data_off))
        })?;
        let types = read_table(&bytes, &toc, SectionKind::TypeIds, |bytes, ix| read_u4(bytes, ix))?;
        let prototypes = read_table(&bytes, &toc, SectionKind::ProtoIds, |bytes, ix| {
            let raw = RawProtoId::read(bytes, ix)?;
            let parameters = if raw.parameters_off == 0 { TypeList::default() } else {
                toc.expect_in(SectionKind::TypeLists, raw.parameters_off)?;
                TypeList::read(bytes, &mut (raw.parameters_off as usize))?
            };
            Ok(ProtoId { return_type_idx: raw.return_type_idx, parameters, shorty_idx: raw.shorty_idx })
        })?;
        let fields = read_table(&bytes, &toc, SectionKind::FieldIds, FieldId::read)?;
        let methods = read_table(&bytes, &toc, SectionKind::MethodIds, MethodId::read)?;
        let class_defs = read_table(&bytes, &toc, SectionKind::ClassDefs, ClassDef::read)?;

        let dex = DexFile { bytes, toc, version, strings, types, prototypes, fields, methods, class_defs };
        dex.validate_ids()?;
        debug!(
            "loaded dex {:03}: {} strings, {} types, {} protos, {} fields, {} methods, {} classes",
            dex.version, dex.strings.len(), dex.types.len(), dex.prototypes.len(),
            dex.fields.len(), dex.methods.len(), dex.class_defs.len()
        );
        Ok(dex)
    }

    /// Loads a `.dex` file, or the `classes.dex` entry of a jar/apk/zip archive.
    pub fn from_path(path: &Path) -> Result<DexFile, DexError>
    {
        let mut all = DexFile::all_from_path(path)?;
        if all.is_empty() {
            fail!("{} holds no classes.dex", path.display());
        }
        Ok(all.swap_remove(0))
    }

    /// Loads every DEX file at `path`: the file itself, or `classes.dex`, `classes2.dex`,
    /// ... from an archive.
    pub fn all_from_path(path: &Path) -> Result<Vec<DexFile>, DexError>
    {
        let mut file = File::open(path)?;
        let mut magic = [0u8; 4];
        let is_dex = file.read(&mut magic)? == 4 && &magic == b"dex\n";
        if is_dex {
            let bytes = std::fs::read(path)?;
            return Ok(vec![DexFile::from_vec(bytes).map_err(|e| err!(e, "{}", path.display()))?]);
        }

        let mut archive = ZipArchive::new(File::open(path)?)
            .map_err(|e| DexError::io(&format!("{}: {}", path.display(), e)))?;
        let mut dex_files = vec![];
        for n in 1.. {
            let name = if n == 1 { "classes.dex".to_string() } else { format!("classes{}.dex", n) };
            let mut entry = match archive.by_name(&name) {
                Ok(entry) => entry,
                Err(zip::result::ZipError::FileNotFound) => break,
                Err(e) => return Err(DexError::io(&format!("{}!{}: {}", path.display(), name, e))),
            };
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            dex_files.push(DexFile::from_vec(bytes).map_err(|e| err!(e, "{}!{}", path.display(), name))?);
        }
        Ok(dex_files)
    }

    pub fn version(&self) -> u32 { self.version }

    pub fn table_of_contents(&self) -> &TableOfContents { &self.toc }

    pub fn bytes(&self) -> &[u8] { &self.bytes }

    /// Adler-32 over everything after the checksum field.
    pub fn checksum_matches(&self) -> bool
    {
        let end = (self.toc.header.file_size as usize).min(self.bytes.len());
        adler::adler32_slice(&self.bytes[12..end]) == self.toc.header.checksum
    }

    /// True when the file declares call sites or method handles.
    pub fn uses_method_handles(&self) -> bool
    {
        self.toc.get(SectionKind::CallSiteIds).exists() || self.toc.get(SectionKind::MethodHandles).exists()
    }

    pub fn type_descriptor(&self, type_idx: u32) -> Result<&str, DexError>
    {
        match self.types.get(type_idx as usize) {
            Some(string_idx) => Ok(self.strings[*string_idx as usize].as_str()),
            None => fail!("type index {} out of range ({} types)", type_idx, self.types.len()),
        }
    }

    /// Decodes class definition `index` together with its interfaces, annotations, class
    /// data, code and static values.
    pub fn class_def_item(&self, index: usize) -> Result<ClassDefItem, DexError>
    {
        let def = match self.class_defs.get(index) {
            Some(def) => *def,
            None => fail!("class_def index {} out of range", index),
        };
        self.decode_class_def(&def).map_err(|e| {
            let descriptor = self.type_descriptor(def.class_idx).unwrap_or("?").to_string();
            err!(e, "class {}", descriptor)
        })
    }

    fn decode_class_def(&self, def: &ClassDef) -> Result<ClassDefItem, DexError>
    {
        let bytes = &self.bytes;
        let toc = &self.toc;
        let interfaces = if def.interfaces_off == 0 { TypeList::default() } else {
            toc.expect_in(SectionKind::TypeLists, def.interfaces_off)?;
            TypeList::read(bytes, &mut (def.interfaces_off as usize))?
        };
        let annotations = if def.annotations_off == 0 { None } else {
            Some(AnnotationsDirectoryItem::read_at(bytes, toc, def.annotations_off)?).filter(|d| !d.is_empty())
        };
        let class_data = if def.class_data_off == 0 { None } else {
            Some(ClassDataItem::read_at(bytes, toc, def.class_data_off)?)
        };
        let static_values = if def.static_values_off == 0 { None } else {
            toc.expect_in(SectionKind::EncodedArrays, def.static_values_off)?;
            Some(read_encoded_array(bytes, &mut (def.static_values_off as usize))?)
        };
        Ok(ClassDefItem {
            class_idx: def.class_idx,
            access_flags: def.access_flags,
            superclass_idx: def.superclass_idx,
            interfaces,
            source_file_idx: def.source_file_idx,
            annotations,
            class_data,
            static_values,
        })
    }

    /// Every id record must point inside the tables it indexes.
    fn validate_ids(&self) -> Result<(), DexError>
    {
        let strings = self.strings.len();
        let types = self.types.len();
        let check = |what: &str, idx: u32, limit: usize| -> Result<(), DexError> {
            if idx as usize >= limit {
                fail!("{} index {} out of range ({} entries)", what, idx, limit);
            }
            Ok(())
        };

        for t in &self.types { check("type descriptor string", *t, strings)?; }
        for p in &self.prototypes {
            check("proto shorty string", p.shorty_idx, strings)?;
            check("proto return type", p.return_type_idx, types)?;
            for t in &p.parameters.0 { check("proto parameter type", *t, types)?; }
        }
        for f in &self.fields {
            check("field class", f.class_idx, types)?;
            check("field type", f.type_idx, types)?;
            check("field name string", f.name_idx, strings)?;
        }
        for m in &self.methods {
            check("method class", m.class_idx, types)?;
            check("method proto", m.proto_idx, self.prototypes.len())?;
            check("method name string", m.name_idx, strings)?;
        }
        for c in &self.class_defs {
            check("class_def class", c.class_idx, types)?;
            if c.superclass_idx != NO_INDEX { check("class_def superclass", c.superclass_idx, types)?; }
            if c.source_file_idx != NO_INDEX { check("class_def source file", c.source_file_idx, strings)?; }
        }
        if !self.checksum_matches() {
            warn!("dex checksum mismatch: header says 0x{:08x}", self.toc.header.checksum);
        }
        Ok(())
    }

    fn proto_desc(&self, pid: usize) -> String {
        match self.prototypes.get(pid) {
            Some(p) => {
                let mut s = String::from("(");
                for &t in &p.parameters.0 { s.push_str(&self.type_desc(t)); }
                s.push(')');
                s.push_str(&self.type_desc(p.return_type_idx));
                s
            }
            None => format!("proto@{}", pid),
        }
    }
}

fn read_table<T, F>(bytes: &[u8], toc: &TableOfContents, kind: SectionKind, mut read: F) -> Result<Vec<T>, DexError>
where
    F: FnMut(&[u8], &mut usize) -> Result<T, DexError>,
{
    let section = toc.get(kind);
    let mut items = Vec::with_capacity(section.size.min(0x1_0000) as usize);
    if let Some(offset) = section.offset {
        let mut ix = offset as usize;
        for i in 0..section.size {
            items.push(read(bytes, &mut ix).map_err(|e| err!(e, "item {} of section {}", i, kind))?);
        }
    }
    Ok(items)
}

impl RefResolver for DexFile {
    fn string(&self, idx: u32) -> String {
        self.strings.get(idx as usize).map(DexString::to_string).unwrap_or_else(|| format!("string@{}", idx))
    }

    fn type_desc(&self, idx: u32) -> String {
        self.type_descriptor(idx).map(|s| s.to_string()).unwrap_or_else(|_| format!("Ltype@{};", idx))
    }

    fn field_ref(&self, idx: u32) -> (String, String, String) {
        match self.fields.get(idx as usize) {
            Some(f) => (self.type_desc(f.class_idx), self.string(f.name_idx), self.type_desc(f.type_idx)),
            None => {
                warn!("[resolver] field_ref {} OOB (fields.len={})", idx, self.fields.len());
                (format!("Lclass@{};", idx), format!("field@{}", idx), String::from("Ljava/lang/Object;"))
            }
        }
    }

    fn method_ref(&self, idx: u32) -> (String, String, String) {
        match self.methods.get(idx as usize) {
            Some(m) => (self.type_desc(m.class_idx), self.string(m.name_idx), self.proto_desc(m.proto_idx as usize)),
            None => {
                warn!("[resolver] method_ref {} OOB (methods.len={})", idx, self.methods.len());
                (format!("Lclass@{};", idx), format!("method@{}", idx), String::from("()V"))
            }
        }
    }

    fn proto(&self, idx: u32) -> String {
        self.proto_desc(idx as usize)
    }
}
