//! DEX annotation structures, decoded with the items they point at.
//!
//! The file stores annotations as a chain of offsets:
//! - annotations_directory_item → annotation_set_item / annotation_set_ref_list
//! - annotation_set_ref_list → annotation_set_item (or 0)
//! - annotation_set_item → annotation_item (wraps EncodedAnnotation)
//!
//! Reading resolves the whole chain so the merger can renumber and re-sort the entries,
//! and the assembler lays out fresh offsets.

use crate::dex::encoded_values::EncodedAnnotation;
use crate::dex::error::DexError;
use crate::dex::ids::{IndexKind, IndexRemap};
use crate::dex::table_of_contents::{SectionKind, TableOfContents};
use crate::dex::{read_u1, read_u4, write_u1};

/// annotation_item
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationItem {
    /// Visibility: 0x00 = build, 0x01 = runtime, 0x02 = system
    pub visibility: u8,
    pub annotation: EncodedAnnotation,
}

impl AnnotationItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationItem, DexError> {
        let visibility = read_u1(bytes, ix)?;
        let annotation = EncodedAnnotation::read(bytes, ix)?;
        Ok(AnnotationItem {
            visibility,
            annotation,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_u1(bytes, self.visibility) + self.annotation.write(bytes)
    }
}

/// annotation_set_item, one entry per annotation type, sorted by type index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationSetItem {
    pub entries: Vec<AnnotationItem>,
}

impl AnnotationSetItem {
    pub fn read_at(bytes: &[u8], toc: &TableOfContents, offset: u32) -> Result<AnnotationSetItem, DexError> {
        toc.expect_in(SectionKind::AnnotationSets, offset)?;
        let mut ix = offset as usize;
        let size = read_u4(bytes, &mut ix)? as usize;
        let mut entries = Vec::with_capacity(size.min(0x1000));
        for _ in 0..size {
            let item_off = read_u4(bytes, &mut ix)?;
            toc.expect_in(SectionKind::Annotations, item_off)?;
            let item = AnnotationItem::read(bytes, &mut (item_off as usize))
                .map_err(|e| err!(e, "annotation_item at 0x{:x}", item_off))?;
            entries.push(item);
        }
        Ok(AnnotationSetItem { entries })
    }

    pub fn remap_indices(&mut self, remap: &dyn IndexRemap) -> Result<(), DexError> {
        for item in self.entries.iter_mut() {
            item.annotation.remap_indices(remap)?;
        }
        self.entries.sort_by_key(|item| item.annotation.type_idx);
        Ok(())
    }
}

/// annotation_set_ref_list; `None` entries are stored as offset 0.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationSetRefList {
    pub list: Vec<Option<AnnotationSetItem>>,
}

impl AnnotationSetRefList {
    pub fn read_at(bytes: &[u8], toc: &TableOfContents, offset: u32) -> Result<AnnotationSetRefList, DexError> {
        toc.expect_in(SectionKind::AnnotationSetRefLists, offset)?;
        let mut ix = offset as usize;
        let size = read_u4(bytes, &mut ix)? as usize;
        let mut list = Vec::with_capacity(size.min(0x100));
        for _ in 0..size {
            let set_off = read_u4(bytes, &mut ix)?;
            list.push(if set_off == 0 { None } else { Some(AnnotationSetItem::read_at(bytes, toc, set_off)?) });
        }
        Ok(AnnotationSetRefList { list })
    }

    pub fn remap_indices(&mut self, remap: &dyn IndexRemap) -> Result<(), DexError> {
        for set in self.list.iter_mut().flatten() {
            set.remap_indices(remap)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldAnnotations {
    pub field_idx: u32,
    pub annotations: AnnotationSetItem,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodAnnotations {
    pub method_idx: u32,
    pub annotations: AnnotationSetItem,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterAnnotations {
    pub method_idx: u32,
    pub annotations: AnnotationSetRefList,
}

/// annotations_directory_item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationsDirectoryItem {
    pub class_annotations: Option<AnnotationSetItem>,
    pub field_annotations: Vec<FieldAnnotations>,
    pub method_annotations: Vec<MethodAnnotations>,
    pub parameter_annotations: Vec<ParameterAnnotations>,
}

impl AnnotationsDirectoryItem {
    pub fn read_at(bytes: &[u8], toc: &TableOfContents, offset: u32) -> Result<AnnotationsDirectoryItem, DexError> {
        toc.expect_in(SectionKind::AnnotationsDirectories, offset)?;
        let ix = &mut (offset as usize);
        let class_annotations_off = read_u4(bytes, ix)?;
        let fields_size = read_u4(bytes, ix)? as usize;
        let annotated_methods_size = read_u4(bytes, ix)? as usize;
        let annotated_parameters_size = read_u4(bytes, ix)? as usize;

        let class_annotations = if class_annotations_off == 0 { None } else {
            Some(AnnotationSetItem::read_at(bytes, toc, class_annotations_off)?)
        };

        let mut field_annotations = Vec::with_capacity(fields_size.min(0x1_0000));
        for _ in 0..fields_size {
            let field_idx = read_u4(bytes, ix)?;
            let set_off = read_u4(bytes, ix)?;
            field_annotations.push(FieldAnnotations { field_idx, annotations: AnnotationSetItem::read_at(bytes, toc, set_off)? });
        }

        let mut method_annotations = Vec::with_capacity(annotated_methods_size.min(0x1_0000));
        for _ in 0..annotated_methods_size {
            let method_idx = read_u4(bytes, ix)?;
            let set_off = read_u4(bytes, ix)?;
            method_annotations.push(MethodAnnotations { method_idx, annotations: AnnotationSetItem::read_at(bytes, toc, set_off)? });
        }

        let mut parameter_annotations = Vec::with_capacity(annotated_parameters_size.min(0x1_0000));
        for _ in 0..annotated_parameters_size {
            let method_idx = read_u4(bytes, ix)?;
            let list_off = read_u4(bytes, ix)?;
            parameter_annotations.push(ParameterAnnotations { method_idx, annotations: AnnotationSetRefList::read_at(bytes, toc, list_off)? });
        }

        Ok(AnnotationsDirectoryItem {
            class_annotations,
            field_annotations,
            method_annotations,
            parameter_annotations,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.class_annotations.is_none()
            && self.field_annotations.is_empty()
            && self.method_annotations.is_empty()
            && self.parameter_annotations.is_empty()
    }

    /// Renumbers every entry and re-sorts the field, method and parameter lists by their
    /// new member index.
    pub fn remap_indices(&mut self, remap: &dyn IndexRemap) -> Result<(), DexError> {
        if let Some(set) = self.class_annotations.as_mut() {
            set.remap_indices(remap)?;
        }
        for fa in self.field_annotations.iter_mut() {
            fa.field_idx = remap.remap(IndexKind::Field, fa.field_idx)?;
            fa.annotations.remap_indices(remap)?;
        }
        for ma in self.method_annotations.iter_mut() {
            ma.method_idx = remap.remap(IndexKind::Method, ma.method_idx)?;
            ma.annotations.remap_indices(remap)?;
        }
        for pa in self.parameter_annotations.iter_mut() {
            pa.method_idx = remap.remap(IndexKind::Method, pa.method_idx)?;
            pa.annotations.remap_indices(remap)?;
        }
        self.field_annotations.sort_by_key(|fa| fa.field_idx);
        self.method_annotations.sort_by_key(|ma| ma.method_idx);
        self.parameter_annotations.sort_by_key(|pa| pa.method_idx);
        Ok(())
    }
}
