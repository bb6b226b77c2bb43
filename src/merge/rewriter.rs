//! Decodes a surviving class definition and renumbers everything it owns into the merged
//! index spaces. The input buffer is never touched; each class becomes a fresh owned
//! [`ClassDefItem`].

use crate::dex::dex_file::{ClassDefItem, DexFile};
use crate::dex::error::DexError;
use crate::dex::ids::{IndexKind, IndexRemap};
use crate::merge::index_map::IndexMap;

pub(crate) fn rewrite_class(dex: &DexFile, class_def: usize, map: &IndexMap) -> Result<ClassDefItem, DexError>
{
    let mut class = dex.class_def_item(class_def)?;
    remap_class(&mut class, dex.version(), map).map_err(|e| {
        let descriptor = dex.type_descriptor(class.class_idx).unwrap_or("?").to_string();
        err!(e, "class {}", descriptor)
    })?;
    Ok(class)
}

fn remap_class(class: &mut ClassDefItem, version: u32, map: &dyn IndexRemap) -> Result<(), DexError>
{
    class.superclass_idx = map.remap_optional(IndexKind::Type, class.superclass_idx)?;
    class.interfaces.remap_indices(map)?;
    class.source_file_idx = map.remap_optional(IndexKind::String, class.source_file_idx)?;
    if let Some(directory) = class.annotations.as_mut() {
        directory.remap_indices(map).map_err(|e| err!(e, "annotations"))?;
    }
    if let Some(data) = class.class_data.as_mut() {
        data.remap_indices(version, map)?;
    }
    if let Some(values) = class.static_values.as_mut() {
        for value in values.iter_mut() {
            value.remap_indices(map).map_err(|e| err!(e, "static values"))?;
        }
    }
    // last, so error contexts above can still name the class in input numbering
    class.class_idx = map.remap(IndexKind::Type, class.class_idx)?;
    Ok(())
}
