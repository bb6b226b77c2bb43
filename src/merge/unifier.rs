//! Builds the merged id tables and decides which class definitions survive.
//!
//! Tables are unified in dependency order (strings, types, protos, then fields and
//! methods) since each later table is keyed by indices of the earlier ones. Every table
//! is deduplicated and sorted with the format's ordering, so an entry's merged index is
//! its position.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use log::{debug, info};

use crate::dex::dex_file::{ClassDefItem, DexFile};
use crate::dex::error::DexError;
use crate::dex::ids::{FieldId, IndexKind, IndexRemap, MethodId, ProtoId};
use crate::dex::mutf8::DexString;
use crate::merge::diagnostics::{Diagnostic, DiagnosticSink};
use crate::merge::index_map::IndexMap;
use crate::merge::{ClassOrder, CollisionPolicy};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct UnifiedTables
{
    pub strings: Vec<DexString>,
    /// Descriptor string index of each type.
    pub types: Vec<u32>,
    pub protos: Vec<ProtoId>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
}

/// Where a surviving class definition comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClassSource
{
    pub input: usize,
    pub class_def: usize,
}

pub(crate) fn unify(inputs: &[DexFile]) -> Result<(UnifiedTables, Vec<IndexMap>), DexError>
{
    let mut maps = vec![IndexMap::default(); inputs.len()];

    let strings: Vec<Vec<&DexString>> = inputs.iter().map(|dex| dex.strings.iter().collect()).collect();
    let (strings, tables) = unify_table(IndexKind::String, strings, |a: &&DexString, b: &&DexString| a.cmp(b))?;
    let strings: Vec<DexString> = strings.into_iter().cloned().collect();
    install(&mut maps, IndexKind::String, tables);

    let mut types = Vec::with_capacity(inputs.len());
    for (dex, map) in inputs.iter().zip(&maps) {
        types.push(dex.types.iter().map(|s| map.remap(IndexKind::String, *s)).collect::<Result<Vec<u32>, _>>()?);
    }
    let (types, tables) = unify_table(IndexKind::Type, types, u32::cmp)?;
    install(&mut maps, IndexKind::Type, tables);

    let mut protos = Vec::with_capacity(inputs.len());
    for (dex, map) in inputs.iter().zip(&maps) {
        let mut remapped = Vec::with_capacity(dex.prototypes.len());
        for p in &dex.prototypes {
            let mut p = p.clone();
            p.shorty_idx = map.remap(IndexKind::String, p.shorty_idx)?;
            p.return_type_idx = map.remap(IndexKind::Type, p.return_type_idx)?;
            p.parameters.remap_indices(map)?;
            remapped.push(p);
        }
        protos.push(remapped);
    }
    let (protos, tables) = unify_table(IndexKind::Proto, protos, ProtoId::cmp)?;
    install(&mut maps, IndexKind::Proto, tables);

    let mut fields = Vec::with_capacity(inputs.len());
    for (dex, map) in inputs.iter().zip(&maps) {
        fields.push(dex.fields.iter().map(|f| Ok(FieldId {
            class_idx: map.remap(IndexKind::Type, f.class_idx)?,
            type_idx: map.remap(IndexKind::Type, f.type_idx)?,
            name_idx: map.remap(IndexKind::String, f.name_idx)?,
        })).collect::<Result<Vec<FieldId>, DexError>>()?);
    }
    let (fields, tables) = unify_table(IndexKind::Field, fields, FieldId::cmp)?;
    install(&mut maps, IndexKind::Field, tables);

    let mut methods = Vec::with_capacity(inputs.len());
    for (dex, map) in inputs.iter().zip(&maps) {
        methods.push(dex.methods.iter().map(|m| Ok(MethodId {
            class_idx: map.remap(IndexKind::Type, m.class_idx)?,
            proto_idx: map.remap(IndexKind::Proto, m.proto_idx)?,
            name_idx: map.remap(IndexKind::String, m.name_idx)?,
        })).collect::<Result<Vec<MethodId>, DexError>>()?);
    }
    let (methods, tables) = unify_table(IndexKind::Method, methods, MethodId::cmp)?;
    install(&mut maps, IndexKind::Method, tables);

    info!(
        "unified {} inputs: {} strings, {} types, {} protos, {} fields, {} methods",
        inputs.len(), strings.len(), types.len(), protos.len(), fields.len(), methods.len()
    );
    Ok((UnifiedTables { strings, types, protos, fields, methods }, maps))
}

fn install(maps: &mut [IndexMap], kind: IndexKind, tables: Vec<Vec<u32>>)
{
    for (map, table) in maps.iter_mut().zip(tables) {
        map.set_table(kind, table);
    }
}

/// Sorts and deduplicates the union of `per_input`, then maps each input entry to its
/// position in the result.
fn unify_table<T, F>(kind: IndexKind, per_input: Vec<Vec<T>>, cmp: F) -> Result<(Vec<T>, Vec<Vec<u32>>), DexError>
where
    T: Clone,
    F: Fn(&T, &T) -> Ordering,
{
    let mut unified: Vec<T> = per_input.iter().flatten().cloned().collect();
    unified.sort_by(&cmp);
    unified.dedup_by(|a, b| cmp(&*a, &*b) == Ordering::Equal);
    if unified.len() > kind.limit() {
        return Err(DexError::index_overflow(kind, unified.len(), kind.limit()));
    }

    let mut tables = Vec::with_capacity(per_input.len());
    for items in &per_input {
        let mut table = Vec::with_capacity(items.len());
        for item in items {
            match unified.binary_search_by(|probe| cmp(probe, item)) {
                Ok(i) => table.push(i as u32),
                Err(_) => return Err(DexError::internal(&format!("{} entry vanished during unification", kind))),
            }
        }
        tables.push(table);
    }
    debug!("{} table: {} entries", kind, unified.len());
    Ok((unified, tables))
}

/// Picks one definition per merged type index, in ascending type index order. Returns
/// the survivors and the number of dropped definitions.
pub(crate) fn fold_classes(
    inputs: &[DexFile],
    maps: &[IndexMap],
    policy: CollisionPolicy,
    sink: &mut dyn DiagnosticSink,
) -> Result<(Vec<ClassSource>, usize), DexError>
{
    let mut survivors: BTreeMap<u32, ClassSource> = BTreeMap::new();
    let mut dropped = 0;
    for (input, (dex, map)) in inputs.iter().zip(maps).enumerate() {
        for (class_def, def) in dex.class_defs.iter().enumerate() {
            let type_idx = map.remap(IndexKind::Type, def.class_idx)?;
            let kept = match survivors.get(&type_idx) {
                None => {
                    survivors.insert(type_idx, ClassSource { input, class_def });
                    continue;
                }
                Some(kept) => *kept,
            };
            let descriptor = dex.type_descriptor(def.class_idx)?;
            match policy {
                CollisionPolicy::Fail => return Err(DexError::duplicate_class(descriptor)),
                CollisionPolicy::KeepFirst => {
                    dropped += 1;
                    sink.report(Diagnostic::ClassCollision {
                        descriptor: descriptor.to_string(),
                        kept_input: kept.input,
                        dropped_input: input,
                    });
                }
            }
        }
    }
    Ok((survivors.into_values().collect(), dropped))
}

/// Arranges rewritten classes (given in ascending type index order) for output.
pub(crate) fn order_classes(classes: Vec<ClassDefItem>, order: ClassOrder) -> Result<Vec<ClassDefItem>, DexError>
{
    if order == ClassOrder::TypeIndex {
        return Ok(classes);
    }

    let position: HashMap<u32, usize> = classes.iter().enumerate().map(|(i, c)| (c.class_idx, i)).collect();
    let mut depth = vec![None; classes.len()];
    let mut on_stack = vec![false; classes.len()];
    for i in 0..classes.len() {
        class_depth(i, &classes, &position, &mut depth, &mut on_stack)?;
    }

    let mut keyed: Vec<(usize, ClassDefItem)> = depth.into_iter().map(|d| d.unwrap_or(0)).zip(classes).collect();
    keyed.sort_by_key(|(d, c)| (*d, c.class_idx));
    Ok(keyed.into_iter().map(|(_, c)| c).collect())
}

/// Number of supertypes between class `i` and the nearest supertype not defined here.
fn class_depth(
    i: usize,
    classes: &[ClassDefItem],
    position: &HashMap<u32, usize>,
    depth: &mut [Option<usize>],
    on_stack: &mut [bool],
) -> Result<usize, DexError>
{
    if let Some(d) = depth[i] {
        return Ok(d);
    }
    if on_stack[i] {
        fail!("class hierarchy cycle through type {}", classes[i].class_idx);
    }
    on_stack[i] = true;
    let class = &classes[i];
    let mut d = 0;
    for super_idx in std::iter::once(class.superclass_idx).chain(class.interfaces.0.iter().copied()) {
        if let Some(&j) = position.get(&super_idx) {
            d = d.max(class_depth(j, classes, position, depth, on_stack)? + 1);
        }
    }
    on_stack[i] = false;
    depth[i] = Some(d);
    Ok(d)
}
