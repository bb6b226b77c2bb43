//! Merging several DEX files into one.
//!
//! A merge session owns every table it builds: inputs are parsed into [`DexFile`]s,
//! their id tables unified, the surviving classes renumbered and the result laid out by
//! the assembler. Nothing is shared between sessions.
//!
//! ```no_run
//! use dexmerge::merge::{DexMerger, MergeOptions};
//!
//! # fn main() -> Result<(), dexmerge::dex::DexError> {
//! let a = std::fs::read("a.dex")?;
//! let b = std::fs::read("b.dex")?;
//! let mut merger = DexMerger::new(MergeOptions::default());
//! merger.add(&a)?.add(&b)?;
//! let merged = merger.merge()?;
//! std::fs::write("merged.dex", &merged.bytes)?;
//! # Ok(())
//! # }
//! ```

pub mod diagnostics;
pub mod index_map;
mod unifier;
mod rewriter;
pub(crate) mod assembler;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::dex::dex_file::DexFile;
use crate::dex::error::DexError;
use crate::dex::table_of_contents::MIN_DEX_VERSION;
use crate::merge::assembler::{assemble, DexImage};
use crate::merge::diagnostics::{DiagnosticSink, LogSink};
use crate::merge::rewriter::rewrite_class;
use crate::merge::unifier::{fold_classes, order_classes, unify};

pub use diagnostics::Diagnostic;
pub use index_map::IndexMap;

/// What to do when two inputs define the same class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollisionPolicy
{
    /// Abort with [`crate::dex::DexErrorKind::DuplicateClass`].
    #[default]
    Fail,
    /// Keep the definition of the earliest input.
    KeepFirst,
}

/// Order of the merged class_defs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassOrder
{
    /// Ascending merged type index.
    #[default]
    TypeIndex,
    /// Superclasses and interfaces defined in the merged file before their subtypes.
    SupertypesFirst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeOptions
{
    pub collision_policy: CollisionPolicy,
    pub class_order: ClassOrder,
    /// Reject inputs whose Adler-32 checksum does not match instead of warning.
    pub verify_input_checksums: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats
{
    pub inputs: usize,
    pub strings: usize,
    pub types: usize,
    pub protos: usize,
    pub fields: usize,
    pub methods: usize,
    pub classes: usize,
    /// Definitions dropped by [`CollisionPolicy::KeepFirst`].
    pub classes_dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedDex
{
    pub bytes: Vec<u8>,
    pub stats: MergeStats,
}

pub struct DexMerger<'s>
{
    options: MergeOptions,
    inputs: Vec<DexFile>,
    sink: Option<&'s mut dyn DiagnosticSink>,
}

impl<'s> DexMerger<'s>
{
    pub fn new(options: MergeOptions) -> Self
    {
        DexMerger { options, inputs: vec![], sink: None }
    }

    /// Sends non-fatal diagnostics to `sink` instead of the log.
    pub fn with_sink(mut self, sink: &'s mut dyn DiagnosticSink) -> Self
    {
        self.sink = Some(sink);
        self
    }

    /// Parses and queues one input. Inputs keep the order they were added in, which is
    /// the order [`CollisionPolicy::KeepFirst`] ranks them by.
    pub fn add(&mut self, bytes: &[u8]) -> Result<&mut Self, DexError>
    {
        let dex = DexFile::from_bytes(bytes).map_err(|e| err!(e, "input {}", self.inputs.len()))?;
        self.add_dex(dex)
    }

    pub fn add_dex(&mut self, dex: DexFile) -> Result<&mut Self, DexError>
    {
        let input = self.inputs.len();
        if self.options.verify_input_checksums && !dex.checksum_matches() {
            let e = DexError::new("Checksum mismatch");
            return Err(err!(e, "input {}", input));
        }
        if dex.uses_method_handles() {
            let e = DexError::new("Call sites and method handles cannot be merged");
            return Err(err!(e, "input {}", input));
        }
        debug!("input {}: dex {:03} with {} classes", input, dex.version(), dex.class_defs.len());
        self.inputs.push(dex);
        Ok(self)
    }

    pub fn merge(self) -> Result<MergedDex, DexError>
    {
        let DexMerger { options, inputs, sink } = self;
        let mut log_sink = LogSink;
        let sink: &mut dyn DiagnosticSink = match sink {
            Some(sink) => sink,
            None => &mut log_sink,
        };

        let (tables, maps) = unify(&inputs)?;
        let (sources, classes_dropped) = fold_classes(&inputs, &maps, options.collision_policy, sink)?;

        let mut classes = Vec::with_capacity(sources.len());
        for source in &sources {
            let dex = &inputs[source.input];
            classes.push(rewrite_class(dex, source.class_def, &maps[source.input])
                .map_err(|e| err!(e, "input {}", source.input))?);
        }
        let classes = order_classes(classes, options.class_order)?;

        let version = inputs.iter().map(DexFile::version).max().unwrap_or(MIN_DEX_VERSION);
        let stats = MergeStats {
            inputs: inputs.len(),
            strings: tables.strings.len(),
            types: tables.types.len(),
            protos: tables.protos.len(),
            fields: tables.fields.len(),
            methods: tables.methods.len(),
            classes: classes.len(),
            classes_dropped,
        };
        let image = DexImage {
            version,
            strings: tables.strings,
            types: tables.types,
            protos: tables.protos,
            fields: tables.fields,
            methods: tables.methods,
            classes,
        };
        let bytes = assemble(&image)?;
        info!(
            "merged {} inputs into {} bytes: {} classes ({} dropped), dex {:03}",
            stats.inputs, bytes.len(), stats.classes, stats.classes_dropped, version
        );
        Ok(MergedDex { bytes, stats })
    }
}

/// Merges `inputs` in order and returns the new file.
pub fn merge_dex(inputs: &[&[u8]], policy: CollisionPolicy, sink: &mut dyn DiagnosticSink) -> Result<Vec<u8>, DexError>
{
    let options = MergeOptions { collision_policy: policy, ..MergeOptions::default() };
    let mut merger = DexMerger::new(options).with_sink(sink);
    for input in inputs {
        merger.add(input)?;
    }
    Ok(merger.merge()?.bytes)
}
