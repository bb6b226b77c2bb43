//! # dexmerge
//!
//! A library for merging several Android DEX files into a single DEX file.
//!
//! ```no_run
//! use dexmerge::{merge_dex, CollisionPolicy};
//! use dexmerge::merge::diagnostics::LogSink;
//!
//! let a = std::fs::read("a.dex").unwrap();
//! let b = std::fs::read("b.dex").unwrap();
//! let merged = merge_dex(&[&a, &b], CollisionPolicy::Fail, &mut LogSink).unwrap();
//! std::fs::write("classes.dex", merged).unwrap();
//! ```
#[macro_use]
pub mod dex;
pub mod merge;
#[cfg(test)]
mod tests;

pub use dex::{DexError, DexErrorKind, DexFile};
pub use merge::{merge_dex, ClassOrder, CollisionPolicy, DexMerger, MergeOptions, MergeStats, MergedDex};
