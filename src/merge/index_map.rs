//! Old → new index tables for one input.

use crate::dex::error::DexError;
use crate::dex::ids::{IndexKind, IndexRemap};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMap
{
    strings: Vec<u32>,
    types: Vec<u32>,
    protos: Vec<u32>,
    fields: Vec<u32>,
    methods: Vec<u32>,
}

impl IndexMap
{
    /// `table(kind)[old]` is the merged index of input index `old`.
    pub fn table(&self, kind: IndexKind) -> &[u32]
    {
        match kind
        {
            IndexKind::String => &self.strings,
            IndexKind::Type => &self.types,
            IndexKind::Proto => &self.protos,
            IndexKind::Field => &self.fields,
            IndexKind::Method => &self.methods,
        }
    }

    pub(crate) fn set_table(&mut self, kind: IndexKind, table: Vec<u32>)
    {
        match kind
        {
            IndexKind::String => self.strings = table,
            IndexKind::Type => self.types = table,
            IndexKind::Proto => self.protos = table,
            IndexKind::Field => self.fields = table,
            IndexKind::Method => self.methods = table,
        }
    }
}

impl IndexRemap for IndexMap
{
    fn remap(&self, kind: IndexKind, old: u32) -> Result<u32, DexError>
    {
        match self.table(kind).get(old as usize)
        {
            Some(new) => Ok(*new),
            None => fail!("{} index {} out of range ({} entries)", kind, old, self.table(kind).len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::NO_INDEX;

    #[test]
    fn maps_and_rejects_out_of_range() {
        let mut map = IndexMap::default();
        map.set_table(IndexKind::Type, vec![4, 0, 9]);
        assert_eq!(map.remap(IndexKind::Type, 2).unwrap(), 9);
        assert!(map.remap(IndexKind::Type, 3).is_err());
        assert!(map.remap(IndexKind::Method, 0).is_err());
        assert_eq!(map.remap_optional(IndexKind::Type, NO_INDEX).unwrap(), NO_INDEX);
    }
}
