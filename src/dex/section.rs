//! Positioned cursors over a DEX buffer.
//!
//! [`SectionReader`] walks an immutable input buffer, [`SectionWriter`] grows an output
//! buffer and hands out [`PatchSlot`]s for 4-byte offsets whose target is not written yet.

use crate::dex::error::DexError;
use crate::dex::mutf8::{read_string_data, write_string_data, DexString};
use crate::dex::{align_to, read_sleb128, read_u1, read_u2, read_u4, read_uleb128, read_uleb128p1, write_sleb128, write_u1, write_u2, write_u4, write_uleb128, write_uleb128p1, write_x};

#[derive(Debug, Clone)]
pub struct SectionReader<'a>
{
    bytes: &'a [u8],
    ix: usize,
}

impl<'a> SectionReader<'a>
{
    pub fn new(bytes: &'a [u8], offset: u32) -> Self
    {
        SectionReader { bytes, ix: offset as usize }
    }

    pub fn position(&self) -> usize { self.ix }

    pub fn u1(&mut self) -> Result<u8, DexError> { read_u1(self.bytes, &mut self.ix) }
    pub fn u2(&mut self) -> Result<u16, DexError> { read_u2(self.bytes, &mut self.ix) }
    pub fn u4(&mut self) -> Result<u32, DexError> { read_u4(self.bytes, &mut self.ix) }
    pub fn uleb128(&mut self) -> Result<u32, DexError> { read_uleb128(self.bytes, &mut self.ix) }
    pub fn uleb128p1(&mut self) -> Result<i32, DexError> { read_uleb128p1(self.bytes, &mut self.ix) }
    pub fn sleb128(&mut self) -> Result<i32, DexError> { read_sleb128(self.bytes, &mut self.ix) }

    pub fn string_data(&mut self) -> Result<DexString, DexError>
    {
        read_string_data(self.bytes, &mut self.ix)
    }
}

/// Opaque handle to a reserved 4-byte offset in a [`SectionWriter`].
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "a marked offset has to be patched"]
pub struct PatchSlot(usize);

#[derive(Debug, Default)]
pub struct SectionWriter
{
    buf: Vec<u8>,
    pending: usize,
}

impl SectionWriter
{
    pub fn new() -> Self
    {
        SectionWriter::default()
    }

    pub fn position(&self) -> u32 { self.buf.len() as u32 }

    pub fn u1(&mut self, val: u8) -> usize { write_u1(&mut self.buf, val) }
    pub fn u2(&mut self, val: u16) -> usize { write_u2(&mut self.buf, val) }
    pub fn u4(&mut self, val: u32) -> usize { write_u4(&mut self.buf, val) }
    pub fn uleb128(&mut self, val: u32) -> usize { write_uleb128(&mut self.buf, val) }
    pub fn uleb128p1(&mut self, val: i32) -> usize { write_uleb128p1(&mut self.buf, val) }
    pub fn sleb128(&mut self, val: i32) -> usize { write_sleb128(&mut self.buf, val) }
    pub fn bytes(&mut self, val: &[u8]) -> usize { write_x(&mut self.buf, val) }
    pub fn string_data(&mut self, s: &DexString) -> usize { write_string_data(&mut self.buf, s) }

    /// Hands the buffer to an item encoder that appends to a plain `Vec<u8>`.
    pub fn emit<R>(&mut self, write: impl FnOnce(&mut Vec<u8>) -> R) -> R { write(&mut self.buf) }

    /// Zero-fills up to the next multiple of `alignment` (a power of two).
    pub fn align(&mut self, alignment: u32) -> usize
    {
        let target = align_to(self.position(), alignment) as usize;
        let pad = target - self.buf.len();
        self.buf.resize(target, 0);
        pad
    }

    /// Reserves a 4-byte offset that must later be filled with [`SectionWriter::patch`].
    pub fn mark(&mut self) -> PatchSlot
    {
        let slot = PatchSlot(self.buf.len());
        self.buf.extend_from_slice(&[0; 4]);
        self.pending += 1;
        slot
    }

    pub fn patch(&mut self, slot: PatchSlot, value: u32)
    {
        self.buf[slot.0..slot.0 + 4].copy_from_slice(&value.to_le_bytes());
        self.pending -= 1;
    }

    /// Replaces already written bytes at `position`, used for the header backfill.
    pub fn overwrite(&mut self, position: usize, bytes: &[u8]) -> Result<(), DexError>
    {
        if position + bytes.len() > self.buf.len()
        {
            return Err(DexError::internal("overwrite past the end of the output buffer"));
        }
        self.buf[position..position + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] { &self.buf }

    /// Finishes the buffer; every slot handed out by [`SectionWriter::mark`] must have
    /// been patched.
    pub fn into_bytes(self) -> Result<Vec<u8>, DexError>
    {
        if self.pending != 0
        {
            return Err(DexError::internal(&format!("{} offsets were never patched", self.pending)));
        }
        Ok(self.buf)
    }
}
