//! `code_item` with its try ranges, catch handlers and debug info.

use std::collections::HashMap;

use log::warn;

use crate::dex::debug_info::DebugInfo;
use crate::dex::error::DexError;
use crate::dex::ids::{IndexKind, IndexRemap};
use crate::dex::instructions::remap_instructions;
use crate::dex::section::SectionReader;
use crate::dex::table_of_contents::{SectionKind, TableOfContents};
use crate::dex::{write_sleb128, write_u2, write_u4, write_uleb128, write_x};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTypeAddrPair {
    pub type_idx: u32,
    pub addr: u32,
}

/// encoded_catch_handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCatchHandler {
    pub handlers: Vec<EncodedTypeAddrPair>,
    pub catch_all_addr: Option<u32>,
}

impl EncodedCatchHandler {
    pub fn read(r: &mut SectionReader) -> Result<EncodedCatchHandler, DexError> {
        let size = r.sleb128()?;
        let count = size.unsigned_abs() as usize;
        let mut handlers = Vec::with_capacity(count.min(0x100));
        for _ in 0..count {
            handlers.push(EncodedTypeAddrPair { type_idx: r.uleb128()?, addr: r.uleb128()? });
        }
        let catch_all_addr = if size <= 0 { Some(r.uleb128()?) } else { None };
        Ok(EncodedCatchHandler { handlers, catch_all_addr })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let count = self.handlers.len() as i32;
        let mut c = write_sleb128(bytes, if self.catch_all_addr.is_some() { -count } else { count });
        for p in &self.handlers {
            c += write_uleb128(bytes, p.type_idx);
            c += write_uleb128(bytes, p.addr);
        }
        if let Some(addr) = self.catch_all_addr { c += write_uleb128(bytes, addr); }
        c
    }
}

/// try_item. The handler is referenced by its position in [`CodeItem::handlers`] rather
/// than by byte offset, which is only meaningful for one particular encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryItem {
    pub start_addr: u32,
    pub insn_count: u16,
    pub handler_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeItem
{
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub debug_info: Option<DebugInfo>,
    pub insns: Vec<u16>,
    pub tries: Vec<TryItem>,
    pub handlers: Vec<EncodedCatchHandler>,
}

impl CodeItem
{
    pub fn read_at(bytes: &[u8], toc: &TableOfContents, offset: u32) -> Result<CodeItem, DexError>
    {
        toc.expect_in(SectionKind::Code, offset)?;
        let mut r = SectionReader::new(bytes, offset);
        let registers_size = r.u2()?;
        let ins_size = r.u2()?;
        let outs_size = r.u2()?;
        let tries_size = r.u2()?;

        let debug_info_off = r.u4()?;
        let debug_info = if debug_info_off == 0 { None } else {
            toc.expect_in(SectionKind::DebugInfo, debug_info_off)?;
            Some(DebugInfo::read(&mut SectionReader::new(bytes, debug_info_off))
                .map_err(|e| err!(e, "debug_info_item at 0x{:x}", debug_info_off))?)
        };

        let insns_size = r.u4()? as usize;
        if r.position() + insns_size * 2 > bytes.len() {
            fail!("insns of {} code units run past the end of the file", insns_size);
        }
        let mut insns = Vec::with_capacity(insns_size);
        for _ in 0..insns_size { insns.push(r.u2()?); }

        let mut tries = Vec::with_capacity(tries_size as usize);
        let mut handlers = vec![];
        if tries_size > 0 {
            if insns_size & 1 != 0 {
                let padding = r.u2()?;
                if padding != 0 {
                    warn!("non-zero code_item padding 0x{:04x} at 0x{:x}", padding, r.position() - 2);
                }
            }
            let mut raw_tries = Vec::with_capacity(tries_size as usize);
            for _ in 0..tries_size {
                raw_tries.push((r.u4()?, r.u2()?, r.u2()?));
            }

            let list_start = r.position();
            let handlers_size = r.uleb128()? as usize;
            let mut by_offset = HashMap::with_capacity(handlers_size.min(0x1_0000));
            for i in 0..handlers_size {
                let entry_off = r.position() - list_start;
                let handler = EncodedCatchHandler::read(&mut r)
                    .map_err(|e| err!(e, "encoded_catch_handler #{} at 0x{:x}", i, list_start + entry_off))?;
                by_offset.insert(entry_off, i);
                handlers.push(handler);
            }

            for (start_addr, insn_count, handler_off) in raw_tries {
                let handler_index = match by_offset.get(&(handler_off as usize)) {
                    Some(i) => *i,
                    None => fail!("try_item handler_off 0x{:x} does not start a catch handler", handler_off),
                };
                tries.push(TryItem { start_addr, insn_count, handler_index });
            }
        }

        Ok(CodeItem { registers_size, ins_size, outs_size, debug_info, insns, tries, handlers })
    }

    /// Writes the item with `debug_info_off` already known. Each try item's `handler_off`
    /// is recomputed from the re-encoded handler list.
    pub fn write(&self, bytes: &mut Vec<u8>, debug_info_off: u32) -> Result<usize, DexError>
    {
        let mut c = 0;
        c += write_u2(bytes, self.registers_size);
        c += write_u2(bytes, self.ins_size);
        c += write_u2(bytes, self.outs_size);
        c += write_u2(bytes, self.tries.len() as u16);
        c += write_u4(bytes, debug_info_off);
        c += write_u4(bytes, self.insns.len() as u32);
        for i in &self.insns { c += write_u2(bytes, *i); }

        if self.tries.is_empty() {
            return Ok(c);
        }
        if self.insns.len() & 1 != 0 {
            c += write_u2(bytes, 0);
        }

        let mut list = vec![];
        let mut offsets = Vec::with_capacity(self.handlers.len());
        write_uleb128(&mut list, self.handlers.len() as u32);
        for h in &self.handlers {
            offsets.push(list.len());
            h.write(&mut list);
        }

        for t in &self.tries {
            let handler_off = match offsets.get(t.handler_index) {
                Some(off) if *off <= u16::MAX as usize => *off as u16,
                Some(off) => fail!("catch handler offset 0x{:x} does not fit a try_item", off),
                None => return Err(DexError::internal("try_item refers to a missing catch handler")),
            };
            c += write_u4(bytes, t.start_addr);
            c += write_u2(bytes, t.insn_count);
            c += write_u2(bytes, handler_off);
        }
        c += write_x(bytes, &list);
        Ok(c)
    }

    /// Renumbers the instruction operands, the caught exception types and the debug info.
    pub fn remap_indices(&mut self, version: u32, remap: &dyn IndexRemap) -> Result<(), DexError>
    {
        remap_instructions(&mut self.insns, version, remap)?;
        for handler in self.handlers.iter_mut() {
            for pair in handler.handlers.iter_mut() {
                pair.type_idx = remap.remap(IndexKind::Type, pair.type_idx)?;
            }
        }
        if let Some(debug_info) = self.debug_info.as_mut() {
            debug_info.remap_indices(remap)?;
        }
        Ok(())
    }
}
