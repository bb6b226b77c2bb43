//! `debug_info_item`: a header followed by a small state-machine bytecode.

use crate::dex::error::DexError;
use crate::dex::ids::{IndexKind, IndexRemap};
use crate::dex::section::SectionReader;
use crate::dex::{write_sleb128, write_u1, write_uleb128, write_uleb128p1};

pub const DBG_END_SEQUENCE: u8 = 0x00;
pub const DBG_ADVANCE_PC: u8 = 0x01;
pub const DBG_ADVANCE_LINE: u8 = 0x02;
pub const DBG_START_LOCAL: u8 = 0x03;
pub const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
pub const DBG_END_LOCAL: u8 = 0x05;
pub const DBG_RESTART_LOCAL: u8 = 0x06;
pub const DBG_SET_PROLOGUE_END: u8 = 0x07;
pub const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
pub const DBG_SET_FILE: u8 = 0x09;

/// One state machine instruction. String and type operands hold `NO_INDEX` when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugOp
{
    AdvancePc(u32),
    AdvanceLine(i32),
    StartLocal { register: u32, name_idx: u32, type_idx: u32 },
    StartLocalExtended { register: u32, name_idx: u32, type_idx: u32, sig_idx: u32 },
    EndLocal(u32),
    RestartLocal(u32),
    SetPrologueEnd,
    SetEpilogueBegin,
    SetFile(u32),
    /// Opcodes 0x0a..=0xff advance line and address in one byte.
    Special(u8),
}

impl DebugOp
{
    /// Reads one op, or `None` at `DBG_END_SEQUENCE`.
    fn read(r: &mut SectionReader) -> Result<Option<DebugOp>, DexError>
    {
        let op = match r.u1()?
        {
            DBG_END_SEQUENCE => return Ok(None),
            DBG_ADVANCE_PC => DebugOp::AdvancePc(r.uleb128()?),
            DBG_ADVANCE_LINE => DebugOp::AdvanceLine(r.sleb128()?),
            DBG_START_LOCAL => DebugOp::StartLocal {
                register: r.uleb128()?,
                name_idx: r.uleb128p1()? as u32,
                type_idx: r.uleb128p1()? as u32,
            },
            DBG_START_LOCAL_EXTENDED => DebugOp::StartLocalExtended {
                register: r.uleb128()?,
                name_idx: r.uleb128p1()? as u32,
                type_idx: r.uleb128p1()? as u32,
                sig_idx: r.uleb128p1()? as u32,
            },
            DBG_END_LOCAL => DebugOp::EndLocal(r.uleb128()?),
            DBG_RESTART_LOCAL => DebugOp::RestartLocal(r.uleb128()?),
            DBG_SET_PROLOGUE_END => DebugOp::SetPrologueEnd,
            DBG_SET_EPILOGUE_BEGIN => DebugOp::SetEpilogueBegin,
            DBG_SET_FILE => DebugOp::SetFile(r.uleb128p1()? as u32),
            special => DebugOp::Special(special),
        };
        Ok(Some(op))
    }

    fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        match self
        {
            DebugOp::AdvancePc(diff) => write_u1(bytes, DBG_ADVANCE_PC) + write_uleb128(bytes, *diff),
            DebugOp::AdvanceLine(diff) => write_u1(bytes, DBG_ADVANCE_LINE) + write_sleb128(bytes, *diff),
            DebugOp::StartLocal { register, name_idx, type_idx } => {
                write_u1(bytes, DBG_START_LOCAL)
                    + write_uleb128(bytes, *register)
                    + write_uleb128p1(bytes, *name_idx as i32)
                    + write_uleb128p1(bytes, *type_idx as i32)
            }
            DebugOp::StartLocalExtended { register, name_idx, type_idx, sig_idx } => {
                write_u1(bytes, DBG_START_LOCAL_EXTENDED)
                    + write_uleb128(bytes, *register)
                    + write_uleb128p1(bytes, *name_idx as i32)
                    + write_uleb128p1(bytes, *type_idx as i32)
                    + write_uleb128p1(bytes, *sig_idx as i32)
            }
            DebugOp::EndLocal(register) => write_u1(bytes, DBG_END_LOCAL) + write_uleb128(bytes, *register),
            DebugOp::RestartLocal(register) => write_u1(bytes, DBG_RESTART_LOCAL) + write_uleb128(bytes, *register),
            DebugOp::SetPrologueEnd => write_u1(bytes, DBG_SET_PROLOGUE_END),
            DebugOp::SetEpilogueBegin => write_u1(bytes, DBG_SET_EPILOGUE_BEGIN),
            DebugOp::SetFile(name_idx) => write_u1(bytes, DBG_SET_FILE) + write_uleb128p1(bytes, *name_idx as i32),
            DebugOp::Special(op) => write_u1(bytes, *op),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo
{
    pub line_start: u32,
    /// One string index per parameter, `NO_INDEX` for unnamed ones.
    pub parameter_names: Vec<u32>,
    /// Bytecode without the terminating `DBG_END_SEQUENCE`.
    pub ops: Vec<DebugOp>,
}

impl DebugInfo
{
    pub fn read(r: &mut SectionReader) -> Result<DebugInfo, DexError>
    {
        let line_start = r.uleb128()?;
        let parameters_size = r.uleb128()?;
        let mut parameter_names = Vec::with_capacity(parameters_size.min(0x100) as usize);
        for _ in 0..parameters_size {
            parameter_names.push(r.uleb128p1()? as u32);
        }

        let mut ops = vec![];
        while let Some(op) = DebugOp::read(r)? {
            ops.push(op);
        }

        Ok(DebugInfo { line_start, parameter_names, ops })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_uleb128(bytes, self.line_start);
        c += write_uleb128(bytes, self.parameter_names.len() as u32);
        for p in &self.parameter_names
        {
            c += write_uleb128p1(bytes, *p as i32);
        }
        for op in &self.ops
        {
            c += op.write(bytes);
        }
        c += write_u1(bytes, DBG_END_SEQUENCE);
        c
    }

    /// Renumbers parameter names, local names, types and signatures, and source files.
    pub fn remap_indices(&mut self, remap: &dyn IndexRemap) -> Result<(), DexError>
    {
        for p in self.parameter_names.iter_mut() {
            *p = remap.remap_optional(IndexKind::String, *p)?;
        }
        for op in self.ops.iter_mut() {
            match op {
                DebugOp::StartLocal { name_idx, type_idx, .. } => {
                    *name_idx = remap.remap_optional(IndexKind::String, *name_idx)?;
                    *type_idx = remap.remap_optional(IndexKind::Type, *type_idx)?;
                }
                DebugOp::StartLocalExtended { name_idx, type_idx, sig_idx, .. } => {
                    *name_idx = remap.remap_optional(IndexKind::String, *name_idx)?;
                    *type_idx = remap.remap_optional(IndexKind::Type, *type_idx)?;
                    *sig_idx = remap.remap_optional(IndexKind::String, *sig_idx)?;
                }
                DebugOp::SetFile(name_idx) => {
                    *name_idx = remap.remap_optional(IndexKind::String, *name_idx)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
