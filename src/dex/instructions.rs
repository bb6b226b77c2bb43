//! Walks a method's `insns` array and locates the index operands of each instruction.
//!
//! Only index operands are rewritten; registers, literals and branch offsets are left
//! alone, so an instruction never changes length.

use crate::dex::error::DexError;
use crate::dex::ids::{IndexKind, IndexRemap};
use crate::dex::opcodes::{opcode, Format, Opcode, OpcodeFlags, ReferenceType};
use crate::dex::table_of_contents::MAX_DEX_VERSION;

pub const PACKED_SWITCH_PAYLOAD: u16 = 0x0100;
pub const SPARSE_SWITCH_PAYLOAD: u16 = 0x0200;
pub const ARRAY_PAYLOAD: u16 = 0x0300;

/// One index operand inside an instruction stream.
#[derive(Debug, Clone, Copy)]
pub struct IndexOperand
{
    /// Code unit offset of the instruction.
    pub pc: usize,
    /// Code unit offset of the operand itself.
    pub position: usize,
    pub opcode: &'static Opcode,
    pub reference_type: ReferenceType,
    /// 32-bit operand spanning two code units (`const-string/jumbo`).
    pub wide: bool,
    pub value: u32,
}

impl IndexOperand
{
    pub fn index_kind(&self) -> Result<IndexKind, DexError>
    {
        match self.reference_type
        {
            ReferenceType::String => Ok(IndexKind::String),
            ReferenceType::Type => Ok(IndexKind::Type),
            ReferenceType::Field => Ok(IndexKind::Field),
            ReferenceType::Method => Ok(IndexKind::Method),
            ReferenceType::MethodProto => Ok(IndexKind::Proto),
            ReferenceType::CallSite | ReferenceType::MethodHandle | ReferenceType::None => {
                fail!("{} at pc 0x{:x} uses a {:?} reference, which cannot be merged", self.opcode.name, self.pc, self.reference_type)
            }
        }
    }
}

/// Calls `visit(pc, opcode)` for every instruction, skipping over switch and array data
/// payloads.
pub fn walk<F>(insns: &[u16], version: u32, mut visit: F) -> Result<(), DexError>
where
    F: FnMut(usize, &'static Opcode) -> Result<(), DexError>,
{
    let mut pc = 0;
    while pc < insns.len()
    {
        let unit = insns[pc];
        if unit & 0xff == 0 && unit != 0
        {
            if let Some(units) = payload_units(insns, pc)?
            {
                pc += units;
                continue;
            }
        }

        let op = match opcode((unit & 0xff) as u8)
        {
            Some(op) => op,
            None => fail!("Unknown opcode 0x{:02x} at pc 0x{:x}", unit & 0xff, pc),
        };
        if op.flags.contains(OpcodeFlags::ODEX_ONLY)
        {
            fail!("Odex-only instruction {} at pc 0x{:x}", op.name, pc);
        }
        if op.min_version() > version
        {
            fail!("{} at pc 0x{:x} requires dex version {:03}, file is {:03}", op.name, pc, op.min_version(), version);
        }
        let units = op.format.units();
        if pc + units > insns.len()
        {
            fail!("Truncated {} at pc 0x{:x}", op.name, pc);
        }
        visit(pc, op)?;
        pc += units;
    }
    Ok(())
}

/// Length of the data payload starting at `pc`, or `None` for a plain `nop`.
fn payload_units(insns: &[u16], pc: usize) -> Result<Option<usize>, DexError>
{
    let ident = insns[pc];
    let units: u64 = match ident
    {
        PACKED_SWITCH_PAYLOAD => payload_header(insns, pc, 2)?[1] as u64 * 2 + 4,
        SPARSE_SWITCH_PAYLOAD => payload_header(insns, pc, 2)?[1] as u64 * 4 + 2,
        ARRAY_PAYLOAD => {
            let h = payload_header(insns, pc, 4)?;
            let width = h[1] as u64;
            let size = h[2] as u64 | (h[3] as u64) << 16;
            (size * width + 1) / 2 + 4
        }
        _ => return Ok(None),
    };
    if pc as u64 + units > insns.len() as u64
    {
        fail!("Truncated payload 0x{:04x} at pc 0x{:x}", ident, pc);
    }
    Ok(Some(units as usize))
}

fn payload_header(insns: &[u16], pc: usize, len: usize) -> Result<&[u16], DexError>
{
    match insns.get(pc..pc + len)
    {
        Some(h) => Ok(h),
        None => fail!("Truncated payload 0x{:04x} at pc 0x{:x}", insns[pc], pc),
    }
}

fn push_operands(insns: &[u16], pc: usize, op: &'static Opcode, out: &mut Vec<IndexOperand>)
{
    if op.reference_type == ReferenceType::None
    {
        return;
    }
    let narrow = |position: usize, reference_type: ReferenceType| IndexOperand {
        pc,
        position: pc + position,
        opcode: op,
        reference_type,
        wide: false,
        value: insns[pc + position] as u32,
    };
    match op.format
    {
        Format::Format31c => out.push(IndexOperand {
            pc,
            position: pc + 1,
            opcode: op,
            reference_type: op.reference_type,
            wide: true,
            value: insns[pc + 1] as u32 | (insns[pc + 2] as u32) << 16,
        }),
        Format::Format21c | Format::Format22c | Format::Format35c | Format::Format3rc => {
            out.push(narrow(1, op.reference_type));
        }
        Format::Format45cc | Format::Format4rcc => {
            out.push(narrow(1, op.reference_type));
            if let Some(second) = op.reference_type2 {
                out.push(narrow(3, second));
            }
        }
        _ => {}
    }
}

/// Lists every index operand in `insns`.
pub fn index_operands(insns: &[u16]) -> Result<Vec<IndexOperand>, DexError>
{
    operands_for_version(insns, MAX_DEX_VERSION)
}

fn operands_for_version(insns: &[u16], version: u32) -> Result<Vec<IndexOperand>, DexError>
{
    let mut operands = vec![];
    walk(insns, version, |pc, op| {
        push_operands(insns, pc, op, &mut operands);
        Ok(())
    })?;
    Ok(operands)
}

/// Rewrites every index operand in place. A 16-bit operand whose new index no longer
/// fits is an index overflow.
pub fn remap_instructions(insns: &mut [u16], version: u32, remap: &dyn IndexRemap) -> Result<(), DexError>
{
    for operand in operands_for_version(insns, version)?
    {
        let kind = operand.index_kind()?;
        let new = remap.remap(kind, operand.value)?;
        if operand.wide
        {
            insns[operand.position] = new as u16;
            insns[operand.position + 1] = (new >> 16) as u16;
        }
        else if new > 0xffff
        {
            let e = DexError::index_overflow(kind, new as usize + 1, 1 << 16);
            return Err(err!(e, "{} at pc 0x{:x}", operand.opcode.name, operand.pc));
        }
        else
        {
            insns[operand.position] = new as u16;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::error::DexErrorKind;

    struct Plus(u32);

    impl IndexRemap for Plus {
        fn remap(&self, kind: IndexKind, old: u32) -> Result<u32, DexError> {
            match kind {
                IndexKind::String => Ok(old + self.0),
                _ => Ok(old + 1),
            }
        }
    }

    /// const-string v0, string@5; packed-switch payload; invoke-polymorphic; const-string/jumbo
    fn sample() -> Vec<u16> {
        vec![
            0x001a, 0x0005,                         // const-string v0, string@5
            0x002b, 0x0008, 0x0000,                 // packed-switch v0, +8
            0x0000,                                 // nop (alignment)
            0x10fa, 0x0003, 0x0000, 0x0007,         // invoke-polymorphic {v0}, method@3, proto@7
            0x0100, 0x0001, 0x0000, 0x0000, 0x0003, 0x0000, // packed-switch-payload, one target
            0x011b, 0x0002, 0x0001,                 // const-string/jumbo v1, string@0x10002
            0x000e,                                 // return-void
        ]
    }

    #[test]
    fn finds_operands_and_skips_payloads() {
        let operands = index_operands(&sample()).unwrap();
        let found: Vec<(usize, ReferenceType, u32)> = operands.iter().map(|o| (o.position, o.reference_type, o.value)).collect();
        assert_eq!(found, vec![
            (1, ReferenceType::String, 5),
            (7, ReferenceType::Method, 3),
            (9, ReferenceType::MethodProto, 7),
            (17, ReferenceType::String, 0x10002),
        ]);
    }

    #[test]
    fn remap_rewrites_in_place() {
        let mut insns = sample();
        remap_instructions(&mut insns, 38, &Plus(0x10)).unwrap();
        assert_eq!(insns[1], 0x0015);
        assert_eq!(insns[7], 4);
        assert_eq!(insns[9], 8);
        assert_eq!((insns[17], insns[18]), (0x0012, 0x0001));
        assert_eq!(insns.len(), sample().len());
        // payload untouched
        assert_eq!(&insns[10..16], &sample()[10..16]);
    }

    #[test]
    fn narrow_string_overflow() {
        let mut insns = vec![0x001a, 0xfff0, 0x000e];
        let e = remap_instructions(&mut insns, 35, &Plus(0x20)).unwrap_err();
        assert!(e.is_index_overflow(), "{}", e);
        assert!(matches!(e.kind(), DexErrorKind::IndexOverflow { index: IndexKind::String, .. }));
    }

    #[test]
    fn rejects_unknown_odex_and_newer_opcodes() {
        assert!(index_operands(&[0x003e]).is_err());
        assert!(index_operands(&[0x00f2, 0x0000]).unwrap_err().to_string().contains("iget-quick"));
        let e = remap_instructions(&mut [0x10fa, 0, 0, 0], 35, &Plus(0)).unwrap_err();
        assert!(e.to_string().contains("requires dex version 038"), "{}", e);
        assert!(remap_instructions(&mut [0x10fc, 0, 0], 38, &Plus(0)).is_err());
    }

    #[test]
    fn array_payload_size() {
        // fill-array-data-payload: width 1, three elements -> 4 + 2 units
        let insns = vec![0x0300, 0x0001, 0x0003, 0x0000, 0x0201, 0x0003, 0x001c, 0x0004];
        let operands = index_operands(&insns).unwrap();
        assert_eq!(operands.len(), 1);
        assert_eq!(operands[0].pc, 6);
        assert_eq!(operands[0].reference_type, ReferenceType::Type);
    }

    #[test]
    fn truncated_instruction() {
        assert!(index_operands(&[0x001a]).is_err());
        assert!(index_operands(&[0x0200, 0x0005, 0x0000]).is_err());
    }
}
