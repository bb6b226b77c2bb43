//! The Dalvik opcode table: instruction format and index operand kind per opcode byte.

use bitflags::bitflags;
use once_cell::sync::Lazy;

/// Instruction formats. The name encodes the size in code units (first digit) and the
/// operand shape; only the index-bearing formats matter to the merger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Format10t,
    Format10x,
    Format11n,
    Format11x,
    Format12x,
    Format20bc,
    Format20t,
    Format21c,
    Format21h,
    Format21s,
    Format21t,
    Format22b,
    Format22c,
    Format22cs,
    Format22s,
    Format22t,
    Format22x,
    Format23x,
    Format30t,
    Format31c,
    Format31i,
    Format31t,
    Format32x,
    Format35c,
    Format35mi,
    Format35ms,
    Format3rc,
    Format3rmi,
    Format3rms,
    Format45cc,
    Format4rcc,
    Format51l,
}

impl Format {
    /// Width in 16-bit code units.
    pub const fn units(&self) -> usize {
        match self {
            Format::Format10t
            | Format::Format10x
            | Format::Format11n
            | Format::Format11x
            | Format::Format12x => 1,

            Format::Format20bc
            | Format::Format20t
            | Format::Format21c
            | Format::Format21h
            | Format::Format21s
            | Format::Format21t
            | Format::Format22b
            | Format::Format22c
            | Format::Format22cs
            | Format::Format22s
            | Format::Format22t
            | Format::Format22x
            | Format::Format23x => 2,

            Format::Format30t
            | Format::Format31c
            | Format::Format31i
            | Format::Format31t
            | Format::Format32x
            | Format::Format35c
            | Format::Format35mi
            | Format::Format35ms
            | Format::Format3rc
            | Format::Format3rmi
            | Format::Format3rms => 3,

            Format::Format45cc | Format::Format4rcc => 4,

            Format::Format51l => 5,
        }
    }
}

/// What an index operand refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    None,
    String,
    Type,
    Field,
    Method,
    CallSite,
    MethodProto,
    MethodHandle,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpcodeFlags: u32 {
        /// Only produced by dexopt; never valid in a .dex file.
        const ODEX_ONLY = 0x2;
        /// Introduced with dex version 038.
        const SINCE_038 = 0x10;
        /// Introduced with dex version 039.
        const SINCE_039 = 0x20;
    }
}

#[derive(Debug)]
pub struct Opcode {
    pub value: u8,
    pub name: &'static str,
    pub format: Format,
    pub reference_type: ReferenceType,
    /// Second index operand (the proto of invoke-polymorphic).
    pub reference_type2: Option<ReferenceType>,
    pub flags: OpcodeFlags,
}

impl Opcode {
    /// Oldest dex version in which the opcode is valid.
    pub fn min_version(&self) -> u32 {
        if self.flags.contains(OpcodeFlags::SINCE_039) {
            39
        } else if self.flags.contains(OpcodeFlags::SINCE_038) {
            38
        } else {
            35
        }
    }
}

pub fn opcode(value: u8) -> Option<&'static Opcode> {
    OPCODES[value as usize].as_ref()
}

static OPCODES: Lazy<Vec<Option<Opcode>>> = Lazy::new(build_table);

const PLAIN: OpcodeFlags = OpcodeFlags::empty();
const ODEX: OpcodeFlags = OpcodeFlags::ODEX_ONLY;

const MOVES: [(&str, Format); 9] = [
    ("move", Format::Format12x),
    ("move/from16", Format::Format22x),
    ("move/16", Format::Format32x),
    ("move-wide", Format::Format12x),
    ("move-wide/from16", Format::Format22x),
    ("move-wide/16", Format::Format32x),
    ("move-object", Format::Format12x),
    ("move-object/from16", Format::Format22x),
    ("move-object/16", Format::Format32x),
];

const CONSTS: [(&str, Format); 8] = [
    ("const/4", Format::Format11n),
    ("const/16", Format::Format21s),
    ("const", Format::Format31i),
    ("const/high16", Format::Format21h),
    ("const-wide/16", Format::Format21s),
    ("const-wide/32", Format::Format31i),
    ("const-wide", Format::Format51l),
    ("const-wide/high16", Format::Format21h),
];

const CMPS: [&str; 5] = ["cmpl-float", "cmpg-float", "cmpl-double", "cmpg-double", "cmp-long"];
const IF_TESTS: [&str; 6] = ["eq", "ne", "lt", "ge", "gt", "le"];
const ACCESS_KINDS: [&str; 7] = ["", "-wide", "-object", "-boolean", "-byte", "-char", "-short"];
const INVOKE_KINDS: [&str; 5] = ["virtual", "super", "direct", "static", "interface"];

const UNOPS: [&str; 21] = [
    "neg-int", "not-int", "neg-long", "not-long", "neg-float", "neg-double",
    "int-to-long", "int-to-float", "int-to-double", "long-to-int", "long-to-float",
    "long-to-double", "float-to-int", "float-to-long", "float-to-double", "double-to-int",
    "double-to-long", "double-to-float", "int-to-byte", "int-to-char", "int-to-short",
];

const BINOPS: [&str; 32] = [
    "add-int", "sub-int", "mul-int", "div-int", "rem-int", "and-int", "or-int", "xor-int",
    "shl-int", "shr-int", "ushr-int", "add-long", "sub-long", "mul-long", "div-long",
    "rem-long", "and-long", "or-long", "xor-long", "shl-long", "shr-long", "ushr-long",
    "add-float", "sub-float", "mul-float", "div-float", "rem-float", "add-double",
    "sub-double", "mul-double", "div-double", "rem-double",
];

const BINOPS_2ADDR: [&str; 32] = [
    "add-int/2addr", "sub-int/2addr", "mul-int/2addr", "div-int/2addr", "rem-int/2addr",
    "and-int/2addr", "or-int/2addr", "xor-int/2addr", "shl-int/2addr", "shr-int/2addr",
    "ushr-int/2addr", "add-long/2addr", "sub-long/2addr", "mul-long/2addr", "div-long/2addr",
    "rem-long/2addr", "and-long/2addr", "or-long/2addr", "xor-long/2addr", "shl-long/2addr",
    "shr-long/2addr", "ushr-long/2addr", "add-float/2addr", "sub-float/2addr",
    "mul-float/2addr", "div-float/2addr", "rem-float/2addr", "add-double/2addr",
    "sub-double/2addr", "mul-double/2addr", "div-double/2addr", "rem-double/2addr",
];

const LIT16: [&str; 8] = [
    "add-int/lit16", "rsub-int", "mul-int/lit16", "div-int/lit16", "rem-int/lit16",
    "and-int/lit16", "or-int/lit16", "xor-int/lit16",
];

const LIT8: [&str; 11] = [
    "add-int/lit8", "rsub-int/lit8", "mul-int/lit8", "div-int/lit8", "rem-int/lit8",
    "and-int/lit8", "or-int/lit8", "xor-int/lit8", "shl-int/lit8", "shr-int/lit8",
    "ushr-int/lit8",
];

const ODEX_OPS: [(u8, &str, Format); 22] = [
    (0x73, "return-void-no-barrier", Format::Format10x),
    (0xe3, "iget-volatile", Format::Format22c),
    (0xe4, "iput-volatile", Format::Format22c),
    (0xe5, "sget-volatile", Format::Format21c),
    (0xe6, "sput-volatile", Format::Format21c),
    (0xe7, "iget-object-volatile", Format::Format22c),
    (0xe8, "iget-wide-volatile", Format::Format22c),
    (0xe9, "iput-wide-volatile", Format::Format22c),
    (0xea, "sget-wide-volatile", Format::Format21c),
    (0xeb, "sput-wide-volatile", Format::Format21c),
    (0xed, "throw-verification-error", Format::Format20bc),
    (0xee, "execute-inline", Format::Format35mi),
    (0xef, "execute-inline/range", Format::Format3rmi),
    (0xf0, "invoke-object-init/range", Format::Format3rc),
    (0xf1, "return-void-barrier", Format::Format10x),
    (0xf2, "iget-quick", Format::Format22cs),
    (0xf3, "iget-wide-quick", Format::Format22cs),
    (0xf4, "iget-object-quick", Format::Format22cs),
    (0xf5, "iput-quick", Format::Format22cs),
    (0xf6, "iput-wide-quick", Format::Format22cs),
    (0xf7, "iput-object-quick", Format::Format22cs),
    (0xf8, "invoke-virtual-quick", Format::Format35ms),
];

fn build_table() -> Vec<Option<Opcode>> {
    let mut table: Vec<Option<Opcode>> = (0..256).map(|_| None).collect();
    let mut def = |value: u8, name: &'static str, format: Format, reference_type: ReferenceType, flags: OpcodeFlags| {
        table[value as usize] = Some(Opcode { value, name, format, reference_type, reference_type2: None, flags });
    };

    def(0x00, "nop", Format::Format10x, ReferenceType::None, PLAIN);
    for (i, (name, format)) in MOVES.iter().enumerate() {
        def(0x01 + i as u8, *name, *format, ReferenceType::None, PLAIN);
    }
    def(0x0a, "move-result", Format::Format11x, ReferenceType::None, PLAIN);
    def(0x0b, "move-result-wide", Format::Format11x, ReferenceType::None, PLAIN);
    def(0x0c, "move-result-object", Format::Format11x, ReferenceType::None, PLAIN);
    def(0x0d, "move-exception", Format::Format11x, ReferenceType::None, PLAIN);
    def(0x0e, "return-void", Format::Format10x, ReferenceType::None, PLAIN);
    def(0x0f, "return", Format::Format11x, ReferenceType::None, PLAIN);
    def(0x10, "return-wide", Format::Format11x, ReferenceType::None, PLAIN);
    def(0x11, "return-object", Format::Format11x, ReferenceType::None, PLAIN);
    for (i, (name, format)) in CONSTS.iter().enumerate() {
        def(0x12 + i as u8, *name, *format, ReferenceType::None, PLAIN);
    }
    def(0x1a, "const-string", Format::Format21c, ReferenceType::String, PLAIN);
    def(0x1b, "const-string/jumbo", Format::Format31c, ReferenceType::String, PLAIN);
    def(0x1c, "const-class", Format::Format21c, ReferenceType::Type, PLAIN);
    def(0x1d, "monitor-enter", Format::Format11x, ReferenceType::None, PLAIN);
    def(0x1e, "monitor-exit", Format::Format11x, ReferenceType::None, PLAIN);
    def(0x1f, "check-cast", Format::Format21c, ReferenceType::Type, PLAIN);
    def(0x20, "instance-of", Format::Format22c, ReferenceType::Type, PLAIN);
    def(0x21, "array-length", Format::Format12x, ReferenceType::None, PLAIN);
    def(0x22, "new-instance", Format::Format21c, ReferenceType::Type, PLAIN);
    def(0x23, "new-array", Format::Format22c, ReferenceType::Type, PLAIN);
    def(0x24, "filled-new-array", Format::Format35c, ReferenceType::Type, PLAIN);
    def(0x25, "filled-new-array/range", Format::Format3rc, ReferenceType::Type, PLAIN);
    def(0x26, "fill-array-data", Format::Format31t, ReferenceType::None, PLAIN);
    def(0x27, "throw", Format::Format11x, ReferenceType::None, PLAIN);
    def(0x28, "goto", Format::Format10t, ReferenceType::None, PLAIN);
    def(0x29, "goto/16", Format::Format20t, ReferenceType::None, PLAIN);
    def(0x2a, "goto/32", Format::Format30t, ReferenceType::None, PLAIN);
    def(0x2b, "packed-switch", Format::Format31t, ReferenceType::None, PLAIN);
    def(0x2c, "sparse-switch", Format::Format31t, ReferenceType::None, PLAIN);
    for (i, name) in CMPS.iter().enumerate() {
        def(0x2d + i as u8, *name, Format::Format23x, ReferenceType::None, PLAIN);
    }
    for (i, test) in IF_TESTS.iter().enumerate() {
        def(0x32 + i as u8, leak(format!("if-{}", test)), Format::Format22t, ReferenceType::None, PLAIN);
        def(0x38 + i as u8, leak(format!("if-{}z", test)), Format::Format21t, ReferenceType::None, PLAIN);
    }
    for (i, kind) in ACCESS_KINDS.iter().enumerate() {
        let i = i as u8;
        def(0x44 + i, leak(format!("aget{}", kind)), Format::Format23x, ReferenceType::None, PLAIN);
        def(0x4b + i, leak(format!("aput{}", kind)), Format::Format23x, ReferenceType::None, PLAIN);
        def(0x52 + i, leak(format!("iget{}", kind)), Format::Format22c, ReferenceType::Field, PLAIN);
        def(0x59 + i, leak(format!("iput{}", kind)), Format::Format22c, ReferenceType::Field, PLAIN);
        def(0x60 + i, leak(format!("sget{}", kind)), Format::Format21c, ReferenceType::Field, PLAIN);
        def(0x67 + i, leak(format!("sput{}", kind)), Format::Format21c, ReferenceType::Field, PLAIN);
    }
    for (i, kind) in INVOKE_KINDS.iter().enumerate() {
        def(0x6e + i as u8, leak(format!("invoke-{}", kind)), Format::Format35c, ReferenceType::Method, PLAIN);
        def(0x74 + i as u8, leak(format!("invoke-{}/range", kind)), Format::Format3rc, ReferenceType::Method, PLAIN);
    }
    for (i, name) in UNOPS.iter().enumerate() {
        def(0x7b + i as u8, *name, Format::Format12x, ReferenceType::None, PLAIN);
    }
    for (i, name) in BINOPS.iter().enumerate() {
        def(0x90 + i as u8, *name, Format::Format23x, ReferenceType::None, PLAIN);
        def(0xb0 + i as u8, BINOPS_2ADDR[i], Format::Format12x, ReferenceType::None, PLAIN);
    }
    for (i, name) in LIT16.iter().enumerate() {
        def(0xd0 + i as u8, *name, Format::Format22s, ReferenceType::None, PLAIN);
    }
    for (i, name) in LIT8.iter().enumerate() {
        def(0xd8 + i as u8, *name, Format::Format22b, ReferenceType::None, PLAIN);
    }
    for (value, name, format) in ODEX_OPS.iter() {
        def(*value, *name, *format, ReferenceType::None, ODEX);
    }
    def(0xf9, "invoke-virtual-quick/range", Format::Format3rms, ReferenceType::None, ODEX);
    def(0xfa, "invoke-polymorphic", Format::Format45cc, ReferenceType::Method, OpcodeFlags::SINCE_038);
    def(0xfb, "invoke-polymorphic/range", Format::Format4rcc, ReferenceType::Method, OpcodeFlags::SINCE_038);
    def(0xfc, "invoke-custom", Format::Format35c, ReferenceType::CallSite, OpcodeFlags::SINCE_038);
    def(0xfd, "invoke-custom/range", Format::Format3rc, ReferenceType::CallSite, OpcodeFlags::SINCE_038);
    def(0xfe, "const-method-handle", Format::Format21c, ReferenceType::MethodHandle, OpcodeFlags::SINCE_039);
    def(0xff, "const-method-type", Format::Format21c, ReferenceType::MethodProto, OpcodeFlags::SINCE_039);

    for value in [0xfa, 0xfb] {
        if let Some(op) = table[value].as_mut() {
            op.reference_type2 = Some(ReferenceType::MethodProto);
        }
    }
    table
}

/// Opcode names built from parts live as long as the table itself.
fn leak(name: String) -> &'static str {
    Box::leak(name.into_boxed_str())
}
