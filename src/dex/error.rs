use std::fmt;

use crate::dex::ids::IndexKind;

macro_rules! err {
    ($base:ident, $msg:literal) => {
        DexError::with_context($base, $msg.to_string())
    };
    ($base:ident, $fmtstr:literal, $($args:tt)*) => {
        DexError::with_context($base, format!($fmtstr, $($args)*))
    };
    ($msg:literal) => {
        DexError::new($msg)
    };
    ($fmtstr:literal, $($args:tt)*) => {
        DexError::new(&format!($fmtstr, $($args)*))
    };
}


#[macro_export]
macro_rules! fail {
    ($msg:literal) => {
        return Err(DexError::new($msg))
    };
    (($msg:literal), ($context:literal)) => {
        return Err(DexError::with_context(DexError::new($msg), $context.to_string()))
    };
    ($fmtstr:literal, $($args:tt)*) => {
        return Err(DexError::new(&format!($fmtstr, $($args)*)))
    };
    (($fmtstr:literal, $($args:tt)*), ($context:literal)) => {
        return Err(DexError::with_context(DexError::new(&format!($fmtstr, $($args)*)), $context.to_string()))
    };
    (($fmtstr:literal, $($args:tt)*), ($contextfmt:literal, $($contextargs:tt)*)) => {
        return Err(DexError::with_context(DexError::new(&format!($fmtstr, $($args)*)), format!($contextfmt, $($contextargs)*)))
    };
}

/// Classifies a [`DexError`] so callers can react to specific failures, most importantly
/// an index overflow which can be retried with fewer inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DexErrorKind
{
    /// Bad magic, endian tag, header/map disagreement or an out of range reference.
    Format,
    /// Malformed LEB128 or modified UTF-8.
    Encoding,
    /// A unified table (or a rewritten operand) no longer fits its index width.
    IndexOverflow { index: IndexKind, count: usize, limit: usize },
    /// Two inputs define the same class under `CollisionPolicy::Fail`.
    DuplicateClass { descriptor: String },
    Io,
    /// The assembler produced an inconsistent layout.
    Internal,
}

#[derive(Debug, PartialEq, Eq)]
pub struct DexError
{
    kind: DexErrorKind,
    msg: String,
    contexts: Vec<String>,
}

impl DexError
{
    pub(crate) fn new(msg: &str) -> Self
    {
        DexError::of_kind(DexErrorKind::Format, msg)
    }

    pub(crate) fn of_kind(kind: DexErrorKind, msg: &str) -> Self
    {
        DexError {
            kind,
            msg: msg.to_string(),
            contexts: Vec::new(),
        }
    }

    pub(crate) fn encoding(msg: &str) -> Self
    {
        DexError::of_kind(DexErrorKind::Encoding, msg)
    }

    pub(crate) fn internal(msg: &str) -> Self
    {
        DexError::of_kind(DexErrorKind::Internal, msg)
    }

    pub(crate) fn io(msg: &str) -> Self
    {
        DexError::of_kind(DexErrorKind::Io, msg)
    }

    pub(crate) fn index_overflow(index: IndexKind, count: usize, limit: usize) -> Self
    {
        DexError::of_kind(
            DexErrorKind::IndexOverflow { index, count, limit },
            &format!("{} index overflow: {} entries, limit is {}", index.name(), count, limit),
        )
    }

    pub(crate) fn duplicate_class(descriptor: &str) -> Self
    {
        DexError::of_kind(
            DexErrorKind::DuplicateClass { descriptor: descriptor.to_string() },
            &format!("Multiple dex files define {}", descriptor),
        )
    }

    pub(crate) fn with_context(base: DexError, context: String) -> Self
    {
        let mut contexts = base.contexts;
        contexts.push(context);
        DexError { kind: base.kind, msg: base.msg, contexts }
    }

    pub fn kind(&self) -> &DexErrorKind
    {
        &self.kind
    }

    pub fn message(&self) -> &str
    {
        &self.msg
    }

    /// True when the merge failed only because the inputs do not fit one DEX file.
    pub fn is_index_overflow(&self) -> bool
    {
        matches!(self.kind, DexErrorKind::IndexOverflow { .. })
    }
}

impl fmt::Display for DexError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.msg)?;
        let mut connector = " for ";
        for context in &self.contexts
        {
            write!(f, "{}{}", connector, context)?;
            connector = " of ";
        }
        Ok(())
    }
}

impl std::error::Error for DexError {}

impl From<std::io::Error> for DexError
{
    fn from(value: std::io::Error) -> Self
    {
        DexError::io(&format!("io Error: {}", value))
    }
}
