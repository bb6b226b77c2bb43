//! Non-fatal findings of a merge.

use std::fmt;

use log::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic
{
    /// Two inputs define the same class and `KeepFirst` kept the earlier one.
    ClassCollision { descriptor: String, kept_input: usize, dropped_input: usize },
}

impl fmt::Display for Diagnostic
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self
        {
            Diagnostic::ClassCollision { descriptor, kept_input, dropped_input } => write!(
                f,
                "{} is defined by inputs {} and {}, keeping the definition from input {}",
                descriptor, kept_input, dropped_input, kept_input
            ),
        }
    }
}

pub trait DiagnosticSink
{
    fn report(&mut self, diagnostic: Diagnostic);
}

/// Logs every diagnostic at `warn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink
{
    fn report(&mut self, diagnostic: Diagnostic)
    {
        warn!("{}", diagnostic);
    }
}

impl DiagnosticSink for Vec<Diagnostic>
{
    fn report(&mut self, diagnostic: Diagnostic)
    {
        self.push(diagnostic);
    }
}
