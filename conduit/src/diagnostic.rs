//! Diagnostics: warnings and errors reported while pipelines run.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// How severe a diagnostic is.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// Processing continues.
    Warning,
    /// The reporting operator cannot continue.
    Error,
}

/// A message about a pipeline, addressed to its user.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    /// How severe the diagnostic is.
    pub severity: Severity,
    /// The main message.
    pub message: String,
    /// Additional context, in order.
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// A warning with `message`.
    pub fn warning<S: Into<String>>(message: S) -> Self {
        Diagnostic { severity: Severity::Warning, message: message.into(), notes: Vec::new() }
    }
    /// An error with `message`.
    pub fn error<S: Into<String>>(message: S) -> Self {
        Diagnostic { severity: Severity::Error, message: message.into(), notes: Vec::new() }
    }
    /// Appends a note.
    pub fn note<S: Into<String>>(mut self, note: S) -> Self {
        self.notes.push(note.into());
        self
    }
    /// True for error severity.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Warning => write!(f, "warning: {}", self.message)?,
            Severity::Error => write!(f, "error: {}", self.message)?,
        }
        for note in self.notes.iter() {
            write!(f, "\n  = note: {}", note)?;
        }
        Ok(())
    }
}

/// A destination for diagnostics, shared by all nodes of a pipeline.
pub trait DiagnosticHandler: Send + Sync {
    /// Accepts one diagnostic.
    fn emit(&self, diagnostic: Diagnostic);
}

/// Prints diagnostics to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stderr;

impl DiagnosticHandler for Stderr {
    fn emit(&self, diagnostic: Diagnostic) {
        eprintln!("{}", diagnostic);
    }
}

/// Collects diagnostics for later inspection.
#[derive(Debug, Default, Clone)]
pub struct Collector {
    diagnostics: Arc<Mutex<Vec<Diagnostic>>>,
}

impl Collector {
    /// A collector without diagnostics.
    pub fn new() -> Self {
        Self::default()
    }
    /// A copy of the diagnostics collected so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self.diagnostics.lock() {
            Ok(diagnostics) => diagnostics.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
    /// The collected diagnostics of error severity.
    pub fn errors(&self) -> Vec<Diagnostic> {
        self.diagnostics().into_iter().filter(Diagnostic::is_error).collect()
    }
}

impl DiagnosticHandler for Collector {
    fn emit(&self, diagnostic: Diagnostic) {
        match self.diagnostics.lock() {
            Ok(mut diagnostics) => diagnostics.push(diagnostic),
            Err(poisoned) => poisoned.into_inner().push(diagnostic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_notes() {
        let diagnostic = Diagnostic::warning("field `ts` not found").note("from operator `delay`");
        assert_eq!(diagnostic.to_string(), "warning: field `ts` not found\n  = note: from operator `delay`");
    }

    #[test]
    fn collector_separates_errors() {
        let collector = Collector::new();
        collector.emit(Diagnostic::warning("skipped a row"));
        collector.emit(Diagnostic::error("lost connection"));
        assert_eq!(collector.diagnostics().len(), 2);
        assert_eq!(collector.errors(), vec![Diagnostic::error("lost connection")]);
    }
}
