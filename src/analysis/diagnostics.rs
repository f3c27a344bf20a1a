//! Diagnostics collection for layout recovery.
//!
//! Layout recovery is best-effort: operations the engine does not model, phi cycles, oversized
//! expression sets, recursion cut-offs and conflicting member sizes all degrade the result
//! instead of aborting it. Each such event is recorded as a [`Diagnostic`] so callers can judge
//! how much of a recovered layout to trust.
//!
//! The [`Diagnostics`] container uses `boxcar::Vec` for thread-safe, lock-free append
//! operations, so summaries computed in parallel can report into one shared session container
//! without synchronization.
//!
//! # Key Components
//!
//! - [`Diagnostics`] - Thread-safe container for diagnostic entries
//! - [`Diagnostic`] - Individual entry with severity, kind and context
//! - [`DiagnosticSeverity`] - Severity level (Info, Warning, Error)
//! - [`DiagnosticKind`] - What degraded the analysis
//!
//! # Usage Examples
//!
//! ```rust
//! use layoutscope::analysis::{Diagnostic, DiagnosticKind, DiagnosticSeverity, Diagnostics};
//!
//! let diagnostics = Diagnostics::new();
//! diagnostics.warning(
//!     DiagnosticKind::ExpressionSetOverflow,
//!     "binding of v12 truncated to 32 expressions",
//! );
//! diagnostics.push(
//!     Diagnostic::new(
//!         DiagnosticSeverity::Error,
//!         DiagnosticKind::ArityMismatch,
//!         "call passes 1 argument(s), callee declares 2",
//!     )
//!     .with_location(0x401000),
//! );
//!
//! assert!(diagnostics.has_errors());
//! assert_eq!(diagnostics.by_kind(DiagnosticKind::ExpressionSetOverflow).len(), 1);
//! println!("{}", diagnostics.summary());
//! ```
//!
//! # Thread Safety
//!
//! All types in this module are [`Send`] and [`Sync`].

use std::fmt::{self, Write};

use strum::Display;

use crate::ir::FunctionId;

/// Severity level of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum DiagnosticSeverity {
    /// Informational message, not indicating a loss of precision by itself.
    ///
    /// Used for expected events such as phi back-edges being cut.
    Info,

    /// The result is still usable, but some detail was dropped or guessed.
    #[strum(serialize = "WARN")]
    Warning,

    /// Part of the analysis could not be performed at all.
    Error,
}

/// What degraded the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DiagnosticKind {
    /// An operation kind or operand shape the expression builder does not model. The output
    /// was bound to an unknown leaf.
    UnsupportedOperation,

    /// A value depends on itself through a phi merge. The back-edge operand was replaced by a
    /// cycle placeholder.
    CycleDetected,

    /// A call was not expanded because the callee recursed or the call chain was too deep.
    RecursionLimitExceeded,

    /// A binding exceeded the node limit and was truncated in discovery order.
    ExpressionSetOverflow,

    /// Two accesses to the same struct overlap with different extents.
    ConflictingMemberLayout,

    /// A call passes a different number of arguments than the callee declares.
    ArityMismatch,

    /// The IR graph could not answer a lookup while a summary was computed.
    AnalysisFailure,
}

impl DiagnosticKind {
    /// Returns the severity this kind is reported with.
    #[must_use]
    pub const fn severity(self) -> DiagnosticSeverity {
        match self {
            DiagnosticKind::CycleDetected => DiagnosticSeverity::Info,
            DiagnosticKind::UnsupportedOperation
            | DiagnosticKind::RecursionLimitExceeded
            | DiagnosticKind::ExpressionSetOverflow
            | DiagnosticKind::ConflictingMemberLayout => DiagnosticSeverity::Warning,
            DiagnosticKind::ArityMismatch | DiagnosticKind::AnalysisFailure => {
                DiagnosticSeverity::Error
            }
        }
    }
}

/// A single diagnostic entry with context information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level of this diagnostic.
    pub severity: DiagnosticSeverity,

    /// What degraded the analysis.
    pub kind: DiagnosticKind,

    /// Human-readable description of the issue.
    pub message: String,

    /// Function being analyzed when the issue was found.
    pub function: Option<FunctionId>,

    /// Code location of the operation that caused the issue.
    pub location: Option<u64>,
}

impl Diagnostic {
    /// Creates a new diagnostic entry.
    ///
    /// # Arguments
    ///
    /// * `severity` - Severity level of the diagnostic
    /// * `kind` - What degraded the analysis
    /// * `message` - Human-readable description
    pub fn new(
        severity: DiagnosticSeverity,
        kind: DiagnosticKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            function: None,
            location: None,
        }
    }

    /// Creates a diagnostic with the default severity of its kind.
    pub fn of(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self::new(kind.severity(), kind, message)
    }

    /// Adds the function context to the diagnostic.
    #[must_use]
    pub fn with_function(mut self, function: FunctionId) -> Self {
        self.function = Some(function);
        self
    }

    /// Adds the code location to the diagnostic.
    #[must_use]
    pub fn with_location(mut self, location: u64) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.kind, self.message)?;

        if let Some(function) = self.function {
            write!(f, " (function: {function})")?;
        }

        if let Some(location) = self.location {
            write!(f, " (at: 0x{location:08x})")?;
        }

        Ok(())
    }
}

/// Thread-safe container for collecting diagnostic entries.
///
/// Uses `boxcar::Vec` internally for lock-free concurrent append operations.
#[derive(Debug)]
pub struct Diagnostics {
    entries: boxcar::Vec<Diagnostic>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    /// Creates a new empty diagnostics container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: boxcar::Vec::new(),
        }
    }

    /// Adds an informational diagnostic.
    pub fn info(&self, kind: DiagnosticKind, message: impl Into<String>) {
        self.push(Diagnostic::new(DiagnosticSeverity::Info, kind, message));
    }

    /// Adds a warning diagnostic.
    pub fn warning(&self, kind: DiagnosticKind, message: impl Into<String>) {
        self.push(Diagnostic::new(DiagnosticSeverity::Warning, kind, message));
    }

    /// Adds an error diagnostic.
    pub fn error(&self, kind: DiagnosticKind, message: impl Into<String>) {
        self.push(Diagnostic::new(DiagnosticSeverity::Error, kind, message));
    }

    /// Adds a diagnostic entry directly.
    ///
    /// Use this for diagnostics that need function or location context.
    pub fn push(&self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    /// Returns true if any diagnostics have been collected.
    pub fn has_any(&self) -> bool {
        self.entries.count() > 0
    }

    /// Returns true if any error-level diagnostics have been collected.
    pub fn has_errors(&self) -> bool {
        self.iter().any(|d| d.severity == DiagnosticSeverity::Error)
    }

    /// Returns true if any warning-level diagnostics have been collected.
    pub fn has_warnings(&self) -> bool {
        self.iter().any(|d| d.severity == DiagnosticSeverity::Warning)
    }

    /// Returns the total number of diagnostics.
    pub fn count(&self) -> usize {
        self.entries.count()
    }

    /// Returns the number of diagnostics with the given severity.
    pub fn count_severity(&self, severity: DiagnosticSeverity) -> usize {
        self.iter().filter(|d| d.severity == severity).count()
    }

    /// Returns the number of error-level diagnostics.
    pub fn error_count(&self) -> usize {
        self.count_severity(DiagnosticSeverity::Error)
    }

    /// Returns the number of warning-level diagnostics.
    pub fn warning_count(&self) -> usize {
        self.count_severity(DiagnosticSeverity::Warning)
    }

    /// Returns the number of info-level diagnostics.
    pub fn info_count(&self) -> usize {
        self.count_severity(DiagnosticSeverity::Info)
    }

    /// Returns an iterator over all diagnostics in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().map(|(_, d)| d)
    }

    /// Returns all errors as a vector.
    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.iter()
            .filter(|d| d.severity == DiagnosticSeverity::Error)
            .collect()
    }

    /// Returns all warnings as a vector.
    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.iter()
            .filter(|d| d.severity == DiagnosticSeverity::Warning)
            .collect()
    }

    /// Returns diagnostics filtered by kind.
    pub fn by_kind(&self, kind: DiagnosticKind) -> Vec<&Diagnostic> {
        self.iter().filter(|d| d.kind == kind).collect()
    }

    /// Returns diagnostics recorded while analyzing `function`.
    pub fn by_function(&self, function: FunctionId) -> Vec<&Diagnostic> {
        self.iter()
            .filter(|d| d.function == Some(function))
            .collect()
    }

    /// Formats a summary of all diagnostics for display.
    ///
    /// Info-level entries are only counted; errors and warnings are listed.
    pub fn summary(&self) -> String {
        let mut output = String::new();

        let error_count = self.error_count();
        let warning_count = self.warning_count();
        let info_count = self.info_count();

        let _ = writeln!(
            output,
            "Diagnostics: {error_count} error(s), {warning_count} warning(s), {info_count} info(s)"
        );

        if error_count > 0 {
            output.push_str("\nErrors:\n");
            for diag in self.errors() {
                let _ = writeln!(output, "  {diag}");
            }
        }

        if warning_count > 0 {
            output.push_str("\nWarnings:\n");
            for diag in self.warnings() {
                let _ = writeln!(output, "  {diag}");
            }
        }

        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
