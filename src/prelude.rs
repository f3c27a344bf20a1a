//! # layoutscope Prelude
//!
//! The types needed to build a program, analyze it and read the results.
//!
//! ```rust
//! use layoutscope::prelude::*;
//!
//! let program = ProgramBuilder::new().build();
//! let session = AnalysisSession::new(&program, EngineConfig::default().sequential());
//! assert!(session.analyze_program()?.is_empty());
//! # Ok::<(), layoutscope::Error>(())
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all layoutscope operations
pub use crate::Error;

/// The result type used throughout layoutscope
pub use crate::Result;

// ================================================================================================
// Value Graph
// ================================================================================================

/// Provider interface and identifiers
pub use crate::ir::{FunctionId, IrGraph, OpId, Opcode, ValueId};

/// In-memory provider
pub use crate::ir::{Program, ProgramBuilder};

// ================================================================================================
// Analysis
// ================================================================================================

/// Engine configuration
pub use crate::analysis::{ConflictPolicy, EngineConfig};

/// Accesses and summaries
pub use crate::analysis::{AccessKind, FunctionSummary, MemoryAccess, ParamRef, Pass};

/// Diagnostics
pub use crate::analysis::{Diagnostic, DiagnosticKind, DiagnosticSeverity, Diagnostics};

// ================================================================================================
// Results
// ================================================================================================

/// Sessions and reports
pub use crate::session::{AccessRecord, AnalysisSession, FunctionReport, RootReport};

/// Recovered layouts
pub use crate::layout::{LayoutConflict, Member, MemberAccess, MemberKind, StructLayout};
