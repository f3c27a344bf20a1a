//! Symbolic dependency analysis.
//!
//! This module turns the SSA value graph into sets of symbolic expressions and memory accesses
//! rooted at formal pointer parameters. It is the engine behind [`crate::session`]; the
//! layout recovery in [`crate::layout`] only consumes its output.
//!
//! # Architecture
//!
//! - [`ExprArena`] - Hash-consed expression arena with constant folding
//! - [`ExprBuilder`] - Per-operation expression construction
//! - [`DependencyResolver`] - Memoized, cycle-aware value resolution within one function
//! - [`arrays`] - Loop-variant re-execution and array classification
//! - [`InterproceduralAnalyzer`] - Summary computation, call expansion and recursion control
//! - [`SummaryCache`] - Compute-once store of [`FunctionSummary`] values
//! - [`Diagnostics`] - Thread-safe collection of everything that degraded the results
//!
//! # Flow
//!
//! ```text
//! formals ─► forward traversal ─► DependencyResolver ─► AccessLog (baseline)
//!                                        │                     │
//!                                   CallExpander ◄── callee FunctionSummary
//!                                        │
//!                      loop-variant seeds ─► second traversal ─► arrays::classify
//! ```

mod access;
pub mod arrays;
mod builder;
mod config;
mod diagnostics;
mod expr;
mod interproc;
mod resolver;
mod summary;

pub use access::{AccessKind, AccessLog, MemoryAccess, Pass};
pub use builder::{BuildOutcome, CallExpansion, CallHandler, ExprBuilder, OpaqueCalls, Operand};
pub use config::{ConflictPolicy, EngineConfig, DEFAULT_MAX_CALL_DEPTH, DEFAULT_NODE_LIMIT};
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSeverity, Diagnostics};
pub use expr::{BinaryOp, CastKind, ExprArena, ExprId, ExprNode, ParamRef};
pub use interproc::InterproceduralAnalyzer;
pub use resolver::DependencyResolver;
pub use summary::{ArraySite, FunctionSummary, SummaryCache};
