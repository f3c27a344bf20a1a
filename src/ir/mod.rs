//! The SSA value graph consumed by the engine.
//!
//! The engine reads programs exclusively through the [`IrGraph`] trait. A host integrating a
//! decompiler backend implements that trait over its own data structures; everything else in
//! this crate (tests, benchmarks, the fuzz target) uses the in-memory [`Program`] built with
//! [`ProgramBuilder`].
//!
//! # Key Components
//!
//! - [`Value`] / [`ValueId`] - Nodes of the graph, defined at most once
//! - [`Operation`] / [`OpId`] / [`Opcode`] - Defining and consuming operations
//! - [`IrGraph`] - Read-only provider interface
//! - [`Program`] / [`ProgramBuilder`] - Validating in-memory provider

mod operation;
mod program;
mod provider;
mod value;

pub use operation::{OpId, Opcode, Operation};
pub use program::{Program, ProgramBuilder};
pub use provider::{FunctionId, IrGraph};
pub use value::{Value, ValueId, ValueKind};
