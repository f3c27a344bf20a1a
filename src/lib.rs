// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # layoutscope
//!
//! Recovers struct, array and primitive layouts of pointer parameters from an SSA value graph.
//!
//! Reverse engineers rarely have type information for the functions they study, but the
//! memory accesses a function performs through its parameters say a lot about what those
//! parameters point to. `layoutscope` binds every value of a function to the symbolic
//! expressions it may hold over the function's formal parameters, follows calls by
//! substituting callee summaries, re-runs loops one iteration further to tell arrays from
//! structs, and finally interpolates the observed accesses into nested struct layouts.
//!
//! ## Features
//!
//! - **Symbolic resolution** - Hash-consed expression arena with constant folding and bounded
//!   candidate sets
//! - **Cycle safety** - Phi back-edges become explicit placeholders, no host-stack recursion
//! - **Interprocedural** - Compute-once function summaries, substituted at every call site
//! - **Array detection** - Loop-variant re-execution classifies strided walks
//! - **Parallel** - Program analysis scheduled over the call graph's components with rayon
//! - **Diagnostics** - Every imprecision is recorded, nothing aborts a session
//!
//! ## Quick Start
//!
//! ```rust
//! use layoutscope::prelude::*;
//!
//! // struct node { struct node *next; int value; };
//! // void touch(struct node *n) { n->next->value = 1; }
//! let mut b = ProgramBuilder::new();
//! let f = b.function("touch", &[8]);
//! let n = b.param(f, 0)?;
//! let next = b.load(f, n, 8)?;
//! let eight = b.constant(f, 8, 8);
//! let value = b.op(f, Opcode::PtrSub, &[next, eight], 8)?;
//! let one = b.constant(f, 1, 4);
//! b.store(f, value, one)?;
//! let program = b.build();
//!
//! let session = AnalysisSession::new(&program, EngineConfig::default());
//! let report = session.analyze_function(f)?;
//! let root = &report.roots[0].layout;
//! let pointee = root.member_at(0).and_then(Member::pointee).unwrap();
//! assert_eq!(pointee.size, 12);
//! println!("{root}");
//! # Ok::<(), layoutscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - The [`ir::IrGraph`] provider trait and the in-memory [`ir::Program`]
//! - [`analysis`] - Expressions, resolution, summaries, array detection and diagnostics
//! - [`layout`] - Struct interpolation and the recovered layout types
//! - [`session`] - [`session::AnalysisSession`] and the produced reports
//! - [`utils`] - Bit sets and strongly connected components
//!
//! ## Logging
//!
//! Progress is reported through the [`log`] facade; the library never installs a logger.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

pub mod analysis;
pub mod ir;
pub mod layout;
pub mod prelude;
pub mod session;
pub mod utils;

pub use error::Error;

/// `layoutscope` Result type
pub type Result<T> = std::result::Result<T, Error>;
