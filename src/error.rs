use thiserror::Error;

use crate::ir::{FunctionId, OpId, ValueId};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which covers every failure this library reports as fatal to a
/// single request.
///
/// Most imprecision encountered during layout recovery is *not* an error: unsupported
/// operations, phi cycles, truncated expression sets, recursion cut-offs and conflicting member
/// sizes are recorded as [`Diagnostic`](crate::analysis::Diagnostic)s and the analysis carries
/// on with a degraded but usable result. The variants below are reserved for requests that
/// cannot be answered at all, such as asking for a function the IR graph does not contain, or
/// for graphs that are structurally broken while being built.
///
/// # Error Categories
///
/// ## Graph Lookup Errors
/// - [`Error::FunctionNotFound`] - Unknown function identifier
/// - [`Error::ValueNotFound`] - Unknown value identifier
/// - [`Error::OperationNotFound`] - Unknown operation identifier
///
/// ## Graph Construction Errors
/// - [`Error::Malformed`] - Structurally invalid graph (wrong operand count, cross-function
///   operands, ...)
///
/// ## Analysis Errors
/// - [`Error::ArityMismatch`] - Call site argument count differs from the callee's formals
/// - [`Error::RecursionLimit`] - Maximum call depth exceeded
///
/// # Examples
///
/// ```rust
/// use layoutscope::{ir::ProgramBuilder, Error};
///
/// let mut builder = ProgramBuilder::new();
/// let f = builder.function("f", &[8]);
/// let p = builder.param(f, 0).unwrap();
///
/// // A load takes exactly one operand
/// match builder.op(f, layoutscope::ir::Opcode::Load, &[p, p], 4) {
///     Err(Error::Malformed { message, .. }) => println!("rejected: {message}"),
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The requested function does not exist in the IR graph.
    #[error("Function not found - {0}")]
    FunctionNotFound(FunctionId),

    /// The requested value does not exist in the IR graph.
    #[error("Value not found - {0}")]
    ValueNotFound(ValueId),

    /// The requested operation does not exist in the IR graph.
    #[error("Operation not found - {0}")]
    OperationNotFound(OpId),

    /// The graph is structurally invalid.
    ///
    /// Raised while building a [`Program`](crate::ir::Program) when an operation is given
    /// the wrong number of operands, references values of another function, or otherwise
    /// violates the SSA shape the engine relies on. The error includes the source location
    /// where the problem was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A call site passes a different number of arguments than the callee declares.
    ///
    /// Substituting actual arguments for formal placeholders would silently misalign in this
    /// case (variadic or mismatched signatures), so the call is left unexpanded.
    #[error("Call at {site} passes {actual} argument(s) to {callee}, which declares {expected}")]
    ArityMismatch {
        /// The call operation
        site: OpId,
        /// The resolved callee
        callee: FunctionId,
        /// Number of formal parameters of the callee
        expected: usize,
        /// Number of actual arguments at the call site
        actual: usize,
    },

    /// Recursion limit reached.
    ///
    /// The interprocedural analyzer bounds the depth of the call chain it expands. The
    /// associated value shows the limit that was reached.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
