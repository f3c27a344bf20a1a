//! The IR graph provider interface.
//!
//! The engine never constructs or mutates the value graph itself. Everything it needs is read
//! through [`IrGraph`], which a host implements on top of its own decompiler output. The
//! in-memory [`Program`](crate::ir::Program) is the reference implementation.

use std::fmt;

use crate::{
    ir::{OpId, Opcode, Operation, Value, ValueId},
    Error, Result,
};

/// A strongly-typed identifier for a function within a program.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(pub(crate) usize);

impl FunctionId {
    /// Creates a new `FunctionId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        FunctionId(index)
    }

    /// Returns the raw index value of this identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionId({})", self.0)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Read-only access to a program's SSA value graph.
///
/// Implementations must be shareable across threads: the session computes independent
/// function summaries in parallel and every worker reads the same provider.
///
/// # Ordering
///
/// [`descendants`](IrGraph::descendants), [`formal_parameters`](IrGraph::formal_parameters),
/// [`call_sites`](IrGraph::call_sites) and [`functions`](IrGraph::functions) must return their
/// elements in a stable order. Expression sets are truncated in discovery order and the array
/// disambiguation compares two traversals positionally, so a provider with unstable iteration
/// order makes results non-reproducible.
pub trait IrGraph: Sync {
    /// Returns all functions of the program.
    fn functions(&self) -> Vec<FunctionId>;

    /// Returns the display name of a function.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FunctionNotFound`] for unknown functions.
    fn function_name(&self, function: FunctionId) -> Result<&str>;

    /// Returns the ordered formal parameters of a function.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FunctionNotFound`] for unknown functions.
    fn formal_parameters(&self, function: FunctionId) -> Result<&[ValueId]>;

    /// Returns a value node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValueNotFound`] for unknown values.
    fn value(&self, id: ValueId) -> Result<&Value>;

    /// Returns an operation node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationNotFound`] for unknown operations.
    fn operation(&self, id: OpId) -> Result<&Operation>;

    /// Returns the operations consuming a value (its def/use consumer edges), in order.
    fn descendants(&self, value: ValueId) -> &[OpId];

    /// Returns the call operations of a function, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FunctionNotFound`] for unknown functions.
    fn call_sites(&self, function: FunctionId) -> Result<&[OpId]>;

    /// Returns the `Return` operations of a function, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FunctionNotFound`] for unknown functions.
    fn return_sites(&self, function: FunctionId) -> Result<&[OpId]>;

    /// Returns the defining operation of a value, or `None` for formals, constants,
    /// addresses and free inputs.
    ///
    /// # Errors
    ///
    /// Returns an error if the value or its recorded definition does not exist.
    fn definition(&self, value: ValueId) -> Result<Option<&Operation>> {
        match self.value(value)?.definition {
            Some(op) => Ok(Some(self.operation(op)?)),
            None => Ok(None),
        }
    }

    /// Returns `true` if the value is a literal constant or a fixed address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValueNotFound`] for unknown values.
    fn is_constant(&self, value: ValueId) -> Result<bool> {
        Ok(self.value(value)?.is_constant())
    }

    /// Returns `true` if the value is a fixed address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValueNotFound`] for unknown values.
    fn is_address(&self, value: ValueId) -> Result<bool> {
        Ok(self.value(value)?.is_address())
    }

    /// Returns the size of a value in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValueNotFound`] for unknown values.
    fn byte_size(&self, value: ValueId) -> Result<u8> {
        Ok(self.value(value)?.size)
    }

    /// Returns the resolved callee and the ordered actual arguments of a call site.
    ///
    /// Returns `Ok(None)` for indirect calls whose target the provider could not resolve.
    ///
    /// # Errors
    ///
    /// Returns an error if `call_site` is unknown or is not a call.
    fn call_target(&self, call_site: OpId) -> Result<Option<(FunctionId, &[ValueId])>> {
        let op = self.operation(call_site)?;
        if op.opcode != Opcode::Call {
            return Err(Error::Error(format!(
                "{call_site} is a {} operation, not a call",
                op.opcode
            )));
        }
        Ok(op.callee.map(|callee| (callee, op.inputs.as_slice())))
    }

    /// Returns every value feeding one of the function's `Return` operations, deduplicated
    /// in first-seen order.
    ///
    /// # Errors
    ///
    /// Returns an error if the function or one of its return operations is unknown.
    fn return_candidates(&self, function: FunctionId) -> Result<Vec<ValueId>> {
        let mut candidates = Vec::new();
        for &site in self.return_sites(function)? {
            for &input in &self.operation(site)?.inputs {
                if !candidates.contains(&input) {
                    candidates.push(input);
                }
            }
        }
        Ok(candidates)
    }

    /// Returns the distinct resolved callees of a function, in call-site order.
    ///
    /// # Errors
    ///
    /// Returns an error if the function or one of its call sites is unknown.
    fn callees(&self, function: FunctionId) -> Result<Vec<FunctionId>> {
        let mut callees = Vec::new();
        for &site in self.call_sites(function)? {
            if let Some((callee, _)) = self.call_target(site)? {
                if !callees.contains(&callee) {
                    callees.push(callee);
                }
            }
        }
        Ok(callees)
    }
}
