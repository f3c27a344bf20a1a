//! Values of the SSA value graph.
//!
//! A [`Value`] is a node in the graph handed to the engine by the IR graph provider. Every
//! value is defined exactly once: either it has no definition at all (constants, addresses,
//! formal parameters, free inputs) or it is the output of exactly one
//! [`Operation`](crate::ir::Operation).

use std::fmt;

use crate::ir::{FunctionId, OpId};

/// A strongly-typed identifier for a value within a program.
///
/// Value ids are assigned sequentially by the provider and are unique across all functions
/// of one program, which makes them usable as map keys for per-run caches.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub(crate) usize);

impl ValueId {
    /// Creates a new `ValueId` from a raw index value.
    ///
    /// Primarily intended for providers and tests; ids handed out by
    /// [`ProgramBuilder`](crate::ir::ProgramBuilder) should be preferred.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        ValueId(index)
    }

    /// Returns the raw index value of this identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueId({})", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Classification of a value by how it comes into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// A literal integer constant.
    Constant(i64),

    /// A fixed address in the binary's address space (global, string literal, ...).
    Address(u64),

    /// The formal parameter at the given position of the owning function.
    Parameter(usize),

    /// A value without a definition that is not a formal parameter (uninitialised register,
    /// value produced by an instruction the lifter did not model).
    Input,

    /// The output of a non-merge operation.
    Operation,

    /// The output of a control-flow merge (phi / multiequal).
    Phi,
}

/// A node of the SSA value graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    /// Identity of this value.
    pub id: ValueId,
    /// Function owning this value.
    pub function: FunctionId,
    /// How the value is produced.
    pub kind: ValueKind,
    /// Size of the value in bytes.
    pub size: u8,
    /// Defining operation, present for [`ValueKind::Operation`] and [`ValueKind::Phi`].
    pub definition: Option<OpId>,
}

impl Value {
    /// Returns `true` for literal constants and fixed addresses.
    ///
    /// Both resolve directly to constant leaves and never reach the expression builder.
    #[must_use]
    pub const fn is_constant(&self) -> bool {
        matches!(self.kind, ValueKind::Constant(_) | ValueKind::Address(_))
    }

    /// Returns `true` if this value is a fixed address.
    #[must_use]
    pub const fn is_address(&self) -> bool {
        matches!(self.kind, ValueKind::Address(_))
    }

    /// Returns `true` if this value is the output of a phi merge.
    #[must_use]
    pub const fn is_phi(&self) -> bool {
        matches!(self.kind, ValueKind::Phi)
    }

    /// Returns the formal parameter position if this value is a formal parameter.
    #[must_use]
    pub const fn parameter_index(&self) -> Option<usize> {
        match self.kind {
            ValueKind::Parameter(index) => Some(index),
            _ => None,
        }
    }

    /// Returns the literal value of a constant or address.
    #[must_use]
    pub const fn constant_value(&self) -> Option<i64> {
        match self.kind {
            ValueKind::Constant(value) => Some(value),
            ValueKind::Address(addr) => Some(addr as i64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(kind: ValueKind) -> Value {
        Value {
            id: ValueId::new(0),
            function: FunctionId::new(0),
            kind,
            size: 8,
            definition: None,
        }
    }

    #[test]
    fn test_value_id_display() {
        let id = ValueId::new(7);
        assert_eq!(id.index(), 7);
        assert_eq!(format!("{id}"), "v7");
        assert_eq!(format!("{id:?}"), "ValueId(7)");
    }

    #[test]
    fn test_constant_classification() {
        assert!(value(ValueKind::Constant(4)).is_constant());
        assert!(value(ValueKind::Address(0x4000)).is_constant());
        assert!(value(ValueKind::Address(0x4000)).is_address());
        assert!(!value(ValueKind::Parameter(0)).is_constant());
        assert!(!value(ValueKind::Phi).is_constant());
    }

    #[test]
    fn test_constant_value() {
        assert_eq!(value(ValueKind::Constant(-3)).constant_value(), Some(-3));
        assert_eq!(
            value(ValueKind::Address(0x1000)).constant_value(),
            Some(0x1000)
        );
        assert_eq!(value(ValueKind::Input).constant_value(), None);
        assert_eq!(value(ValueKind::Parameter(2)).parameter_index(), Some(2));
    }
}
