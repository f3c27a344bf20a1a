//! Operations of the SSA value graph.
//!
//! Every [`Operation`] carries an exhaustive [`Opcode`]. The expression builder matches on it
//! without a wildcard arm, so adding an opcode is a compile-time checked decision about how
//! the new operation participates in type recovery.

use std::fmt;

use strum::{Display, EnumIter, IntoStaticStr};

use crate::ir::{FunctionId, ValueId};

/// A strongly-typed identifier for an operation within a program.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(pub(crate) usize);

impl OpId {
    /// Creates a new `OpId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        OpId(index)
    }

    /// Returns the raw index value of this identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpId({})", self.0)
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// Operation kinds understood by the engine.
///
/// Operand conventions (inputs in order):
///
/// | Opcode | Inputs | Output |
/// |--------|--------|--------|
/// | `Copy`, casts, `Neg`, `Not` | `a` | yes |
/// | arithmetic / bitwise / shifts, `Div`, `Rem`, `Compare` | `a, b` | yes |
/// | `PtrAdd` | `base, index, element_size` | yes |
/// | `PtrSub` | `base, offset` | yes |
/// | `Load` | `address` | yes |
/// | `Store` | `address, value` | no |
/// | `Phi` | one per predecessor | yes |
/// | `Call` | actual arguments | optional |
/// | `Return` | returned values | no |
/// | `Other` | any | optional |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    /// Plain copy of a value.
    Copy,
    /// Integer addition.
    Add,
    /// Integer subtraction.
    Sub,
    /// Integer multiplication.
    Mul,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Xor,
    /// Left shift.
    Shl,
    /// Logical right shift.
    Shr,
    /// Arithmetic right shift.
    Sar,
    /// Sign extension to a wider size.
    SignExtend,
    /// Zero extension to a wider size.
    ZeroExtend,
    /// Truncation to a narrower size.
    Truncate,
    /// Pointer arithmetic `base + index * element_size`.
    PtrAdd,
    /// Pointer arithmetic `base + offset` (field address).
    PtrSub,
    /// Memory read.
    Load,
    /// Memory write.
    Store,
    /// Control-flow merge.
    Phi,
    /// Direct or indirect call.
    Call,
    /// Function return.
    Return,
    /// Integer negation.
    Neg,
    /// Bitwise complement.
    Not,
    /// Integer division.
    Div,
    /// Integer remainder.
    Rem,
    /// Any comparison producing a boolean.
    Compare,
    /// Operation the lifter could not classify.
    Other,
}

impl Opcode {
    /// Returns the exact number of inputs this opcode takes, or `None` if variadic.
    #[must_use]
    pub const fn arity(self) -> Option<usize> {
        match self {
            Opcode::Copy
            | Opcode::SignExtend
            | Opcode::ZeroExtend
            | Opcode::Truncate
            | Opcode::Load
            | Opcode::Neg
            | Opcode::Not => Some(1),
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Sar
            | Opcode::PtrSub
            | Opcode::Store
            | Opcode::Div
            | Opcode::Rem
            | Opcode::Compare => Some(2),
            Opcode::PtrAdd => Some(3),
            Opcode::Phi | Opcode::Call | Opcode::Return | Opcode::Other => None,
        }
    }

    /// Returns `true` if the opcode always defines an output value.
    #[must_use]
    pub const fn has_output(self) -> bool {
        !matches!(
            self,
            Opcode::Store | Opcode::Return | Opcode::Call | Opcode::Other
        )
    }

    /// Returns `true` if the opcode can never define an output value.
    #[must_use]
    pub const fn never_has_output(self) -> bool {
        matches!(self, Opcode::Store | Opcode::Return)
    }

    /// Returns `true` if the opcode touches memory.
    #[must_use]
    pub const fn is_memory(self) -> bool {
        matches!(self, Opcode::Load | Opcode::Store)
    }
}

/// An operation of the SSA value graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Identity of this operation.
    pub id: OpId,
    /// Function owning this operation.
    pub function: FunctionId,
    /// Operation kind.
    pub opcode: Opcode,
    /// Ordered operand values.
    pub inputs: Vec<ValueId>,
    /// Defined value, if any.
    pub output: Option<ValueId>,
    /// Code location (instruction address) this operation was lifted from.
    pub location: u64,
    /// Resolved call target for direct calls.
    pub callee: Option<FunctionId>,
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_opcode_display() {
        assert_eq!(Opcode::PtrAdd.to_string(), "PTR_ADD");
        assert_eq!(Opcode::SignExtend.to_string(), "SIGN_EXTEND");
        let name: &'static str = Opcode::Load.into();
        assert_eq!(name, "LOAD");
    }

    #[test]
    fn test_opcode_arity() {
        for opcode in Opcode::iter() {
            match opcode {
                Opcode::Phi | Opcode::Call | Opcode::Return | Opcode::Other => {
                    assert!(opcode.arity().is_none(), "{opcode} should be variadic")
                }
                _ => assert!(opcode.arity().is_some(), "{opcode} should be fixed"),
            }
        }
        assert_eq!(Opcode::PtrAdd.arity(), Some(3));
        assert_eq!(Opcode::Store.arity(), Some(2));
    }

    #[test]
    fn test_opcode_outputs() {
        assert!(Opcode::Load.has_output());
        assert!(!Opcode::Store.has_output());
        assert!(Opcode::Store.never_has_output());
        assert!(!Opcode::Call.has_output());
        assert!(!Opcode::Call.never_has_output());
        assert!(Opcode::Store.is_memory());
        assert!(!Opcode::Phi.is_memory());
    }
}
