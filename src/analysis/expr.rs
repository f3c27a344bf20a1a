//! Interned symbolic expressions.
//!
//! Every candidate value the engine tracks is an expression tree over the formal parameters
//! of a function: `*(param_0 + 0x10) + 0x4` is "the address four bytes into the struct
//! pointed to by the field at offset 0x10 of the first parameter". Trees are stored once in an
//! [`ExprArena`] and referred to by [`ExprId`]; structurally equal trees always receive the
//! same id, so candidate sets deduplicate with plain id equality and substitution results are
//! shared between traversals and threads.
//!
//! Constructors normalize as they intern:
//!
//! - constant sub-trees are folded with wrapping arithmetic masked to the result size
//! - `x - c` becomes `x + (-c)`, constants of commutative operators move to the right
//! - `x + 0`, `x * 1`, `x | 0`, `x ^ 0` and shifts by zero collapse to `x`
//! - nested constant addends merge: `(x + 4) + 8` is `x + 12`
//!
//! These rules make a struct field address always decompose into `base + offset` with one
//! constant offset, which is what [`ExprArena::split_offset`] relies on.

use std::{collections::HashMap, fmt};

use dashmap::DashMap;

use crate::ir::{FunctionId, ValueId};

/// Handle of an interned expression.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExprId(pub(crate) usize);

impl ExprId {
    /// Returns the raw index value of this identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExprId({})", self.0)
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// A formal parameter of a specific function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParamRef {
    /// Function declaring the parameter.
    pub function: FunctionId,
    /// Position in the formal parameter list.
    pub index: usize,
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:param_{}", self.function, self.index)
    }
}

/// Binary operators of internal expression nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction (only kept when the subtrahend is symbolic).
    Sub,
    /// Wrapping multiplication.
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
}

impl BinaryOp {
    /// Returns the infix symbol used when rendering.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::Sar => "s>>",
        }
    }

    /// Returns `true` if operands may be swapped.
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
        )
    }

    /// Evaluates the operator on two constants of `size` bytes.
    #[must_use]
    pub fn apply(self, left: i64, right: i64, size: u8) -> i64 {
        let shift = u32::try_from(right).ok().filter(|&s| s < 64);
        let result = match self {
            BinaryOp::Add => left.wrapping_add(right),
            BinaryOp::Sub => left.wrapping_sub(right),
            BinaryOp::Mul => left.wrapping_mul(right),
            BinaryOp::And => left & right,
            BinaryOp::Or => left | right,
            BinaryOp::Xor => left ^ right,
            BinaryOp::Shl => shift.map_or(0, |s| left << s),
            BinaryOp::Shr => shift.map_or(0, |s| ((left as u64 & size_mask(size)) >> s) as i64),
            BinaryOp::Sar => left >> shift.unwrap_or(63),
        };
        normalize(result, size)
    }
}

/// Width-changing conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastKind {
    /// Sign extension.
    SignExtend,
    /// Zero extension.
    ZeroExtend,
    /// Truncation.
    Truncate,
}

impl CastKind {
    const fn name(self) -> &'static str {
        match self {
            CastKind::SignExtend => "sext",
            CastKind::ZeroExtend => "zext",
            CastKind::Truncate => "trunc",
        }
    }
}

/// A node of an expression tree. Children are referenced by [`ExprId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprNode {
    /// Placeholder for a formal parameter of a function.
    Param {
        /// Function declaring the parameter.
        function: FunctionId,
        /// Position of the parameter.
        index: usize,
        /// Size in bytes.
        size: u8,
    },
    /// Integer constant, sign-normalized to its size.
    Const {
        /// The value.
        value: i64,
        /// Size in bytes.
        size: u8,
    },
    /// A value the engine cannot express.
    Unknown {
        /// Size in bytes.
        size: u8,
    },
    /// Stand-in for a value that was still being resolved when it was needed again (phi
    /// back-edge).
    Cycle {
        /// The value on the cycle.
        value: ValueId,
        /// Size in bytes.
        size: u8,
    },
    /// Binary operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: ExprId,
        /// Right operand.
        right: ExprId,
        /// Result size in bytes.
        size: u8,
    },
    /// Width conversion; transparent to address decomposition.
    Cast {
        /// Kind of conversion.
        kind: CastKind,
        /// Converted expression.
        operand: ExprId,
        /// Result size in bytes.
        size: u8,
    },
    /// Memory read of `size` bytes at `address`.
    Deref {
        /// Address expression.
        address: ExprId,
        /// Number of bytes read.
        size: u8,
    },
}

impl ExprNode {
    /// Returns the size of the node's value in bytes.
    #[must_use]
    pub const fn size(&self) -> u8 {
        match *self {
            ExprNode::Param { size, .. }
            | ExprNode::Const { size, .. }
            | ExprNode::Unknown { size }
            | ExprNode::Cycle { size, .. }
            | ExprNode::Binary { size, .. }
            | ExprNode::Cast { size, .. }
            | ExprNode::Deref { size, .. } => size,
        }
    }

    /// Returns `true` for nodes without children.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(
            self,
            ExprNode::Param { .. }
                | ExprNode::Const { .. }
                | ExprNode::Unknown { .. }
                | ExprNode::Cycle { .. }
        )
    }
}

fn size_mask(size: u8) -> u64 {
    match size {
        1..=7 => (1u64 << (u32::from(size) * 8)) - 1,
        _ => u64::MAX,
    }
}

/// Truncates `value` to `size` bytes and sign-extends the result back to 64 bits.
#[must_use]
pub(crate) fn normalize(value: i64, size: u8) -> i64 {
    match size {
        1..=7 => {
            let shift = 64 - u32::from(size) * 8;
            (value << shift) >> shift
        }
        _ => value,
    }
}

/// Concurrent interner for expression trees.
///
/// Nodes live in an append-only `boxcar::Vec`; a `DashMap` maps each node to its id. Both
/// support insertion through `&self`, so one arena is shared by all workers of a session.
#[derive(Debug)]
pub struct ExprArena {
    nodes: boxcar::Vec<ExprNode>,
    index: DashMap<ExprNode, ExprId>,
}

impl Default for ExprArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: boxcar::Vec::new(),
            index: DashMap::new(),
        }
    }

    /// Returns the number of distinct interned nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.count()
    }

    /// Returns `true` if nothing was interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the node behind an id, or `None` for ids from another arena.
    #[must_use]
    pub fn get(&self, id: ExprId) -> Option<&ExprNode> {
        self.nodes.get(id.0)
    }

    /// Returns a copy of the node behind an id. Foreign ids read as a zero-sized unknown.
    #[must_use]
    pub fn node(&self, id: ExprId) -> ExprNode {
        self.get(id)
            .copied()
            .unwrap_or(ExprNode::Unknown { size: 0 })
    }

    /// Returns the size in bytes of an expression.
    #[must_use]
    pub fn size(&self, id: ExprId) -> u8 {
        self.node(id).size()
    }

    /// Interns a node without normalizing it.
    fn intern(&self, node: ExprNode) -> ExprId {
        if let Some(existing) = self.index.get(&node) {
            return *existing;
        }
        *self
            .index
            .entry(node)
            .or_insert_with(|| ExprId(self.nodes.push(node)))
    }

    /// Interns a parameter leaf.
    pub fn param(&self, function: FunctionId, index: usize, size: u8) -> ExprId {
        self.intern(ExprNode::Param {
            function,
            index,
            size,
        })
    }

    /// Interns a constant leaf.
    pub fn constant(&self, value: i64, size: u8) -> ExprId {
        self.intern(ExprNode::Const {
            value: normalize(value, size),
            size,
        })
    }

    /// Interns an unknown leaf.
    pub fn unknown(&self, size: u8) -> ExprId {
        self.intern(ExprNode::Unknown { size })
    }

    /// Interns a cycle placeholder for `value`.
    pub fn cycle(&self, value: ValueId, size: u8) -> ExprId {
        self.intern(ExprNode::Cycle { value, size })
    }

    /// Interns a memory read.
    pub fn deref(&self, address: ExprId, size: u8) -> ExprId {
        self.intern(ExprNode::Deref { address, size })
    }

    /// Returns the constant behind an id, if it is one.
    #[must_use]
    pub fn constant_value(&self, id: ExprId) -> Option<i64> {
        match self.node(id) {
            ExprNode::Const { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Interns `left op right`, folding and normalizing on the way.
    pub fn binary(&self, op: BinaryOp, left: ExprId, right: ExprId, size: u8) -> ExprId {
        let (mut left, mut right, mut op) = (left, right, op);

        match (self.constant_value(left), self.constant_value(right)) {
            (Some(a), Some(b)) => return self.constant(op.apply(a, b, size), size),
            (Some(_), None) if op.is_commutative() => std::mem::swap(&mut left, &mut right),
            (None, Some(c)) if op == BinaryOp::Sub => {
                op = BinaryOp::Add;
                right = self.constant(c.wrapping_neg(), size);
            }
            _ => {}
        }

        if let Some(c) = self.constant_value(right) {
            match (op, c) {
                (BinaryOp::Add | BinaryOp::Or | BinaryOp::Xor, 0)
                | (BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Sar, 0)
                | (BinaryOp::Mul, 1) => return left,
                (BinaryOp::Mul | BinaryOp::And, 0) => return self.constant(0, size),
                (BinaryOp::Add, _) => {
                    if let ExprNode::Binary {
                        op: BinaryOp::Add,
                        left: inner,
                        right: inner_right,
                        ..
                    } = self.node(left)
                    {
                        if let Some(d) = self.constant_value(inner_right) {
                            let merged = self.constant(c.wrapping_add(d), size);
                            return self.binary(BinaryOp::Add, inner, merged, size);
                        }
                    }
                }
                _ => {}
            }
        }

        self.intern(ExprNode::Binary {
            op,
            left,
            right,
            size,
        })
    }

    /// Interns a width conversion of `operand` to `size` bytes.
    ///
    /// Constants are converted immediately; conversions that do not change the width return
    /// the operand itself.
    pub fn cast(&self, kind: CastKind, operand: ExprId, size: u8) -> ExprId {
        let node = self.node(operand);
        if let ExprNode::Const {
            value,
            size: from_size,
        } = node
        {
            let converted = match kind {
                CastKind::ZeroExtend => (value as u64 & size_mask(from_size)) as i64,
                CastKind::SignExtend | CastKind::Truncate => value,
            };
            return self.constant(converted, size);
        }
        if node.size() == size {
            return operand;
        }
        self.intern(ExprNode::Cast {
            kind,
            operand,
            size,
        })
    }

    /// Decomposes an address into a base and a constant byte offset.
    ///
    /// Follows `base + constant` chains and looks through casts. An expression without a
    /// constant addend is its own base with offset zero.
    #[must_use]
    pub fn split_offset(&self, id: ExprId) -> (ExprId, i64) {
        let mut base = id;
        let mut offset = 0i64;
        loop {
            match self.node(base) {
                ExprNode::Binary {
                    op: BinaryOp::Add,
                    left,
                    right,
                    ..
                } => match self.constant_value(right) {
                    Some(c) => {
                        offset = offset.wrapping_add(c);
                        base = left;
                    }
                    None => return (base, offset),
                },
                ExprNode::Cast { operand, .. } => base = operand,
                _ => return (base, offset),
            }
        }
    }

    /// Returns the parameter an address ultimately derives from, following constant offsets
    /// and pointer dereferences down to a `Param` leaf. For `base + index` sums the left
    /// operand is tried first.
    #[must_use]
    pub fn root_of(&self, address: ExprId) -> Option<ParamRef> {
        let mut stack = vec![address];
        while let Some(current) = stack.pop() {
            let (base, _) = self.split_offset(current);
            match self.node(base) {
                ExprNode::Param {
                    function, index, ..
                } => return Some(ParamRef { function, index }),
                ExprNode::Deref { address, .. } => stack.push(address),
                ExprNode::Binary {
                    op: BinaryOp::Add,
                    left,
                    right,
                    ..
                } => {
                    stack.push(right);
                    stack.push(left);
                }
                _ => {}
            }
        }
        None
    }

    /// Returns `true` if any leaf of the tree is a cycle placeholder.
    #[must_use]
    pub fn contains_cycle(&self, id: ExprId) -> bool {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            match self.node(current) {
                ExprNode::Cycle { .. } => return true,
                ExprNode::Binary { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
                ExprNode::Cast { operand, .. } => stack.push(operand),
                ExprNode::Deref { address, .. } => stack.push(address),
                _ => {}
            }
        }
        false
    }

    /// Rewrites the leaves of a tree.
    ///
    /// `replace` is asked for every leaf; returning `Some(candidates)` substitutes the leaf by
    /// each candidate, `None` keeps it. Internal nodes are rebuilt over the cartesian product
    /// of their children's results, in left-to-right discovery order, deduplicated and capped
    /// at `limit` candidates per node.
    ///
    /// # Returns
    ///
    /// The candidate set for the root and whether any node's set was truncated.
    pub fn substitute<F>(&self, root: ExprId, limit: usize, mut replace: F) -> (Vec<ExprId>, bool)
    where
        F: FnMut(&ExprNode) -> Option<Vec<ExprId>>,
    {
        let limit = limit.max(1);
        let mut results: HashMap<ExprId, Vec<ExprId>> = HashMap::new();
        let mut truncated = false;
        let mut stack = vec![(root, false)];

        while let Some((id, children_done)) = stack.pop() {
            if results.contains_key(&id) {
                continue;
            }
            let node = self.node(id);

            if !children_done {
                stack.push((id, true));
                match node {
                    ExprNode::Binary { left, right, .. } => {
                        stack.push((right, false));
                        stack.push((left, false));
                    }
                    ExprNode::Cast { operand, .. } => stack.push((operand, false)),
                    ExprNode::Deref { address, .. } => stack.push((address, false)),
                    _ => {}
                }
                continue;
            }

            let mut out = Vec::new();
            let mut push = |candidate: ExprId, out: &mut Vec<ExprId>| {
                if out.contains(&candidate) {
                    return true;
                }
                if out.len() >= limit {
                    truncated = true;
                    return false;
                }
                out.push(candidate);
                true
            };

            match node {
                ExprNode::Binary {
                    op,
                    left,
                    right,
                    size,
                } => {
                    let lefts = results.get(&left).cloned().unwrap_or_else(|| vec![left]);
                    let rights = results.get(&right).cloned().unwrap_or_else(|| vec![right]);
                    'product: for &l in &lefts {
                        for &r in &rights {
                            if !push(self.binary(op, l, r, size), &mut out) {
                                break 'product;
                            }
                        }
                    }
                }
                ExprNode::Cast {
                    kind,
                    operand,
                    size,
                } => {
                    for &o in results.get(&operand).map_or(&[operand][..], Vec::as_slice) {
                        if !push(self.cast(kind, o, size), &mut out) {
                            break;
                        }
                    }
                }
                ExprNode::Deref { address, size } => {
                    for &a in results.get(&address).map_or(&[address][..], Vec::as_slice) {
                        if !push(self.deref(a, size), &mut out) {
                            break;
                        }
                    }
                }
                leaf => {
                    for candidate in replace(&leaf).unwrap_or_else(|| vec![id]) {
                        if !push(candidate, &mut out) {
                            break;
                        }
                    }
                }
            }

            results.insert(id, out);
        }

        (results.remove(&root).unwrap_or_default(), truncated)
    }

    /// Renders an expression in infix notation, e.g. `(param_0 + 0x5) * 0x2`.
    #[must_use]
    pub fn render(&self, id: ExprId) -> String {
        let mut out = String::new();
        self.render_into(id, &mut out, false);
        out
    }

    fn render_into(&self, id: ExprId, out: &mut String, nested: bool) {
        use std::fmt::Write;

        match self.node(id) {
            ExprNode::Param { index, .. } => {
                let _ = write!(out, "param_{index}");
            }
            ExprNode::Const { value, .. } => {
                if value < 0 {
                    let _ = write!(out, "-0x{:x}", value.unsigned_abs());
                } else {
                    let _ = write!(out, "0x{value:x}");
                }
            }
            ExprNode::Unknown { size } => {
                let _ = write!(out, "unknown{}", u32::from(size) * 8);
            }
            ExprNode::Cycle { value, .. } => {
                let _ = write!(out, "cycle({value})");
            }
            ExprNode::Binary {
                op, left, right, ..
            } => {
                if nested {
                    out.push('(');
                }
                self.render_into(left, out, true);
                match (op, self.constant_value(right)) {
                    (BinaryOp::Add, Some(c)) if c < 0 => {
                        let _ = write!(out, " - 0x{:x}", c.unsigned_abs());
                    }
                    _ => {
                        let _ = write!(out, " {} ", op.symbol());
                        self.render_into(right, out, true);
                    }
                }
                if nested {
                    out.push(')');
                }
            }
            ExprNode::Cast { kind, operand, .. } => {
                out.push_str(kind.name());
                out.push('(');
                self.render_into(operand, out, false);
                out.push(')');
            }
            ExprNode::Deref { address, .. } => {
                out.push_str("*(");
                self.render_into(address, out, false);
                out.push(')');
            }
        }
    }
}
