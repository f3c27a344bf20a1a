//! Symbolic expression builder.
//!
//! Given an operation and the already-resolved candidate expressions of its operands, the
//! [`ExprBuilder`] produces the candidate expressions of the operation's output and the memory
//! accesses the operation performs. It never looks anything up in the graph: the resolver
//! feeds it operands in order and the [`CallHandler`] answers for calls.

use crate::{
    analysis::{
        AccessKind, BinaryOp, CastKind, Diagnostic, DiagnosticKind, ExprArena, ExprId,
        MemoryAccess, Pass,
    },
    ir::{Opcode, Operation, Value},
};

/// Ordered, duplicate-free candidate list with a size cap.
#[derive(Debug, Clone)]
pub(crate) struct CandidateSet {
    items: Vec<ExprId>,
    limit: usize,
    truncated: bool,
}

impl CandidateSet {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            items: Vec::new(),
            limit: limit.max(1),
            truncated: false,
        }
    }

    /// Adds a candidate. Returns `false` once the set is full and `candidate` was dropped.
    pub(crate) fn push(&mut self, candidate: ExprId) -> bool {
        if self.items.contains(&candidate) {
            return true;
        }
        if self.items.len() >= self.limit {
            self.truncated = true;
            return false;
        }
        self.items.push(candidate);
        true
    }

    pub(crate) fn extend(&mut self, candidates: impl IntoIterator<Item = ExprId>) {
        for candidate in candidates {
            if !self.push(candidate) {
                break;
            }
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.items.len() >= self.limit
    }

    pub(crate) fn truncated(&self) -> bool {
        self.truncated
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn into_vec(self) -> Vec<ExprId> {
        self.items
    }
}

/// An operand handed to the builder: the graph value and its resolved candidates.
#[derive(Debug, Clone, Copy)]
pub struct Operand<'a> {
    /// The operand value.
    pub value: &'a Value,
    /// Its candidate expressions, in discovery order.
    pub exprs: &'a [ExprId],
}

/// What a call contributes to the caller.
#[derive(Debug, Clone, Default)]
pub struct CallExpansion {
    /// Candidate return expressions in terms of the caller's expressions.
    pub returns: Vec<ExprId>,
    /// The callee's accesses in terms of the caller's expressions.
    pub accesses: Vec<MemoryAccess>,
}

/// Answers call operations on behalf of the builder.
pub trait CallHandler {
    /// Expands the call `site` given the candidate expressions of each actual argument.
    fn expand(&mut self, site: &Operation, args: &[&[ExprId]]) -> CallExpansion;
}

/// Call handler that never expands anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueCalls;

impl CallHandler for OpaqueCalls {
    fn expand(&mut self, _site: &Operation, _args: &[&[ExprId]]) -> CallExpansion {
        CallExpansion::default()
    }
}

/// Result of building one operation.
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    /// Candidates of the output value; empty for operations without output.
    pub binding: Vec<ExprId>,
    /// Memory accesses performed by the operation.
    pub accesses: Vec<MemoryAccess>,
    /// Precision losses encountered.
    pub issues: Vec<Diagnostic>,
}

/// Per-opcode expression construction.
#[derive(Debug, Clone, Copy)]
pub struct ExprBuilder<'a> {
    arena: &'a ExprArena,
    node_limit: usize,
    pass: Pass,
}

impl<'a> ExprBuilder<'a> {
    /// Creates a builder interning into `arena`, capping candidate sets at `node_limit` and
    /// tagging accesses with `pass`.
    #[must_use]
    pub fn new(arena: &'a ExprArena, node_limit: usize, pass: Pass) -> Self {
        Self {
            arena,
            node_limit: node_limit.max(1),
            pass,
        }
    }

    /// Builds the output candidates and accesses of `op`.
    ///
    /// # Arguments
    ///
    /// * `op` - The operation to build
    /// * `output` - The value `op` defines, if any
    /// * `operands` - One entry per input of `op`, in order
    /// * `calls` - Expands `Call` operations
    pub fn build(
        &self,
        op: &Operation,
        output: Option<&Value>,
        operands: &[Operand<'_>],
        calls: &mut dyn CallHandler,
    ) -> BuildOutcome {
        let mut outcome = BuildOutcome::default();
        let size = output.map_or(0, |v| v.size);
        let mut binding = CandidateSet::new(self.node_limit);

        match op.opcode {
            Opcode::Copy => {
                if let Some(source) = operands.first() {
                    binding.extend(source.exprs.iter().copied());
                }
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::And
            | Opcode::Or
            | Opcode::Xor
            | Opcode::Shl
            | Opcode::Shr
            | Opcode::Sar => {
                let bin = match op.opcode {
                    Opcode::Add => BinaryOp::Add,
                    Opcode::Sub => BinaryOp::Sub,
                    Opcode::Mul => BinaryOp::Mul,
                    Opcode::And => BinaryOp::And,
                    Opcode::Or => BinaryOp::Or,
                    Opcode::Xor => BinaryOp::Xor,
                    Opcode::Shl => BinaryOp::Shl,
                    Opcode::Shr => BinaryOp::Shr,
                    _ => BinaryOp::Sar,
                };
                match operands {
                    [left, right] if !left.value.is_constant() => {
                        'product: for &l in left.exprs {
                            for &r in right.exprs {
                                if !binding.push(self.arena.binary(bin, l, r, size)) {
                                    break 'product;
                                }
                            }
                        }
                    }
                    _ => self.unsupported(op, "constant first operand", &mut outcome),
                }
            }
            Opcode::PtrAdd => match operands {
                [base, index, element] if !base.value.is_constant() => {
                    'product: for &b in base.exprs {
                        for &i in index.exprs {
                            for &e in element.exprs {
                                let scaled = self.arena.binary(BinaryOp::Mul, i, e, size);
                                let address = self.arena.binary(BinaryOp::Add, b, scaled, size);
                                if !binding.push(address) {
                                    break 'product;
                                }
                            }
                        }
                    }
                }
                _ => self.unsupported(op, "constant base pointer", &mut outcome),
            },
            Opcode::PtrSub => match operands {
                [base, offset] if !base.value.is_constant() => {
                    'product: for &b in base.exprs {
                        for &o in offset.exprs {
                            if !binding.push(self.arena.binary(BinaryOp::Add, b, o, size)) {
                                break 'product;
                            }
                        }
                    }
                }
                _ => self.unsupported(op, "constant base pointer", &mut outcome),
            },
            Opcode::SignExtend | Opcode::ZeroExtend | Opcode::Truncate => {
                let kind = match op.opcode {
                    Opcode::SignExtend => CastKind::SignExtend,
                    Opcode::ZeroExtend => CastKind::ZeroExtend,
                    _ => CastKind::Truncate,
                };
                if let Some(source) = operands.first() {
                    binding.extend(source.exprs.iter().map(|&e| self.arena.cast(kind, e, size)));
                }
            }
            Opcode::Load => {
                if let Some(address) = operands.first() {
                    for &a in address.exprs {
                        if !binding.push(self.arena.deref(a, size)) {
                            break;
                        }
                        outcome
                            .accesses
                            .push(self.access(op, a, size, AccessKind::Load, None));
                    }
                }
            }
            Opcode::Store => {
                if let [address, value] = operands {
                    let mut pairs = 0usize;
                    'pairs: for &a in address.exprs {
                        for &v in value.exprs {
                            if pairs >= self.node_limit {
                                self.overflow(op, "store pairs", &mut outcome);
                                break 'pairs;
                            }
                            pairs += 1;
                            outcome.accesses.push(self.access(
                                op,
                                a,
                                value.value.size,
                                AccessKind::Store,
                                Some(v),
                            ));
                        }
                    }
                }
            }
            Opcode::Phi => {
                for operand in operands {
                    binding.extend(operand.exprs.iter().copied());
                    if binding.is_full() {
                        // Keep scanning so the overflow is noticed
                        binding.extend(operands.iter().flat_map(|o| o.exprs.iter().copied()));
                        break;
                    }
                }
            }
            Opcode::Call => {
                let args: Vec<&[ExprId]> = operands.iter().map(|o| o.exprs).collect();
                let expansion = calls.expand(op, &args);
                outcome.accesses.extend(expansion.accesses);
                if output.is_some() {
                    binding.extend(expansion.returns);
                }
            }
            Opcode::Return => {}
            Opcode::Neg
            | Opcode::Not
            | Opcode::Div
            | Opcode::Rem
            | Opcode::Compare
            | Opcode::Other => {
                if output.is_some() {
                    self.unsupported(op, "operation not modeled", &mut outcome);
                }
            }
        }

        if binding.truncated() {
            self.overflow(op, "binding", &mut outcome);
        }

        if let Some(value) = output {
            if binding.is_empty() {
                binding.push(self.arena.unknown(value.size));
            }
            outcome.binding = binding.into_vec();
        }

        outcome
    }

    fn access(
        &self,
        op: &Operation,
        address: ExprId,
        size: u8,
        kind: AccessKind,
        value: Option<ExprId>,
    ) -> MemoryAccess {
        MemoryAccess {
            root: self.arena.root_of(address),
            address,
            size,
            kind,
            value,
            site: op.id,
            location: op.location,
            pass: self.pass,
        }
    }

    fn unsupported(&self, op: &Operation, reason: &str, outcome: &mut BuildOutcome) {
        log::debug!("{} at 0x{:x} not modeled: {}", op.opcode, op.location, reason);
        outcome.issues.push(
            Diagnostic::of(
                DiagnosticKind::UnsupportedOperation,
                format!("{} ({}): {}", op.opcode, op.id, reason),
            )
            .with_location(op.location),
        );
    }

    fn overflow(&self, op: &Operation, what: &str, outcome: &mut BuildOutcome) {
        log::warn!(
            "{} of {} at 0x{:x} truncated to {} candidates",
            what,
            op.id,
            op.location,
            self.node_limit
        );
        outcome.issues.push(
            Diagnostic::of(
                DiagnosticKind::ExpressionSetOverflow,
                format!(
                    "{} of {} ({}) truncated to {} expressions",
                    what, op.id, op.opcode, self.node_limit
                ),
            )
            .with_location(op.location),
        );
    }
}
