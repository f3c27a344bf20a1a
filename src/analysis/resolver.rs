//! Memoized, cycle-safe value resolution.
//!
//! The [`DependencyResolver`] answers "which expressions can this value hold" for one function
//! and one traversal pass. Unresolved values are resolved backwards through their defining
//! operations with an explicit work stack: an `Enter` frame marks a value as in progress and
//! schedules its operands in operand order, the matching `Exit` frame hands the resolved
//! operands to the [`ExprBuilder`]. Operands still in progress when their consumer exits sit on
//! a cycle through a phi merge and are represented by a `Cycle` placeholder leaf.
//!
//! Every value is built at most once per resolver, so the accesses an operation performs are
//! logged exactly once per pass no matter how often its output is looked up.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::{
        builder::CandidateSet, AccessLog, CallHandler, Diagnostic, DiagnosticKind, ExprArena,
        ExprBuilder, ExprId, Operand, Pass,
    },
    ir::{FunctionId, IrGraph, OpId, Operation, Value, ValueId, ValueKind},
    Result,
};

enum Frame {
    Enter(ValueId),
    Exit(ValueId),
}

/// Resolves values of one function to candidate expression sets.
pub struct DependencyResolver<'a> {
    graph: &'a dyn IrGraph,
    arena: &'a ExprArena,
    function: FunctionId,
    builder: ExprBuilder<'a>,
    pass: Pass,
    node_limit: usize,
    /// Memoized candidate sets.
    bindings: HashMap<ValueId, Vec<ExprId>>,
    /// Extra candidates appended to a value's built binding.
    seeds: HashMap<ValueId, Vec<ExprId>>,
    log: AccessLog,
    issues: Vec<Diagnostic>,
    reported_cycles: HashSet<ValueId>,
}

impl<'a> DependencyResolver<'a> {
    /// Creates a resolver for `function` with the formal parameters bound to their `Param`
    /// leaves.
    ///
    /// # Errors
    ///
    /// Returns an error if the function or one of its formals is unknown to the graph.
    pub fn new(
        graph: &'a dyn IrGraph,
        arena: &'a ExprArena,
        function: FunctionId,
        node_limit: usize,
        pass: Pass,
    ) -> Result<Self> {
        let mut resolver = Self {
            graph,
            arena,
            function,
            builder: ExprBuilder::new(arena, node_limit, pass),
            pass,
            node_limit: node_limit.max(1),
            bindings: HashMap::new(),
            seeds: HashMap::new(),
            log: AccessLog::new(),
            issues: Vec::new(),
            reported_cycles: HashSet::new(),
        };

        for (index, &formal) in graph.formal_parameters(function)?.iter().enumerate() {
            let size = graph.byte_size(formal)?;
            resolver
                .bindings
                .insert(formal, vec![arena.param(function, index, size)]);
        }

        Ok(resolver)
    }

    /// Installs seed expressions that are appended to the bindings of the given values.
    #[must_use]
    pub fn with_seeds(mut self, seeds: HashMap<ValueId, Vec<ExprId>>) -> Self {
        self.seeds = seeds;
        self
    }

    /// Returns the function this resolver works on.
    #[must_use]
    pub fn function(&self) -> FunctionId {
        self.function
    }

    /// Returns the memoized binding of a value, if it was resolved.
    #[must_use]
    pub fn binding(&self, value: ValueId) -> Option<&[ExprId]> {
        self.bindings.get(&value).map(Vec::as_slice)
    }

    /// Returns all memoized bindings.
    #[must_use]
    pub fn bindings(&self) -> &HashMap<ValueId, Vec<ExprId>> {
        &self.bindings
    }

    /// Returns the accesses logged so far.
    #[must_use]
    pub fn log(&self) -> &AccessLog {
        &self.log
    }

    /// Consumes the resolver, returning its bindings, access log and collected issues.
    ///
    /// Issues the builder or cycle detection raise are only kept in the baseline pass, where
    /// they are not repeats; truncated seeded bindings are kept in every pass.
    #[must_use]
    pub fn into_parts(self) -> (HashMap<ValueId, Vec<ExprId>>, AccessLog, Vec<Diagnostic>) {
        (self.bindings, self.log, self.issues)
    }

    /// Returns the candidate expressions of `value`, resolving it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot answer a value or definition lookup.
    pub fn lookup(&mut self, value: ValueId, calls: &mut dyn CallHandler) -> Result<Vec<ExprId>> {
        if let Some(binding) = self.bindings.get(&value) {
            return Ok(binding.clone());
        }

        let graph = self.graph;
        let mut in_progress: HashSet<ValueId> = HashSet::new();
        let mut stack = vec![Frame::Enter(value)];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(current) => {
                    if self.bindings.contains_key(&current) || in_progress.contains(&current) {
                        continue;
                    }
                    let node = graph.value(current)?;
                    if let Some(leaf) = self.leaf(node) {
                        self.bindings.insert(current, vec![leaf]);
                        continue;
                    }
                    let Some(op) = graph.definition(current)? else {
                        self.bindings
                            .insert(current, vec![self.arena.unknown(node.size)]);
                        continue;
                    };

                    in_progress.insert(current);
                    stack.push(Frame::Exit(current));
                    for &input in op.inputs.iter().rev() {
                        stack.push(Frame::Enter(input));
                    }
                }
                Frame::Exit(current) => {
                    let node = graph.value(current)?;
                    let binding = match graph.definition(current)? {
                        Some(op) => self.build(op, Some(node), &in_progress, calls)?,
                        None => vec![self.arena.unknown(node.size)],
                    };
                    in_progress.remove(&current);

                    let mut set = CandidateSet::new(self.node_limit);
                    set.extend(binding);
                    let built = set.truncated();
                    if let Some(seeds) = self.seeds.get(&current) {
                        set.extend(seeds.iter().copied());
                    }
                    if set.truncated() && !built {
                        self.seed_overflow(current)?;
                    }
                    self.bindings.insert(current, set.into_vec());
                }
            }
        }

        Ok(self.bindings.get(&value).cloned().unwrap_or_default())
    }

    /// Resolves the inputs of an operation and runs it for its side effects (stores, calls
    /// without output). Operations with an output are resolved through their output value.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot answer a lookup.
    pub fn evaluate_effect(&mut self, op: OpId, calls: &mut dyn CallHandler) -> Result<()> {
        let graph = self.graph;
        let op = graph.operation(op)?;
        if let Some(output) = op.output {
            self.lookup(output, calls)?;
            return Ok(());
        }

        for &input in &op.inputs {
            self.lookup(input, calls)?;
        }
        self.build(op, None, &HashSet::new(), calls)?;
        Ok(())
    }

    /// Leaf binding of values that have no definition to resolve through.
    fn leaf(&self, value: &Value) -> Option<ExprId> {
        match value.kind {
            ValueKind::Constant(c) => Some(self.arena.constant(c, value.size)),
            ValueKind::Address(a) => Some(self.arena.constant(a as i64, value.size)),
            ValueKind::Parameter(index) => {
                Some(self.arena.param(value.function, index, value.size))
            }
            ValueKind::Input => Some(self.arena.unknown(value.size)),
            ValueKind::Operation | ValueKind::Phi => None,
        }
    }

    fn build(
        &mut self,
        op: &Operation,
        output: Option<&Value>,
        in_progress: &HashSet<ValueId>,
        calls: &mut dyn CallHandler,
    ) -> Result<Vec<ExprId>> {
        let graph = self.graph;
        let mut values = Vec::with_capacity(op.inputs.len());
        let mut exprs = Vec::with_capacity(op.inputs.len());

        for &input in &op.inputs {
            let value = graph.value(input)?;
            let candidates = match self.bindings.get(&input) {
                Some(binding) => binding.clone(),
                None if in_progress.contains(&input) => {
                    self.note_cycle(op, input);
                    vec![self.arena.cycle(input, value.size)]
                }
                None => vec![self.arena.unknown(value.size)],
            };
            values.push(value);
            exprs.push(candidates);
        }

        let operands: Vec<Operand<'_>> = values
            .iter()
            .zip(&exprs)
            .map(|(&value, exprs)| Operand {
                value,
                exprs: exprs.as_slice(),
            })
            .collect();

        let outcome = self.builder.build(op, output, &operands, calls);
        self.log.extend(outcome.accesses);
        if self.pass == Pass::Baseline {
            self.issues.extend(outcome.issues);
        }
        Ok(outcome.binding)
    }

    fn seed_overflow(&mut self, value: ValueId) -> Result<()> {
        let location = self.graph.definition(value)?.map(|op| op.location);
        log::warn!(
            "seeded binding of {} truncated to {} candidates",
            value,
            self.node_limit
        );
        let mut issue = Diagnostic::of(
            DiagnosticKind::ExpressionSetOverflow,
            format!(
                "seeded binding of {value} truncated to {} expressions",
                self.node_limit
            ),
        )
        .with_function(self.function);
        if let Some(location) = location {
            issue = issue.with_location(location);
        }
        self.issues.push(issue);
        Ok(())
    }

    fn note_cycle(&mut self, op: &Operation, value: ValueId) {
        if self.pass != Pass::Baseline || !self.reported_cycles.insert(value) {
            return;
        }
        log::trace!("{} reaches itself through {} ({})", value, op.id, op.opcode);
        self.issues.push(
            Diagnostic::of(
                DiagnosticKind::CycleDetected,
                format!("{value} reaches itself through {} ({})", op.id, op.opcode),
            )
            .with_function(self.function)
            .with_location(op.location),
        );
    }
}
