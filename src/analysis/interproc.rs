//! Interprocedural analysis.
//!
//! The [`InterproceduralAnalyzer`] owns the per-session state shared by all function
//! analyses: the IR graph, the configuration, the expression arena, the summary cache and the
//! diagnostics. Summarizing a function runs a forward traversal from its formal parameters,
//! resolving every value reachable through consumer edges, then resolves the values feeding its
//! returns. Calls met on the way are expanded with the callee's summary, which is computed on
//! demand and substituted with the call's actual arguments.
//!
//! # Recursion
//!
//! The analyzer keeps the chain of functions being summarized on the current thread. A call
//! into a function already on that chain, or one that would nest deeper than
//! [`EngineConfig::max_call_depth`], is left unexpanded and marks the caller's summary
//! incomplete. Because an on-chain callee is never looked up in the cache, a thread never waits
//! on a summary it is computing itself.
//!
//! A callee reached at chain length `n` may only expand `max_call_depth - n` further levels of
//! calls. Its summary is cached under that budget, and a full-budget summary is reused for a
//! smaller budget only when its own call tree fits. A function's summary therefore does not
//! depend on which caller happened to reach it first.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
};

use crate::{
    analysis::{
        arrays, builder::CandidateSet, AccessLog, ArraySite, CallExpansion, CallHandler,
        DependencyResolver, Diagnostic, DiagnosticKind, Diagnostics, EngineConfig, ExprArena,
        ExprId, ExprNode, FunctionSummary, MemoryAccess, Pass, SummaryCache,
    },
    ir::{FunctionId, IrGraph, OpId, Operation, ValueId},
    Error, Result,
};

/// Result of one traversal of a function.
struct PassOutput {
    bindings: HashMap<ValueId, Vec<ExprId>>,
    log: AccessLog,
    returns: Vec<ExprId>,
    inherited: BTreeMap<OpId, ArraySite>,
    complete: bool,
    call_depth: usize,
    depth_limited: bool,
}

/// Session-wide state and summary computation.
pub struct InterproceduralAnalyzer<'g> {
    graph: &'g dyn IrGraph,
    config: EngineConfig,
    arena: ExprArena,
    summaries: SummaryCache,
    diagnostics: Diagnostics,
}

impl<'g> InterproceduralAnalyzer<'g> {
    /// Creates an analyzer over `graph`.
    #[must_use]
    pub fn new(graph: &'g dyn IrGraph, config: EngineConfig) -> Self {
        Self {
            graph,
            config,
            arena: ExprArena::new(),
            summaries: SummaryCache::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Returns the analyzed graph.
    #[must_use]
    pub fn graph(&self) -> &'g dyn IrGraph {
        self.graph
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the expression arena.
    #[must_use]
    pub fn arena(&self) -> &ExprArena {
        &self.arena
    }

    /// Returns the summary cache.
    #[must_use]
    pub fn summaries(&self) -> &SummaryCache {
        &self.summaries
    }

    /// Returns the collected diagnostics.
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Returns the summary of `function`, computing it on first request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FunctionNotFound`] if the graph does not know `function`. Failures
    /// inside the computation do not surface here; they produce an incomplete summary and an
    /// `AnalysisFailure` diagnostic.
    pub fn summary(&self, function: FunctionId) -> Result<Arc<FunctionSummary>> {
        self.graph.formal_parameters(function)?;
        Ok(self.summary_on_chain(function, &mut Vec::new()))
    }

    fn summary_on_chain(
        &self,
        function: FunctionId,
        chain: &mut Vec<FunctionId>,
    ) -> Arc<FunctionSummary> {
        let limit = self.config.max_call_depth;
        let budget = limit.saturating_sub(chain.len());
        if budget < limit {
            if let Some(full) = self.summaries.get(function, limit) {
                if full.fits(budget) {
                    return full;
                }
            }
        }
        self.summaries
            .get_or_compute(function, budget, || self.compute(function, chain))
    }

    fn compute(&self, function: FunctionId, chain: &mut Vec<FunctionId>) -> FunctionSummary {
        chain.push(function);
        let result = self.try_compute(function, chain);
        chain.pop();

        match result {
            Ok(summary) => summary,
            Err(error) => {
                log::warn!("summary of {function} failed: {error}");
                self.diagnostics.push(
                    Diagnostic::of(DiagnosticKind::AnalysisFailure, error.to_string())
                        .with_function(function),
                );
                FunctionSummary::empty(function)
            }
        }
    }

    fn try_compute(
        &self,
        function: FunctionId,
        chain: &mut Vec<FunctionId>,
    ) -> Result<FunctionSummary> {
        log::debug!(
            "summarizing {} ({function}), call depth {}",
            self.graph.function_name(function)?,
            chain.len()
        );

        let baseline = self.run_pass(function, Pass::Baseline, HashMap::new(), chain)?;
        let mut array_sites = baseline.inherited;
        let mut call_depth = baseline.call_depth;
        let mut depth_limited = baseline.depth_limited;

        if self.config.detect_arrays {
            let seeds = arrays::loop_variant_seeds(
                self.graph,
                &self.arena,
                &baseline.bindings,
                self.config.node_limit,
            )?;
            if !seeds.is_empty() {
                let variant = self.run_pass(function, Pass::LoopVariant, seeds, chain)?;
                call_depth = call_depth.max(variant.call_depth);
                depth_limited |= variant.depth_limited;
                for (site, array) in variant.inherited {
                    array_sites.entry(site).or_insert(array);
                }
                for (site, array) in arrays::classify(&self.arena, &baseline.log, &variant.log) {
                    array_sites
                        .entry(site)
                        .and_modify(|known| known.stride = known.stride.min(array.stride))
                        .or_insert(array);
                }
            }
        }

        log::debug!(
            "{function}: {} access(es), {} return candidate(s), {} array site(s){}",
            baseline.log.len(),
            baseline.returns.len(),
            array_sites.len(),
            if baseline.complete { "" } else { ", incomplete" }
        );

        Ok(FunctionSummary {
            function,
            accesses: baseline.log,
            returns: baseline.returns,
            array_sites,
            complete: baseline.complete,
            call_depth,
            depth_limited,
        })
    }

    fn run_pass(
        &self,
        function: FunctionId,
        pass: Pass,
        seeds: HashMap<ValueId, Vec<ExprId>>,
        chain: &mut Vec<FunctionId>,
    ) -> Result<PassOutput> {
        let graph = self.graph;
        let mut resolver =
            DependencyResolver::new(graph, &self.arena, function, self.config.node_limit, pass)?
                .with_seeds(seeds);
        let mut calls = CallExpander {
            analyzer: self,
            chain,
            caller: function,
            pass,
            complete: true,
            call_depth: 0,
            depth_limited: false,
            inherited: BTreeMap::new(),
            issues: Vec::new(),
        };

        // Forward: everything reachable from the formals through consumer edges
        let formals = graph.formal_parameters(function)?;
        let mut queue: VecDeque<ValueId> = formals.iter().copied().collect();
        let mut seen_values: HashSet<ValueId> = formals.iter().copied().collect();
        let mut seen_ops: HashSet<OpId> = HashSet::new();

        while let Some(value) = queue.pop_front() {
            for &site in graph.descendants(value) {
                if !seen_ops.insert(site) {
                    continue;
                }
                resolver.evaluate_effect(site, &mut calls)?;
                if let Some(output) = graph.operation(site)?.output {
                    if seen_values.insert(output) {
                        queue.push_back(output);
                    }
                }
            }
        }

        // Backward: whatever may be returned
        let mut returns = CandidateSet::new(self.config.node_limit);
        for value in graph.return_candidates(function)? {
            returns.extend(resolver.lookup(value, &mut calls)?);
        }

        let CallExpander {
            complete,
            call_depth,
            depth_limited,
            inherited,
            issues: call_issues,
            ..
        } = calls;
        let (bindings, log, issues) = resolver.into_parts();

        // Calls expand the same way in both passes
        let call_issues = if pass == Pass::Baseline {
            call_issues
        } else {
            Vec::new()
        };
        for issue in issues.into_iter().chain(call_issues) {
            let issue = match issue.function {
                Some(_) => issue,
                None => issue.with_function(function),
            };
            self.diagnostics.push(issue);
        }

        Ok(PassOutput {
            bindings,
            log,
            returns: returns.into_vec(),
            inherited,
            complete,
            call_depth,
            depth_limited,
        })
    }
}

/// Expands calls of one traversal with callee summaries.
struct CallExpander<'s, 'g> {
    analyzer: &'s InterproceduralAnalyzer<'g>,
    chain: &'s mut Vec<FunctionId>,
    caller: FunctionId,
    pass: Pass,
    complete: bool,
    call_depth: usize,
    depth_limited: bool,
    inherited: BTreeMap<OpId, ArraySite>,
    issues: Vec<Diagnostic>,
}

impl CallExpander<'_, '_> {
    fn report(&mut self, site: &Operation, kind: DiagnosticKind, message: String) {
        log::warn!("{} at 0x{:x}: {}", kind, site.location, message);
        self.issues.push(
            Diagnostic::of(kind, message)
                .with_function(self.caller)
                .with_location(site.location),
        );
    }

    /// Checks whether the call may be expanded, reporting why not otherwise.
    fn admit(&mut self, site: &Operation, callee: FunctionId, actual: usize) -> Result<()> {
        let expected = self.analyzer.graph.formal_parameters(callee)?.len();
        if expected != actual {
            return Err(Error::ArityMismatch {
                site: site.id,
                callee,
                expected,
                actual,
            });
        }
        let limit = self.analyzer.config.max_call_depth;
        if self.chain.len() > limit {
            return Err(Error::RecursionLimit(limit));
        }
        if self.chain.contains(&callee) {
            return Err(Error::Error(format!(
                "recursive call from {} into {callee} not expanded",
                self.caller
            )));
        }
        Ok(())
    }
}

impl CallHandler for CallExpander<'_, '_> {
    fn expand(&mut self, site: &Operation, args: &[&[ExprId]]) -> CallExpansion {
        let Some(callee) = site.callee else {
            return CallExpansion::default();
        };

        match self.admit(site, callee, args.len()) {
            Ok(()) => {}
            Err(error @ Error::ArityMismatch { .. }) => {
                self.report(site, DiagnosticKind::ArityMismatch, error.to_string());
                return CallExpansion::default();
            }
            Err(error @ Error::RecursionLimit(_)) => {
                self.complete = false;
                self.depth_limited = true;
                self.report(site, DiagnosticKind::RecursionLimitExceeded, error.to_string());
                return CallExpansion::default();
            }
            Err(error @ Error::Error(_)) => {
                self.complete = false;
                self.report(site, DiagnosticKind::RecursionLimitExceeded, error.to_string());
                return CallExpansion::default();
            }
            Err(error) => {
                self.complete = false;
                self.report(site, DiagnosticKind::AnalysisFailure, error.to_string());
                return CallExpansion::default();
            }
        }

        let summary = self.analyzer.summary_on_chain(callee, &mut *self.chain);
        if !summary.complete {
            self.complete = false;
        }
        self.call_depth = self.call_depth.max(summary.call_depth + 1);
        self.depth_limited |= summary.depth_limited;
        for (&op, &array) in &summary.array_sites {
            self.inherited.entry(op).or_insert(array);
        }

        let analyzer = self.analyzer;
        let arena = &analyzer.arena;
        let limit = analyzer.config.node_limit;
        let mut truncated = false;
        let mut substitute = |expr: ExprId| -> Vec<ExprId> {
            let (out, cut) = arena.substitute(expr, limit, |leaf| match *leaf {
                ExprNode::Param {
                    function, index, ..
                } if function == callee => args.get(index).map(|candidates| candidates.to_vec()),
                _ => None,
            });
            truncated |= cut;
            out
        };

        let mut accesses = Vec::new();
        for access in &summary.accesses {
            let values = match access.value {
                Some(value) => substitute(value).into_iter().map(Some).collect(),
                None => vec![None],
            };
            for address in substitute(access.address) {
                for &value in &values {
                    accesses.push(MemoryAccess {
                        root: arena.root_of(address),
                        address,
                        value,
                        pass: self.pass,
                        ..*access
                    });
                }
            }
        }

        let mut returns = CandidateSet::new(limit);
        for &ret in &summary.returns {
            returns.extend(substitute(ret));
        }

        if truncated || returns.truncated() {
            self.report(
                site,
                DiagnosticKind::ExpressionSetOverflow,
                format!(
                    "substitution of {callee} into {} truncated to {limit} expressions",
                    self.caller
                ),
            );
        }

        CallExpansion {
            returns: returns.into_vec(),
            accesses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Opcode, ProgramBuilder};

    #[test]
    fn test_callee_accesses_substituted() {
        let mut b = ProgramBuilder::new();
        // void set(int *q) { *q = 1; }
        let callee = b.function("set", &[8]);
        let q = b.param(callee, 0).unwrap();
        let one = b.constant(callee, 1, 4);
        b.store(callee, q, one).unwrap();
        b.ret(callee, &[]).unwrap();
        // void outer(struct s *p) { set(&p->f8); }
        let caller = b.function("outer", &[8]);
        let p = b.param(caller, 0).unwrap();
        let eight = b.constant(caller, 8, 8);
        let field = b.op(caller, Opcode::PtrSub, &[p, eight], 8).unwrap();
        b.call(caller, Some(callee), &[field], None).unwrap();
        b.ret(caller, &[]).unwrap();
        let program = b.build();

        let analyzer = InterproceduralAnalyzer::new(&program, EngineConfig::default());
        let summary = analyzer.summary(caller).unwrap();
        assert!(summary.complete);
        assert_eq!(summary.accesses.len(), 1);
        let access = summary.accesses.iter().next().unwrap();
        assert_eq!(access.root.map(|r| r.function), Some(caller));
        assert_eq!(
            access.base_offset(analyzer.arena()),
            (analyzer.arena().param(caller, 0, 8), 8)
        );
        assert_eq!(analyzer.summaries().computations(), 2);
    }

    #[test]
    fn test_returns_substituted() {
        let mut b = ProgramBuilder::new();
        // char *next(char *q) { return q + 4; }
        let callee = b.function("next", &[8]);
        let q = b.param(callee, 0).unwrap();
        let four = b.constant(callee, 4, 8);
        let r = b.op(callee, Opcode::Add, &[q, four], 8).unwrap();
        b.ret(callee, &[r]).unwrap();
        // load(next(p))
        let caller = b.function("use", &[8]);
        let p = b.param(caller, 0).unwrap();
        let (_, out) = b.call(caller, Some(callee), &[p], Some(8)).unwrap();
        b.load(caller, out.unwrap(), 2).unwrap();
        let program = b.build();

        let analyzer = InterproceduralAnalyzer::new(&program, EngineConfig::default());
        let summary = analyzer.summary(caller).unwrap();
        let access = summary.accesses.iter().next().unwrap();
        assert_eq!(
            access.base_offset(analyzer.arena()),
            (analyzer.arena().param(caller, 0, 8), 4)
        );
        assert_eq!(access.size, 2);
    }

    #[test]
    fn test_self_recursion_is_incomplete() {
        let mut b = ProgramBuilder::new();
        let f = b.function("walk", &[8]);
        let p = b.param(f, 0).unwrap();
        let next = b.load(f, p, 8).unwrap();
        b.call(f, Some(f), &[next], None).unwrap();
        b.ret(f, &[]).unwrap();
        let program = b.build();

        let analyzer = InterproceduralAnalyzer::new(&program, EngineConfig::default());
        let summary = analyzer.summary(f).unwrap();
        assert!(!summary.complete);
        assert_eq!(summary.accesses.len(), 1);
        assert_eq!(
            analyzer
                .diagnostics()
                .by_kind(DiagnosticKind::RecursionLimitExceeded)
                .len(),
            1
        );
    }

    #[test]
    fn test_arity_mismatch_not_substituted() {
        let mut b = ProgramBuilder::new();
        let callee = b.function("two", &[8, 8]);
        let q = b.param(callee, 0).unwrap();
        b.load(callee, q, 4).unwrap();
        let caller = b.function("one", &[8]);
        let p = b.param(caller, 0).unwrap();
        b.call(caller, Some(callee), &[p], None).unwrap();
        let program = b.build();

        let analyzer = InterproceduralAnalyzer::new(&program, EngineConfig::default());
        let summary = analyzer.summary(caller).unwrap();
        assert!(summary.accesses.is_empty());
        assert!(summary.complete);
        let reported = analyzer.diagnostics().by_kind(DiagnosticKind::ArityMismatch);
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].function, Some(caller));
    }

    #[test]
    fn test_depth_limit() {
        let mut b = ProgramBuilder::new();
        let leaf = b.function("leaf", &[8]);
        let q = b.param(leaf, 0).unwrap();
        b.load(leaf, q, 4).unwrap();
        let mid = b.function("mid", &[8]);
        let m = b.param(mid, 0).unwrap();
        b.call(mid, Some(leaf), &[m], None).unwrap();
        let top = b.function("top", &[8]);
        let t = b.param(top, 0).unwrap();
        b.call(top, Some(mid), &[t], None).unwrap();
        let program = b.build();

        let config = EngineConfig::default().with_max_call_depth(1);
        let analyzer = InterproceduralAnalyzer::new(&program, config);
        let summary = analyzer.summary(top).unwrap();
        assert!(!summary.complete);
        assert!(summary.depth_limited);
        assert!(summary.accesses.is_empty());

        // mid on its own has room for its call into leaf
        let mid = analyzer.summary(mid).unwrap();
        assert!(mid.complete);
        assert!(!mid.depth_limited);
        assert_eq!(mid.call_depth, 1);
        assert_eq!(mid.accesses.len(), 1);
    }

    #[test]
    fn test_unknown_function() {
        let program = ProgramBuilder::new().build();
        let analyzer = InterproceduralAnalyzer::new(&program, EngineConfig::default());
        assert!(matches!(
            analyzer.summary(FunctionId::new(0)),
            Err(Error::FunctionNotFound(_))
        ));
    }
}
