//! Analysis sessions and reports.
//!
//! An [`AnalysisSession`] is the public entry point of the engine. It owns everything that
//! lives for one run over a program: the configuration, the expression arena, the summary
//! cache, the struct-name counter and the diagnostics. Sessions are cheap to create; results
//! from different sessions share nothing, including struct names.
//!
//! # Usage
//!
//! ```rust
//! use layoutscope::prelude::*;
//!
//! // struct s { int a; int b; };  void set_b(struct s *p) { p->b = 0; }
//! let mut b = ProgramBuilder::new();
//! let f = b.function("set_b", &[8]);
//! let p = b.param(f, 0)?;
//! let four = b.constant(f, 4, 8);
//! let field = b.op(f, Opcode::PtrSub, &[p, four], 8)?;
//! let zero = b.constant(f, 0, 4);
//! b.store(f, field, zero)?;
//! b.ret(f, &[])?;
//! let program = b.build();
//!
//! let session = AnalysisSession::new(&program, EngineConfig::default());
//! let report = session.analyze_function(f)?;
//! let layout = &report.roots[0].layout;
//! assert_eq!(layout.size, 8);
//! assert_eq!(layout.unaccessed_ranges(), vec![(0, 4)]);
//! # Ok::<(), layoutscope::Error>(())
//! ```
//!
//! # Program analysis
//!
//! [`AnalysisSession::analyze_program`] condenses the call graph into strongly connected
//! components and computes summaries level by level, callees before callers. With
//! [`EngineConfig::parallel`] the components of one level run on the rayon pool; members of a
//! component always run in order on one thread. Layouts are interpolated afterwards in
//! function order, so reports and struct names do not depend on scheduling.
//!
//! Each function is reported once per session. Repeated requests return the first report,
//! with the same struct names, and conflicts are recorded as diagnostics only once.
//!
//! # Concurrency
//!
//! A session is `Sync`, and concurrent [`AnalysisSession::summary`] calls share work. Which
//! member of a recursive component is cut depends on where the component is entered;
//! [`AnalysisSession::analyze_program`] always enters components in program order.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};

use dashmap::DashMap;
use rayon::prelude::*;

use crate::{
    analysis::{
        AccessKind, Diagnostic, DiagnosticKind, Diagnostics, EngineConfig, ExprArena,
        FunctionSummary, InterproceduralAnalyzer, MemoryAccess, ParamRef, Pass, SummaryCache,
    },
    ir::{FunctionId, IrGraph},
    layout::{Interpolator, LayoutConflict, StructLayout},
    utils::{component_index, strongly_connected_components},
    Result,
};

/// Per-session generator of `struct_N` names.
#[derive(Debug, Default)]
pub struct NameCounter(AtomicUsize);

impl NameCounter {
    /// Creates a counter starting at `struct_0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next unused name.
    pub fn next_name(&self) -> String {
        format!("struct_{}", self.0.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns how many names were handed out.
    #[must_use]
    pub fn issued(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// One observed access, rendered for consumers that do not hold the arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRecord {
    /// Code location of the originating operation.
    pub location: u64,
    /// Rendered address expression.
    pub expression: String,
    /// Read or write.
    pub kind: AccessKind,
    /// Bytes accessed.
    pub size: u8,
    /// Traversal that observed the access.
    pub pass: Pass,
}

impl AccessRecord {
    fn new(access: &MemoryAccess, arena: &ExprArena) -> Self {
        Self {
            location: access.location,
            expression: arena.render(access.address),
            kind: access.kind,
            size: access.size,
            pass: access.pass,
        }
    }
}

impl fmt::Display for AccessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:08x} {:<5} {} *({})",
            self.location, self.kind, self.size, self.expression
        )
    }
}

/// Recovered layout of one formal parameter.
#[derive(Debug, Clone)]
pub struct RootReport {
    /// The parameter.
    pub parameter: ParamRef,
    /// The struct tree rooted at the parameter.
    pub layout: StructLayout,
    /// Accesses rooted at the parameter, in log order.
    pub accesses: Vec<AccessRecord>,
    /// Member overlaps met while interpolating.
    pub conflicts: Vec<LayoutConflict>,
    /// Accesses that could not be placed.
    pub unresolved: usize,
}

/// Analysis result of one function.
#[derive(Debug, Clone)]
pub struct FunctionReport {
    /// The analyzed function.
    pub function: FunctionId,
    /// Its display name.
    pub name: String,
    /// `false` if recursion or depth limits left calls unexpanded.
    pub complete: bool,
    /// One entry per formal parameter, in parameter order.
    pub roots: Vec<RootReport>,
}

impl FunctionReport {
    /// Returns the report of the parameter at `index`.
    #[must_use]
    pub fn root(&self, index: usize) -> Option<&RootReport> {
        self.roots.get(index)
    }
}

impl fmt::Display for FunctionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.function)?;
        if !self.complete {
            write!(f, " [incomplete]")?;
        }
        writeln!(f)?;
        for root in &self.roots {
            writeln!(f, "param_{}:", root.parameter.index)?;
            writeln!(f, "{}", root.layout)?;
        }
        Ok(())
    }
}

/// State and entry points of one analysis run.
pub struct AnalysisSession<'g> {
    analyzer: InterproceduralAnalyzer<'g>,
    names: NameCounter,
    reports: DashMap<FunctionId, Arc<OnceLock<FunctionReport>>>,
}

impl<'g> AnalysisSession<'g> {
    /// Creates a session over `graph`.
    #[must_use]
    pub fn new(graph: &'g dyn IrGraph, config: EngineConfig) -> Self {
        Self {
            analyzer: InterproceduralAnalyzer::new(graph, config),
            names: NameCounter::new(),
            reports: DashMap::new(),
        }
    }

    /// Returns the analyzed graph.
    #[must_use]
    pub fn graph(&self) -> &'g dyn IrGraph {
        self.analyzer.graph()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        self.analyzer.config()
    }

    /// Returns the expression arena.
    #[must_use]
    pub fn arena(&self) -> &ExprArena {
        self.analyzer.arena()
    }

    /// Returns the summary cache.
    #[must_use]
    pub fn summaries(&self) -> &SummaryCache {
        self.analyzer.summaries()
    }

    /// Returns the struct-name counter.
    #[must_use]
    pub fn names(&self) -> &NameCounter {
        &self.names
    }

    /// Returns everything that degraded the analysis so far.
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        self.analyzer.diagnostics()
    }

    /// Returns the summary of `function`, computing it on first request.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FunctionNotFound`] for unknown functions.
    pub fn summary(&self, function: FunctionId) -> Result<Arc<FunctionSummary>> {
        self.analyzer.summary(function)
    }

    /// Recovers the layouts of every formal parameter of `function`.
    ///
    /// The first call interpolates the layouts; later calls return a copy of that report.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FunctionNotFound`] for unknown functions.
    pub fn analyze_function(&self, function: FunctionId) -> Result<FunctionReport> {
        let summary = self.summary(function)?;
        let graph = self.graph();
        let name = graph.function_name(function)?;
        let parameters = graph.formal_parameters(function)?.len();

        let slot = Arc::clone(&self.reports.entry(function).or_default());
        let report = slot.get_or_init(|| self.report(&summary, name, parameters));
        Ok(report.clone())
    }

    /// Analyzes every function of the program, returning reports in function order.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph's call graph references unknown functions or operations.
    pub fn analyze_program(&self) -> Result<Vec<FunctionReport>> {
        let levels = self.schedule()?;
        log::debug!(
            "analyzing {} function(s) in {} level(s)",
            self.graph().functions().len(),
            levels.len()
        );

        for level in &levels {
            let summarize = |component: &Vec<FunctionId>| -> Result<()> {
                for &function in component {
                    self.summary(function)?;
                }
                Ok(())
            };

            let results: Vec<Result<()>> = if self.config().parallel {
                level.par_iter().map(summarize).collect()
            } else {
                level.iter().map(summarize).collect()
            };
            for result in results {
                result?;
            }
        }

        self.graph()
            .functions()
            .into_iter()
            .map(|function| self.analyze_function(function))
            .collect()
    }

    /// Groups the call graph's strongly connected components into levels.
    ///
    /// A component's level is one more than the highest level among the components it calls,
    /// so every level only depends on earlier ones. Components list their functions in
    /// program order.
    ///
    /// # Errors
    ///
    /// Returns an error if a call site cannot be resolved.
    pub fn schedule(&self) -> Result<Vec<Vec<Vec<FunctionId>>>> {
        let graph = self.graph();
        let functions = graph.functions();
        let position: HashMap<FunctionId, usize> =
            functions.iter().enumerate().map(|(i, &f)| (f, i)).collect();

        let mut successors = vec![Vec::new(); functions.len()];
        for (i, &function) in functions.iter().enumerate() {
            for callee in graph.callees(function)? {
                if let Some(&j) = position.get(&callee) {
                    successors[i].push(j);
                }
            }
        }

        // Callee components come first
        let sccs = strongly_connected_components(&successors);
        let component = component_index(functions.len(), &sccs);

        let mut level_of = vec![0usize; sccs.len()];
        let mut levels: Vec<Vec<Vec<FunctionId>>> = Vec::new();
        for (c, members) in sccs.iter().enumerate() {
            let level = members
                .iter()
                .flat_map(|&m| successors[m].iter())
                .map(|&callee| component[callee])
                .filter(|&other| other != c)
                .map(|other| level_of[other] + 1)
                .max()
                .unwrap_or(0);
            level_of[c] = level;
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(members.iter().map(|&m| functions[m]).collect());
        }

        Ok(levels)
    }

    fn report(&self, summary: &FunctionSummary, name: &str, parameters: usize) -> FunctionReport {
        let function = summary.function;
        let arena = self.arena();
        let interpolator = Interpolator::new(arena, self.config(), &self.names);

        let roots = (0..parameters)
            .map(|index| {
                let parameter = ParamRef { function, index };
                let accesses: Vec<MemoryAccess> =
                    summary.accesses.for_root(parameter).copied().collect();
                let interpolation =
                    interpolator.interpolate(parameter, &accesses, &summary.array_sites);

                for conflict in &interpolation.conflicts {
                    self.diagnostics().push(
                        Diagnostic::of(DiagnosticKind::ConflictingMemberLayout, conflict.to_string())
                            .with_function(function)
                            .with_location(conflict.location),
                    );
                }

                RootReport {
                    parameter,
                    layout: interpolation.layout,
                    accesses: accesses
                        .iter()
                        .map(|access| AccessRecord::new(access, arena))
                        .collect(),
                    conflicts: interpolation.conflicts,
                    unresolved: interpolation.unresolved,
                }
            })
            .collect();

        FunctionReport {
            function,
            name: name.to_string(),
            complete: summary.complete,
            roots,
        }
    }
}
