//! Per-function summaries and their session-wide cache.
//!
//! A [`FunctionSummary`] is everything a caller needs to know about a callee: the accesses it
//! performs through its own formal parameters, what it may return, and which of its access
//! sites walk arrays. Summaries are expressed over the callee's `Param` leaves; callers
//! substitute their actual arguments.
//!
//! The [`SummaryCache`] computes each summary at most once per session and call-depth budget.
//! A summary whose callees were cut by the depth limit only holds for the budget it was
//! computed with, so slots are keyed by function and budget. Slots are `OnceLock`s held in a
//! `DashMap`; a caller clones the slot out of the map before initializing it, so the map shard
//! is never locked while a summary is computed and concurrent requests for the same slot block
//! on one computation.
//!
//! A computation only ever waits on slots with a smaller budget than its own, so waiting
//! threads cannot form a cycle.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
};

use dashmap::DashMap;

use crate::{
    analysis::{AccessLog, ExprId},
    ir::{FunctionId, OpId},
};

/// An access site classified as walking an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArraySite {
    /// Distance in bytes between consecutive elements.
    pub stride: u64,
}

/// What a function does with its formal parameters.
#[derive(Debug, Clone)]
pub struct FunctionSummary {
    /// The summarized function.
    pub function: FunctionId,
    /// Accesses of the baseline pass, including those inherited from callees.
    pub accesses: AccessLog,
    /// Candidate return expressions.
    pub returns: Vec<ExprId>,
    /// Access sites classified as array walks, own and inherited.
    pub array_sites: BTreeMap<OpId, ArraySite>,
    /// `false` if a call was left unexpanded by the recursion guard or a lookup failed.
    pub complete: bool,
    /// Longest chain of expanded calls below the function.
    pub call_depth: usize,
    /// `true` if the call-depth limit cut a call here or in a callee summary used here.
    pub depth_limited: bool,
}

impl FunctionSummary {
    /// Creates an empty, incomplete summary.
    #[must_use]
    pub fn empty(function: FunctionId) -> Self {
        Self {
            function,
            accesses: AccessLog::new(),
            returns: Vec::new(),
            array_sites: BTreeMap::new(),
            complete: false,
            call_depth: 0,
            depth_limited: false,
        }
    }

    /// Returns `true` if the summary is also the one a computation with `budget` levels of
    /// call expansion would produce.
    #[must_use]
    pub fn fits(&self, budget: usize) -> bool {
        !self.depth_limited && self.call_depth <= budget
    }

    /// Returns the array classification of an access site.
    #[must_use]
    pub fn array_site(&self, site: OpId) -> Option<ArraySite> {
        self.array_sites.get(&site).copied()
    }
}

type Slot = Arc<OnceLock<Arc<FunctionSummary>>>;

/// Single-flight, compute-once cache of function summaries.
///
/// Entries are keyed by function and by the number of call levels the computation was
/// allowed to expand.
#[derive(Debug, Default)]
pub struct SummaryCache {
    slots: DashMap<(FunctionId, usize), Slot>,
    computations: AtomicUsize,
}

impl SummaryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached summary of `function` for `budget`, if it was computed.
    #[must_use]
    pub fn get(&self, function: FunctionId, budget: usize) -> Option<Arc<FunctionSummary>> {
        let slot = self
            .slots
            .get(&(function, budget))
            .map(|slot| Arc::clone(&slot))?;
        slot.get().cloned()
    }

    /// Returns the summary of `function` for `budget`, running `compute` if no summary exists
    /// yet.
    ///
    /// Concurrent callers for the same slot wait for a single computation. `compute` must
    /// not request the same slot again on the same thread.
    pub fn get_or_compute<F>(
        &self,
        function: FunctionId,
        budget: usize,
        compute: F,
    ) -> Arc<FunctionSummary>
    where
        F: FnOnce() -> FunctionSummary,
    {
        let slot: Slot = Arc::clone(&self.slots.entry((function, budget)).or_default());
        if let Some(summary) = slot.get() {
            return Arc::clone(summary);
        }
        let summary = slot.get_or_init(|| {
            self.computations.fetch_add(1, Ordering::Relaxed);
            Arc::new(compute())
        });
        Arc::clone(summary)
    }

    /// Returns the number of computed summaries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.value().get().is_some())
            .count()
    }

    /// Returns `true` if no summary was computed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns how many times a summary computation ran.
    #[must_use]
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }
}
