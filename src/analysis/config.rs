//! Configuration for the layout recovery engine.

/// Default cap on the number of candidate expressions bound to one value.
pub const DEFAULT_NODE_LIMIT: usize = 32;

/// Default maximum depth of expanded call chains.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 16;

/// How overlapping accesses with different extents are folded into one member.
///
/// Whatever the policy, every conflict is recorded as a
/// [`ConflictingMemberLayout`](crate::analysis::DiagnosticKind::ConflictingMemberLayout)
/// warning and reported in the layout's conflict list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// The member created by the first access stays unchanged (default).
    #[default]
    KeepFirst,
    /// A member at the same offset is widened to the larger access.
    KeepLargest,
    /// A member at the same offset is narrowed to the smaller access.
    KeepSmallest,
}

/// Configuration for an analysis session.
///
/// Controls expression-set bounds, call expansion depth, target pointer width, array
/// detection and scheduling.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum candidate expressions per value; larger sets are truncated in discovery order
    /// (default: 32).
    pub node_limit: usize,

    /// Maximum number of nested calls expanded below the analyzed function (default: 16).
    pub max_call_depth: usize,

    /// Pointer width of the target in bytes (default: 8). Used as the size of structs that
    /// are only ever indexed at non-constant offsets.
    pub pointer_size: u8,

    /// Run the second, loop-variant pass to tell arrays from structs (default: true).
    pub detect_arrays: bool,

    /// Resolution of overlapping member accesses (default: keep first).
    pub conflict_policy: ConflictPolicy,

    /// Compute independent function summaries on the rayon thread pool (default: true).
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_limit: DEFAULT_NODE_LIMIT,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            pointer_size: 8,
            detect_arrays: true,
            conflict_policy: ConflictPolicy::KeepFirst,
            parallel: true,
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-value expression cap. A limit of zero is raised to one.
    #[must_use]
    pub fn with_node_limit(mut self, limit: usize) -> Self {
        self.node_limit = limit.max(1);
        self
    }

    /// Sets the maximum expanded call depth.
    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Sets the target pointer width in bytes.
    #[must_use]
    pub fn with_pointer_size(mut self, size: u8) -> Self {
        self.pointer_size = size;
        self
    }

    /// Sets the member conflict policy.
    #[must_use]
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Enables or disables the loop-variant array detection pass.
    #[must_use]
    pub fn with_array_detection(mut self, enabled: bool) -> Self {
        self.detect_arrays = enabled;
        self
    }

    /// Disables parallel summary computation.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }
}
