//! The memory access log.
//!
//! Every load and store the traversal encounters is recorded as a [`MemoryAccess`]: which
//! parameter the address derives from, the symbolic address, how many bytes were touched, and
//! where in the code it happened. The log of a function's baseline pass is the raw material for
//! struct interpolation; the loop-variant pass produces a second log that is only compared
//! against the first to spot array walks.

use std::{
    collections::{BTreeMap, HashSet},
    fmt::{self, Write},
};

use crate::{
    analysis::{ExprArena, ExprId, ParamRef},
    ir::OpId,
};

/// Direction of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Memory read.
    Load,
    /// Memory write.
    Store,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Load => write!(f, "LOAD"),
            AccessKind::Store => write!(f, "STORE"),
        }
    }
}

/// Traversal that observed an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Ordinary resolution.
    Baseline,
    /// Re-run with loop-carried values advanced by one iteration.
    LoopVariant,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::Baseline => write!(f, "baseline"),
            Pass::LoopVariant => write!(f, "loop-variant"),
        }
    }
}

/// One observed memory read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryAccess {
    /// Parameter the address derives from, if any.
    pub root: Option<ParamRef>,
    /// Symbolic address.
    pub address: ExprId,
    /// Number of bytes accessed.
    pub size: u8,
    /// Read or write.
    pub kind: AccessKind,
    /// Stored value for writes.
    pub value: Option<ExprId>,
    /// Originating operation. Accesses inherited from a callee keep the callee's operation.
    pub site: OpId,
    /// Code location of the originating operation.
    pub location: u64,
    /// Traversal that observed the access.
    pub pass: Pass,
}

impl MemoryAccess {
    /// Splits the address into base and constant offset.
    #[must_use]
    pub fn base_offset(&self, arena: &ExprArena) -> (ExprId, i64) {
        arena.split_offset(self.address)
    }

    /// Renders the access as one line, e.g.
    /// `0x00001008 STORE 4 *(param_0 + 0x8) = 0x0 [baseline]`.
    #[must_use]
    pub fn render(&self, arena: &ExprArena) -> String {
        let mut line = format!(
            "0x{:08x} {} {} *({})",
            self.location,
            self.kind,
            self.size,
            arena.render(self.address)
        );
        if let Some(value) = self.value {
            let _ = write!(line, " = {}", arena.render(value));
        }
        let _ = write!(line, " [{}]", self.pass);
        line
    }
}

/// Ordered, duplicate-free list of memory accesses.
#[derive(Debug, Clone, Default)]
pub struct AccessLog {
    entries: Vec<MemoryAccess>,
    seen: HashSet<MemoryAccess>,
}

impl AccessLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an access unless an identical one is already logged.
    ///
    /// Returns `true` if the access was new.
    pub fn push(&mut self, access: MemoryAccess) -> bool {
        if !self.seen.insert(access) {
            return false;
        }
        self.entries.push(access);
        true
    }

    /// Appends every access of `accesses` in order.
    pub fn extend(&mut self, accesses: impl IntoIterator<Item = MemoryAccess>) {
        for access in accesses {
            self.push(access);
        }
    }

    /// Returns the number of logged accesses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing was logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the accesses in log order.
    pub fn iter(&self) -> std::slice::Iter<'_, MemoryAccess> {
        self.entries.iter()
    }

    /// Returns the accesses deriving from `root`, in log order.
    pub fn for_root(&self, root: ParamRef) -> impl Iterator<Item = &MemoryAccess> {
        self.entries
            .iter()
            .filter(move |access| access.root == Some(root))
    }

    /// Groups the accesses by root parameter. Accesses without a root are dropped.
    #[must_use]
    pub fn partition_by_root(&self) -> BTreeMap<ParamRef, Vec<MemoryAccess>> {
        let mut groups: BTreeMap<ParamRef, Vec<MemoryAccess>> = BTreeMap::new();
        for access in &self.entries {
            if let Some(root) = access.root {
                groups.entry(root).or_default().push(*access);
            }
        }
        groups
    }

    /// Renders the log, one access per line.
    #[must_use]
    pub fn render(&self, arena: &ExprArena) -> String {
        let mut out = String::new();
        for access in &self.entries {
            out.push_str(&access.render(arena));
            out.push('\n');
        }
        out
    }
}

impl<'a> IntoIterator for &'a AccessLog {
    type Item = &'a MemoryAccess;
    type IntoIter = std::slice::Iter<'a, MemoryAccess>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{analysis::BinaryOp, ir::FunctionId};

    fn access(arena: &ExprArena, index: usize, offset: i64, kind: AccessKind) -> MemoryAccess {
        let p = arena.param(FunctionId::new(0), index, 8);
        let address = arena.binary(BinaryOp::Add, p, arena.constant(offset, 8), 8);
        MemoryAccess {
            root: arena.root_of(address),
            address,
            size: 4,
            kind,
            value: (kind == AccessKind::Store).then(|| arena.constant(0, 4)),
            site: OpId::new(offset as usize),
            location: 0x1000 + offset as u64,
            pass: Pass::Baseline,
        }
    }

    #[test]
    fn test_log_dedup_keeps_order() {
        let arena = ExprArena::new();
        let mut log = AccessLog::new();
        assert!(log.push(access(&arena, 0, 8, AccessKind::Store)));
        assert!(log.push(access(&arena, 0, 0, AccessKind::Load)));
        assert!(!log.push(access(&arena, 0, 8, AccessKind::Store)));

        assert_eq!(log.len(), 2);
        let offsets: Vec<_> = log.iter().map(|a| a.base_offset(&arena).1).collect();
        assert_eq!(offsets, vec![8, 0]);
    }

    #[test]
    fn test_partition_by_root() {
        let arena = ExprArena::new();
        let mut log = AccessLog::new();
        log.push(access(&arena, 1, 0, AccessKind::Load));
        log.push(access(&arena, 0, 4, AccessKind::Load));
        log.push(access(&arena, 1, 4, AccessKind::Load));

        let groups = log.partition_by_root();
        assert_eq!(groups.len(), 2);
        let p1 = ParamRef {
            function: FunctionId::new(0),
            index: 1,
        };
        assert_eq!(groups[&p1].len(), 2);
        assert_eq!(log.for_root(p1).count(), 2);
    }

    #[test]
    fn test_render() {
        let arena = ExprArena::new();
        let store = access(&arena, 0, 8, AccessKind::Store);
        assert_eq!(
            store.render(&arena),
            "0x00001008 STORE 4 *(param_0 + 0x8) = 0x0 [baseline]"
        );
    }
}
