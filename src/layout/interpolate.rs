//! Struct interpolation.
//!
//! The interpolator turns the accesses rooted at one formal parameter into a tree of
//! [`StructLayout`]s. Every address is split into a base and a constant offset. The base is
//! either the parameter itself or a `Deref` of another such address, so a base is identified by
//! its *path*: the offsets of the pointer loads leading from the parameter to it. The empty path
//! is the parameter's own struct; `[0x10]` is the struct pointed to by the member at `0x10`.
//!
//! Structs are built per path from their accesses in log order, then linked bottom-up so that
//! the member a child was loaded from becomes a [`MemberKind::Pointer`]. Names are drawn from
//! the session's [`NameCounter`] last, parent first and children in offset order.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use crate::{
    analysis::{
        ArraySite, BinaryOp, ConflictPolicy, EngineConfig, ExprArena, ExprId, ExprNode,
        MemoryAccess, ParamRef,
    },
    ir::OpId,
    layout::{Member, MemberAccess, MemberKind, StructLayout},
    session::NameCounter,
};

/// Accesses at or past this offset are not placed.
pub const MAX_STRUCT_SIZE: u64 = 1 << 20;

/// A rejected or resolved member overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutConflict {
    /// Name of the struct the conflict occurred in.
    pub structure: String,
    /// Offset of the incoming access.
    pub offset: u64,
    /// Size of the member that was already present.
    pub existing: u64,
    /// Size of the incoming access.
    pub incoming: u64,
    /// Size of the member after applying the policy.
    pub kept: u64,
    /// Code location of the incoming access.
    pub location: u64,
}

impl fmt::Display for LayoutConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+0x{:x}: {}-byte access at 0x{:08x} overlaps a {}-byte member, kept {}",
            self.structure, self.offset, self.incoming, self.location, self.existing, self.kept
        )
    }
}

/// Result of interpolating one root parameter.
#[derive(Debug, Clone)]
pub struct Interpolation {
    /// The root struct with nested pointees.
    pub layout: StructLayout,
    /// Overlaps met while placing members.
    pub conflicts: Vec<LayoutConflict>,
    /// Accesses whose address could not be expressed as base plus constant offset.
    pub unresolved: usize,
}

#[derive(Debug, Clone, Copy)]
enum Placement {
    Fixed(u64),
    Variable,
}

struct Group<'a> {
    path: Vec<u64>,
    accesses: Vec<(&'a MemoryAccess, Placement)>,
}

/// Builds struct layouts from access logs.
pub struct Interpolator<'a> {
    arena: &'a ExprArena,
    config: &'a EngineConfig,
    names: &'a NameCounter,
}

impl<'a> Interpolator<'a> {
    /// Creates an interpolator drawing names from `names`.
    #[must_use]
    pub fn new(arena: &'a ExprArena, config: &'a EngineConfig, names: &'a NameCounter) -> Self {
        Self {
            arena,
            config,
            names,
        }
    }

    /// Interpolates the accesses of `root` into a struct tree.
    ///
    /// Accesses rooted elsewhere are ignored. `array_sites` marks the sites whose members are
    /// array walks.
    pub fn interpolate(
        &self,
        root: ParamRef,
        accesses: &[MemoryAccess],
        array_sites: &BTreeMap<OpId, ArraySite>,
    ) -> Interpolation {
        let mut groups: Vec<Group<'_>> = vec![Group {
            path: Vec::new(),
            accesses: Vec::new(),
        }];
        let mut index: HashMap<Vec<u64>, usize> = HashMap::from([(Vec::new(), 0)]);
        let mut unresolved = 0;

        for access in accesses.iter().filter(|a| a.root == Some(root)) {
            let Some((path, placement)) = self.place(root, access) else {
                log::debug!(
                    "0x{:08x}: address {} not placed",
                    access.location,
                    self.arena.render(access.address)
                );
                unresolved += 1;
                continue;
            };
            for depth in 1..path.len() {
                let prefix = &path[..depth];
                if !index.contains_key(prefix) {
                    index.insert(prefix.to_vec(), groups.len());
                    groups.push(Group {
                        path: prefix.to_vec(),
                        accesses: Vec::new(),
                    });
                }
            }
            let slot = *index.entry(path.clone()).or_insert_with(|| {
                groups.push(Group {
                    path,
                    accesses: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].accesses.push((access, placement));
        }

        // Extent each struct needs for its pointer members
        let mut pointer_ends: HashMap<usize, u64> = HashMap::new();
        for group in &groups[1..] {
            let (last, parent) = match group.path.split_last() {
                Some((&last, parent)) => (last, parent),
                None => continue,
            };
            if let Some(&p) = index.get(parent) {
                let end = last.saturating_add(u64::from(self.config.pointer_size));
                let entry = pointer_ends.entry(p).or_insert(0);
                *entry = (*entry).max(end);
            }
        }

        let mut conflicts: Vec<(usize, LayoutConflict)> = Vec::new();
        let mut built: Vec<Option<StructLayout>> = groups
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let required = pointer_ends.get(&i).copied().unwrap_or(0);
                Some(self.build(i, group, required, array_sites, &mut conflicts))
            })
            .collect();

        // Link children into parents, deepest first
        let mut order: Vec<usize> = (1..groups.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(groups[i].path.len()));
        for i in order {
            let Some(child) = built[i].take() else {
                continue;
            };
            let Some((&offset, parent_path)) = groups[i].path.split_last() else {
                continue;
            };
            let Some(&p) = index.get(parent_path) else {
                continue;
            };
            let Some(parent) = built[p].as_mut() else {
                continue;
            };
            let location = groups[i]
                .accesses
                .first()
                .map_or(0, |(access, _)| access.location);
            if let Some(conflict) = self.attach(parent, offset, child, location) {
                conflicts.push((p, conflict));
            }
        }

        let mut layout = built[0]
            .take()
            .unwrap_or_else(|| StructLayout::new(String::new(), 0));
        let names = self.assign_names(&mut layout);
        let conflicts = conflicts
            .into_iter()
            .map(|(group, mut conflict)| {
                conflict.structure = names.get(&groups[group].path).cloned().unwrap_or_default();
                conflict
            })
            .collect();

        Interpolation {
            layout,
            conflicts,
            unresolved,
        }
    }

    /// Returns the base path and placement of an access.
    fn place(&self, root: ParamRef, access: &MemoryAccess) -> Option<(Vec<u64>, Placement)> {
        let (base, offset) = self.arena.split_offset(access.address);
        if let Some(path) = self.path_of(root, base) {
            let offset = u64::try_from(offset).ok()?;
            let end = offset.checked_add(u64::from(access.size))?;
            return (end <= MAX_STRUCT_SIZE).then_some((path, Placement::Fixed(offset)));
        }

        // base + variable index
        if let ExprNode::Binary {
            op: BinaryOp::Add,
            left,
            right,
            ..
        } = self.arena.node(base)
        {
            for operand in [left, right] {
                let (inner, _) = self.arena.split_offset(operand);
                if let Some(path) = self.path_of(root, inner) {
                    return Some((path, Placement::Variable));
                }
            }
        }
        None
    }

    /// Follows `Deref` bases back to the root parameter, collecting load offsets.
    fn path_of(&self, root: ParamRef, base: ExprId) -> Option<Vec<u64>> {
        let mut path = Vec::new();
        let mut current = base;
        loop {
            match self.arena.node(current) {
                ExprNode::Param {
                    function, index, ..
                } if function == root.function && index == root.index => {
                    path.reverse();
                    return Some(path);
                }
                ExprNode::Deref { address, .. } => {
                    let (inner, offset) = self.arena.split_offset(address);
                    let offset = u64::try_from(offset).ok()?;
                    if offset >= MAX_STRUCT_SIZE {
                        return None;
                    }
                    path.push(offset);
                    current = inner;
                }
                _ => return None,
            }
        }
    }

    fn build(
        &self,
        group_index: usize,
        group: &Group<'_>,
        required: u64,
        array_sites: &BTreeMap<OpId, ArraySite>,
        conflicts: &mut Vec<(usize, LayoutConflict)>,
    ) -> StructLayout {
        let fixed_end = group
            .accesses
            .iter()
            .filter_map(|(access, placement)| match placement {
                Placement::Fixed(offset) => Some(offset + u64::from(access.size)),
                Placement::Variable => None,
            })
            .max();
        let size = match fixed_end {
            Some(end) => end.max(required),
            None if !group.accesses.is_empty() => {
                u64::from(self.config.pointer_size).max(required)
            }
            None => required,
        };

        let mut layout = StructLayout::new(String::new(), size);
        for &(access, placement) in &group.accesses {
            let Placement::Fixed(offset) = placement else {
                continue;
            };
            let size = u64::from(access.size);
            layout.mark(offset, size);
            let array = array_sites.get(&access.site).copied();
            if let Some(conflict) = self.place_member(&mut layout, offset, size, access, array) {
                conflicts.push((group_index, conflict));
            }
        }
        layout
    }

    fn place_member(
        &self,
        layout: &mut StructLayout,
        offset: u64,
        size: u64,
        access: &MemoryAccess,
        array: Option<ArraySite>,
    ) -> Option<LayoutConflict> {
        let end = offset + size;
        let overlapping: Vec<usize> = layout
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.offset < end && offset < m.end())
            .map(|(i, _)| i)
            .collect();

        let Some(&first) = overlapping.first() else {
            let kind = match array {
                Some(ArraySite { stride }) => MemberKind::Array {
                    element_size: size,
                    stride,
                },
                None => MemberKind::Primitive,
            };
            let at = layout.members.partition_point(|m| m.offset < offset);
            layout.members.insert(
                at,
                Member {
                    offset,
                    size,
                    kind,
                    access: access.kind.into(),
                },
            );
            return None;
        };

        let member = &mut layout.members[first];
        if overlapping.len() == 1 && member.offset == offset && member.size == size {
            member.access |= MemberAccess::from(access.kind);
            if let Some(ArraySite { stride }) = array {
                if matches!(member.kind, MemberKind::Primitive) {
                    member.kind = MemberKind::Array {
                        element_size: size,
                        stride,
                    };
                }
            }
            return None;
        }

        let existing = member.size;
        let same_start = overlapping.len() == 1 && member.offset == offset;
        let next_start = layout
            .members
            .get(first + 1)
            .map_or(u64::MAX, |next| next.offset);
        let member = &mut layout.members[first];
        let kept = match self.config.conflict_policy {
            ConflictPolicy::KeepLargest if same_start && size > existing && end <= next_start => {
                member.size = size;
                member.access |= MemberAccess::from(access.kind);
                size
            }
            ConflictPolicy::KeepSmallest if same_start && size < existing => {
                member.size = size;
                member.access |= MemberAccess::from(access.kind);
                size
            }
            _ => existing,
        };

        let conflict = LayoutConflict {
            structure: String::new(),
            offset,
            existing,
            incoming: size,
            kept,
            location: access.location,
        };
        log::warn!("conflicting member layout: {conflict}");
        Some(conflict)
    }

    /// Makes the member at `offset` a pointer to `child`, creating it if no access placed one.
    ///
    /// A member narrower than a pointer keeps its size and is reported as a conflict, as is a
    /// pointer that would overlap other members.
    fn attach(
        &self,
        parent: &mut StructLayout,
        offset: u64,
        child: StructLayout,
        location: u64,
    ) -> Option<LayoutConflict> {
        let size = u64::from(self.config.pointer_size);
        let conflict = |existing: u64| {
            let conflict = LayoutConflict {
                structure: String::new(),
                offset,
                existing,
                incoming: size,
                kept: existing,
                location,
            };
            log::warn!("conflicting member layout: {conflict}");
            conflict
        };

        if let Some(member) = parent.members.iter_mut().find(|m| m.offset == offset) {
            member.kind = MemberKind::Pointer(Box::new(child));
            return (member.size < size).then(|| conflict(member.size));
        }
        if let Some(member) = parent
            .members
            .iter()
            .find(|m| m.offset < offset + size && offset < m.end())
        {
            log::debug!("pointer at +0x{offset:x} overlaps an existing member, pointee dropped");
            return Some(conflict(member.size));
        }
        parent.mark(offset, size);
        let at = parent.members.partition_point(|m| m.offset < offset);
        parent.members.insert(
            at,
            Member {
                offset,
                size,
                kind: MemberKind::Pointer(Box::new(child)),
                access: MemberAccess::LOAD,
            },
        );
        None
    }

    /// Names the tree parent first, children in member offset order. Returns path to name.
    fn assign_names(&self, root: &mut StructLayout) -> HashMap<Vec<u64>, String> {
        let mut names = HashMap::new();
        let mut stack: Vec<(Vec<u64>, &mut StructLayout)> = vec![(Vec::new(), root)];
        while let Some((path, layout)) = stack.pop() {
            layout.name = self.names.next_name();
            names.insert(path.clone(), layout.name.clone());
            let mut children: Vec<(Vec<u64>, &mut StructLayout)> = layout
                .members
                .iter_mut()
                .filter_map(|member| {
                    let offset = member.offset;
                    match &mut member.kind {
                        MemberKind::Pointer(child) => {
                            let mut child_path = path.clone();
                            child_path.push(offset);
                            Some((child_path, child.as_mut()))
                        }
                        _ => None,
                    }
                })
                .collect();
            children.reverse();
            stack.extend(children);
        }
        names
    }
}
