//! Recovered layout types.

use std::fmt;

use bitflags::bitflags;

use crate::{analysis::AccessKind, utils::BitSet};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    /// How a member was accessed
    pub struct MemberAccess: u8 {
        /// The member was read
        const LOAD = 0x01;
        /// The member was written
        const STORE = 0x02;
    }
}

impl From<AccessKind> for MemberAccess {
    fn from(kind: AccessKind) -> Self {
        match kind {
            AccessKind::Load => MemberAccess::LOAD,
            AccessKind::Store => MemberAccess::STORE,
        }
    }
}

/// What a member holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberKind {
    /// A scalar of the member's size.
    Primitive,
    /// A pointer whose target was accessed in turn.
    Pointer(Box<StructLayout>),
    /// The start of an array walked by a loop.
    Array {
        /// Size of one observed element access.
        element_size: u64,
        /// Distance between consecutive elements.
        stride: u64,
    },
}

/// A member of a recovered struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Byte offset from the start of the struct.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
    /// What the member holds.
    pub kind: MemberKind,
    /// Observed access kinds.
    pub access: MemberAccess,
}

impl Member {
    /// Returns the offset one past the member's last byte.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.size)
    }

    /// Returns `true` if the member covers `offset`.
    #[must_use]
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.offset && offset < self.end()
    }

    /// Returns the struct a pointer member points to.
    #[must_use]
    pub fn pointee(&self) -> Option<&StructLayout> {
        match &self.kind {
            MemberKind::Pointer(target) => Some(target),
            _ => None,
        }
    }

    fn type_name(&self) -> String {
        match &self.kind {
            MemberKind::Pointer(target) => format!("struct {} *", target.name),
            MemberKind::Primitive => scalar_name(self.size).to_string(),
            MemberKind::Array { element_size, .. } => scalar_name(*element_size).to_string(),
        }
    }
}

fn scalar_name(size: u64) -> &'static str {
    match size {
        1 => "uint8_t",
        2 => "uint16_t",
        4 => "uint32_t",
        8 => "uint64_t",
        16 => "uint128_t",
        _ => "uint8_t",
    }
}

/// A struct recovered from the accesses made through one base address.
///
/// Members are ordered by offset and never overlap. The byte map records which bytes any
/// access touched, including accesses that lost a member conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    /// Generated name, `struct_N`.
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
    /// Members in ascending offset order.
    pub members: Vec<Member>,
    accessed: BitSet,
}

impl StructLayout {
    /// Creates an empty struct of `size` bytes.
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            members: Vec::new(),
            accessed: BitSet::new(usize::try_from(size).unwrap_or(usize::MAX)),
        }
    }

    /// Marks `size` bytes at `offset` as accessed.
    pub(crate) fn mark(&mut self, offset: u64, size: u64) {
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let count = usize::try_from(size).unwrap_or(usize::MAX);
        self.accessed.insert_range(start, count);
    }

    /// Returns `true` if the byte at `offset` was touched.
    #[must_use]
    pub fn is_accessed(&self, offset: u64) -> bool {
        usize::try_from(offset).is_ok_and(|offset| self.accessed.contains(offset))
    }

    /// Returns the number of touched bytes.
    #[must_use]
    pub fn accessed_bytes(&self) -> usize {
        self.accessed.count()
    }

    /// Returns the untouched byte ranges as `(offset, length)` pairs.
    #[must_use]
    pub fn unaccessed_ranges(&self) -> Vec<(u64, u64)> {
        self.accessed
            .clear_runs()
            .into_iter()
            .map(|(start, len)| (start as u64, len as u64))
            .collect()
    }

    /// Returns the member covering `offset`.
    #[must_use]
    pub fn member_at(&self, offset: u64) -> Option<&Member> {
        self.members.iter().find(|member| member.contains(offset))
    }

    /// Returns the structs directly pointed to by members, in offset order.
    pub fn children(&self) -> impl Iterator<Item = &StructLayout> {
        self.members.iter().filter_map(Member::pointee)
    }

    /// Iterates over this struct and every nested struct in pre-order, children in member
    /// offset order.
    #[must_use]
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// Returns the nested struct with the given name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&StructLayout> {
        self.walk().find(|layout| layout.name == name)
    }

    fn render_one(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "struct {} {{ /* size 0x{:x} */", self.name, self.size)?;

        let mut cursor = 0;
        for member in &self.members {
            if member.offset > cursor {
                render_padding(f, cursor, member.offset - cursor)?;
            }
            let ty = member.type_name();
            let gap = if ty.ends_with('*') { "" } else { " " };
            match member.kind {
                MemberKind::Array { stride, .. } => writeln!(
                    f,
                    "    {ty}{gap}field_{:x}[]; /* 0x{:x}, stride 0x{stride:x} */",
                    member.offset, member.offset
                )?,
                MemberKind::Primitive if !matches!(member.size, 1 | 2 | 4 | 8 | 16) => writeln!(
                    f,
                    "    {ty}{gap}field_{:x}[{}]; /* 0x{:x} */",
                    member.offset, member.size, member.offset
                )?,
                _ => writeln!(
                    f,
                    "    {ty}{gap}field_{:x}; /* 0x{:x} */",
                    member.offset, member.offset
                )?,
            }
            cursor = cursor.max(member.end());
        }
        if self.size > cursor {
            render_padding(f, cursor, self.size - cursor)?;
        }

        write!(f, "}};")
    }
}

fn render_padding(f: &mut fmt::Formatter<'_>, offset: u64, len: u64) -> fmt::Result {
    writeln!(f, "    uint8_t pad_{offset:x}[{len}]; /* 0x{offset:x} */")
}

impl fmt::Display for StructLayout {
    /// Renders the struct and all nested structs as C-like declarations, outermost first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, layout) in self.walk().enumerate() {
            if i > 0 {
                writeln!(f)?;
                writeln!(f)?;
            }
            layout.render_one(f)?;
        }
        Ok(())
    }
}

/// Pre-order iterator over a struct tree.
pub struct Walk<'a> {
    stack: Vec<&'a StructLayout>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a StructLayout;

    fn next(&mut self) -> Option<Self::Item> {
        let layout = self.stack.pop()?;
        let children: Vec<&StructLayout> = layout.children().collect();
        self.stack.extend(children.into_iter().rev());
        Some(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn primitive(offset: u64, size: u64) -> Member {
        Member {
            offset,
            size,
            kind: MemberKind::Primitive,
            access: MemberAccess::LOAD,
        }
    }

    fn tree() -> StructLayout {
        let mut leaf = StructLayout::new("struct_2", 4);
        leaf.members.push(primitive(0, 4));
        leaf.mark(0, 4);

        let mut inner = StructLayout::new("struct_1", 8);
        inner.members.push(Member {
            offset: 0,
            size: 8,
            kind: MemberKind::Pointer(Box::new(leaf)),
            access: MemberAccess::LOAD,
        });
        inner.mark(0, 8);

        let mut root = StructLayout::new("struct_0", 24);
        root.members.push(Member {
            offset: 0,
            size: 8,
            kind: MemberKind::Pointer(Box::new(inner)),
            access: MemberAccess::LOAD,
        });
        root.members.push(Member {
            offset: 16,
            size: 4,
            kind: MemberKind::Array {
                element_size: 4,
                stride: 4,
            },
            access: MemberAccess::STORE,
        });
        root.mark(0, 8);
        root.mark(16, 4);
        root
    }

    #[test]
    fn test_access_flags() {
        let mut flags = MemberAccess::from(AccessKind::Load);
        assert!(!flags.contains(MemberAccess::STORE));
        flags |= AccessKind::Store.into();
        assert_eq!(flags, MemberAccess::LOAD | MemberAccess::STORE);
    }

    #[test]
    fn test_byte_map() {
        let root = tree();
        assert!(root.is_accessed(7));
        assert!(!root.is_accessed(8));
        assert!(!root.is_accessed(1000));
        assert_eq!(root.accessed_bytes(), 12);
        assert_eq!(root.unaccessed_ranges(), vec![(8, 8), (20, 4)]);
    }

    #[test]
    fn test_member_lookup() {
        let root = tree();
        assert_eq!(root.member_at(3).map(|m| m.offset), Some(0));
        assert_eq!(root.member_at(17).map(|m| m.offset), Some(16));
        assert!(root.member_at(10).is_none());
        assert!(root.members[1].pointee().is_none());
    }

    #[test]
    fn test_walk_preorder() {
        let root = tree();
        let names: Vec<&str> = root.walk().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["struct_0", "struct_1", "struct_2"]);
        assert_eq!(root.find("struct_2").map(|s| s.size), Some(4));
        assert!(root.find("struct_9").is_none());
    }

    #[test]
    fn test_render() {
        let root = tree();
        let text = root.to_string();
        assert!(text.starts_with("struct struct_0 { /* size 0x18 */\n"));
        assert!(text.contains("    struct struct_1 *field_0; /* 0x0 */\n"));
        assert!(text.contains("    uint8_t pad_8[8]; /* 0x8 */\n"));
        assert!(text.contains("    uint32_t field_10[]; /* 0x10, stride 0x4 */\n"));
        assert!(text.contains("    uint8_t pad_14[4]; /* 0x14 */\n"));
        assert!(text.contains("struct struct_2 { /* size 0x4 */\n    uint32_t field_0; /* 0x0 */\n};"));
    }

    #[test]
    fn test_empty_struct() {
        let empty = StructLayout::new("struct_0", 0);
        assert_eq!(empty.to_string(), "struct struct_0 { /* size 0x0 */\n};");
        assert!(empty.unaccessed_ranges().is_empty());
    }
}
