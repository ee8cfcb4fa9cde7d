// id.rs — Stable identifiers for IR entities
//
// Statement ids are arena indices inside one kernel and double as the
// emitted local variable names (`tmp{N}`). Side tables built during
// emission (pointer provenance, root pointers) key on these ids rather
// than on the emitted strings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Arena index of a statement within its kernel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StmtId(pub u32);

impl StmtId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Local variable name of this statement in generated programs.
    pub fn raw_name(self) -> String {
        format!("tmp{}", self.0)
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp{}", self.0)
    }
}

/// Identifier of a node in a compiled memory tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SNodeId(pub i32);

/// Identifier of a texture known to the module.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TextureId(pub i32);

/// Allocator for statement ids. Produces monotonically increasing ids in
/// allocation order.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_stmt: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_stmt(&mut self) -> StmtId {
        let id = StmtId(self.next_stmt);
        self.next_stmt += 1;
        id
    }

    pub fn allocated(&self) -> usize {
        self.next_stmt as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stmt_ids_are_sequential() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.alloc_stmt(), StmtId(0));
        assert_eq!(alloc.alloc_stmt(), StmtId(1));
        assert_eq!(alloc.allocated(), 2);
    }

    #[test]
    fn raw_name_matches_display() {
        assert_eq!(StmtId(17).raw_name(), "tmp17");
        assert_eq!(format!("{}", StmtId(17)), "tmp17");
    }
}
