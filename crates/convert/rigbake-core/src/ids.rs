//! Identifiers for scene nodes and skeleton bones.

use serde::{Deserialize, Serialize};

/// Index of a node in the scene arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a bone in a skeleton; also the value stored in vertex bone indices.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoneId(pub u32);

impl BoneId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Monotonic bone index allocator. One per skeleton build, never shared,
/// so independent conversions never see each other's numbering.
#[derive(Default, Debug)]
pub struct BoneIdAllocator {
    next: u32,
}

impl BoneIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn alloc(&mut self) -> BoneId {
        let id = BoneId(self.next);
        self.next += 1;
        id
    }

    /// Number of ids handed out so far.
    #[inline]
    pub fn count(&self) -> usize {
        self.next as usize
    }
}
