use std::collections::HashMap;

use crate::ProcId;

pub const MEMORY_ALIGNMENT: usize = 8;

/// Which arena a memory region was carved out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOwner {
    Global,
    Procedure(ProcId),
}

/// A named region inside a global or procedure-local arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    pub name: String,
    pub offset: usize,
    pub owner: MemoryOwner,
}

/// Rounds `size` up to the next multiple of `align`.
#[inline]
pub fn align_up(size: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (size + (align - 1)) & !(align - 1)
}

/// A bump-allocated arena of memory regions.
///
/// Offsets are handed out in increasing order and never reclaimed. Name
/// collisions are checked by the namespace before allocation.
#[derive(Debug, Clone)]
pub struct MemoryScope {
    owner: MemoryOwner,
    alignment: usize,
    cursor: usize,
    memories: HashMap<String, Memory>,
}

impl MemoryScope {
    pub fn new(owner: MemoryOwner) -> Self {
        Self::with_alignment(owner, MEMORY_ALIGNMENT)
    }

    pub fn with_alignment(owner: MemoryOwner, alignment: usize) -> Self {
        assert!(
            alignment.is_power_of_two(),
            "memory alignment must be a power of two"
        );
        Self {
            owner,
            alignment,
            cursor: 0,
            memories: HashMap::new(),
        }
    }

    /// Bump allocates `size` bytes under `name` and returns the new region.
    pub fn allocate(&mut self, name: &str, size: usize) -> Memory {
        let memory = Memory {
            name: name.to_owned(),
            offset: self.cursor,
            owner: self.owner,
        };
        self.cursor += align_up(size, self.alignment);

        log::debug!(
            "memory {name} at {} ({size} bytes, {:?})",
            memory.offset,
            self.owner
        );
        self.memories.insert(name.to_owned(), memory.clone());
        memory
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Memory> {
        self.memories.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.memories.contains_key(name)
    }

    /// Total bytes reserved so far. Always a multiple of the alignment.
    #[must_use]
    pub fn size(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn owner(&self) -> MemoryOwner {
        self.owner
    }

    pub fn memories(&self) -> impl Iterator<Item = &Memory> {
        self.memories.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.memories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memories.is_empty()
    }
}
