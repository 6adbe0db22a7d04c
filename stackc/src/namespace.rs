use std::collections::HashMap;

use crate::{
    EntityKind, ErrorKind, MEMORY_ALIGNMENT, Memory, MemoryOwner, MemoryScope, ProcId, StructId,
};

/// Keywords and built-in words that can never name an entity. The
/// `syscallN` words are added separately, see
/// [`GlobalNamespace::is_reserved`].
pub const RESERVED_WORDS: &[&str] = &[
    "if", "else", "end", "while", "proc", "bind", "+", "-", "*", "div", "dup",
    "drop", "swap", "rot", "<", ">", "<=", ">=", "==", "!=", "!", "!8", "@",
    "@8",
];

pub const DEFAULT_SYSCALL_COUNT: usize = 7;

/// The single flat namespace shared by procedures, memories, constants,
/// structs, and enums. A name taken by one kind is taken for all of them.
#[derive(Debug, Clone)]
pub struct GlobalNamespace {
    pub procedures: HashMap<String, ProcId>,
    pub memory: MemoryScope,
    pub constants: HashMap<String, i64>,
    pub structs: HashMap<String, StructId>,
    pub enums: HashMap<String, Vec<String>>,
    syscall_count: usize,
}

impl Default for GlobalNamespace {
    fn default() -> Self {
        Self::new(DEFAULT_SYSCALL_COUNT, MEMORY_ALIGNMENT)
    }
}

impl GlobalNamespace {
    pub fn new(syscall_count: usize, memory_alignment: usize) -> Self {
        Self {
            procedures: HashMap::new(),
            memory: MemoryScope::with_alignment(MemoryOwner::Global, memory_alignment),
            constants: HashMap::new(),
            structs: HashMap::new(),
            enums: HashMap::new(),
            syscall_count,
        }
    }

    #[must_use]
    pub fn is_reserved(&self, name: &str) -> bool {
        if RESERVED_WORDS.contains(&name) {
            return true;
        }
        name.strip_prefix("syscall")
            .and_then(|n| n.parse::<usize>().ok())
            .is_some_and(|n| n < self.syscall_count && name == format!("syscall{n}"))
    }

    /// Whether any of the five namespaces already holds `name`.
    #[must_use]
    pub fn is_taken(&self, name: &str) -> bool {
        self.procedures.contains_key(name)
            || self.memory.contains(name)
            || self.constants.contains_key(name)
            || self.structs.contains_key(name)
            || self.enums.contains_key(name)
    }

    /// Fails if `name` cannot be given to a new entity of `kind`.
    pub fn check_name(&self, name: &str, kind: EntityKind) -> Result<(), ErrorKind> {
        if self.is_taken(name) {
            return Err(ErrorKind::NameCollision {
                kind,
                name: name.to_owned(),
            });
        }
        if self.is_reserved(name) {
            return Err(ErrorKind::ReservedName {
                kind,
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    pub fn insert_procedure(&mut self, name: &str, id: ProcId) {
        self.procedures.insert(name.to_owned(), id);
    }

    pub fn insert_struct(&mut self, name: &str, id: StructId) {
        self.structs.insert(name.to_owned(), id);
    }

    pub fn define_constant(&mut self, name: &str, value: i64) -> Result<(), ErrorKind> {
        self.check_name(name, EntityKind::Constant)?;
        log::debug!("constant {name} = {value}");
        self.constants.insert(name.to_owned(), value);
        Ok(())
    }

    pub fn define_enum(&mut self, name: &str, variants: Vec<String>) -> Result<(), ErrorKind> {
        self.check_name(name, EntityKind::Enum)?;
        log::debug!("enum {name} ({} variants)", variants.len());
        self.enums.insert(name.to_owned(), variants);
        Ok(())
    }

    pub fn allocate_memory(&mut self, name: &str, size: usize) -> Result<Memory, ErrorKind> {
        self.check_name(name, EntityKind::Memory)?;
        Ok(self.memory.allocate(name, size))
    }

    #[must_use]
    pub fn procedure(&self, name: &str) -> Option<ProcId> {
        self.procedures.get(name).copied()
    }

    #[must_use]
    pub fn structure(&self, name: &str) -> Option<StructId> {
        self.structs.get(name).copied()
    }

    #[must_use]
    pub fn constant(&self, name: &str) -> Option<i64> {
        self.constants.get(name).copied()
    }

    #[must_use]
    pub fn enumeration(&self, name: &str) -> Option<&[String]> {
        self.enums.get(name).map(Vec::as_slice)
    }

    #[must_use]
    pub fn memory(&self, name: &str) -> Option<&Memory> {
        self.memory.get(name)
    }
}
