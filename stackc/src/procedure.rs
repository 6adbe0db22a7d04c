use std::collections::{HashMap, HashSet};

use crate::{Block, DataType, MemoryOwner, MemoryScope, StructId, TypeHierarchy};

/// Identity of a procedure. Two procedures with identical signatures are
/// still distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcId(pub u32);

/// A named value bound by `bind` or declared as a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub ty: DataType,
}

impl Binding {
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Procedure {
    pub id: ProcId,
    pub name: String,
    /// Instruction pointer of the defining operation.
    pub ip: usize,
    pub in_stack: Vec<DataType>,
    pub out_stack: Vec<DataType>,
    pub block: Block,
    pub is_named: bool,
    pub owner: Option<StructId>,
    pub memories: MemoryScope,
    pub variables: HashMap<String, Binding>,
    /// Procedures called directly from this one's body.
    pub calls: HashSet<ProcId>,
}

impl Procedure {
    /// The implicit receiver of a method, if this is one.
    #[must_use]
    pub fn receiver(&self) -> Option<DataType> {
        self.owner.and_then(|_| self.in_stack.last().copied())
    }
}

/// Input to [`ProcedureRegistry::define_procedure`].
#[derive(Debug, Clone)]
pub struct ProcedureInfo {
    pub name: String,
    pub ip: usize,
    pub in_stack: Vec<DataType>,
    pub out_stack: Vec<DataType>,
    pub block: Block,
    pub is_named: bool,
    /// Struct this procedure is a method of.
    pub owner: Option<StructId>,
}

#[derive(Debug, Clone)]
pub struct ProcedureRegistry {
    procs: Vec<Procedure>,
    top_level_uses: HashSet<ProcId>,
    memory_alignment: usize,
}

impl Default for ProcedureRegistry {
    fn default() -> Self {
        Self::new(crate::MEMORY_ALIGNMENT)
    }
}

impl ProcedureRegistry {
    pub fn new(memory_alignment: usize) -> Self {
        Self {
            procs: Vec::new(),
            top_level_uses: HashSet::new(),
            memory_alignment,
        }
    }

    /// Registers a procedure. Methods get their owner appended to the input
    /// stack and are added to the owner's method table.
    pub fn define_procedure(&mut self, info: ProcedureInfo, types: &mut TypeHierarchy) -> ProcId {
        let id = ProcId(self.procs.len() as u32);
        let mut in_stack = info.in_stack;

        if let Some(owner) = info.owner {
            in_stack.push(DataType::Struct(owner));
            types.add_method(owner, &info.name, id);
        }

        log::debug!(
            "procedure {} ({id:?}) at {} [{} -> {}]",
            info.name,
            info.ip,
            in_stack.len(),
            info.out_stack.len()
        );

        self.procs.push(Procedure {
            id,
            name: info.name,
            ip: info.ip,
            in_stack,
            out_stack: info.out_stack,
            block: info.block,
            is_named: info.is_named,
            owner: info.owner,
            memories: MemoryScope::with_alignment(
                MemoryOwner::Procedure(id),
                self.memory_alignment,
            ),
            variables: HashMap::new(),
            calls: HashSet::new(),
        });

        id
    }

    /// Registers a static method: no receiver, no propagation to subtypes.
    pub fn define_static_method(
        &mut self,
        owner: StructId,
        info: ProcedureInfo,
        types: &mut TypeHierarchy,
    ) -> ProcId {
        let name = info.name.clone();
        let id = self.define_procedure(
            ProcedureInfo {
                owner: None,
                ..info
            },
            types,
        );
        types.add_static_method(owner, &name, id);
        id
    }

    /// Adds a call edge from `caller` to `callee`, or marks `callee` as used
    /// from top-level code when there is no caller.
    pub fn record_call(&mut self, caller: Option<ProcId>, callee: ProcId) {
        log::trace!("call {caller:?} -> {callee:?}");
        match caller {
            Some(caller) => {
                self.get_mut(caller).calls.insert(callee);
            }
            None => {
                self.top_level_uses.insert(callee);
            }
        }
    }

    /// # Panics
    /// if `id` was not minted by this registry.
    #[must_use]
    pub fn get(&self, id: ProcId) -> &Procedure {
        &self.procs[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: ProcId) -> &mut Procedure {
        &mut self.procs[id.0 as usize]
    }

    #[must_use]
    pub fn top_level_uses(&self) -> &HashSet<ProcId> {
        &self.top_level_uses
    }

    pub fn iter(&self) -> impl Iterator<Item = &Procedure> {
        self.procs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.procs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }
}
