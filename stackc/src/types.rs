use std::{collections::HashMap, fmt};

use crate::{ProcId, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructId(pub u32);

/// A type descriptor as it appears in stack signatures and struct fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int,
    Bool,
    Ptr,
    Any,
    Struct(StructId),
    StructPtr(StructId),
}

impl DataType {
    #[must_use]
    pub fn as_struct(self) -> Option<StructId> {
        match self {
            DataType::Struct(id) | DataType::StructPtr(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int => f.write_str("int"),
            DataType::Bool => f.write_str("bool"),
            DataType::Ptr => f.write_str("ptr"),
            DataType::Any => f.write_str("any"),
            DataType::Struct(id) => write!(f, "struct#{}", id.0),
            DataType::StructPtr(id) => write!(f, "*struct#{}", id.0),
        }
    }
}

/// Operator tokens that dispatch to a method on a struct operand, and the
/// method name they dispatch to.
pub const OPERATOR_METHODS: [(&str, &str); 9] = [
    ("+", "__add__"),
    ("-", "__sub__"),
    ("*", "__mul__"),
    (">", "__gt__"),
    ("<", "__lt__"),
    (">=", "__ge__"),
    ("<=", "__le__"),
    ("==", "__eq__"),
    ("!=", "__ne__"),
];

/// Overloadable methods whose argument need not share the receiver's type.
pub const NOT_SAME_TYPE_METHODS: [&str; 2] = ["__index__", "__index_ptr__"];

#[must_use]
pub fn operator_method_name(op: &str) -> Option<&'static str> {
    OPERATOR_METHODS
        .iter()
        .find(|(token, _)| *token == op)
        .map(|(_, method)| *method)
}

/// Whether an operator method requires both operands to be of the
/// receiver's type.
#[must_use]
pub fn requires_same_type(method: &str) -> bool {
    OPERATOR_METHODS.iter().any(|(_, m)| *m == method)
}

#[must_use]
pub fn is_overloadable_method(method: &str) -> bool {
    requires_same_type(method) || NOT_SAME_TYPE_METHODS.contains(&method)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: DataType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Struct {
    pub id: StructId,
    pub name: String,
    /// Own fields first, then every inherited field in the parent's order.
    pub fields: Vec<Field>,
    pub parent: Option<StructId>,
    pub children: Vec<StructId>,
    pub methods: HashMap<String, ProcId>,
    pub static_methods: HashMap<String, ProcId>,
    pub is_unpackable: bool,
    pub defaults: HashMap<usize, Token>,
}

impl Struct {
    /// Index of the field called `name`. Own fields shadow inherited ones.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    #[must_use]
    pub fn field_type(&self, name: &str) -> Option<DataType> {
        self.field_index(name).map(|i| self.fields[i].ty)
    }

    pub fn field_types(&self) -> impl Iterator<Item = DataType> + '_ {
        self.fields.iter().map(|f| f.ty)
    }

    #[must_use]
    pub fn default_for(&self, index: usize) -> Option<&Token> {
        self.defaults.get(&index)
    }

    #[must_use]
    pub fn method(&self, name: &str) -> Option<ProcId> {
        self.methods.get(name).copied()
    }

    #[must_use]
    pub fn static_method(&self, name: &str) -> Option<ProcId> {
        self.static_methods.get(name).copied()
    }
}

/// Input to [`TypeHierarchy::define_struct`].
#[derive(Debug, Clone, Default)]
pub struct StructInfo {
    pub name: String,
    pub fields: Vec<Field>,
    pub parent: Option<StructId>,
    pub defaults: HashMap<usize, Token>,
    pub is_unpackable: bool,
}

/// Owns every struct of a compilation.
///
/// Parent and child links are [`StructId`]s into this table. A parent must
/// exist before its children are defined, so ancestor chains are finite.
#[derive(Debug, Clone, Default)]
pub struct TypeHierarchy {
    structs: Vec<Struct>,
}

impl TypeHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_struct(&mut self, info: StructInfo) -> StructId {
        let id = StructId(self.structs.len() as u32);
        let mut fields = info.fields;
        let mut methods = HashMap::new();

        if let Some(parent_id) = info.parent {
            let parent = self.get(parent_id);
            fields.extend(parent.fields.iter().cloned());
            methods = parent.methods.clone();
        }

        log::debug!(
            "struct {} ({} fields, parent {:?})",
            info.name,
            fields.len(),
            info.parent
        );

        self.structs.push(Struct {
            id,
            name: info.name,
            fields,
            parent: info.parent,
            children: Vec::new(),
            methods,
            static_methods: HashMap::new(),
            is_unpackable: info.is_unpackable,
            defaults: info.defaults,
        });

        if let Some(parent_id) = info.parent {
            self.get_mut(parent_id).children.push(id);
        }

        id
    }

    /// # Panics
    /// if `id` was not minted by this hierarchy.
    #[must_use]
    pub fn get(&self, id: StructId) -> &Struct {
        &self.structs[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: StructId) -> &mut Struct {
        &mut self.structs[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Struct> {
        self.structs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.structs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.structs.is_empty()
    }

    /// Ancestors of `id`, nearest first, excluding `id` itself.
    pub fn ancestors(&self, id: StructId) -> Ancestors<'_> {
        Ancestors {
            types: self,
            current: self.get(id).parent,
        }
    }

    /// `a` is `b`, or `b` is one of `a`'s ancestors.
    #[must_use]
    pub fn is_subtype(&self, a: StructId, b: StructId) -> bool {
        a == b || self.ancestors(a).any(|ancestor| ancestor == b)
    }

    /// Registers `proc` as method `name` on `owner` and every descendant
    /// of it, replacing whatever entry each of them held for `name`.
    pub fn add_method(&mut self, owner: StructId, name: &str, proc: ProcId) {
        let mut work = vec![owner];

        while let Some(id) = work.pop() {
            let target = self.get_mut(id);
            target.methods.insert(name.to_owned(), proc);
            work.extend(target.children.iter().copied());
        }

        log::debug!("method {name} on {} ({proc:?})", self.get(owner).name);
    }

    pub fn add_static_method(&mut self, owner: StructId, name: &str, proc: ProcId) {
        log::debug!("static method {name} on {} ({proc:?})", self.get(owner).name);
        self.get_mut(owner).static_methods.insert(name.to_owned(), proc);
    }

    /// The method an operator token dispatches to on a value of type `id`.
    #[must_use]
    pub fn find_operator_method(&self, id: StructId, op: &str) -> Option<ProcId> {
        let method = operator_method_name(op)?;
        self.get(id).method(method)
    }
}

pub struct Ancestors<'a> {
    types: &'a TypeHierarchy,
    current: Option<StructId>,
}

impl Iterator for Ancestors<'_> {
    type Item = StructId;

    fn next(&mut self) -> Option<StructId> {
        let id = self.current?;
        self.current = self.types.get(id).parent;
        Some(id)
    }
}
