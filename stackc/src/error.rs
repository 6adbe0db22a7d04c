use std::fmt;

use thiserror::Error;

use crate::{BlockKind, Location};

/// The category of entity a name is being registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Procedure,
    Memory,
    Constant,
    Struct,
    Enum,
    Method,
    Variable,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Procedure => "procedure",
            EntityKind::Memory => "memory",
            EntityKind::Constant => "constant",
            EntityKind::Struct => "structure",
            EntityKind::Enum => "enum",
            EntityKind::Method => "method",
            EntityKind::Variable => "variable",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// The name is already used by a procedure, memory, constant, struct,
    /// or enum.
    #[error("name for {kind} \"{name}\" is already taken")]
    NameCollision { kind: EntityKind, name: String },

    /// The name is a keyword or a built-in operator.
    #[error("name for {kind} \"{name}\" is unavailable")]
    ReservedName { kind: EntityKind, name: String },

    #[error("\"{closing}\" without an open block")]
    UnexpectedClose { closing: String },

    #[error("\"{closing}\" cannot close a {found} block")]
    BlockMismatch { closing: String, found: BlockKind },

    #[error("unclosed {kind} block opened at instruction {start}")]
    UnclosedBlock { kind: BlockKind, start: usize },

    #[error("conditional compilation region closed without being opened")]
    UnbalancedCompileIf,

    #[error("{count} conditional compilation region(s) left open")]
    UnclosedCompileIf { count: usize },

    #[error("undefined {kind} \"{name}\"")]
    UndefinedReference { kind: EntityKind, name: String },

    #[error("instruction {ip} does not define a procedure")]
    NotAProcedureBlock { ip: usize },
}

/// An error raised by the compilation context, tagged with the source
/// location that was current when it happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Error {location}: {kind}")]
pub struct CompileError {
    pub location: Location,
    pub kind: ErrorKind,
}

impl CompileError {
    pub fn new(location: Location, kind: ErrorKind) -> Self {
        Self { location, kind }
    }

    /// The message without the location prefix.
    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
