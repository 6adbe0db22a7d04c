mod blocks;
mod config;
mod context;
mod diagnostics;
mod error;
mod location;
mod memory;
mod namespace;
mod procedure;
pub mod reachability;
mod tokens;
mod types;

pub use blocks::*;
pub use config::ContextCreateInfo;
pub use context::*;
pub use diagnostics::{DiagnosticMode, DiagnosticReporter};
pub use error::*;
pub use location::Location;
pub use memory::*;
pub use namespace::*;
pub use procedure::*;
pub use reachability::{compute_used, reachable_from};
pub use tokens::*;
pub use types::*;
