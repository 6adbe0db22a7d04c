use crate::{DEFAULT_SYSCALL_COUNT, DiagnosticMode, MEMORY_ALIGNMENT};

#[derive(Debug, Clone)]
pub struct ContextCreateInfo {
    pub diagnostics: DiagnosticMode,
    /// Color the `Error <location>:` prefix of diagnostics.
    pub color: bool,
    pub instruction_capacity: usize,
    /// Number of reserved `syscallN` words, starting at `syscall0`.
    pub syscall_count: usize,
    /// Must be a power of two.
    pub memory_alignment: usize,
}

impl Default for ContextCreateInfo {
    fn default() -> Self {
        Self {
            diagnostics: DiagnosticMode::Fatal,
            color: true,
            instruction_capacity: 1024,
            syscall_count: DEFAULT_SYSCALL_COUNT,
            memory_alignment: MEMORY_ALIGNMENT,
        }
    }
}
