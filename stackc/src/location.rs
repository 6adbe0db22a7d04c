/// Source location tracking.
///
/// Every token handed to the compilation context carries a [`Location`]
/// naming the file, line, and column it came from. Diagnostics are tagged
/// with the location that was current when they were raised.
use std::{fmt, sync::Arc};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: Arc<str>,
    /// Line number (1-based).
    pub line: usize,
    /// Column number (1-based, in bytes).
    pub column: usize,
}

impl Location {
    pub fn new(file: impl Into<Arc<str>>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// The start of `file`.
    pub fn origin(file: impl Into<Arc<str>>) -> Self {
        Self::new(file, 1, 1)
    }

    /// Location used before any token has been consumed.
    pub fn unknown() -> Self {
        Self::new("<unknown>", 0, 0)
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_file_line_column() {
        let loc = Location::new("main.stk", 12, 4);
        assert_eq!(loc.to_string(), "main.stk:12:4");
    }

    #[test]
    fn origin_starts_at_one() {
        let loc = Location::origin("lib.stk");
        assert_eq!((loc.line, loc.column), (1, 1));
    }
}
