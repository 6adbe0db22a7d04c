use std::{
    fmt,
    io::{self, Write},
    process,
};

use crate::CompileError;

const ERROR_PREFIX_COLOR: &str = "\x1b[1;31m";
const RESET_COLOR: &str = "\x1b[0m";

/// What happens after a diagnostic has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiagnosticMode {
    /// Exit the process with status 1.
    #[default]
    Fatal,
    /// Record the error and hand control back to the caller.
    Collect,
}

/// The error channel of a compilation.
///
/// Writes `Error <location>: <message>` lines to its sink. In
/// [`DiagnosticMode::Fatal`] the first report terminates the process.
pub struct DiagnosticReporter {
    mode: DiagnosticMode,
    color: bool,
    sink: Box<dyn Write>,
    errors: Vec<CompileError>,
}

impl fmt::Debug for DiagnosticReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticReporter")
            .field("mode", &self.mode)
            .field("color", &self.color)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl DiagnosticReporter {
    pub fn new(mode: DiagnosticMode, color: bool) -> Self {
        Self::with_sink(mode, color, Box::new(io::stderr()))
    }

    pub fn with_sink(mode: DiagnosticMode, color: bool, sink: Box<dyn Write>) -> Self {
        Self {
            mode,
            color,
            sink,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> DiagnosticMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: DiagnosticMode) {
        self.mode = mode;
    }

    /// Reports `error` according to the current mode.
    pub fn report(&mut self, error: &CompileError) {
        let exit = self.mode == DiagnosticMode::Fatal;
        self.emit(error, exit);
    }

    /// Reports `error` without terminating, regardless of mode.
    pub fn report_nonfatal(&mut self, error: &CompileError) {
        self.emit(error, false);
    }

    fn emit(&mut self, error: &CompileError, exit: bool) {
        let line = if self.color {
            format!(
                "{ERROR_PREFIX_COLOR}Error {}:{RESET_COLOR} {}\n",
                error.location, error.kind
            )
        } else {
            format!("{error}\n")
        };

        // sink gone, fall back to the log
        if self.sink.write_all(line.as_bytes()).is_err() {
            log::error!("{error}");
        }
        let _ = self.sink.flush();

        if exit {
            log::error!("{error}");
            process::exit(1);
        }

        log::warn!("{error}");
        self.errors.push(error.clone());
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    #[must_use]
    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<CompileError> {
        std::mem::take(&mut self.errors)
    }
}
