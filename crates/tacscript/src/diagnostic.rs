//! Diagnostic records attached to instructions and runtime messages.
//!
//! Every instruction remembers where it came from so that any message the
//! runtime emits while executing it can point back at the source. Messages
//! are keyed with a stable `area::code` string for machine consumption and
//! rendered with the offending source line for humans.

use std::fmt;
use std::rc::Rc;

/// Source position of an emitted instruction.
///
/// `line` and `column` are 1-based; `column` counts Unicode code points, not
/// bytes. `offset` is the byte offset into the source text. `snippet` is the
/// full source line the instruction was emitted from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagInfo {
    pub path: Rc<str>,
    pub line: u32,
    pub column: u32,
    pub offset: usize,
    pub snippet: Rc<str>,
}

impl DiagInfo {
    pub fn new(path: Rc<str>, line: u32, column: u32, offset: usize, snippet: Rc<str>) -> Self {
        Self {
            path,
            line,
            column,
            offset,
            snippet,
        }
    }
}

impl fmt::Display for DiagInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path, self.line, self.column)
    }
}

/// How serious a runtime message is.
///
/// Nothing here aborts execution by itself; fatal conditions are
/// [`crate::Error`] values instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Stable message keys, grouped by area.
///
/// The key is what embedders match on; the human-readable text may change
/// freely between releases, the key must not.
pub mod msg {
    pub const UNKNOWN_INPUT_TYPE_COMBINATION: &str = "runtime::unknown_input_type_combination";
    pub const UNDEFINED_VARIABLE: &str = "runtime::undefined_variable";
    pub const UNDECLARED_LOCAL: &str = "runtime::undeclared_local";
    pub const INDEX_OUT_OF_RANGE: &str = "runtime::index_out_of_range";
    pub const WRONG_TYPE: &str = "runtime::wrong_type";
    pub const DIVISION_BY_ZERO: &str = "runtime::division_by_zero";
    pub const MAX_INSTRUCTIONS: &str = "runtime::max_instructions";
    pub const SCRIPT_TIMED_OUT: &str = "runtime::script_timed_out";
    pub const UNCAUGHT_EXCEPTION: &str = "runtime::uncaught_exception";
    pub const SCOPE_NOT_FOUND: &str = "runtime::scope_not_found";
    pub const CANCELLED: &str = "runtime::cancelled";
    pub const INTERNAL: &str = "runtime::internal";

    pub const NUMBER_OUT_OF_RANGE: &str = "assembly::number_out_of_range";
    pub const UNKNOWN_OPERATOR: &str = "assembly::unknown_operator";
    pub const PARSE_ERROR: &str = "parse::error";
}

/// A single entry in the runtime's message log.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeMessage {
    /// Stable `area::code` key (see [`msg`]).
    pub key: &'static str,
    pub severity: Severity,
    /// Human-readable description.
    pub text: String,
    /// Where the offending instruction came from, when known.
    pub diag: Option<DiagInfo>,
}

impl RuntimeMessage {
    pub fn new(key: &'static str, severity: Severity, text: impl Into<String>) -> Self {
        Self {
            key,
            severity,
            text: text.into(),
            diag: None,
        }
    }

    pub fn with_diag(mut self, diag: DiagInfo) -> Self {
        self.diag = Some(diag);
        self
    }
}

impl fmt::Display for RuntimeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.key, self.text)?;
        if let Some(diag) = &self.diag {
            writeln!(f)?;
            writeln!(f, "  --> {}", diag)?;
            if !diag.snippet.is_empty() {
                writeln!(f, "   | {}", diag.snippet)?;
                let pad = diag.column.saturating_sub(1) as usize;
                write!(f, "   | {:pad$}^", "")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_rendering_includes_key_and_snippet() {
        let diag = DiagInfo::new("script.tac".into(), 3, 5, 42, "x = y + 1;".into());
        let message = RuntimeMessage::new(
            msg::UNDEFINED_VARIABLE,
            Severity::Warning,
            "variable `y` is not defined",
        )
        .with_diag(diag);

        let rendered = message.to_string();
        assert!(rendered.contains("runtime::undefined_variable"));
        assert!(rendered.contains("script.tac:3:5"));
        assert!(rendered.contains("x = y + 1;"));
    }

    #[test]
    fn caret_lines_up_with_column() {
        let diag = DiagInfo::new("s.tac".into(), 1, 3, 2, "1 + 2".into());
        let message =
            RuntimeMessage::new(msg::WRONG_TYPE, Severity::Error, "boom").with_diag(diag);
        let rendered = message.to_string();
        let caret_line = rendered.lines().last().unwrap();
        assert_eq!(caret_line.find('^'), Some(5 + 2));
    }
}
