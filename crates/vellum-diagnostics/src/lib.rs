//! Vellum diagnostics.
//!
//! Two fatal error kinds, one per engine phase: [`CompileError`] from the
//! scanner/resolver and [`RenderError`] from the interpreter and filters.
//! [`LoadError`] covers reading a previously saved token vector.

use std::io;

use thiserror::Error;

/// Peek width shown next to the offending position in compile errors.
pub const PEEK_LEN: usize = 20;

/// Raised by the compiler (scanner or jump resolver). Carries the source
/// position so multi-file templates (`include`/`extends`) stay debuggable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{file}:{line}: {message} near '{peek}'")]
pub struct CompileError {
    /// One-line summary, no trailing period.
    pub message: String,
    /// Up to [`PEEK_LEN`] characters starting at the offending position.
    pub peek: String,
    /// 1-based line in `file`.
    pub line: u32,
    /// Path of the template being compiled (`<string>` for raw sources).
    pub file: String,
}

impl CompileError {
    pub fn new(
        message: impl Into<String>,
        peek: impl Into<String>,
        line: u32,
        file: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            peek: peek.into(),
            line,
            file: file.into(),
        }
    }
}

/// Extract the peek string for an error at byte offset `at`.
///
/// Takes up to [`PEEK_LEN`] characters, stopping at the first line break so
/// the message stays on one line. Reports `<end of template>` when there is
/// nothing left to show.
pub fn peek_at(source: &str, at: usize) -> String {
    let rest = match source.get(at..) {
        Some(r) => r,
        None => "",
    };
    let mut out = String::new();
    for ch in rest.chars() {
        if ch == '\r' || ch == '\n' || out.chars().count() >= PEEK_LEN {
            break;
        }
        out.push(ch);
    }
    if out.is_empty() {
        out.push_str("<end of template>");
    }
    out
}

/// Raised at render time. Message only; the render phase has no source
/// positions to point at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RenderError {
    pub message: String,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// A failure inside a named filter.
    pub fn filter(name: &str, detail: impl Into<String>) -> Self {
        Self {
            message: format!("filter '{}': {}", name, detail.into()),
        }
    }
}

/// Raised when reloading a saved token vector.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("corrupt template file at byte {offset}: {detail}")]
    Corrupt { offset: u64, detail: String },
}
