//! Error kinds surfaced by every pipeline stage.
//!
//! Each stage fails fast: the first problem aborts the whole compilation and
//! is returned as a single [`Error`].  Errors that point into a template carry
//! a [`Diagnostic`] with the file, 1-based line and column, and (when source
//! text is available) a rendered excerpt of the offending region.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::plugin::Hook;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

// ── Diagnostic ────────────────────────────────────────────────────────────────

/// A located error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Stable machine-readable code, e.g. `"PUG:UNEXPECTED_TEXT"`.
    pub code: &'static str,
    pub message: String,
    pub file: Option<PathBuf>,
    /// 1-based; 0 when unknown.
    pub line: usize,
    /// 1-based; 0 when unknown.
    pub column: usize,
    /// Rendered source excerpt (see [`render_snippet`]).
    pub snippet: Option<String>,
}

impl Diagnostic {
    pub fn new(code: &'static str, message: impl Into<String>, line: usize, column: usize) -> Self {
        Diagnostic {
            code,
            message: message.into(),
            file: None,
            line,
            column,
            snippet: None,
        }
    }

    pub fn with_file(mut self, file: Option<&Path>) -> Self {
        if self.file.is_none() {
            self.file = file.map(Path::to_path_buf);
        }
        self
    }

    /// Attach an excerpt of `src` around this diagnostic's line.
    pub fn with_source(mut self, src: &str) -> Self {
        if self.snippet.is_none() && self.line > 0 {
            let snippet = render_snippet(src, self.line, self.column);
            if !snippet.is_empty() {
                self.snippet = Some(snippet);
            }
        }
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(p) => write!(f, "{}", p.display())?,
            None => f.write_str("Pug")?,
        }
        if self.line > 0 {
            write!(f, ":{}", self.line)?;
            if self.column > 0 {
                write!(f, ":{}", self.column)?;
            }
        }
        f.write_str("\n")?;
        if let Some(snippet) = &self.snippet {
            f.write_str(snippet)?;
        }
        write!(f, "\n\n{}", self.message)
    }
}

/// Render up to two lines of context either side of `line`, marking the
/// offending line with `>` and its column with a caret row.
///
/// Returns an empty string when `line` is outside `src`.
pub fn render_snippet(src: &str, line: usize, column: usize) -> String {
    let lines: Vec<&str> = src.split('\n').collect();
    if line == 0 || line > lines.len() {
        return String::new();
    }
    let start = line.saturating_sub(2).max(1);
    let end = (line + 2).min(lines.len());
    let width = end.to_string().len();

    let mut out = Vec::new();
    for n in start..=end {
        let text = lines[n - 1].trim_end_matches('\r');
        let marker = if n == line { "  > " } else { "    " };
        out.push(format!("{marker}{n:>width$}| {text}"));
        if n == line && column > 0 {
            let pad = marker.len() + width + 2 + column - 1;
            out.push(format!("{}^", "-".repeat(pad)));
        }
    }
    out.join("\n")
}

// ── LoadError ─────────────────────────────────────────────────────────────────

/// Failure reported by a [`Loader`](crate::load::Loader) collaborator.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no file matches {name:?}")]
    NotFound { name: String },
    #[error("the \"basedir\" option is required to use includes and extends with \"absolute\" paths ({name:?})")]
    NoBasedir { name: String },
    #[error("the \"filename\" option is required to use includes and extends with \"relative\" paths ({name:?})")]
    NoFilename { name: String },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Other(String),
}

// ── Error ─────────────────────────────────────────────────────────────────────

/// Every way a compilation or render can fail.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed indentation, unterminated construct, unexpected token.
    #[error("{0}")]
    Syntax(Diagnostic),
    /// Unresolved or circular `extends`/`include`, misplaced blocks.
    #[error("{0}")]
    Link(Diagnostic),
    /// Two or more plugins claim a single-owner hook.
    #[error("two or more plugins all implement the `{hook}` hook")]
    PluginConfig { hook: Hook },
    /// The code generator met an unsupported or malformed node.
    #[error("{0}")]
    Compile(Diagnostic),
    /// The generated routine failed while rendering.
    #[error("{0}")]
    Runtime(Diagnostic),
    /// Collaborator failure with no referencing template (e.g. the root file).
    #[error(transparent)]
    Load(#[from] LoadError),
    /// Inconsistent options (e.g. caching without a filename).
    #[error("{message}")]
    Options { code: &'static str, message: String },
}

impl Error {
    /// The located diagnostic, when this error carries one.
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Error::Syntax(d) | Error::Link(d) | Error::Compile(d) | Error::Runtime(d) => Some(d),
            _ => None,
        }
    }

    /// Stable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Syntax(d) | Error::Link(d) | Error::Compile(d) | Error::Runtime(d) => d.code,
            Error::PluginConfig { .. } => "PUG:PLUGIN_CONFLICT",
            Error::Load(_) => "PUG:LOAD_FAILED",
            Error::Options { code, .. } => code,
        }
    }

    /// Fill in the file and snippet of a located error that lacks them.
    pub(crate) fn located_in(self, file: Option<&Path>, src: &str) -> Self {
        let fix = |d: Diagnostic| d.with_file(file).with_source(src);
        match self {
            Error::Syntax(d) => Error::Syntax(fix(d)),
            Error::Link(d) => Error::Link(fix(d)),
            Error::Compile(d) => Error::Compile(fix(d)),
            other => other,
        }
    }
}

pub(crate) fn syntax(code: &'static str, message: impl Into<String>, line: usize, column: usize) -> Error {
    Error::Syntax(Diagnostic::new(code, message, line, column))
}

pub(crate) fn link(code: &'static str, message: impl Into<String>, line: usize, column: usize) -> Error {
    Error::Link(Diagnostic::new(code, message, line, column))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_marks_line_and_column() {
        let src = "html\n  body\n    p(\n  footer\n";
        let s = render_snippet(src, 3, 6);
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines[0], "    1| html");
        assert_eq!(lines[2], "  > 3|     p(");
        assert_eq!(lines[3], "------------^");
        assert_eq!(lines.last(), Some(&"    5| "));
    }

    #[test]
    fn snippet_out_of_range_is_empty() {
        assert_eq!(render_snippet("p", 4, 1), "");
        assert_eq!(render_snippet("p", 0, 1), "");
    }

    #[test]
    fn diagnostic_display_includes_location() {
        let d = Diagnostic::new("PUG:TEST", "boom", 2, 3)
            .with_file(Some(Path::new("views/a.pug")))
            .with_source("a\nbcd\n");
        let text = d.to_string();
        assert!(text.starts_with("views/a.pug:2:3\n"));
        assert!(text.ends_with("\n\nboom"));
        assert!(text.contains("> 2| bcd"));
    }

    #[test]
    fn located_in_keeps_existing_file() {
        let err = syntax("PUG:X", "bad", 1, 1).located_in(Some(Path::new("first.pug")), "p");
        let err = err.located_in(Some(Path::new("second.pug")), "p");
        assert_eq!(err.diagnostic().unwrap().file.as_deref(), Some(Path::new("first.pug")));
        assert_eq!(err.code(), "PUG:X");
    }
}
