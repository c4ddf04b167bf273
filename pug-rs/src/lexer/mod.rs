//! Indentation-sensitive lexer.
//!
//! The lexer is a cursor over the normalized source.  At each position the
//! rules in [`Lexer::advance`] are tried in a fixed order; the first one that
//! matches consumes input and pushes zero or more tokens.  When no built-in
//! rule matches, plugins with a `lex` hook get a chance before the lexer
//! gives up with `PUG:UNEXPECTED_TEXT`.
//!
//! Columns and lines are tracked by hand (`incr_col` / `incr_line`) rather
//! than derived from the byte cursor, because attribute lists and
//! interpolations are scanned out of band and then accounted for.

mod attrs;
pub mod interpolation;
mod reconstruct;

use std::sync::Arc;

use log::trace;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::ast::BlockMode;
use crate::error::{syntax, Error, Result};
use crate::plugin::Plugin;
use crate::script::is_expression;
use crate::token::{Location, Token, TokenKind};

use interpolation::{find_code_interpolation, find_top_level, matching_bracket, parse_until, ScanError};

pub use reconstruct::reconstruct;

// ── Rules ─────────────────────────────────────────────────────────────────────

static BLANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\n[ \t]*\n").unwrap());
static DOCTYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^doctype *([^\n]*)").unwrap());
static YIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^yield").unwrap());
static CASE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^case +([^\n]+)").unwrap());
static WHEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^when +").unwrap());
static DEFAULT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^default *").unwrap());
static EXTENDS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^extends?").unwrap());
static EXTENDS_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^extends?\b").unwrap());
static PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ ([^\n]+)").unwrap());
static APPEND_PREPEND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:block +)?(append|prepend) +([^\n]+)").unwrap());
static BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^block +(?:(prepend|append) +)?([^\n]+)").unwrap());
static MIXIN_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^block").unwrap());
static INCLUDE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^include").unwrap());
static INCLUDE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^include\b").unwrap());
static NON_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^ \n]+").unwrap());
static MIXIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^mixin +([-\w]+)(?: *\((.*)\))? *").unwrap());
static CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+(\s*)(?:([-\w]+)|(#\{))").unwrap());
static CALL_ARGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ *\(").unwrap());
static ATTRS_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[-\w]+ *=").unwrap());
static CONDITIONAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(if|unless|else if|else)\b([^\n]*)").unwrap());
static EACH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:each|for) +([a-zA-Z_$][\w$]*)(?: *, *([a-zA-Z_$][\w$]*))? * in *([^\n]+)").unwrap()
});
static EACH_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:each|for)\b").unwrap());
static WHILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^while +([^\n]+)").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\w(?:[-:\w]*\w)?)").unwrap());
static FILTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^:([\w\-]+)").unwrap());
static BLOCK_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-").unwrap());
static CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(!?=|-)([ \t]*)([^\n]+)").unwrap());
static ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#([\w-]+)").unwrap());
static DOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\.").unwrap());
static CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\.([_a-z0-9\-]*[_a-z][_a-z0-9\-]*)").unwrap());
static CLASS_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\.[_a-z0-9\-]").unwrap());
static AND_ATTRIBUTES: Lazy<Regex> = Lazy::new(|| Regex::new(r"^&attributes\b").unwrap());
static TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:\| ?| )([^\n]+)").unwrap());
static TEXT_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^( )").unwrap());
static TEXT_PIPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\|( ?)").unwrap());
static TEXT_HTML: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(<[^\n]*)").unwrap());
static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^//(-)?([^\n]*)").unwrap());
static SLASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/").unwrap());
static COLON: Lazy<Regex> = Lazy::new(|| Regex::new(r"^: +").unwrap());

type Captures = Vec<Option<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndentStyle {
    Tabs,
    Spaces,
}

impl IndentStyle {
    fn char(self) -> char {
        match self {
            IndentStyle::Tabs => '\t',
            IndentStyle::Spaces => ' ',
        }
    }

    fn noun(self) -> &'static str {
        match self {
            IndentStyle::Tabs => "tabs",
            IndentStyle::Spaces => "spaces",
        }
    }
}

fn width(s: &str) -> usize {
    s.chars().count()
}

/// Strip a byte-order mark and normalize line endings to `\n`.
pub fn normalize(src: &str) -> String {
    let src = src.strip_prefix('\u{feff}').unwrap_or(src);
    src.replace("\r\n", "\n").replace('\r', "\n")
}

/// Tokenize `src`.  The result always ends with [`TokenKind::Eof`] and has
/// balanced indent/outdent tokens.
pub fn lex(src: &str, plugins: &[Arc<dyn Plugin>]) -> Result<Vec<Token>> {
    let mut lexer = Lexer::new(src, plugins);
    lexer.run()?;
    trace!("lexed {} tokens", lexer.tokens.len());
    Ok(lexer.tokens)
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

pub struct Lexer<'a> {
    src: String,
    pos: usize,
    line: usize,
    col: usize,
    /// Indentation widths of the open levels; always starts with 0.
    indent_stack: Vec<usize>,
    indent_style: Option<IndentStyle>,
    /// Width of the first indentation seen; every level is a multiple of it.
    indent_unit: Option<usize>,
    /// Lexing the inside of `#[ ... ]`; stops at the closing bracket.
    interpolated: bool,
    interpolation_allowed: bool,
    ended: bool,
    tokens: Vec<Token>,
    plugins: &'a [Arc<dyn Plugin>],
}

impl<'a> Lexer<'a> {
    pub fn new(src: &str, plugins: &'a [Arc<dyn Plugin>]) -> Self {
        Lexer {
            src: normalize(src),
            pos: 0,
            line: 1,
            col: 1,
            indent_stack: vec![0],
            indent_style: None,
            indent_unit: None,
            interpolated: false,
            interpolation_allowed: true,
            ended: false,
            tokens: Vec::new(),
            plugins,
        }
    }

    fn interpolated_at(src: &str, line: usize, col: usize, plugins: &'a [Arc<dyn Plugin>]) -> Self {
        let mut lexer = Lexer::new(src, plugins);
        lexer.line = line;
        lexer.col = col;
        lexer.interpolated = true;
        lexer
    }

    fn run(&mut self) -> Result<()> {
        while !self.ended {
            self.advance()?;
        }
        Ok(())
    }

    // ── Public cursor API (for lexer plugins) ─────────────────────────────────

    /// Unconsumed input.
    pub fn rest(&self) -> &str {
        &self.src[self.pos..]
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn column(&self) -> usize {
        self.col
    }

    /// Consume `len` bytes of the current line and push a token covering them.
    pub fn emit(&mut self, len: usize, kind: TokenKind) {
        let start = self.here();
        let consumed = width(&self.rest()[..len]);
        self.consume(len);
        self.incr_col(consumed);
        self.push_from(start, kind);
    }

    /// Tokens produced so far.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    // ── Cursor helpers ────────────────────────────────────────────────────────

    fn here(&self) -> (usize, usize) {
        (self.line, self.col)
    }

    fn consume(&mut self, len: usize) {
        self.pos += len;
    }

    fn incr_col(&mut self, n: usize) {
        self.col += n;
    }

    fn incr_line(&mut self, n: usize) {
        if n > 0 {
            self.line += n;
            self.col = 1;
        }
    }

    fn push_from(&mut self, start: (usize, usize), kind: TokenKind) {
        let loc = Location::new(start.0, start.1, self.line, self.col);
        self.tokens.push(Token::new(kind, loc));
    }

    fn top_indent(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    fn error(&self, code: &'static str, message: impl Into<String>) -> Error {
        syntax(code, message, self.line, self.col)
    }

    fn scan_error(&self, err: ScanError) -> Error {
        match err {
            ScanError::Unterminated { .. } => self.error(
                "PUG:NO_END_BRACKET",
                "The end of the string reached with no closing bracket found.",
            ),
            ScanError::Mismatched { .. } => self.error("PUG:BRACKET_MISMATCH", err.to_string()),
        }
    }

    fn assert_expression(&self, src: &str) -> Result<()> {
        if is_expression(src) {
            Ok(())
        } else {
            Err(self.error("PUG:SYNTAX_ERROR", format!("Syntax Error: `{}` is not a valid expression", src.trim())))
        }
    }

    fn captures(&self, re: &Regex) -> Option<Captures> {
        re.captures(self.rest())
            .map(|c| c.iter().map(|m| m.map(|m| m.as_str().to_owned())).collect())
    }

    /// Match `re`, consume it and advance the column by its width.
    fn scan(&mut self, re: &Regex) -> Option<((usize, usize), Captures)> {
        let caps = self.captures(re)?;
        let whole = caps[0].as_deref().unwrap_or("");
        let start = self.here();
        let (len, cols) = (whole.len(), width(whole));
        self.consume(len);
        self.incr_col(cols);
        Some((start, caps))
    }

    /// Like [`scan`](Self::scan) but only matches when the rest of the line
    /// is blank or starts with `:` (block expansion).
    fn scan_end_of_line(&mut self, re: &Regex) -> Option<((usize, usize), Captures)> {
        let caps = self.captures(re)?;
        let whole = caps[0].as_deref().unwrap_or("");
        let after = &self.rest()[whole.len()..];
        let trailing = if after.starts_with(':') {
            0
        } else {
            let stripped = after.trim_start_matches([' ', '\t']);
            if !(stripped.is_empty() || stripped.starts_with('\n')) {
                return None;
            }
            after.len() - stripped.len()
        };
        let start = self.here();
        let (len, cols) = (whole.len(), width(whole));
        self.consume(len + trailing);
        self.incr_col(cols);
        Some((start, caps))
    }

    /// Byte offset (relative to the cursor) of the bracket closing the one at
    /// `rest()[open]`.
    fn bracket_end(&self, open: usize) -> Result<usize> {
        matching_bracket(self.rest(), open).map_err(|e| self.scan_error(e))
    }

    fn advance_lines_and_cols(&mut self, text: &str) {
        for c in text.chars() {
            if c == '\n' {
                self.incr_line(1);
            } else {
                self.incr_col(1);
            }
        }
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    fn advance(&mut self) -> Result<()> {
        let matched = self.blank()?
            || self.eos()?
            || self.end_interpolation()?
            || self.yield_()?
            || self.doctype()?
            || self.interpolation()?
            || self.case()?
            || self.when()?
            || self.default()?
            || self.extends()?
            || self.append_prepend()?
            || self.block()?
            || self.mixin_block()?
            || self.include()?
            || self.mixin()?
            || self.call()?
            || self.conditional()?
            || self.each()?
            || self.while_()?
            || self.tag()?
            || self.filter(false)?
            || self.block_code()?
            || self.code()?
            || self.id()?
            || self.dot()?
            || self.class_name()?
            || self.attrs()?
            || self.attributes_block()?
            || self.indent()?
            || self.text()?
            || self.text_html()?
            || self.comment()?
            || self.slash()?
            || self.colon()?
            || self.extension()?;
        if matched {
            Ok(())
        } else {
            Err(self.fail())
        }
    }

    fn fail(&self) -> Error {
        let preview: String = self.rest().chars().take(5).collect();
        self.error("PUG:UNEXPECTED_TEXT", format!("unexpected text \"{preview}\""))
    }

    fn extension(&mut self) -> Result<bool> {
        let plugins = self.plugins;
        for plugin in plugins {
            if plugin.lex(self)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ── Structure ─────────────────────────────────────────────────────────────

    fn blank(&mut self) -> Result<bool> {
        match self.captures(&BLANK) {
            Some(caps) => {
                let len = caps[0].as_deref().map_or(0, str::len);
                self.consume(len - 1);
                self.incr_line(1);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn eos(&mut self) -> Result<bool> {
        if !self.rest().is_empty() {
            return Ok(false);
        }
        if self.interpolated {
            return Err(self.error(
                "PUG:NO_END_BRACKET",
                "End of line was reached with no closing bracket for interpolation.",
            ));
        }
        while self.top_indent() > 0 {
            self.indent_stack.pop();
            let start = self.here();
            self.push_from(start, TokenKind::Outdent);
        }
        let start = self.here();
        self.push_from(start, TokenKind::Eof);
        self.ended = true;
        Ok(true)
    }

    fn end_interpolation(&mut self) -> Result<bool> {
        if self.interpolated && self.rest().starts_with(']') {
            self.consume(1);
            self.ended = true;
            return Ok(true);
        }
        Ok(false)
    }

    /// Width of the indentation after the newline at the cursor, fixing the
    /// indentation style the first time a non-empty indent is seen.
    fn scan_indentation(&mut self) -> Option<usize> {
        let line = self.rest().strip_prefix('\n')?;
        let count = |c: char| line.chars().take_while(|&x| x == c).count();
        match self.indent_style {
            Some(style) => Some(count(style.char())),
            None => {
                let tabs = count('\t');
                if tabs > 0 {
                    self.indent_style = Some(IndentStyle::Tabs);
                    return Some(tabs);
                }
                let spaces = count(' ');
                if spaces > 0 {
                    self.indent_style = Some(IndentStyle::Spaces);
                }
                Some(spaces)
            }
        }
    }

    fn indent(&mut self) -> Result<bool> {
        let Some(indents) = self.scan_indentation() else {
            return Ok(false);
        };
        self.incr_line(1);
        self.consume(indents + 1);

        if matches!(self.rest().chars().next(), Some(' ' | '\t')) {
            return Err(self.error(
                "PUG:INVALID_INDENTATION",
                "Invalid indentation, you can use tabs or spaces but not both",
            ));
        }

        // whitespace-only line
        if self.rest().is_empty() || self.rest().starts_with('\n') {
            self.interpolation_allowed = true;
            return Ok(true);
        }

        let top = self.top_indent();
        if indents < top {
            let mut outdents = 0;
            while self.top_indent() > indents {
                let below = self.indent_stack[self.indent_stack.len() - 2];
                if below < indents {
                    return Err(self.error(
                        "PUG:INCONSISTENT_INDENTATION",
                        format!(
                            "Inconsistent indentation. Expecting either {below} or {} spaces/tabs.",
                            self.top_indent()
                        ),
                    ));
                }
                outdents += 1;
                self.indent_stack.pop();
            }
            for _ in 0..outdents {
                self.col = 1;
                let start = self.here();
                self.col = self.top_indent() + 1;
                self.push_from(start, TokenKind::Outdent);
            }
        } else if indents > 0 && indents != top {
            let unit = *self.indent_unit.get_or_insert(indents);
            if indents % unit != 0 {
                let noun = self.indent_style.map_or("spaces", IndentStyle::noun);
                return Err(self.error(
                    "PUG:INCONSISTENT_INDENTATION",
                    format!("Inconsistent indentation. Expected a multiple of {unit} {noun} but found {indents}."),
                ));
            }
            let start = self.here();
            self.col = 1 + indents;
            self.push_from(start, TokenKind::Indent(indents));
            self.indent_stack.push(indents);
        } else {
            let start = self.here();
            self.col = 1 + top.min(indents);
            self.push_from(start, TokenKind::Newline);
        }
        self.interpolation_allowed = true;
        Ok(true)
    }

    /// Lex an indented block of raw lines following `.`, `-`, `//` or a
    /// filter.  Each line becomes text; empty lines become [`TokenKind::Blank`].
    fn pipeless_text(&mut self, indents: Option<usize>) -> Result<bool> {
        while self.blank()? {}
        let captured = self.scan_indentation();
        let Some(indents) = indents.filter(|&n| n > 0).or(captured) else {
            return Ok(false);
        };
        if indents <= self.top_indent() {
            return Ok(false);
        }
        let style = self.indent_style.unwrap_or(IndentStyle::Spaces).char();

        let mut lines: Vec<(String, bool)> = Vec::new();
        let mut ptr = self.pos;
        loop {
            let begin = ptr + 1;
            let end = self.src[begin..].find('\n').map_or(self.src.len(), |i| begin + i);
            let line = &self.src[begin..end];
            let line_indents = line.chars().take_while(|&c| c == style).count();
            let indented = line_indents >= indents;
            if indented || line.trim().is_empty() {
                lines.push((line.get(indents..).unwrap_or("").to_owned(), indented));
                ptr = end;
                if ptr >= self.src.len() {
                    break;
                }
            } else if line_indents > self.top_indent() {
                // less indented than the first line but still inside the block
                return self.pipeless_text(Some(line_indents));
            } else {
                break;
            }
        }

        let start = self.here();
        self.push_from(start, TokenKind::StartPipelessText);
        self.consume(ptr - self.pos);
        if self.pos >= self.src.len() {
            while lines.last().is_some_and(|(text, _)| text.is_empty()) {
                lines.pop();
            }
        }
        for (i, (text, indented)) in lines.into_iter().enumerate() {
            self.incr_line(1);
            let start = self.here();
            if indented {
                self.incr_col(indents);
            }
            if i != 0 {
                self.push_from(start, TokenKind::Newline);
            }
            if text.is_empty() {
                let start = self.here();
                self.push_from(start, TokenKind::Blank);
            } else {
                self.add_text(false, &text, None)?;
            }
        }
        let start = self.here();
        self.push_from(start, TokenKind::EndPipelessText);
        Ok(true)
    }

    // ── Keywords ──────────────────────────────────────────────────────────────

    fn yield_(&mut self) -> Result<bool> {
        Ok(match self.scan_end_of_line(&YIELD) {
            Some((start, _)) => {
                self.push_from(start, TokenKind::Yield);
                true
            }
            None => false,
        })
    }

    fn doctype(&mut self) -> Result<bool> {
        Ok(match self.scan_end_of_line(&DOCTYPE) {
            Some((start, caps)) => {
                let value = caps[1].as_deref().unwrap_or("").trim().to_owned();
                self.push_from(start, TokenKind::Doctype(value));
                true
            }
            None => false,
        })
    }

    /// `#{expr}` in tag position.
    fn interpolation(&mut self) -> Result<bool> {
        if !self.rest().starts_with("#{") {
            return Ok(false);
        }
        let end = self.bracket_end(1)?;
        let src = self.rest()[2..end].to_owned();
        let start = self.here();
        self.consume(end + 1);
        self.incr_col(2);
        self.assert_expression(&src)?;
        self.advance_lines_and_cols(&src);
        self.incr_col(1);
        self.push_from(start, TokenKind::InterpolatedTag(src));
        Ok(true)
    }

    fn case(&mut self) -> Result<bool> {
        let Some(caps) = self.captures(&CASE) else {
            return Ok(false);
        };
        let expr = caps[1].as_deref().unwrap_or("").trim_end().to_owned();
        let start = self.here();
        let prefix = caps[0].as_deref().map_or(0, str::len) - caps[1].as_deref().map_or(0, str::len);
        self.consume(prefix);
        self.incr_col(prefix);
        self.assert_expression(&expr)?;
        self.consume(caps[1].as_deref().map_or(0, str::len));
        self.incr_col(width(caps[1].as_deref().unwrap_or("")));
        self.push_from(start, TokenKind::Case(expr));
        Ok(true)
    }

    fn when(&mut self) -> Result<bool> {
        let Some(caps) = self.captures(&WHEN) else {
            return Ok(false);
        };
        let prefix = caps[0].as_deref().map_or(0, str::len);
        let line_end = self.rest().find('\n').unwrap_or(self.rest().len());
        let line = &self.rest()[prefix..line_end];
        let expr = match find_top_level(line, ':') {
            Some(i) => &line[..i],
            None => line,
        };
        let expr = expr.trim_end().to_owned();
        if expr.is_empty() {
            return Ok(false);
        }
        let start = self.here();
        self.consume(prefix);
        self.incr_col(prefix);
        self.assert_expression(&expr)?;
        self.consume(expr.len());
        self.incr_col(width(&expr));
        if !self.rest().starts_with(':') {
            let trailing = self.rest().len() - self.rest().trim_start_matches([' ', '\t']).len();
            self.consume(trailing);
            self.incr_col(trailing);
        }
        self.push_from(start, TokenKind::When(expr));
        Ok(true)
    }

    fn default(&mut self) -> Result<bool> {
        Ok(match self.scan_end_of_line(&DEFAULT) {
            Some((start, _)) => {
                self.push_from(start, TokenKind::Default);
                true
            }
            None => false,
        })
    }

    /// True when the text right after a keyword of `len` bytes is a space,
    /// newline, end of input or (when `colon`) a `:`.
    fn keyword_boundary(&self, len: usize, colon: bool) -> bool {
        match self.rest()[len..].chars().next() {
            None | Some(' ' | '\n') => true,
            Some(':') => colon,
            _ => false,
        }
    }

    fn extends(&mut self) -> Result<bool> {
        if let Some(caps) = self.captures(&EXTENDS) {
            let len = caps[0].as_deref().map_or(0, str::len);
            if self.keyword_boundary(len, false) {
                let start = self.here();
                self.consume(len);
                self.incr_col(len);
                self.push_from(start, TokenKind::Extends);
                if !self.path()? {
                    return Err(self.error("PUG:NO_EXTENDS_PATH", "missing path for extends"));
                }
                return Ok(true);
            }
        }
        if EXTENDS_WORD.is_match(self.rest()) {
            return Err(self.error("PUG:MALFORMED_EXTENDS", "malformed extends"));
        }
        Ok(false)
    }

    fn path(&mut self) -> Result<bool> {
        let Some(caps) = self.captures(&PATH) else {
            return Ok(false);
        };
        let path = caps[1].as_deref().unwrap_or("").trim().to_owned();
        if path.is_empty() {
            return Ok(false);
        }
        let len = caps[0].as_deref().map_or(0, str::len);
        self.consume(len);
        self.incr_col(1);
        let start = self.here();
        self.incr_col(width(caps[1].as_deref().unwrap_or("")));
        self.push_from(start, TokenKind::Path(path));
        Ok(true)
    }

    fn named_block(&mut self, caps: Captures, mode: BlockMode) -> Result<bool> {
        let raw = caps[2].as_deref().unwrap_or("");
        let (name, comment) = match raw.find("//") {
            Some(i) => (raw[..i].trim(), &raw[i..]),
            None => (raw.trim(), ""),
        };
        if name.is_empty() {
            return Ok(false);
        }
        let name = name.to_owned();
        let whole = caps[0].as_deref().unwrap_or("");
        let len = whole.len() - comment.len();
        let start = self.here();
        let consumed = &whole[..len];
        self.incr_col(width(consumed.trim_end()));
        self.push_from(start, TokenKind::Block { name, mode });
        self.consume(len);
        self.incr_col(width(consumed) - width(consumed.trim_end()));
        Ok(true)
    }

    fn append_prepend(&mut self) -> Result<bool> {
        let Some(caps) = self.captures(&APPEND_PREPEND) else {
            return Ok(false);
        };
        let mode = match caps[1].as_deref() {
            Some("append") => BlockMode::Append,
            _ => BlockMode::Prepend,
        };
        self.named_block(caps, mode)
    }

    fn block(&mut self) -> Result<bool> {
        let Some(caps) = self.captures(&BLOCK) else {
            return Ok(false);
        };
        let mode = match caps[1].as_deref() {
            Some("append") => BlockMode::Append,
            Some("prepend") => BlockMode::Prepend,
            _ => BlockMode::Replace,
        };
        self.named_block(caps, mode)
    }

    fn mixin_block(&mut self) -> Result<bool> {
        Ok(match self.scan_end_of_line(&MIXIN_BLOCK) {
            Some((start, _)) => {
                self.push_from(start, TokenKind::MixinBlock);
                true
            }
            None => false,
        })
    }

    fn include(&mut self) -> Result<bool> {
        if let Some(caps) = self.captures(&INCLUDE) {
            let len = caps[0].as_deref().map_or(0, str::len);
            if self.keyword_boundary(len, true) {
                let start = self.here();
                self.consume(len);
                self.incr_col(len);
                self.push_from(start, TokenKind::Include);
                while self.filter(true)? {}
                if !self.path()? {
                    if NON_SPACE.is_match(self.rest()) {
                        return Err(self.fail());
                    }
                    return Err(self.error("PUG:NO_INCLUDE_PATH", "missing path for include"));
                }
                return Ok(true);
            }
        }
        if INCLUDE_WORD.is_match(self.rest()) {
            return Err(self.error("PUG:MALFORMED_INCLUDE", "malformed include"));
        }
        Ok(false)
    }

    fn mixin(&mut self) -> Result<bool> {
        Ok(match self.scan(&MIXIN) {
            Some((start, caps)) => {
                let name = caps[1].clone().unwrap_or_default();
                let args = caps[2].clone();
                self.push_from(start, TokenKind::Mixin { name, args });
                true
            }
            None => false,
        })
    }

    /// `+name(args)` or `+#{expr}(args)`.
    fn call(&mut self) -> Result<bool> {
        let Some(caps) = self.captures(&CALL) else {
            return Ok(false);
        };
        let start = self.here();
        let name = match &caps[2] {
            Some(simple) => {
                let len = caps[0].as_deref().map_or(0, str::len);
                self.consume(len);
                self.incr_col(len);
                simple.clone()
            }
            None => {
                let open = caps[0].as_deref().map_or(1, str::len) - 1;
                let end = self.bracket_end(open)?;
                let src = self.rest()[open + 1..end].to_owned();
                self.consume(end + 1);
                self.assert_expression(&src)?;
                self.incr_col(end + 1);
                format!("#{{{src}}}")
            }
        };

        let mut args = None;
        if let Some(caps) = self.captures(&CALL_ARGS) {
            let open = caps[0].as_deref().map_or(1, str::len) - 1;
            let end = self.bracket_end(open)?;
            let src = self.rest()[open + 1..end].to_owned();
            if !ATTRS_LIKE.is_match(&src) {
                self.consume(end + 1);
                self.incr_col(open + 1);
                self.assert_expression(&format!("[{src}]"))?;
                self.advance_lines_and_cols(&src);
                self.incr_col(1);
                args = Some(src);
            }
        }
        self.push_from(start, TokenKind::Call { name, args });
        Ok(true)
    }

    fn conditional(&mut self) -> Result<bool> {
        let Some(caps) = self.captures(&CONDITIONAL) else {
            return Ok(false);
        };
        let whole = caps[0].as_deref().unwrap_or("");
        let js = caps[2].as_deref().unwrap_or("").trim().to_owned();
        let start = self.here();
        self.consume(whole.len());
        self.incr_col(width(whole) - width(&js));
        let kind = match caps[1].as_deref() {
            Some("if") => {
                self.assert_expression(&js)?;
                TokenKind::If(js)
            }
            Some("unless") => {
                self.assert_expression(&js)?;
                TokenKind::Unless(js)
            }
            Some("else if") => {
                self.assert_expression(&js)?;
                TokenKind::ElseIf(js)
            }
            _ => {
                if !js.is_empty() {
                    return Err(self.error(
                        "PUG:ELSE_CONDITION",
                        "`else` cannot have a condition, perhaps you meant `else if`",
                    ));
                }
                TokenKind::Else
            }
        };
        if let TokenKind::If(js) | TokenKind::Unless(js) | TokenKind::ElseIf(js) = &kind {
            self.col += width(js);
        }
        self.push_from(start, kind);
        Ok(true)
    }

    fn each(&mut self) -> Result<bool> {
        if let Some(caps) = self.captures(&EACH) {
            let whole = caps[0].as_deref().unwrap_or("");
            let code = caps[3].as_deref().unwrap_or("").trim_end().to_owned();
            let start = self.here();
            self.consume(whole.len());
            self.incr_col(width(whole) - width(caps[3].as_deref().unwrap_or("")));
            self.assert_expression(&code)?;
            self.incr_col(width(caps[3].as_deref().unwrap_or("")));
            let val = caps[1].clone().unwrap_or_default();
            let key = caps[2].clone();
            self.push_from(start, TokenKind::Each { val, key, code });
            return Ok(true);
        }
        if EACH_WORD.is_match(self.rest()) {
            return Err(self.error(
                "PUG:MALFORMED_EACH",
                "This `each` has a syntax error. `each` statements should be of the form: \
                 `each VARIABLE_NAME[, KEY_NAME] in JS_EXPRESSION`",
            ));
        }
        Ok(false)
    }

    fn while_(&mut self) -> Result<bool> {
        let Some((start, caps)) = self.scan(&WHILE) else {
            return Ok(false);
        };
        let expr = caps[1].as_deref().unwrap_or("").trim_end().to_owned();
        self.assert_expression(&expr)?;
        self.push_from(start, TokenKind::While(expr));
        Ok(true)
    }

    // ── Tags ──────────────────────────────────────────────────────────────────

    fn tag(&mut self) -> Result<bool> {
        Ok(match self.scan(&TAG) {
            Some((start, caps)) => {
                self.push_from(start, TokenKind::Tag(caps[1].clone().unwrap_or_default()));
                true
            }
            None => false,
        })
    }

    fn filter(&mut self, in_include: bool) -> Result<bool> {
        let Some((start, caps)) = self.scan(&FILTER) else {
            return Ok(false);
        };
        self.push_from(start, TokenKind::Filter(caps[1].clone().unwrap_or_default()));
        self.attrs()?;
        if !in_include {
            self.interpolation_allowed = false;
            self.pipeless_text(None)?;
        }
        Ok(true)
    }

    fn block_code(&mut self) -> Result<bool> {
        let Some((start, _)) = self.scan_end_of_line(&BLOCK_CODE) else {
            return Ok(false);
        };
        self.push_from(start, TokenKind::BlockCode);
        self.interpolation_allowed = false;
        self.pipeless_text(None)?;
        Ok(true)
    }

    fn code(&mut self) -> Result<bool> {
        let Some(caps) = self.captures(&CODE) else {
            return Ok(false);
        };
        let flags = caps[1].as_deref().unwrap_or("");
        let escape = flags.starts_with('=');
        let buffer = flags.contains('=');
        let code = caps[3].clone().unwrap_or_default();
        let start = self.here();
        let prefix = flags.len() + caps[2].as_deref().map_or(0, str::len);
        self.consume(prefix + code.len());
        self.incr_col(prefix);
        if buffer {
            self.assert_expression(&code)?;
        }
        self.incr_col(width(&code));
        self.push_from(start, TokenKind::Code { code, buffer, escape });
        Ok(true)
    }

    fn id(&mut self) -> Result<bool> {
        if let Some((start, caps)) = self.scan(&ID) {
            self.push_from(start, TokenKind::Id(caps[1].clone().unwrap_or_default()));
            return Ok(true);
        }
        if self.rest().starts_with('#') {
            let bad: String = self.rest()[1..].chars().take_while(|c| !c.is_whitespace()).collect();
            return Err(self.error("PUG:INVALID_ID", format!("\"{bad}\" is not a valid ID.")));
        }
        Ok(false)
    }

    fn dot(&mut self) -> Result<bool> {
        let Some((start, _)) = self.scan_end_of_line(&DOT) else {
            return Ok(false);
        };
        self.push_from(start, TokenKind::Dot);
        self.pipeless_text(None)?;
        Ok(true)
    }

    fn class_name(&mut self) -> Result<bool> {
        if let Some((start, caps)) = self.scan(&CLASS) {
            self.push_from(start, TokenKind::Class(caps[1].clone().unwrap_or_default()));
            return Ok(true);
        }
        if CLASS_START.is_match(self.rest()) {
            let bad: String = self.rest()[1..].chars().take_while(|c| !c.is_whitespace()).collect();
            return Err(self.error(
                "PUG:INVALID_CLASS_NAME",
                format!("Class names must contain at least one letter or underscore, \"{bad}\" is not valid."),
            ));
        }
        Ok(false)
    }

    fn attributes_block(&mut self) -> Result<bool> {
        if !AND_ATTRIBUTES.is_match(self.rest()) {
            return Ok(false);
        }
        let start = self.here();
        let keyword = "&attributes".len();
        self.consume(keyword);
        self.incr_col(keyword);
        if !self.rest().starts_with('(') {
            return Err(self.error("PUG:MALFORMED_ATTRIBUTES", "`&attributes` must be followed by `(expression)`"));
        }
        let end = self.bracket_end(0)?;
        let src = self.rest()[1..end].to_owned();
        self.consume(end + 1);
        self.assert_expression(&src)?;
        self.incr_col(1);
        self.advance_lines_and_cols(&src);
        self.incr_col(1);
        self.push_from(start, TokenKind::AndAttributes(src));
        Ok(true)
    }

    // ── Text ──────────────────────────────────────────────────────────────────

    fn text(&mut self) -> Result<bool> {
        let caps = self
            .captures(&TEXT)
            .or_else(|| self.captures(&TEXT_SPACE))
            .or_else(|| self.captures(&TEXT_PIPE));
        let Some(caps) = caps else {
            return Ok(false);
        };
        let whole = caps[0].as_deref().unwrap_or("");
        let value = caps[1].clone().unwrap_or_default();
        self.consume(whole.len());
        self.incr_col(width(whole) - width(&value));
        let end = self.pos;
        self.add_text(false, &value, Some(end))?;
        Ok(true)
    }

    fn text_html(&mut self) -> Result<bool> {
        let Some(caps) = self.captures(&TEXT_HTML) else {
            return Ok(false);
        };
        let value = caps[1].clone().unwrap_or_default();
        self.consume(value.len());
        let end = self.pos;
        self.add_text(true, &value, Some(end))?;
        Ok(true)
    }

    fn comment(&mut self) -> Result<bool> {
        let Some((start, caps)) = self.scan(&COMMENT) else {
            return Ok(false);
        };
        let buffer = caps[1].is_none();
        let text = caps[2].clone().unwrap_or_default();
        self.push_from(start, TokenKind::Comment { text, buffer });
        self.interpolation_allowed = buffer;
        self.pipeless_text(None)?;
        Ok(true)
    }

    fn slash(&mut self) -> Result<bool> {
        Ok(match self.scan(&SLASH) {
            Some((start, _)) => {
                self.push_from(start, TokenKind::Slash);
                true
            }
            None => false,
        })
    }

    fn colon(&mut self) -> Result<bool> {
        Ok(match self.scan(&COLON) {
            Some((start, _)) => {
                self.push_from(start, TokenKind::Colon);
                true
            }
            None => false,
        })
    }

    fn push_text(&mut self, html: bool, text: String, cols: usize) {
        let start = self.here();
        self.incr_col(cols);
        let kind = if html {
            TokenKind::TextHtml(text)
        } else {
            TokenKind::Text(text)
        };
        self.push_from(start, kind);
    }

    /// Split a text run into text, `#{}`/`!{}` code and `#[ ]` tag
    /// interpolation tokens.
    ///
    /// `capture_end` is the byte offset just past `value` in the source when
    /// `value` was taken directly from it; a `]` closing the enclosing tag
    /// interpolation rewinds the cursor to just after itself.
    fn add_text(&mut self, html: bool, value: &str, capture_end: Option<usize>) -> Result<()> {
        let mut prefix = String::new();
        let mut escaped = 0usize;
        let mut value = value.to_owned();
        loop {
            if value.is_empty() && prefix.is_empty() {
                return Ok(());
            }
            let allowed = self.interpolation_allowed;
            let end = match capture_end {
                Some(_) if self.interpolated => value.find(']'),
                _ => None,
            };
            let start = if allowed { value.find("#[") } else { None };
            let esc = if allowed { value.find("\\#[") } else { None };
            let code = if allowed { find_code_interpolation(&value) } else { None };

            let inf = usize::MAX;
            let (end_i, start_i, esc_i, code_i) = (
                end.unwrap_or(inf),
                start.unwrap_or(inf),
                esc.unwrap_or(inf),
                code.map_or(inf, |c| c.0),
            );

            if esc_i != inf && esc_i < end_i && esc_i < start_i && esc_i < code_i {
                prefix.push_str(&value[..esc_i]);
                prefix.push_str("#[");
                value = value[esc_i + 3..].to_owned();
                escaped += 1;
                continue;
            }

            if start_i != inf && start_i < end_i && start_i < esc_i && start_i < code_i {
                let before = format!("{prefix}{}", &value[..start_i]);
                let cols = width(&before) + escaped;
                if before.is_empty() {
                    self.incr_col(cols);
                } else {
                    self.push_text(html, before, cols);
                }
                let tok_start = self.here();
                self.incr_col(2);
                self.push_from(tok_start, TokenKind::StartInterpolation);

                let mut child = Lexer::interpolated_at(&value[start_i + 2..], self.line, self.col, self.plugins);
                child.run()?;
                self.col = child.col;
                let rest = child.rest().to_owned();
                self.tokens.append(&mut child.tokens);

                let tok_start = self.here();
                self.incr_col(1);
                self.push_from(tok_start, TokenKind::EndInterpolation);
                value = rest;
                prefix.clear();
                escaped = 0;
                continue;
            }

            if end_i != inf && end_i < start_i && end_i < esc_i && end_i < code_i {
                let before = format!("{prefix}{}", &value[..end_i]);
                if !before.is_empty() {
                    let cols = width(&before) + escaped;
                    self.push_text(html, before, cols);
                }
                self.ended = true;
                if let Some(capture_end) = capture_end {
                    self.pos = capture_end - value.len() + end_i + 1;
                }
                return Ok(());
            }

            if let Some((index, is_escaped, sigil)) = code {
                if is_escaped {
                    prefix.push_str(&value[..index]);
                    prefix.push(sigil);
                    prefix.push('{');
                    value = value[index + 3..].to_owned();
                    escaped += 1;
                    continue;
                }
                let before = format!("{prefix}{}", &value[..index]);
                if !before.is_empty() {
                    let cols = width(&before) + escaped;
                    self.push_text(html, before, cols);
                }
                let tok_start = self.here();
                self.incr_col(2);
                let rest = &value[index + 2..];
                let close = parse_until(rest, 0, '}').map_err(|e| match e {
                    ScanError::Unterminated { .. } => self.error(
                        "PUG:NO_END_BRACKET",
                        "End of line was reached with no closing bracket for interpolation.",
                    ),
                    other => self.error("PUG:BRACKET_MISMATCH", other.to_string()),
                })?;
                let src = rest[..close].to_owned();
                self.assert_expression(&src)?;
                self.incr_col(width(&src) + 1);
                let next = rest[close + 1..].to_owned();
                self.push_from(
                    tok_start,
                    TokenKind::InterpolatedCode {
                        code: src,
                        buffer: true,
                        escape: sigil == '#',
                    },
                );
                value = next;
                prefix.clear();
                escaped = 0;
                continue;
            }

            let text = format!("{prefix}{value}");
            let cols = width(&text) + escaped;
            self.push_text(html, text, cols);
            return Ok(());
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src, &[]).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn text(s: &str) -> TokenKind {
        TokenKind::Text(s.into())
    }

    fn tag(s: &str) -> TokenKind {
        TokenKind::Tag(s.into())
    }

    #[test]
    fn tag_with_id_class_and_text() {
        assert_eq!(
            kinds("p#main.lead Hello"),
            vec![
                tag("p"),
                TokenKind::Id("main".into()),
                TokenKind::Class("lead".into()),
                text("Hello"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn indentation_is_balanced() {
        let k = kinds("ul\n  li a\n  li b\np");
        assert_eq!(
            k,
            vec![
                tag("ul"),
                TokenKind::Indent(2),
                tag("li"),
                text("a"),
                TokenKind::Newline,
                tag("li"),
                text("b"),
                TokenKind::Outdent,
                tag("p"),
                TokenKind::Eof
            ]
        );
        let k = kinds("a\n  b\n    c");
        let indents = k.iter().filter(|t| matches!(t, TokenKind::Indent(_))).count();
        let outdents = k.iter().filter(|t| matches!(t, TokenKind::Outdent)).count();
        assert_eq!((indents, outdents), (2, 2));
    }

    #[test]
    fn mixing_tabs_and_spaces_fails() {
        let err = lex("a\n\t b", &[]).unwrap_err();
        assert_eq!(err.code(), "PUG:INVALID_INDENTATION");
    }

    #[test]
    fn inconsistent_indentation_fails() {
        let err = lex("a\n    b\n  c", &[]).unwrap_err();
        assert_eq!(err.code(), "PUG:INCONSISTENT_INDENTATION");
        let err = lex("a\n  b\n     c", &[]).unwrap_err();
        assert_eq!(err.code(), "PUG:INCONSISTENT_INDENTATION");
        let d = err.diagnostic().unwrap();
        assert_eq!(d.line, 3);
    }

    #[test]
    fn code_interpolation_in_text() {
        assert_eq!(
            kinds("p Hi #{name}! !{raw}"),
            vec![
                tag("p"),
                text("Hi "),
                TokenKind::InterpolatedCode {
                    code: "name".into(),
                    buffer: true,
                    escape: true
                },
                text("! "),
                TokenKind::InterpolatedCode {
                    code: "raw".into(),
                    buffer: true,
                    escape: false
                },
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn escaped_interpolation_is_text() {
        assert_eq!(kinds("p \\#{x} and \\#[y]"), vec![tag("p"), text("#{x} and #[y]"), TokenKind::Eof]);
    }

    #[test]
    fn tag_interpolation() {
        assert_eq!(
            kinds("p a #[em b] c"),
            vec![
                tag("p"),
                text("a "),
                TokenKind::StartInterpolation,
                tag("em"),
                text("b"),
                TokenKind::EndInterpolation,
                text(" c"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn unclosed_interpolation_is_an_error() {
        assert_eq!(lex("p #{a", &[]).unwrap_err().code(), "PUG:NO_END_BRACKET");
        assert_eq!(lex("p #[em a", &[]).unwrap_err().code(), "PUG:NO_END_BRACKET");
    }

    #[test]
    fn attributes() {
        let k = kinds("a(href='/x' + y, title=\"t\" disabled data-n=1 + 2 class!=cls)");
        assert_eq!(
            k,
            vec![
                tag("a"),
                TokenKind::StartAttributes,
                TokenKind::Attribute {
                    name: "href".into(),
                    value: Some("'/x' + y".into()),
                    escaped: true
                },
                TokenKind::Attribute {
                    name: "title".into(),
                    value: Some("\"t\"".into()),
                    escaped: true
                },
                TokenKind::Attribute {
                    name: "disabled".into(),
                    value: None,
                    escaped: true
                },
                TokenKind::Attribute {
                    name: "data-n".into(),
                    value: Some("1 + 2".into()),
                    escaped: true
                },
                TokenKind::Attribute {
                    name: "class".into(),
                    value: Some("cls".into()),
                    escaped: false
                },
                TokenKind::EndAttributes,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn multiline_attributes_track_lines() {
        let toks = lex("input(\n  type='text'\n  name='q'\n)\np", &[]).unwrap();
        let name = toks
            .iter()
            .find(|t| matches!(&t.kind, TokenKind::Attribute { name, .. } if name == "name"))
            .unwrap();
        assert_eq!(name.loc.start_line, 3);
        let p = toks.iter().find(|t| t.kind == tag("p")).unwrap();
        assert_eq!(p.loc.start_line, 5);
    }

    #[test]
    fn pipeless_text_with_blank_lines() {
        assert_eq!(
            kinds("p.\n  one\n\n  two\ndiv"),
            vec![
                tag("p"),
                TokenKind::Dot,
                TokenKind::StartPipelessText,
                text("one"),
                TokenKind::Newline,
                TokenKind::Blank,
                TokenKind::Newline,
                text("two"),
                TokenKind::EndPipelessText,
                TokenKind::Newline,
                tag("div"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn keywords() {
        assert_eq!(
            kinds("extends layout.pug"),
            vec![TokenKind::Extends, TokenKind::Path("layout.pug".into()), TokenKind::Eof]
        );
        assert_eq!(
            kinds("append scripts"),
            vec![
                TokenKind::Block {
                    name: "scripts".into(),
                    mode: BlockMode::Append
                },
                TokenKind::Eof
            ]
        );
        assert_eq!(
            kinds("include:md(flag) notes.md"),
            vec![
                TokenKind::Include,
                TokenKind::Filter("md".into()),
                TokenKind::StartAttributes,
                TokenKind::Attribute {
                    name: "flag".into(),
                    value: None,
                    escaped: true
                },
                TokenKind::EndAttributes,
                TokenKind::Path("notes.md".into()),
                TokenKind::Eof
            ]
        );
        assert_eq!(
            kinds("each v, k in list"),
            vec![
                TokenKind::Each {
                    val: "v".into(),
                    key: Some("k".into()),
                    code: "list".into()
                },
                TokenKind::Eof
            ]
        );
        assert_eq!(kinds("unless a"), vec![TokenKind::Unless("a".into()), TokenKind::Eof]);
        assert_eq!(kinds("else if b"), vec![TokenKind::ElseIf("b".into()), TokenKind::Eof]);
    }

    #[test]
    fn when_stops_at_top_level_colon() {
        assert_eq!(
            kinds("when 'a:b': p x"),
            vec![
                TokenKind::When("'a:b'".into()),
                TokenKind::Colon,
                tag("p"),
                text("x"),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn mixin_call_args_versus_attributes() {
        assert_eq!(
            kinds("+btn('go', 1)"),
            vec![
                TokenKind::Call {
                    name: "btn".into(),
                    args: Some("'go', 1".into())
                },
                TokenKind::Eof
            ]
        );
        let k = kinds("+btn(class='x')");
        assert_eq!(
            k[0],
            TokenKind::Call {
                name: "btn".into(),
                args: None
            }
        );
        assert_eq!(k[1], TokenKind::StartAttributes);
        assert_eq!(
            kinds("+#{name}()")[0],
            TokenKind::Call {
                name: "#{name}".into(),
                args: Some(String::new())
            }
        );
    }

    #[test]
    fn code_and_comments() {
        assert_eq!(
            kinds("p= a + b\n- var x = 1\n//- hidden\n// shown"),
            vec![
                tag("p"),
                TokenKind::Code {
                    code: "a + b".into(),
                    buffer: true,
                    escape: true
                },
                TokenKind::Newline,
                TokenKind::Code {
                    code: "var x = 1".into(),
                    buffer: false,
                    escape: false
                },
                TokenKind::Newline,
                TokenKind::Comment {
                    text: " hidden".into(),
                    buffer: false
                },
                TokenKind::Newline,
                TokenKind::Comment {
                    text: " shown".into(),
                    buffer: true
                },
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn invalid_buffered_code_is_a_syntax_error() {
        let err = lex("p= a +", &[]).unwrap_err();
        assert_eq!(err.code(), "PUG:SYNTAX_ERROR");
    }

    #[test]
    fn unexpected_text_reports_position() {
        let err = lex("p\n  %oops", &[]).unwrap_err();
        assert_eq!(err.code(), "PUG:UNEXPECTED_TEXT");
        let d = err.diagnostic().unwrap();
        assert_eq!((d.line, d.column), (2, 3));
    }

    #[test]
    fn locations_are_one_based() {
        let toks = lex("div\n  span hi", &[]).unwrap();
        let span = &toks[2];
        assert_eq!(span.kind, tag("span"));
        assert_eq!(span.loc, Location::new(2, 3, 2, 7));
    }

    #[test]
    fn crlf_and_bom_are_normalized() {
        assert_eq!(kinds("\u{feff}a\r\n  b"), kinds("a\n  b"));
    }
}
