//! Token data model and the parser's pull-based token stream.

use std::fmt;

use crate::ast::BlockMode;

// ── Location ──────────────────────────────────────────────────────────────────

/// Source span of a token or node.  Lines and columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Location {
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl Location {
    pub fn new(start_line: usize, start_col: usize, end_line: usize, end_col: usize) -> Self {
        Location {
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// A zero-width location at `line:col`.
    pub fn point(line: usize, col: usize) -> Self {
        Location::new(line, col, line, col)
    }
}

// ── TokenKind ─────────────────────────────────────────────────────────────────

/// Closed set of token kinds with their payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Structure
    Indent(usize),
    Outdent,
    Newline,
    Eof,
    /// An empty line inside a pipeless text block.
    Blank,

    // Tags
    Tag(String),
    /// `#{expr}` used as a tag name.
    InterpolatedTag(String),
    Id(String),
    Class(String),
    StartAttributes,
    Attribute {
        name: String,
        /// Raw expression text; `None` for a bare boolean attribute.
        value: Option<String>,
        escaped: bool,
    },
    EndAttributes,
    /// `&attributes(expr)`
    AndAttributes(String),
    /// Trailing `:` (block expansion).
    Colon,
    /// Trailing `/` (explicit self-closing).
    Slash,
    /// Trailing `.` (text block follows).
    Dot,

    // Code
    Code {
        code: String,
        buffer: bool,
        escape: bool,
    },
    /// A bare `-` opening a multi-line unbuffered code block.
    BlockCode,
    /// `#{expr}` / `!{expr}` inside text.
    InterpolatedCode {
        code: String,
        buffer: bool,
        escape: bool,
    },

    // Conditionals and loops
    If(String),
    ElseIf(String),
    Else,
    Unless(String),
    Case(String),
    When(String),
    Default,
    Each {
        val: String,
        key: Option<String>,
        code: String,
    },
    While(String),

    // Inheritance and composition
    Block {
        name: String,
        mode: BlockMode,
    },
    /// Bare `block` inside a mixin body.
    MixinBlock,
    Yield,
    Extends,
    Include,
    Path(String),
    Mixin {
        name: String,
        args: Option<String>,
    },
    Call {
        name: String,
        args: Option<String>,
    },
    Filter(String),

    // Text
    Text(String),
    /// A line of literal HTML (starts with `<`).
    TextHtml(String),
    Comment {
        text: String,
        buffer: bool,
    },
    Doctype(String),
    StartPipelessText,
    EndPipelessText,
    /// `#[`
    StartInterpolation,
    /// `]`
    EndInterpolation,

    /// Produced by a lexer extension; handled by a parser extension.
    Custom {
        name: String,
        value: String,
    },
}

impl TokenKind {
    /// Short kind name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Indent(_) => "indent",
            TokenKind::Outdent => "outdent",
            TokenKind::Newline => "newline",
            TokenKind::Eof => "eos",
            TokenKind::Blank => "blank",
            TokenKind::Tag(_) => "tag",
            TokenKind::InterpolatedTag(_) => "interpolation",
            TokenKind::Id(_) => "id",
            TokenKind::Class(_) => "class",
            TokenKind::StartAttributes => "start-attributes",
            TokenKind::Attribute { .. } => "attribute",
            TokenKind::EndAttributes => "end-attributes",
            TokenKind::AndAttributes(_) => "&attributes",
            TokenKind::Colon => ":",
            TokenKind::Slash => "slash",
            TokenKind::Dot => "dot",
            TokenKind::Code { .. } => "code",
            TokenKind::BlockCode => "blockcode",
            TokenKind::InterpolatedCode { .. } => "interpolated-code",
            TokenKind::If(_) => "if",
            TokenKind::ElseIf(_) => "else-if",
            TokenKind::Else => "else",
            TokenKind::Unless(_) => "unless",
            TokenKind::Case(_) => "case",
            TokenKind::When(_) => "when",
            TokenKind::Default => "default",
            TokenKind::Each { .. } => "each",
            TokenKind::While(_) => "while",
            TokenKind::Block { .. } => "block",
            TokenKind::MixinBlock => "mixin-block",
            TokenKind::Yield => "yield",
            TokenKind::Extends => "extends",
            TokenKind::Include => "include",
            TokenKind::Path(_) => "path",
            TokenKind::Mixin { .. } => "mixin",
            TokenKind::Call { .. } => "call",
            TokenKind::Filter(_) => "filter",
            TokenKind::Text(_) => "text",
            TokenKind::TextHtml(_) => "text-html",
            TokenKind::Comment { .. } => "comment",
            TokenKind::Doctype(_) => "doctype",
            TokenKind::StartPipelessText => "start-pipeless-text",
            TokenKind::EndPipelessText => "end-pipeless-text",
            TokenKind::StartInterpolation => "start-pug-interpolation",
            TokenKind::EndInterpolation => "end-pug-interpolation",
            TokenKind::Custom { .. } => "custom",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub loc: Location,
}

impl Token {
    pub fn new(kind: TokenKind, loc: Location) -> Self {
        Token { kind, loc }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}

// ── TokenStream ───────────────────────────────────────────────────────────────

/// Cursor over an immutable token sequence plus a stack of deferred tokens.
///
/// Deferred tokens are consulted before the cursor, so `defer` followed by
/// `advance` returns the deferred token.  Reading past the end keeps yielding
/// the terminating end-of-file token.
#[derive(Debug)]
pub struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
    deferred: Vec<Token>,
}

impl TokenStream {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !tokens.last().is_some_and(Token::is_eof) {
            let loc = tokens
                .last()
                .map(|t| Location::point(t.loc.end_line, t.loc.end_col))
                .unwrap_or_else(|| Location::point(1, 1));
            tokens.push(Token::new(TokenKind::Eof, loc));
        }
        TokenStream {
            tokens,
            pos: 0,
            deferred: Vec::new(),
        }
    }

    /// The token `index` positions ahead (0 = next).
    pub fn lookahead(&self, index: usize) -> &Token {
        let n = self.deferred.len();
        if index < n {
            return &self.deferred[n - 1 - index];
        }
        let i = (self.pos + index - n).min(self.tokens.len() - 1);
        &self.tokens[i]
    }

    pub fn peek(&self) -> &Token {
        self.lookahead(0)
    }

    /// Consume and return the next token.
    pub fn advance(&mut self) -> Token {
        if let Some(t) = self.deferred.pop() {
            return t;
        }
        let last = self.tokens.len() - 1;
        let t = self.tokens[self.pos.min(last)].clone();
        if self.pos < last {
            self.pos += 1;
        }
        t
    }

    /// Push `token` back so it is returned by the next `advance`.
    pub fn defer(&mut self, token: Token) {
        self.deferred.push(token);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tok(kind: TokenKind) -> Token {
        Token::new(kind, Location::point(1, 1))
    }

    #[test]
    fn stream_appends_eof() {
        let mut s = TokenStream::new(vec![tok(TokenKind::Tag("p".into()))]);
        assert_eq!(s.advance().kind, TokenKind::Tag("p".into()));
        assert!(s.peek().is_eof());
        assert!(s.advance().is_eof());
        assert!(s.advance().is_eof());
    }

    #[test]
    fn defer_is_returned_first() {
        let mut s = TokenStream::new(vec![
            tok(TokenKind::Tag("a".into())),
            tok(TokenKind::Tag("b".into())),
        ]);
        let a = s.advance();
        s.defer(a.clone());
        assert_eq!(s.peek(), &a);
        assert_eq!(s.lookahead(1).kind, TokenKind::Tag("b".into()));
        assert_eq!(s.advance(), a);
        assert_eq!(s.advance().kind, TokenKind::Tag("b".into()));
    }

    #[test]
    fn lookahead_past_deferred_stack() {
        let mut s = TokenStream::new(vec![tok(TokenKind::Newline), tok(TokenKind::Outdent)]);
        s.defer(tok(TokenKind::Dot));
        s.defer(tok(TokenKind::Colon));
        assert_eq!(s.lookahead(0).kind, TokenKind::Colon);
        assert_eq!(s.lookahead(1).kind, TokenKind::Dot);
        assert_eq!(s.lookahead(2).kind, TokenKind::Newline);
        assert_eq!(s.lookahead(3).kind, TokenKind::Outdent);
        assert!(s.lookahead(10).is_eof());
    }
}
