//! Recursive-descent parser: tokens → single-file AST.
//!
//! One production per construct, each chosen by peeking the next token.
//! Block expansion (`tag: child`) is handled inside the tag production by
//! parsing one more expression as the tag's only child.  Tokens produced by
//! lexer plugins ([`TokenKind::Custom`]) are offered to parser plugins.

use std::path::Path;
use std::sync::Arc;

use log::trace;

use crate::ast::{Attribute, Block, FileRef, IncludeFilter, Name, Node, Tag, When};
use crate::error::{syntax, Error, Result};
use crate::plugin::Plugin;
use crate::token::{Location, Token, TokenKind, TokenStream};

/// Tags rendered inline (on one line) in pretty mode.
pub const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "b", "br", "code", "em", "font", "i", "img", "ins", "kbd", "map", "samp", "small",
    "span", "strong", "sub", "sup",
];

/// Parse a token sequence into the root block of one file.
pub fn parse(tokens: Vec<Token>, file: Option<Arc<Path>>, plugins: &[Arc<dyn Plugin>]) -> Result<Block> {
    Parser::new(tokens, file, plugins).parse()
}

pub struct Parser<'a> {
    tokens: TokenStream,
    file: Option<Arc<Path>>,
    /// Extension marking an include as a template rather than raw text.
    extension: String,
    in_mixin: usize,
    plugins: &'a [Arc<dyn Plugin>],
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Token>, file: Option<Arc<Path>>, plugins: &'a [Arc<dyn Plugin>]) -> Self {
        Parser {
            tokens: TokenStream::new(tokens),
            file,
            extension: ".pug".to_owned(),
            in_mixin: 0,
            plugins,
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_owned();
        self
    }

    /// Parse the whole stream.
    pub fn parse(mut self) -> Result<Block> {
        let mut block = self.empty_block(Location::point(1, 1));
        while !self.peek().is_eof() {
            if matches!(self.peek().kind, TokenKind::Newline) {
                self.advance();
            } else {
                self.push_expr(&mut block.nodes)?;
            }
        }
        trace!("parsed {} top-level nodes", block.nodes.len());
        Ok(block)
    }

    // ── Stream access (also used by parser plugins) ───────────────────────────

    pub fn peek(&self) -> &Token {
        self.tokens.peek()
    }

    pub fn lookahead(&self, index: usize) -> &Token {
        self.tokens.lookahead(index)
    }

    pub fn advance(&mut self) -> Token {
        self.tokens.advance()
    }

    pub fn defer(&mut self, token: Token) {
        self.tokens.defer(token);
    }

    pub fn file(&self) -> Option<&Arc<Path>> {
        self.file.as_ref()
    }

    pub fn empty_block(&self, loc: Location) -> Block {
        Block::new(self.file.clone(), loc)
    }

    fn error_at(&self, token: &Token, code: &'static str, message: impl Into<String>) -> Error {
        syntax(code, message, token.loc.start_line, token.loc.start_col)
    }

    fn unexpected(&self, expected: &str) -> Error {
        let tok = self.peek();
        self.error_at(
            tok,
            "PUG:INVALID_TOKEN",
            format!("expected {expected}, but got \"{}\"", tok.kind.name()),
        )
    }

    fn expect(&mut self, what: &str, ok: fn(&TokenKind) -> bool) -> Result<Token> {
        if ok(&self.peek().kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("\"{what}\"")))
        }
    }

    /// The indented body required after a control keyword.
    fn required_block(&mut self, construct: &str) -> Result<Block> {
        if matches!(self.peek().kind, TokenKind::Indent(_)) {
            return self.block();
        }
        let tok = self.peek();
        Err(self.error_at(
            tok,
            "PUG:EXPECTED_BLOCK",
            format!("`{construct}` requires an indented block, but got \"{}\"", tok.kind.name()),
        ))
    }

    /// Parse one expression and append it, flattening anonymous blocks.
    fn push_expr(&mut self, nodes: &mut Vec<Node>) -> Result<()> {
        if matches!(self.peek().kind, TokenKind::TextHtml(_)) {
            let mut current = None;
            return self.text_html_into(nodes, &mut current);
        }
        match self.parse_expr()? {
            Node::Block(block) => nodes.extend(block.nodes),
            node => nodes.push(node),
        }
        Ok(())
    }

    /// `indent expr* outdent`
    pub fn block(&mut self) -> Result<Block> {
        let tok = self.expect("indent", |k| matches!(k, TokenKind::Indent(_)))?;
        let mut block = self.empty_block(tok.loc);
        loop {
            match self.peek().kind {
                TokenKind::Outdent => break,
                TokenKind::Newline => {
                    self.advance();
                }
                _ => self.push_expr(&mut block.nodes)?,
            }
        }
        self.advance();
        Ok(block)
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    pub fn parse_expr(&mut self) -> Result<Node> {
        match &self.peek().kind {
            TokenKind::Tag(_) => self.parse_tag(),
            TokenKind::InterpolatedTag(_) => self.parse_tag(),
            TokenKind::Mixin { .. } => self.parse_mixin(),
            TokenKind::Block { .. } => self.parse_named_block(),
            TokenKind::MixinBlock => self.parse_mixin_block(),
            TokenKind::Case(_) => self.parse_case(),
            TokenKind::Extends => self.parse_extends(),
            TokenKind::Include => self.parse_include(),
            TokenKind::Doctype(_) => self.parse_doctype(),
            TokenKind::Filter(_) => self.parse_filter(),
            TokenKind::Comment { .. } => self.parse_comment(),
            TokenKind::Text(_) | TokenKind::InterpolatedCode { .. } | TokenKind::StartInterpolation => {
                self.parse_text(true)
            }
            TokenKind::TextHtml(_) => {
                let loc = self.peek().loc;
                let mut nodes = Vec::new();
                let mut current = None;
                self.text_html_into(&mut nodes, &mut current)?;
                Ok(Node::Block(Block::with_nodes(nodes, self.file.clone(), loc)))
            }
            TokenKind::Dot => {
                self.advance();
                let loc = self.peek().loc;
                let block = self.parse_text_block()?.unwrap_or_else(|| self.empty_block(loc));
                Ok(Node::Block(block))
            }
            TokenKind::Each { .. } => self.parse_each(),
            TokenKind::Code { .. } => self.parse_code(false),
            TokenKind::BlockCode => self.parse_block_code(),
            TokenKind::If(_) | TokenKind::Unless(_) => self.parse_conditional(),
            TokenKind::While(_) => self.parse_while(),
            TokenKind::Call { .. } => self.parse_call(),
            TokenKind::Yield => {
                let tok = self.advance();
                Ok(Node::Yield { loc: tok.loc })
            }
            TokenKind::Id(_) | TokenKind::Class(_) => {
                let loc = self.peek().loc;
                self.defer(Token::new(TokenKind::Tag("div".into()), Location::point(loc.start_line, loc.start_col)));
                self.parse_expr()
            }
            TokenKind::Custom { .. } => {
                let plugins = self.plugins;
                for plugin in plugins {
                    if let Some(node) = plugin.parse(self)? {
                        return Ok(node);
                    }
                }
                let tok = self.peek();
                Err(self.error_at(
                    tok,
                    "PUG:INVALID_TOKEN",
                    format!("no plugin handles the custom token \"{}\"", tok.kind.name()),
                ))
            }
            other => {
                let tok = self.peek();
                Err(self.error_at(tok, "PUG:INVALID_TOKEN", format!("unexpected token \"{}\"", other.name())))
            }
        }
    }

    // ── Text ──────────────────────────────────────────────────────────────────

    /// A run of text, interpolations and `#[...]` tags.  With `block`,
    /// newlines between text lines are kept as `"\n"` text.
    fn parse_text(&mut self, block: bool) -> Result<Node> {
        let loc = self.peek().loc;
        let mut nodes = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::Text(_) => {
                    let tok = self.advance();
                    if let TokenKind::Text(value) = tok.kind {
                        nodes.push(Node::Text { value, loc: tok.loc });
                    }
                }
                TokenKind::InterpolatedCode { .. } => {
                    let tok = self.advance();
                    if let TokenKind::InterpolatedCode { code, escape, .. } = tok.kind {
                        nodes.push(Node::Interpolation {
                            expr: code,
                            escape,
                            loc: tok.loc,
                        });
                    }
                }
                TokenKind::Newline if block => {
                    let tok = self.advance();
                    if matches!(self.peek().kind, TokenKind::Text(_) | TokenKind::InterpolatedCode { .. }) {
                        nodes.push(Node::Text {
                            value: "\n".into(),
                            loc: tok.loc,
                        });
                    }
                }
                TokenKind::StartInterpolation => {
                    self.advance();
                    nodes.push(self.parse_expr()?);
                    self.expect("end-pug-interpolation", |k| matches!(k, TokenKind::EndInterpolation))?;
                }
                _ => break,
            }
        }
        if nodes.len() == 1 {
            if let Some(node) = nodes.pop() {
                return Ok(node);
            }
        }
        Ok(Node::Block(Block::with_nodes(nodes, self.file.clone(), loc)))
    }

    /// Consecutive literal HTML lines, joined with newlines into one text
    /// node.  Nested non-HTML content is parsed normally in between.
    fn text_html_into(&mut self, nodes: &mut Vec<Node>, current: &mut Option<usize>) -> Result<()> {
        loop {
            match self.peek().kind {
                TokenKind::TextHtml(_) => {
                    let tok = self.advance();
                    if let TokenKind::TextHtml(text) = tok.kind {
                        match current.and_then(|i| nodes.get_mut(i)) {
                            Some(Node::Text { value, .. }) => {
                                value.push('\n');
                                value.push_str(&text);
                            }
                            _ => {
                                *current = Some(nodes.len());
                                nodes.push(Node::Text {
                                    value: text,
                                    loc: tok.loc,
                                });
                            }
                        }
                    }
                }
                TokenKind::Indent(_) => {
                    self.advance();
                    loop {
                        match self.peek().kind {
                            TokenKind::Outdent => {
                                self.advance();
                                break;
                            }
                            TokenKind::Newline => {
                                self.advance();
                            }
                            TokenKind::TextHtml(_) => self.text_html_into(nodes, current)?,
                            _ => {
                                *current = None;
                                self.push_expr(nodes)?;
                            }
                        }
                    }
                }
                TokenKind::Newline => {
                    self.advance();
                }
                _ => return Ok(()),
            }
        }
    }

    /// `start-pipeless-text ... end-pipeless-text`, if present.
    fn parse_text_block(&mut self) -> Result<Option<Block>> {
        if !matches!(self.peek().kind, TokenKind::StartPipelessText) {
            return Ok(None);
        }
        let start = self.advance();
        let mut block = self.empty_block(start.loc);
        loop {
            if matches!(self.peek().kind, TokenKind::EndPipelessText) {
                self.advance();
                return Ok(Some(block));
            }
            let tok = self.advance();
            match tok.kind {
                TokenKind::Text(value) => block.nodes.push(Node::Text { value, loc: tok.loc }),
                TokenKind::Newline => block.nodes.push(Node::Text {
                    value: "\n".into(),
                    loc: tok.loc,
                }),
                TokenKind::Blank => {}
                TokenKind::StartInterpolation => {
                    block.nodes.push(self.parse_expr()?);
                    self.expect("end-pug-interpolation", |k| matches!(k, TokenKind::EndInterpolation))?;
                }
                TokenKind::InterpolatedCode { code, escape, .. } => block.nodes.push(Node::Interpolation {
                    expr: code,
                    escape,
                    loc: tok.loc,
                }),
                other => {
                    return Err(self.error_at(
                        &Token::new(other.clone(), tok.loc),
                        "PUG:INVALID_TOKEN",
                        format!("Unexpected token type: {}", other.name()),
                    ))
                }
            }
        }
    }

    // ── Simple statements ─────────────────────────────────────────────────────

    fn parse_doctype(&mut self) -> Result<Node> {
        let tok = self.advance();
        let value = match tok.kind {
            TokenKind::Doctype(v) => v,
            _ => String::new(),
        };
        Ok(Node::Doctype { value, loc: tok.loc })
    }

    fn parse_comment(&mut self) -> Result<Node> {
        let tok = self.advance();
        let (value, buffer) = match tok.kind {
            TokenKind::Comment { text, buffer } => (text, buffer),
            _ => (String::new(), true),
        };
        Ok(match self.parse_text_block()? {
            Some(block) => Node::BlockComment {
                value,
                buffer,
                block,
                loc: tok.loc,
            },
            None => Node::Comment {
                value,
                buffer,
                loc: tok.loc,
            },
        })
    }

    fn parse_code(&mut self, inline: bool) -> Result<Node> {
        let tok = self.advance();
        let TokenKind::Code { code, buffer, escape } = tok.kind else {
            return Err(self.unexpected("\"code\""));
        };
        if !inline && matches!(self.peek().kind, TokenKind::Indent(_)) {
            let next = self.peek();
            return Err(if buffer {
                self.error_at(
                    next,
                    "PUG:BLOCK_IN_BUFFERED_CODE",
                    "Buffered code cannot have a block attached to it",
                )
            } else {
                self.error_at(
                    next,
                    "PUG:BLOCK_IN_CODE",
                    "Unbuffered code cannot have a block attached to it; use `if`, `each` or `while`",
                )
            });
        }
        Ok(Node::Code {
            code,
            buffer,
            escape,
            loc: tok.loc,
        })
    }

    fn parse_block_code(&mut self) -> Result<Node> {
        let tok = self.advance();
        let mut code = String::new();
        if matches!(self.peek().kind, TokenKind::StartPipelessText) {
            self.advance();
            loop {
                let t = self.advance();
                match t.kind {
                    TokenKind::EndPipelessText => break,
                    TokenKind::Text(text) => code.push_str(&text),
                    TokenKind::Newline => code.push('\n'),
                    TokenKind::Blank => {}
                    other => {
                        return Err(syntax(
                            "PUG:INVALID_TOKEN",
                            format!("Unexpected token type: {}", other.name()),
                            t.loc.start_line,
                            t.loc.start_col,
                        ))
                    }
                }
            }
        }
        Ok(Node::Code {
            code,
            buffer: false,
            escape: false,
            loc: tok.loc,
        })
    }

    // ── Control flow ──────────────────────────────────────────────────────────

    fn parse_conditional(&mut self) -> Result<Node> {
        let tok = self.advance();
        let (test, keyword) = match tok.kind {
            TokenKind::If(js) => (js, "if"),
            TokenKind::Unless(js) => (format!("!({js})"), "unless"),
            _ => return Err(self.unexpected("\"if\"")),
        };
        let consequent = self.required_block(keyword)?;
        let mut branches = vec![(test, consequent, tok.loc)];
        let mut otherwise = None;
        loop {
            match self.peek().kind {
                TokenKind::ElseIf(_) => {
                    let tok = self.advance();
                    if let TokenKind::ElseIf(test) = tok.kind {
                        let block = self.required_block("else if")?;
                        branches.push((test, block, tok.loc));
                    }
                }
                TokenKind::Else => {
                    self.advance();
                    otherwise = Some(Box::new(Node::Block(self.required_block("else")?)));
                    break;
                }
                _ => break,
            }
        }
        // fold `else if` chain from the innermost branch outwards
        let mut node = otherwise;
        while let Some((test, consequent, loc)) = branches.pop() {
            node = Some(Box::new(Node::Conditional {
                test,
                consequent,
                alternate: node.take(),
                loc,
            }));
        }
        node.map(|n| *n).ok_or_else(|| self.unexpected("\"if\""))
    }

    fn parse_case(&mut self) -> Result<Node> {
        let tok = self.advance();
        let TokenKind::Case(expr) = tok.kind else {
            return Err(self.unexpected("\"case\""));
        };
        self.expect("indent", |k| matches!(k, TokenKind::Indent(_)))?;
        let mut whens = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::Outdent => break,
                TokenKind::Newline | TokenKind::Comment { .. } => {
                    self.advance();
                }
                TokenKind::When(_) => {
                    let tok = self.advance();
                    if let TokenKind::When(expr) = tok.kind {
                        let block = match self.peek().kind {
                            TokenKind::Newline | TokenKind::Outdent => None,
                            _ => Some(self.block_expansion()?),
                        };
                        whens.push(When {
                            expr: Some(expr),
                            block,
                            loc: tok.loc,
                        });
                    }
                }
                TokenKind::Default => {
                    let tok = self.advance();
                    let block = Some(self.block_expansion()?);
                    whens.push(When {
                        expr: None,
                        block,
                        loc: tok.loc,
                    });
                }
                _ => return Err(self.unexpected("\"when\", \"default\" or \"newline\"")),
            }
        }
        self.advance();
        Ok(Node::Case {
            expr,
            whens,
            loc: tok.loc,
        })
    }

    /// `: expr` or an indented block.
    fn block_expansion(&mut self) -> Result<Block> {
        if matches!(self.peek().kind, TokenKind::Colon) {
            let tok = self.advance();
            return Ok(match self.parse_expr()? {
                Node::Block(block) => block,
                node => Block::with_nodes(vec![node], self.file.clone(), tok.loc),
            });
        }
        self.block()
    }

    fn parse_each(&mut self) -> Result<Node> {
        let tok = self.advance();
        let TokenKind::Each { val, key, code } = tok.kind else {
            return Err(self.unexpected("\"each\""));
        };
        let block = self.required_block("each")?;
        let alternate = if matches!(self.peek().kind, TokenKind::Else) {
            self.advance();
            Some(self.required_block("else")?)
        } else {
            None
        };
        Ok(Node::Each {
            obj: code,
            val,
            key,
            block,
            alternate,
            loc: tok.loc,
        })
    }

    fn parse_while(&mut self) -> Result<Node> {
        let tok = self.advance();
        let TokenKind::While(test) = tok.kind else {
            return Err(self.unexpected("\"while\""));
        };
        let block = self.required_block("while")?;
        Ok(Node::While {
            test,
            block,
            loc: tok.loc,
        })
    }

    // ── Inheritance and composition ───────────────────────────────────────────

    fn parse_named_block(&mut self) -> Result<Node> {
        let tok = self.advance();
        let TokenKind::Block { name, mode } = tok.kind else {
            return Err(self.unexpected("\"block\""));
        };
        let block = if matches!(self.peek().kind, TokenKind::Indent(_)) {
            self.block()?
        } else {
            self.empty_block(tok.loc)
        };
        Ok(Node::NamedBlock {
            name: name.trim().to_owned(),
            mode,
            block,
            loc: tok.loc,
        })
    }

    fn parse_mixin_block(&mut self) -> Result<Node> {
        let tok = self.advance();
        if self.in_mixin == 0 {
            return Err(self.error_at(
                &tok,
                "PUG:BLOCK_OUTSIDE_MIXIN",
                "Anonymous blocks are not allowed unless they are part of a mixin.",
            ));
        }
        Ok(Node::MixinBlock { loc: tok.loc })
    }

    fn path(&mut self) -> Result<(String, Location)> {
        let tok = self.expect("path", |k| matches!(k, TokenKind::Path(_)))?;
        match tok.kind {
            TokenKind::Path(p) => Ok((p.trim().to_owned(), tok.loc)),
            _ => Err(self.unexpected("\"path\"")),
        }
    }

    fn parse_extends(&mut self) -> Result<Node> {
        let tok = self.advance();
        let (path, loc) = self.path()?;
        Ok(Node::Extends {
            file: FileRef::new(path, loc),
            loc: tok.loc,
        })
    }

    fn parse_include(&mut self) -> Result<Node> {
        let tok = self.advance();
        let mut filters = Vec::new();
        while matches!(self.peek().kind, TokenKind::Filter(_)) {
            let f = self.advance();
            let attrs = if matches!(self.peek().kind, TokenKind::StartAttributes) {
                self.attrs()?
            } else {
                Vec::new()
            };
            if let TokenKind::Filter(name) = f.kind {
                filters.push(IncludeFilter { name, attrs, loc: f.loc });
            }
        }
        let (path, loc) = self.path()?;
        let is_template = filters.is_empty() && path.ends_with(self.extension.as_str());
        let block = if is_template && matches!(self.peek().kind, TokenKind::Indent(_)) {
            self.block()?
        } else if matches!(self.peek().kind, TokenKind::Indent(_)) {
            let next = self.peek();
            return Err(self.error_at(next, "PUG:RAW_INCLUDE_BLOCK", "Raw inclusion cannot contain a block"));
        } else {
            self.empty_block(tok.loc)
        };
        Ok(Node::Include {
            file: FileRef::new(path, loc),
            filters,
            block,
            loc: tok.loc,
        })
    }

    fn parse_mixin(&mut self) -> Result<Node> {
        let tok = self.advance();
        let TokenKind::Mixin { name, args } = tok.kind else {
            return Err(self.unexpected("\"mixin\""));
        };
        if !matches!(self.peek().kind, TokenKind::Indent(_)) {
            return Err(syntax(
                "PUG:MIXIN_WITHOUT_BODY",
                format!("Mixin {name} declared without body"),
                tok.loc.start_line,
                tok.loc.start_col,
            ));
        }
        self.in_mixin += 1;
        let block = self.block();
        self.in_mixin -= 1;
        Ok(Node::MixinDef {
            name,
            params: args,
            block: block?,
            loc: tok.loc,
        })
    }

    fn parse_call(&mut self) -> Result<Node> {
        let tok = self.advance();
        let TokenKind::Call { name, args } = tok.kind else {
            return Err(self.unexpected("\"call\""));
        };
        let name = match name.strip_prefix("#{").and_then(|n| n.strip_suffix('}')) {
            Some(expr) => Name::Interpolated(expr.to_owned()),
            None => Name::Static(name),
        };
        let mut tag = Tag {
            name: name.clone(),
            self_closing: false,
            attrs: Vec::new(),
            attribute_blocks: Vec::new(),
            block: self.empty_block(tok.loc),
            is_inline: false,
            text_only: false,
            loc: tok.loc,
        };
        self.tag_body(&mut tag, false)?;
        let block = (!tag.block.is_empty()).then_some(tag.block);
        Ok(Node::MixinCall {
            name,
            args,
            attrs: tag.attrs,
            attribute_blocks: tag.attribute_blocks,
            block,
            loc: tok.loc,
        })
    }

    fn parse_filter(&mut self) -> Result<Node> {
        let tok = self.advance();
        let TokenKind::Filter(name) = tok.kind else {
            return Err(self.unexpected("\"filter\""));
        };
        let attrs = if matches!(self.peek().kind, TokenKind::StartAttributes) {
            self.attrs()?
        } else {
            Vec::new()
        };
        let block = match self.peek().kind {
            TokenKind::Text(_) => {
                let t = self.advance();
                let value = match t.kind {
                    TokenKind::Text(v) => v,
                    _ => String::new(),
                };
                Block::with_nodes(vec![Node::Text { value, loc: t.loc }], self.file.clone(), t.loc)
            }
            TokenKind::Filter(_) => {
                let inner = self.parse_filter()?;
                Block::with_nodes(vec![inner], self.file.clone(), tok.loc)
            }
            _ => match self.parse_text_block()? {
                Some(block) => block,
                None => self.empty_block(tok.loc),
            },
        };
        Ok(Node::Filter {
            name,
            attrs,
            block,
            loc: tok.loc,
        })
    }

    // ── Tags ──────────────────────────────────────────────────────────────────

    fn parse_tag(&mut self) -> Result<Node> {
        let tok = self.advance();
        let (name, is_inline) = match tok.kind {
            TokenKind::Tag(name) => {
                let inline = INLINE_TAGS.contains(&name.as_str());
                (Name::Static(name), inline)
            }
            TokenKind::InterpolatedTag(expr) => (Name::Interpolated(expr), false),
            _ => return Err(self.unexpected("\"tag\"")),
        };
        let mut tag = Tag {
            name,
            self_closing: false,
            attrs: Vec::new(),
            attribute_blocks: Vec::new(),
            block: self.empty_block(tok.loc),
            is_inline,
            text_only: false,
            loc: tok.loc,
        };
        self.tag_body(&mut tag, true)?;
        Ok(Node::Tag(tag))
    }

    /// `(attrs | .class | #id | &attributes)* '.'? (text | code | ':' expr | '/')? block?`
    fn tag_body(&mut self, tag: &mut Tag, self_closing_allowed: bool) -> Result<()> {
        let mut seen_attrs = false;
        loop {
            match self.peek().kind {
                TokenKind::Id(_) | TokenKind::Class(_) => {
                    let tok = self.advance();
                    let (name, value) = match tok.kind {
                        TokenKind::Id(v) => ("id", v),
                        TokenKind::Class(v) => ("class", v),
                        _ => continue,
                    };
                    tag.attrs.push(Attribute {
                        name: name.to_owned(),
                        value: format!("'{value}'"),
                        escaped: false,
                        loc: tok.loc,
                    });
                }
                TokenKind::StartAttributes => {
                    if seen_attrs {
                        log::warn!(
                            "{}, line {}: you should not have pug tags with multiple attributes",
                            self.file.as_deref().map_or("Pug".into(), |p| p.display().to_string()),
                            self.peek().loc.start_line
                        );
                    }
                    seen_attrs = true;
                    let attrs = self.attrs()?;
                    tag.attrs.extend(attrs);
                }
                TokenKind::AndAttributes(_) => {
                    let tok = self.advance();
                    if let TokenKind::AndAttributes(expr) = tok.kind {
                        tag.attribute_blocks.push(expr);
                    }
                }
                _ => break,
            }
        }

        let text_only = matches!(self.peek().kind, TokenKind::Dot);
        if text_only {
            self.advance();
            tag.text_only = true;
        }

        match self.peek().kind {
            TokenKind::Text(_) | TokenKind::InterpolatedCode { .. } => match self.parse_text(false)? {
                Node::Block(block) => tag.block.nodes.extend(block.nodes),
                node => tag.block.nodes.push(node),
            },
            TokenKind::Code { .. } => {
                let code = self.parse_code(true)?;
                tag.block.nodes.push(code);
            }
            TokenKind::Colon => {
                let tok = self.advance();
                tag.block = match self.parse_expr()? {
                    Node::Block(block) => block,
                    node => Block::with_nodes(vec![node], self.file.clone(), tok.loc),
                };
            }
            TokenKind::Newline
            | TokenKind::Indent(_)
            | TokenKind::Outdent
            | TokenKind::Eof
            | TokenKind::StartPipelessText
            | TokenKind::EndInterpolation => {}
            TokenKind::Slash if self_closing_allowed => {
                self.advance();
                tag.self_closing = true;
            }
            _ => {
                let expected = if self_closing_allowed {
                    "`text`, `interpolated-code`, `code`, `:`, `slash`, `newline` or `eos`"
                } else {
                    "`text`, `interpolated-code`, `code`, `:`, `newline` or `eos`"
                };
                return Err(self.unexpected(expected));
            }
        }

        while matches!(self.peek().kind, TokenKind::Newline) {
            self.advance();
        }

        if text_only {
            let loc = tag.loc;
            tag.block = self.parse_text_block()?.unwrap_or_else(|| self.empty_block(loc));
        } else if matches!(self.peek().kind, TokenKind::Indent(_)) {
            let block = self.block()?;
            tag.block.nodes.extend(block.nodes);
        }
        Ok(())
    }

    /// `start-attributes attribute* end-attributes`
    fn attrs(&mut self) -> Result<Vec<Attribute>> {
        self.expect("start-attributes", |k| matches!(k, TokenKind::StartAttributes))?;
        let mut attrs = Vec::new();
        while matches!(self.peek().kind, TokenKind::Attribute { .. }) {
            let tok = self.advance();
            if let TokenKind::Attribute { name, value, escaped } = tok.kind {
                attrs.push(Attribute {
                    name,
                    value: value.unwrap_or_else(|| "true".to_owned()),
                    escaped,
                    loc: tok.loc,
                });
            }
        }
        self.expect("end-attributes", |k| matches!(k, TokenKind::EndAttributes))?;
        Ok(attrs)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BlockMode;
    use crate::lexer::lex;

    fn ast(src: &str) -> Block {
        parse(lex(src, &[]).unwrap(), None, &[]).unwrap()
    }

    fn parse_err(src: &str) -> Error {
        parse(lex(src, &[]).unwrap(), None, &[]).unwrap_err()
    }

    fn only(block: &Block) -> &Node {
        assert_eq!(block.nodes.len(), 1, "{:#?}", block.nodes);
        &block.nodes[0]
    }

    #[test]
    fn tag_with_shorthand_and_attributes_keeps_order() {
        let root = ast("a.btn#go(href='/x' class='y')&attributes(extra) Go");
        let Node::Tag(tag) = only(&root) else { panic!() };
        let names: Vec<_> = tag.attrs.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["class", "id", "href", "class"]);
        assert_eq!(tag.attrs[0].value, "'btn'");
        assert_eq!(tag.attribute_blocks, ["extra"]);
        assert!(tag.is_inline);
        assert!(matches!(only(&tag.block), Node::Text { value, .. } if value == "Go"));
    }

    #[test]
    fn duplicate_attributes_survive_parsing() {
        let root = ast("div(title='a')(title='b')");
        let Node::Tag(tag) = only(&root) else { panic!() };
        assert_eq!(tag.attrs.len(), 2);
    }

    #[test]
    fn leading_class_implies_div() {
        let root = ast(".box text");
        let Node::Tag(tag) = only(&root) else { panic!() };
        assert_eq!(tag.name, Name::Static("div".into()));
    }

    #[test]
    fn block_expansion_nests_single_child() {
        let root = ast("ul: li: a(href='#') x");
        let Node::Tag(ul) = only(&root) else { panic!() };
        let Node::Tag(li) = only(&ul.block) else { panic!() };
        let Node::Tag(a) = only(&li.block) else { panic!() };
        assert_eq!(a.name.as_static(), Some("a"));
    }

    #[test]
    fn piped_text_lines_join_with_newlines() {
        let root = ast("p\n  | one\n  | two");
        let Node::Tag(p) = only(&root) else { panic!() };
        let values: Vec<_> = p
            .block
            .nodes
            .iter()
            .map(|n| match n {
                Node::Text { value, .. } => value.as_str(),
                _ => "?",
            })
            .collect();
        assert_eq!(values, ["one", "\n", "two"]);
    }

    #[test]
    fn conditional_chain() {
        let root = ast("if a\n  p 1\nelse if b\n  p 2\nelse\n  p 3");
        let Node::Conditional { test, alternate, .. } = only(&root) else { panic!() };
        assert_eq!(test, "a");
        let Some(alt) = alternate else { panic!() };
        let Node::Conditional { test, alternate, .. } = alt.as_ref() else { panic!() };
        assert_eq!(test, "b");
        assert!(matches!(alternate.as_deref(), Some(Node::Block(_))));
    }

    #[test]
    fn unless_negates() {
        let root = ast("unless done\n  p todo");
        assert!(matches!(only(&root), Node::Conditional { test, .. } if test == "!(done)"));
    }

    #[test]
    fn control_keywords_require_blocks() {
        for src in ["if a", "each x in xs", "while n", "if a\n  p\nelse"] {
            assert_eq!(parse_err(src).code(), "PUG:EXPECTED_BLOCK", "{src}");
        }
    }

    #[test]
    fn each_with_else() {
        let root = ast("each x, i in xs\n  li= x\nelse\n  li none");
        let Node::Each { val, key, obj, alternate, .. } = only(&root) else { panic!() };
        assert_eq!((val.as_str(), key.as_deref(), obj.as_str()), ("x", Some("i"), "xs"));
        assert!(alternate.is_some());
    }

    #[test]
    fn case_with_fallthrough_and_default() {
        let root = ast("case n\n  when 1\n  when 2: p low\n  default\n    p high");
        let Node::Case { whens, .. } = only(&root) else { panic!() };
        assert_eq!(whens.len(), 3);
        assert!(whens[0].block.is_none());
        assert!(whens[1].block.is_some());
        assert!(whens[2].expr.is_none());
    }

    #[test]
    fn mixins() {
        let root = ast("mixin item(name, ...rest)\n  li(class=name)\n    block\n+item('a', 1)(class='x')\n  span inner");
        let Node::MixinDef { name, params, .. } = &root.nodes[0] else { panic!() };
        assert_eq!((name.as_str(), params.as_deref()), ("item", Some("name, ...rest")));
        let Node::MixinCall { args, attrs, block, .. } = &root.nodes[1] else { panic!() };
        assert_eq!(args.as_deref(), Some("'a', 1"));
        assert_eq!(attrs[0].name, "class");
        assert!(block.is_some());
    }

    #[test]
    fn mixin_block_outside_mixin_fails() {
        assert_eq!(parse_err("div\n  block").code(), "PUG:BLOCK_OUTSIDE_MIXIN");
    }

    #[test]
    fn named_blocks_extends_and_includes() {
        let root = ast("extends layout.pug\nblock append head\n  script\ninclude:md notes.md\ninclude part.pug\n  p y");
        assert!(matches!(&root.nodes[0], Node::Extends { file, .. } if file.path == "layout.pug"));
        assert!(matches!(&root.nodes[1], Node::NamedBlock { mode: BlockMode::Append, name, .. } if name == "head"));
        assert!(matches!(&root.nodes[2], Node::Include { filters, .. } if filters[0].name == "md"));
        assert!(matches!(&root.nodes[3], Node::Include { block, .. } if block.nodes.len() == 1));
    }

    #[test]
    fn raw_include_cannot_have_block() {
        assert_eq!(parse_err("include style.css\n  p").code(), "PUG:RAW_INCLUDE_BLOCK");
    }

    #[test]
    fn filters_nest() {
        let root = ast(":outer:inner(opt=1)\n  body text");
        let Node::Filter { name, block, .. } = only(&root) else { panic!() };
        assert_eq!(name, "outer");
        let Node::Filter { name, attrs, block, .. } = only(block) else { panic!() };
        assert_eq!((name.as_str(), attrs.len()), ("inner", 1));
        assert!(matches!(only(block), Node::Text { value, .. } if value == "body text"));
    }

    #[test]
    fn block_comment_and_text_block() {
        let root = ast("//\n  note\nscript.\n  if (a) b();");
        assert!(matches!(&root.nodes[0], Node::BlockComment { block, .. } if block.nodes.len() == 1));
        let Node::Tag(script) = &root.nodes[1] else { panic!() };
        assert!(matches!(only(&script.block), Node::Text { value, .. } if value == "if (a) b();"));
    }

    #[test]
    fn html_lines_join() {
        let root = ast("<ul>\n  <li>x</li>\n</ul>");
        assert!(matches!(only(&root), Node::Text { value, .. } if value == "<ul>\n<li>x</li>\n</ul>"));
    }

    #[test]
    fn inline_tag_interpolation() {
        let root = ast("p a #[strong b] c");
        let Node::Tag(p) = only(&root) else { panic!() };
        assert_eq!(p.block.nodes.len(), 3);
        assert!(matches!(&p.block.nodes[1], Node::Tag(t) if t.name.as_static() == Some("strong")));
    }

    #[test]
    fn unexpected_token_names_it() {
        let err = parse_err("else\n  p");
        assert_eq!(err.code(), "PUG:INVALID_TOKEN");
        assert!(err.to_string().contains("else"));
    }

    #[test]
    fn mixin_without_body_points_at_the_declaration() {
        let err = parse_err("p\nmixin card\np");
        assert_eq!(err.code(), "PUG:MIXIN_WITHOUT_BODY");
        let d = err.diagnostic().unwrap();
        assert_eq!((d.line, d.column), (2, 1));
        assert!(d.message.contains("card"));
    }

    #[test]
    fn block_code_collects_lines() {
        let root = ast("-\n  var a = 1\n  var b = 2");
        assert!(matches!(only(&root), Node::Code { code, buffer: false, .. } if code == "var a = 1\nvar b = 2"));
    }
}
