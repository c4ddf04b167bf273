//! Expression lexer, AST, parser, and evaluator.
//!
//! Template authors embed small JavaScript-flavoured expressions in
//! attribute values, `=` code, `#{}` interpolation, conditions, loops and
//! mixin arguments.  This module understands the subset those fragments use:
//! literals (including arrays, objects and template strings), member and
//! index access, calls, the usual unary/binary operators, the ternary, and
//! assignments.  Unbuffered code lines are parsed as a list of statements.
//!
//! Operator precedence (lowest → highest):
//!   assign  →  ternary  →  nullish  →  or  →  and  →  equality  →
//!   relational  →  additive  →  multiplicative  →  unary  →  postfix  →  primary

use std::cmp::Ordering;

use super::builtins;
use super::value::{Object, Value};

// ── EvalContext ───────────────────────────────────────────────────────────────

/// Dependency-injection interface used by the expression evaluator.
///
/// The renderer implements this trait to give expressions access to its
/// scope chain; tests use a flat map.
pub trait EvalContext {
    /// Look up a variable (innermost scope first).
    fn get_var(&self, name: &str) -> Option<Value>;

    /// Assign to the nearest existing binding, creating one when none exists.
    fn set_var(&mut self, name: &str, value: Value);

    /// Declare a binding in the innermost scope (`var`, `let`, `const`).
    fn declare_var(&mut self, name: &str, value: Value);

    /// Invoke a free function such as `String(x)` or `parseInt(s)`.
    fn call_fn(&mut self, name: &str, args: Vec<Value>) -> Result<Value, String> {
        builtins::call_global(name, args).unwrap_or_else(|| Err(format!("{name} is not a function")))
    }
}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    /// Raw body of a backtick template string.
    Template(String),
    Ident(String),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    PlusPlus,
    MinusMinus,

    Eq,       // ==
    StrictEq, // ===
    Ne,       // !=
    StrictNe, // !==
    Lt,
    Le,
    Gt,
    Ge,

    And,     // &&
    Or,      // ||
    Nullish, // ??

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,

    Question,
    Colon,
    Comma,
    Semi,
    Dot,
    Ellipsis,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Eof,
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

struct Lexer {
    src: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Lexer {
            src: src.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, off: usize) -> Option<char> {
        self.src.get(self.pos + off).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn read_number(&mut self, first: char) -> Result<Token, String> {
        let mut s = String::new();
        s.push(first);

        if first == '0' && matches!(self.peek(), Some('x' | 'X')) {
            self.pos += 1;
            let mut hex = String::new();
            while let Some(c) = self.peek().filter(char::is_ascii_hexdigit) {
                hex.push(c);
                self.pos += 1;
            }
            return i64::from_str_radix(&hex, 16)
                .map(|n| Token::Num(n as f64))
                .map_err(|_| format!("invalid hex literal 0x{hex}"));
        }

        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            s.push(c);
            self.pos += 1;
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            s.push('.');
            self.pos += 1;
            while let Some(c) = self.peek().filter(char::is_ascii_digit) {
                s.push(c);
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            s.push('e');
            self.pos += 1;
            if let Some(sign @ ('+' | '-')) = self.peek() {
                s.push(sign);
                self.pos += 1;
            }
            while let Some(c) = self.peek().filter(char::is_ascii_digit) {
                s.push(c);
                self.pos += 1;
            }
        }
        if self.peek().is_some_and(is_ident_char) {
            return Err(format!("invalid number literal {s}{}", self.src[self.pos]));
        }
        s.parse().map(Token::Num).map_err(|_| format!("invalid number literal {s}"))
    }

    fn read_string(&mut self, quote: char) -> Result<Token, String> {
        let mut s = String::new();
        loop {
            match self.advance() {
                None | Some('\n') => return Err("unterminated string literal".into()),
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('0') => s.push('\0'),
                    Some('u') => s.push(self.read_unicode_escape()?),
                    Some('\n') => {}
                    Some(c) => s.push(c),
                    None => return Err("unterminated string literal".into()),
                },
                Some(c) if c == quote => return Ok(Token::Str(s)),
                Some(c) => s.push(c),
            }
        }
    }

    fn read_unicode_escape(&mut self) -> Result<char, String> {
        let mut hex = String::new();
        if self.eat('{') {
            while let Some(c) = self.advance() {
                if c == '}' {
                    break;
                }
                hex.push(c);
            }
        } else {
            for _ in 0..4 {
                hex.extend(self.advance());
            }
        }
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| format!("invalid unicode escape \\u{hex}"))
    }

    /// Read a backtick string verbatim; `${...}` parts are split by the parser.
    fn read_template(&mut self) -> Result<Token, String> {
        let mut s = String::new();
        let mut depth = 0usize;
        loop {
            match self.advance() {
                None => return Err("unterminated template literal".into()),
                Some('\\') => {
                    s.push('\\');
                    s.extend(self.advance());
                }
                Some('`') if depth == 0 => return Ok(Token::Template(s)),
                Some('$') if self.peek() == Some('{') => {
                    self.pos += 1;
                    s.push_str("${");
                    depth += 1;
                }
                Some('{') if depth > 0 => {
                    depth += 1;
                    s.push('{');
                }
                Some('}') if depth > 0 => {
                    depth -= 1;
                    s.push('}');
                }
                Some(c) => s.push(c),
            }
        }
    }

    fn read_ident(&mut self, first: char) -> Token {
        let mut s = String::new();
        s.push(first);
        while let Some(c) = self.peek().filter(|&c| is_ident_char(c)) {
            s.push(c);
            self.pos += 1;
        }
        Token::Ident(s)
    }

    /// Pick `with_eq` when the next char is `=`, else `plain`.
    fn with_eq(&mut self, with_eq: Token, plain: Token) -> Token {
        if self.eat('=') {
            with_eq
        } else {
            plain
        }
    }

    fn next_token(&mut self) -> Result<Token, String> {
        self.skip_ws();
        let ch = match self.advance() {
            None => return Ok(Token::Eof),
            Some(c) => c,
        };

        Ok(match ch {
            '0'..='9' => return self.read_number(ch),
            '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => return self.read_number_fraction(),
            '"' | '\'' => return self.read_string(ch),
            '`' => return self.read_template(),
            c if is_ident_start(c) => self.read_ident(c),
            '+' => {
                if self.eat('+') {
                    Token::PlusPlus
                } else {
                    self.with_eq(Token::PlusAssign, Token::Plus)
                }
            }
            '-' => {
                if self.eat('-') {
                    Token::MinusMinus
                } else {
                    self.with_eq(Token::MinusAssign, Token::Minus)
                }
            }
            '*' => self.with_eq(Token::StarAssign, Token::Star),
            '/' => self.with_eq(Token::SlashAssign, Token::Slash),
            '%' => self.with_eq(Token::PercentAssign, Token::Percent),
            '!' => {
                if self.eat('=') {
                    self.with_eq(Token::StrictNe, Token::Ne)
                } else {
                    Token::Bang
                }
            }
            '=' => {
                if self.eat('=') {
                    self.with_eq(Token::StrictEq, Token::Eq)
                } else if self.peek() == Some('>') {
                    return Err("arrow functions are not supported".into());
                } else {
                    Token::Assign
                }
            }
            '<' => self.with_eq(Token::Le, Token::Lt),
            '>' => self.with_eq(Token::Ge, Token::Gt),
            '&' if self.eat('&') => Token::And,
            '|' if self.eat('|') => Token::Or,
            '?' => {
                if self.eat('?') {
                    Token::Nullish
                } else {
                    Token::Question
                }
            }
            '.' => {
                if self.peek() == Some('.') && self.peek_at(1) == Some('.') {
                    self.pos += 2;
                    Token::Ellipsis
                } else {
                    Token::Dot
                }
            }
            ':' => Token::Colon,
            ',' => Token::Comma,
            ';' => Token::Semi,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            c => return Err(format!("unexpected character {c:?}")),
        })
    }

    /// `.5`: re-read from the dot as if it were `0.5`.
    fn read_number_fraction(&mut self) -> Result<Token, String> {
        self.pos -= 1;
        self.read_number('0')
    }

    fn tokenize(mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        loop {
            let t = self.next_token()?;
            let done = t == Token::Eof;
            tokens.push(t);
            if done {
                return Ok(tokens);
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// A piece of a backtick template string.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Str(String),
    Expr(Expr),
}

/// An entry of an object literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Field(String, Expr),
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Object(Vec<Property>),
    Template(Vec<TemplatePart>),
    Var(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    /// `...expr` inside an array literal or argument list.
    Spread(Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(Box<Expr>, AssignOp, Box<Expr>),
    /// `++x`, `x--`, …
    Update {
        target: Box<Expr>,
        delta: f64,
        prefix: bool,
    },
}

impl Expr {
    fn is_assignable(&self) -> bool {
        matches!(self, Expr::Var(_) | Expr::Member(..) | Expr::Index(..))
    }
}

/// Declaration keyword of a [`Stmt::Declare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

/// One statement of an unbuffered code line.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Declare(DeclKind, Vec<(String, Option<Expr>)>),
    Expr(Expr),
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), String> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(format!("expected {what}, found {}", describe(self.peek())))
        }
    }

    fn expect_end(&self) -> Result<(), String> {
        match self.peek() {
            Token::Eof => Ok(()),
            t => Err(format!("unexpected {}", describe(t))),
        }
    }

    // ── Statements ────────────────────────────────────────────────────────────

    fn parse_statements(&mut self) -> Result<Vec<Stmt>, String> {
        let mut stmts = Vec::new();
        loop {
            while self.eat(&Token::Semi) {}
            if self.peek() == &Token::Eof {
                return Ok(stmts);
            }
            stmts.push(self.parse_statement()?);
        }
    }

    fn parse_statement(&mut self) -> Result<Stmt, String> {
        let kind = match self.peek() {
            Token::Ident(s) if s == "var" => Some(DeclKind::Var),
            Token::Ident(s) if s == "let" => Some(DeclKind::Let),
            Token::Ident(s) if s == "const" => Some(DeclKind::Const),
            _ => None,
        };
        let Some(kind) = kind else {
            return Ok(Stmt::Expr(self.parse_assign()?));
        };
        self.pos += 1;

        let mut decls = Vec::new();
        loop {
            let name = match self.advance() {
                Token::Ident(n) if !is_reserved(&n) => n,
                t => return Err(format!("expected variable name, found {}", describe(&t))),
            };
            let init = if self.eat(&Token::Assign) {
                Some(self.parse_assign()?)
            } else if kind == DeclKind::Const {
                return Err(format!("missing initializer in const declaration of {name}"));
            } else {
                None
            };
            decls.push((name, init));
            if !self.eat(&Token::Comma) {
                return Ok(Stmt::Declare(kind, decls));
            }
        }
    }

    // ── Expressions ───────────────────────────────────────────────────────────

    fn parse_assign(&mut self) -> Result<Expr, String> {
        let lhs = self.parse_ternary()?;
        let op = match self.peek() {
            Token::Assign => AssignOp::Set,
            Token::PlusAssign => AssignOp::Add,
            Token::MinusAssign => AssignOp::Sub,
            Token::StarAssign => AssignOp::Mul,
            Token::SlashAssign => AssignOp::Div,
            Token::PercentAssign => AssignOp::Rem,
            _ => return Ok(lhs),
        };
        if !lhs.is_assignable() {
            return Err("invalid assignment target".into());
        }
        self.pos += 1;
        let rhs = self.parse_assign()?;
        Ok(Expr::Assign(Box::new(lhs), op, Box::new(rhs)))
    }

    fn parse_ternary(&mut self) -> Result<Expr, String> {
        let cond = self.parse_nullish()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.parse_assign()?;
        self.expect(&Token::Colon, "':' in conditional expression")?;
        let else_ = self.parse_assign()?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(else_)))
    }

    fn parse_nullish(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_or()?;
        while self.eat(&Token::Nullish) {
            let rhs = self.parse_or()?;
            lhs = Expr::Binary(BinOp::Nullish, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinOp::Eq,
                Token::Ne => BinOp::Ne,
                Token::StrictEq => BinOp::StrictEq,
                Token::StrictNe => BinOp::StrictNe,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            Token::Bang => UnaryOp::Not,
            Token::Ident(s) if s == "typeof" => UnaryOp::TypeOf,
            Token::PlusPlus | Token::MinusMinus => {
                let delta = if self.advance() == Token::PlusPlus { 1.0 } else { -1.0 };
                let target = self.parse_unary()?;
                if !target.is_assignable() {
                    return Err("invalid increment/decrement operand".into());
                }
                return Ok(Expr::Update {
                    target: Box::new(target),
                    delta,
                    prefix: true,
                });
            }
            _ => return self.parse_postfix(),
        };
        self.pos += 1;
        Ok(Expr::Unary(op, Box::new(self.parse_unary()?)))
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let expr = self.parse_call()?;
        let delta = match self.peek() {
            Token::PlusPlus => 1.0,
            Token::MinusMinus => -1.0,
            _ => return Ok(expr),
        };
        if !expr.is_assignable() {
            return Err("invalid increment/decrement operand".into());
        }
        self.pos += 1;
        Ok(Expr::Update {
            target: Box::new(expr),
            delta,
            prefix: false,
        })
    }

    fn parse_call(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            expr = match self.peek() {
                Token::Dot => {
                    self.pos += 1;
                    match self.advance() {
                        Token::Ident(name) => Expr::Member(Box::new(expr), name),
                        t => return Err(format!("expected property name, found {}", describe(&t))),
                    }
                }
                Token::LBracket => {
                    self.pos += 1;
                    let key = self.parse_assign()?;
                    self.expect(&Token::RBracket, "']'")?;
                    Expr::Index(Box::new(expr), Box::new(key))
                }
                Token::LParen => {
                    self.pos += 1;
                    let args = self.parse_list(&Token::RParen)?;
                    Expr::Call(Box::new(expr), args)
                }
                _ => return Ok(expr),
            };
        }
    }

    /// Comma-separated list (with spreads and an optional trailing comma)
    /// up to and including `close`.
    fn parse_list(&mut self, close: &Token) -> Result<Vec<Expr>, String> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.parse_list_item()?);
            if !self.eat(&Token::Comma) {
                self.expect(close, &format!("{} or ','", describe(close)))?;
                return Ok(items);
            }
        }
    }

    fn parse_list_item(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Ellipsis) {
            Ok(Expr::Spread(Box::new(self.parse_assign()?)))
        } else {
            self.parse_assign()
        }
    }

    fn parse_object(&mut self) -> Result<Expr, String> {
        let mut props = Vec::new();
        loop {
            if self.eat(&Token::RBrace) {
                return Ok(Expr::Object(props));
            }
            if self.eat(&Token::Ellipsis) {
                props.push(Property::Spread(self.parse_assign()?));
            } else {
                let key = match self.advance() {
                    Token::Ident(s) | Token::Str(s) => s,
                    Token::Num(n) => Value::Number(n).to_string(),
                    t => return Err(format!("expected property name, found {}", describe(&t))),
                };
                let value = if self.eat(&Token::Colon) {
                    self.parse_assign()?
                } else {
                    Expr::Var(key.clone())
                };
                props.push(Property::Field(key, value));
            }
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBrace, "'}' or ','")?;
                return Ok(Expr::Object(props));
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Token::Num(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Template(raw) => parse_template(&raw),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                "undefined" => Expr::Literal(Value::Undefined),
                "NaN" => Expr::Literal(Value::Number(f64::NAN)),
                "Infinity" => Expr::Literal(Value::Number(f64::INFINITY)),
                n if is_reserved(n) => return Err(format!("unexpected keyword {n}")),
                _ => Expr::Var(name),
            }),
            Token::LParen => {
                let inner = self.parse_assign()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::Array(self.parse_list(&Token::RBracket)?)),
            Token::LBrace => self.parse_object(),
            t => Err(format!("unexpected {}", describe(&t))),
        }
    }
}

fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "var" | "let" | "const" | "typeof" | "function" | "return" | "if" | "else" | "for"
            | "while" | "new" | "delete" | "in" | "instanceof" | "this" | "class"
    )
}

fn describe(t: &Token) -> String {
    match t {
        Token::Eof => "end of input".into(),
        Token::Num(n) => format!("number {}", Value::Number(*n)),
        Token::Str(s) => format!("string {s:?}"),
        Token::Template(_) => "template string".into(),
        Token::Ident(s) => format!("identifier {s}"),
        Token::RParen => "')'".into(),
        Token::RBracket => "']'".into(),
        Token::RBrace => "'}'".into(),
        other => format!("{other:?}"),
    }
}

/// Split a template string body into literal and `${}` parts.
fn parse_template(raw: &str) -> Result<Expr, String> {
    let mut parts = Vec::new();
    let mut lit = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => lit.push('\n'),
                Some('t') => lit.push('\t'),
                Some(other) => lit.push(other),
                None => {}
            },
            '$' if chars.peek() == Some(&'{') => {
                chars.next();
                let mut inner = String::new();
                let mut depth = 1usize;
                for c in chars.by_ref() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    inner.push(c);
                }
                if depth != 0 {
                    return Err("unterminated ${ in template literal".into());
                }
                if !lit.is_empty() {
                    parts.push(TemplatePart::Str(std::mem::take(&mut lit)));
                }
                parts.push(TemplatePart::Expr(parse_expr(&inner)?));
            }
            c => lit.push(c),
        }
    }
    if !lit.is_empty() {
        parts.push(TemplatePart::Str(lit));
    }
    Ok(Expr::Template(parts))
}

/// Parse a single expression; trailing input is an error.
pub fn parse_expr(src: &str) -> Result<Expr, String> {
    let mut parser = Parser::new(Lexer::new(src).tokenize()?);
    let expr = parser.parse_assign()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse the body of an unbuffered code line (`- var x = 1; x++`).
pub fn parse_statements(src: &str) -> Result<Vec<Stmt>, String> {
    Parser::new(Lexer::new(src).tokenize()?).parse_statements()
}

/// Parse a comma-separated argument list such as `a, 'b', ...rest`.
pub fn parse_args(src: &str) -> Result<Vec<Expr>, String> {
    let mut parser = Parser::new(Lexer::new(src).tokenize()?);
    let mut args = Vec::new();
    while parser.peek() != &Token::Eof {
        args.push(parser.parse_list_item()?);
        if !parser.eat(&Token::Comma) {
            parser.expect_end()?;
        }
    }
    Ok(args)
}

/// Parse a mixin parameter list: plain names plus an optional trailing
/// `...rest` parameter.
pub fn parse_params(src: &str) -> Result<(Vec<String>, Option<String>), String> {
    let mut names = Vec::new();
    let mut rest = None;
    for raw in src.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if rest.is_some() {
            return Err("rest parameter must be last".into());
        }
        let (name, is_rest) = match raw.strip_prefix("...") {
            Some(r) => (r.trim(), true),
            None => (raw, false),
        };
        let mut cs = name.chars();
        let valid = cs.next().is_some_and(is_ident_start) && cs.all(is_ident_char) && !is_reserved(name);
        if !valid {
            return Err(format!("invalid parameter name {raw:?}"));
        }
        if is_rest {
            rest = Some(name.to_owned());
        } else {
            names.push(name.to_owned());
        }
    }
    Ok((names, rest))
}

/// `true` when `src` parses as one complete expression.
pub fn is_expression(src: &str) -> bool {
    parse_expr(src).is_ok()
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Evaluate an [`Expr`] AST node against the given context.
pub fn eval_expr(expr: &Expr, ctx: &mut dyn EvalContext) -> Result<Value, String> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),

        Expr::Array(items) => Ok(Value::Array(eval_list(items, ctx)?)),

        Expr::Object(props) => {
            let mut map = Object::new();
            for prop in props {
                match prop {
                    Property::Field(k, e) => {
                        let v = eval_expr(e, ctx)?;
                        map.insert(k.clone(), v);
                    }
                    Property::Spread(e) => match eval_expr(e, ctx)? {
                        Value::Object(other) => map.extend(other),
                        Value::Array(items) => {
                            map.extend(items.into_iter().enumerate().map(|(i, v)| (i.to_string(), v)))
                        }
                        _ => {}
                    },
                }
            }
            Ok(Value::Object(map))
        }

        Expr::Template(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    TemplatePart::Str(s) => out.push_str(s),
                    TemplatePart::Expr(e) => out.push_str(&eval_expr(e, ctx)?.to_string()),
                }
            }
            Ok(Value::Str(out))
        }

        Expr::Var(name) => Ok(ctx.get_var(name).unwrap_or_default()),

        Expr::Member(obj, key) => {
            if let Some(v) = global_member(obj, key, ctx) {
                return Ok(v);
            }
            eval_expr(obj, ctx)?.get_member(key)
        }

        Expr::Index(obj, key) => {
            let target = eval_expr(obj, ctx)?;
            let key = eval_expr(key, ctx)?;
            target.get_member(&key.to_property_key())
        }

        Expr::Call(callee, args) => eval_call(callee, args, ctx),

        Expr::Spread(_) => Err("unexpected spread".into()),

        Expr::Unary(op, inner) => {
            let v = eval_expr(inner, ctx)?;
            Ok(match op {
                UnaryOp::Neg => v.arith_neg(),
                UnaryOp::Plus => Value::Number(v.to_number()),
                UnaryOp::Not => Value::Bool(!v.truthy()),
                UnaryOp::TypeOf => Value::from(v.type_of()),
            })
        }

        Expr::Binary(op, lhs, rhs) => {
            let l = eval_expr(lhs, ctx)?;
            // Short-circuit
            match op {
                BinOp::And if !l.truthy() => return Ok(l),
                BinOp::Or if l.truthy() => return Ok(l),
                BinOp::Nullish if !l.is_nullish() => return Ok(l),
                BinOp::And | BinOp::Or | BinOp::Nullish => return eval_expr(rhs, ctx),
                _ => {}
            }
            let r = eval_expr(rhs, ctx)?;
            Ok(eval_binop(*op, &l, &r))
        }

        Expr::Ternary(cond, then, else_) => {
            if eval_expr(cond, ctx)?.truthy() {
                eval_expr(then, ctx)
            } else {
                eval_expr(else_, ctx)
            }
        }

        Expr::Assign(target, op, rhs) => {
            let place = resolve_place(target, ctx)?;
            let rval = eval_expr(rhs, ctx)?;
            let new_val = match op {
                AssignOp::Set => rval,
                _ => {
                    let cur = read_place(&place, ctx)?;
                    match op {
                        AssignOp::Add => cur.arith_add(&rval),
                        AssignOp::Sub => cur.arith_sub(&rval),
                        AssignOp::Mul => cur.arith_mul(&rval),
                        AssignOp::Div => cur.arith_div(&rval),
                        AssignOp::Rem => cur.arith_rem(&rval),
                        AssignOp::Set => unreachable!(),
                    }
                }
            };
            write_place(&place, new_val.clone(), ctx)?;
            Ok(new_val)
        }

        Expr::Update { target, delta, prefix } => {
            let place = resolve_place(target, ctx)?;
            let old = read_place(&place, ctx)?.to_number();
            let new = old + delta;
            write_place(&place, Value::Number(new), ctx)?;
            Ok(Value::Number(if *prefix { new } else { old }))
        }
    }
}

fn eval_binop(op: BinOp, l: &Value, r: &Value) -> Value {
    match op {
        BinOp::Add => l.arith_add(r),
        BinOp::Sub => l.arith_sub(r),
        BinOp::Mul => l.arith_mul(r),
        BinOp::Div => l.arith_div(r),
        BinOp::Rem => l.arith_rem(r),
        BinOp::Eq => Value::Bool(l.loose_eq(r)),
        BinOp::Ne => Value::Bool(!l.loose_eq(r)),
        BinOp::StrictEq => Value::Bool(l.strict_eq(r)),
        BinOp::StrictNe => Value::Bool(!l.strict_eq(r)),
        BinOp::Lt => Value::Bool(l.compare(r) == Some(Ordering::Less)),
        BinOp::Le => Value::Bool(matches!(l.compare(r), Some(Ordering::Less | Ordering::Equal))),
        BinOp::Gt => Value::Bool(l.compare(r) == Some(Ordering::Greater)),
        BinOp::Ge => Value::Bool(matches!(l.compare(r), Some(Ordering::Greater | Ordering::Equal))),
        BinOp::And | BinOp::Or | BinOp::Nullish => unreachable!("handled by the caller"),
    }
}

/// Evaluate a list, expanding `...spread` items.
pub fn eval_list(items: &[Expr], ctx: &mut dyn EvalContext) -> Result<Vec<Value>, String> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Expr::Spread(inner) => match eval_expr(inner, ctx)? {
                Value::Array(vs) => out.extend(vs),
                Value::Str(s) => out.extend(s.chars().map(|c| Value::Str(c.to_string()))),
                Value::Undefined | Value::Null => {
                    return Err("spread of a null or undefined value".into());
                }
                other => out.push(other),
            },
            e => out.push(eval_expr(e, ctx)?),
        }
    }
    Ok(out)
}

/// `Math.PI` and friends, unless the template shadows the namespace.
fn global_member(obj: &Expr, key: &str, ctx: &dyn EvalContext) -> Option<Value> {
    match obj {
        Expr::Var(ns) if ctx.get_var(ns).is_none() => builtins::global_property(ns, key),
        _ => None,
    }
}

fn eval_call(callee: &Expr, args: &[Expr], ctx: &mut dyn EvalContext) -> Result<Value, String> {
    match callee {
        Expr::Var(name) => {
            let args = eval_list(args, ctx)?;
            ctx.call_fn(name, args)
        }
        Expr::Member(obj, method) => {
            if let Expr::Var(ns) = obj.as_ref() {
                if ctx.get_var(ns).is_none() && builtins::is_namespace(ns) {
                    let args = eval_list(args, ctx)?;
                    return builtins::call_global(&format!("{ns}.{method}"), args)
                        .unwrap_or_else(|| Err(format!("{ns}.{method} is not a function")));
                }
            }
            if builtins::is_mutating_method(method) && obj.is_assignable() {
                let place = resolve_place(obj, ctx)?;
                let mut target = read_place(&place, ctx)?;
                let args = eval_list(args, ctx)?;
                let result = builtins::call_mutating_method(&mut target, method, args)?;
                write_place(&place, target, ctx)?;
                return Ok(result);
            }
            let recv = eval_expr(obj, ctx)?;
            let args = eval_list(args, ctx)?;
            builtins::call_method(&recv, method, args)
        }
        other => {
            let v = eval_expr(other, ctx)?;
            Err(format!("{} is not a function", v.type_of()))
        }
    }
}

// ── Assignment targets ────────────────────────────────────────────────────────

/// A variable name plus the property path below it.
struct Place {
    root: String,
    path: Vec<String>,
}

fn resolve_place(target: &Expr, ctx: &mut dyn EvalContext) -> Result<Place, String> {
    match target {
        Expr::Var(name) => Ok(Place {
            root: name.clone(),
            path: Vec::new(),
        }),
        Expr::Member(obj, key) => {
            let mut place = resolve_place(obj, ctx)?;
            place.path.push(key.clone());
            Ok(place)
        }
        Expr::Index(obj, key) => {
            let mut place = resolve_place(obj, ctx)?;
            place.path.push(eval_expr(key, ctx)?.to_property_key());
            Ok(place)
        }
        _ => Err("invalid assignment target".into()),
    }
}

fn read_place(place: &Place, ctx: &dyn EvalContext) -> Result<Value, String> {
    let mut v = ctx.get_var(&place.root).unwrap_or_default();
    for key in &place.path {
        v = v.get_member(key)?;
    }
    Ok(v)
}

fn write_place(place: &Place, value: Value, ctx: &mut dyn EvalContext) -> Result<(), String> {
    if place.path.is_empty() {
        ctx.set_var(&place.root, value);
        return Ok(());
    }
    let mut base = ctx.get_var(&place.root).unwrap_or_default();
    set_path(&mut base, &place.path, value)?;
    ctx.set_var(&place.root, base);
    Ok(())
}

fn set_path(target: &mut Value, path: &[String], value: Value) -> Result<(), String> {
    match path {
        [] => {
            *target = value;
            Ok(())
        }
        [key] => target.set_member(key, value),
        [key, rest @ ..] => {
            let child = match target {
                Value::Object(map) => map.get_mut(key.as_str()),
                Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
                _ => None,
            };
            match child {
                Some(child) => set_path(child, rest, value),
                None => Err(format!("Cannot set properties of undefined (setting '{}')", rest[0])),
            }
        }
    }
}

// ── Statements ────────────────────────────────────────────────────────────────

/// Execute parsed statements for their side effects.
pub fn exec_statements(stmts: &[Stmt], ctx: &mut dyn EvalContext) -> Result<(), String> {
    for stmt in stmts {
        match stmt {
            Stmt::Declare(_, decls) => {
                for (name, init) in decls {
                    let v = match init {
                        Some(e) => eval_expr(e, ctx)?,
                        None => Value::Undefined,
                    };
                    ctx.declare_var(name, v);
                }
            }
            Stmt::Expr(e) => {
                eval_expr(e, ctx)?;
            }
        }
    }
    Ok(())
}

// ── Constant folding ──────────────────────────────────────────────────────────

/// Context with no bindings, used to fold constant expressions.
struct NoVars;

impl EvalContext for NoVars {
    fn get_var(&self, _name: &str) -> Option<Value> {
        None
    }
    fn set_var(&mut self, _name: &str, _value: Value) {}
    fn declare_var(&mut self, _name: &str, _value: Value) {}
}

/// `true` when `expr` depends on nothing but literals.
pub fn is_constant(expr: &Expr) -> bool {
    match expr {
        Expr::Literal(_) => true,
        Expr::Array(items) => items.iter().all(is_constant),
        Expr::Object(props) => props.iter().all(|p| match p {
            Property::Field(_, e) | Property::Spread(e) => is_constant(e),
        }),
        Expr::Template(parts) => parts.iter().all(|p| match p {
            TemplatePart::Str(_) => true,
            TemplatePart::Expr(e) => is_constant(e),
        }),
        Expr::Spread(e) | Expr::Unary(_, e) => is_constant(e),
        Expr::Binary(_, l, r) => is_constant(l) && is_constant(r),
        Expr::Ternary(c, t, e) => is_constant(c) && is_constant(t) && is_constant(e),
        Expr::Var(_) | Expr::Member(..) | Expr::Index(..) | Expr::Call(..) => false,
        Expr::Assign(..) | Expr::Update { .. } => false,
    }
}

/// Evaluate `expr` at compile time; `None` when it is not constant.
pub fn eval_constant(expr: &Expr) -> Option<Value> {
    if !is_constant(expr) {
        return None;
    }
    eval_expr(expr, &mut NoVars).ok()
}

/// Convenience: parse and evaluate an expression string.
pub fn eval_str(src: &str, ctx: &mut dyn EvalContext) -> Result<Value, String> {
    let expr = parse_expr(src)?;
    eval_expr(&expr, ctx)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    // ── Minimal EvalContext for tests ─────────────────────────────────────────

    struct TestCtx {
        vars: HashMap<String, Value>,
    }

    impl TestCtx {
        fn new() -> Self {
            TestCtx { vars: HashMap::new() }
        }
        fn with(mut self, k: &str, v: Value) -> Self {
            self.vars.insert(k.into(), v);
            self
        }
    }

    impl EvalContext for TestCtx {
        fn get_var(&self, name: &str) -> Option<Value> {
            self.vars.get(name).cloned()
        }
        fn set_var(&mut self, name: &str, value: Value) {
            self.vars.insert(name.into(), value);
        }
        fn declare_var(&mut self, name: &str, value: Value) {
            self.vars.insert(name.into(), value);
        }
    }

    fn eval(src: &str) -> Value {
        eval_str(src, &mut TestCtx::new()).expect("eval failed")
    }

    fn eval_ctx(src: &str, ctx: &mut TestCtx) -> Value {
        eval_str(src, ctx).expect("eval failed")
    }

    #[test]
    fn literals() {
        assert_eq!(eval("42"), Value::from(42));
        assert_eq!(eval("0x10"), Value::from(16));
        assert_eq!(eval(".5"), Value::from(0.5));
        assert_eq!(eval("'it\\'s'"), Value::from("it's"));
        assert_eq!(eval("\"\\u0041\""), Value::from("A"));
        assert_eq!(eval("null"), Value::Null);
        assert_eq!(eval("[1, 'a', ...[2, 3]]"), Value::from(json!([1, "a", 2, 3])));
        assert_eq!(eval("{a: 1, 'b-c': true,}"), Value::from(json!({"a": 1, "b-c": true})));
    }

    #[test]
    fn arithmetic_and_concat() {
        assert_eq!(eval("2 + 3 * 4"), Value::from(14));
        assert_eq!(eval("(2 + 3) * 4"), Value::from(20));
        assert_eq!(eval("10 / 4"), Value::from(2.5));
        assert_eq!(eval("'a' + 1 + 2"), Value::from("a12"));
        assert_eq!(eval("1 + 2 + 'a'"), Value::from("3a"));
        assert_eq!(eval("-'3'"), Value::from(-3));
    }

    #[test]
    fn logical_operators_return_operands() {
        assert_eq!(eval("0 || 'x'"), Value::from("x"));
        assert_eq!(eval("'a' && 'b'"), Value::from("b"));
        assert_eq!(eval("null ?? 5"), Value::from(5));
        assert_eq!(eval("0 ?? 5"), Value::from(0));
        assert_eq!(eval("!''"), Value::Bool(true));
    }

    #[test]
    fn short_circuit_skips_rhs() {
        let mut ctx = TestCtx::new();
        eval_ctx("true || (x = 1)", &mut ctx);
        assert!(!ctx.vars.contains_key("x"));
    }

    #[test]
    fn comparison_and_equality() {
        assert_eq!(eval("'10' == 10"), Value::Bool(true));
        assert_eq!(eval("'10' === 10"), Value::Bool(false));
        assert_eq!(eval("'b' > 'a'"), Value::Bool(true));
        assert_eq!(eval("1 <= 1"), Value::Bool(true));
        assert_eq!(eval("undefined < 1"), Value::Bool(false));
    }

    #[test]
    fn ternary_and_typeof() {
        assert_eq!(eval("1 ? 'y' : 'n'"), Value::from("y"));
        assert_eq!(eval("typeof missing"), Value::from("undefined"));
        assert_eq!(eval("typeof {}"), Value::from("object"));
    }

    #[test]
    fn member_access() {
        let mut ctx = TestCtx::new().with("user", Value::from(json!({"name": "Ada", "tags": ["x", "y"]})));
        assert_eq!(eval_ctx("user.name", &mut ctx), Value::from("Ada"));
        assert_eq!(eval_ctx("user['tags'][1]", &mut ctx), Value::from("y"));
        assert_eq!(eval_ctx("user.tags.length", &mut ctx), Value::from(2));
        assert!(eval_str("user.missing.deeper", &mut ctx).is_err());
    }

    #[test]
    fn template_literals() {
        let mut ctx = TestCtx::new().with("n", Value::from(3));
        assert_eq!(eval_ctx("`n=${n + 1}!`", &mut ctx), Value::from("n=4!"));
        assert_eq!(eval_ctx("`${ {a: 1}.a }`", &mut ctx), Value::from("1"));
    }

    #[test]
    fn assignment_forms() {
        let mut ctx = TestCtx::new().with("o", Value::from(json!({"a": {"b": 1}})));
        eval_ctx("x = 5", &mut ctx);
        eval_ctx("x += 2", &mut ctx);
        assert_eq!(ctx.vars["x"], Value::from(7));
        eval_ctx("o.a.b = 'z'", &mut ctx);
        assert_eq!(eval_ctx("o.a.b", &mut ctx), Value::from("z"));
        assert_eq!(eval_ctx("x++", &mut ctx), Value::from(7));
        assert_eq!(eval_ctx("++x", &mut ctx), Value::from(9));
    }

    #[test]
    fn invalid_assignment_target() {
        assert!(parse_expr("1 = 2").is_err());
        assert!(parse_expr("(a + b)++").is_err());
    }

    #[test]
    fn statements_declare_and_mutate() {
        let mut ctx = TestCtx::new();
        let stmts = parse_statements("var list = [1]; list.push(2, 3)\nlet n = list.length").unwrap();
        exec_statements(&stmts, &mut ctx).unwrap();
        assert_eq!(ctx.vars["list"], Value::from(json!([1, 2, 3])));
        assert_eq!(ctx.vars["n"], Value::from(3));
        assert!(parse_statements("const x").is_err());
    }

    #[test]
    fn global_namespaces() {
        assert_eq!(eval("Math.max(1, 5, 3)"), Value::from(5));
        assert_eq!(eval("JSON.stringify({a: [1, 'b']})"), Value::from(r#"{"a":[1,"b"]}"#));
        assert_eq!(eval("Object.keys({x: 1, y: 2}).join('|')"), Value::from("x|y"));
        assert_eq!(eval("String(12) + Number('3')"), Value::from("123"));
    }

    #[test]
    fn expression_validity() {
        assert!(is_expression("a + b"));
        assert!(is_expression("'x' + \"y\""));
        assert!(is_expression("{a: 1}"));
        assert!(!is_expression("a b"));
        assert!(!is_expression("'unterminated"));
        assert!(!is_expression("a +"));
        assert!(!is_expression(""));
    }

    #[test]
    fn args_and_params() {
        assert_eq!(parse_args("1, 'a', ...rest").unwrap().len(), 3);
        assert!(parse_args("").unwrap().is_empty());
        assert_eq!(
            parse_params("a, b, ...items").unwrap(),
            (vec!["a".to_string(), "b".to_string()], Some("items".to_string()))
        );
        assert!(parse_params("...a, b").is_err());
        assert!(parse_params("1x").is_err());
    }

    #[test]
    fn constant_folding() {
        assert_eq!(eval_constant(&parse_expr("'a' + 1").unwrap()), Some(Value::from("a1")));
        assert_eq!(eval_constant(&parse_expr("x + 1").unwrap()), None);
        assert_eq!(eval_constant(&parse_expr("{a: [true]}").unwrap()), Some(Value::from(json!({"a": [true]}))));
        assert_eq!(eval_constant(&parse_expr("f()").unwrap()), None);
    }
}
