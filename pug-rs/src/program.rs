//! The generated rendering routine.
//!
//! Code generation produces a [`Program`]: a tree of [`Op`]s that append to
//! an output buffer, with control flow mirroring the template.  Expressions
//! are parsed once at generation time and carried next to their source text,
//! so a program can be executed by [`render`](crate::render) and printed as a
//! deterministic listing (its `Display` impl).

use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::script::{parse_args, parse_expr, parse_statements, Expr, Stmt};

// ── Code ──────────────────────────────────────────────────────────────────────

/// A parsed expression and the text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    pub src: String,
    pub expr: Expr,
}

impl Code {
    pub fn parse(src: &str) -> Result<Self, String> {
        let src = src.trim();
        Ok(Code {
            expr: parse_expr(src)?,
            src: src.to_owned(),
        })
    }
}

/// Statements of an unbuffered code line.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub src: String,
    pub stmts: Vec<Stmt>,
}

impl Script {
    pub fn parse(src: &str) -> Result<Self, String> {
        Ok(Script {
            stmts: parse_statements(src)?,
            src: src.trim().to_owned(),
        })
    }
}

/// A mixin call's argument list.
#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    pub src: String,
    pub exprs: Vec<Expr>,
}

impl Args {
    pub fn parse(src: &str) -> Result<Self, String> {
        Ok(Args {
            exprs: parse_args(src)?,
            src: src.trim().to_owned(),
        })
    }
}

// ── Ops ───────────────────────────────────────────────────────────────────────

/// An attribute entry of an attribute object (`&attributes` merging and
/// mixin call sites).
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectAttr {
    pub name: String,
    pub value: Code,
    pub escape: bool,
}

/// One arm of a `case`.  Fall-through `when`s are folded into the arm that
/// carries their body.
#[derive(Debug, Clone, PartialEq)]
pub struct Arm {
    pub tests: Vec<Code>,
    pub is_default: bool,
    pub body: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixinDef {
    pub name: String,
    pub params: Vec<String>,
    /// `...rest` parameter.
    pub rest: Option<String>,
    pub body: Vec<Op>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MixinName {
    Static(String),
    Dynamic(Code),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixinCall {
    pub name: MixinName,
    pub args: Option<Args>,
    pub attrs: Vec<ObjectAttr>,
    /// `&attributes(...)` expressions of the call.
    pub blocks: Vec<Code>,
    /// The block passed to the mixin.
    pub block: Option<Arc<Vec<Op>>>,
    /// Pretty-mode indentation of the call site.
    pub indent: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Text(String),
    /// Append a value; `null`/`undefined` append nothing.
    Buffer { code: Code, escape: bool },
    Exec(Script),
    /// A dynamic attribute.
    Attr {
        name: String,
        value: Code,
        escape: bool,
        terse: bool,
    },
    /// Every `class` of a tag, joined.
    Class { items: Vec<(Code, bool)>, terse: bool },
    /// Every `style` of a tag, concatenated.
    Style { parts: Vec<Code>, escape: bool, terse: bool },
    /// Attributes merged with `&attributes` objects at render time.
    Attrs {
        attrs: Vec<ObjectAttr>,
        blocks: Vec<Code>,
        terse: bool,
    },
    If {
        test: Code,
        then: Vec<Op>,
        otherwise: Vec<Op>,
    },
    Case { subject: Code, arms: Vec<Arm> },
    Each {
        subject: Code,
        val: String,
        key: Option<String>,
        body: Vec<Op>,
        otherwise: Vec<Op>,
    },
    While { test: Code, body: Vec<Op> },
    Mixin(Arc<MixinDef>),
    Call(Box<MixinCall>),
    /// Render the block passed to the enclosing mixin.
    MixinBlock { indent: Option<String> },
    /// Append the indentation of the enclosing mixin calls.
    MixinIndent,
    /// Source position of the following ops.
    Debug { line: usize, file: Option<Arc<Path>> },
}

// ── Program ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// Identifier of the routine.
    pub name: String,
    pub ops: Vec<Op>,
    /// Locals are reachable only through `self`.
    pub self_namespace: bool,
    /// Names resolved by the runtime instead of the locals.
    pub globals: Vec<String>,
    /// Template sources, for render-time excerpts.  A string template is
    /// keyed by the empty path.
    pub sources: IndexMap<PathBuf, String>,
}

impl Program {
    pub fn new(name: impl Into<String>, ops: Vec<Op>) -> Self {
        Program {
            name: name.into(),
            ops,
            ..Program::default()
        }
    }

    /// Source text of `file` (the root template for `None`).
    pub fn source(&self, file: Option<&Path>) -> Option<&str> {
        let key = file.map(Path::to_path_buf).unwrap_or_default();
        self.sources.get(&key).map(String::as_str)
    }
}

// ── Listing ───────────────────────────────────────────────────────────────────

fn quote(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

struct Listing<'a> {
    out: &'a mut String,
    depth: usize,
}

impl Listing<'_> {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn nested(&mut self, ops: &[Op]) {
        self.depth += 1;
        self.ops(ops);
        self.depth -= 1;
    }

    fn attr_object(attrs: &[ObjectAttr]) -> String {
        let fields: Vec<String> = attrs
            .iter()
            .map(|a| {
                if a.escape {
                    format!("{}: escape({})", quote(&a.name), a.value.src)
                } else {
                    format!("{}: {}", quote(&a.name), a.value.src)
                }
            })
            .collect();
        format!("{{{}}}", fields.join(", "))
    }

    fn ops(&mut self, ops: &[Op]) {
        for op in ops {
            match op {
                Op::Text(s) => self.line(&format!("buf += {};", quote(s))),
                Op::Buffer { code, escape: true } => self.line(&format!("buf += escape({});", code.src)),
                Op::Buffer { code, escape: false } => self.line(&format!("buf += {};", code.src)),
                Op::Exec(script) => self.line(&format!("{};", script.src)),
                Op::Attr {
                    name,
                    value,
                    escape,
                    terse,
                } => self.line(&format!("buf += attr({}, {}, {escape}, {terse});", quote(name), value.src)),
                Op::Class { items, terse } => {
                    let srcs: Vec<&str> = items.iter().map(|(c, _)| c.src.as_str()).collect();
                    let esc: Vec<String> = items.iter().map(|(_, e)| e.to_string()).collect();
                    self.line(&format!(
                        "buf += attr(\"class\", classes([{}], [{}]), false, {terse});",
                        srcs.join(", "),
                        esc.join(", ")
                    ));
                }
                Op::Style { parts, escape, terse } => {
                    let srcs: Vec<&str> = parts.iter().map(|c| c.src.as_str()).collect();
                    self.line(&format!(
                        "buf += attr(\"style\", style([{}]), {escape}, {terse});",
                        srcs.join(", ")
                    ));
                }
                Op::Attrs { attrs, blocks, terse } => {
                    let mut parts = vec![Self::attr_object(attrs)];
                    parts.extend(blocks.iter().map(|b| b.src.clone()));
                    self.line(&format!("buf += attrs(merge([{}]), {terse});", parts.join(", ")));
                }
                Op::If { test, then, otherwise } => {
                    self.line(&format!("if ({}) {{", test.src));
                    self.nested(then);
                    if !otherwise.is_empty() {
                        self.line("} else {");
                        self.nested(otherwise);
                    }
                    self.line("}");
                }
                Op::Case { subject, arms } => {
                    self.line(&format!("switch ({}) {{", subject.src));
                    for arm in arms {
                        for test in &arm.tests {
                            self.line(&format!("case {}:", test.src));
                        }
                        if arm.is_default {
                            self.line("default:");
                        }
                        self.nested(&arm.body);
                        self.depth += 1;
                        self.line("break;");
                        self.depth -= 1;
                    }
                    self.line("}");
                }
                Op::Each {
                    subject,
                    val,
                    key,
                    body,
                    otherwise,
                } => {
                    let key = key.as_deref().map_or(String::new(), |k| format!(", {k}"));
                    self.line(&format!("each ({val}{key} in {}) {{", subject.src));
                    self.nested(body);
                    if !otherwise.is_empty() {
                        self.line("} else {");
                        self.nested(otherwise);
                    }
                    self.line("}");
                }
                Op::While { test, body } => {
                    self.line(&format!("while ({}) {{", test.src));
                    self.nested(body);
                    self.line("}");
                }
                Op::Mixin(def) => {
                    let mut params = def.params.clone();
                    if let Some(rest) = &def.rest {
                        params.push(format!("...{rest}"));
                    }
                    self.line(&format!("mixins[{}] = function({}) {{", quote(&def.name), params.join(", ")));
                    self.nested(&def.body);
                    self.line("};");
                }
                Op::Call(call) => {
                    let name = match &call.name {
                        MixinName::Static(n) => quote(n),
                        MixinName::Dynamic(c) => c.src.clone(),
                    };
                    if let Some(indent) = &call.indent {
                        self.line(&format!("indent.push({});", quote(indent)));
                    }
                    let args = call.args.as_ref().map_or("", |a| a.src.as_str());
                    let mut with = Vec::new();
                    if !call.attrs.is_empty() || !call.blocks.is_empty() {
                        let mut parts = vec![Self::attr_object(&call.attrs)];
                        parts.extend(call.blocks.iter().map(|b| b.src.clone()));
                        with.push(format!("attributes: merge([{}])", parts.join(", ")));
                    }
                    match &call.block {
                        Some(block) => {
                            with.push("block: function() {".to_owned());
                            self.line(&format!("mixins[{name}].call({{{}", with.join(", ")));
                            self.nested(block);
                            self.line(&format!("}}}}, {args});"));
                        }
                        None if !with.is_empty() => {
                            self.line(&format!("mixins[{name}].call({{{}}}, {args});", with.join(", ")));
                        }
                        None => self.line(&format!("mixins[{name}]({args});")),
                    }
                    if call.indent.is_some() {
                        self.line("indent.pop();");
                    }
                }
                Op::MixinBlock { indent } => {
                    if let Some(indent) = indent {
                        self.line(&format!("indent.push({});", quote(indent)));
                    }
                    self.line("block && block();");
                    if indent.is_some() {
                        self.line("indent.pop();");
                    }
                }
                Op::MixinIndent => self.line("buf += indent.join(\"\");"),
                Op::Debug { line, file } => match file {
                    Some(f) => self.line(&format!("// {}:{line}", f.display())),
                    None => self.line(&format!("// line {line}")),
                },
            }
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        let params = if self.self_namespace { "self" } else { "locals" };
        let _ = writeln!(out, "function {}({params}) {{", self.name);
        let mut listing = Listing { out: &mut out, depth: 1 };
        listing.line("var buf = \"\";");
        listing.ops(&self.ops);
        listing.line("return buf;");
        out.push('}');
        f.write_str(&out)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
