//! Code generation: flattened AST to [`Program`].
//!
//! Walks the tree in document order and emits append operations.  Literal
//! markup (tag brackets, constant attributes, text) is folded into
//! [`Op::Text`] runs at generation time; everything that depends on the
//! locals becomes an op that calls the runtime helpers when rendered.
//!
//! Pretty printing follows the usual rules: block-level tags start on a new
//! indented line, phrasing tags stay inline, and the content of `pre` and
//! `textarea` is never re-indented.  Inside mixins the indentation of the
//! call site is added at render time ([`Op::MixinIndent`]).

use std::path::Path;
use std::sync::Arc;

use log::debug;

use crate::ast::{Attribute, Block, Name, Node, Tag, When};
use crate::error::{Diagnostic, Error, Result};
use crate::options::Options;
use crate::program::{Args, Arm, Code, MixinCall, MixinDef, MixinName, ObjectAttr, Op, Program, Script};
use crate::runtime;
use crate::script::expr::eval_constant;
use crate::script::{parse_params, Value};
use crate::token::Location;

/// Void elements: rendered without a closing tag.
pub const SELF_CLOSING: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "command", "embed", "frame", "hr", "image", "img", "input",
    "isindex", "keygen", "link", "menuitem", "meta", "nextid", "param", "source", "track", "wbr",
];

const WHITESPACE_SENSITIVE: &[&str] = &["pre", "textarea"];

/// Markup for a doctype name; unknown names become `<!DOCTYPE name>`.
pub fn doctype_markup(name: &str) -> String {
    let known = match name.to_ascii_lowercase().as_str() {
        "html" => "<!DOCTYPE html>",
        "xml" => r#"<?xml version="1.0" encoding="utf-8" ?>"#,
        "transitional" => r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">"#,
        "strict" => r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">"#,
        "frameset" => r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Frameset//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-frameset.dtd">"#,
        "1.1" => r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#,
        "basic" => r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML Basic 1.1//EN" "http://www.w3.org/TR/xhtml-basic/xhtml-basic11.dtd">"#,
        "mobile" => r#"<!DOCTYPE html PUBLIC "-//WAPFORUM//DTD XHTML Mobile 1.2//EN" "http://www.openmobilealliance.org/tech/DTD/xhtml-mobile12.dtd">"#,
        "plist" => r#"<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">"#,
        _ => return format!("<!DOCTYPE {name}>"),
    };
    known.to_owned()
}

/// Generate the rendering routine for a linked, filtered tree.
pub fn generate(ast: &Block, options: &Options) -> Result<Program> {
    let mut gen = Generator::new(options);
    gen.visit_block(ast)?;
    let ops = gen.sinks.pop().unwrap_or_default();
    debug!("generated {} top-level op(s) for {}", ops.len(), options.name);
    Ok(Program {
        name: options.name.clone(),
        ops,
        self_namespace: options.self_namespace,
        globals: options.globals.clone(),
        sources: Default::default(),
    })
}

// ── Generator ─────────────────────────────────────────────────────────────────

struct Generator {
    pp: Option<String>,
    debug: bool,
    doctype: Option<String>,
    terse: bool,
    xml: bool,
    has_compiled_doctype: bool,
    has_compiled_tag: bool,
    indents: usize,
    /// Depth of mixin bodies and call blocks being generated.
    parent_indents: usize,
    escape_pretty: bool,
    file: Option<Arc<Path>>,
    /// Root tag of the mixin body being generated that receives the call's
    /// attributes implicitly.
    implicit_attributes: Option<Location>,
    sinks: Vec<Vec<Op>>,
}

impl Generator {
    fn new(options: &Options) -> Self {
        let mut gen = Generator {
            pp: options.pretty.indent().map(str::to_owned),
            debug: options.compile_debug,
            doctype: None,
            terse: false,
            xml: false,
            has_compiled_doctype: false,
            has_compiled_tag: false,
            indents: 0,
            parent_indents: 0,
            escape_pretty: false,
            file: options.filename.as_deref().map(Arc::from),
            implicit_attributes: None,
            sinks: vec![Vec::new()],
        };
        if let Some(doctype) = &options.doctype {
            gen.set_doctype(doctype);
        }
        gen
    }

    // ── Emission ──────────────────────────────────────────────────────────────

    fn emit(&mut self, op: Op) {
        let Some(sink) = self.sinks.last_mut() else {
            return;
        };
        match (sink.last_mut(), op) {
            (Some(Op::Text(last)), Op::Text(more)) => last.push_str(&more),
            (_, op) => sink.push(op),
        }
    }

    fn text(&mut self, s: impl AsRef<str>) {
        let s = s.as_ref();
        if !s.is_empty() {
            self.emit(Op::Text(s.to_owned()));
        }
    }

    /// Ops emitted by `f`, collected separately.
    fn capture(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<Vec<Op>> {
        self.sinks.push(Vec::new());
        let result = f(self);
        let ops = self.sinks.pop().unwrap_or_default();
        result.map(|()| ops)
    }

    fn error(&self, code: &'static str, message: impl Into<String>, loc: Location) -> Error {
        Error::Compile(Diagnostic::new(code, message, loc.start_line, loc.start_col).with_file(self.file.as_deref()))
    }

    fn code(&self, src: &str, loc: Location, what: &str) -> Result<Code> {
        Code::parse(src).map_err(|e| {
            self.error(
                "PUG:INVALID_EXPRESSION",
                format!("{what}: `{}` is not a valid expression: {e}", src.trim()),
                loc,
            )
        })
    }

    fn set_doctype(&mut self, name: &str) {
        let markup = doctype_markup(name);
        self.terse = markup.eq_ignore_ascii_case("<!doctype html>");
        self.xml = markup.starts_with("<?xml");
        self.doctype = Some(markup);
    }

    fn pretty_indent(&mut self, offset: usize, newline: bool) {
        let Some(pp) = &self.pp else {
            return;
        };
        let mut s = String::from(if newline { "\n" } else { "" });
        s.push_str(&pp.repeat((self.indents + offset).saturating_sub(1)));
        self.text(s);
        if self.parent_indents > 0 {
            self.emit(Op::MixinIndent);
        }
    }

    /// Indentation pushed for mixin calls and mixin blocks.
    fn call_indent(&self) -> Option<String> {
        self.pp.as_ref().map(|pp| pp.repeat(self.indents))
    }

    // ── Visitors ──────────────────────────────────────────────────────────────

    fn visit_block(&mut self, block: &Block) -> Result<()> {
        let saved = block.file.clone().map(|f| std::mem::replace(&mut self.file, Some(f)));
        let result = self.visit_nodes(&block.nodes);
        if let Some(saved) = saved {
            self.file = saved;
        }
        result
    }

    fn visit_nodes(&mut self, nodes: &[Node]) -> Result<()> {
        let pretty_text = self.pp.is_some() && !self.escape_pretty;
        let is_text = |n: Option<&Node>| matches!(n, Some(Node::Text { .. }));
        if pretty_text && nodes.len() > 1 && is_text(nodes.first()) && is_text(nodes.get(1)) {
            self.pretty_indent(1, true);
        }
        for (i, node) in nodes.iter().enumerate() {
            if pretty_text && i > 0 && is_text(Some(node)) {
                if let Some(Node::Text { value, .. }) = nodes.get(i - 1) {
                    if value.ends_with('\n') {
                        self.pretty_indent(1, false);
                    }
                }
            }
            self.visit(node)?;
        }
        Ok(())
    }

    fn visit(&mut self, node: &Node) -> Result<()> {
        let loc = node.loc();
        if self.debug && !matches!(node, Node::Block(_)) && loc.start_line > 0 {
            self.emit(Op::Debug {
                line: loc.start_line,
                file: self.file.clone(),
            });
        }
        match node {
            Node::Block(block) | Node::NamedBlock { block, .. } => self.visit_block(block),
            Node::Tag(tag) => self.visit_tag(tag),
            Node::Text { value, .. } => {
                self.text(value);
                Ok(())
            }
            Node::Interpolation { expr, escape, loc } => {
                let code = self.code(expr, *loc, "interpolation")?;
                self.emit(Op::Buffer { code, escape: *escape });
                Ok(())
            }
            Node::Code {
                code, buffer, escape, loc,
            } => {
                if *buffer {
                    let code = self.code(code, *loc, "buffered code")?;
                    self.emit(Op::Buffer { code, escape: *escape });
                } else {
                    let script = Script::parse(code).map_err(|e| {
                        self.error("PUG:INVALID_EXPRESSION", format!("code: `{}` is not valid: {e}", code.trim()), *loc)
                    })?;
                    self.emit(Op::Exec(script));
                }
                Ok(())
            }
            Node::Conditional {
                test,
                consequent,
                alternate,
                loc,
            } => {
                let test = self.code(test, *loc, "condition")?;
                let then = self.capture(|g| g.visit_block(consequent))?;
                let otherwise = match alternate.as_deref() {
                    Some(Node::Block(block)) => self.capture(|g| g.visit_block(block))?,
                    Some(other) => self.capture(|g| g.visit(other))?,
                    None => Vec::new(),
                };
                self.emit(Op::If { test, then, otherwise });
                Ok(())
            }
            Node::Case { expr, whens, loc } => self.visit_case(expr, whens, *loc),
            Node::Each {
                obj,
                val,
                key,
                block,
                alternate,
                loc,
            } => {
                let subject = self.code(obj, *loc, "each")?;
                let body = self.capture(|g| g.visit_block(block))?;
                let otherwise = match alternate {
                    Some(alt) => self.capture(|g| g.visit_block(alt))?,
                    None => Vec::new(),
                };
                self.emit(Op::Each {
                    subject,
                    val: val.clone(),
                    key: key.clone(),
                    body,
                    otherwise,
                });
                Ok(())
            }
            Node::While { test, block, loc } => {
                let test = self.code(test, *loc, "while")?;
                let body = self.capture(|g| g.visit_block(block))?;
                self.emit(Op::While { test, body });
                Ok(())
            }
            Node::MixinDef {
                name,
                params,
                block,
                loc,
            } => self.visit_mixin_def(name, params.as_deref(), block, *loc),
            Node::MixinCall { .. } => self.visit_call(node),
            Node::MixinBlock { .. } => {
                let indent = self.call_indent();
                self.emit(Op::MixinBlock { indent });
                Ok(())
            }
            Node::Yield { .. } => Ok(()),
            Node::Comment { value, buffer, .. } => {
                if *buffer {
                    self.pretty_indent(1, true);
                    self.text(format!("<!--{value}-->"));
                }
                Ok(())
            }
            Node::BlockComment {
                value, buffer, block, ..
            } => {
                if *buffer {
                    self.pretty_indent(1, true);
                    self.text(format!("<!--{value}"));
                    self.visit_block(block)?;
                    self.pretty_indent(1, true);
                    self.text("-->");
                }
                Ok(())
            }
            Node::Doctype { value, .. } => {
                self.visit_doctype(Some(value));
                Ok(())
            }
            Node::Filter { .. } | Node::Extends { .. } | Node::Include { .. } => Err(self.error(
                "PUG:UNKNOWN_NODE",
                format!("{} nodes must be resolved before code generation", node.kind()),
                loc,
            )),
        }
    }

    fn visit_doctype(&mut self, value: Option<&str>) {
        if let Some(value) = value {
            if !value.is_empty() || self.doctype.is_none() {
                self.set_doctype(if value.is_empty() { "html" } else { value });
            }
        }
        if let Some(markup) = self.doctype.clone() {
            self.text(markup);
        }
        self.has_compiled_doctype = true;
    }

    // ── Tags ──────────────────────────────────────────────────────────────────

    fn tag_name(&mut self, tag: &Tag) -> Result<()> {
        match &tag.name {
            Name::Static(name) => self.text(name),
            Name::Interpolated(expr) => {
                let code = self.code(expr, tag.loc, "tag name")?;
                self.emit(Op::Buffer { code, escape: false });
            }
        }
        Ok(())
    }

    fn visit_tag(&mut self, tag: &Tag) -> Result<()> {
        self.indents += 1;
        let name = tag.name.as_static();
        let whitespace_sensitive = name.is_some_and(|n| WHITESPACE_SENSITIVE.contains(&n));
        if whitespace_sensitive {
            self.escape_pretty = true;
        }
        if !self.has_compiled_tag {
            if !self.has_compiled_doctype && name == Some("html") {
                self.visit_doctype(None);
            }
            self.has_compiled_tag = true;
        }
        if !tag.is_inline {
            self.pretty_indent(0, true);
        }

        let void = tag.self_closing || name.is_some_and(|n| SELF_CLOSING.contains(&n));
        self.text("<");
        self.tag_name(tag)?;
        let implicit = self.implicit_attributes.is_some_and(|loc| loc == tag.loc);
        if implicit {
            self.implicit_attributes = None;
            self.visit_implicit_attributes(tag)?;
        } else {
            self.visit_attributes(&tag.attrs, &tag.attribute_blocks, tag.loc)?;
        }

        if void {
            self.text(if self.terse && !tag.self_closing { ">" } else { "/>" });
            if has_content(&tag.block) {
                let name = name.unwrap_or("tag");
                return Err(self.error(
                    "PUG:SELF_CLOSING_CONTENT",
                    format!("{name} is a self closing element: <{name}/> but contains nested content."),
                    tag.loc,
                ));
            }
        } else {
            self.text(">");
            self.visit_block(&tag.block)?;
            if !tag.is_inline && !whitespace_sensitive && !can_inline(tag) {
                self.pretty_indent(0, true);
            }
            self.text("</");
            self.tag_name(tag)?;
            self.text(">");
        }

        if whitespace_sensitive {
            self.escape_pretty = false;
        }
        self.indents -= 1;
        Ok(())
    }

    // ── Attributes ────────────────────────────────────────────────────────────

    fn object_attrs(&self, attrs: &[Attribute]) -> Result<Vec<ObjectAttr>> {
        attrs
            .iter()
            .map(|a| {
                Ok(ObjectAttr {
                    name: a.name.clone(),
                    value: self.code(&a.value, a.loc, &format!("attribute {}", a.name))?,
                    escape: a.escaped,
                })
            })
            .collect()
    }

    fn attribute_blocks(&self, blocks: &[String], loc: Location) -> Result<Vec<Code>> {
        blocks.iter().map(|b| self.code(b, loc, "&attributes")).collect()
    }

    fn visit_attributes(&mut self, attrs: &[Attribute], blocks: &[String], loc: Location) -> Result<()> {
        if !blocks.is_empty() {
            let attrs = self.object_attrs(attrs)?;
            let blocks = self.attribute_blocks(blocks, loc)?;
            self.emit(Op::Attrs {
                attrs,
                blocks,
                terse: self.terse,
            });
            return Ok(());
        }

        // Group by name at the first occurrence: classes join, styles
        // concatenate, any other repeated name keeps its last value.
        let mut order: Vec<&str> = Vec::new();
        for attr in attrs {
            if !order.contains(&attr.name.as_str()) {
                order.push(&attr.name);
            }
        }
        for name in order {
            let group: Vec<&Attribute> = attrs.iter().filter(|a| a.name == name).collect();
            match name {
                "class" => self.class_attr(&group)?,
                "style" => self.style_attr(&group)?,
                _ => {
                    if let Some(last) = group.last() {
                        self.plain_attr(last)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Compile-time value of an attribute, if it is constant.
    fn constant(&self, attr: &Attribute) -> Result<(Code, Option<Value>)> {
        let code = self.code(&attr.value, attr.loc, &format!("attribute {}", attr.name))?;
        let value = eval_constant(&code.expr);
        Ok((code, value))
    }

    fn plain_attr(&mut self, attr: &Attribute) -> Result<()> {
        match self.constant(attr)? {
            (_, Some(value)) => self.text(runtime::attr(&attr.name, &value, attr.escaped, self.terse)),
            (value, None) => self.emit(Op::Attr {
                name: attr.name.clone(),
                value,
                escape: attr.escaped,
                terse: self.terse,
            }),
        }
        Ok(())
    }

    fn class_attr(&mut self, group: &[&Attribute]) -> Result<()> {
        let mut items = Vec::new();
        let mut constants = Vec::new();
        for attr in group {
            let (code, value) = self.constant(attr)?;
            if let Some(v) = value {
                constants.push(v);
            }
            items.push((code, attr.escaped));
        }
        if constants.len() == items.len() {
            let escaping: Vec<bool> = items.iter().map(|(_, e)| *e).collect();
            let classes = runtime::classes(&Value::Array(constants), Some(&escaping));
            self.text(runtime::attr("class", &Value::Str(classes), false, self.terse));
        } else {
            self.emit(Op::Class { items, terse: self.terse });
        }
        Ok(())
    }

    fn style_attr(&mut self, group: &[&Attribute]) -> Result<()> {
        let escape = group.first().is_some_and(|a| a.escaped);
        let mut parts = Vec::new();
        let mut constants = Vec::new();
        for attr in group {
            let (code, value) = self.constant(attr)?;
            if let Some(v) = value {
                constants.push(v);
            }
            parts.push(code);
        }
        if constants.len() == parts.len() {
            let style = join_styles(&constants);
            self.text(runtime::attr("style", &Value::Str(style), escape, self.terse));
        } else {
            self.emit(Op::Style {
                parts,
                escape,
                terse: self.terse,
            });
        }
        Ok(())
    }

    /// The root tag of a mixin without `&attributes`: call-site attributes
    /// merge into it when any were passed.
    fn visit_implicit_attributes(&mut self, tag: &Tag) -> Result<()> {
        let test = self.code("Object.keys(attributes).length", tag.loc, "attributes")?;
        let merged = Op::Attrs {
            attrs: self.object_attrs(&tag.attrs)?,
            blocks: vec![self.code("attributes", tag.loc, "attributes")?],
            terse: self.terse,
        };
        let otherwise = self.capture(|g| g.visit_attributes(&tag.attrs, &[], tag.loc))?;
        self.emit(Op::If {
            test,
            then: vec![merged],
            otherwise,
        });
        Ok(())
    }

    // ── Control flow ──────────────────────────────────────────────────────────

    fn visit_case(&mut self, expr: &str, whens: &[When], loc: Location) -> Result<()> {
        let subject = self.code(expr, loc, "case")?;
        let mut arms = Vec::new();
        let mut tests = Vec::new();
        let mut is_default = false;
        for when in whens {
            match &when.expr {
                Some(e) => tests.push(self.code(e, when.loc, "when")?),
                None => is_default = true,
            }
            if let Some(block) = &when.block {
                let body = self.capture(|g| g.visit_block(block))?;
                arms.push(Arm {
                    tests: std::mem::take(&mut tests),
                    is_default: std::mem::take(&mut is_default),
                    body,
                });
            }
        }
        self.emit(Op::Case { subject, arms });
        Ok(())
    }

    // ── Mixins ────────────────────────────────────────────────────────────────

    fn visit_mixin_def(&mut self, name: &str, params: Option<&str>, block: &Block, loc: Location) -> Result<()> {
        let (params, rest) = match params {
            Some(src) => parse_params(src).map_err(|e| self.error("PUG:INVALID_PARAMETERS", format!("mixin {name}: {e}"), loc))?,
            None => (Vec::new(), None),
        };
        let saved_implicit = self.implicit_attributes.take();
        self.implicit_attributes = implicit_root(block);
        self.parent_indents += 1;
        let body = self.capture(|g| g.visit_block(block));
        self.parent_indents -= 1;
        self.implicit_attributes = saved_implicit;
        self.emit(Op::Mixin(Arc::new(MixinDef {
            name: name.to_owned(),
            params,
            rest,
            body: body?,
        })));
        Ok(())
    }

    fn visit_call(&mut self, node: &Node) -> Result<()> {
        let Node::MixinCall {
            name,
            args,
            attrs,
            attribute_blocks,
            block,
            loc,
        } = node
        else {
            return Ok(());
        };
        let name = match name {
            Name::Static(n) => MixinName::Static(n.clone()),
            Name::Interpolated(expr) => MixinName::Dynamic(self.code(expr, *loc, "mixin name")?),
        };
        let args = match args.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
            Some(src) => Some(Args::parse(src).map_err(|e| {
                self.error("PUG:INVALID_EXPRESSION", format!("mixin arguments: `{src}` are not valid: {e}"), *loc)
            })?),
            None => None,
        };
        let indent = self.call_indent();
        let block = match block {
            Some(block) => {
                let saved = std::mem::replace(&mut self.indents, 0);
                self.parent_indents += 1;
                let ops = self.capture(|g| g.visit_block(block));
                self.parent_indents -= 1;
                self.indents = saved;
                Some(Arc::new(ops?))
            }
            None => None,
        };
        let call = MixinCall {
            name,
            args,
            attrs: self.object_attrs(attrs)?,
            blocks: self.attribute_blocks(attribute_blocks, *loc)?,
            block,
            indent,
        };
        self.emit(Op::Call(Box::new(call)));
        Ok(())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn join_styles(values: &[Value]) -> String {
    if let [single] = values {
        return runtime::style(single);
    }
    values
        .iter()
        .map(|v| {
            let mut s = runtime::style(v);
            if !s.is_empty() && !s.ends_with(';') {
                s.push(';');
            }
            s
        })
        .collect()
}

/// `true` when a block holds anything but whitespace text.
fn has_content(block: &Block) -> bool {
    block.nodes.iter().any(|n| match n {
        Node::Text { value, .. } => !value.trim().is_empty(),
        Node::Block(b) => has_content(b),
        _ => true,
    })
}

fn is_inline_node(node: &Node) -> bool {
    match node {
        Node::Block(b) => b.nodes.iter().all(is_inline_node),
        Node::Yield { .. } => true,
        Node::Text { value, .. } => !value.contains('\n'),
        Node::Tag(t) => t.is_inline,
        Node::Interpolation { .. } => true,
        Node::Code { buffer, .. } => *buffer,
        _ => false,
    }
}

fn can_inline(tag: &Tag) -> bool {
    tag.block.nodes.iter().all(is_inline_node)
}

/// Location of the single root tag of a mixin body that never spreads
/// `attributes` itself.
fn implicit_root(block: &Block) -> Option<Location> {
    let mut spreads = false;
    block.walk(&mut |n| {
        if let Node::Tag(t) = n {
            spreads |= !t.attribute_blocks.is_empty();
        }
    });
    if spreads {
        return None;
    }
    let mut roots = Vec::new();
    collect_roots(&block.nodes, &mut roots);
    match roots.as_slice() {
        [Node::Tag(t)] => Some(t.loc),
        _ => None,
    }
}

fn collect_roots<'a>(nodes: &'a [Node], out: &mut Vec<&'a Node>) {
    for node in nodes {
        match node {
            Node::Block(b) => collect_roots(&b.nodes, out),
            Node::Code { buffer: false, .. } | Node::Comment { .. } | Node::BlockComment { .. } => {}
            other => out.push(other),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
