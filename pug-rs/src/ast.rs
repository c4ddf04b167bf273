//! Abstract syntax tree.
//!
//! A template parses into a [`Block`] (the root) of [`Node`]s.  The node set
//! is closed: every later pass (load, link, filters, code generation) matches
//! on it exhaustively.  Nodes own their children; named blocks refer to each
//! other only by name.
//!
//! Expressions stay as raw source text in the tree.  They are checked and
//! parsed by the code generator, so a tree can be built, transformed by
//! plugins, and printed without touching the expression language.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::token::Location;

/// How a descendant's named block combines with its ancestor's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum BlockMode {
    #[default]
    Replace,
    Append,
    Prepend,
}

impl BlockMode {
    pub fn name(self) -> &'static str {
        match self {
            BlockMode::Replace => "replace",
            BlockMode::Append => "append",
            BlockMode::Prepend => "prepend",
        }
    }
}

// ── Block ─────────────────────────────────────────────────────────────────────

/// An ordered list of sibling nodes, tagged with the file they came from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub nodes: Vec<Node>,
    /// Source file of these nodes; `None` for string templates.
    pub file: Option<Arc<Path>>,
    pub loc: Location,
}

impl Block {
    pub fn new(file: Option<Arc<Path>>, loc: Location) -> Self {
        Block {
            nodes: Vec::new(),
            file,
            loc,
        }
    }

    pub fn with_nodes(nodes: Vec<Node>, file: Option<Arc<Path>>, loc: Location) -> Self {
        Block { nodes, file, loc }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Visit every node in document order, descending into child blocks.
    pub fn walk(&self, f: &mut dyn FnMut(&Node)) {
        for node in &self.nodes {
            f(node);
            for child in node.child_blocks() {
                child.walk(f);
            }
        }
    }

    /// Mutable pre-order walk.  `f` sees a node before its children, so it
    /// may replace the node's contents and the walk continues into the result.
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Node)) {
        for node in &mut self.nodes {
            f(node);
            for child in node.child_blocks_mut() {
                child.walk_mut(f);
            }
        }
    }

    /// Like [`walk_mut`](Self::walk_mut) but stops at the first error.
    pub fn try_walk_mut<E>(&mut self, f: &mut dyn FnMut(&mut Node) -> Result<(), E>) -> Result<(), E> {
        for node in &mut self.nodes {
            f(node)?;
            for child in node.child_blocks_mut() {
                child.try_walk_mut(f)?;
            }
        }
        Ok(())
    }
}

// ── Attributes ────────────────────────────────────────────────────────────────

/// One `name=value` entry of an attribute list.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    /// Raw expression source; a bare attribute carries `"true"`.
    pub value: String,
    /// `=` escapes the value, `!=` does not.
    pub escaped: bool,
    pub loc: Location,
}

/// A tag name or mixin name, possibly computed at render time (`#{expr}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Name {
    Static(String),
    Interpolated(String),
}

impl Name {
    pub fn as_static(&self) -> Option<&str> {
        match self {
            Name::Static(s) => Some(s),
            Name::Interpolated(_) => None,
        }
    }
}

// ── File references ───────────────────────────────────────────────────────────

/// Content of a loaded `extends`/`include` target.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded {
    /// A template, parsed (and for includes, already flattened).
    Template(Block),
    /// Any other file, spliced as text.
    Raw(String),
}

/// Path of an `extends` or `include` plus what the loader found there.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRef {
    /// As written in the template (after default-extension inference).
    pub path: String,
    /// Canonical path, set by the loader.
    pub resolved: Option<PathBuf>,
    pub content: Option<Loaded>,
    pub loc: Location,
}

impl FileRef {
    pub fn new(path: impl Into<String>, loc: Location) -> Self {
        FileRef {
            path: path.into(),
            resolved: None,
            content: None,
            loc,
        }
    }
}

// ── Nodes ─────────────────────────────────────────────────────────────────────

/// `tag#id.class(attrs)&attributes(obj)` with children.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: Name,
    /// Explicit trailing `/`.
    pub self_closing: bool,
    /// Shorthand and parenthesised attributes in declaration order.
    pub attrs: Vec<Attribute>,
    /// `&attributes(...)` expressions.
    pub attribute_blocks: Vec<String>,
    pub block: Block,
    /// Phrasing element kept on one line when pretty printing.
    pub is_inline: bool,
    /// Body given as a `.` text block.
    pub text_only: bool,
    pub loc: Location,
}

/// One arm of a `case`.  `expr` is `None` for `default`; `block` is `None`
/// for a fall-through `when`.
#[derive(Debug, Clone, PartialEq)]
pub struct When {
    pub expr: Option<String>,
    pub block: Option<Block>,
    pub loc: Location,
}

/// `:name(options)` applied by [`include:name`](Node::Include).
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeFilter {
    pub name: String,
    pub attrs: Vec<Attribute>,
    pub loc: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A nested list of nodes with no markup of its own.
    Block(Block),
    Tag(Tag),
    /// Plain text, emitted verbatim.
    Text { value: String, loc: Location },
    /// `#{expr}` / `!{expr}` inside text.
    Interpolation { expr: String, escape: bool, loc: Location },
    /// `= expr`, `!= expr` or `- stmts`.
    Code {
        code: String,
        buffer: bool,
        escape: bool,
        loc: Location,
    },
    /// `if`/`unless`/`else if`.  `alternate` holds the `else` branch (a
    /// `Block`) or an `else if` (another `Conditional`).
    Conditional {
        test: String,
        consequent: Block,
        alternate: Option<Box<Node>>,
        loc: Location,
    },
    Case {
        expr: String,
        whens: Vec<When>,
        loc: Location,
    },
    Each {
        obj: String,
        val: String,
        key: Option<String>,
        block: Block,
        alternate: Option<Block>,
        loc: Location,
    },
    While { test: String, block: Block, loc: Location },
    MixinDef {
        name: String,
        /// Raw parameter list, e.g. `a, b, ...rest`.
        params: Option<String>,
        block: Block,
        loc: Location,
    },
    MixinCall {
        name: Name,
        /// Raw argument list.
        args: Option<String>,
        attrs: Vec<Attribute>,
        attribute_blocks: Vec<String>,
        block: Option<Block>,
        loc: Location,
    },
    /// `block` inside a mixin body.
    MixinBlock { loc: Location },
    NamedBlock {
        name: String,
        mode: BlockMode,
        block: Block,
        loc: Location,
    },
    Extends { file: FileRef, loc: Location },
    Include {
        file: FileRef,
        filters: Vec<IncludeFilter>,
        /// Indented content placed at the included file's `yield`.
        block: Block,
        loc: Location,
    },
    /// Where an including template's block goes.
    Yield { loc: Location },
    /// `:name(options)` with its body.  The body holds `Text` nodes, or a
    /// nested `Filter` for chains like `:outer:inner`.
    Filter {
        name: String,
        attrs: Vec<Attribute>,
        block: Block,
        loc: Location,
    },
    Comment { value: String, buffer: bool, loc: Location },
    /// `//` followed by an indented comment body.
    BlockComment {
        value: String,
        buffer: bool,
        block: Block,
        loc: Location,
    },
    Doctype { value: String, loc: Location },
}

impl Node {
    pub fn loc(&self) -> Location {
        match self {
            Node::Block(b) => b.loc,
            Node::Tag(t) => t.loc,
            Node::Text { loc, .. }
            | Node::Interpolation { loc, .. }
            | Node::Code { loc, .. }
            | Node::Conditional { loc, .. }
            | Node::Case { loc, .. }
            | Node::Each { loc, .. }
            | Node::While { loc, .. }
            | Node::MixinDef { loc, .. }
            | Node::MixinCall { loc, .. }
            | Node::MixinBlock { loc }
            | Node::NamedBlock { loc, .. }
            | Node::Extends { loc, .. }
            | Node::Include { loc, .. }
            | Node::Yield { loc }
            | Node::Filter { loc, .. }
            | Node::Comment { loc, .. }
            | Node::BlockComment { loc, .. }
            | Node::Doctype { loc, .. } => *loc,
        }
    }

    /// Kind name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Block(_) => "Block",
            Node::Tag(_) => "Tag",
            Node::Text { .. } => "Text",
            Node::Interpolation { .. } => "Interpolation",
            Node::Code { .. } => "Code",
            Node::Conditional { .. } => "Conditional",
            Node::Case { .. } => "Case",
            Node::Each { .. } => "Each",
            Node::While { .. } => "While",
            Node::MixinDef { .. } => "Mixin",
            Node::MixinCall { .. } => "MixinCall",
            Node::MixinBlock { .. } => "MixinBlock",
            Node::NamedBlock { .. } => "NamedBlock",
            Node::Extends { .. } => "Extends",
            Node::Include { .. } => "Include",
            Node::Yield { .. } => "YieldBlock",
            Node::Filter { .. } => "Filter",
            Node::Comment { .. } => "Comment",
            Node::BlockComment { .. } => "BlockComment",
            Node::Doctype { .. } => "Doctype",
        }
    }

    /// Direct child blocks, in document order.
    pub fn child_blocks(&self) -> Vec<&Block> {
        match self {
            Node::Block(b) => vec![b],
            Node::Tag(t) => vec![&t.block],
            Node::Conditional {
                consequent, alternate, ..
            } => {
                let mut out = vec![consequent];
                if let Some(alt) = alternate {
                    match alt.as_ref() {
                        Node::Block(b) => out.push(b),
                        other => out.extend(other.child_blocks()),
                    }
                }
                out
            }
            Node::Case { whens, .. } => whens.iter().filter_map(|w| w.block.as_ref()).collect(),
            Node::Each { block, alternate, .. } => {
                let mut out = vec![block];
                out.extend(alternate.iter());
                out
            }
            Node::While { block, .. }
            | Node::MixinDef { block, .. }
            | Node::NamedBlock { block, .. }
            | Node::Include { block, .. }
            | Node::Filter { block, .. }
            | Node::BlockComment { block, .. } => vec![block],
            Node::MixinCall { block, .. } => block.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Mutable direct child blocks, in document order.
    pub fn child_blocks_mut(&mut self) -> Vec<&mut Block> {
        match self {
            Node::Block(b) => vec![b],
            Node::Tag(t) => vec![&mut t.block],
            Node::Conditional {
                consequent, alternate, ..
            } => {
                let mut out = vec![consequent];
                if let Some(alt) = alternate {
                    match alt.as_mut() {
                        Node::Block(b) => out.push(b),
                        other => out.extend(other.child_blocks_mut()),
                    }
                }
                out
            }
            Node::Case { whens, .. } => whens.iter_mut().filter_map(|w| w.block.as_mut()).collect(),
            Node::Each { block, alternate, .. } => {
                let mut out = vec![block];
                out.extend(alternate.iter_mut());
                out
            }
            Node::While { block, .. }
            | Node::MixinDef { block, .. }
            | Node::NamedBlock { block, .. }
            | Node::Include { block, .. }
            | Node::Filter { block, .. }
            | Node::BlockComment { block, .. } => vec![block],
            Node::MixinCall { block, .. } => block.iter_mut().collect(),
            _ => Vec::new(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
