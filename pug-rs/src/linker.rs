//! Template inheritance and include splicing.
//!
//! Runs over a tree whose `extends`/`include` references the loader has
//! already filled.  Includes are spliced first (template includes are linked
//! recursively, raw ones become text or filter nodes), then an `extends`
//! chain is flattened into the outermost ancestor by merging named blocks.

use std::path::Path;
use std::sync::Arc;

use log::debug;

use crate::ast::{Attribute, Block, BlockMode, FileRef, IncludeFilter, Loaded, Node};
use crate::error::{Diagnostic, Error, Result};
use crate::token::Location;

/// Prefix hiding blocks spliced in during one merge step from that step's
/// own lookups.
const SPLICED: char = '\u{0}';

/// Flatten `ast` into a single tree.
pub fn link(ast: Block) -> Result<Block> {
    link_tree(ast).map(|(ast, _)| ast)
}

fn link_error(code: &'static str, message: impl Into<String>, loc: Location, file: Option<&Arc<Path>>) -> Error {
    Error::Link(Diagnostic::new(code, message, loc.start_line, loc.start_col).with_file(file.map(|f| f.as_ref())))
}

/// Returns the linked tree and whether it came from an `extends` chain.
fn link_tree(mut ast: Block) -> Result<(Block, bool)> {
    check_extends_position(&ast)?;
    let extends = match ast.nodes.first() {
        Some(Node::Extends { .. }) => Some(ast.nodes.remove(0)),
        _ => None,
    };
    apply_includes(&mut ast)?;

    let Some(Node::Extends { file, loc }) = extends else {
        return Ok((ast, false));
    };

    let mut hoisted = Vec::new();
    let mut expected = Vec::new();
    extending_root(&ast.nodes, &ast.file, &mut hoisted, &mut expected)?;

    let (mut parent, _) = link_tree(loaded_template(file, loc, &ast.file)?)?;

    let mut declared = Vec::new();
    parent.walk(&mut |node| {
        if let Node::NamedBlock { name, .. } = node {
            declared.push(name.clone());
        }
    });
    for (name, loc) in &expected {
        if !declared.contains(name) {
            return Err(link_error(
                "PUG:UNEXPECTED_BLOCK",
                format!("Unexpected block {name}"),
                *loc,
                ast.file.as_ref(),
            ));
        }
    }

    extend(&mut parent, &ast);
    hoisted.append(&mut parent.nodes);
    parent.nodes = hoisted;
    Ok((parent, true))
}

fn loaded_template(file: FileRef, loc: Location, from: &Option<Arc<Path>>) -> Result<Block> {
    match file.content {
        Some(Loaded::Template(block)) => Ok(block),
        _ => Err(link_error(
            "PUG:FILE_NOT_LOADED",
            format!("{} has not been loaded", file.path),
            loc,
            from.as_ref(),
        )),
    }
}

fn check_extends_position(ast: &Block) -> Result<()> {
    let first = ast.nodes.first().filter(|n| matches!(n, Node::Extends { .. }));
    let mut misplaced = None;
    ast.walk(&mut |node| {
        if let Node::Extends { loc, .. } = node {
            let legit = first.is_some_and(|f| std::ptr::eq(f, node));
            if !legit && misplaced.is_none() {
                misplaced = Some(*loc);
            }
        }
    });
    match misplaced {
        Some(loc) => Err(link_error(
            "PUG:EXTENDS_NOT_FIRST",
            "Declaration of template inheritance (\"extends\") should be the first thing in the file. \
             There can only be one extends statement per file.",
            loc,
            ast.file.as_ref(),
        )),
        None => Ok(()),
    }
}

/// Sort the top level of an extending template into hoisted nodes and the
/// named blocks it expects its ancestors to declare.
fn extending_root(
    nodes: &[Node],
    file: &Option<Arc<Path>>,
    hoisted: &mut Vec<Node>,
    expected: &mut Vec<(String, Location)>,
) -> Result<()> {
    for node in nodes {
        match node {
            Node::NamedBlock { name, loc, .. } => expected.push((name.clone(), *loc)),
            Node::Block(inner) => extending_root(&inner.nodes, file, hoisted, expected)?,
            Node::MixinDef { .. } | Node::Code { buffer: false, .. } => hoisted.push(node.clone()),
            Node::Comment { .. } | Node::BlockComment { .. } => {}
            other => {
                return Err(link_error(
                    "PUG:UNEXPECTED_NODES_IN_EXTENDING_ROOT",
                    format!(
                        "Only named blocks and mixins can appear at the top level of an extending template (found {})",
                        other.kind()
                    ),
                    other.loc(),
                    file.as_ref(),
                ))
            }
        }
    }
    Ok(())
}

// ── Block merging ─────────────────────────────────────────────────────────────

/// Apply each named block of `child` to the same-named blocks of `parent`.
fn extend(parent: &mut Block, child: &Block) {
    let mut blocks = Vec::new();
    collect_named(child, &mut Vec::new(), &mut blocks);

    for (name, mode, content) in blocks {
        let mut spliced = content.clone();
        hide_named(&mut spliced);
        let applied = apply_block(parent, name, mode, &spliced);
        debug!("block {name} ({}) applied to {applied} declaration(s)", mode.name());
    }

    parent.walk_mut(&mut |node| {
        if let Node::NamedBlock { name, .. } = node {
            if let Some(rest) = name.strip_prefix(SPLICED) {
                *name = rest.to_owned();
            }
        }
    });
}

/// Named blocks in document order, skipping ones nested in a block of the
/// same name.
fn collect_named<'a>(block: &'a Block, open: &mut Vec<&'a str>, out: &mut Vec<(&'a str, BlockMode, &'a Block)>) {
    for node in &block.nodes {
        if let Node::NamedBlock { name, mode, block: inner, .. } = node {
            if !open.contains(&name.as_str()) {
                out.push((name, *mode, inner));
                open.push(name);
                collect_named(inner, open, out);
                open.pop();
                continue;
            }
        }
        for child in node.child_blocks() {
            collect_named(child, open, out);
        }
    }
}

fn hide_named(block: &mut Block) {
    block.walk_mut(&mut |node| {
        if let Node::NamedBlock { name, .. } = node {
            name.insert(0, SPLICED);
        }
    });
}

/// Merge `content` into every block called `name`, without descending into
/// the blocks it matches.
fn apply_block(target: &mut Block, name: &str, mode: BlockMode, content: &Block) -> usize {
    let mut applied = 0;
    for node in &mut target.nodes {
        if let Node::NamedBlock { name: n, block, .. } = node {
            if n == name {
                let incoming = Node::Block(content.clone());
                match mode {
                    BlockMode::Replace => block.nodes = vec![incoming],
                    BlockMode::Append => block.nodes.push(incoming),
                    BlockMode::Prepend => block.nodes.insert(0, incoming),
                }
                applied += 1;
                continue;
            }
        }
        for child in node.child_blocks_mut() {
            applied += apply_block(child, name, mode, content);
        }
    }
    applied
}

// ── Includes ──────────────────────────────────────────────────────────────────

fn apply_includes(ast: &mut Block) -> Result<()> {
    let file = ast.file.clone();
    ast.try_walk_mut(&mut |node| {
        let Node::Include { .. } = node else {
            return Ok(());
        };
        let Node::Include {
            file: file_ref,
            filters,
            block,
            loc,
        } = std::mem::replace(node, Node::Block(Block::default()))
        else {
            return Ok(());
        };
        *node = splice_include(file_ref, filters, block, loc, &file)?;
        Ok(())
    })
}

fn splice_include(
    file_ref: FileRef,
    filters: Vec<IncludeFilter>,
    block: Block,
    loc: Location,
    from: &Option<Arc<Path>>,
) -> Result<Node> {
    let resolved = file_ref.resolved.clone();
    match file_ref.content {
        Some(Loaded::Template(child)) => {
            let (mut child, extended) = link_tree(child)?;
            if extended {
                remove_blocks(&mut child);
            }
            apply_yield(&mut child, block);
            Ok(Node::Block(child))
        }
        Some(Loaded::Raw(text)) => {
            let value = text.replace('\r', "");
            let text = Node::Text { value, loc };
            if filters.is_empty() {
                return Ok(text);
            }
            let filename = resolved
                .as_deref()
                .map(|p| serde_json::Value::from(p.display().to_string()).to_string());
            let mut inner = Block::with_nodes(vec![text], from.clone(), loc);
            let last = filters.len() - 1;
            for (i, f) in filters.into_iter().enumerate().rev() {
                let mut attrs = f.attrs;
                if let (true, Some(filename)) = (i == last, &filename) {
                    attrs.push(Attribute {
                        name: "filename".to_owned(),
                        value: filename.clone(),
                        escaped: true,
                        loc: f.loc,
                    });
                }
                let filter = Node::Filter {
                    name: f.name,
                    attrs,
                    block: inner,
                    loc: f.loc,
                };
                inner = Block::with_nodes(vec![filter], from.clone(), loc);
            }
            Ok(Node::Block(inner))
        }
        None => Err(link_error(
            "PUG:FILE_NOT_LOADED",
            format!("{} has not been loaded", file_ref.path),
            loc,
            from.as_ref(),
        )),
    }
}

/// Turn the named blocks of a flattened extending include into plain blocks.
fn remove_blocks(ast: &mut Block) {
    ast.walk_mut(&mut |node| {
        if let Node::NamedBlock { block, .. } = node {
            let block = std::mem::take(block);
            *node = Node::Block(block);
        }
    });
}

/// Place an include's indented block at the child's `yield`, or at its
/// default location when it has none.
fn apply_yield(ast: &mut Block, block: Block) {
    if block.is_empty() {
        return;
    }
    let mut replaced = false;
    ast.walk_mut(&mut |node| {
        if let Node::Yield { .. } = node {
            replaced = true;
            *node = Node::Block(block.clone());
        }
    });
    if !replaced {
        push_at_default(ast, Node::Block(block));
    }
}

fn yield_target(node: &Node) -> Option<&Block> {
    match node {
        Node::Block(b) => Some(b),
        Node::Tag(t) if !t.text_only => Some(&t.block),
        Node::Each { block, .. } | Node::While { block, .. } | Node::MixinDef { block, .. } => Some(block),
        Node::MixinCall { block, .. } => block.as_ref(),
        _ => None,
    }
    .filter(|b| matches!(node, Node::Block(_)) || !b.is_empty())
}

fn yield_target_mut(node: &mut Node) -> Option<&mut Block> {
    let keep_empty = matches!(node, Node::Block(_));
    match node {
        Node::Block(b) => Some(b),
        Node::Tag(t) if !t.text_only => Some(&mut t.block),
        Node::Each { block, .. } | Node::While { block, .. } | Node::MixinDef { block, .. } => Some(block),
        Node::MixinCall { block, .. } => block.as_mut(),
        _ => None,
    }
    .filter(|b| keep_empty || !b.is_empty())
}

/// The last nested block of the tree, skipping `.` text blocks.
fn push_at_default(block: &mut Block, content: Node) {
    let last = block.nodes.iter().rposition(|n| yield_target(n).is_some());
    match last.and_then(|i| yield_target_mut(&mut block.nodes[i])) {
        Some(inner) => push_at_default(inner, content),
        None => block.nodes.push(content),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::load::{load, MemoryLoader};
    use crate::options::Options;
    use crate::parser::parse;
    use crate::plugin::Plugins;

    fn front(src: &str, file: Option<Arc<Path>>) -> Result<Block> {
        parse(lex(src, &[])?, file, &[])
    }

    fn linked(files: &[(&str, &str)], root: &str) -> Result<Block> {
        let mut loader = MemoryLoader::new();
        for (name, src) in files {
            loader.insert(name, *src);
        }
        let src = files.iter().find(|(n, _)| *n == root).map(|(_, s)| *s).unwrap_or("");
        let options = Options::new().with_filename(root).with_loader(Arc::new(loader));
        let ast = front(src, Some(Arc::from(Path::new(root))))?;
        let tree = load(ast, src, &options, &Plugins::default(), &front)?;
        link(tree.ast)
    }

    fn texts(block: &Block) -> Vec<String> {
        let mut out = Vec::new();
        block.walk(&mut |n| {
            if let Node::Text { value, .. } = n {
                out.push(value.clone());
            }
        });
        out
    }

    const LAYOUT: &str = "html\n  block content\n    p x\n  block foot\n    p f\n";

    #[test]
    fn block_modes() {
        for (mode, expected) in [
            ("block", vec!["y", "f"]),
            ("block append", vec!["x", "y", "f"]),
            ("block prepend", vec!["y", "x", "f"]),
            ("append", vec!["x", "y", "f"]),
        ] {
            let page = format!("extends layout.pug\n{mode} content\n  p y\n");
            let ast = linked(&[("v/layout.pug", LAYOUT), ("v/page.pug", &page)], "v/page.pug").unwrap();
            assert_eq!(texts(&ast), expected, "{mode}");
        }
    }

    #[test]
    fn three_level_chain_accumulates() {
        let ast = linked(
            &[
                ("v/base.pug", LAYOUT),
                ("v/mid.pug", "extends base.pug\nblock append content\n  p m\n"),
                ("v/page.pug", "extends mid.pug\nblock append content\n  p y\nblock foot\n  p g\n"),
            ],
            "v/page.pug",
        )
        .unwrap();
        assert_eq!(texts(&ast), ["x", "m", "y", "g"]);
    }

    #[test]
    fn nested_block_in_replacement_keeps_child_content() {
        let ast = linked(
            &[
                ("v/base.pug", "block outer\n  block inner\n    p base\n"),
                ("v/page.pug", "extends base.pug\nblock outer\n  p o\n  block append inner\n    p i\n"),
            ],
            "v/page.pug",
        )
        .unwrap();
        assert_eq!(texts(&ast), ["o", "i"]);
    }

    #[test]
    fn mixins_and_code_are_hoisted() {
        let ast = linked(
            &[
                ("v/base.pug", "block content"),
                ("v/page.pug", "extends base.pug\nmixin m\n  p m\n- var a = 1\nblock content\n  +m\n"),
            ],
            "v/page.pug",
        )
        .unwrap();
        assert!(matches!(ast.nodes[0], Node::MixinDef { .. }));
        assert!(matches!(ast.nodes[1], Node::Code { buffer: false, .. }));
    }

    #[test]
    fn extending_root_rejects_markup() {
        let err = linked(
            &[("v/base.pug", "block content"), ("v/page.pug", "extends base.pug\np stray\n")],
            "v/page.pug",
        )
        .unwrap_err();
        assert_eq!(err.code(), "PUG:UNEXPECTED_NODES_IN_EXTENDING_ROOT");
    }

    #[test]
    fn unknown_block_is_an_error() {
        let err = linked(
            &[("v/base.pug", "block content"), ("v/page.pug", "extends base.pug\nblock other\n  p\n")],
            "v/page.pug",
        )
        .unwrap_err();
        assert_eq!(err.code(), "PUG:UNEXPECTED_BLOCK");
        assert_eq!(err.diagnostic().unwrap().file.as_deref(), Some(Path::new("v/page.pug")));
    }

    #[test]
    fn extends_must_come_first() {
        let err = linked(
            &[("v/base.pug", "p"), ("v/page.pug", "p\nextends base.pug\n")],
            "v/page.pug",
        )
        .unwrap_err();
        assert_eq!(err.code(), "PUG:EXTENDS_NOT_FIRST");
    }

    #[test]
    fn include_yield_and_default_location() {
        let ast = linked(
            &[
                ("v/box.pug", "div\n  yield\n  p after\n"),
                ("v/deep.pug", "div\n  p a\n  section\n    p b\n"),
                ("v/page.pug", "include box.pug\n  p in\ninclude deep.pug\n  p tail\n"),
            ],
            "v/page.pug",
        )
        .unwrap();
        assert_eq!(texts(&ast), ["in", "after", "a", "b", "tail"]);
    }

    #[test]
    fn raw_and_filtered_includes() {
        let ast = linked(
            &[
                ("v/a.txt", "one\r\ntwo"),
                ("v/page.pug", "pre\n  include a.txt\ninclude:upper:lower a.txt\n"),
            ],
            "v/page.pug",
        )
        .unwrap();
        assert_eq!(texts(&ast)[0], "one\ntwo");
        let mut filters = Vec::new();
        ast.walk(&mut |n| {
            if let Node::Filter { name, attrs, .. } = n {
                filters.push((name.clone(), attrs.iter().any(|a| a.name == "filename")));
            }
        });
        assert_eq!(filters, [("upper".to_owned(), false), ("lower".to_owned(), true)]);
    }

    #[test]
    fn included_extending_template_is_flattened() {
        let ast = linked(
            &[
                ("v/base.pug", "section\n  block body\n"),
                ("v/part.pug", "extends base.pug\nblock body\n  p part\n"),
                ("v/page.pug", "include part.pug\n"),
            ],
            "v/page.pug",
        )
        .unwrap();
        let mut named = 0;
        ast.walk(&mut |n| named += matches!(n, Node::NamedBlock { .. }) as usize);
        assert_eq!(named, 0);
        assert_eq!(texts(&ast), ["part"]);
    }
}
