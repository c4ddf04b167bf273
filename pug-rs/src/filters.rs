//! Filter registry and the filter application pass.
//!
//! Filters run at compile time: each `:name(options)` node is replaced by the
//! text (or tree) its filter returns.  Nested chains (`:outer:inner`) run
//! innermost first.  Options written in the template must be constant; they
//! are merged over the per-filter defaults in [`Options::filter_options`].

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;

use crate::ast::{Attribute, Block, Node};
use crate::error::{Diagnostic, Error, Result};
use crate::options::Options;
use crate::script::expr::{eval_constant, parse_expr};
use crate::script::{Object, Value};
use crate::token::Location;

/// Options handed to a filter.
pub type FilterOptions = Object;

/// What a filter produces.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutput {
    Text(String),
    /// A tree spliced in place of the filter node.
    Ast(Block),
}

impl From<String> for FilterOutput {
    fn from(s: String) -> Self {
        FilterOutput::Text(s)
    }
}

pub type Filter = Arc<dyn Fn(&str, &FilterOptions) -> std::result::Result<FilterOutput, String> + Send + Sync>;

/// Wrap a text-to-text function as a [`Filter`].
pub fn text_filter<F>(f: F) -> Filter
where
    F: Fn(&str, &FilterOptions) -> std::result::Result<String, String> + Send + Sync + 'static,
{
    Arc::new(move |text, options| f(text, options).map(FilterOutput::Text))
}

// ── Pass ──────────────────────────────────────────────────────────────────────

/// Replace every filter node below `ast`.  Per-call filters in `options`
/// shadow the `global` ones.
pub fn apply(mut ast: Block, global: &IndexMap<String, Filter>, options: &Options) -> Result<Block> {
    let pass = Pass { global, options };
    pass.block(&mut ast)?;
    Ok(ast)
}

struct Pass<'a> {
    global: &'a IndexMap<String, Filter>,
    options: &'a Options,
}

impl Pass<'_> {
    fn block(&self, block: &mut Block) -> Result<()> {
        let file = block.file.clone();
        for node in block.nodes.iter_mut() {
            if let Node::Filter { .. } = node {
                *node = self.filter(std::mem::replace(node, Node::Block(Block::default())), file.as_ref())?;
            }
            for child in node.child_blocks_mut() {
                self.block(child)?;
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&Filter> {
        let name = self.options.filter_aliases.get(name).map_or(name, String::as_str);
        self.options.filters.get(name).or_else(|| self.global.get(name))
    }

    fn filter(&self, node: Node, file: Option<&Arc<Path>>) -> Result<Node> {
        let Node::Filter {
            name,
            attrs,
            mut block,
            loc,
        } = node
        else {
            return Ok(node);
        };
        if matches!(block.nodes.first(), Some(Node::Filter { .. })) {
            let inner = std::mem::replace(&mut block.nodes[0], Node::Block(Block::default()));
            block.nodes[0] = self.filter(inner, block.file.as_ref().or(file))?;
        }
        let text: String = block
            .nodes
            .iter()
            .filter_map(|n| match n {
                Node::Text { value, .. } => Some(value.as_str()),
                _ => None,
            })
            .collect();

        let mut options = self.filter_options(&name, &attrs, loc, file)?;
        if let (false, Some(f)) = (options.contains_key("filename"), file) {
            options.insert("filename".to_owned(), Value::from(f.display().to_string()));
        }

        let fail = |code, message: String| Error::Compile(Diagnostic::new(code, message, loc.start_line, loc.start_col).with_file(file.map(|f| f.as_ref())));
        let filter = self
            .lookup(&name)
            .ok_or_else(|| fail("PUG:UNKNOWN_FILTER", format!("unknown filter \":{name}\"")))?;
        let output = filter(&text, &options).map_err(|e| fail("PUG:FILTER_ERROR", format!(":{name}: {e}")))?;
        debug!(":{name} filtered {} byte(s)", text.len());
        Ok(match output {
            FilterOutput::Text(value) => Node::Text { value, loc },
            FilterOutput::Ast(ast) => Node::Block(ast),
        })
    }

    /// Constant attribute values merged over the registered defaults.
    fn filter_options(&self, name: &str, attrs: &[Attribute], loc: Location, file: Option<&Arc<Path>>) -> Result<FilterOptions> {
        let mut out = Object::new();
        for attr in attrs {
            let value = parse_expr(&attr.value).ok().and_then(|e| eval_constant(&e));
            let Some(value) = value else {
                return Err(Error::Compile(
                    Diagnostic::new(
                        "PUG:FILTER_OPTION_NOT_CONSTANT",
                        format!(
                            "{} is not constant. All filters are rendered compile-time so filter options must be constants.",
                            attr.value
                        ),
                        attr.loc.start_line.max(loc.start_line),
                        attr.loc.start_col,
                    )
                    .with_file(file.map(|f| f.as_ref())),
                ));
            };
            out.insert(attr.name.clone(), value);
        }
        if let Some(defaults) = self.options.filter_options.get(name) {
            for (k, v) in defaults {
                out.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        Ok(out)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn upper() -> Filter {
        text_filter(|s, _| Ok(s.to_uppercase()))
    }

    fn run(src: &str, options: &Options) -> Result<Block> {
        let ast = parse(lex(src, &[])?, None, &[])?;
        let mut global = IndexMap::new();
        global.insert("upper".to_owned(), upper());
        apply(ast, &global, options)
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

    #[test]
    fn text_filter_replaces_node() {
        let ast = run("div\n  :upper\n    hello\n    world\n", &Options::new()).unwrap();
        assert_eq!(texts(&ast), ["HELLO\nWORLD"]);
    }

    #[test]
    fn nested_runs_innermost_first() {
        let wrap = text_filter(|s, _| Ok(format!("[{s}]")));
        let options = Options::new().with_filter("wrap", wrap);
        let ast = run(":upper:wrap hi\n", &options).unwrap();
        assert_eq!(texts(&ast), ["[HI]"]);
    }

    #[test]
    fn options_are_constant_and_merged_with_defaults() {
        let echo = text_filter(|_, o| Ok(format!("{}-{}", o["a"], o["b"])));
        let mut defaults = Object::new();
        defaults.insert("a".into(), Value::from("da"));
        defaults.insert("b".into(), Value::from("db"));
        let options = Options::new().with_filter("echo", echo).with_filter_options("echo", defaults);
        let ast = run(":echo(a='x' + 'y') t\n", &options).unwrap();
        assert_eq!(texts(&ast), ["xy-db"]);

        let err = run(":echo(a=someVar) t\n", &options).unwrap_err();
        assert_eq!(err.code(), "PUG:FILTER_OPTION_NOT_CONSTANT");
    }

    #[test]
    fn aliases_and_per_call_override() {
        let options = Options::new()
            .with_filter_alias("shout", "upper")
            .with_filter("upper", text_filter(|s, _| Ok(format!("local:{s}"))));
        let ast = run(":shout x\n", &options).unwrap();
        assert_eq!(texts(&ast), ["local:x"]);
    }

    #[test]
    fn unknown_filter() {
        let err = run(":nope x\n", &Options::new()).unwrap_err();
        assert_eq!(err.code(), "PUG:UNKNOWN_FILTER");
        assert_eq!(err.diagnostic().unwrap().line, 1);
    }

    #[test]
    fn ast_output_is_spliced() {
        let tree: Filter = Arc::new(|s, _| {
            let loc = Location::point(1, 1);
            Ok(FilterOutput::Ast(Block::with_nodes(
                vec![Node::Text { value: s.to_owned(), loc }, Node::Text { value: "!".into(), loc }],
                None,
                loc,
            )))
        });
        let ast = run(":tree x\n", &Options::new().with_filter("tree", tree)).unwrap();
        assert_eq!(texts(&ast), ["x", "!"]);
    }
}
