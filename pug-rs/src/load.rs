//! Loading `extends` and `include` targets.
//!
//! The [`Loader`] collaborator turns a reference into a canonical path and
//! reads it.  [`load`] walks a parsed tree, fills every [`FileRef`] with the
//! target's content (templates are parsed and loaded recursively), detects
//! cycles on the active path, and records each file read, once, in order.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;

use crate::ast::{Block, FileRef, Loaded, Node};
use crate::error::{link, Diagnostic, Error, LoadError, Result};
use crate::options::Options;
use crate::plugin::Plugins;

// ── Loader ────────────────────────────────────────────────────────────────────

/// Resolve/read collaborator used for `extends` and `include`.
pub trait Loader: Send + Sync {
    /// Canonical path of `name` as referenced from `source`.
    fn resolve(&self, name: &str, source: Option<&Path>, options: &Options) -> std::result::Result<PathBuf, LoadError>;

    fn read(&self, path: &Path, options: &Options) -> std::result::Result<String, LoadError>;
}

/// Join a reference onto the directory of its source, or onto `basedir` when
/// it starts with `/`.
pub fn join_reference(name: &str, source: Option<&Path>, basedir: Option<&Path>) -> std::result::Result<PathBuf, LoadError> {
    let name = name.trim();
    if let Some(absolute) = name.strip_prefix('/') {
        let base = basedir.ok_or_else(|| LoadError::NoBasedir { name: name.to_owned() })?;
        Ok(base.join(absolute))
    } else {
        let source = source.ok_or_else(|| LoadError::NoFilename { name: name.to_owned() })?;
        Ok(source.parent().unwrap_or_else(|| Path::new("")).join(name))
    }
}

/// Remove `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Files on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsLoader;

impl Loader for FsLoader {
    fn resolve(&self, name: &str, source: Option<&Path>, options: &Options) -> std::result::Result<PathBuf, LoadError> {
        let path = join_reference(name, source, options.basedir.as_deref())?;
        fs::canonicalize(&path).map_err(|_| LoadError::NotFound {
            name: path.display().to_string(),
        })
    }

    fn read(&self, path: &Path, _options: &Options) -> std::result::Result<String, LoadError> {
        fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Templates held in memory, keyed by normalized path.
#[derive(Debug, Default, Clone)]
pub struct MemoryLoader {
    files: IndexMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.files.insert(normalize(path.as_ref()), content.into());
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }
}

impl Loader for MemoryLoader {
    fn resolve(&self, name: &str, source: Option<&Path>, options: &Options) -> std::result::Result<PathBuf, LoadError> {
        let path = normalize(&join_reference(name, source, options.basedir.as_deref())?);
        if self.files.contains_key(&path) {
            Ok(path)
        } else {
            Err(LoadError::NotFound {
                name: path.display().to_string(),
            })
        }
    }

    fn read(&self, path: &Path, _options: &Options) -> std::result::Result<String, LoadError> {
        self.files.get(&normalize(path)).cloned().ok_or_else(|| LoadError::NotFound {
            name: path.display().to_string(),
        })
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Front end used for every loaded template: lex, strip, parse.
pub type ParseFn<'a> = dyn Fn(&str, Option<Arc<Path>>) -> Result<Block> + 'a;

/// A loaded tree plus everything read to build it.
#[derive(Debug)]
pub struct LoadedTree {
    pub ast: Block,
    /// Every file read, in first-read order, each once.
    pub dependencies: Vec<PathBuf>,
    /// Source text of each file, keyed like `dependencies`.
    pub sources: IndexMap<PathBuf, String>,
}

/// Identity of the root file for cycle detection and dependency tracking.
pub fn root_key(filename: &Path) -> PathBuf {
    fs::canonicalize(filename).unwrap_or_else(|_| normalize(filename))
}

struct Session<'a> {
    options: &'a Options,
    plugins: &'a Plugins,
    parse: &'a ParseFn<'a>,
    /// Files on the active resolution path.
    active: Vec<PathBuf>,
    sources: IndexMap<PathBuf, String>,
    parsed: HashMap<PathBuf, Block>,
}

/// Fill every `extends`/`include` reference below `ast`.
pub fn load(ast: Block, root_src: &str, options: &Options, plugins: &Plugins, parse: &ParseFn<'_>) -> Result<LoadedTree> {
    let mut session = Session {
        options,
        plugins,
        parse,
        active: Vec::new(),
        sources: IndexMap::new(),
        parsed: HashMap::new(),
    };
    let root = options.filename.as_deref().map(root_key);
    if let Some(root) = &root {
        session.sources.insert(root.clone(), root_src.to_owned());
        session.active.push(root.clone());
    }
    let mut ast = ast;
    session.load_refs(&mut ast, options.filename.as_deref(), root_src)?;
    let dependencies: Vec<PathBuf> = session.sources.keys().cloned().collect();
    debug!("loaded {} file(s)", dependencies.len());
    Ok(LoadedTree {
        ast,
        dependencies,
        sources: session.sources,
    })
}

/// `true` when an include of `path` is spliced as a template.
pub fn is_template_include(path: &str, filters: usize, extension: &str) -> bool {
    filters == 0 && path.ends_with(extension)
}

impl Session<'_> {
    /// Load the references of a tree read from `file` whose source is `src`.
    fn load_refs(&mut self, ast: &mut Block, file: Option<&Path>, src: &str) -> Result<()> {
        let extension = self.options.extension.clone();
        ast.try_walk_mut(&mut |node| {
            let (file_ref, template) = match node {
                Node::Extends { file: r, .. } => (r, true),
                Node::Include { file: r, filters, .. } => {
                    let template = is_template_include(&r.path, filters.len(), &extension);
                    (r, template)
                }
                _ => return Ok(()),
            };
            if file_ref.content.is_none() {
                self.load_ref(file_ref, template, file)?;
            }
            Ok::<(), Error>(())
        })
        .map_err(|e| e.located_in(file, src))
    }

    fn load_ref(&mut self, file_ref: &mut FileRef, template: bool, source: Option<&Path>) -> Result<()> {
        let line = file_ref.loc.start_line;
        let column = file_ref.loc.start_col;
        let wrap = |e: LoadError| load_failure(e, line, column);

        let path = self.plugins.resolve(&file_ref.path, source, self.options).map_err(wrap)?;
        if self.active.contains(&path) {
            let mut chain: Vec<String> = self.active.iter().map(|p| p.display().to_string()).collect();
            chain.push(path.display().to_string());
            return Err(link(
                "PUG:CYCLIC_INHERITANCE",
                format!("circular extends/include: {}", chain.join(" -> ")),
                line,
                column,
            ));
        }

        let text = match self.sources.get(&path) {
            Some(text) => text.clone(),
            None => {
                let text = self.plugins.read(&path, self.options).map_err(wrap)?;
                debug!("read {}", path.display());
                self.sources.insert(path.clone(), text.clone());
                text
            }
        };

        file_ref.content = Some(if template {
            Loaded::Template(self.load_template(&path, &text)?)
        } else {
            Loaded::Raw(text)
        });
        file_ref.resolved = Some(path);
        Ok(())
    }

    fn load_template(&mut self, path: &Path, text: &str) -> Result<Block> {
        if let Some(ast) = self.parsed.get(path) {
            return Ok(ast.clone());
        }
        let file: Arc<Path> = Arc::from(path);
        let mut ast = (self.parse)(text, Some(file)).map_err(|e| e.located_in(Some(path), text))?;
        self.active.push(path.to_path_buf());
        let loaded = self.load_refs(&mut ast, Some(path), text);
        self.active.pop();
        loaded?;
        self.parsed.insert(path.to_path_buf(), ast.clone());
        Ok(ast)
    }
}

fn load_failure(err: LoadError, line: usize, column: usize) -> Error {
    let code = match &err {
        LoadError::NotFound { .. } => "PUG:FILE_NOT_FOUND",
        LoadError::NoBasedir { .. } => "PUG:NO_BASEDIR",
        LoadError::NoFilename { .. } => "PUG:NO_FILENAME",
        LoadError::Read { .. } => "PUG:READ_FAILED",
        LoadError::Other(_) => "PUG:LOAD_FAILED",
    };
    Error::Link(Diagnostic::new(code, err.to_string(), line, column))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn front(src: &str, file: Option<Arc<Path>>) -> Result<Block> {
        parse(lex(src, &[])?, file, &[])
    }

    fn options(loader: MemoryLoader, root: &str) -> Options {
        Options::new().with_filename(root).with_loader(Arc::new(loader))
    }

    fn run(loader: MemoryLoader, root: &str, src: &str) -> Result<LoadedTree> {
        let o = options(loader, root);
        let plugins = Plugins::default();
        load(front(src, Some(Arc::from(Path::new(root))))?, src, &o, &plugins, &front)
    }

    #[test]
    fn join_and_normalize() {
        let p = join_reference("../b.pug", Some(Path::new("views/x/a.pug")), None).unwrap();
        assert_eq!(normalize(&p), PathBuf::from("views/b.pug"));
        let p = join_reference("/inc/h.pug", None, Some(Path::new("/srv"))).unwrap();
        assert_eq!(p, PathBuf::from("/srv/inc/h.pug"));
        assert!(matches!(
            join_reference("/x.pug", None, None),
            Err(LoadError::NoBasedir { .. })
        ));
        assert!(matches!(join_reference("x.pug", None, None), Err(LoadError::NoFilename { .. })));
    }

    #[test]
    fn dependencies_are_read_once_in_order() {
        let loader = MemoryLoader::new()
            .with_file("v/layout.pug", "include head.pug\nblock body\ninclude head.pug")
            .with_file("v/head.pug", "title x");
        let tree = run(loader, "v/page.pug", "extends layout.pug\nblock body\n  p").unwrap();
        assert_eq!(
            tree.dependencies,
            [PathBuf::from("v/page.pug"), PathBuf::from("v/layout.pug"), PathBuf::from("v/head.pug")]
        );
    }

    #[test]
    fn raw_includes_keep_text() {
        let loader = MemoryLoader::new().with_file("v/style.css", "a{}");
        let tree = run(loader, "v/page.pug", "style\n  include style.css").unwrap();
        let mut found = None;
        tree.ast.walk(&mut |n| {
            if let Node::Include { file, .. } = n {
                found = file.content.clone();
            }
        });
        assert_eq!(found, Some(Loaded::Raw("a{}".into())));
    }

    #[test]
    fn cycle_is_reported_with_chain() {
        let loader = MemoryLoader::new()
            .with_file("v/a.pug", "include b.pug")
            .with_file("v/b.pug", "include a.pug");
        let err = run(loader, "v/a.pug", "include b.pug").unwrap_err();
        assert_eq!(err.code(), "PUG:CYCLIC_INHERITANCE");
        let d = err.diagnostic().unwrap();
        assert_eq!(d.file.as_deref(), Some(Path::new("v/b.pug")));
        assert!(d.message.contains("v/a.pug -> v/b.pug -> v/a.pug"));
    }

    #[test]
    fn missing_file_names_the_referencing_line() {
        let err = run(MemoryLoader::new(), "v/a.pug", "p\ninclude nope.pug").unwrap_err();
        assert_eq!(err.code(), "PUG:FILE_NOT_FOUND");
        let d = err.diagnostic().unwrap();
        assert_eq!((d.line, d.file.as_deref()), (2, Some(Path::new("v/a.pug"))));
    }
}
