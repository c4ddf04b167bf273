//! Pug template compiler.
//!
//! A template goes through a fixed pipeline:
//!
//! ```text
//! source ─ lex ─ strip comments ─ parse ─ load ─ link ─ filters ─ codegen ─ Program
//! ```
//!
//! Every stage boundary is a plugin [`Hook`](plugin::Hook).  The resulting
//! [`Template`] renders any number of times against different locals.
//!
//! ```rust
//! use pug::{Options, Value};
//! use serde_json::json;
//!
//! let template = pug::compile("p Hello #{name}!", &Options::new()).unwrap();
//! let html = template.render(&Value::from(json!({"name": "world"}))).unwrap();
//! assert_eq!(html, "<p>Hello world!</p>");
//! ```

pub mod ast;
pub mod cache;
pub mod codegen;
pub mod error;
pub mod filters;
pub mod lexer;
pub mod linker;
pub mod load;
pub mod options;
pub mod parser;
pub mod plugin;
pub mod program;
pub mod render;
pub mod runtime;
pub mod script;
pub mod strip;
pub mod token;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;

pub use cache::TemplateCache;
pub use error::{Diagnostic, Error, LoadError, Result};
pub use filters::{text_filter, Filter, FilterOptions, FilterOutput};
pub use options::{Options, Pretty};
pub use plugin::{Hook, HookSet, Plugin};
pub use program::Program;
pub use runtime::{DefaultRuntime, Runtime};
pub use script::{Object, Value};

use ast::Block;
use plugin::Plugins;
use token::TokenKind;

// ── Template ──────────────────────────────────────────────────────────────────

/// A compiled template.
#[derive(Debug, Clone)]
pub struct Template {
    program: Arc<Program>,
    dependencies: Vec<PathBuf>,
}

impl Template {
    pub fn new(program: Program, dependencies: Vec<PathBuf>) -> Self {
        Template {
            program: Arc::new(program),
            dependencies,
        }
    }

    /// Render with the stock runtime helpers.
    pub fn render(&self, locals: &Value) -> Result<String> {
        self.render_with(locals, &DefaultRuntime)
    }

    pub fn render_with(&self, locals: &Value, runtime: &dyn Runtime) -> Result<String> {
        render::render(&self.program, locals, runtime)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Every file read to build this template, root first.
    pub fn dependencies(&self) -> &[PathBuf] {
        &self.dependencies
    }

    /// The generated routine as a listing.
    pub fn source(&self) -> String {
        self.program.to_string()
    }
}

/// The output of a compilation: the routine and the files it was built from.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub program: Program,
    pub dependencies: Vec<PathBuf>,
}

impl From<CompilationUnit> for Template {
    fn from(unit: CompilationUnit) -> Self {
        Template::new(unit.program, unit.dependencies)
    }
}

// ── Compiler ──────────────────────────────────────────────────────────────────

/// Compiler with a registry of filters available to every compilation.
#[derive(Clone, Default)]
pub struct Compiler {
    filters: IndexMap<String, Filter>,
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler")
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter for every compilation made with this compiler.
    pub fn with_filter(mut self, name: impl Into<String>, filter: Filter) -> Self {
        self.filters.insert(name.into(), filter);
        self
    }

    pub fn compile(&self, src: &str, options: &Options) -> Result<Template> {
        if options.cache.is_some() && options.filename.is_none() {
            return Err(Error::Options {
                code: "PUG:CACHE_REQUIRES_FILENAME",
                message: "the \"filename\" option is required for caching".to_owned(),
            });
        }
        self.compile_with_dependencies(src, options).map(Template::from)
    }

    pub fn compile_with_dependencies(&self, src: &str, options: &Options) -> Result<CompilationUnit> {
        let plugins = Plugins::new(&options.plugins)?;
        self.compile_source(src, options, &plugins)
    }

    /// Read and compile `path`, consulting [`Options::cache`].
    pub fn compile_file(&self, path: impl AsRef<Path>, options: &Options) -> Result<Arc<Template>> {
        let path = path.as_ref();
        let options = options.clone().with_filename(path);
        let key = load::root_key(path);
        if let Some(hit) = options.cache.as_ref().and_then(|c| c.get(&key)) {
            debug!("cache hit {}", key.display());
            return Ok(hit);
        }
        let plugins = Plugins::new(&options.plugins)?;
        let src = plugins.read(path, &options)?;
        let template = Arc::new(Template::from(self.compile_source(&src, &options, &plugins)?));
        if let Some(cache) = &options.cache {
            cache.put(key, Arc::clone(&template));
        }
        Ok(template)
    }

    pub fn render(&self, src: &str, locals: &Value, options: &Options) -> Result<String> {
        self.compile(src, options)?.render(locals)
    }

    pub fn render_file(&self, path: impl AsRef<Path>, locals: &Value, options: &Options) -> Result<String> {
        self.compile_file(path, options)?.render(locals)
    }

    // ── Pipeline ──────────────────────────────────────────────────────────────

    /// Lex, strip and parse one file.
    fn front_end(src: &str, file: Option<Arc<Path>>, options: &Options, plugins: &Plugins) -> Result<Block> {
        let at = file.clone();
        let run = || -> Result<Block> {
            let src = plugins.pre_lex(src.to_owned(), options)?;
            let tokens = lexer::lex(&src, &plugins.collect(Hook::Lex))?;
            let mut tokens = plugins.tokens(Hook::PostLex, tokens, options)?;
            infer_extensions(&mut tokens, &options.extension);
            let tokens = strip::strip_comments(tokens, options.strip_buffered_comments)?;
            let tokens = plugins.tokens(Hook::PreParse, tokens, options)?;
            let parse_plugins = plugins.collect(Hook::Parse);
            let ast = parser::Parser::new(tokens, file, &parse_plugins)
                .with_extension(&options.extension)
                .parse()?;
            plugins.ast(Hook::PostParse, ast, options)
        };
        run().map_err(|e| e.located_in(at.as_deref(), src))
    }

    fn compile_source(&self, src: &str, options: &Options, plugins: &Plugins) -> Result<CompilationUnit> {
        let file: Option<Arc<Path>> = options.filename.as_deref().map(Arc::from);
        let ast = Self::front_end(src, file, options, plugins)?;
        let ast = plugins.ast(Hook::PreLoad, ast, options)?;

        let parse = |src: &str, file: Option<Arc<Path>>| Self::front_end(src, file, options, plugins);
        let loaded = load::load(ast, src, options, plugins, &parse)?;
        let sources = loaded.sources;
        let locate = |e: Error| locate_error(e, options, src, &sources);

        let ast = plugins.ast(Hook::PostLoad, loaded.ast, options)?;
        let ast = plugins.ast(Hook::PreLink, ast, options)?;
        let ast = linker::link(ast).map_err(locate)?;
        let ast = plugins.ast(Hook::PostLink, ast, options)?;
        let ast = plugins.ast(Hook::PreFilters, ast, options)?;
        let ast = filters::apply(ast, &self.filters, options).map_err(locate)?;
        let ast = plugins.ast(Hook::PostFilters, ast, options)?;
        let ast = plugins.ast(Hook::PreCodeGen, ast, options)?;
        let program = plugins.generate(&ast, options).map_err(locate)?;
        let mut program = plugins.post_code_gen(program, options)?;

        if options.compile_debug || options.include_sources {
            let root = options.filename.as_deref().map(load::root_key);
            program
                .sources
                .insert(options.filename.clone().unwrap_or_default(), src.to_owned());
            for (path, text) in &sources {
                if Some(path) != root.as_ref() {
                    program.sources.insert(path.clone(), text.clone());
                }
            }
        }
        if options.debug {
            debug!("compiled {}:\n{program}", options.name);
        }
        Ok(CompilationUnit {
            program,
            dependencies: loaded.dependencies,
        })
    }
}

/// Append the default extension to `extends`/`include` paths that lack one.
fn infer_extensions(tokens: &mut [token::Token], extension: &str) {
    for token in tokens {
        if let TokenKind::Path(path) = &mut token.kind {
            let trimmed = path.trim();
            if Path::new(trimmed).extension().is_none() {
                *path = format!("{trimmed}{extension}");
            }
        }
    }
}

/// Attach the excerpt of whichever loaded file a diagnostic points into.
fn locate_error(err: Error, options: &Options, root_src: &str, sources: &IndexMap<PathBuf, String>) -> Error {
    let file = err.diagnostic().and_then(|d| d.file.clone());
    let src = match &file {
        None => Some(root_src),
        Some(f) if options.filename.as_deref() == Some(f.as_path()) => Some(root_src),
        Some(f) => sources
            .get(f)
            .or_else(|| sources.get(&load::root_key(f)))
            .map(String::as_str),
    };
    match src {
        Some(src) => err.located_in(None, src),
        None => err,
    }
}

// ── Convenience ───────────────────────────────────────────────────────────────

pub fn compile(src: &str, options: &Options) -> Result<Template> {
    Compiler::new().compile(src, options)
}

pub fn compile_with_dependencies(src: &str, options: &Options) -> Result<CompilationUnit> {
    Compiler::new().compile_with_dependencies(src, options)
}

pub fn compile_file(path: impl AsRef<Path>, options: &Options) -> Result<Arc<Template>> {
    Compiler::new().compile_file(path, options)
}

pub fn render(src: &str, locals: &Value, options: &Options) -> Result<String> {
    Compiler::new().render(src, locals, options)
}

pub fn render_file(path: impl AsRef<Path>, locals: &Value, options: &Options) -> Result<String> {
    Compiler::new().render_file(path, locals, options)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
