//! Compile and render configuration.
//!
//! | Field | Effect |
//! |-------|--------|
//! | `filename` | error attribution, relative `extends`/`include`, cache key |
//! | `basedir` | root for `/absolute` includes |
//! | `doctype` | doctype assumed when the template declares none |
//! | `pretty` | indent the output |
//! | `filters` / `filter_options` / `filter_aliases` | filter registry and defaults |
//! | `self_namespace` | locals only reachable as `self.name` |
//! | `compile_debug` | keep source positions for render-time errors |
//! | `include_sources` | keep every loaded source in the program |
//! | `globals` | names resolved by the runtime instead of the locals |
//! | `plugins` | pipeline hooks |
//! | `cache` | template cache used by `compile_file` |
//! | `debug` | log the generated listing |

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::cache::TemplateCache;
use crate::filters::Filter;
use crate::load::{FsLoader, Loader};
use crate::plugin::Plugin;
use crate::script::Object;

// ── Pretty ────────────────────────────────────────────────────────────────────

/// Output indentation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Pretty {
    #[default]
    Off,
    Indent(String),
}

impl Pretty {
    /// Two-space indentation.
    pub fn on() -> Self {
        Pretty::Indent("  ".to_owned())
    }

    pub fn indent(&self) -> Option<&str> {
        match self {
            Pretty::Off => None,
            Pretty::Indent(s) => Some(s),
        }
    }
}

impl From<bool> for Pretty {
    fn from(on: bool) -> Self {
        if on {
            Pretty::on()
        } else {
            Pretty::Off
        }
    }
}

impl From<&str> for Pretty {
    fn from(indent: &str) -> Self {
        Pretty::Indent(indent.to_owned())
    }
}

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Options {
    pub filename: Option<PathBuf>,
    pub basedir: Option<PathBuf>,
    pub doctype: Option<String>,
    pub pretty: Pretty,
    /// Per-call filters; override the compiler's global ones.
    pub filters: IndexMap<String, Filter>,
    /// Default options per filter name.
    pub filter_options: IndexMap<String, Object>,
    /// Alternative names for registered filters.
    pub filter_aliases: IndexMap<String, String>,
    pub self_namespace: bool,
    pub compile_debug: bool,
    pub include_sources: bool,
    /// Remove `//` comments as well as `//-` ones.
    pub strip_buffered_comments: bool,
    pub globals: Vec<String>,
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub cache: Option<Arc<TemplateCache>>,
    pub debug: bool,
    /// Identifier of the generated routine.
    pub name: String,
    /// Appended to `extends`/`include` paths that have no extension.
    pub extension: String,
    pub loader: Arc<dyn Loader>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            filename: None,
            basedir: None,
            doctype: None,
            pretty: Pretty::Off,
            filters: IndexMap::new(),
            filter_options: IndexMap::new(),
            filter_aliases: IndexMap::new(),
            self_namespace: false,
            compile_debug: true,
            include_sources: false,
            strip_buffered_comments: false,
            globals: Vec::new(),
            plugins: Vec::new(),
            cache: None,
            debug: false,
            name: "template".to_owned(),
            extension: ".pug".to_owned(),
            loader: Arc::new(FsLoader),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("filename", &self.filename)
            .field("basedir", &self.basedir)
            .field("doctype", &self.doctype)
            .field("pretty", &self.pretty)
            .field("filters", &self.filters.keys().collect::<Vec<_>>())
            .field("filter_aliases", &self.filter_aliases)
            .field("self_namespace", &self.self_namespace)
            .field("compile_debug", &self.compile_debug)
            .field("include_sources", &self.include_sources)
            .field("globals", &self.globals)
            .field("plugins", &self.plugins.len())
            .field("cache", &self.cache.is_some())
            .field("debug", &self.debug)
            .field("name", &self.name)
            .field("extension", &self.extension)
            .finish_non_exhaustive()
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filename(mut self, filename: impl AsRef<Path>) -> Self {
        self.filename = Some(filename.as_ref().to_path_buf());
        self
    }

    pub fn with_basedir(mut self, basedir: impl AsRef<Path>) -> Self {
        self.basedir = Some(basedir.as_ref().to_path_buf());
        self
    }

    pub fn with_doctype(mut self, doctype: impl Into<String>) -> Self {
        self.doctype = Some(doctype.into());
        self
    }

    pub fn with_pretty(mut self, pretty: impl Into<Pretty>) -> Self {
        self.pretty = pretty.into();
        self
    }

    pub fn with_filter(mut self, name: impl Into<String>, filter: Filter) -> Self {
        self.filters.insert(name.into(), filter);
        self
    }

    pub fn with_filter_options(mut self, name: impl Into<String>, options: Object) -> Self {
        self.filter_options.insert(name.into(), options);
        self
    }

    pub fn with_filter_alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.filter_aliases.insert(alias.into(), target.into());
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_globals<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.globals.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_cache(mut self, cache: Arc<TemplateCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_compile_debug(mut self, on: bool) -> Self {
        self.compile_debug = on;
        self
    }

    pub fn with_self_namespace(mut self, on: bool) -> Self {
        self.self_namespace = on;
        self
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o = Options::default();
        assert!(o.compile_debug);
        assert_eq!(o.pretty, Pretty::Off);
        assert_eq!(o.name, "template");
        assert_eq!(o.extension, ".pug");
    }

    #[test]
    fn pretty_conversions() {
        assert_eq!(Pretty::from(true).indent(), Some("  "));
        assert_eq!(Pretty::from(false).indent(), None);
        assert_eq!(Pretty::from("\t").indent(), Some("\t"));
    }

    #[test]
    fn builders_chain() {
        let o = Options::new()
            .with_filename("views/index.pug")
            .with_doctype("xml")
            .with_globals(["Math", "JSON"]);
        assert_eq!(o.filename.as_deref(), Some(Path::new("views/index.pug")));
        assert_eq!(o.doctype.as_deref(), Some("xml"));
        assert_eq!(o.globals, ["Math", "JSON"]);
    }
}
