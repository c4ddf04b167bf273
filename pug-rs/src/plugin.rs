//! Plugin hooks.
//!
//! A plugin implements any subset of the [`Hook`]s, announced through
//! [`Plugin::hooks`]; every hook method has a pass-through default.  Ordinary
//! hooks run for each implementing plugin in registration order, each one
//! receiving the previous plugin's output.  [`Hook::Resolve`], [`Hook::Read`]
//! and [`Hook::GenerateCode`] replace a built-in step and may be claimed by
//! at most one plugin; [`Plugins::new`] rejects a conflicting set before any
//! compilation work starts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use log::debug;

use crate::ast::{Block, Node};
use crate::codegen;
use crate::error::{Error, LoadError, Result};
use crate::lexer::Lexer;
use crate::options::Options;
use crate::parser::Parser;
use crate::program::Program;
use crate::token::Token;

// ── Hook ──────────────────────────────────────────────────────────────────────

/// A pipeline stage boundary a plugin can attach to.
///
/// Discriminants are dense so `hook as u32` indexes a [`HookSet`] bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Hook {
    PreLex = 0,
    Lex = 1,
    PostLex = 2,
    PreParse = 3,
    Parse = 4,
    PostParse = 5,
    PreLoad = 6,
    PostLoad = 7,
    PreFilters = 8,
    PostFilters = 9,
    PreLink = 10,
    PostLink = 11,
    PreCodeGen = 12,
    GenerateCode = 13,
    PostCodeGen = 14,
    Read = 15,
    Resolve = 16,
}

impl Hook {
    /// Every hook in pipeline order.
    pub const ALL: &'static [Hook] = &[
        Hook::PreLex,
        Hook::Lex,
        Hook::PostLex,
        Hook::PreParse,
        Hook::Parse,
        Hook::PostParse,
        Hook::PreLoad,
        Hook::PostLoad,
        Hook::PreFilters,
        Hook::PostFilters,
        Hook::PreLink,
        Hook::PostLink,
        Hook::PreCodeGen,
        Hook::GenerateCode,
        Hook::PostCodeGen,
        Hook::Read,
        Hook::Resolve,
    ];

    pub const COUNT: usize = 17;

    /// Hooks that replace a built-in step rather than transform a value.
    pub const SINGLE_OWNER: &'static [Hook] = &[Hook::Resolve, Hook::Read, Hook::GenerateCode];

    /// The camel-case name used in configuration and messages.
    pub fn name(self) -> &'static str {
        match self {
            Hook::PreLex => "preLex",
            Hook::Lex => "lex",
            Hook::PostLex => "postLex",
            Hook::PreParse => "preParse",
            Hook::Parse => "parse",
            Hook::PostParse => "postParse",
            Hook::PreLoad => "preLoad",
            Hook::PostLoad => "postLoad",
            Hook::PreFilters => "preFilters",
            Hook::PostFilters => "postFilters",
            Hook::PreLink => "preLink",
            Hook::PostLink => "postLink",
            Hook::PreCodeGen => "preCodeGen",
            Hook::GenerateCode => "generateCode",
            Hook::PostCodeGen => "postCodeGen",
            Hook::Read => "read",
            Hook::Resolve => "resolve",
        }
    }

    pub fn is_single_owner(self) -> bool {
        Hook::SINGLE_OWNER.contains(&self)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Hook {
    type Err = String;

    /// Case-insensitive; `pre_lex` and `pre-lex` spellings are accepted.
    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let wanted: String = s.chars().filter(|c| *c != '_' && *c != '-').collect();
        Hook::ALL
            .iter()
            .copied()
            .find(|h| h.name().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| format!("invalid plugin hook {s:?}"))
    }
}

// ── HookSet ───────────────────────────────────────────────────────────────────

/// A set of [`Hook`]s stored as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookSet(u32);

impl HookSet {
    pub const NONE: Self = Self(0);

    #[inline]
    pub fn contains(self, hook: Hook) -> bool {
        self.0 & (1u32 << hook as u32) != 0
    }

    #[inline]
    pub fn insert(&mut self, hook: Hook) {
        self.0 |= 1u32 << hook as u32;
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, hook: Hook) -> Self {
        self.insert(hook);
        self
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<Hook> for HookSet {
    fn from(h: Hook) -> Self {
        HookSet::NONE.with(h)
    }
}

impl FromIterator<Hook> for HookSet {
    fn from_iter<I: IntoIterator<Item = Hook>>(iter: I) -> Self {
        iter.into_iter().fold(HookSet::NONE, HookSet::with)
    }
}

// ── Plugin ────────────────────────────────────────────────────────────────────

/// One set of pipeline hooks.  Only the methods whose hook appears in
/// [`hooks`](Self::hooks) are ever called.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str {
        "plugin"
    }

    /// The hooks this plugin implements.
    fn hooks(&self) -> HookSet;

    fn pre_lex(&self, src: String, _options: &Options) -> Result<String> {
        Ok(src)
    }

    /// Extra lexing rule tried when no built-in rule matches.  Returns
    /// `Ok(true)` after consuming input and emitting tokens.
    fn lex(&self, _lexer: &mut Lexer<'_>) -> Result<bool> {
        Ok(false)
    }

    fn post_lex(&self, tokens: Vec<Token>, _options: &Options) -> Result<Vec<Token>> {
        Ok(tokens)
    }

    fn pre_parse(&self, tokens: Vec<Token>, _options: &Options) -> Result<Vec<Token>> {
        Ok(tokens)
    }

    /// Parse a custom token at the head of the stream into a node.
    fn parse(&self, _parser: &mut Parser<'_>) -> Result<Option<Node>> {
        Ok(None)
    }

    fn post_parse(&self, ast: Block, _options: &Options) -> Result<Block> {
        Ok(ast)
    }

    fn pre_load(&self, ast: Block, _options: &Options) -> Result<Block> {
        Ok(ast)
    }

    fn post_load(&self, ast: Block, _options: &Options) -> Result<Block> {
        Ok(ast)
    }

    fn pre_filters(&self, ast: Block, _options: &Options) -> Result<Block> {
        Ok(ast)
    }

    fn post_filters(&self, ast: Block, _options: &Options) -> Result<Block> {
        Ok(ast)
    }

    fn pre_link(&self, ast: Block, _options: &Options) -> Result<Block> {
        Ok(ast)
    }

    fn post_link(&self, ast: Block, _options: &Options) -> Result<Block> {
        Ok(ast)
    }

    fn pre_code_gen(&self, ast: Block, _options: &Options) -> Result<Block> {
        Ok(ast)
    }

    fn generate_code(&self, ast: &Block, options: &Options) -> Result<Program> {
        codegen::generate(ast, options)
    }

    fn post_code_gen(&self, program: Program, _options: &Options) -> Result<Program> {
        Ok(program)
    }

    fn resolve(&self, name: &str, source: Option<&Path>, options: &Options) -> std::result::Result<PathBuf, LoadError> {
        options.loader.resolve(name, source, options)
    }

    fn read(&self, path: &Path, options: &Options) -> std::result::Result<String, LoadError> {
        options.loader.read(path, options)
    }
}

// ── Plugins ───────────────────────────────────────────────────────────────────

/// The registered plugins of one compilation, validated.
#[derive(Clone, Default)]
pub struct Plugins {
    list: Vec<Arc<dyn Plugin>>,
}

impl fmt::Debug for Plugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.list.iter().map(|p| p.name())).finish()
    }
}

impl Plugins {
    /// Validate `list`: each single-owner hook may be claimed at most once.
    pub fn new(list: &[Arc<dyn Plugin>]) -> Result<Self> {
        for &hook in Hook::SINGLE_OWNER {
            let owners = list.iter().filter(|p| p.hooks().contains(hook)).count();
            if owners > 1 {
                return Err(Error::PluginConfig { hook });
            }
        }
        Ok(Plugins { list: list.to_vec() })
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Plugins implementing `hook`, in registration order.
    pub fn implementing(&self, hook: Hook) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.list.iter().filter(move |p| p.hooks().contains(hook))
    }

    /// Owned copies of the plugins implementing `hook`.
    pub fn collect(&self, hook: Hook) -> Vec<Arc<dyn Plugin>> {
        self.implementing(hook).cloned().collect()
    }

    fn owner(&self, hook: Hook) -> Option<&Arc<dyn Plugin>> {
        self.implementing(hook).next()
    }

    pub fn pre_lex(&self, src: String, options: &Options) -> Result<String> {
        self.implementing(Hook::PreLex).try_fold(src, |src, p| {
            debug!("{}: {}", Hook::PreLex, p.name());
            p.pre_lex(src, options)
        })
    }

    /// Run [`Hook::PostLex`] or [`Hook::PreParse`].
    pub fn tokens(&self, hook: Hook, tokens: Vec<Token>, options: &Options) -> Result<Vec<Token>> {
        self.implementing(hook).try_fold(tokens, |tokens, p| {
            debug!("{hook}: {}", p.name());
            match hook {
                Hook::PreParse => p.pre_parse(tokens, options),
                _ => p.post_lex(tokens, options),
            }
        })
    }

    /// Run one of the AST-transforming hooks.
    pub fn ast(&self, hook: Hook, ast: Block, options: &Options) -> Result<Block> {
        self.implementing(hook).try_fold(ast, |ast, p| {
            debug!("{hook}: {}", p.name());
            match hook {
                Hook::PostParse => p.post_parse(ast, options),
                Hook::PreLoad => p.pre_load(ast, options),
                Hook::PostLoad => p.post_load(ast, options),
                Hook::PreFilters => p.pre_filters(ast, options),
                Hook::PostFilters => p.post_filters(ast, options),
                Hook::PreLink => p.pre_link(ast, options),
                Hook::PostLink => p.post_link(ast, options),
                Hook::PreCodeGen => p.pre_code_gen(ast, options),
                _ => Ok(ast),
            }
        })
    }

    pub fn post_code_gen(&self, program: Program, options: &Options) -> Result<Program> {
        self.implementing(Hook::PostCodeGen).try_fold(program, |program, p| {
            debug!("{}: {}", Hook::PostCodeGen, p.name());
            p.post_code_gen(program, options)
        })
    }

    /// The claiming plugin's code generator, or the built-in one.
    pub fn generate(&self, ast: &Block, options: &Options) -> Result<Program> {
        match self.owner(Hook::GenerateCode) {
            Some(p) => p.generate_code(ast, options),
            None => codegen::generate(ast, options),
        }
    }

    pub fn resolve(&self, name: &str, source: Option<&Path>, options: &Options) -> std::result::Result<PathBuf, LoadError> {
        match self.owner(Hook::Resolve) {
            Some(p) => p.resolve(name, source, options),
            None => options.loader.resolve(name, source, options),
        }
    }

    pub fn read(&self, path: &Path, options: &Options) -> std::result::Result<String, LoadError> {
        match self.owner(Hook::Read) {
            Some(p) => p.read(path, options),
            None => options.loader.read(path, options),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Location;

    struct Upper;

    impl Plugin for Upper {
        fn hooks(&self) -> HookSet {
            HookSet::from(Hook::PreLex)
        }
        fn pre_lex(&self, src: String, _: &Options) -> Result<String> {
            Ok(src.to_uppercase())
        }
    }

    struct Suffix(&'static str);

    impl Plugin for Suffix {
        fn hooks(&self) -> HookSet {
            [Hook::PreLex, Hook::PostParse].into_iter().collect()
        }
        fn pre_lex(&self, src: String, _: &Options) -> Result<String> {
            Ok(src + self.0)
        }
        fn post_parse(&self, mut ast: Block, _: &Options) -> Result<Block> {
            ast.nodes.push(Node::Text {
                value: self.0.into(),
                loc: Location::default(),
            });
            Ok(ast)
        }
    }

    struct Reader;

    impl Plugin for Reader {
        fn hooks(&self) -> HookSet {
            HookSet::from(Hook::Read)
        }
        fn read(&self, path: &Path, _: &Options) -> std::result::Result<String, LoadError> {
            Ok(format!("p {}", path.display()))
        }
    }

    #[test]
    fn count_matches_all_len() {
        assert_eq!(Hook::COUNT, Hook::ALL.len());
        for (i, &h) in Hook::ALL.iter().enumerate() {
            assert_eq!(h as usize, i, "{h:?} has wrong discriminant");
        }
    }

    #[test]
    fn names_round_trip() {
        for &h in Hook::ALL {
            assert_eq!(h.name().parse::<Hook>().unwrap(), h);
        }
        assert_eq!("pre_code_gen".parse::<Hook>().unwrap(), Hook::PreCodeGen);
        assert!("later".parse::<Hook>().is_err());
    }

    #[test]
    fn hookset_membership() {
        let s: HookSet = [Hook::Read, Hook::Lex].into_iter().collect();
        assert!(s.contains(Hook::Read) && s.contains(Hook::Lex));
        assert!(!s.contains(Hook::Resolve));
        assert!(HookSet::NONE.is_empty());
    }

    #[test]
    fn ordinary_hooks_chain_in_registration_order() {
        let list: Vec<Arc<dyn Plugin>> = vec![Arc::new(Suffix("a")), Arc::new(Upper), Arc::new(Suffix("b"))];
        let plugins = Plugins::new(&list).unwrap();
        let out = plugins.pre_lex("x".into(), &Options::default()).unwrap();
        assert_eq!(out, "XAb");
    }

    #[test]
    fn ast_hooks_dispatch_by_stage() {
        let list: Vec<Arc<dyn Plugin>> = vec![Arc::new(Suffix("s"))];
        let plugins = Plugins::new(&list).unwrap();
        let o = Options::default();
        let ast = plugins.ast(Hook::PreLink, Block::default(), &o).unwrap();
        assert!(ast.nodes.is_empty());
        let ast = plugins.ast(Hook::PostParse, Block::default(), &o).unwrap();
        assert_eq!(ast.nodes.len(), 1);
    }

    #[test]
    fn two_readers_conflict() {
        let list: Vec<Arc<dyn Plugin>> = vec![Arc::new(Reader), Arc::new(Upper), Arc::new(Reader)];
        let err = Plugins::new(&list).unwrap_err();
        assert!(matches!(err, Error::PluginConfig { hook: Hook::Read }));
        assert_eq!(err.code(), "PUG:PLUGIN_CONFLICT");
        assert!(err.to_string().contains("`read`"));
    }

    #[test]
    fn single_owner_replaces_loader() {
        let list: Vec<Arc<dyn Plugin>> = vec![Arc::new(Reader)];
        let plugins = Plugins::new(&list).unwrap();
        let text = plugins.read(Path::new("x.pug"), &Options::default()).unwrap();
        assert_eq!(text, "p x.pug");
    }
}
