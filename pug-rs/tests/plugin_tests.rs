//! Plugin hooks driven through a full compilation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pug::ast::{Block, Node};
use pug::token::{Location, Token, TokenKind};
use pug::{Error, Hook, HookSet, LoadError, Options, Plugin, Program, Value};

/// Records the order in which its hooks fire.
#[derive(Default, Clone)]
struct Recorder {
    seen: Arc<Mutex<Vec<Hook>>>,
}

impl Recorder {
    fn note(&self, hook: Hook) {
        self.seen.lock().unwrap().push(hook);
    }

    fn seen(&self) -> Vec<Hook> {
        self.seen.lock().unwrap().clone()
    }
}

impl Plugin for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn hooks(&self) -> HookSet {
        Hook::ALL
            .iter()
            .copied()
            .filter(|h| !h.is_single_owner() && !matches!(h, Hook::Lex | Hook::Parse))
            .collect()
    }

    fn pre_lex(&self, src: String, _: &Options) -> pug::Result<String> {
        self.note(Hook::PreLex);
        Ok(src)
    }

    fn post_lex(&self, tokens: Vec<Token>, _: &Options) -> pug::Result<Vec<Token>> {
        self.note(Hook::PostLex);
        Ok(tokens)
    }

    fn pre_parse(&self, tokens: Vec<Token>, _: &Options) -> pug::Result<Vec<Token>> {
        self.note(Hook::PreParse);
        Ok(tokens)
    }

    fn post_parse(&self, ast: Block, _: &Options) -> pug::Result<Block> {
        self.note(Hook::PostParse);
        Ok(ast)
    }

    fn pre_load(&self, ast: Block, _: &Options) -> pug::Result<Block> {
        self.note(Hook::PreLoad);
        Ok(ast)
    }

    fn post_load(&self, ast: Block, _: &Options) -> pug::Result<Block> {
        self.note(Hook::PostLoad);
        Ok(ast)
    }

    fn pre_link(&self, ast: Block, _: &Options) -> pug::Result<Block> {
        self.note(Hook::PreLink);
        Ok(ast)
    }

    fn post_link(&self, ast: Block, _: &Options) -> pug::Result<Block> {
        self.note(Hook::PostLink);
        Ok(ast)
    }

    fn pre_filters(&self, ast: Block, _: &Options) -> pug::Result<Block> {
        self.note(Hook::PreFilters);
        Ok(ast)
    }

    fn post_filters(&self, ast: Block, _: &Options) -> pug::Result<Block> {
        self.note(Hook::PostFilters);
        Ok(ast)
    }

    fn pre_code_gen(&self, ast: Block, _: &Options) -> pug::Result<Block> {
        self.note(Hook::PreCodeGen);
        Ok(ast)
    }

    fn post_code_gen(&self, program: Program, _: &Options) -> pug::Result<Program> {
        self.note(Hook::PostCodeGen);
        Ok(program)
    }
}

#[test]
fn hooks_fire_in_pipeline_order() {
    let recorder = Recorder::default();
    let options = Options::new().with_plugin(Arc::new(recorder.clone()));
    pug::compile("p x", &options).unwrap();
    assert_eq!(
        recorder.seen(),
        [
            Hook::PreLex,
            Hook::PostLex,
            Hook::PreParse,
            Hook::PostParse,
            Hook::PreLoad,
            Hook::PostLoad,
            Hook::PreLink,
            Hook::PostLink,
            Hook::PreFilters,
            Hook::PostFilters,
            Hook::PreCodeGen,
            Hook::PostCodeGen,
        ]
    );
}

struct Rewrite;

impl Plugin for Rewrite {
    fn hooks(&self) -> HookSet {
        [Hook::PreLex, Hook::PostLex, Hook::PostParse].into_iter().collect()
    }

    fn pre_lex(&self, src: String, _: &Options) -> pug::Result<String> {
        Ok(src.replace("TITLE", "h1"))
    }

    fn post_lex(&self, mut tokens: Vec<Token>, _: &Options) -> pug::Result<Vec<Token>> {
        for token in &mut tokens {
            if let TokenKind::Text(text) = &mut token.kind {
                *text = text.to_uppercase();
            }
        }
        Ok(tokens)
    }

    fn post_parse(&self, mut ast: Block, _: &Options) -> pug::Result<Block> {
        ast.nodes.push(Node::Text {
            value: "!".into(),
            loc: Location::default(),
        });
        Ok(ast)
    }
}

#[test]
fn transforming_hooks_change_the_output() {
    let options = Options::new().with_plugin(Arc::new(Rewrite));
    let out = pug::render("TITLE hello", &Value::Undefined, &options).unwrap();
    assert_eq!(out, "<h1>HELLO</h1>!");
}

struct Resolver(&'static str);

impl Plugin for Resolver {
    fn name(&self) -> &str {
        self.0
    }

    fn hooks(&self) -> HookSet {
        HookSet::from(Hook::Resolve)
    }

    fn resolve(&self, name: &str, _: Option<&Path>, _: &Options) -> Result<PathBuf, LoadError> {
        Ok(PathBuf::from("/virtual").join(name.trim_start_matches('/')))
    }
}

/// Counts how often it is asked for a source.
#[derive(Default, Clone)]
struct Reader {
    reads: Arc<AtomicUsize>,
}

impl Plugin for Reader {
    fn hooks(&self) -> HookSet {
        HookSet::from(Hook::Read)
    }

    fn read(&self, path: &Path, _: &Options) -> Result<String, LoadError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match path.file_name().and_then(|n| n.to_str()) {
            Some("nav.pug") => Ok("nav= here".into()),
            _ => Err(LoadError::NotFound {
                name: path.display().to_string(),
            }),
        }
    }
}

#[test]
fn resolve_and_read_replace_the_loader() {
    let reader = Reader::default();
    let options = Options::new()
        .with_filename("/virtual/page.pug")
        .with_plugin(Arc::new(Resolver("virtual")))
        .with_plugin(Arc::new(reader.clone()));
    let unit = pug::compile_with_dependencies("include nav\ninclude nav", &options).unwrap();
    assert_eq!(reader.reads.load(Ordering::SeqCst), 1);
    assert!(unit.dependencies.contains(&PathBuf::from("/virtual/nav.pug")));
    let out = pug::Template::from(unit)
        .render(&Value::from(serde_json::json!({"here": "x"})))
        .unwrap();
    assert_eq!(out, "<nav>x</nav><nav>x</nav>");
}

#[test]
fn two_resolvers_fail_before_lexing() {
    let recorder = Recorder::default();
    let options = Options::new()
        .with_plugin(Arc::new(recorder.clone()))
        .with_plugin(Arc::new(Resolver("one")))
        .with_plugin(Arc::new(Resolver("two")));
    let err = pug::compile("p", &options).unwrap_err();
    assert!(matches!(err, Error::PluginConfig { hook: Hook::Resolve }));
    assert!(recorder.seen().is_empty());
}

struct Generator;

impl Plugin for Generator {
    fn hooks(&self) -> HookSet {
        HookSet::from(Hook::GenerateCode)
    }

    fn generate_code(&self, ast: &Block, _: &Options) -> pug::Result<Program> {
        Ok(Program::new(
            "custom",
            vec![pug::program::Op::Text(format!("{} node(s)", ast.nodes.len()))],
        ))
    }
}

#[test]
fn code_generation_can_be_replaced() {
    let options = Options::new().with_plugin(Arc::new(Generator));
    let out = pug::render("p\np", &Value::Undefined, &options).unwrap();
    assert_eq!(out, "2 node(s)");

    let doubled = Options::new()
        .with_plugin(Arc::new(Generator))
        .with_plugin(Arc::new(Generator));
    let err = pug::compile("p", &doubled).unwrap_err();
    assert_eq!(err.code(), "PUG:PLUGIN_CONFLICT");
}
