use proptest::prelude::*;
use pug::lexer::{lex, reconstruct};
use pug::runtime::escape;
use pug::token::TokenKind;
use pug::{Options, Value};

/// A generated element: tag name, optional class, text or children.
#[derive(Debug, Clone)]
enum Elem {
    Leaf {
        tag: &'static str,
        class: Option<String>,
        text: String,
    },
    Parent {
        tag: &'static str,
        class: Option<String>,
        children: Vec<Elem>,
    },
}

impl Elem {
    fn head(tag: &str, class: &Option<String>) -> String {
        match class {
            Some(c) => format!("{tag}.{c}"),
            None => tag.to_owned(),
        }
    }

    fn open(tag: &str, class: &Option<String>) -> String {
        match class {
            Some(c) => format!("<{tag} class=\"{c}\">"),
            None => format!("<{tag}>"),
        }
    }

    fn source(&self, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        match self {
            Elem::Leaf { tag, class, text } => {
                out.push_str(&format!("{indent}{} {text}\n", Elem::head(tag, class)));
            }
            Elem::Parent { tag, class, children } => {
                out.push_str(&format!("{indent}{}\n", Elem::head(tag, class)));
                for child in children {
                    child.source(depth + 1, out);
                }
            }
        }
    }

    fn html(&self, out: &mut String) {
        match self {
            Elem::Leaf { tag, class, text } => {
                out.push_str(&format!("{}{text}</{tag}>", Elem::open(tag, class)));
            }
            Elem::Parent { tag, class, children } => {
                out.push_str(&Elem::open(tag, class));
                for child in children {
                    child.html(out);
                }
                out.push_str(&format!("</{tag}>"));
            }
        }
    }
}

fn tag() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec!["div", "p", "span", "section"])
}

fn elem() -> impl Strategy<Value = Elem> {
    let class = prop::option::of("[a-z]{1,6}");
    let leaf = (tag(), class.clone(), "[a-z]{1,8}( [a-z]{1,8}){0,2}")
        .prop_map(|(tag, class, text)| Elem::Leaf { tag, class, text });
    leaf.prop_recursive(4, 24, 4, move |inner| {
        (tag(), class.clone(), prop::collection::vec(inner, 1..4))
            .prop_map(|(tag, class, children)| Elem::Parent { tag, class, children })
    })
}

fn document() -> impl Strategy<Value = Vec<Elem>> {
    prop::collection::vec(elem(), 1..4)
}

fn source_of(elems: &[Elem]) -> String {
    let mut src = String::new();
    for e in elems {
        e.source(0, &mut src);
    }
    src
}

fn kinds(src: &str) -> Vec<TokenKind> {
    lex(src, &[])
        .unwrap_or_else(|e| panic!("{src:?}: {e}"))
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

proptest! {
    /// Lexing arbitrary ASCII returns a result without panicking.
    #[test]
    fn lexer_does_not_panic(s in "[ -~\n]{0,120}") {
        let _ = lex(&s, &[]);
    }

    /// Reconstructed source lexes to the same token kinds.
    #[test]
    fn reconstruct_relexes_to_same_kinds(doc in document()) {
        let src = source_of(&doc);
        let first = lex(&src, &[]).unwrap();
        let again = reconstruct(&first);
        prop_assert_eq!(kinds(&again), first.into_iter().map(|t| t.kind).collect::<Vec<_>>());
    }

    /// Every indent is closed by an outdent and the stream ends with eof.
    #[test]
    fn indents_are_balanced(doc in document()) {
        let tokens = kinds(&source_of(&doc));
        let mut depth = 0i64;
        for kind in &tokens {
            match kind {
                TokenKind::Indent(_) => depth += 1,
                TokenKind::Outdent => depth -= 1,
                _ => {}
            }
            prop_assert!(depth >= 0);
        }
        prop_assert_eq!(depth, 0);
        prop_assert_eq!(tokens.last(), Some(&TokenKind::Eof));
    }

    /// Generated trees render to the matching markup.
    #[test]
    fn trees_render_to_markup(doc in document()) {
        let src = source_of(&doc);
        let mut expected = String::new();
        for e in &doc {
            e.html(&mut expected);
        }
        let out = pug::render(&src, &Value::Undefined, &Options::new()).unwrap();
        prop_assert_eq!(out, expected);
    }
}

proptest! {
    /// Escaped text holds no markup characters and unescapes back.
    #[test]
    fn escape_removes_markup(s in "\\PC*") {
        let escaped = escape(&s);
        prop_assert!(!escaped.contains(['<', '>', '"']));
        let back = escaped
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&amp;", "&");
        prop_assert_eq!(back, s);
    }

    /// Buffered code escapes exactly like the runtime helper.
    #[test]
    fn buffered_code_is_escaped(s in "\\PC{0,40}") {
        let locals = Value::from(serde_json::json!({ "x": s.clone() }));
        let out = pug::render("p= x", &locals, &Options::new()).unwrap();
        prop_assert_eq!(out, format!("<p>{}</p>", escape(&s)));
    }
}
