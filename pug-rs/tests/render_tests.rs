//! End-to-end rendering through the public API.

use pug::{text_filter, Compiler, Error, Options, Value};
use serde_json::json;

fn render(src: &str, locals: serde_json::Value) -> String {
    pug::render(src, &Value::from(locals), &Options::new()).unwrap_or_else(|e| panic!("{src:?}: {e}"))
}

fn render_with(src: &str, locals: serde_json::Value, options: &Options) -> String {
    pug::render(src, &Value::from(locals), options).unwrap_or_else(|e| panic!("{src:?}: {e}"))
}

// ── Markup ────────────────────────────────────────────────────────────────────

#[test]
fn tags_text_and_nesting() {
    assert_eq!(render("p hello", json!({})), "<p>hello</p>");
    assert_eq!(render("ul\n  li a\n  li b", json!({})), "<ul><li>a</li><li>b</li></ul>");
    assert_eq!(render(".box", json!({})), "<div class=\"box\"></div>");
    assert_eq!(render("ul: li: a(href='#') x", json!({})), "<ul><li><a href=\"#\">x</a></li></ul>");
    assert_eq!(render("p\n  | one\n  | two", json!({})), "<p>one\ntwo</p>");
    assert_eq!(render("p a #[strong b] c", json!({})), "<p>a <strong>b</strong> c</p>");
}

#[test]
fn text_blocks_and_literal_html() {
    assert_eq!(render("script.\n  if (a) b();", json!({})), "<script>if (a) b();</script>");
    assert_eq!(render("<ul>\n  <li>x</li>\n</ul>", json!({})), "<ul>\n<li>x</li>\n</ul>");
}

#[test]
fn doctypes() {
    assert_eq!(render("doctype html", json!({})), "<!DOCTYPE html>");
    assert_eq!(render("doctype xml", json!({})), "<?xml version=\"1.0\" encoding=\"utf-8\" ?>");
    assert_eq!(render("doctype html\ninput(disabled)", json!({})), "<!DOCTYPE html><input disabled>");
    assert_eq!(
        render("doctype xml\ninput(disabled)", json!({})),
        "<?xml version=\"1.0\" encoding=\"utf-8\" ?><input disabled=\"disabled\"/>"
    );
    assert_eq!(render("foo/", json!({})), "<foo/>");
}

#[test]
fn comments() {
    assert_eq!(render("// note\np", json!({})), "<!-- note--><p></p>");
    assert_eq!(render("//- hidden\np", json!({})), "<p></p>");
    let options = Options {
        strip_buffered_comments: true,
        ..Options::new()
    };
    assert_eq!(render_with("// note\np", json!({}), &options), "<p></p>");
}

// ── Attributes ────────────────────────────────────────────────────────────────

#[test]
fn attribute_values() {
    assert_eq!(render("a(href='/x' title=t)", json!({"t": "a\"b"})), "<a href=\"/x\" title=\"a&quot;b\"></a>");
    assert_eq!(render("a(title!=t)", json!({"t": "<b>"})), "<a title=\"<b>\"></a>");
    assert_eq!(render("input(checked=on)", json!({"on": false})), "<input/>");
    assert_eq!(render("div(data-x={a: 1})", json!({})), "<div data-x=\"{&quot;a&quot;:1}\"></div>");
}

#[test]
fn class_and_style_merging() {
    assert_eq!(
        render("p.a(class=['b', {c: on, d: !on}])", json!({"on": true})),
        "<p class=\"a b c\"></p>"
    );
    assert_eq!(render("p(style={color: c})", json!({"c": "red"})), "<p style=\"color:red;\"></p>");
    assert_eq!(render("p(id='a' id='b')", json!({})), "<p id=\"b\"></p>");
}

#[test]
fn and_attributes() {
    assert_eq!(
        render("p.a&attributes(extra)", json!({"extra": {"class": "b", "data-n": 1}})),
        "<p class=\"a b\" data-n=\"1\"></p>"
    );
}

// ── Code and control flow ─────────────────────────────────────────────────────

#[test]
fn unbuffered_code_and_interpolation() {
    let src = "-\n  var list = ['x', 'y']\n  var sep = '-'\np= list.join(sep)\np #{list.length} items";
    assert_eq!(render(src, json!({})), "<p>x-y</p><p>2 items</p>");
    assert_eq!(render("p= `${a}!`", json!({"a": 1})), "<p>1!</p>");
    assert_eq!(render("p \\#{not}", json!({})), "<p>#{not}</p>");
}

#[test]
fn conditionals() {
    let src = "if user\n  p= user.name\nelse\n  p anonymous";
    assert_eq!(render(src, json!({"user": {"name": "Ann"}})), "<p>Ann</p>");
    assert_eq!(render(src, json!({})), "<p>anonymous</p>");
}

#[test]
fn each_forms() {
    assert_eq!(render("each n in 3\n  | #{n}", json!({})), "012");
    assert_eq!(render("each c in 'ab'\n  i= c", json!({})), "<i>a</i><i>b</i>");
    assert_eq!(render("each x in nothing\n  p= x\nelse\n  p none", json!({})), "<p>none</p>");
}

#[test]
fn case_when_default() {
    let src = "case kind\n  when 'a': p A\n  when 'b'\n  when 'c'\n    p BC\n  default\n    p other";
    assert_eq!(render(src, json!({"kind": "a"})), "<p>A</p>");
    assert_eq!(render(src, json!({"kind": "b"})), "<p>BC</p>");
    assert_eq!(render(src, json!({"kind": "z"})), "<p>other</p>");
}

#[test]
fn mixins() {
    let src = "mixin pet(name)\n  li.pet= name\nul\n  +pet('cat')\n  +pet('dog')";
    assert_eq!(
        render(src, json!({})),
        "<ul><li class=\"pet\">cat</li><li class=\"pet\">dog</li></ul>"
    );
    let dynamic = "mixin a\n  | A\nmixin b\n  | B\n+#{which}";
    assert_eq!(render(dynamic, json!({"which": "b"})), "B");
}

// ── Filters ───────────────────────────────────────────────────────────────────

#[test]
fn compiler_filters_and_per_call_filters() {
    let compiler = Compiler::new().with_filter("shout", text_filter(|s, _| Ok(s.to_uppercase())));
    let out = compiler.render("p\n  :shout hi", &Value::Undefined, &Options::new()).unwrap();
    assert_eq!(out, "<p>HI</p>");

    let options = Options::new().with_filter("shout", text_filter(|s, _| Ok(format!("{s}!"))));
    let out = compiler.render("p\n  :shout hi", &Value::Undefined, &options).unwrap();
    assert_eq!(out, "<p>hi!</p>");
}

#[test]
fn filter_failures() {
    let options = Options::new().with_filter("bad", text_filter(|_, _| Err("nope".into())));
    let err = pug::compile(":bad x", &options).unwrap_err();
    assert_eq!(err.code(), "PUG:FILTER_ERROR");
    assert!(err.to_string().contains("nope"));
}

// ── Pretty ────────────────────────────────────────────────────────────────────

#[test]
fn pretty_printing() {
    let options = Options::new().with_pretty(true);
    let out = render_with("ul\n  li\n    a(href='/') home\n  li: em x", json!({}), &options);
    assert_eq!(out, "\n<ul>\n  <li><a href=\"/\">home</a></li>\n  <li><em>x</em></li>\n</ul>");

    let options = Options::new().with_pretty("\t");
    assert_eq!(render_with("div\n  p", json!({}), &options), "\n<div>\n\t<p></p>\n</div>");
}

#[test]
fn pretty_keeps_pre_content() {
    let options = Options::new().with_pretty(true);
    let out = render_with("div\n  pre\n    | a\n    | b", json!({}), &options);
    assert_eq!(out, "\n<div>\n  <pre>a\nb</pre>\n</div>");
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[test]
fn syntax_errors_are_located() {
    let err = pug::compile("div\n   p\n  p", &Options::new()).unwrap_err();
    assert!(matches!(err, Error::Syntax(_)));
    assert!(err.diagnostic().unwrap().line >= 2);
}

#[test]
fn runtime_errors_are_located() {
    let template = pug::compile("p ok\np= a.b.c", &Options::new()).unwrap();
    let err = template.render(&Value::from(json!({}))).unwrap_err();
    assert_eq!(err.code(), "PUG:RUNTIME_ERROR");
    let d = err.diagnostic().unwrap();
    assert_eq!(d.line, 2);
    assert!(d.snippet.as_deref().unwrap().contains("> 2| p= a.b.c"));
}

#[test]
fn templates_render_repeatedly() {
    let template = pug::compile("p= n", &Options::new()).unwrap();
    for n in 0..3 {
        assert_eq!(template.render(&Value::from(json!({"n": n}))).unwrap(), format!("<p>{n}</p>"));
    }
}
