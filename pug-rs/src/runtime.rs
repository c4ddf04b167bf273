//! Runtime helpers called by generated programs.
//!
//! The renderer never escapes or merges attributes itself; every such step
//! goes through a [`Runtime`].  The free functions below are the default
//! behavior and are also used by the code generator to fold constant
//! attributes at compile time, so both paths produce identical markup.

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;

use crate::script::{Object, Value};

static HTML_SPECIAL: Lazy<AhoCorasick> = Lazy::new(|| AhoCorasick::new(["&", "<", ">", "\""]));
const HTML_ENTITIES: [&str; 4] = ["&amp;", "&lt;", "&gt;", "&quot;"];

// ── Escaping ──────────────────────────────────────────────────────────────────

/// Escape `&`, `<`, `>` and `"`.
pub fn escape(s: &str) -> String {
    if HTML_SPECIAL.is_match(s) {
        HTML_SPECIAL.replace_all(s, &HTML_ENTITIES[..])
    } else {
        s.to_owned()
    }
}

/// Escape a value, keeping non-strings as they are unless their text form
/// needs escaping.
pub fn escape_value(value: &Value) -> Value {
    match value {
        Value::Str(s) => Value::Str(escape(s)),
        other => {
            let text = other.to_string();
            if HTML_SPECIAL.is_match(&text) {
                Value::Str(escape(&text))
            } else {
                other.clone()
            }
        }
    }
}

// ── Attributes ────────────────────────────────────────────────────────────────

/// One ` key="value"` pair, or nothing for `false`, `null`, `undefined` and
/// empty classes or styles.
pub fn attr(key: &str, value: &Value, escaped: bool, terse: bool) -> String {
    match value {
        Value::Bool(false) | Value::Null | Value::Undefined => return String::new(),
        v if !v.truthy() && (key == "class" || key == "style") => return String::new(),
        Value::Bool(true) => {
            return if terse {
                format!(" {key}")
            } else {
                format!(" {key}=\"{key}\"")
            };
        }
        _ => {}
    }
    let text = match value {
        Value::Str(s) => s.clone(),
        other => {
            let json = other.to_json_string().unwrap_or_default();
            if !escaped && json.contains('"') {
                return format!(" {key}='{}'", json.replace('\'', "&#39;"));
            }
            json
        }
    };
    let text = if escaped { escape(&text) } else { text };
    format!(" {key}=\"{text}\"")
}

/// Join class names from a string, an array (nested entries flattened) or
/// an object (keys with truthy values).  `escaping[i]` escapes array entry
/// `i`.
pub fn classes(value: &Value, escaping: Option<&[bool]>) -> String {
    match value {
        Value::Array(items) => {
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                let mut name = classes(item, None);
                if name.is_empty() {
                    continue;
                }
                if escaping.is_some_and(|e| e.get(i).copied().unwrap_or(false)) {
                    name = escape(&name);
                }
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(&name);
            }
            out
        }
        Value::Object(map) => map
            .iter()
            .filter(|(k, v)| !k.is_empty() && v.truthy())
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        v if v.truthy() => v.to_string(),
        _ => String::new(),
    }
}

/// `{color: 'red'}` becomes `color:red;`; strings pass through.
pub fn style(value: &Value) -> String {
    match value {
        Value::Object(map) => map.iter().map(|(k, v)| format!("{k}:{v};")).collect(),
        v if v.truthy() => v.to_string(),
        _ => String::new(),
    }
}

fn terminated_style(value: &Value) -> String {
    let mut s = style(value);
    if !s.is_empty() && !s.ends_with(';') {
        s.push(';');
    }
    s
}

/// Merge attribute objects left to right: `class` entries accumulate into an
/// array, `style` strings concatenate, everything else is overwritten.
pub fn merge(objects: &[Value]) -> Object {
    let mut out = Object::new();
    for object in objects {
        let Value::Object(map) = object else {
            continue;
        };
        for (key, value) in map {
            match key.as_str() {
                "class" => {
                    let mut list = match out.get("class").cloned() {
                        Some(Value::Array(items)) => items,
                        Some(Value::Undefined) | None => Vec::new(),
                        Some(other) => vec![other],
                    };
                    match value {
                        Value::Array(items) => list.extend(items.iter().cloned()),
                        Value::Undefined | Value::Null => {}
                        other => list.push(other.clone()),
                    }
                    out.insert("class".to_owned(), Value::Array(list));
                }
                "style" => {
                    let prev = out.get("style").map(terminated_style).unwrap_or_default();
                    let merged = prev + &terminated_style(value);
                    out.insert("style".to_owned(), Value::Str(merged));
                }
                _ => {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
    }
    out
}

/// Render an attribute object; `class` always comes first.
pub fn attrs(object: &Object, terse: bool) -> String {
    let mut class = String::new();
    let mut rest = String::new();
    for (key, value) in object {
        match key.as_str() {
            "class" => class = attr(key, &Value::Str(classes(value, None)), false, terse),
            "style" => rest.push_str(&attr(key, &Value::Str(style(value)), false, terse)),
            _ => rest.push_str(&attr(key, value, false, terse)),
        }
    }
    class + &rest
}

// ── Iteration ─────────────────────────────────────────────────────────────────

/// `(key, value)` pairs visited by `each`: index/item for arrays and
/// strings, key/value for objects (insertion order), `i, i` for a count.
/// The pairs are produced on demand, so a large count allocates nothing up
/// front.
pub fn each(value: &Value) -> Box<dyn Iterator<Item = (Value, Value)> + '_> {
    match value {
        Value::Array(items) => Box::new(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::Number(i as f64), v.clone())),
        ),
        Value::Str(s) => Box::new(
            s.chars()
                .enumerate()
                .map(|(i, c)| (Value::Number(i as f64), Value::Str(c.to_string()))),
        ),
        Value::Object(map) => Box::new(map.iter().map(|(k, v)| (Value::Str(k.clone()), v.clone()))),
        Value::Number(n) if n.is_finite() && *n > 0.0 => {
            Box::new((0..n.floor() as u64).map(|i| (Value::Number(i as f64), Value::Number(i as f64))))
        }
        _ => Box::new(std::iter::empty()),
    }
}

// ── Runtime ───────────────────────────────────────────────────────────────────

/// Helper surface used by the renderer.  Override single methods to change
/// escaping or attribute rendering; `global` supplies the values of names
/// listed in [`Options::globals`](crate::Options::globals).
pub trait Runtime: Send + Sync {
    fn escape(&self, s: &str) -> String {
        escape(s)
    }

    fn attr(&self, key: &str, value: &Value, escaped: bool, terse: bool) -> String {
        attr(key, value, escaped, terse)
    }

    fn attrs(&self, object: &Object, terse: bool) -> String {
        attrs(object, terse)
    }

    fn classes(&self, value: &Value, escaping: Option<&[bool]>) -> String {
        classes(value, escaping)
    }

    fn style(&self, value: &Value) -> String {
        style(value)
    }

    fn merge(&self, objects: &[Value]) -> Object {
        merge(objects)
    }

    fn each<'v>(&self, value: &'v Value) -> Box<dyn Iterator<Item = (Value, Value)> + 'v> {
        each(value)
    }

    fn global(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// The stock helpers.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultRuntime;

impl Runtime for DefaultRuntime {}

// ── Tests ─────────────────────────────────────────────────────────────────────
