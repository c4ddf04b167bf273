//! Built-in functions and methods available to template expressions.
//!
//! Free functions (`String(x)`, `parseInt(s)`) and namespaced ones
//! (`Math.max`, `JSON.stringify`, `Object.keys`) are dispatched by
//! [`call_global`]; methods on values (`s.toUpperCase()`, `list.join(',')`)
//! by [`call_method`].  Each receives already-evaluated arguments.

use super::value::{format_number, Object, Value};

/// Namespaces whose members resolve without a binding in scope.
const NAMESPACES: &[&str] = &["Math", "JSON", "Object", "Array", "Number"];

pub fn is_namespace(name: &str) -> bool {
    NAMESPACES.contains(&name)
}

/// Constant members such as `Math.PI`.
pub fn global_property(ns: &str, key: &str) -> Option<Value> {
    let n = match (ns, key) {
        ("Math", "PI") => std::f64::consts::PI,
        ("Math", "E") => std::f64::consts::E,
        ("Number", "MAX_SAFE_INTEGER") => 9_007_199_254_740_991.0,
        ("Number", "MIN_SAFE_INTEGER") => -9_007_199_254_740_991.0,
        _ => return None,
    };
    Some(Value::Number(n))
}

/// Dispatch a free or namespaced function call.
///
/// Returns `None` if the name is not a built-in.
pub fn call_global(name: &str, args: Vec<Value>) -> Option<Result<Value, String>> {
    // Inner function returns Result<Option<Value>, String>:
    //   Ok(None)    → not a builtin
    //   Ok(Some(v)) → success
    //   Err(e)      → builtin call failed
    fn inner(name: &str, args: Vec<Value>) -> Result<Option<Value>, String> {
        Ok(Some(match name {
            // ── Conversions ──────────────────────────────────────────────────
            "String" => Value::Str(args.first().map(Value::to_string).unwrap_or_default()),
            "Number" => Value::Number(args.first().map_or(0.0, Value::to_number)),
            "Boolean" => Value::Bool(args.first().is_some_and(Value::truthy)),
            "parseInt" => {
                let s = get_str(&args, 0, name)?;
                let radix = args.get(1).map_or(0.0, Value::to_number) as u32;
                Value::Number(parse_int(&s, radix))
            }
            "parseFloat" => {
                let s = get_str(&args, 0, name)?;
                Value::Number(parse_float_prefix(&s))
            }
            "isNaN" => Value::Bool(args.first().map_or(f64::NAN, Value::to_number).is_nan()),
            "Number.isInteger" => Value::Bool(matches!(
                args.first(),
                Some(Value::Number(n)) if n.is_finite() && n.fract() == 0.0
            )),
            "Array.isArray" => Value::Bool(matches!(args.first(), Some(Value::Array(_)))),

            // ── JSON ─────────────────────────────────────────────────────────
            "JSON.stringify" => {
                let v = args.first().cloned().unwrap_or_default();
                let indent = args.get(2).filter(|v| v.truthy());
                match indent {
                    None => v.to_json_string().map_or(Value::Undefined, Value::Str),
                    Some(_) if matches!(v, Value::Undefined) => Value::Undefined,
                    Some(_) => Value::Str(
                        serde_json::to_string_pretty(&v.to_json()).map_err(|e| format!("{name}: {e}"))?,
                    ),
                }
            }
            "JSON.parse" => {
                let s = get_str(&args, 0, name)?;
                let json: serde_json::Value =
                    serde_json::from_str(&s).map_err(|e| format!("{name}: {e}"))?;
                Value::from(json)
            }

            // ── Object ───────────────────────────────────────────────────────
            "Object.keys" => Value::Array(entries(args.first(), name)?.map(|(k, _)| Value::Str(k)).collect()),
            "Object.values" => Value::Array(entries(args.first(), name)?.map(|(_, v)| v).collect()),
            "Object.entries" => Value::Array(
                entries(args.first(), name)?
                    .map(|(k, v)| Value::Array(vec![Value::Str(k), v]))
                    .collect(),
            ),
            "Object.assign" => {
                let mut out = Object::new();
                for arg in args {
                    if let Value::Object(map) = arg {
                        out.extend(map);
                    }
                }
                Value::Object(out)
            }

            // ── Math ─────────────────────────────────────────────────────────
            "Math.floor" => Value::Number(get_num(&args, 0, name)?.floor()),
            "Math.ceil" => Value::Number(get_num(&args, 0, name)?.ceil()),
            "Math.round" => Value::Number((get_num(&args, 0, name)? + 0.5).floor()),
            "Math.trunc" => Value::Number(get_num(&args, 0, name)?.trunc()),
            "Math.abs" => Value::Number(get_num(&args, 0, name)?.abs()),
            "Math.sqrt" => Value::Number(get_num(&args, 0, name)?.sqrt()),
            "Math.sign" => {
                let x = get_num(&args, 0, name)?;
                Value::Number(if x == 0.0 || x.is_nan() { x } else { x.signum() })
            }
            "Math.pow" => {
                let base = get_num(&args, 0, name)?;
                let exp = get_num(&args, 1, name)?;
                Value::Number(base.powf(exp))
            }
            "Math.max" => Value::Number(fold_numbers(&args, f64::NEG_INFINITY, f64::max)),
            "Math.min" => Value::Number(fold_numbers(&args, f64::INFINITY, f64::min)),

            _ => return Ok(None),
        }))
    }
    inner(name, args).transpose()
}

/// Methods that update their receiver in place.
pub fn is_mutating_method(name: &str) -> bool {
    matches!(name, "push" | "pop" | "shift" | "unshift")
}

/// Apply `push`/`pop`/`shift`/`unshift` to an array receiver.
pub fn call_mutating_method(target: &mut Value, name: &str, args: Vec<Value>) -> Result<Value, String> {
    let Value::Array(items) = target else {
        return Err(format!("{name} is not a function on {}", target.type_of()));
    };
    Ok(match name {
        "push" => {
            items.extend(args);
            Value::from(items.len())
        }
        "unshift" => {
            items.splice(0..0, args);
            Value::from(items.len())
        }
        "pop" => items.pop().unwrap_or_default(),
        "shift" => {
            if items.is_empty() {
                Value::Undefined
            } else {
                items.remove(0)
            }
        }
        _ => return Err(format!("{name} is not a function")),
    })
}

/// Dispatch a method call on an evaluated receiver.
pub fn call_method(recv: &Value, name: &str, args: Vec<Value>) -> Result<Value, String> {
    match (recv, name) {
        (Value::Undefined | Value::Null, _) => {
            Err(format!("Cannot read properties of {recv} (reading '{name}')"))
        }
        (_, "toString") => Ok(Value::Str(recv.to_string())),
        (Value::Str(s), _) => string_method(s, name, &args),
        (Value::Array(items), _) => array_method(items, name, &args),
        (Value::Number(n), "toFixed") => {
            let digits = args.first().map_or(0.0, Value::to_number).max(0.0) as usize;
            Ok(Value::Str(format!("{n:.digits$}")))
        }
        (Value::Object(map), "hasOwnProperty") => {
            let key = get_str(&args, 0, name)?;
            Ok(Value::Bool(map.contains_key(&key)))
        }
        _ => Err(format!("{name} is not a function on {}", recv.type_of())),
    }
}

fn string_method(s: &str, name: &str, args: &[Value]) -> Result<Value, String> {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    Ok(match name {
        "toUpperCase" => Value::Str(s.to_uppercase()),
        "toLowerCase" => Value::Str(s.to_lowercase()),
        "trim" => Value::from(s.trim()),
        "trimStart" => Value::from(s.trim_start()),
        "trimEnd" => Value::from(s.trim_end()),
        "charAt" => {
            let i = args.first().map_or(0.0, Value::to_number) as usize;
            Value::Str(chars.get(i).map(char::to_string).unwrap_or_default())
        }
        "indexOf" => {
            let needle = get_str(args, 0, name)?;
            Value::Number(char_index_of(s, &needle))
        }
        "includes" => Value::Bool(s.contains(get_str(args, 0, name)?.as_str())),
        "startsWith" => Value::Bool(s.starts_with(get_str(args, 0, name)?.as_str())),
        "endsWith" => Value::Bool(s.ends_with(get_str(args, 0, name)?.as_str())),
        "slice" => {
            let (start, end) = slice_bounds(args, len);
            Value::Str(chars[start..end.max(start)].iter().collect())
        }
        "substring" => {
            let clamp = |v: Option<&Value>, default: usize| {
                v.map_or(default, |v| v.to_number().max(0.0).min(len as f64) as usize)
            };
            let a = clamp(args.first(), 0);
            let b = clamp(args.get(1), len);
            Value::Str(chars[a.min(b)..a.max(b)].iter().collect())
        }
        "split" => match args.first() {
            None | Some(Value::Undefined) => Value::Array(vec![Value::from(s)]),
            Some(sep) => {
                let sep = sep.to_string();
                if sep.is_empty() {
                    Value::Array(chars.iter().map(|c| Value::Str(c.to_string())).collect())
                } else {
                    Value::Array(s.split(sep.as_str()).map(Value::from).collect())
                }
            }
        },
        "concat" => {
            let mut out = s.to_owned();
            for a in args {
                out.push_str(&a.to_string());
            }
            Value::Str(out)
        }
        "repeat" => {
            let n = get_num(args, 0, name)?;
            if n < 0.0 || !n.is_finite() {
                return Err(format!("{name}: invalid count {}", format_number(n)));
            }
            Value::Str(s.repeat(n as usize))
        }
        "replace" => {
            let needle = get_str(args, 0, name)?;
            let repl = get_str(args, 1, name)?;
            Value::Str(s.replacen(&needle, &repl, 1))
        }
        "replaceAll" => {
            let needle = get_str(args, 0, name)?;
            let repl = get_str(args, 1, name)?;
            Value::Str(s.replace(&needle, &repl))
        }
        "padStart" | "padEnd" => {
            let width = get_num(args, 0, name)?.max(0.0) as usize;
            let fill = args.get(1).map_or_else(|| " ".to_owned(), Value::to_string);
            if len >= width || fill.is_empty() {
                Value::from(s)
            } else {
                let pad: String = fill.chars().cycle().take(width - len).collect();
                Value::Str(if name == "padStart" { pad + s } else { s.to_owned() + &pad })
            }
        }
        _ => return Err(format!("{name} is not a function on string")),
    })
}

fn array_method(items: &[Value], name: &str, args: &[Value]) -> Result<Value, String> {
    Ok(match name {
        "join" => {
            let sep = match args.first() {
                None | Some(Value::Undefined) => ",".to_owned(),
                Some(v) => v.to_string(),
            };
            let parts: Vec<String> = items
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_string() })
                .collect();
            Value::Str(parts.join(&sep))
        }
        "indexOf" => {
            let needle = args.first().cloned().unwrap_or_default();
            Value::Number(items.iter().position(|v| v.strict_eq(&needle)).map_or(-1.0, |i| i as f64))
        }
        "includes" => {
            let needle = args.first().cloned().unwrap_or_default();
            Value::Bool(items.iter().any(|v| v.strict_eq(&needle)))
        }
        "slice" => {
            let (start, end) = slice_bounds(args, items.len());
            Value::Array(items[start..end.max(start)].to_vec())
        }
        "concat" => {
            let mut out = items.to_vec();
            for a in args {
                match a {
                    Value::Array(more) => out.extend(more.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Value::Array(out)
        }
        "reverse" => Value::Array(items.iter().rev().cloned().collect()),
        _ => return Err(format!("{name} is not a function on array")),
    })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn get_str(args: &[Value], idx: usize, name: &str) -> Result<String, String> {
    args.get(idx)
        .map(Value::to_string)
        .ok_or_else(|| format!("{name}: argument {idx} missing"))
}

fn get_num(args: &[Value], idx: usize, name: &str) -> Result<f64, String> {
    args.get(idx)
        .map(Value::to_number)
        .ok_or_else(|| format!("{name}: argument {idx} missing"))
}

fn fold_numbers(args: &[Value], init: f64, f: fn(f64, f64) -> f64) -> f64 {
    let mut acc = init;
    for a in args {
        let n = a.to_number();
        if n.is_nan() {
            return f64::NAN;
        }
        acc = f(acc, n);
    }
    acc
}

fn entries(v: Option<&Value>, name: &str) -> Result<impl Iterator<Item = (String, Value)>, String> {
    let pairs: Vec<(String, Value)> = match v {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        Some(Value::Str(s)) => s
            .chars()
            .enumerate()
            .map(|(i, c)| (i.to_string(), Value::Str(c.to_string())))
            .collect(),
        None | Some(Value::Undefined | Value::Null) => {
            return Err(format!("{name}: cannot convert undefined or null to object"));
        }
        Some(_) => Vec::new(),
    };
    Ok(pairs.into_iter())
}

/// Resolve JS `slice(start, end)` arguments against `len`.
fn slice_bounds(args: &[Value], len: usize) -> (usize, usize) {
    let rel = |v: Option<&Value>, default: usize| match v {
        None | Some(Value::Undefined) => default,
        Some(v) => {
            let n = v.to_number();
            let n = if n.is_nan() { 0.0 } else { n.trunc() };
            if n < 0.0 {
                (len as f64 + n).max(0.0) as usize
            } else {
                (n as usize).min(len)
            }
        }
    };
    (rel(args.first(), 0), rel(args.get(1), len))
}

fn char_index_of(haystack: &str, needle: &str) -> f64 {
    haystack
        .find(needle)
        .map_or(-1.0, |byte| haystack[..byte].chars().count() as f64)
}

fn parse_int(s: &str, radix: u32) -> f64 {
    let t = s.trim_start();
    let (neg, t) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let (radix, t) = match radix {
        0 | 16 if t.starts_with("0x") || t.starts_with("0X") => (16, &t[2..]),
        0 => (10, t),
        r => (r, t),
    };
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let digits: String = t.chars().take_while(|c| c.is_digit(radix)).collect();
    if digits.is_empty() {
        return f64::NAN;
    }
    let n = i64::from_str_radix(&digits, radix).map_or(f64::NAN, |n| n as f64);
    if neg {
        -n
    } else {
        n
    }
}

fn parse_float_prefix(s: &str) -> f64 {
    let t = s.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    for (i, c) in t.char_indices() {
        let ok = match c {
            '0'..='9' => true,
            '+' | '-' => i == 0 || t[..i].ends_with(['e', 'E']),
            '.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                true
            }
            'e' | 'E' if !seen_exp && end > 0 => {
                seen_exp = true;
                true
            }
            _ => false,
        };
        if !ok {
            break;
        }
        end = i + c.len_utf8();
    }
    // Back off a dangling exponent or sign ("1e", "1e+").
    let mut candidate = &t[..end];
    while !candidate.is_empty() && candidate.parse::<f64>().is_err() {
        candidate = &candidate[..candidate.len() - 1];
    }
    candidate.parse().unwrap_or(f64::NAN)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
