//! Runtime value type for template expressions.
//!
//! Templates are written against JavaScript-style loose typing, so values
//! coerce the way a template author expects: `+` concatenates as soon as a
//! string is involved, `==` compares across numbers and strings, and
//! `undefined`/`null` render as nothing.  Objects keep key-insertion order.

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;

/// Ordered string-keyed map used for object values.
pub type Object = IndexMap<String, Value>;

/// A template runtime value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<Value>),
    Object(Object),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Str(s) => f.write_str(s),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    if !item.is_nullish() {
                        write!(f, "{item}")?;
                    }
                }
                Ok(())
            }
            Value::Object(_) => f.write_str("[object Object]"),
        }
    }
}

/// Format a number the way JavaScript's `String(n)` does for common values.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else if n == 0.0 {
        "0".to_owned()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

impl Value {
    /// JavaScript truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Coerce to a number (`NaN` when impossible).
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => parse_number(s),
            Value::Array(_) => parse_number(&self.to_string()),
            Value::Object(_) => f64::NAN,
        }
    }

    /// Result of the `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    // ── Property access ───────────────────────────────────────────────────────

    /// Read property `key` (`value.key` / `value[key]`).
    ///
    /// Reading any property of `undefined` or `null` is an error.
    pub fn get_member(&self, key: &str) -> Result<Value, String> {
        match self {
            Value::Undefined | Value::Null => Err(format!(
                "Cannot read properties of {self} (reading '{key}')"
            )),
            Value::Str(s) => Ok(match key {
                "length" => Value::Number(s.chars().count() as f64),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::Str(c.to_string()))
                    .unwrap_or_default(),
            }),
            Value::Array(items) => Ok(match key {
                "length" => Value::Number(items.len() as f64),
                _ => key
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or_default(),
            }),
            Value::Object(map) => Ok(map.get(key).cloned().unwrap_or_default()),
            Value::Bool(_) | Value::Number(_) => Ok(Value::Undefined),
        }
    }

    /// Write property `key`; returns an error when `self` cannot hold properties.
    pub fn set_member(&mut self, key: &str, value: Value) -> Result<(), String> {
        match self {
            Value::Object(map) => {
                map.insert(key.to_owned(), value);
                Ok(())
            }
            Value::Array(items) => {
                let i: usize = key
                    .parse()
                    .map_err(|_| format!("Cannot set property '{key}' of an array"))?;
                if i >= items.len() {
                    items.resize(i + 1, Value::Undefined);
                }
                items[i] = value;
                Ok(())
            }
            other => Err(format!("Cannot set properties of {other} (setting '{key}')")),
        }
    }

    /// Property key for `value[key]`.
    pub fn to_property_key(&self) -> String {
        self.to_string()
    }

    // ── Operators ─────────────────────────────────────────────────────────────

    /// `+`: string concatenation when either side is not a primitive number
    /// candidate, numeric addition otherwise.
    pub fn arith_add(&self, rhs: &Value) -> Value {
        let stringy = |v: &Value| matches!(v, Value::Str(_) | Value::Array(_) | Value::Object(_));
        if stringy(self) || stringy(rhs) {
            Value::Str(format!("{self}{rhs}"))
        } else {
            Value::Number(self.to_number() + rhs.to_number())
        }
    }

    pub fn arith_sub(&self, rhs: &Value) -> Value {
        Value::Number(self.to_number() - rhs.to_number())
    }

    pub fn arith_mul(&self, rhs: &Value) -> Value {
        Value::Number(self.to_number() * rhs.to_number())
    }

    pub fn arith_div(&self, rhs: &Value) -> Value {
        Value::Number(self.to_number() / rhs.to_number())
    }

    pub fn arith_rem(&self, rhs: &Value) -> Value {
        Value::Number(self.to_number() % rhs.to_number())
    }

    pub fn arith_neg(&self) -> Value {
        Value::Number(-self.to_number())
    }

    /// `===`
    pub fn strict_eq(&self, rhs: &Value) -> bool {
        match (self, rhs) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
                // No reference identity; structural equality is the closest match.
                self == rhs
            }
            _ => self == rhs,
        }
    }

    /// `==`
    pub fn loose_eq(&self, rhs: &Value) -> bool {
        match (self, rhs) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Value::Str(_), Value::Str(_)) => self == rhs,
            (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => self == rhs,
            (Value::Array(_) | Value::Object(_), _) => Value::Str(self.to_string()).loose_eq(rhs),
            (_, Value::Array(_) | Value::Object(_)) => self.loose_eq(&Value::Str(rhs.to_string())),
            _ => self.to_number() == rhs.to_number(),
        }
    }

    /// Relational comparison; `None` when either side is `NaN`.
    pub fn compare(&self, rhs: &Value) -> Option<Ordering> {
        match (self, rhs) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => self.to_number().partial_cmp(&rhs.to_number()),
        }
    }

    // ── JSON ──────────────────────────────────────────────────────────────────

    /// Convert to JSON; `undefined` members are dropped like `JSON.stringify`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined))
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// `JSON.stringify(value)`; `None` for `undefined`.
    pub fn to_json_string(&self) -> Option<String> {
        match self {
            Value::Undefined => None,
            v => Some(v.to_json().to_string()),
        }
    }
}

/// JavaScript `Number(string)` semantics for the common cases.
fn parse_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map(|n| n as f64).unwrap_or(f64::NAN);
    }
    match t {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => t.parse().unwrap_or(f64::NAN),
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Object> for Value {
    fn from(map: Object) -> Self {
        Value::Object(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl FromIterator<(String, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Value::Object(iter.into_iter().collect())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_numbers_like_js() {
        assert_eq!(Value::Number(42.0).to_string(), "42");
        assert_eq!(Value::Number(-7.0).to_string(), "-7");
        assert_eq!(Value::Number(1.5).to_string(), "1.5");
        assert_eq!(Value::Number(f64::NAN).to_string(), "NaN");
        assert_eq!(Value::Number(-0.0).to_string(), "0");
    }

    #[test]
    fn display_composites() {
        let v = Value::from(json!([1, "a", null, [2, 3]]));
        assert_eq!(v.to_string(), "1,a,,2,3");
        assert_eq!(Value::from(json!({"a": 1})).to_string(), "[object Object]");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Undefined.truthy());
        assert!(!Value::Str(String::new()).truthy());
        assert!(Value::Str("0".into()).truthy());
        assert!(!Value::Number(0.0).truthy());
        assert!(Value::Array(vec![]).truthy());
    }

    #[test]
    fn add_concatenates_with_strings() {
        assert_eq!(Value::from(1).arith_add(&Value::from(2)), Value::Number(3.0));
        assert_eq!(Value::from("a").arith_add(&Value::from(1)), Value::from("a1"));
        assert_eq!(Value::Bool(true).arith_add(&Value::from(1)), Value::Number(2.0));
    }

    #[test]
    fn equality_rules() {
        assert!(Value::from("1").loose_eq(&Value::from(1)));
        assert!(!Value::from("1").strict_eq(&Value::from(1)));
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Null.strict_eq(&Value::Undefined));
        assert!(!Value::Number(0.0).loose_eq(&Value::Null));
    }

    #[test]
    fn member_access() {
        let v = Value::from(json!({"user": {"name": "ada"}, "list": [1, 2]}));
        assert_eq!(v.get_member("user").unwrap().get_member("name").unwrap(), Value::from("ada"));
        assert_eq!(v.get_member("list").unwrap().get_member("length").unwrap(), Value::from(2));
        assert_eq!(v.get_member("missing").unwrap(), Value::Undefined);
        assert!(Value::Undefined.get_member("x").is_err());
    }

    #[test]
    fn json_drops_undefined_members() {
        let mut map = Object::new();
        map.insert("a".into(), Value::from(1));
        map.insert("b".into(), Value::Undefined);
        assert_eq!(Value::Object(map).to_json_string().unwrap(), r#"{"a":1}"#);
        assert_eq!(Value::Undefined.to_json_string(), None);
    }

    #[test]
    fn object_order_is_insertion_order() {
        let v = Value::from(json!({"z": 1, "a": 2, "m": 3}));
        let keys: Vec<&String> = v.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }
}
