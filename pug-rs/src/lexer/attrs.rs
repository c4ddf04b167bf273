//! Attribute lists: `(key=value key2 key3!=value)`.
//!
//! The whole parenthesized list is located first with a bracket scan, then
//! split into attributes.  A value ends at a top-level `,`, or at whitespace
//! followed by something that cannot continue an expression when the text
//! so far already parses as one.

use super::interpolation::{is_punctuator, ScanState};
use super::Lexer;
use crate::error::Result;
use crate::script::is_expression;
use crate::token::TokenKind;

impl Lexer<'_> {
    pub(super) fn attrs(&mut self) -> Result<bool> {
        if !self.rest().starts_with('(') {
            return Ok(false);
        }
        let end = self.bracket_end(0)?;
        let chars: Vec<char> = self.rest()[1..end].chars().collect();

        let start = self.here();
        self.incr_col(1);
        self.push_from(start, TokenKind::StartAttributes);
        self.consume(end + 1);

        let mut i = 0;
        while i < chars.len() {
            i = self.attribute(&chars, i)?;
        }

        let start = self.here();
        self.incr_col(1);
        self.push_from(start, TokenKind::EndAttributes);
        Ok(true)
    }

    fn step(&mut self, c: char) {
        if c == '\n' {
            self.incr_line(1);
        } else {
            self.incr_col(1);
        }
    }

    fn skip_whitespace(&mut self, chars: &[char], mut i: usize) -> usize {
        while i < chars.len() && chars[i].is_whitespace() {
            self.step(chars[i]);
            i += 1;
        }
        i
    }

    /// Lex one attribute starting at `i`; returns the index after it and
    /// any separating comma.
    fn attribute(&mut self, chars: &[char], i: usize) -> Result<usize> {
        let mut i = self.skip_whitespace(chars, i);
        if i == chars.len() {
            return Ok(i);
        }

        let start = self.here();
        let quote = matches!(chars[i], '"' | '\'').then_some(chars[i]);
        if quote.is_some() {
            self.incr_col(1);
            i += 1;
        }
        let mut name = String::new();
        while i < chars.len() {
            let c = chars[i];
            match quote {
                Some(q) if c == q => {
                    self.incr_col(1);
                    i += 1;
                    break;
                }
                None if c.is_whitespace() || c == '!' || c == '=' || c == ',' => break,
                _ => {}
            }
            name.push(c);
            self.step(c);
            i += 1;
        }
        if name.is_empty() {
            return Err(self.error(
                "PUG:INVALID_KEY_CHARACTER",
                format!("Unexpected character `{}`, expected an attribute name", chars[i.min(chars.len() - 1)]),
            ));
        }

        let (value, escaped, mut i) = self.attribute_value(chars, i)?;
        self.push_from(start, TokenKind::Attribute { name, value, escaped });

        i = self.skip_whitespace(chars, i);
        if i < chars.len() && chars[i] == ',' {
            self.incr_col(1);
            i += 1;
        }
        Ok(i)
    }

    /// Lex `=value` / `!=value` after a key.  Returns `(None, true, i)` for a
    /// bare key without consuming anything.
    fn attribute_value(&mut self, chars: &[char], i: usize) -> Result<(Option<String>, bool, usize)> {
        let mut j = i;
        while j < chars.len() && chars[j].is_whitespace() {
            j += 1;
        }
        if j == chars.len() {
            return Ok((None, true, i));
        }

        let mut escaped = true;
        let mut op = j;
        if chars[op] == '!' {
            if chars.get(op + 1) != Some(&'=') {
                return Err(self.error("PUG:INVALID_KEY_CHARACTER", "Unexpected character ! expected `=`"));
            }
            escaped = false;
            op += 1;
        }
        if chars[op] != '=' {
            if j == i && chars[i] != ',' {
                return Err(self.error(
                    "PUG:INVALID_KEY_CHARACTER",
                    format!("Unexpected character {} expected `=`", chars[i]),
                ));
            }
            return Ok((None, true, i));
        }

        for &c in &chars[i..=op] {
            self.step(c);
        }
        let mut i = self.skip_whitespace(chars, op + 1);

        let mut state = ScanState::default();
        let mut value = String::new();
        while i < chars.len() {
            let c = chars[i];
            if !state.is_nesting() && !state.is_string() {
                if c.is_whitespace() {
                    let next = chars[i..].iter().position(|c| !c.is_whitespace()).map(|n| i + n);
                    let Some(x) = next else {
                        break;
                    };
                    let n = chars[x];
                    let spread = chars[x..].starts_with(&['.', '.', '.']);
                    let ends = !is_punctuator(n) || n == '"' || n == '\'' || n == ':' || spread;
                    if ends && is_expression(&value) {
                        break;
                    }
                }
                if c == ',' && is_expression(&value) {
                    break;
                }
            }
            if let Err((expected, found)) = state.feed(c) {
                return Err(self.error(
                    "PUG:BRACKET_MISMATCH",
                    format!("mismatched bracket: expected `{expected}` but found `{found}`"),
                ));
            }
            value.push(c);
            self.step(c);
            i += 1;
        }
        self.assert_expression(&value)?;
        Ok((Some(value), escaped, i))
    }
}

#[cfg(test)]
mod tests {
    use crate::lexer::lex;
    use crate::token::TokenKind;

    fn attrs(src: &str) -> Vec<(String, Option<String>, bool)> {
        lex(src, &[])
            .unwrap()
            .into_iter()
            .filter_map(|t| match t.kind {
                TokenKind::Attribute { name, value, escaped } => Some((name, value, escaped)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn values_with_nested_commas_and_strings() {
        let a = attrs("div(data-list=[1, 2], style={a: 'b, c'}, title='x y')");
        assert_eq!(a[0], ("data-list".into(), Some("[1, 2]".into()), true));
        assert_eq!(a[1], ("style".into(), Some("{a: 'b, c'}".into()), true));
        assert_eq!(a[2], ("title".into(), Some("'x y'".into()), true));
    }

    #[test]
    fn quoted_keys_and_spacing_around_equals() {
        let a = attrs("div('(click)'='go()' x = 1)");
        assert_eq!(a[0], ("(click)".into(), Some("'go()'".into()), true));
        assert_eq!(a[1], ("x".into(), Some("1".into()), true));
    }

    #[test]
    fn operator_continues_value_across_whitespace() {
        let a = attrs("a(href=base\n  + '/x' target='_blank')");
        assert_eq!(a[0].1.as_deref(), Some("base\n  + '/x'"));
        assert_eq!(a[1].0, "target");
    }

    #[test]
    fn missing_equals_after_quoted_value() {
        let err = lex("div(\"foo\"bar)", &[]).unwrap_err();
        assert_eq!(err.code(), "PUG:INVALID_KEY_CHARACTER");
    }

    #[test]
    fn invalid_value_is_a_syntax_error() {
        let err = lex("a(href=)", &[]).unwrap_err();
        assert_eq!(err.code(), "PUG:SYNTAX_ERROR");
    }
}
