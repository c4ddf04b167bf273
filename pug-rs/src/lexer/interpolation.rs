//! Balanced-bracket scanning over embedded expression text.
//!
//! Attribute values, `#{}` interpolations, mixin arguments and
//! `&attributes(...)` all end at a closing character that only counts when
//! it is outside every string and bracket pair.  [`ScanState`] tracks that
//! nesting one character at a time.

use std::fmt;

/// Why a scan failed.  Indices are byte offsets into the scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// Input ended inside a bracket or string.
    Unterminated { index: usize },
    /// A closing bracket that does not match the innermost open one.
    Mismatched { index: usize, expected: char, found: char },
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Unterminated { .. } => f.write_str("end of input reached with an unclosed bracket or string"),
            ScanError::Mismatched { expected, found, .. } => {
                write!(f, "mismatched bracket: expected `{expected}` but found `{found}`")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    /// Waiting for this closing bracket.
    Bracket(char),
    /// Inside `${ ... }` of a template string.
    TemplateExpr,
}

/// Nesting and string state of a partially scanned expression.
#[derive(Debug, Clone, Default)]
pub struct ScanState {
    stack: Vec<Frame>,
    string: Option<char>,
    escaped: bool,
    prev: Option<char>,
}

impl ScanState {
    pub fn is_nesting(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn is_string(&self) -> bool {
        self.string.is_some()
    }

    /// Feed one character.  `Err((expected, found))` on a mismatched closer.
    pub fn feed(&mut self, c: char) -> Result<(), (char, char)> {
        let prev = self.prev.replace(c);
        if let Some(q) = self.string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == q {
                self.string = None;
            } else if q == '`' && c == '{' && prev == Some('$') {
                self.string = None;
                self.stack.push(Frame::TemplateExpr);
            }
            return Ok(());
        }
        match c {
            '\'' | '"' | '`' => self.string = Some(c),
            '(' => self.stack.push(Frame::Bracket(')')),
            '[' => self.stack.push(Frame::Bracket(']')),
            '{' => self.stack.push(Frame::Bracket('}')),
            ')' | ']' | '}' => match self.stack.pop() {
                Some(Frame::Bracket(expected)) if expected == c => {}
                Some(Frame::TemplateExpr) if c == '}' => self.string = Some('`'),
                Some(Frame::Bracket(expected)) => return Err((expected, c)),
                Some(Frame::TemplateExpr) => return Err(('}', c)),
                None => return Err((' ', c)),
            },
            _ => {}
        }
        Ok(())
    }
}

/// Byte index of the first `delim` in `src[start..]` that sits outside all
/// strings and brackets.
pub fn parse_until(src: &str, start: usize, delim: char) -> Result<usize, ScanError> {
    let mut state = ScanState::default();
    for (i, c) in src[start..].char_indices() {
        let index = start + i;
        if c == delim && !state.is_nesting() && !state.is_string() {
            return Ok(index);
        }
        state
            .feed(c)
            .map_err(|(expected, found)| ScanError::Mismatched { index, expected, found })?;
    }
    Err(ScanError::Unterminated { index: src.len() })
}

/// Given `src[open]` is an opening bracket, the byte index of its partner.
pub fn matching_bracket(src: &str, open: usize) -> Result<usize, ScanError> {
    let close = match src[open..].chars().next() {
        Some('(') => ')',
        Some('[') => ']',
        Some('{') => '}',
        Some(found) => {
            return Err(ScanError::Mismatched {
                index: open,
                expected: '(',
                found,
            })
        }
        None => return Err(ScanError::Unterminated { index: open }),
    };
    parse_until(src, open + 1, close)
}

/// Byte index of the first top-level `ch` in `src`, if any.
pub fn find_top_level(src: &str, ch: char) -> Option<usize> {
    parse_until(src, 0, ch).ok()
}

/// Leftmost `#{` / `!{` in `value`.
///
/// Returns `(index, escaped, sigil)`; when the marker is preceded by a
/// backslash `escaped` is true and `index` points at the backslash.
pub fn find_code_interpolation(value: &str) -> Option<(usize, bool, char)> {
    let bytes = value.as_bytes();
    (0..bytes.len().saturating_sub(1)).find_map(|i| {
        let sigil = bytes[i];
        if (sigil == b'#' || sigil == b'!') && bytes[i + 1] == b'{' {
            if i > 0 && bytes[i - 1] == b'\\' {
                Some((i - 1, true, sigil as char))
            } else {
                Some((i, false, sigil as char))
            }
        } else {
            None
        }
    })
}

/// Characters that may continue an expression across whitespace.
pub fn is_punctuator(c: char) -> bool {
    matches!(
        c,
        '!' | '%' | '&' | '(' | ')' | '*' | '+' | ',' | '-' | '.' | '/' | ':' | ';' | '<' | '=' | '>' | '?'
            | '[' | ']' | '^' | '{' | '|' | '}' | '~' | '"' | '\''
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_strings_and_nested_brackets() {
        let src = "a + '}' + {b: \"}\"}.b} tail";
        assert_eq!(parse_until(src, 0, '}'), Ok(20));
    }

    #[test]
    fn template_strings_nest() {
        let src = "`x ${ {a: 1}.a } }` }";
        assert_eq!(parse_until(src, 0, '}'), Ok(src.len() - 1));
    }

    #[test]
    fn reports_unterminated_and_mismatched() {
        assert_eq!(parse_until("a + (b", 0, ')'), Err(ScanError::Unterminated { index: 6 }));
        assert!(matches!(
            parse_until("(a]", 0, ')'),
            Err(ScanError::Mismatched { expected: ')', found: ']', .. })
        ));
    }

    #[test]
    fn matching_bracket_from_open() {
        assert_eq!(matching_bracket("(a, (b)) c", 0), Ok(7));
        assert!(matching_bracket("x", 0).is_err());
    }

    #[test]
    fn finds_leftmost_code_interpolation() {
        assert_eq!(find_code_interpolation("a #{b} !{c}"), Some((2, false, '#')));
        assert_eq!(find_code_interpolation("a \\#{b}"), Some((2, true, '#')));
        assert_eq!(find_code_interpolation("x !{y}"), Some((2, false, '!')));
        assert_eq!(find_code_interpolation("plain # { text"), None);
    }

    #[test]
    fn top_level_colon() {
        assert_eq!(find_top_level("'a:b': p", ':'), Some(5));
        assert_eq!(find_top_level("{a: 1}", ':'), None);
    }
}
