//! Comment stripping between lexing and parsing.
//!
//! `//-` comments are always removed, `//` comments only on request.  A
//! stripped comment takes its indented pipeless body with it.

use crate::error::{syntax, Result};
use crate::token::{Token, TokenKind};

pub fn strip_comments(tokens: Vec<Token>, strip_buffered: bool) -> Result<Vec<Token>> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut in_comment = false;
    let mut in_body = false;

    for tok in tokens {
        let unexpected = |tok: &Token| {
            syntax(
                "PUG:UNEXPECTED_TOKEN",
                format!("`{}` was not expected here", tok.kind.name()),
                tok.loc.start_line,
                tok.loc.start_col,
            )
        };
        match tok.kind {
            TokenKind::Comment { buffer, .. } => {
                if in_comment {
                    return Err(unexpected(&tok));
                }
                in_comment = if buffer { strip_buffered } else { true };
                if !in_comment {
                    out.push(tok);
                }
            }
            TokenKind::StartPipelessText if in_comment => {
                if in_body {
                    return Err(unexpected(&tok));
                }
                in_body = true;
            }
            TokenKind::EndPipelessText if in_comment => {
                if !in_body {
                    return Err(unexpected(&tok));
                }
                in_body = false;
                in_comment = false;
            }
            _ if in_body => {}
            _ => {
                in_comment = false;
                out.push(tok);
            }
        }
    }
    Ok(out)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn names(src: &str, strip_buffered: bool) -> Vec<&'static str> {
        strip_comments(lex(src, &[]).unwrap(), strip_buffered)
            .unwrap()
            .iter()
            .map(|t| t.kind.name())
            .collect()
    }

    #[test]
    fn unbuffered_comment_and_body_go() {
        let n = names("//- hidden\n  still hidden\np", false);
        assert!(!n.contains(&"comment"));
        assert!(!n.contains(&"text"));
        assert!(n.contains(&"tag"));
    }

    #[test]
    fn buffered_comment_kept_unless_requested() {
        assert!(names("// shown\np", false).contains(&"comment"));
        assert!(!names("// shown\np", true).contains(&"comment"));
    }

    #[test]
    fn buffered_body_survives_when_kept() {
        let n = names("//\n  body\np", false);
        assert!(n.contains(&"start-pipeless-text"));
        assert!(n.contains(&"text"));
    }
}
