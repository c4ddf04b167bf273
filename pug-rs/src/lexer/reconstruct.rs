//! Rebuild template source from a token sequence.
//!
//! Each token is written at its recorded line and column, so indentation
//! and the whitespace between tokens come back from the locations alone.
//! Re-lexing the output yields the same token kinds and payloads for
//! well-formed, space-indented input.

use crate::ast::BlockMode;
use crate::token::{Token, TokenKind};

struct Writer {
    out: String,
    line: usize,
    col: usize,
}

impl Writer {
    fn move_to(&mut self, line: usize, col: usize) {
        while self.line < line {
            self.out.push('\n');
            self.line += 1;
            self.col = 1;
        }
        while self.col < col {
            self.out.push(' ');
            self.col += 1;
        }
    }

    fn write(&mut self, text: &str) {
        for c in text.chars() {
            self.out.push(c);
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace("#{", "\\#{").replace("!{", "\\!{").replace("#[", "\\#[")
}

fn attribute(name: &str, value: Option<&str>, escaped: bool) -> String {
    match value {
        None => name.to_owned(),
        Some(v) if escaped => format!("{name}={v}"),
        Some(v) => format!("{name}!={v}"),
    }
}

/// The source text of a token, or `None` for purely structural tokens.
fn source_of(kind: &TokenKind) -> Option<String> {
    let s = match kind {
        TokenKind::Indent(_)
        | TokenKind::Outdent
        | TokenKind::Newline
        | TokenKind::Eof
        | TokenKind::Blank
        | TokenKind::StartPipelessText
        | TokenKind::EndPipelessText => return None,
        TokenKind::Tag(name) => name.clone(),
        TokenKind::InterpolatedTag(expr) => format!("#{{{expr}}}"),
        TokenKind::Id(id) => format!("#{id}"),
        TokenKind::Class(class) => format!(".{class}"),
        TokenKind::StartAttributes => "(".into(),
        TokenKind::Attribute { name, value, escaped } => attribute(name, value.as_deref(), *escaped),
        TokenKind::EndAttributes => ")".into(),
        TokenKind::AndAttributes(expr) => format!("&attributes({expr})"),
        TokenKind::Colon => ":".into(),
        TokenKind::Slash => "/".into(),
        TokenKind::Dot => ".".into(),
        TokenKind::Code { code, buffer, escape } => {
            let flag = match (buffer, escape) {
                (true, true) => "=",
                (true, false) => "!=",
                _ => "-",
            };
            format!("{flag} {code}")
        }
        TokenKind::BlockCode => "-".into(),
        TokenKind::InterpolatedCode { code, escape, .. } => {
            format!("{}{{{code}}}", if *escape { '#' } else { '!' })
        }
        TokenKind::If(e) => format!("if {e}"),
        TokenKind::ElseIf(e) => format!("else if {e}"),
        TokenKind::Else => "else".into(),
        TokenKind::Unless(e) => format!("unless {e}"),
        TokenKind::Case(e) => format!("case {e}"),
        TokenKind::When(e) => format!("when {e}"),
        TokenKind::Default => "default".into(),
        TokenKind::Each { val, key, code } => match key {
            Some(key) => format!("each {val}, {key} in {code}"),
            None => format!("each {val} in {code}"),
        },
        TokenKind::While(e) => format!("while {e}"),
        TokenKind::Block { name, mode } => match mode {
            BlockMode::Replace => format!("block {name}"),
            other => format!("block {} {name}", other.name()),
        },
        TokenKind::MixinBlock => "block".into(),
        TokenKind::Yield => "yield".into(),
        TokenKind::Extends => "extends".into(),
        TokenKind::Include => "include".into(),
        TokenKind::Path(p) => p.clone(),
        TokenKind::Mixin { name, args } => match args {
            Some(args) => format!("mixin {name}({args})"),
            None => format!("mixin {name}"),
        },
        TokenKind::Call { name, args } => match args {
            Some(args) => format!("+{name}({args})"),
            None => format!("+{name}"),
        },
        TokenKind::Filter(name) => format!(":{name}"),
        TokenKind::Text(t) => escape_text(t),
        TokenKind::TextHtml(t) => t.clone(),
        TokenKind::Comment { text, buffer } => format!("{}{text}", if *buffer { "//" } else { "//-" }),
        TokenKind::Doctype(v) => format!("doctype {v}").trim_end().to_owned(),
        TokenKind::StartInterpolation => "#[".into(),
        TokenKind::EndInterpolation => "]".into(),
        TokenKind::Custom { value, .. } => value.clone(),
    };
    Some(s)
}

/// Render `tokens` back into template source.
pub fn reconstruct(tokens: &[Token]) -> String {
    let mut w = Writer {
        out: String::new(),
        line: 1,
        col: 1,
    };
    let mut pipeless = false;
    let mut line_start = true;
    for token in tokens {
        match token.kind {
            TokenKind::StartPipelessText => pipeless = true,
            TokenKind::EndPipelessText => pipeless = false,
            _ => {}
        }
        let loc = token.loc;
        if loc.start_line > w.line {
            line_start = true;
        }
        let Some(text) = source_of(&token.kind) else {
            continue;
        };
        match &token.kind {
            // a piped text line needs its `|` back
            TokenKind::Text(_) if line_start && !pipeless => {
                w.move_to(loc.start_line, loc.start_col.saturating_sub(2).max(1));
                w.write("| ");
            }
            _ => w.move_to(loc.start_line, loc.start_col),
        }
        w.write(&text);
        line_start = false;
    }
    w.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src, &[]).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn relexes_to_the_same_tokens() {
        let src = "doctype html\nhtml\n  body(class='x', id=y)\n    h1#t.big Hello #{name}!\n    | piped\n    p.\n      raw\n\n      more\n    each v, i in list\n      +item(v)\n    //- note\n";
        let tokens = lex(src, &[]).unwrap();
        let rebuilt = reconstruct(&tokens);
        assert_eq!(kinds(&rebuilt), tokens.into_iter().map(|t| t.kind).collect::<Vec<_>>());
    }

    #[test]
    fn keeps_escaped_markers_escaped() {
        let src = "p \\#{literal}";
        let rebuilt = reconstruct(&lex(src, &[]).unwrap());
        assert_eq!(kinds(&rebuilt), kinds(src));
    }
}
