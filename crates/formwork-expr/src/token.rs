//! Formula tokenizer.
//!
//! Scans left to right, trying an ordered table of matchers at each offset.
//! The first matcher that accepts wins, so the dotted object-reference and
//! `$`-variable patterns sit ahead of the plain identifier pattern.

use serde::{Deserialize, Serialize};

use crate::error::LexError;

/// Token categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Number,
    String,
    Identifier,
    /// `Name.prop(.prop)*`
    ObjectRef,
    /// `$name`
    Variable,
    Operator,
    Punctuation,
}

/// One lexeme with its source position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    /// The exact source slice, quotes and escapes included.
    pub text: String,
    /// Byte offset of the first character.
    pub offset: usize,
}

impl Token {
    /// Whether this is the operator or punctuation `symbol`.
    pub fn is(&self, symbol: &str) -> bool {
        matches!(self.kind, TokenKind::Operator | TokenKind::Punctuation) && self.text == symbol
    }

    /// Decoded contents of a string literal token.
    pub fn string_value(&self) -> Option<String> {
        if self.kind != TokenKind::String {
            return None;
        }
        let inner = &self.text[1..self.text.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                other => out.push(other),
            }
        }
        Some(out)
    }
}

type Matcher = fn(&str) -> Option<usize>;

/// Ordered matcher table. `None` kind means the match is discarded.
const MATCHERS: &[(Option<TokenKind>, Matcher)] = &[
    (None, match_whitespace),
    (Some(TokenKind::Number), match_number),
    (Some(TokenKind::String), match_string),
    (Some(TokenKind::ObjectRef), match_object_ref),
    (Some(TokenKind::Variable), match_variable),
    (Some(TokenKind::Identifier), match_identifier),
    (Some(TokenKind::Operator), match_operator),
    (Some(TokenKind::Punctuation), match_punctuation),
];

const OPERATORS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "<", ">", "!",
];

const PUNCTUATION: &[&str] = &["(", ")", ",", "?", ":"];

/// Turn formula source into a flat token sequence (whitespace dropped).
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut offset = 0;

    'scan: while offset < source.len() {
        let rest = &source[offset..];
        for &(kind, matcher) in MATCHERS {
            let Some(len) = matcher(rest).filter(|&len| len > 0) else {
                continue;
            };
            if let Some(kind) = kind {
                tokens.push(Token {
                    kind,
                    text: rest[..len].to_string(),
                    offset,
                });
            }
            offset += len;
            continue 'scan;
        }
        let found = rest.chars().next().unwrap_or('\0');
        return Err(LexError { offset, found });
    }

    Ok(tokens)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn count_digits(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|b| b.is_ascii_digit()).count()
}

fn match_whitespace(s: &str) -> Option<usize> {
    let len = s.len() - s.trim_start().len();
    (len > 0).then_some(len)
}

fn match_number(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = count_digits(bytes);
    if bytes.get(i) == Some(&b'.') {
        let frac = count_digits(&bytes[i + 1..]);
        if frac > 0 {
            i += 1 + frac;
        } else if i == 0 {
            return None;
        }
    }
    if i == 0 {
        return None;
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let exp = count_digits(&bytes[j..]);
        if exp > 0 {
            i = j + exp;
        }
    }
    Some(i)
}

fn match_string(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let quote = *bytes.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

fn match_identifier(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if !is_ident_start(*bytes.first()?) {
        return None;
    }
    Some(1 + bytes[1..].iter().take_while(|&&b| is_ident_continue(b)).count())
}

fn match_object_ref(s: &str) -> Option<usize> {
    let mut len = match_identifier(s)?;
    let mut segments = 0;
    while s[len..].starts_with('.') {
        let Some(seg) = match_identifier(&s[len + 1..]) else {
            break;
        };
        len += 1 + seg;
        segments += 1;
    }
    (segments > 0).then_some(len)
}

fn match_variable(s: &str) -> Option<usize> {
    let rest = s.strip_prefix('$')?;
    Some(1 + match_identifier(rest)?)
}

fn match_operator(s: &str) -> Option<usize> {
    OPERATORS.iter().find(|op| s.starts_with(*op)).map(|op| op.len())
}

fn match_punctuation(s: &str) -> Option<usize> {
    PUNCTUATION
        .iter()
        .find(|p| s.starts_with(*p))
        .map(|p| p.len())
}
