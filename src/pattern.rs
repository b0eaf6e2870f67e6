//! Shell style wildcards for single path segments

use bstr::BString;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Byte(u8),
    /// `?`
    Any,
    /// `*`
    Star,
    Class { negated: bool, ranges: Vec<(u8, u8)> },
}

impl Token {
    fn matches(&self, b: u8) -> bool {
        match self {
            Token::Byte(expected) => *expected == b,
            Token::Any => b != b'/',
            Token::Star => false,
            Token::Class { negated, ranges } => {
                let found = ranges.iter().any(|&(lo, hi)| lo <= b && b <= hi);
                found != *negated && b != b'/'
            }
        }
    }
}

/// A compiled wildcard pattern
///
/// Supports `*`, `?`, `[...]` classes (negated with `!` or `^`, ranges with `-`) and `\`
/// escapes. Neither `*` nor `?` match `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Pattern {
    tokens: Vec<Token>,
}

impl Pattern {
    pub(crate) fn new(pattern: &[u8]) -> Result<Self> {
        let bad = |reason| Error::BadPattern {
            pattern: BString::from(pattern),
            reason,
        };

        let mut tokens = Vec::with_capacity(pattern.len());
        let mut i = 0;
        while i < pattern.len() {
            match pattern[i] {
                b'\\' => {
                    let b = *pattern.get(i + 1).ok_or_else(|| bad("trailing backslash"))?;
                    tokens.push(Token::Byte(b));
                    i += 2;
                }
                b'?' => {
                    tokens.push(Token::Any);
                    i += 1;
                }
                b'*' => {
                    if tokens.last() != Some(&Token::Star) {
                        tokens.push(Token::Star);
                    }
                    i += 1;
                }
                b'[' => {
                    let (token, len) = parse_class(&pattern[i + 1..]).map_err(bad)?;
                    tokens.push(token);
                    i += len + 1;
                }
                b => {
                    tokens.push(Token::Byte(b));
                    i += 1;
                }
            }
        }
        Ok(Self { tokens })
    }

    /// The one name this pattern matches, when it has no wildcards
    pub(crate) fn literal(&self) -> Option<Vec<u8>> {
        self.tokens
            .iter()
            .map(|t| match t {
                Token::Byte(b) => Some(*b),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn matches(&self, name: &[u8]) -> bool {
        let tokens = &self.tokens;
        let (mut t, mut n) = (0, 0);
        // Position of the last star, and how far into `name` it currently reaches
        let mut star: Option<(usize, usize)> = None;
        while n < name.len() {
            match tokens.get(t) {
                Some(Token::Star) => {
                    star = Some((t, n));
                    t += 1;
                    continue;
                }
                Some(token) if token.matches(name[n]) => {
                    t += 1;
                    n += 1;
                    continue;
                }
                _ => {}
            }
            match star {
                Some((star_t, star_n)) if name[star_n] != b'/' => {
                    star = Some((star_t, star_n + 1));
                    t = star_t + 1;
                    n = star_n + 1;
                }
                _ => return false,
            }
        }
        tokens[t..].iter().all(|t| *t == Token::Star)
    }
}

/// Parse a class following its `[`, returning the token and the bytes used including the `]`
fn parse_class(pattern: &[u8]) -> std::result::Result<(Token, usize), &'static str> {
    let mut i = 0;
    let negated = matches!(pattern.first(), Some(b'!') | Some(b'^'));
    if negated {
        i += 1;
    }
    let mut ranges = Vec::new();
    loop {
        match pattern.get(i) {
            None => return Err("unterminated character class"),
            Some(b']') if !ranges.is_empty() => {
                return Ok((Token::Class { negated, ranges }, i + 1));
            }
            Some(_) => {}
        }
        let (lo, len) = class_byte(&pattern[i..])?;
        i += len;
        let mut hi = lo;
        if pattern.get(i) == Some(&b'-') {
            let (b, len) = class_byte(&pattern[i + 1..])?;
            hi = b;
            i += len + 1;
        }
        if hi < lo {
            return Err("inverted range in character class");
        }
        ranges.push((lo, hi));
    }
}

fn class_byte(pattern: &[u8]) -> std::result::Result<(u8, usize), &'static str> {
    match pattern {
        [] => Err("unterminated character class"),
        [b'\\'] => Err("trailing backslash"),
        [b'\\', b, ..] => Ok((*b, 2)),
        [b'-', ..] | [b']', ..] => Err("unescaped '-' or ']' in character class"),
        [b, ..] => Ok((*b, 1)),
    }
}
