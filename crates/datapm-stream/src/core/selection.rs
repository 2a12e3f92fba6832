use std::fmt;
use std::iter::Peekable;
use std::str::{Chars, FromStr};

use crate::error::{Error, Result};

/// One component of a [`SelectionPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// `*`: any key or index.
    Any,
    /// A literal key. Decimal names also match the array index they spell.
    Name(String),
}

impl Segment {
    fn from_name(name: String) -> Self {
        if name == "*" { Self::Any } else { Self::Name(name) }
    }

    pub fn matches_key(&self, key: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Name(name) => name == key,
        }
    }

    pub fn matches_index(&self, index: usize) -> bool {
        match self {
            Self::Any => true,
            Self::Name(name) => is_canonical_index(name) && name.parse::<usize>().is_ok_and(|i| i == index),
        }
    }
}

/// Plain decimal without sign or leading zeros.
fn is_canonical_index(name: &str) -> bool {
    name.bytes().all(|b| b.is_ascii_digit()) && (name == "0" || !name.starts_with('0'))
}

/// Which nested values of a document become records.
///
/// `records.*` selects every element of the array (or every member of the
/// object) found under the top-level `records` key. A leading `$` is
/// accepted, as are bracket forms: `$.records[*]`, `rows[0]`,
/// `["odd.key"].*`. An empty path selects each top-level value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPath {
    expr:     String,
    segments: Vec<Segment>,
}

impl SelectionPath {
    pub fn parse(expr: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidSelectionPath {
            path: expr.to_string(),
            reason,
        };

        let mut rest = expr.trim();
        if let Some(stripped) = rest.strip_prefix('$') {
            if !(stripped.is_empty() || stripped.starts_with('.') || stripped.starts_with('[')) {
                return Err(invalid("expected '.' or '[' after '$'"));
            }
            rest = stripped;
        }
        if let Some(stripped) = rest.strip_prefix('.') {
            if stripped.is_empty() {
                return Err(invalid("trailing separator"));
            }
            rest = stripped;
        }

        let mut segments = Vec::new();
        let mut chars = rest.chars().peekable();

        while let Some(&c) = chars.peek() {
            if c == '[' {
                chars.next();
                segments.push(parse_bracket(&mut chars).map_err(invalid)?);
            } else {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    match c {
                        '.' | '[' => break,
                        ']' => return Err(invalid("unbalanced ']'")),
                        _ => {
                            name.push(c);
                            chars.next();
                        }
                    }
                }
                if name.is_empty() {
                    return Err(invalid("empty segment"));
                }
                segments.push(Segment::from_name(name));
            }

            match chars.peek() {
                None | Some('[') => {}
                Some('.') => {
                    chars.next();
                    if matches!(chars.peek(), None | Some('.')) {
                        return Err(invalid("empty segment"));
                    }
                }
                Some(_) => return Err(invalid("expected '.' or '[' after ']'")),
            }
        }

        Ok(Self {
            expr: expr.to_string(),
            segments,
        })
    }

    /// Selects each top-level value.
    pub fn root() -> Self {
        Self {
            expr:     String::new(),
            segments: Vec::new(),
        }
    }

    pub fn as_str(&self) -> &str { &self.expr }

    pub fn segments(&self) -> &[Segment] { &self.segments }

    /// Nesting depth of selected values; 0 for top-level values.
    pub fn depth(&self) -> usize { self.segments.len() }
}

fn parse_bracket(chars: &mut Peekable<Chars<'_>>) -> std::result::Result<Segment, &'static str> {
    let segment = match chars.peek() {
        Some(&quote) if quote == '"' || quote == '\'' => {
            chars.next();
            let mut name = String::new();
            loop {
                match chars.next() {
                    Some(c) if c == quote => break,
                    Some(c) => name.push(c),
                    None => return Err("unclosed quote"),
                }
            }
            Segment::Name(name)
        }
        _ => {
            let mut inner = String::new();
            while let Some(&c) = chars.peek() {
                if c == ']' {
                    break;
                }
                inner.push(c);
                chars.next();
            }
            let inner = inner.trim();
            if inner == "*" {
                Segment::Any
            } else if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit()) {
                Segment::Name(inner.to_string())
            } else {
                return Err("bracket must hold '*', an index or a quoted key");
            }
        }
    };

    match chars.next() {
        Some(']') => Ok(segment),
        _ => Err("unclosed bracket"),
    }
}

impl FromStr for SelectionPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

impl fmt::Display for SelectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.expr) }
}
