use std::cmp::Ordering;
use std::fmt;

use crate::error::{Result, SchemaError};

const WILDCARD: char = '*';

/// A service version, possibly containing `*` wildcards.
///
/// A wildcard matches any run of characters other than `.`, and the whole
/// version must match. A pattern that is only `*` matches every version.
/// When several versions match, the highest one in [`compare_versions`]
/// order wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionString {
    pattern: String,
}

impl VersionString {
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let raw = pattern.into();
        let valid = raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | '.' | ',' | '-' | '_'));
        if !valid {
            return Err(SchemaError::InvalidVersionPattern(raw));
        }

        // Consecutive wildcards match the same as one.
        let mut pattern = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c == WILDCARD && pattern.ends_with(WILDCARD) {
                continue;
            }
            pattern.push(c);
        }
        Ok(Self { pattern })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True for the bare `*` pattern, which picks the highest version.
    pub fn is_latest(&self) -> bool {
        self.pattern.len() == 1 && self.pattern.starts_with(WILDCARD)
    }

    pub fn is_wildcard(&self) -> bool {
        self.pattern.contains(WILDCARD)
    }

    pub fn matches(&self, version: &str) -> bool {
        if self.is_latest() {
            return true;
        }
        glob_match(self.pattern.as_bytes(), version.as_bytes())
    }

    /// The highest matching version among `versions`.
    pub fn resolve<'a, I>(&self, versions: I) -> Result<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        versions
            .into_iter()
            .filter(|version| self.matches(version))
            .max_by(|a, b| compare_versions(a, b))
            .ok_or_else(|| SchemaError::VersionNotFound(self.pattern.clone()))
    }
}

impl fmt::Display for VersionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((&b'*', rest)) => {
            let mut consumed = 0;
            loop {
                if glob_match(rest, &text[consumed..]) {
                    return true;
                }
                match text.get(consumed) {
                    Some(b) if *b != b'.' => consumed += 1,
                    _ => return false,
                }
            }
        }
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

/// Order two versions; `Greater` means `a` ranks higher.
///
/// Versions with fewer `.` parts rank higher. Parts are compared in order;
/// within a part, fewer `-` sub-parts rank higher, then sub-parts compare
/// pairwise: integers numerically, integers above text, text
/// lexicographically.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<&str> = a.split('.').collect();
    let b_parts: Vec<&str> = b.split('.').collect();

    b_parts.len().cmp(&a_parts.len()).then_with(|| {
        a_parts
            .iter()
            .zip(&b_parts)
            .map(|(x, y)| compare_part(x, y))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    })
}

fn compare_part(a: &str, b: &str) -> Ordering {
    let a_subs: Vec<Piece<'_>> = a.split('-').map(Piece::parse).collect();
    let b_subs: Vec<Piece<'_>> = b.split('-').map(Piece::parse).collect();

    b_subs
        .len()
        .cmp(&a_subs.len())
        .then_with(|| a_subs.cmp(&b_subs))
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Piece<'a> {
    // Variant order matters: any text sorts below any number.
    Text(&'a str),
    Number(u64),
}

impl<'a> Piece<'a> {
    fn parse(s: &'a str) -> Self {
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = s.parse() {
                return Piece::Number(n);
            }
        }
        Piece::Text(s)
    }
}
