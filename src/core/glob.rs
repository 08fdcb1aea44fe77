//! Glob patterns for rule matching against repository-relative paths.
//!
//! `**` crosses directory separators, `*` and `?` stay within one segment,
//! `[...]` is a character class. Patterns compile once to an anchored regex.

use crate::core::error::DocHookError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, DocHookError> {
        let regex_src = translate(pattern)?;
        let regex = Regex::new(&regex_src).map_err(|e| DocHookError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Pattern {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> bool {
        let normalized = normalize(path);
        self.regex.is_match(&normalized)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Pattern::new(&raw).map_err(serde::de::Error::custom)
    }
}

fn normalize(path: &str) -> String {
    let p = path.replace('\\', "/");
    p.strip_prefix("./").unwrap_or(&p).to_string()
}

fn invalid(pattern: &str, reason: &str) -> DocHookError {
    DocHookError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}

fn translate(pattern: &str) -> Result<String, DocHookError> {
    if pattern.trim().is_empty() {
        return Err(invalid(pattern, "empty pattern"));
    }
    if pattern.contains("***") {
        return Err(invalid(pattern, "'***' is not a valid wildcard"));
    }

    let chars: Vec<char> = normalize(pattern).chars().collect();
    let mut out = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_segment_start = i == 0 || chars[i - 1] == '/';
                let followed_by_sep = chars.get(i + 2) == Some(&'/');
                if at_segment_start && followed_by_sep {
                    // `**/` matches zero or more whole directories.
                    out.push_str("(?:[^/]*/)*");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            '[' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .map(|p| p + i + 1)
                    .ok_or_else(|| invalid(pattern, "unclosed '['"))?;
                let body: String = chars[i + 1..close].iter().collect();
                if body.is_empty() {
                    return Err(invalid(pattern, "empty character class"));
                }
                let body = match body.strip_prefix('!') {
                    Some(rest) => format!("^{}", rest),
                    None => body,
                };
                out.push('[');
                out.push_str(&body.replace('\\', "\\\\"));
                out.push(']');
                i = close + 1;
            }
            other => {
                out.push_str(&regex::escape(&other.to_string()));
                i += 1;
            }
        }
    }
    out.push('$');
    Ok(out)
}
