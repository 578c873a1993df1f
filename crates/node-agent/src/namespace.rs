// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Glob matching over `/` separated metric names.
//!
//! Patterns are compiled once into an anchored regular expression. Glob
//! operators never cross a segment boundary, so a lone `*` segment matches
//! exactly one segment of the concrete name.
//!
//! Supported syntax within a segment:
//!
//! * `*` any run of characters
//! * `?` one character
//! * `[abc]`, `[a-z]`, `[!a]` character classes
//! * `{cpu,mem}` alternation
//! * `\` escapes the next character

use crate::errors::PatternSyntaxError;
use crate::metric::{Metric, DYNAMIC_VALUE};
use regex::Regex;
use std::iter::Peekable;
use std::str::Chars;

const GLOB_META: &[char] = &['*', '?', '[', '{', '\\'];

/// Returns true when `text` contains glob operators
pub fn is_glob(text: &str) -> bool {
    text.contains(GLOB_META)
}

#[derive(Debug, Clone)]
pub struct NamespacePattern {
    raw: String,
    regex: Regex,
    literal: bool,
}

impl NamespacePattern {
    /// Compiles a glob pattern. A leading `/` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PatternSyntaxError`] for empty patterns, unclosed `[` or `{`,
    /// empty character classes, nested alternations and trailing escapes.
    pub fn compile(pattern: &str) -> Result<Self, PatternSyntaxError> {
        let trimmed = pattern.trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(PatternSyntaxError::new(pattern, "empty pattern"));
        }

        let mut expr = String::with_capacity(trimmed.len() * 2 + 2);
        expr.push('^');
        translate(pattern, trimmed, &mut expr, false)?;
        expr.push('$');

        let regex =
            Regex::new(&expr).map_err(|e| PatternSyntaxError::new(pattern, e.to_string()))?;

        Ok(Self {
            raw: trimmed.to_string(),
            regex,
            literal: !is_glob(trimmed),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the pattern has no glob operators
    pub fn is_literal(&self) -> bool {
        self.literal
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name.trim_start_matches('/'))
    }

    /// See [`resolve_wildcard`]
    pub fn resolve(&self, concrete: &str) -> String {
        resolve_wildcard(&self.raw, concrete)
    }
}

fn translate(
    original: &str,
    glob: &str,
    out: &mut String,
    in_alternation: bool,
) -> Result<(), PatternSyntaxError> {
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '\\' => match chars.next() {
                Some(escaped) => push_literal(out, escaped),
                None => return Err(PatternSyntaxError::new(original, "trailing escape")),
            },
            '[' => translate_class(original, &mut chars, out)?,
            '{' => {
                if in_alternation {
                    return Err(PatternSyntaxError::new(original, "nested alternation"));
                }
                let body = alternation_body(original, &mut chars)?;
                out.push_str("(?:");
                for (i, alternative) in split_alternatives(&body).iter().enumerate() {
                    if i > 0 {
                        out.push('|');
                    }
                    translate(original, alternative, out, true)?;
                }
                out.push(')');
            }
            other => push_literal(out, other),
        }
    }
    Ok(())
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

fn translate_class(
    original: &str,
    chars: &mut Peekable<Chars<'_>>,
    out: &mut String,
) -> Result<(), PatternSyntaxError> {
    let negated = matches!(chars.peek(), Some('!') | Some('^'));
    if negated {
        chars.next();
    }

    let mut items = String::new();
    let mut closed = false;
    while let Some(c) = chars.next() {
        match c {
            ']' => {
                closed = true;
                break;
            }
            '\\' => match chars.next() {
                Some(escaped) => push_class_char(&mut items, escaped),
                None => return Err(PatternSyntaxError::new(original, "trailing escape")),
            },
            '-' if !items.is_empty() && chars.peek().is_some_and(|n| *n != ']') => {
                items.push('-')
            }
            other => push_class_char(&mut items, other),
        }
    }

    if !closed {
        return Err(PatternSyntaxError::new(
            original,
            "unclosed character class",
        ));
    }
    if items.is_empty() {
        return Err(PatternSyntaxError::new(original, "empty character class"));
    }

    out.push('[');
    if negated {
        // a negated class must not swallow the segment separator
        out.push_str("^/");
    }
    out.push_str(&items);
    out.push(']');
    Ok(())
}

fn push_class_char(items: &mut String, c: char) {
    if matches!(c, '\\' | ']' | '[' | '^' | '-' | '&' | '~') {
        items.push('\\');
    }
    items.push(c);
}

fn alternation_body(
    original: &str,
    chars: &mut Peekable<Chars<'_>>,
) -> Result<String, PatternSyntaxError> {
    let mut body = String::new();
    while let Some(c) = chars.next() {
        match c {
            '}' => return Ok(body),
            '{' => return Err(PatternSyntaxError::new(original, "nested alternation")),
            '\\' => {
                body.push(c);
                match chars.next() {
                    Some(escaped) => body.push(escaped),
                    None => return Err(PatternSyntaxError::new(original, "trailing escape")),
                }
            }
            other => body.push(other),
        }
    }
    Err(PatternSyntaxError::new(original, "unclosed alternation"))
}

fn split_alternatives(body: &str) -> Vec<String> {
    let mut alternatives = vec![String::new()];
    let mut escaped = false;
    for c in body.chars() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == ',' {
            alternatives.push(String::new());
            continue;
        }
        if let Some(current) = alternatives.last_mut() {
            current.push(c);
        }
    }
    alternatives
}

/// Substitutes every glob segment of `template` with the segment at the
/// same position in `concrete`. Segments past the end of `concrete` are
/// kept as written.
///
/// # Examples
///
/// ```
/// use node_agent::namespace::resolve_wildcard;
///
/// assert_eq!(
///     resolve_wildcard("intel/docker/*/spec/cpu_shares", "intel/docker/c1/cpu/usage"),
///     "intel/docker/c1/spec/cpu_shares"
/// );
/// ```
pub fn resolve_wildcard(template: &str, concrete: &str) -> String {
    let concrete: Vec<&str> = concrete.trim_start_matches('/').split('/').collect();
    template
        .trim_start_matches('/')
        .split('/')
        .enumerate()
        .map(|(i, segment)| {
            if is_glob(segment) {
                concrete.get(i).copied().unwrap_or(segment)
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Segment-wise prefix test. A dynamic `*` segment on either side equals
/// any segment, so catalog entries with placeholders still line up with
/// concrete names.
pub fn has_segment_prefix(name: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_start_matches('/').trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    let mut name_segments = name.trim_start_matches('/').split('/');
    prefix.split('/').all(|expected| match name_segments.next() {
        Some(actual) => actual == expected || actual == DYNAMIC_VALUE || expected == DYNAMIC_VALUE,
        None => false,
    })
}

/// Selects catalog entries by a set of configured metric name keys.
///
/// A name is selected when any compiled pattern matches it, or when a
/// non-glob key and the name are segment-wise prefixes of one another.
#[derive(Debug, Clone)]
pub struct NamespaceMatcher {
    patterns: Vec<NamespacePattern>,
}

impl NamespaceMatcher {
    pub fn new<I, S>(keys: I) -> Result<Self, PatternSyntaxError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = keys
            .into_iter()
            .map(|key| NamespacePattern::compile(key.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> &[NamespacePattern] {
        &self.patterns
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            pattern.matches(name)
                || (pattern.is_literal()
                    && (has_segment_prefix(name, pattern.as_str())
                        || has_segment_prefix(pattern.as_str(), name)))
        })
    }

    pub fn select(&self, catalog: &[Metric]) -> Vec<Metric> {
        catalog
            .iter()
            .filter(|metric| self.is_selected(&metric.name()))
            .cloned()
            .collect()
    }
}
