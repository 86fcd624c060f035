//! Tag handling: sanitizing, input forms, and merging of tag sets.
//!
//! Tags reach the client in one of two forms. The list form is an ordered sequence of already-formatted tags, such as
//! `"env:prod"` or a bare `"canary"`, and passes through untouched. The map form is an ordered mapping of tag keys to
//! values, where every key and value is sanitized before being joined as `key:value`.
//!
//! Whenever two tag sets meet -- a child client's global tags over its parent's, or a call's tags over the client's
//! global tags -- they are combined with [`merge`].
use std::borrow::Cow;

use indexmap::IndexMap;
use serde::Deserialize;

/// Wire-format dialect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Dialect {
    /// DogStatsD-style tags, written after the metric type as `|#key:value,...`.
    #[default]
    Standard,

    /// Telegraf-style tags, written after the metric name as `,key=value,...`.
    Telegraf,
}

impl Dialect {
    /// Returns the dialect for the given `telegraf` flag.
    pub const fn from_telegraf(telegraf: bool) -> Self {
        if telegraf {
            Dialect::Telegraf
        } else {
            Dialect::Standard
        }
    }

    /// Returns `true` if this is the telegraf dialect.
    pub const fn is_telegraf(self) -> bool {
        matches!(self, Dialect::Telegraf)
    }

    const fn is_reserved(self, c: char) -> bool {
        match self {
            Dialect::Standard => matches!(c, ':' | '|' | '@' | ','),
            Dialect::Telegraf => matches!(c, ':' | '|'),
        }
    }
}

/// A set of tags as supplied by the caller.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Tags {
    /// Pre-formatted tags, passed through as-is.
    List(Vec<String>),

    /// Key/value pairs, sanitized individually and joined as `key:value`.
    Map(IndexMap<String, String>),
}

impl Tags {
    /// Returns `true` if there are no tags.
    pub fn is_empty(&self) -> bool {
        match self {
            Tags::List(tags) => tags.is_empty(),
            Tags::Map(tags) => tags.is_empty(),
        }
    }

    /// Formats the tags into their literal form.
    ///
    /// List entries are returned unchanged. Map entries have reserved characters in both the key and the value
    /// replaced for the given dialect.
    pub fn format(&self, dialect: Dialect) -> Vec<Cow<'_, str>> {
        match self {
            Tags::List(tags) => tags.iter().map(|tag| Cow::Borrowed(tag.as_str())).collect(),
            Tags::Map(tags) => tags
                .iter()
                .map(|(key, value)| {
                    Cow::Owned(format!("{}:{}", sanitize(key, dialect), sanitize(value, dialect)))
                })
                .collect(),
        }
    }
}

impl Default for Tags {
    fn default() -> Self {
        Tags::List(Vec::new())
    }
}

impl From<Vec<String>> for Tags {
    fn from(tags: Vec<String>) -> Self {
        Tags::List(tags)
    }
}

impl<'a> From<&'a [&'a str]> for Tags {
    fn from(tags: &'a [&'a str]) -> Self {
        Tags::List(tags.iter().map(|tag| (*tag).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Tags {
    fn from(tags: [&str; N]) -> Self {
        Tags::List(tags.iter().map(|tag| (*tag).to_string()).collect())
    }
}

impl From<IndexMap<String, String>> for Tags {
    fn from(tags: IndexMap<String, String>) -> Self {
        Tags::Map(tags)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Tags {
    fn from(tags: [(&str, &str); N]) -> Self {
        Tags::Map(tags.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect())
    }
}

impl From<Vec<(String, String)>> for Tags {
    fn from(tags: Vec<(String, String)>) -> Self {
        Tags::Map(tags.into_iter().collect())
    }
}

/// Replaces every character reserved by the dialect with an underscore.
///
/// The standard dialect reserves `:`, `|`, `@`, and `,`. The telegraf dialect only reserves `:` and `|`.
pub fn sanitize(text: &str, dialect: Dialect) -> Cow<'_, str> {
    if text.chars().any(|c| dialect.is_reserved(c)) {
        Cow::Owned(text.chars().map(|c| if dialect.is_reserved(c) { '_' } else { c }).collect())
    } else {
        Cow::Borrowed(text)
    }
}

/// Splits a tag into its key and value.
///
/// Returns `None` for bare tags: those without a colon, or whose first colon is the first character.
fn split_tag(tag: &str) -> Option<(&str, &str)> {
    match tag.find(':') {
        Some(idx) if idx >= 1 => Some((&tag[..idx], &tag[idx + 1..])),
        _ => None,
    }
}

fn join_tag(key: &str, value: &str) -> String {
    let mut tag = String::with_capacity(key.len() + value.len() + 1);
    tag.push_str(key);
    tag.push(':');
    tag.push_str(value);
    tag
}

/// Merges `child` tags over `parent` tags.
///
/// A child tag replaces the parent tag with the same key, in the parent's position. Bare child tags, and keys only
/// the child has, are appended after the parent's tags. When the child supplies more than one value for the same key,
/// every one of those values is kept as a distinct tag at the end of the set, after all other tags. Literal duplicates
/// are removed, keeping the first occurrence.
///
/// Neither input is modified.
pub fn merge(parent: &[String], child: &Tags, dialect: Dialect) -> Vec<String> {
    let formatted = child.format(dialect);

    let mut child_values: IndexMap<&str, Vec<&str>> = IndexMap::new();
    let mut to_append = Vec::new();
    for tag in &formatted {
        match split_tag(tag) {
            Some((key, value)) => child_values.entry(key).or_default().push(value),
            None => to_append.push(tag.as_ref()),
        }
    }

    let mut duplicates: Vec<String> = Vec::new();
    let mut result: Vec<String> = Vec::with_capacity(parent.len() + formatted.len());

    for tag in parent {
        let Some((key, _)) = split_tag(tag) else {
            result.push(tag.clone());
            continue;
        };

        match child_values.shift_remove(key) {
            None => result.push(tag.clone()),
            Some(values) if values.len() > 1 => {
                duplicates.extend(values.iter().map(|value| join_tag(key, value)));

                // The parent tag is only emitted from the duplicate bucket if the child repeated it.
                if !duplicates.contains(tag) {
                    result.push(tag.clone());
                }
            }
            Some(values) => result.push(join_tag(key, values[0])),
        }
    }

    for (key, values) in &child_values {
        if values.len() > 1 {
            duplicates.extend(
                values
                    .iter()
                    .map(|value| join_tag(key, value))
                    .filter(|pair| !parent.contains(pair)),
            );
        } else {
            result.push(join_tag(key, values[0]));
        }
    }

    let mut merged: Vec<String> = Vec::with_capacity(result.len() + to_append.len() + duplicates.len());
    let candidates = result
        .into_iter()
        .chain(to_append.into_iter().map(str::to_string))
        .chain(duplicates);
    for tag in candidates {
        if !merged.contains(&tag) {
            merged.push(tag);
        }
    }

    merged
}
