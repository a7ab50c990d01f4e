//! Document -> RetrievalResult. Pure and total: malformed metadata degrades
//! to defaults, never to an error.

use serde_json::{Map, Value};
use unicode_normalization::UnicodeNormalization;

use crate::retrieval::{NormalizedMetadata, RetrievalResult, Strategy};
use crate::store::Document;

/// Placeholder source for documents that were produced rather than ingested.
pub const GENERATED_SOURCE: &str = "generated";

const KNOWN_KEYS: &[&str] = &[
    "recipe_type",
    "cuisine",
    "special_considerations",
    "source",
    "ingredients",
    "title",
    "date_issued",
    "authors",
];

pub fn normalize(document: &Document, strategy: Strategy, rank: usize) -> RetrievalResult {
    let meta = &document.metadata;
    let metadata = NormalizedMetadata {
        recipe_type: meta.get("recipe_type").and_then(normalize_label),
        cuisine: meta.get("cuisine").and_then(normalize_label),
        special_considerations: meta
            .get("special_considerations")
            .map(coerce_string_list)
            .unwrap_or_default(),
        source: meta
            .get("source")
            .and_then(non_empty_string)
            .unwrap_or_else(|| GENERATED_SOURCE.to_string()),
        ingredients: meta.get("ingredients").map(ingredient_list).unwrap_or_default(),
        title: meta.get("title").and_then(non_empty_string),
        date_issued: meta.get("date_issued").and_then(non_empty_string),
        authors: meta.get("authors").map(author_list).unwrap_or_default(),
        extra: extra_fields(meta),
    };

    RetrievalResult {
        content_hash: content_hash(&document.content),
        content: document.content.clone(),
        metadata,
        source_strategy: strategy,
        rank,
    }
}

/// blake3 of the exact content; the fusion dedupe key.
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

fn canonical(s: &str) -> String {
    s.nfkc().collect::<String>().trim().to_lowercase()
}

/// NFKC + trim + lower case for string labels; anything else is absent.
pub fn normalize_label(value: &Value) -> Option<String> {
    let s = canonical(value.as_str()?);
    (!s.is_empty()).then_some(s)
}

/// Lower-cased list from a JSON array of strings, a bracketed string or a
/// comma-separated string.
pub fn coerce_string_list(value: &Value) -> Vec<String> {
    let items = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::String(s) if is_bracketed(s) => split_bracketed(s),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    items
        .iter()
        .map(|s| canonical(s))
        .filter(|s| !s.is_empty())
        .collect()
}

fn ingredient_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) if is_bracketed(s) => split_bracketed(s),
        _ => Vec::new(),
    }
}

fn author_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(non_empty_string)
            .collect(),
        other => non_empty_string(other).into_iter().collect(),
    }
}

fn non_empty_string(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn extra_fields(meta: &Map<String, Value>) -> Map<String, Value> {
    meta.iter()
        .filter(|(k, _)| !KNOWN_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn is_bracketed(s: &str) -> bool {
    let s = s.trim();
    s.starts_with('[') && s.ends_with(']') && s.len() >= 2
}

/// Split a list literal like `['1 cup flour, sifted', "sugar"]`, honouring
/// commas inside quotes.
fn split_bracketed(s: &str) -> Vec<String> {
    let inner = &s.trim()[1..s.trim().len() - 1];
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in inner.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => quote = Some(ch),
            (None, ',') => items.push(std::mem::take(&mut current)),
            (None, c) => current.push(c),
        }
    }
    items.push(current);
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
