//! Text analysis shared by the durable backends' search surfaces.
//!
//! Scoring is weighted term frequency: every occurrence of a query term in a
//! field adds that field's weight. Both backends rank with [`rank`], so the
//! order is identical regardless of where the documents live.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Error;

const SNIPPET_CHARS: usize = 200;

/// Per-field weights of a text index, keyed by dotted path into `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct FieldWeights(BTreeMap<String, f64>);

impl FieldWeights {
    /// Build a weight table; weights must be positive and finite.
    pub fn new<I, S>(fields: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (field, weight) in fields {
            let field = field.into();
            if field.is_empty() {
                return Err(Error::InvalidInput("index field name cannot be empty".into()));
            }
            if !weight.is_finite() || weight <= 0.0 {
                return Err(Error::InvalidInput(format!("weight for {field} must be positive")));
            }
            map.insert(field, weight);
        }
        if map.is_empty() {
            return Err(Error::InvalidInput("a text index needs at least one field".into()));
        }
        Ok(Self(map))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn get(&self, field: &str) -> Option<f64> {
        self.0.get(field).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A text query against one namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct TextQuery {
    pub query: String,
    /// Restrict results to these document keys.
    pub filter: Option<Vec<String>>,
    pub limit: usize,
}

impl TextQuery {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self { query: query.into(), filter: None, limit }
    }

    pub fn with_filter(mut self, ids: Vec<String>) -> Self {
        self.filter = Some(ids);
        self
    }

    /// Lowercased, deduplicated query terms in first-seen order.
    pub fn terms(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for term in tokenize(&self.query) {
            if !seen.contains(&term) {
                seen.push(term);
            }
        }
        seen
    }

    pub fn admits(&self, id: &str) -> bool {
        self.filter.as_ref().is_none_or(|ids| ids.iter().any(|i| i == id))
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub matched_text: String,
}

/// Split text into lowercase alphanumeric terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub fn term_frequencies(text: &str) -> HashMap<String, u32> {
    let mut tf = HashMap::new();
    for term in tokenize(text) {
        *tf.entry(term).or_insert(0) += 1;
    }
    tf
}

/// Text of a field inside a stored document's `data` payload.
///
/// Strings are taken as-is and arrays contribute their string elements.
pub fn field_text(document: &Value, path: &str) -> Option<String> {
    let mut node = document.get("data")?;
    for segment in path.split('.') {
        node = node.get(segment)?;
    }
    match node {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(Value::as_str).collect();
            if parts.is_empty() { None } else { Some(parts.join(" ")) }
        }
        _ => None,
    }
}

/// Weighted term-frequency score of a document, with its snippet.
pub fn score_document(document: &Value, weights: &FieldWeights, terms: &[String]) -> Option<SearchHitParts> {
    let mut score = 0.0;
    let mut best: Option<(f64, String)> = None;

    for (field, weight) in weights.iter() {
        let Some(text) = field_text(document, field) else { continue };
        let tf = term_frequencies(&text);
        let hits: u32 = terms.iter().filter_map(|t| tf.get(t)).sum();
        if hits == 0 {
            continue;
        }
        score += f64::from(hits) * weight;
        if best.as_ref().is_none_or(|(w, _)| weight > *w) {
            best = Some((weight, text));
        }
    }

    best.map(|(_, text)| SearchHitParts { score, matched_text: snippet(&text) })
}

/// Score and snippet before the document id is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHitParts {
    pub score: f64,
    pub matched_text: String,
}

/// Snippet of the highest-weighted field that contains any query term.
pub fn matched_text(document: &Value, weights: &FieldWeights, terms: &[String]) -> String {
    score_document(document, weights, terms)
        .map(|parts| parts.matched_text)
        .unwrap_or_default()
}

pub fn snippet(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(SNIPPET_CHARS).collect();
    format!("{}…", cut.trim_end())
}

/// Order by descending score, then ascending id, and truncate.
pub fn rank(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(limit);
    hits
}
