//! In-memory keyword-indexed label store.
//!
//! Every live authoritative match publishes a label under the document id
//! `"{match_uuid}.{node}"`. Labels are opaque strings to the server; when a
//! label happens to parse as a JSON object its fields become queryable.
//! Analysis is keyword-only: values match exactly or not at all, there is
//! no tokenization inside a value.
//!
//! The query-string surface accepts whitespace-separated clauses with an
//! optional `+` (must) or `-` (must-not) prefix. A `field:value` clause
//! resolves the field against the parsed label object first, then against
//! the entry itself (`node`, `label_string`, `label.<key>`); a bare term
//! matches the verbatim label string. Unprefixed clauses are disjunctive.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde_json::Value;

use crate::error::{RegistryError, Result};

/// Longest allowed label, in bytes.
pub const MAX_LABEL_SIZE: usize = 2048;

/// One indexed match label.
#[derive(Debug, Clone)]
pub struct IndexEntry {
  pub node: String,
  /// Populated only when the label parses as a JSON object.
  pub label_json: Option<serde_json::Map<String, Value>>,
  /// The label exactly as published.
  pub label_string: String,
}

/// Process-lifetime label index, internally synchronized.
///
/// Results come back in document-id order so listings are deterministic.
#[derive(Debug, Default)]
pub struct LabelIndex {
  docs: RwLock<BTreeMap<String, IndexEntry>>,
}

impl LabelIndex {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert or replace the entry under a document id.
  pub fn insert(&self, doc_id: String, entry: IndexEntry) {
    let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
    docs.insert(doc_id, entry);
  }

  /// Evict an entry. Missing entries are an error so callers can log the
  /// inconsistency; eviction failure is never fatal to match teardown.
  pub fn remove(&self, doc_id: &str) -> Result<()> {
    let mut docs = self.docs.write().unwrap_or_else(PoisonError::into_inner);
    match docs.remove(doc_id) {
      Some(_) => Ok(()),
      None => Err(RegistryError::IndexMissing(doc_id.to_owned())),
    }
  }

  /// Exact document fetch.
  pub fn get(&self, doc_id: &str) -> Option<IndexEntry> {
    let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
    docs.get(doc_id).cloned()
  }

  /// Number of indexed labels.
  pub fn len(&self) -> usize {
    let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
    docs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Every entry, capped at `limit`.
  pub fn match_all(&self, limit: usize) -> Vec<(String, IndexEntry)> {
    let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
    docs.iter().take(limit).map(|(id, e)| (id.clone(), e.clone())).collect()
  }

  /// Entries whose verbatim label equals `label`, capped at `limit`.
  pub fn match_label(&self, label: &str, limit: usize) -> Vec<(String, IndexEntry)> {
    let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
    docs
      .iter()
      .filter(|(_, e)| e.label_string == label)
      .take(limit)
      .map(|(id, e)| (id.clone(), e.clone()))
      .collect()
  }

  /// Query-string search. An empty query behaves as match-all.
  pub fn query(&self, query: &str, limit: usize) -> Vec<(String, IndexEntry)> {
    let clauses = parse_query(query);
    if clauses.is_empty() {
      return self.match_all(limit);
    }
    let docs = self.docs.read().unwrap_or_else(PoisonError::into_inner);
    docs
      .iter()
      .filter(|(_, e)| matches_clauses(e, &clauses))
      .take(limit)
      .map(|(id, e)| (id.clone(), e.clone()))
      .collect()
  }
}

#[derive(Debug, PartialEq)]
enum Occur {
  Must,
  MustNot,
  Should,
}

#[derive(Debug)]
struct Clause {
  occur: Occur,
  field: Option<String>,
  term: String,
}

fn parse_query(query: &str) -> Vec<Clause> {
  query
    .split_whitespace()
    .filter_map(|raw| {
      let (occur, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (Occur::Must, rest)
      } else if let Some(rest) = raw.strip_prefix('-') {
        (Occur::MustNot, rest)
      } else {
        (Occur::Should, raw)
      };
      if rest.is_empty() {
        return None;
      }
      let (field, term) = match rest.split_once(':') {
        Some((field, term)) => (Some(field.to_owned()), term.to_owned()),
        None => (None, rest.to_owned()),
      };
      Some(Clause { occur, field, term })
    })
    .collect()
}

fn matches_clauses(entry: &IndexEntry, clauses: &[Clause]) -> bool {
  let mut any_should = false;
  let mut has_should = false;
  for clause in clauses {
    let hit = clause_matches(entry, clause);
    match clause.occur {
      Occur::Must if !hit => return false,
      Occur::MustNot if hit => return false,
      Occur::Should => {
        has_should = true;
        any_should |= hit;
      }
      _ => {}
    }
  }
  !has_should || any_should
}

fn clause_matches(entry: &IndexEntry, clause: &Clause) -> bool {
  match &clause.field {
    None => entry.label_string == clause.term,
    Some(field) => resolve_field(entry, field).is_some_and(|value| value == clause.term),
  }
}

/// Resolve a clause field to its keyword value: label object keys first
/// (bare or `label.`-prefixed), then the entry's own fields.
fn resolve_field(entry: &IndexEntry, field: &str) -> Option<String> {
  if let Some(label) = &entry.label_json {
    let key = field.strip_prefix("label.").unwrap_or(field);
    if let Some(value) = label.get(key) {
      return Some(json_keyword(value));
    }
  }
  match field {
    "node" => Some(entry.node.clone()),
    "label_string" => Some(entry.label_string.clone()),
    _ => None,
  }
}

fn json_keyword(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
