//! Permission predicate builder.
//!
//! Translates caller identity plus a requested object coordinate into a SQL
//! WHERE fragment and bound parameters. The zero UUID caller is the
//! authoritative runtime and bypasses ACLs entirely; a concrete caller gets
//! the read matrix:
//!
//! - global object (zero owner): requires `read = 2`
//! - own object: requires `read` of 1 or 2
//! - someone else's object: requires `read = 2`

use rusqlite::types::Value;
use uuid::Uuid;

use crate::types::ReadId;

/// Build the per-object predicate for a batched read.
///
/// Returns a parenthesized fragment with `?` placeholders and the values to
/// bind, in order. Fragments for a batch are joined with `OR`.
pub fn read_predicate(caller: Uuid, id: &ReadId) -> (String, Vec<Value>) {
  let owner = Value::Blob(id.user_id.as_bytes().to_vec());

  if caller.is_nil() {
    // Authoritative read, no ACL predicate.
    (
      "(collection = ? AND key = ? AND user_id = ?)".to_owned(),
      vec![Value::Text(id.collection.clone()), Value::Text(id.key.clone()), owner],
    )
  } else if id.user_id.is_nil() {
    // Client reading a global object: public only.
    (
      "(collection = ? AND key = ? AND user_id = ? AND read = 2)".to_owned(),
      vec![Value::Text(id.collection.clone()), Value::Text(id.key.clone()), owner],
    )
  } else {
    // Client reading a user-owned object: public, or owner-only when the
    // caller is the owner. The owner comparison is part of the predicate so
    // a single disjunctive query covers mixed batches.
    (
      "(collection = ? AND key = ? AND user_id = ? AND (read = 2 OR (read = 1 AND user_id = ?)))".to_owned(),
      vec![
        Value::Text(id.collection.clone()),
        Value::Text(id.key.clone()),
        owner,
        Value::Blob(caller.as_bytes().to_vec()),
      ],
    )
  }
}

/// Extra conjunct for deletes: clients may only delete writable objects,
/// the authoritative runtime bypasses the check.
pub fn delete_write_clause(authoritative: bool) -> &'static str {
  if authoritative {
    ""
  } else {
    " AND write > 0"
  }
}

/// Whether a caller may overwrite an existing row with the given stored
/// write permission.
pub fn write_allowed(stored_write: i64, authoritative: bool) -> bool {
  authoritative || stored_write != 0
}

#[cfg(test)]
mod tests {
  use super::*;

  fn id(owner: Uuid) -> ReadId {
    ReadId {
      collection: "c".to_owned(),
      key: "k".to_owned(),
      user_id: owner,
    }
  }

  #[test]
  fn test_authoritative_reads_have_no_acl() {
    let (frag, params) = read_predicate(Uuid::nil(), &id(Uuid::new_v4()));
    assert!(!frag.contains("read"));
    assert_eq!(params.len(), 3);
  }

  #[test]
  fn test_client_global_read_requires_public() {
    let (frag, params) = read_predicate(Uuid::new_v4(), &id(Uuid::nil()));
    assert!(frag.contains("read = 2"));
    assert!(!frag.contains("read = 1"));
    assert_eq!(params.len(), 3);
  }

  #[test]
  fn test_client_owned_read_allows_owner_only() {
    let caller = Uuid::new_v4();
    let (frag, params) = read_predicate(caller, &id(caller));
    assert!(frag.contains("read = 2 OR (read = 1"));
    assert_eq!(params.len(), 4);
    assert_eq!(params[3], Value::Blob(caller.as_bytes().to_vec()));
  }

  #[test]
  fn test_delete_write_clause() {
    assert_eq!(delete_write_clause(true), "");
    assert_eq!(delete_write_clause(false), " AND write > 0");
  }

  #[test]
  fn test_write_allowed_matrix() {
    assert!(write_allowed(0, true));
    assert!(!write_allowed(0, false));
    assert!(write_allowed(1, false));
  }
}
