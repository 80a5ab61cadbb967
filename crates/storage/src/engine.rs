//! The transactional read/write/delete/list core.
//!
//! All functions run on the caller's thread and hold no shared state;
//! consistency comes from the backend transaction. Batches are sorted by
//! `(collection, key, owner)` before execution so two contending batches
//! always lock rows in the same global order, and every transactional
//! closure runs under the retry shim so transient backend faults are never
//! surfaced after an eventual success.

use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::acl;
use crate::cursor::StorageCursor;
use crate::error::{Result, StorageError};
use crate::retry;
use crate::types::{op_order_key, ReadId, StorageAck, StorageDelete, StorageObject, StorageObjectList, StorageWrite};

const OBJECT_COLUMNS: &str = "collection, key, user_id, value, version, read, write, create_time, update_time";

/// Lowercase MD5 hex digest of an object value; the version format.
pub fn md5_hex(value: &[u8]) -> String {
  let digest = Md5::digest(value);
  let mut out = String::with_capacity(32);
  for byte in digest {
    let _ = write!(out, "{byte:02x}");
  }
  out
}

fn now_secs() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs() as i64)
    .unwrap_or(0)
}

fn row_to_object(row: &Row<'_>) -> rusqlite::Result<StorageObject> {
  let owner: Vec<u8> = row.get(2)?;
  let user_id = Uuid::from_slice(&owner)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Blob, Box::new(e)))?;
  Ok(StorageObject {
    collection: row.get(0)?,
    key: row.get(1)?,
    user_id,
    value: row.get(3)?,
    version: row.get(4)?,
    permission_read: row.get(5)?,
    permission_write: row.get(6)?,
    create_time: row.get(7)?,
    update_time: row.get(8)?,
  })
}

fn ack_for(op: &StorageWrite, version: String) -> StorageAck {
  StorageAck {
    collection: op.collection.clone(),
    key: op.key.clone(),
    version,
    user_id: if op.user_id.is_nil() { None } else { Some(op.user_id) },
  }
}

/// Read a batch of objects, each gated by the caller's ACL predicate.
///
/// Missing or unreadable rows are simply absent from the result. Row order
/// is unspecified.
pub fn read_objects(
  conn: &Connection,
  cancel: &CancellationToken,
  caller: Uuid,
  ids: &[ReadId],
) -> Result<Vec<StorageObject>> {
  if ids.is_empty() {
    return Ok(Vec::new());
  }
  if cancel.is_cancelled() {
    return Err(StorageError::Cancelled);
  }

  let mut clauses = Vec::with_capacity(ids.len());
  let mut values: Vec<Value> = Vec::new();
  for id in ids {
    let (fragment, params) = acl::read_predicate(caller, id);
    clauses.push(fragment);
    values.extend(params);
  }
  let query = format!("SELECT {OBJECT_COLUMNS} FROM storage WHERE {}", clauses.join(" OR "));

  retry::execute_retryable(|| {
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params_from_iter(values.iter().cloned()), row_to_object)?;
    let mut objects = Vec::new();
    for row in rows {
      objects.push(row?);
    }
    Ok(objects)
  })
}

/// Unfiltered scan of one user's objects, for export and erasure flows.
pub fn read_all_user_objects(conn: &Connection, cancel: &CancellationToken, user_id: Uuid) -> Result<Vec<StorageObject>> {
  if cancel.is_cancelled() {
    return Err(StorageError::Cancelled);
  }
  retry::execute_retryable(|| {
    let mut stmt = conn.prepare(&format!("SELECT {OBJECT_COLUMNS} FROM storage WHERE user_id = ?1"))?;
    let rows = stmt.query_map(params![&user_id.as_bytes()[..]], row_to_object)?;
    let mut objects = Vec::new();
    for row in rows {
      objects.push(row?);
    }
    Ok(objects)
  })
}

/// Apply a batch of writes in one transaction.
///
/// Operations execute in `(collection, key, owner)` order regardless of the
/// order given. A version or permission rejection aborts the whole batch.
pub fn write_objects(conn: &mut Connection, authoritative: bool, ops: &[StorageWrite]) -> Result<Vec<StorageAck>> {
  let mut sorted: Vec<&StorageWrite> = ops.iter().collect();
  sorted.sort_by_key(|op| op_order_key(&op.collection, &op.key, &op.user_id));

  retry::execute_retryable(|| {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let mut acks = Vec::with_capacity(sorted.len());
    for &op in &sorted {
      acks.push(write_object(&tx, authoritative, op)?);
    }
    tx.commit()?;
    Ok(acks)
  })
}

fn write_object(tx: &Transaction<'_>, authoritative: bool, op: &StorageWrite) -> Result<StorageAck> {
  let stored: Option<(String, i64, i64)> = tx
    .query_row(
      "SELECT version, read, write FROM storage WHERE collection = ?1 AND key = ?2 AND user_id = ?3",
      params![op.collection, op.key, &op.user_id.as_bytes()[..]],
      |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()?;

  match &stored {
    None => {
      if !op.version.is_empty() && op.version != "*" {
        // Conditional write expecting a specific version, but no object exists.
        return Err(StorageError::RejectedVersion);
      }
    }
    Some((stored_version, _, _)) => {
      if op.version == "*" || (!op.version.is_empty() && op.version != *stored_version) {
        // The object exists but the write expected absence, or a version
        // that does not match.
        return Err(StorageError::RejectedVersion);
      }
    }
  }

  if let Some((_, _, stored_write)) = &stored {
    if !acl::write_allowed(*stored_write, authoritative) {
      return Err(StorageError::RejectedPermission);
    }
  }

  let new_version = md5_hex(&op.value);
  let new_read = op.permission_read.unwrap_or(1);
  let new_write = op.permission_write.unwrap_or(1);

  if let Some((stored_version, stored_read, stored_write)) = &stored {
    if *stored_version == new_version && *stored_read == i64::from(new_read) && *stored_write == i64::from(new_write) {
      // Byte-identical overwrite with identical permissions: acknowledge
      // without touching the row, leaving update_time unchanged.
      return Ok(ack_for(op, new_version));
    }
  }

  let now = now_secs();
  let affected = if stored.is_some() {
    tx.execute(
      "UPDATE storage SET value = ?4, version = ?5, read = ?6, write = ?7, update_time = ?8
       WHERE collection = ?1 AND key = ?2 AND user_id = ?3",
      params![op.collection, op.key, &op.user_id.as_bytes()[..], op.value, new_version, new_read, new_write, now],
    )?
  } else {
    tx.execute(
      "INSERT INTO storage (collection, key, user_id, value, version, read, write, create_time, update_time)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
      params![op.collection, op.key, &op.user_id.as_bytes()[..], op.value, new_version, new_read, new_write, now],
    )?
  };

  if affected != 1 {
    warn!(
      collection = %op.collection,
      key = %op.key,
      owner = %op.user_id,
      affected,
      "Storage write affected an unexpected row count"
    );
    return Err(StorageError::WriteFailed);
  }

  Ok(ack_for(op, new_version))
}

/// Apply a batch of deletes in one transaction.
///
/// Each delete carries the caller's write-permission clause (clients only)
/// and the version clause when one was given. Any delete that affects zero
/// rows fails the batch with a single indistinguishable rejection.
pub fn delete_objects(conn: &mut Connection, authoritative: bool, ops: &[StorageDelete]) -> Result<()> {
  let mut sorted: Vec<&StorageDelete> = ops.iter().collect();
  sorted.sort_by_key(|op| op_order_key(&op.collection, &op.key, &op.user_id));

  retry::execute_retryable(|| {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for &op in &sorted {
      let mut query = format!(
        "DELETE FROM storage WHERE collection = ? AND key = ? AND user_id = ?{}",
        acl::delete_write_clause(authoritative)
      );
      let mut values: Vec<Value> = vec![
        Value::Text(op.collection.clone()),
        Value::Text(op.key.clone()),
        Value::Blob(op.user_id.as_bytes().to_vec()),
      ];
      if !op.version.is_empty() {
        query.push_str(" AND version = ?");
        values.push(Value::Text(op.version.clone()));
      }

      let affected = tx.execute(&query, params_from_iter(values))?;
      if affected == 0 {
        debug!(collection = %op.collection, key = %op.key, owner = %op.user_id, "Storage delete matched no rows");
        return Err(StorageError::DeleteRejected);
      }
    }
    tx.commit()?;
    Ok(())
  })
}

/// List one page of a collection.
///
/// The query shape depends on who is asking about whom: the authoritative
/// runtime sees everything, clients see public objects plus their own
/// readable ones. Continuation compares `(collection, read, key, user_id)`
/// strictly greater than the cursor's captured values; result order is the
/// same composite so pages partition the key space exactly.
pub fn list_objects(
  conn: &Connection,
  cancel: &CancellationToken,
  caller: Uuid,
  owner: Option<Uuid>,
  collection: &str,
  limit: usize,
  cursor: &str,
) -> Result<StorageObjectList> {
  let continuation = if cursor.is_empty() {
    None
  } else {
    Some(StorageCursor::decode(cursor)?)
  };

  if limit == 0 {
    return Ok(StorageObjectList {
      objects: Vec::new(),
      cursor: String::new(),
    });
  }
  if cancel.is_cancelled() {
    return Err(StorageError::Cancelled);
  }

  let authoritative = caller.is_nil();
  let mut query = format!("SELECT {OBJECT_COLUMNS} FROM storage WHERE collection = ?");
  let mut values: Vec<Value> = vec![Value::Text(collection.to_owned())];

  // Fixed read filter for the shape, if any. Shapes that pin `read = 2`
  // also pin the cursor's read column; the others continue from the
  // captured value.
  let pinned_read = if authoritative {
    match owner {
      None => None,
      Some(user) => {
        query.push_str(" AND user_id = ?");
        values.push(Value::Blob(user.as_bytes().to_vec()));
        None
      }
    }
  } else {
    match owner {
      None => {
        query.push_str(" AND read = 2");
        Some(2)
      }
      Some(user) if user == caller => {
        query.push_str(" AND read > 0 AND user_id = ?");
        values.push(Value::Blob(user.as_bytes().to_vec()));
        None
      }
      Some(user) => {
        query.push_str(" AND read = 2 AND user_id = ?");
        values.push(Value::Blob(user.as_bytes().to_vec()));
        Some(2)
      }
    }
  };

  if let Some(sc) = &continuation {
    query.push_str(" AND (collection, read, key, user_id) > (?, ?, ?, ?)");
    values.push(Value::Text(collection.to_owned()));
    values.push(Value::Integer(i64::from(pinned_read.unwrap_or(sc.read))));
    values.push(Value::Text(sc.key.clone()));
    values.push(Value::Blob(sc.user_id.as_bytes().to_vec()));
  }

  query.push_str(" ORDER BY collection, read, key, user_id LIMIT ?");
  values.push(Value::Integer(limit as i64));

  let objects = retry::execute_retryable(|| {
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map(params_from_iter(values.iter().cloned()), row_to_object)?;
    let mut objects = Vec::new();
    for row in rows {
      objects.push(row?);
    }
    Ok(objects)
  })?;

  let next_cursor = match objects.last() {
    Some(last) if objects.len() == limit => StorageCursor {
      key: last.key.clone(),
      user_id: last.user_id,
      read: last.permission_read,
    }
    .encode()?,
    _ => String::new(),
  };

  Ok(StorageObjectList {
    objects,
    cursor: next_cursor,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_md5_hex_format() {
    let version = md5_hex(b"x");
    assert_eq!(version.len(), 32);
    assert_eq!(version, "9dd4e461268c8034f5c8564e155c67a6");
    assert!(version.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
  }

  #[test]
  fn test_md5_hex_is_stable() {
    assert_eq!(md5_hex(b"payload"), md5_hex(b"payload"));
    assert_ne!(md5_hex(b"payload"), md5_hex(b"payload2"));
  }
}
