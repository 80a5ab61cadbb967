//! Storage object and batch operation types.

use uuid::Uuid;

/// A stored object and its metadata.
///
/// The zero UUID owner denotes a global (non-user-owned) object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageObject {
  pub collection: String,
  pub key: String,
  pub user_id: Uuid,
  pub value: Vec<u8>,
  /// Lowercase MD5 hex of `value`; regenerated on every successful write.
  pub version: String,
  /// 0 = private, 1 = owner-only, 2 = public.
  pub permission_read: i32,
  /// 0 = authoritative-only, 1 = owner-writable.
  pub permission_write: i32,
  /// Unix seconds.
  pub create_time: i64,
  /// Unix seconds; always >= `create_time`.
  pub update_time: i64,
}

/// Coordinate of an object to read.
#[derive(Debug, Clone)]
pub struct ReadId {
  pub collection: String,
  pub key: String,
  /// Zero UUID reads the global object under this coordinate.
  pub user_id: Uuid,
}

/// A single write in a batch.
#[derive(Debug, Clone)]
pub struct StorageWrite {
  pub collection: String,
  pub key: String,
  /// Owner the object is written under; zero UUID for global objects.
  pub user_id: Uuid,
  pub value: Vec<u8>,
  /// Version precondition: `""` for unconditional, `"*"` for must-not-exist,
  /// otherwise the exact version the stored object must have.
  pub version: String,
  /// Defaults to 1 (owner-only) when unset.
  pub permission_read: Option<i32>,
  /// Defaults to 1 (owner-writable) when unset.
  pub permission_write: Option<i32>,
}

/// A single delete in a batch.
#[derive(Debug, Clone)]
pub struct StorageDelete {
  pub collection: String,
  pub key: String,
  pub user_id: Uuid,
  /// Optional version precondition; empty means unconditional.
  pub version: String,
}

/// Acknowledgment for one successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAck {
  pub collection: String,
  pub key: String,
  pub version: String,
  /// Omitted when the owner is the zero UUID.
  pub user_id: Option<Uuid>,
}

/// One page of a listing plus its continuation token.
#[derive(Debug, Clone)]
pub struct StorageObjectList {
  pub objects: Vec<StorageObject>,
  /// Opaque continuation cursor; empty when the page was short.
  pub cursor: String,
}

/// Batch ordering key: `(collection, key, owner)` lexicographic.
///
/// Sorting both write and delete batches by this key before execution keeps
/// contending transactions locking rows in one global order.
pub(crate) fn op_order_key(collection: &str, key: &str, user_id: &Uuid) -> (String, String, Uuid) {
  (collection.to_owned(), key.to_owned(), *user_id)
}
