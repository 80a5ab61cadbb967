//! Storage table DDL and database initialization.

use rusqlite::Connection;

use crate::error::Result;

/// Storage table and the composite index backing list pagination.
///
/// The secondary index must cover exactly `(collection, read, key, user_id)`:
/// list cursors continue with a row-value comparison over that tuple and
/// rely on the index sort order.
const DDL: &str = "
CREATE TABLE IF NOT EXISTS storage (
  collection  TEXT NOT NULL,
  key         TEXT NOT NULL,
  user_id     BLOB NOT NULL,
  value       BLOB NOT NULL,
  version     TEXT NOT NULL,
  read        INTEGER NOT NULL DEFAULT 1,
  write       INTEGER NOT NULL DEFAULT 1,
  create_time INTEGER NOT NULL,
  update_time INTEGER NOT NULL,
  PRIMARY KEY (collection, key, user_id)
);

CREATE INDEX IF NOT EXISTS storage_list_idx
  ON storage (collection, read, key, user_id);
";

/// Create the storage schema if it does not exist and set the pragmas the
/// engine depends on.
pub fn initialize(conn: &Connection) -> Result<()> {
  conn.pragma_update(None, "journal_mode", "WAL")?;
  conn.pragma_update(None, "foreign_keys", "ON")?;
  conn.execute_batch(DDL)?;
  Ok(())
}
