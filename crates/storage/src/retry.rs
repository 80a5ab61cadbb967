//! Bounded retry of transient backend faults.
//!
//! The backend signals contention with busy/locked failures that resolve on
//! their own; the shim re-runs the whole transactional closure on those and
//! returns immediately on success or on any other error. Rejection errors
//! in particular never retry: the outcome would not change.

use std::thread;
use std::time::Duration;

use rusqlite::ErrorCode as SqliteCode;
use tracing::debug;

use crate::error::{Result, StorageError};

/// Retry schedule for transient backend faults.
#[derive(Debug, Clone)]
pub struct RetryConfig {
  pub max_retries: u32,
  pub initial_backoff: Duration,
  pub max_backoff: Duration,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 5,
      initial_backoff: Duration::from_millis(20),
      max_backoff: Duration::from_secs(1),
    }
  }
}

impl RetryConfig {
  fn backoff_for_attempt(&self, attempt: u32) -> Duration {
    let backoff = self
      .initial_backoff
      .saturating_mul(2u32.saturating_pow(attempt));
    backoff.min(self.max_backoff)
  }
}

/// Whether an error is a transient backend fault worth re-running for.
pub fn is_retryable(err: &StorageError) -> bool {
  match err {
    StorageError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
      matches!(e.code, SqliteCode::DatabaseBusy | SqliteCode::DatabaseLocked)
    }
    _ => false,
  }
}

/// Run a transactional closure, retrying transient faults with the default
/// schedule.
pub fn execute_retryable<T>(f: impl FnMut() -> Result<T>) -> Result<T> {
  execute_retryable_with(&RetryConfig::default(), f)
}

/// Run a transactional closure under an explicit retry schedule.
///
/// The closure must be safe to re-run from scratch: each attempt opens and
/// either commits or rolls back its own transaction.
pub fn execute_retryable_with<T>(config: &RetryConfig, mut f: impl FnMut() -> Result<T>) -> Result<T> {
  let mut attempt = 0;
  loop {
    match f() {
      Ok(value) => return Ok(value),
      Err(err) if is_retryable(&err) && attempt < config.max_retries => {
        let backoff = config.backoff_for_attempt(attempt);
        attempt += 1;
        debug!(attempt, backoff_ms = backoff.as_millis() as u64, "Retrying transient storage fault");
        thread::sleep(backoff);
      }
      Err(err) => return Err(err),
    }
  }
}
