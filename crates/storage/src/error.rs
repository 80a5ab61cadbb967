//! Storage error taxonomy.

use rally_core::ErrorCode;

/// All failure modes of the storage engine.
///
/// Rejection variants are expected, user-visible outcomes and map to
/// `InvalidArgument`; everything else is `Internal`. Transient backend
/// faults are absorbed by the retry shim and only surface here after the
/// schedule is exhausted.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  /// Conditional write failed: the stored version did not satisfy the
  /// requested precondition.
  #[error("storage write rejected: version check failed")]
  RejectedVersion,
  /// Non-authoritative write to an object whose write permission is 0.
  #[error("storage write rejected: permission denied")]
  RejectedPermission,
  /// A write affected zero rows. Signals corruption or a concurrent
  /// violation, not a user error.
  #[error("storage write failed")]
  WriteFailed,
  /// A delete affected zero rows. Absence, version mismatch, and permission
  /// denial are deliberately indistinguishable so existence is not leaked
  /// to unauthorized callers.
  #[error("storage delete rejected: not found, version check failed, or permission denied")]
  DeleteRejected,
  /// A pagination cursor failed to decode.
  #[error("malformed cursor was used")]
  MalformedCursor,
  /// The operation was cancelled before reaching the backend.
  #[error("storage operation cancelled")]
  Cancelled,
  /// Backend failure.
  #[error("database error: {0}")]
  Sqlite(#[from] rusqlite::Error),
  /// Cursor serialization failure.
  #[error("cursor encode: {0}")]
  CursorEncode(#[from] minicbor::encode::Error<std::convert::Infallible>),
}

impl StorageError {
  /// Map this error onto the RPC status surface.
  pub fn code(&self) -> ErrorCode {
    match self {
      Self::RejectedVersion | Self::RejectedPermission | Self::DeleteRejected | Self::MalformedCursor => {
        ErrorCode::InvalidArgument
      }
      Self::WriteFailed | Self::Cancelled | Self::Sqlite(_) | Self::CursorEncode(_) => ErrorCode::Internal,
    }
  }
}

pub type Result<T> = std::result::Result<T, StorageError>;
