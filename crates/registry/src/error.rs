//! Registry error taxonomy.

use rally_core::{CoreError, ErrorCode};

/// All failure modes of the match registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
  /// Label updates are capped at 2048 bytes.
  #[error("match label too long, must be 0-2048 bytes")]
  LabelTooLong,
  /// The indexed label field was malformed.
  #[error("match label is not a valid label string")]
  InvalidLabel,
  /// The registry has begun shutdown and rejects new matches.
  #[error("shutdown in progress")]
  ShutdownInProgress,
  /// No label index entry exists under the given document id.
  #[error("no label index entry for match {0}")]
  IndexMissing(String),
  /// The injected match core factory failed.
  #[error(transparent)]
  Core(#[from] CoreError),
}

impl RegistryError {
  /// Map this error onto the RPC status surface.
  pub fn code(&self) -> ErrorCode {
    match self {
      Self::LabelTooLong | Self::InvalidLabel => ErrorCode::InvalidArgument,
      Self::ShutdownInProgress | Self::IndexMissing(_) | Self::Core(_) => ErrorCode::Internal,
    }
  }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_label_errors_are_rejections() {
    assert_eq!(RegistryError::LabelTooLong.code(), ErrorCode::InvalidArgument);
    assert_eq!(RegistryError::InvalidLabel.code(), ErrorCode::InvalidArgument);
    assert_eq!(RegistryError::ShutdownInProgress.code(), ErrorCode::Internal);
  }
}
