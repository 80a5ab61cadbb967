//! RPC status code surface.
//!
//! Every subsystem error maps onto one of these codes before it crosses the
//! gateway boundary. The mapping lives on each error type's `code()` method;
//! this enum is just the shared vocabulary.

/// Status code attached to an operation outcome.
///
/// Follows the standard RPC taxonomy: expected, user-visible rejections are
/// `InvalidArgument`; everything unexpected is `Internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
  /// Operation completed successfully.
  Ok,
  /// The request was well-formed but rejected: version conflict, permission
  /// denial, malformed cursor, oversized label.
  InvalidArgument,
  /// Transactional failure, retry exhaustion, or an unexpected backend error.
  Internal,
}

impl ErrorCode {
  /// Whether this code represents a caller-correctable rejection.
  pub fn is_rejection(self) -> bool {
    matches!(self, ErrorCode::InvalidArgument)
  }
}
