//! Collaborator traits for presence tracking and message routing.
//!
//! The registry consumes these; their implementations live in the enclosing
//! server. Test doubles implement them directly.

use std::collections::HashMap;

use uuid::Uuid;

use crate::presence::{PresenceStream, StreamMode};

/// Session/presence tracker.
///
/// Implementations are internally synchronized; the registry calls these
/// from multiple tasks.
pub trait Tracker: Send + Sync {
  /// Remove every presence attached to the given stream.
  fn untrack_by_stream(&self, stream: &PresenceStream);

  /// Remove a single user's presence from a stream.
  fn untrack(&self, session_id: Uuid, stream: &PresenceStream, user_id: Uuid);

  /// Count presences per stream, restricted to the given stream mode.
  fn count_by_stream_mode(&self, mode: StreamMode) -> HashMap<PresenceStream, i32>;
}

/// Outbound fan-out for match handlers. Routing itself is out of scope
/// here; handlers hold the router so cores can broadcast.
pub trait MessageRouter: Send + Sync {
  /// Send an opaque payload to every presence on a stream.
  fn send_to_stream(&self, stream: &PresenceStream, payload: &[u8]);
}
