//! Presence and stream identifiers.
//!
//! A stream is a subscription key identifying a message topic. Matches use
//! two stream modes: relayed matches exist only as presence counts on a
//! relayed stream, while authoritative matches have a full handler and use
//! the stream to track joined sessions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mode discriminant for a presence stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StreamMode {
  /// Peer-relayed match: tracked only by presence counts.
  MatchRelayed = 0,
  /// Server-hosted match with a full handler and label.
  MatchAuthoritative = 1,
}

/// A subscription key identifying a message topic.
///
/// For match streams the subject is the match UUID and the label is the node
/// name hosting the match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresenceStream {
  pub mode: StreamMode,
  pub subject: Uuid,
  pub label: String,
}

/// A participant's session attached to a match's stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchPresence {
  pub node: String,
  pub user_id: Uuid,
  pub session_id: Uuid,
  pub username: String,
}
