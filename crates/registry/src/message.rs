//! Messages delivered to a match handler's queues.

use std::collections::HashMap;

use rally_core::{JoinDecision, MatchPresence};
use tokio::sync::mpsc;

/// A user's request to join, carrying its reply channel.
///
/// The reply channel has capacity 1; the handler answers with `try_send`
/// and an abandoned waiter never blocks the actor.
#[derive(Debug)]
pub struct JoinAttemptMsg {
  pub presence: MatchPresence,
  pub metadata: HashMap<String, String>,
  pub reply: mpsc::Sender<JoinDecision>,
}

/// One or more users that have completed a join.
#[derive(Debug)]
pub struct JoinMsg {
  pub presences: Vec<MatchPresence>,
  /// Whether the joiners still await a synchronous acknowledgment from the
  /// join-attempt flow.
  pub sync_ack: bool,
}
