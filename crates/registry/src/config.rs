//! Match handler queue configuration.

/// Bounded queue capacities for a match handler.
///
/// Enqueue never blocks: a full queue refuses the event and the caller
/// decides what refusal means (join attempts report the match as not
/// accepting joins, data and leave events are dropped silently).
#[derive(Debug, Clone)]
pub struct MatchConfig {
  /// Join, leave, and terminate events.
  pub call_queue_size: usize,
  /// Join-attempt requests awaiting a decision.
  pub join_attempt_queue_size: usize,
  /// Relayed data payloads.
  pub data_queue_size: usize,
}

impl Default for MatchConfig {
  fn default() -> Self {
    Self {
      call_queue_size: 128,
      join_attempt_queue_size: 128,
      data_queue_size: 128,
    }
  }
}
