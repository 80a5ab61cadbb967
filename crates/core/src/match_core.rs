//! Match core capability contract.
//!
//! A match core is the game logic behind a handler: the registry spawns a
//! handler around a core produced by an injected factory, and the handler
//! feeds it one event per cooperative step. The core's implementation
//! (scripting VM, native plug-in) is external to this workspace; only the
//! behavior it must exhibit is defined here.

use std::collections::HashMap;

use uuid::Uuid;

use crate::presence::MatchPresence;

/// Control flow returned by a core after each event.
///
/// `Stop` requests scripted self-stop: the handler drains no further events
/// and removes itself from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
  Continue,
  Stop,
}

/// Outcome of a join attempt evaluated by the core.
#[derive(Debug, Clone)]
pub struct JoinDecision {
  pub allow: bool,
  pub reason: String,
  pub label: String,
}

impl JoinDecision {
  pub fn allow(label: impl Into<String>) -> Self {
    Self {
      allow: true,
      reason: String::new(),
      label: label.into(),
    }
  }

  pub fn reject(reason: impl Into<String>) -> Self {
    Self {
      allow: false,
      reason: reason.into(),
      label: String::new(),
    }
  }
}

/// A data payload relayed to the match, usually from a participant.
#[derive(Debug, Clone)]
pub struct MatchDataMessage {
  pub user_id: Uuid,
  pub session_id: Uuid,
  pub username: String,
  pub node: String,
  pub op_code: i64,
  pub data: Vec<u8>,
  pub receive_time: i64,
}

/// The event surface a match core must implement.
///
/// All methods run on the handler's owning task; the core never needs its
/// own synchronization. Cores are strictly single-threaded from their own
/// perspective.
pub trait MatchCore: Send + 'static {
  /// Evaluate a user's request to join. The decision's label is reported
  /// back to the joining client.
  fn join_attempt(&mut self, presence: &MatchPresence, metadata: &HashMap<String, String>) -> JoinDecision;

  /// One or more users have successfully joined.
  fn join(&mut self, presences: &[MatchPresence]) -> Flow;

  /// One or more users have left or disconnected.
  fn leave(&mut self, presences: &[MatchPresence]) -> Flow;

  /// A data payload arrived for the match.
  fn data(&mut self, message: &MatchDataMessage) -> Flow;

  /// The registry requested termination with a grace period. Cores should
  /// wind down and return `Stop`; returning `Continue` keeps the match
  /// running until the shutdown path closes it.
  fn terminate(&mut self, grace_seconds: u64) -> Flow;

  /// The current label the match publishes for discovery.
  fn label(&self) -> String;
}

/// Error from a match core factory.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
  #[error("unknown match module: {0}")]
  UnknownModule(String),
  #[error("match core initialization failed: {0}")]
  Init(String),
}

/// Factory producing a handler-ready match core for a named module.
///
/// Arguments are the new match's id, the hosting node, and the module name.
pub type MatchCreateFn = dyn Fn(Uuid, &str, &str) -> Result<Box<dyn MatchCore>, CoreError> + Send + Sync;
