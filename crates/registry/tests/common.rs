//! Shared test doubles for registry integration tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use rally_core::{
  CoreError, Flow, JoinDecision, MatchCore, MatchDataMessage, MatchPresence, MessageRouter, PresenceStream, StreamMode,
  Tracker,
};
use rally_registry::{MatchConfig, MatchRegistry};

/// Op code that asks [`StubCore`] to self-stop, simulating scripted stop.
pub const OP_STOP: i64 = 99;

/// A scriptable match core: fixed label, configurable join policy, stops on
/// terminate and on the [`OP_STOP`] data op code.
pub struct StubCore {
  pub label: String,
  pub allow_joins: bool,
}

impl StubCore {
  pub fn with_label(label: impl Into<String>) -> Box<Self> {
    Box::new(Self {
      label: label.into(),
      allow_joins: true,
    })
  }
}

impl MatchCore for StubCore {
  fn join_attempt(&mut self, _presence: &MatchPresence, _metadata: &HashMap<String, String>) -> JoinDecision {
    if self.allow_joins {
      JoinDecision::allow(self.label.clone())
    } else {
      JoinDecision::reject("Match is full")
    }
  }

  fn join(&mut self, _presences: &[MatchPresence]) -> Flow {
    Flow::Continue
  }

  fn leave(&mut self, _presences: &[MatchPresence]) -> Flow {
    Flow::Continue
  }

  fn data(&mut self, message: &MatchDataMessage) -> Flow {
    if message.op_code == OP_STOP {
      Flow::Stop
    } else {
      Flow::Continue
    }
  }

  fn terminate(&mut self, _grace_seconds: u64) -> Flow {
    Flow::Stop
  }

  fn label(&self) -> String {
    self.label.clone()
  }
}

/// Tracker double that records untracks and serves canned relayed counts.
#[derive(Default)]
pub struct RecordingTracker {
  pub untracked_streams: Mutex<Vec<PresenceStream>>,
  pub untracked_sessions: Mutex<Vec<(Uuid, Uuid)>>,
  pub relayed: Mutex<HashMap<PresenceStream, i32>>,
}

impl RecordingTracker {
  pub fn with_relayed(streams: impl IntoIterator<Item = (PresenceStream, i32)>) -> Arc<Self> {
    let tracker = Self::default();
    *tracker.relayed.lock().unwrap() = streams.into_iter().collect();
    Arc::new(tracker)
  }
}

impl Tracker for RecordingTracker {
  fn untrack_by_stream(&self, stream: &PresenceStream) {
    self.untracked_streams.lock().unwrap().push(stream.clone());
  }

  fn untrack(&self, session_id: Uuid, _stream: &PresenceStream, user_id: Uuid) {
    self.untracked_sessions.lock().unwrap().push((session_id, user_id));
  }

  fn count_by_stream_mode(&self, mode: StreamMode) -> HashMap<PresenceStream, i32> {
    self
      .relayed
      .lock()
      .unwrap()
      .iter()
      .filter(|(stream, _)| stream.mode == mode)
      .map(|(stream, size)| (stream.clone(), *size))
      .collect()
  }
}

/// Router double that records every broadcast payload.
#[derive(Default)]
pub struct RecordingRouter {
  pub sent: Mutex<Vec<(PresenceStream, Vec<u8>)>>,
}

impl MessageRouter for RecordingRouter {
  fn send_to_stream(&self, stream: &PresenceStream, payload: &[u8]) {
    self.sent.lock().unwrap().push((stream.clone(), payload.to_vec()));
  }
}

pub fn relayed_stream(label: &str) -> PresenceStream {
  PresenceStream {
    mode: StreamMode::MatchRelayed,
    subject: Uuid::new_v4(),
    label: label.to_owned(),
  }
}

pub fn presence(node: &str) -> MatchPresence {
  MatchPresence {
    node: node.to_owned(),
    user_id: Uuid::new_v4(),
    session_id: Uuid::new_v4(),
    username: "tester".to_owned(),
  }
}

pub fn data_message(op_code: i64) -> MatchDataMessage {
  MatchDataMessage {
    user_id: Uuid::new_v4(),
    session_id: Uuid::new_v4(),
    username: "tester".to_owned(),
    node: "node1".to_owned(),
    op_code,
    data: Vec::new(),
    receive_time: 0,
  }
}

pub fn registry_with(
  tracker: Arc<RecordingTracker>,
  router: Arc<RecordingRouter>,
) -> Arc<MatchRegistry> {
  MatchRegistry::new("node1", MatchConfig::default(), tracker, router)
}

pub fn registry() -> Arc<MatchRegistry> {
  registry_with(Arc::new(RecordingTracker::default()), Arc::new(RecordingRouter::default()))
}

/// Poll until the condition holds; panics after two seconds.
pub async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
  for _ in 0..200 {
    if condition() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("timed out waiting for {what}");
}

/// Factory double: knows the `"duel"` module, errors on anything else.
pub fn core_factory(id: Uuid, _node: &str, module: &str) -> Result<Box<dyn MatchCore>, CoreError> {
  match module {
    "duel" => Ok(StubCore::with_label(format!("duel-{id}"))),
    other => Err(CoreError::UnknownModule(other.to_owned())),
  }
}
