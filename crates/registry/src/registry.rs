//! Lifecycle, routing, and shutdown coordination for live matches.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use rally_core::{MatchCore, MatchCreateFn, MatchDataMessage, MatchPresence, MessageRouter, PresenceStream, StreamMode, Tracker};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MatchConfig;
use crate::error::{RegistryError, Result};
use crate::handler::MatchHandler;
use crate::index::{IndexEntry, LabelIndex, MAX_LABEL_SIZE};
use crate::message::JoinAttemptMsg;

/// How long a join attempt waits for the match's decision.
const JOIN_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// One row of a match listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchListing {
  /// `"{uuid}.{node}"` for authoritative matches,
  /// `"{stream_subject}.{stream_label}"` for relayed ones.
  pub match_id: String,
  pub authoritative: bool,
  pub label: Option<String>,
  pub size: i32,
}

/// Node-local directory of live matches.
///
/// The registry exclusively owns the handler map. Handlers report their own
/// removal through a weak back-reference, so dropping the registry never
/// races a handler keeping it alive.
pub struct MatchRegistry {
  node: String,
  config: MatchConfig,
  tracker: Arc<dyn Tracker>,
  router: Arc<dyn MessageRouter>,
  matches: DashMap<Uuid, MatchHandler>,
  match_count: AtomicI32,
  index: LabelIndex,
  stopped: AtomicBool,
  stopped_tx: mpsc::Sender<()>,
  stopped_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl MatchRegistry {
  pub fn new(
    node: impl Into<String>,
    config: MatchConfig,
    tracker: Arc<dyn Tracker>,
    router: Arc<dyn MessageRouter>,
  ) -> Arc<Self> {
    // Capacity 2 so a completion signal is never lost between a stop
    // request and the receiver being polled; duplicates are dropped at the
    // sender.
    let (stopped_tx, stopped_rx) = mpsc::channel(2);
    Arc::new(Self {
      node: node.into(),
      config,
      tracker,
      router,
      matches: DashMap::new(),
      match_count: AtomicI32::new(0),
      index: LabelIndex::new(),
      stopped: AtomicBool::new(false),
      stopped_tx,
      stopped_rx: Mutex::new(Some(stopped_rx)),
    })
  }

  /// Create and start a new match from a named module.
  ///
  /// Returns the new match's full address, `"{uuid}.{node}"`.
  pub fn create_match(self: &Arc<Self>, create_fn: &MatchCreateFn, module: &str) -> Result<String> {
    let id = Uuid::new_v4();
    let core = create_fn(id, &self.node, module)?;
    let handler = self.new_match(id, core)?;
    Ok(handler.id_str().to_owned())
  }

  /// Register and spawn a handler for a match core that is ready to run.
  pub fn new_match(self: &Arc<Self>, id: Uuid, core: Box<dyn MatchCore>) -> Result<MatchHandler> {
    if self.stopped.load(Ordering::SeqCst) {
      // Server is shutting down, reject new matches.
      return Err(RegistryError::ShutdownInProgress);
    }

    let handler = MatchHandler::spawn(
      Arc::downgrade(self),
      &self.config,
      Arc::clone(&self.router),
      core,
      id,
      &self.node,
    );
    self.matches.insert(id, handler.clone());
    self.match_count.fetch_add(1, Ordering::SeqCst);
    info!(mid = %handler.id_str(), "Match registered");
    Ok(handler)
  }

  /// Look up a local match handler.
  pub fn get_match(&self, id: Uuid) -> Option<MatchHandler> {
    self.matches.get(&id).map(|entry| entry.value().clone())
  }

  /// Remove a tracked match and clean up its presences and label entry.
  ///
  /// Does not stop the match's own task; handlers call this as they exit,
  /// and any other caller must stop the handler separately.
  pub fn remove_match(&self, id: Uuid, stream: &PresenceStream) {
    if self.matches.remove(&id).is_none() {
      return;
    }
    let remaining = self.match_count.fetch_sub(1, Ordering::SeqCst) - 1;

    self.tracker.untrack_by_stream(stream);
    let doc_id = format!("{}.{}", id, self.node);
    if let Err(e) = self.index.remove(&doc_id) {
      warn!(mid = %doc_id, error = %e, "Error removing match label index entry");
    }

    // If a shutdown was initiated and this was the last match, signal that
    // the process is complete.
    if remaining == 0 && self.stopped.load(Ordering::SeqCst) {
      self.signal_stopped();
    }
  }

  /// Replace the indexed label for a match.
  pub fn update_match_label(&self, id: Uuid, label: &str) -> Result<()> {
    if label.len() > MAX_LABEL_SIZE {
      return Err(RegistryError::LabelTooLong);
    }
    // Labels are user-opaque; JSON object parsing is best-effort and a
    // non-JSON label is indexed by its verbatim string only.
    let label_json = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(label).ok();
    self.index.insert(
      format!("{}.{}", id, self.node),
      IndexEntry {
        node: self.node.clone(),
        label_json,
        label_string: label.to_owned(),
      },
    );
    Ok(())
  }

  /// Fetch the label published for a match, empty when none is indexed.
  pub fn get_match_label(&self, id: Uuid, node: &str) -> Result<String> {
    match self.index.get(&format!("{id}.{node}")) {
      Some(entry) => Ok(entry.label_string),
      None => Ok(String::new()),
    }
  }

  /// Number of currently active authoritative matches.
  pub fn count(&self) -> i32 {
    self.match_count.load(Ordering::SeqCst)
  }

  /// List (and optionally filter) currently running matches.
  ///
  /// Authoritative matches come from the label index; relayed matches are
  /// appended from the tracker's presence counts when the filter allows
  /// them. Size filters are applied after the index fetch, so they widen
  /// the fetch to every known match.
  pub fn list_matches(
    &self,
    limit: usize,
    authoritative: Option<bool>,
    label: Option<&str>,
    min_size: Option<i32>,
    max_size: Option<i32>,
    query: Option<&str>,
  ) -> Vec<MatchListing> {
    if limit == 0 {
      return Vec::new();
    }

    // With a size filter we cannot know which index hits survive, so fetch
    // every known match instead of just the page.
    let fetch = if min_size.is_some() || max_size.is_some() {
      self.count().max(0) as usize
    } else {
      limit
    };

    let mut allow_relayed = false;
    let hits = if let Some(query) = query {
      if authoritative == Some(false) {
        // A query filter is requested but authoritative matches are not
        // allowed: a contradiction.
        return Vec::new();
      }
      Some(self.index.query(query, fetch))
    } else if let Some(label) = label {
      if authoritative == Some(false) {
        return Vec::new();
      }
      Some(self.index.match_label(label, fetch))
    } else if authoritative.unwrap_or(true) {
      if authoritative.is_none() {
        // No filter at all: a mix of authoritative and relayed matches.
        allow_relayed = true;
      }
      Some(self.index.match_all(fetch))
    } else {
      // Authoritative strictly false and no label or query filter.
      allow_relayed = true;
      None
    };

    let mut results = Vec::new();

    if let Some(hits) = hits {
      for (doc_id, entry) in hits {
        let id = match doc_id.split('.').next().map(Uuid::parse_str) {
          Some(Ok(id)) => id,
          _ => continue,
        };
        // The handler may have been removed since the index was read.
        let Some(handler) = self.get_match(id) else { continue };

        let size = handler.presence_list().size() as i32;
        if min_size.is_some_and(|min| min > size) || max_size.is_some_and(|max| max < size) {
          continue;
        }

        results.push(MatchListing {
          match_id: doc_id,
          authoritative: true,
          label: Some(entry.label_string),
          size,
        });
        if results.len() == limit {
          return results;
        }
      }
    }

    if !allow_relayed {
      return results;
    }

    for (stream, size) in self.tracker.count_by_stream_mode(StreamMode::MatchRelayed) {
      if stream.mode != StreamMode::MatchRelayed {
        warn!(mode = ?stream.mode, "Ignoring unexpected stream mode in match listing");
        continue;
      }
      if min_size.is_some_and(|min| min > size) || max_size.is_some_and(|max| max < size) {
        continue;
      }
      results.push(MatchListing {
        match_id: format!("{}.{}", stream.subject, stream.label),
        authoritative: false,
        label: label.map(str::to_owned),
        size,
      });
      if results.len() == limit {
        return results;
      }
    }

    results
  }

  /// Pass a user's join attempt to a match.
  ///
  /// Returns `(found, allow, reason, label)`. A full attempt queue refuses
  /// immediately; otherwise the decision is awaited for at most ten
  /// seconds, after which the join is assumed rejected.
  pub async fn join_attempt(
    &self,
    id: Uuid,
    node: &str,
    user_id: Uuid,
    session_id: Uuid,
    username: &str,
    from_node: &str,
    metadata: HashMap<String, String>,
  ) -> (bool, bool, String, String) {
    if node != self.node {
      return (false, false, String::new(), String::new());
    }
    let Some(handler) = self.get_match(id) else {
      return (false, false, String::new(), String::new());
    };

    let (reply_tx, mut reply_rx) = mpsc::channel(1);
    let accepted = handler.queue_join_attempt(JoinAttemptMsg {
      presence: MatchPresence {
        node: from_node.to_owned(),
        user_id,
        session_id,
        username: username.to_owned(),
      },
      metadata,
      reply: reply_tx,
    });
    if !accepted {
      // The attempt queue is full, so the match is closing or overloaded
      // and cannot be joined.
      return (
        true,
        false,
        "Match is not currently accepting join requests".to_owned(),
        String::new(),
      );
    }

    match tokio::time::timeout(JOIN_ATTEMPT_TIMEOUT, reply_rx.recv()).await {
      Ok(Some(decision)) => (true, decision.allow, decision.reason, decision.label),
      // Reply dropped or deadline passed: the join is assumed rejected.
      Ok(None) | Err(_) => (true, false, String::new(), String::new()),
    }
  }

  /// Notify a match that users have joined. Refusal is tolerated: a
  /// closing match need not observe late joins.
  pub fn join(&self, id: Uuid, presences: Vec<MatchPresence>) {
    if let Some(handler) = self.get_match(id) {
      handler.queue_join(presences, true);
    }
  }

  /// Notify a match that users have left or disconnected.
  pub fn leave(&self, id: Uuid, presences: Vec<MatchPresence>) {
    if let Some(handler) = self.get_match(id) {
      handler.queue_leave(presences);
    }
  }

  /// Remove participants from a match's presence stream, local node only.
  pub fn kick(&self, stream: &PresenceStream, presences: &[MatchPresence]) {
    for presence in presences {
      if presence.node != self.node {
        continue;
      }
      self.tracker.untrack(presence.session_id, stream, presence.user_id);
    }
  }

  /// Relay a data payload to a match hosted on this node.
  pub fn send_data(&self, id: Uuid, node: &str, message: MatchDataMessage) {
    if node != self.node {
      return;
    }
    if let Some(handler) = self.get_match(id) {
      handler.queue_data(message);
    }
  }

  /// Begin registry shutdown.
  ///
  /// The completion receiver is handed out on the first call; later calls
  /// still drive termination (a zero grace force-closes whatever remains)
  /// but return `None`. The completion signal fires exactly once: either
  /// here when nothing is running, or from the final `remove_match`.
  pub fn stop(&self, grace_seconds: u64) -> Option<mpsc::Receiver<()>> {
    self.stopped.store(true, Ordering::SeqCst);
    let receiver = self
      .stopped_rx
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();

    if grace_seconds == 0 {
      let ids: Vec<Uuid> = self.matches.iter().map(|entry| *entry.key()).collect();
      for id in ids {
        if let Some((_, handler)) = self.matches.remove(&id) {
          handler.close();
          self.match_count.fetch_sub(1, Ordering::SeqCst);
        }
      }
      self.signal_stopped();
      return receiver;
    }

    let mut any_running = false;
    for entry in self.matches.iter() {
      any_running = true;
      // A full call queue does not matter, the match is supposed to end
      // anyway.
      entry.value().queue_terminate(grace_seconds);
    }
    if !any_running {
      self.signal_stopped();
    }
    receiver
  }

  fn signal_stopped(&self) {
    // Non-blocking; a duplicate signal is dropped on the floor.
    let _ = self.stopped_tx.try_send(());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct NullTracker;

  impl Tracker for NullTracker {
    fn untrack_by_stream(&self, _stream: &PresenceStream) {}
    fn untrack(&self, _session_id: Uuid, _stream: &PresenceStream, _user_id: Uuid) {}
    fn count_by_stream_mode(&self, _mode: StreamMode) -> HashMap<PresenceStream, i32> {
      HashMap::new()
    }
  }

  struct NullRouter;

  impl MessageRouter for NullRouter {
    fn send_to_stream(&self, _stream: &PresenceStream, _payload: &[u8]) {}
  }

  fn registry() -> Arc<MatchRegistry> {
    MatchRegistry::new("node1", MatchConfig::default(), Arc::new(NullTracker), Arc::new(NullRouter))
  }

  #[tokio::test]
  async fn test_join_attempt_wrong_node_is_not_found() {
    let registry = registry();
    let (found, allow, reason, label) = registry
      .join_attempt(Uuid::new_v4(), "elsewhere", Uuid::new_v4(), Uuid::new_v4(), "u", "node1", HashMap::new())
      .await;
    assert!(!found);
    assert!(!allow);
    assert!(reason.is_empty());
    assert!(label.is_empty());
  }

  #[tokio::test]
  async fn test_join_attempt_unknown_match_is_not_found() {
    let registry = registry();
    let (found, ..) = registry
      .join_attempt(Uuid::new_v4(), "node1", Uuid::new_v4(), Uuid::new_v4(), "u", "node1", HashMap::new())
      .await;
    assert!(!found);
  }

  #[tokio::test(start_paused = true)]
  async fn test_join_attempt_times_out_without_reply() {
    let registry = registry();
    let id = Uuid::new_v4();
    // A handler whose queues are open but never drained: the attempt is
    // accepted and then nothing ever replies.
    let (handler, _queues) = MatchHandler::detached(id, "node1");
    registry.matches.insert(id, handler);

    let started = tokio::time::Instant::now();
    let (found, allow, reason, label) = registry
      .join_attempt(id, "node1", Uuid::new_v4(), Uuid::new_v4(), "u", "node1", HashMap::new())
      .await;
    assert!(found);
    assert!(!allow);
    assert!(reason.is_empty());
    assert!(label.is_empty());
    assert!(started.elapsed() >= JOIN_ATTEMPT_TIMEOUT);
  }

  #[tokio::test]
  async fn test_join_attempt_full_queue_is_refused() {
    let registry = registry();
    let id = Uuid::new_v4();
    let (handler, mut queues) = MatchHandler::detached(id, "node1");
    registry.matches.insert(id, handler);

    // Fill the capacity-1 attempt queue.
    let (first, ..) = tokio::join!(
      registry.join_attempt(id, "node1", Uuid::new_v4(), Uuid::new_v4(), "a", "node1", HashMap::new()),
      async {
        // Second attempt finds the queue full and is refused immediately.
        let (found, allow, reason, _) = registry
          .join_attempt(id, "node1", Uuid::new_v4(), Uuid::new_v4(), "b", "node1", HashMap::new())
          .await;
        assert!(found);
        assert!(!allow);
        assert_eq!(reason, "Match is not currently accepting join requests");
        // Unblock the first attempt by answering it.
        let msg = queues.attempt_rx.recv().await.expect("queued attempt");
        let _ = msg.reply.try_send(rally_core::JoinDecision::allow("lbl"));
      }
    );
    assert!(first.0);
    assert!(first.1);
    assert_eq!(first.3, "lbl");
  }
}
