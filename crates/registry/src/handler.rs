//! Match handler: the queued, single-threaded event surface of one match.
//!
//! `MatchHandler` is the cheap-to-clone handle held by the registry; the
//! private `MatchActor` owns the match core and consumes events on its own
//! task. All mutation of match state happens on that task, reached only
//! through the bounded queues. Enqueue never blocks: a full queue returns a
//! refusal and the caller decides what that means.
//!
//! Event priority is fixed: terminate > leave > join > join-attempt > data.
//! Within one queue, events are consumed strictly in enqueue order.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use rally_core::{Flow, MatchCore, MatchDataMessage, MatchPresence, MessageRouter, PresenceStream, StreamMode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MatchConfig;
use crate::message::{JoinAttemptMsg, JoinMsg};
use crate::registry::MatchRegistry;

/// Presences currently attached to a match, keyed by session.
///
/// Shared between the owning actor (writes) and the registry (size reads
/// during listing), so the interior is a read/write lock.
#[derive(Debug, Default)]
pub struct PresenceList {
  inner: RwLock<HashMap<Uuid, MatchPresence>>,
}

impl PresenceList {
  pub fn size(&self) -> usize {
    self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
  }

  fn add(&self, presences: &[MatchPresence]) {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    for presence in presences {
      inner.insert(presence.session_id, presence.clone());
    }
  }

  fn remove(&self, presences: &[MatchPresence]) {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    for presence in presences {
      inner.remove(&presence.session_id);
    }
  }
}

/// Handle to a live match. Clones share the same underlying actor.
#[derive(Debug, Clone)]
pub struct MatchHandler {
  id: Uuid,
  id_str: Arc<str>,
  presences: Arc<PresenceList>,
  attempt_tx: mpsc::Sender<JoinAttemptMsg>,
  join_tx: mpsc::Sender<JoinMsg>,
  leave_tx: mpsc::Sender<Vec<MatchPresence>>,
  data_tx: mpsc::Sender<MatchDataMessage>,
  terminate_tx: mpsc::Sender<u64>,
  cancel: CancellationToken,
}

impl MatchHandler {
  /// Spawn the actor task for a new match and return its handle.
  pub(crate) fn spawn(
    registry: Weak<MatchRegistry>,
    config: &MatchConfig,
    router: Arc<dyn MessageRouter>,
    core: Box<dyn MatchCore>,
    id: Uuid,
    node: &str,
  ) -> Self {
    let (attempt_tx, attempt_rx) = mpsc::channel(config.join_attempt_queue_size);
    let (join_tx, join_rx) = mpsc::channel(config.call_queue_size);
    let (leave_tx, leave_rx) = mpsc::channel(config.call_queue_size);
    let (data_tx, data_rx) = mpsc::channel(config.data_queue_size);
    let (terminate_tx, terminate_rx) = mpsc::channel(config.call_queue_size);
    let cancel = CancellationToken::new();

    let id_str: Arc<str> = format!("{id}.{node}").into();
    let presences = Arc::new(PresenceList::default());

    let actor = MatchActor {
      id,
      id_str: Arc::clone(&id_str),
      stream: PresenceStream {
        mode: StreamMode::MatchAuthoritative,
        subject: id,
        label: node.to_owned(),
      },
      core,
      registry,
      router,
      presences: Arc::clone(&presences),
      last_label: None,
      attempt_rx,
      join_rx,
      leave_rx,
      data_rx,
      terminate_rx,
      cancel: cancel.clone(),
    };
    tokio::spawn(actor.run());

    Self {
      id,
      id_str,
      presences,
      attempt_tx,
      join_tx,
      leave_tx,
      data_tx,
      terminate_tx,
      cancel,
    }
  }

  pub fn id(&self) -> Uuid {
    self.id
  }

  /// The match's full address, `"{uuid}.{node}"`.
  pub fn id_str(&self) -> &str {
    &self.id_str
  }

  pub fn presence_list(&self) -> &PresenceList {
    &self.presences
  }

  /// Enqueue a join attempt. Returns whether the attempt was accepted into
  /// the queue; the decision itself arrives on the message's reply channel.
  pub fn queue_join_attempt(&self, msg: JoinAttemptMsg) -> bool {
    self.attempt_tx.try_send(msg).is_ok()
  }

  pub fn queue_join(&self, presences: Vec<MatchPresence>, sync_ack: bool) -> bool {
    self.join_tx.try_send(JoinMsg { presences, sync_ack }).is_ok()
  }

  pub fn queue_leave(&self, presences: Vec<MatchPresence>) -> bool {
    self.leave_tx.try_send(presences).is_ok()
  }

  pub fn queue_data(&self, message: MatchDataMessage) -> bool {
    self.data_tx.try_send(message).is_ok()
  }

  pub fn queue_terminate(&self, grace_seconds: u64) -> bool {
    self.terminate_tx.try_send(grace_seconds).is_ok()
  }

  /// Stop the actor immediately, without draining queues. The caller is
  /// responsible for any directory cleanup.
  pub fn close(&self) {
    self.cancel.cancel();
  }

  /// Build a handle with live queues but no actor behind them, for driving
  /// the registry's timeout paths in tests.
  #[cfg(test)]
  pub(crate) fn detached(id: Uuid, node: &str) -> (Self, DetachedQueues) {
    let (attempt_tx, attempt_rx) = mpsc::channel(1);
    let (join_tx, join_rx) = mpsc::channel(1);
    let (leave_tx, leave_rx) = mpsc::channel(1);
    let (data_tx, data_rx) = mpsc::channel(1);
    let (terminate_tx, terminate_rx) = mpsc::channel(1);
    let handler = Self {
      id,
      id_str: format!("{id}.{node}").into(),
      presences: Arc::new(PresenceList::default()),
      attempt_tx,
      join_tx,
      leave_tx,
      data_tx,
      terminate_tx,
      cancel: CancellationToken::new(),
    };
    let queues = DetachedQueues {
      attempt_rx,
      join_rx,
      leave_rx,
      data_rx,
      terminate_rx,
    };
    (handler, queues)
  }
}

/// Receivers for a detached test handle; holding them keeps the queues
/// open without consuming anything.
#[cfg(test)]
#[allow(dead_code)]
pub(crate) struct DetachedQueues {
  pub attempt_rx: mpsc::Receiver<JoinAttemptMsg>,
  pub join_rx: mpsc::Receiver<JoinMsg>,
  pub leave_rx: mpsc::Receiver<Vec<MatchPresence>>,
  pub data_rx: mpsc::Receiver<MatchDataMessage>,
  pub terminate_rx: mpsc::Receiver<u64>,
}

enum Step {
  /// Keep consuming events.
  Continue,
  /// The core requested a stop; report removal and exit.
  Stop,
  /// The handler was closed externally; exit without touching the
  /// directory, the closer owns cleanup.
  Closed,
}

struct MatchActor {
  id: Uuid,
  id_str: Arc<str>,
  stream: PresenceStream,
  core: Box<dyn MatchCore>,
  registry: Weak<MatchRegistry>,
  router: Arc<dyn MessageRouter>,
  presences: Arc<PresenceList>,
  /// Last label pushed to the index, to skip redundant refreshes.
  last_label: Option<String>,
  attempt_rx: mpsc::Receiver<JoinAttemptMsg>,
  join_rx: mpsc::Receiver<JoinMsg>,
  leave_rx: mpsc::Receiver<Vec<MatchPresence>>,
  data_rx: mpsc::Receiver<MatchDataMessage>,
  terminate_rx: mpsc::Receiver<u64>,
  cancel: CancellationToken,
}

impl MatchActor {
  async fn run(mut self) {
    info!(mid = %self.id_str, "Match handler started");
    self.sync_label();

    loop {
      let step = tokio::select! {
        biased;

        _ = self.cancel.cancelled() => Step::Closed,
        Some(grace) = self.terminate_rx.recv() => self.on_terminate(grace),
        Some(presences) = self.leave_rx.recv() => self.on_leave(presences),
        Some(msg) = self.join_rx.recv() => self.on_join(msg),
        Some(msg) = self.attempt_rx.recv() => self.on_join_attempt(msg),
        Some(msg) = self.data_rx.recv() => self.on_data(&msg),
        else => Step::Closed,
      };

      match step {
        Step::Continue => self.sync_label(),
        Step::Stop => {
          if let Some(registry) = self.registry.upgrade() {
            registry.remove_match(self.id, &self.stream);
          }
          break;
        }
        Step::Closed => break,
      }
    }

    info!(mid = %self.id_str, "Match handler stopped");
  }

  fn on_join_attempt(&mut self, msg: JoinAttemptMsg) -> Step {
    let decision = self.core.join_attempt(&msg.presence, &msg.metadata);
    if msg.reply.try_send(decision).is_err() {
      // The waiter gave up or its reply slot is gone; the attempt outcome
      // is simply lost.
      debug!(mid = %self.id_str, "Join attempt reply dropped");
    }
    Step::Continue
  }

  fn on_join(&mut self, msg: JoinMsg) -> Step {
    self.presences.add(&msg.presences);
    if msg.sync_ack {
      debug!(mid = %self.id_str, joins = msg.presences.len(), "Processing acknowledged joins");
    }
    let step = flow_step(self.core.join(&msg.presences));
    self.broadcast_presence_event(&msg.presences, &[]);
    step
  }

  fn on_leave(&mut self, presences: Vec<MatchPresence>) -> Step {
    self.presences.remove(&presences);
    let step = flow_step(self.core.leave(&presences));
    self.broadcast_presence_event(&[], &presences);
    step
  }

  fn on_data(&mut self, message: &MatchDataMessage) -> Step {
    flow_step(self.core.data(message))
  }

  fn on_terminate(&mut self, grace_seconds: u64) -> Step {
    info!(mid = %self.id_str, grace_seconds, "Match handler received terminate");
    flow_step(self.core.terminate(grace_seconds))
  }

  /// Push the core's label to the index when it changed.
  fn sync_label(&mut self) {
    let label = self.core.label();
    if self.last_label.as_deref() == Some(label.as_str()) {
      return;
    }
    if let Some(registry) = self.registry.upgrade() {
      if let Err(e) = registry.update_match_label(self.id, &label) {
        warn!(mid = %self.id_str, error = %e, "Failed to update match label");
        return;
      }
    }
    self.last_label = Some(label);
  }

  /// Announce membership changes to the match stream.
  fn broadcast_presence_event(&self, joins: &[MatchPresence], leaves: &[MatchPresence]) {
    if joins.is_empty() && leaves.is_empty() {
      return;
    }
    let event = serde_json::json!({
      "match_id": &*self.id_str,
      "joins": joins.iter().map(|p| p.username.as_str()).collect::<Vec<_>>(),
      "leaves": leaves.iter().map(|p| p.username.as_str()).collect::<Vec<_>>(),
    });
    match serde_json::to_vec(&event) {
      Ok(payload) => self.router.send_to_stream(&self.stream, &payload),
      Err(e) => warn!(mid = %self.id_str, error = %e, "Failed to encode presence event"),
    }
  }
}

fn flow_step(flow: Flow) -> Step {
  match flow {
    Flow::Continue => Step::Continue,
    Flow::Stop => Step::Stop,
  }
}
