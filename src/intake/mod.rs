//! Event Intake (C6): turns node change callbacks into candidate intents,
//! suppresses duplicates, and enqueues them to the bounded input queue.

use crate::intent::{Action, Intent};
use crate::node::NodeView;
use crate::suppressor::DuplicateSuppressor;
use chrono::{DateTime, Utc};
use log::{trace, warn};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Whether a realized, waiting, non-stuck, non-fallback `reboot_update`
/// intent marks a completed update cycle.
///
/// Exposed at crate level because both Event Intake (C6, to pass it through
/// unmodified) and the Action Manager (C7, to decide whether to reset and
/// uncordon) need the same predicate.
pub fn successful_update(i: &Intent, now: DateTime<Utc>, liveness_threshold: Duration) -> bool {
    i.wanted != Action::Fallback
        && !i.stuck(now, liveness_threshold)
        && i.waiting()
        && i.terminal()
        && i.realized()
}

/// Project a node's current metadata into the candidate intent the core
/// should act on next, or `None` if nothing is actionable yet.
///
/// `actionable` below is `wanted`/`projected-wanted` being intrusive, per
/// spec §4.5 (the same predicate C1 calls `intrusive`).
pub fn intent_for(node: &dyn NodeView, now: DateTime<Utc>, liveness_threshold: Duration) -> Option<Intent> {
    let current = Intent::given(node);

    if current.stuck(now, liveness_threshold) {
        return Some(current.reset());
    }
    if current.errored() {
        return Some(current.reset().projected());
    }

    let next = current.projected();
    let actionable = current.intrusive() || next.intrusive();
    if actionable && current.realized() && !current.in_progress() && !current.terminal() {
        return Some(next);
    }

    if !current.realized() {
        return None;
    }

    if successful_update(&current, now, liveness_threshold) {
        return Some(current);
    }

    if current.has_update_available() && current.waiting() && !current.errored() {
        return Some(current.set_begin_update());
    }

    None
}

/// Receives add/update/delete callbacks from the upstream event source,
/// projects each into an intent, suppresses duplicates, and enqueues to the
/// bounded input queue.
pub struct EventIntake {
    suppressor: Mutex<DuplicateSuppressor>,
    sender: mpsc::Sender<Intent>,
    liveness_threshold: Duration,
}

impl EventIntake {
    /// Build an Event Intake that sends accepted candidate intents to
    /// `sender` (the input queue's producing end).
    pub fn new(sender: mpsc::Sender<Intent>, liveness_threshold: Duration) -> Self {
        EventIntake {
            suppressor: Mutex::new(DuplicateSuppressor::new()),
            sender,
            liveness_threshold,
        }
    }

    /// A node was added to the cluster.
    pub fn on_add(&self, node: &dyn NodeView) {
        self.handle(node);
    }

    /// A node was updated; `new` is the post-update view.
    pub fn on_update(&self, _old: &dyn NodeView, new: &dyn NodeView) {
        self.handle(new);
    }

    /// A node was removed from the cluster.
    pub fn on_delete(&self, node: &dyn NodeView) {
        self.handle(node);
    }

    fn handle(&self, node: &dyn NodeView) {
        let now = Utc::now();
        let candidate = match intent_for(node, now, self.liveness_threshold) {
            Some(i) => i,
            None => {
                trace!("node '{}': nothing actionable", node.name());
                return;
            }
        };

        {
            let mut suppressor = self.suppressor.lock().expect("suppressor lock poisoned");
            if suppressor.is_duplicate(&candidate) {
                trace!("node '{}': dropping duplicate intent", node.name());
                return;
            }
            suppressor.record(candidate.clone());
        }

        match self.sender.try_send(candidate) {
            Ok(()) => (),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "node '{}': input queue full, dropping candidate intent",
                    node.name()
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("node '{}': input queue closed, dropping candidate intent", node.name());
            }
        }
    }
}
