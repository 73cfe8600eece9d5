//! Action Manager (C7): the queued event loop.
//!
//! Owns the bounded input and work queues, runs them under backpressure and
//! priority-based dropping, applies Policy Check, and executes the accepted
//! intent as cordon → drain → post (or, on a completed cycle, uncordon →
//! post a reset intent).

mod drop_decision;

pub use drop_decision::{DropDecision, RandomDropDecision};

use crate::intake::successful_update;
use crate::intent::{Action, Intent};
use crate::node::{IntentPublisher, NodeOperator, NodeStore, OperatorError, PublishError};
use crate::policy::{PolicyCheck, PolicyConfig, PolicyError};
use chrono::Utc;
use log::{debug, error, trace, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

lazy_static::lazy_static! {
    static ref INPUT_DROPPED: prometheus::IntCounterVec = register_int_counter_vec!(
        "dogswatch_manager_input_dropped_total",
        "Total number of candidate intents dropped before admission.",
        &["reason"]
    ).unwrap();
    static ref WORK_DROPPED: prometheus::IntCounterVec = register_int_counter_vec!(
        "dogswatch_manager_work_dropped_total",
        "Total number of admitted intents dropped before execution.",
        &["reason"]
    ).unwrap();
    static ref ACTIONS_TAKEN: prometheus::IntCounterVec = register_int_counter_vec!(
        "dogswatch_manager_actions_total",
        "Total number of node actions taken, by kind.",
        &["kind"]
    ).unwrap();
    static ref ACTION_ERRORS: prometheus::IntCounterVec = register_int_counter_vec!(
        "dogswatch_manager_action_errors_total",
        "Total number of node action failures, by kind.",
        &["kind"]
    ).unwrap();
}

/// Errors surfaced while executing a single accepted intent. Never
/// propagated past the Action Manager's loop body: every variant is logged
/// at the call site and the loop continues.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Policy Check could not be evaluated.
    #[error(transparent)]
    Snapshot(#[from] PolicyError),
    /// Cordon/uncordon failed.
    #[error(transparent)]
    Operator(#[from] OperatorError),
    /// Publishing the intent failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Tunable capacities and thresholds (spec §6 Configuration).
#[derive(Clone, Copy, Debug)]
pub struct QueueConfig {
    /// Work-queue capacity (`Q_main`).
    pub q_main: usize,
    /// Input-queue capacity (`Q_in`).
    pub q_in: usize,
    /// Threshold above which low-priority dropping activates.
    pub skip_threshold: usize,
    /// Cluster-wide active-node budget.
    pub max_active: usize,
    /// Probability a low-priority item is dropped when the work queue is hot.
    pub drop_probability: f64,
    /// Liveness threshold for the `stuck`/`cluster_active` oracle.
    pub liveness_threshold: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let q_main = 100;
        QueueConfig {
            q_main,
            q_in: q_main / 4,
            skip_threshold: q_main / 2,
            max_active: 1,
            drop_probability: 0.5,
            liveness_threshold: Duration::from_secs(30 * 60),
        }
    }
}

impl QueueConfig {
    fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            max_active: self.max_active,
            liveness_threshold: self.liveness_threshold,
        }
    }
}

/// Whether a candidate intent is low priority for the purposes of
/// backpressure dropping: a stabilize with nothing pending, or a sentinel
/// wanted value that carries no real instruction.
fn is_low_priority(i: &Intent) -> bool {
    (i.wanted == Action::Stabilize && !i.has_update_available())
        || matches!(i.wanted, Action::Unknown | Action::Fallback)
}

/// The queued event loop. Single-threaded and cooperative: suspends only at
/// the multi-way receive over `{cancellation, work_queue, input_queue}`.
pub struct ActionManager {
    work_tx: mpsc::Sender<Intent>,
    work_rx: mpsc::Receiver<Intent>,
    input_rx: mpsc::Receiver<Intent>,
    cancel: watch::Receiver<bool>,
    store: Arc<dyn NodeStore>,
    operator: Arc<dyn NodeOperator>,
    publisher: Arc<dyn IntentPublisher>,
    config: QueueConfig,
    drop_decision: Box<dyn DropDecision>,
}

impl ActionManager {
    /// Build the Action Manager's two bounded channels along with the
    /// manager itself. The returned `mpsc::Sender<Intent>` is the input
    /// queue's producing end, given to [`crate::intake::EventIntake`].
    pub fn new(
        config: QueueConfig,
        cancel: watch::Receiver<bool>,
        store: Arc<dyn NodeStore>,
        operator: Arc<dyn NodeOperator>,
        publisher: Arc<dyn IntentPublisher>,
        drop_decision: Box<dyn DropDecision>,
    ) -> (Self, mpsc::Sender<Intent>) {
        let (input_tx, input_rx) = mpsc::channel(config.q_in.max(1));
        let (work_tx, work_rx) = mpsc::channel(config.q_main.max(1));
        let manager = ActionManager {
            work_tx,
            work_rx,
            input_rx,
            cancel,
            store,
            operator,
            publisher,
            config,
            drop_decision,
        };
        (manager, input_tx)
    }

    /// Run until cancelled. Queued items are discarded on cancellation.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                changed = self.cancel.changed() => {
                    if changed.is_err() || *self.cancel.borrow_and_update() {
                        debug!("action manager: cancellation received, exiting");
                        return;
                    }
                }

                Some(intent) = self.work_rx.recv() => {
                    self.process_work_item(intent).await;
                }

                Some(intent) = self.input_rx.recv() => {
                    self.process_input_item(intent);
                }

                else => {
                    debug!("action manager: all channels closed, exiting");
                    return;
                }
            }
        }
    }

    /// Current number of items pending in the work queue.
    fn work_queue_len(&self) -> usize {
        self.work_tx.max_capacity() - self.work_tx.capacity()
    }

    fn process_input_item(&mut self, intent: Intent) {
        let now = Utc::now();
        let q = self.work_queue_len();

        let push = if q < self.config.skip_threshold {
            true
        } else if intent.cluster_active(now, self.config.liveness_threshold) {
            true
        } else if is_low_priority(&intent) {
            let dropped = self.drop_decision.should_drop(self.config.drop_probability);
            if dropped {
                trace!(
                    "node '{}': dropping low-priority intent under backpressure",
                    intent.node_name
                );
                INPUT_DROPPED.with_label_values(&["low_priority"]).inc();
            }
            !dropped
        } else {
            true
        };

        if !push {
            return;
        }

        if let Err(e) = self.work_tx.try_send(intent) {
            match e {
                mpsc::error::TrySendError::Full(i) => {
                    warn!("node '{}': work queue full, dropping intent", i.node_name);
                    WORK_DROPPED.with_label_values(&["queue_full"]).inc();
                }
                mpsc::error::TrySendError::Closed(i) => {
                    warn!("node '{}': work queue closed, dropping intent", i.node_name);
                    WORK_DROPPED.with_label_values(&["queue_closed"]).inc();
                }
            }
        }
    }

    async fn process_work_item(&self, intent: Intent) {
        let nodes = self.store.list();
        let now = Utc::now();
        let check = PolicyCheck::new(&nodes, self.config.policy_config(), now);

        let permit = match check.check(&intent) {
            Ok(permit) => permit,
            Err(e) => {
                error!("node '{}': policy check failed: {}", intent.node_name, e);
                return;
            }
        };

        if !permit {
            debug!("node '{}': policy denied intent", intent.node_name);
            return;
        }

        if let Err(e) = self.take_action(intent).await {
            error!("{}", e);
        }
    }

    /// Execute the accepted intent: cordon → drain → post, or, for a
    /// completed update cycle, reset → uncordon → post.
    async fn take_action(&self, intent: Intent) -> Result<(), ActionError> {
        let now = Utc::now();
        let success = successful_update(&intent, now, self.config.liveness_threshold);

        if intent.intrusive() && !success {
            self.operator.cordon(&intent.node_name).await.map_err(|e| {
                ACTION_ERRORS.with_label_values(&["cordon"]).inc();
                e
            })?;
            ACTIONS_TAKEN.with_label_values(&["cordon"]).inc();

            match self.operator.drain(&intent.node_name).await {
                Ok(outcome) if outcome.refused > 0 => {
                    warn!(
                        "node '{}': drain left {} workload refusing eviction",
                        intent.node_name, outcome.refused
                    );
                }
                Ok(_) => (),
                Err(e) => {
                    warn!("node '{}': drain failed (non-fatal): {}", intent.node_name, e);
                    ACTION_ERRORS.with_label_values(&["drain"]).inc();
                }
            }
            ACTIONS_TAKEN.with_label_values(&["drain"]).inc();
        }

        let intent = if success {
            let reset = intent.reset();
            self.run_success_hook(&reset);
            self.operator.uncordon(&reset.node_name).await.map_err(|e| {
                ACTION_ERRORS.with_label_values(&["uncordon"]).inc();
                e
            })?;
            ACTIONS_TAKEN.with_label_values(&["uncordon"]).inc();
            reset
        } else {
            intent
        };

        self.publisher.post(&intent).await.map_err(|e| {
            ACTION_ERRORS.with_label_values(&["publish"]).inc();
            e
        })?;
        ACTIONS_TAKEN.with_label_values(&["publish"]).inc();

        Ok(())
    }

    /// Best-effort post-success hook. Failures are a warning only; they do
    /// not block uncordon/post.
    fn run_success_hook(&self, intent: &Intent) {
        trace!("node '{}': update cycle completed", intent.node_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{AgentState, Tristate};
    use crate::node::tests::FakeNode;
    use crate::node::{DrainOutcome, NodeView};
    use std::sync::Mutex as StdMutex;

    struct RecordingOperator {
        calls: StdMutex<Vec<String>>,
        fail_cordon: bool,
    }

    impl RecordingOperator {
        fn new() -> Self {
            RecordingOperator {
                calls: StdMutex::new(vec![]),
                fail_cordon: false,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl NodeOperator for RecordingOperator {
        async fn cordon(&self, node_name: &str) -> Result<(), OperatorError> {
            if self.fail_cordon {
                return Err(OperatorError::Cordon {
                    node: node_name.to_string(),
                    source: anyhow::anyhow!("injected failure"),
                });
            }
            self.calls.lock().unwrap().push(format!("cordon:{node_name}"));
            Ok(())
        }

        async fn uncordon(&self, node_name: &str) -> Result<(), OperatorError> {
            self.calls.lock().unwrap().push(format!("uncordon:{node_name}"));
            Ok(())
        }

        async fn drain(&self, node_name: &str) -> Result<DrainOutcome, OperatorError> {
            self.calls.lock().unwrap().push(format!("drain:{node_name}"));
            Ok(DrainOutcome::default())
        }
    }

    struct RecordingPublisher {
        posted: StdMutex<Vec<Intent>>,
    }

    impl RecordingPublisher {
        fn new() -> Self {
            RecordingPublisher {
                posted: StdMutex::new(vec![]),
            }
        }
    }

    #[async_trait::async_trait]
    impl IntentPublisher for RecordingPublisher {
        async fn post(&self, intent: &Intent) -> Result<(), PublishError> {
            self.posted.lock().unwrap().push(intent.clone());
            Ok(())
        }
    }

    struct FixedStore(Vec<FakeNode>);

    impl NodeStore for FixedStore {
        fn list(&self) -> Vec<Box<dyn NodeView>> {
            self.0
                .iter()
                .cloned()
                .map(|n| Box::new(n) as Box<dyn NodeView>)
                .collect()
        }
    }

    struct AlwaysDrop;
    impl DropDecision for AlwaysDrop {
        fn should_drop(&self, _probability: f64) -> bool {
            true
        }
    }

    struct NeverDrop;
    impl DropDecision for NeverDrop {
        fn should_drop(&self, _probability: f64) -> bool {
            false
        }
    }

    fn intent(node: &str, wanted: Action) -> Intent {
        Intent {
            node_name: node.into(),
            wanted,
            active: wanted,
            state: AgentState::Busy,
            update_available: Tristate::No,
            busy_since: None,
        }
    }

    #[test]
    fn scenario_intrusive_take_action_cordons_then_drains_then_posts() {
        let operator = Arc::new(RecordingOperator::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let _ = cancel_tx;
        let store: Arc<dyn NodeStore> = Arc::new(FixedStore(vec![]));
        let (manager, _input_tx) = ActionManager::new(
            QueueConfig::default(),
            cancel_rx,
            store,
            operator.clone() as Arc<dyn NodeOperator>,
            publisher.clone() as Arc<dyn IntentPublisher>,
            Box::new(NeverDrop),
        );

        let rt = tokio::runtime::Runtime::new().unwrap();
        let i = Intent {
            node_name: "n1".into(),
            wanted: Action::PerformUpdate,
            active: Action::Stabilize,
            state: AgentState::Waiting,
            update_available: Tristate::Yes,
            busy_since: None,
        };
        rt.block_on(manager.take_action(i)).unwrap();

        assert_eq!(operator.calls(), vec!["cordon:n1", "drain:n1"]);
        assert_eq!(publisher.posted.lock().unwrap().len(), 1);
        assert_eq!(publisher.posted.lock().unwrap()[0].wanted, Action::PerformUpdate);
    }

    #[test]
    fn scenario_successful_update_resets_and_uncordons_without_cordon_drain() {
        let operator = Arc::new(RecordingOperator::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let store: Arc<dyn NodeStore> = Arc::new(FixedStore(vec![]));
        let (manager, _input_tx) = ActionManager::new(
            QueueConfig::default(),
            cancel_rx,
            store,
            operator.clone() as Arc<dyn NodeOperator>,
            publisher.clone() as Arc<dyn IntentPublisher>,
            Box::new(NeverDrop),
        );

        let rt = tokio::runtime::Runtime::new().unwrap();
        let i = Intent {
            node_name: "n1".into(),
            wanted: Action::RebootUpdate,
            active: Action::RebootUpdate,
            state: AgentState::Waiting,
            update_available: Tristate::No,
            busy_since: None,
        };
        rt.block_on(manager.take_action(i)).unwrap();

        assert_eq!(operator.calls(), vec!["uncordon:n1"]);
        let posted = publisher.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].wanted, Action::Stabilize);
        assert_eq!(posted[0].active, Action::Stabilize);
    }

    #[test]
    fn low_priority_dropping_is_probabilistic_above_skip_threshold() {
        let operator = Arc::new(RecordingOperator::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let store: Arc<dyn NodeStore> = Arc::new(FixedStore(vec![]));
        let mut config = QueueConfig::default();
        config.q_main = 4;
        config.skip_threshold = 2;
        let (mut manager, _input_tx) = ActionManager::new(
            config,
            cancel_rx,
            store,
            operator as Arc<dyn NodeOperator>,
            publisher as Arc<dyn IntentPublisher>,
            Box::new(AlwaysDrop),
        );

        // Fill the work queue past skip_threshold with unconditionally-forwarded items.
        manager.process_input_item(intent("a", Action::PerformUpdate));
        manager.process_input_item(intent("b", Action::PerformUpdate));
        assert_eq!(manager.work_queue_len(), 2);

        // Now above skip_threshold: a low-priority item is dropped under AlwaysDrop.
        manager.process_input_item(intent("c", Action::Stabilize));
        assert_eq!(manager.work_queue_len(), 2);
    }

    #[test]
    fn cluster_active_items_are_never_starved_above_skip_threshold() {
        let operator = Arc::new(RecordingOperator::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let store: Arc<dyn NodeStore> = Arc::new(FixedStore(vec![]));
        let mut config = QueueConfig::default();
        config.q_main = 4;
        config.skip_threshold = 1;
        let (mut manager, _input_tx) = ActionManager::new(
            config,
            cancel_rx,
            store,
            operator as Arc<dyn NodeOperator>,
            publisher as Arc<dyn IntentPublisher>,
            Box::new(AlwaysDrop),
        );

        manager.process_input_item(intent("a", Action::PerformUpdate));
        assert_eq!(manager.work_queue_len(), 1);
        // Above skip_threshold now, but this item is cluster_active: must be forwarded.
        manager.process_input_item(intent("b", Action::PerformUpdate));
        assert_eq!(manager.work_queue_len(), 2);
    }

    #[test]
    fn work_queue_at_capacity_drops_input() {
        let operator = Arc::new(RecordingOperator::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let store: Arc<dyn NodeStore> = Arc::new(FixedStore(vec![]));
        let mut config = QueueConfig::default();
        config.q_main = 1;
        config.skip_threshold = 0;
        let (mut manager, _input_tx) = ActionManager::new(
            config,
            cancel_rx,
            store,
            operator as Arc<dyn NodeOperator>,
            publisher as Arc<dyn IntentPublisher>,
            Box::new(NeverDrop),
        );

        manager.process_input_item(intent("a", Action::PerformUpdate));
        assert_eq!(manager.work_queue_len(), 1);
        manager.process_input_item(intent("b", Action::PerformUpdate));
        assert_eq!(manager.work_queue_len(), 1);
    }
}
