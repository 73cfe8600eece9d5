//! The intent model: pure data and functions over a node's declared metadata.
//!
//! An [`Intent`] is the controller's interpretation of what a node wants to
//! do next. Every operation here is a pure function of its own inputs; none
//! of them perform I/O or consult the cluster.

use crate::node::NodeView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The action a node is requested to take, or reports taking.
///
/// Closed set, per the wire contract with the host agent. Unrecognized
/// strings from node metadata map to [`Action::Unknown`] rather than
/// failing to parse; `Fallback` is a sentinel used only for
/// initialization/comparison, never posted as an instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Resting point of the cycle: nothing intrusive is requested.
    Stabilize,
    /// First intrusive step: fetch and stage an update.
    PrepareUpdate,
    /// Second intrusive step: apply the staged update.
    PerformUpdate,
    /// Third intrusive step: reboot into the updated image.
    RebootUpdate,
    /// The metadata key was present but held an unrecognized value, or was
    /// absent entirely.
    Unknown,
    /// Sentinel used only for initialization/comparison; never posted.
    Fallback,
}

impl Action {
    /// Parse an action from its wire representation.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "stabilize" => Action::Stabilize,
            "prepare_update" => Action::PrepareUpdate,
            "perform_update" => Action::PerformUpdate,
            "reboot_update" => Action::RebootUpdate,
            "fallback" => Action::Fallback,
            _ => Action::Unknown,
        }
    }

    /// Render the action to its wire representation.
    pub fn as_wire(self) -> &'static str {
        match self {
            Action::Stabilize => "stabilize",
            Action::PrepareUpdate => "prepare_update",
            Action::PerformUpdate => "perform_update",
            Action::RebootUpdate => "reboot_update",
            Action::Unknown => "unknown",
            Action::Fallback => "fallback",
        }
    }

    /// Next element of the canonical update chain.
    ///
    /// Only `prepare_update`, `perform_update` and `reboot_update` advance;
    /// `stabilize` is the resting point of the cycle (entered either via
    /// [`Intent::reset`] or the wrap-up of `reboot_update`) and does not
    /// self-advance, and the sentinels never advance.
    fn next_in_chain(self) -> Self {
        match self {
            Action::PrepareUpdate => Action::PerformUpdate,
            Action::PerformUpdate => Action::RebootUpdate,
            Action::RebootUpdate => Action::Stabilize,
            other => other,
        }
    }

    /// Whether this action is one the controller must orchestrate
    /// (cordon/drain before, uncordon after).
    pub fn is_intrusive(self) -> bool {
        matches!(
            self,
            Action::PrepareUpdate | Action::PerformUpdate | Action::RebootUpdate
        )
    }
}

/// Where the agent is in its current action.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum AgentState {
    /// The agent is actively working on `active`.
    Busy,
    /// The agent is idle, awaiting the next instruction.
    Waiting,
    /// The agent reports a failure performing `active`.
    Errored,
    /// The metadata key was absent or held an unrecognized value.
    Unknown,
}

impl AgentState {
    /// Parse an agent state from its wire representation.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "busy" => AgentState::Busy,
            "waiting" => AgentState::Waiting,
            "errored" => AgentState::Errored,
            _ => AgentState::Unknown,
        }
    }

    /// Render the agent state to its wire representation.
    pub fn as_wire(self) -> &'static str {
        match self {
            AgentState::Busy => "busy",
            AgentState::Waiting => "waiting",
            AgentState::Errored => "errored",
            AgentState::Unknown => "unknown",
        }
    }
}

/// Whether an update is available upstream, per the agent's own report.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Tristate {
    /// An update is available, per the agent's own report.
    Yes,
    /// No update is available.
    No,
    /// The metadata key was absent or held an unrecognized value.
    Unknown,
}

impl Tristate {
    /// Parse a tristate from its wire representation.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "yes" => Tristate::Yes,
            "no" => Tristate::No,
            _ => Tristate::Unknown,
        }
    }

    /// Render the tristate to its wire representation.
    pub fn as_wire(self) -> &'static str {
        match self {
            Tristate::Yes => "yes",
            Tristate::No => "no",
            Tristate::Unknown => "unknown",
        }
    }
}

/// The controller's interpretation of a node: what it wants, what the agent
/// is doing, and whether the two agree.
#[derive(Clone, Debug)]
pub struct Intent {
    /// Identifier of the target node.
    pub node_name: String,
    /// The action the controller has asked the agent to take.
    pub wanted: Action,
    /// The action the agent reports it is currently doing.
    pub active: Action,
    /// Where the agent is in that action.
    pub state: AgentState,
    /// Whether an update is available, per the agent's own report.
    pub update_available: Tristate,
    /// When the agent entered `busy` for its current `active` action, if
    /// known. Used only by [`Intent::stuck`]; excluded from equivalence.
    pub busy_since: Option<DateTime<Utc>>,
}

impl Intent {
    /// Read an intent from a node's current metadata.
    ///
    /// Missing keys default to `unknown` for `wanted`/`active`/`state`, and
    /// to `no` for `update_available`, per the wire contract. Malformed (but
    /// present) values are treated the same as missing: they decode to the
    /// closed set's `Unknown` arm rather than panicking.
    pub fn given(node: &dyn NodeView) -> Self {
        let wanted = node
            .get("wanted")
            .map(Action::from_wire)
            .unwrap_or(Action::Unknown);
        let active = node
            .get("active")
            .map(Action::from_wire)
            .unwrap_or(Action::Unknown);
        let state = node
            .get("state")
            .map(AgentState::from_wire)
            .unwrap_or(AgentState::Unknown);
        let update_available = node
            .get("update-available")
            .map(Tristate::from_wire)
            .unwrap_or(Tristate::No);

        Intent {
            node_name: node.name().to_string(),
            wanted,
            active,
            state,
            update_available,
            busy_since: node.busy_since(),
        }
    }

    /// Produce the intent representing the next step for this node.
    ///
    /// Deterministic; depends only on `self`'s own fields.
    pub fn projected(&self) -> Self {
        Intent {
            node_name: self.node_name.clone(),
            wanted: self.wanted.next_in_chain(),
            active: self.active,
            state: self.state,
            update_available: self.update_available,
            busy_since: self.busy_since,
        }
    }

    /// Return to `stabilize`/`busy`. Idempotent.
    pub fn reset(&self) -> Self {
        Intent {
            node_name: self.node_name.clone(),
            wanted: Action::Stabilize,
            active: Action::Stabilize,
            state: AgentState::Busy,
            update_available: self.update_available,
            busy_since: None,
        }
    }

    /// A stabilized node has learned that an update is available: ask it to
    /// begin preparing one.
    pub fn set_begin_update(&self) -> Self {
        Intent {
            wanted: Action::PrepareUpdate,
            ..self.clone()
        }
    }

    /// Whether the agent has caught up to the last instruction.
    pub fn realized(&self) -> bool {
        self.active == self.wanted
    }

    /// Whether the agent is currently mid-action.
    pub fn in_progress(&self) -> bool {
        self.state == AgentState::Busy
    }

    /// Whether the agent is idle, awaiting the next instruction.
    pub fn waiting(&self) -> bool {
        self.state == AgentState::Waiting
    }

    /// Whether the agent reports a failure.
    pub fn errored(&self) -> bool {
        self.state == AgentState::Errored
    }

    /// Whether `wanted` is the last step before the cycle restarts: a
    /// completed `reboot_update`, waiting to return to `stabilize`.
    pub fn terminal(&self) -> bool {
        self.wanted == Action::RebootUpdate && self.realized() && self.waiting()
    }

    /// An agent stuck busy past a liveness threshold, or reporting `unknown`
    /// while asked to do real work.
    ///
    /// `now` and `liveness_threshold` are supplied by the caller (ultimately
    /// from configuration) so this stays a pure function of its inputs,
    /// even though the underlying signal is a wall-clock one.
    pub fn stuck(&self, now: DateTime<Utc>, liveness_threshold: Duration) -> bool {
        let busy_too_long = self.in_progress()
            && self
                .busy_since
                .map(|since| {
                    now.signed_duration_since(since)
                        >= chrono::Duration::from_std(liveness_threshold)
                            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
                })
                .unwrap_or(false);
        let unknown_while_expected_to_act =
            self.state == AgentState::Unknown && self.wanted != Action::Unknown;
        busy_too_long || unknown_while_expected_to_act
    }

    /// Whether an update is available, per the agent's own report.
    pub fn has_update_available(&self) -> bool {
        self.update_available == Tristate::Yes
    }

    /// Whether `wanted` requires cordon/drain orchestration.
    pub fn intrusive(&self) -> bool {
        self.wanted.is_intrusive()
    }

    /// Whether this intent's node occupies the cluster-wide active budget.
    pub fn cluster_active(&self, now: DateTime<Utc>, liveness_threshold: Duration) -> bool {
        self.wanted != Action::Stabilize && !self.stuck(now, liveness_threshold)
    }

    /// Whether this intent and `other` are semantically equivalent:
    /// `wanted`, `active`, `state` and `update_available` pairwise equal,
    /// regardless of `node_name`.
    pub fn equivalent(&self, other: &Intent) -> bool {
        self.wanted == other.wanted
            && self.active == other.active
            && self.state == other.state
            && self.update_available == other.update_available
    }
}
