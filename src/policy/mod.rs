//! Policy Check (C2): gates a candidate intent against a cluster-wide
//! active-node budget.

use crate::intent::Intent;
use crate::node::NodeView;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Failure to evaluate policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The snapshot provider returned no nodes of the expected kind;
    /// policy cannot be evaluated.
    #[error("snapshot unavailable: no nodes of the expected kind")]
    SnapshotUnavailable,
}

/// Tunables that bound on the cluster-wide active-node budget.
#[derive(Clone, Copy, Debug)]
pub struct PolicyConfig {
    /// Maximum nodes counted as `cluster_active` before new
    /// `starting_update` transitions are denied.
    pub max_active: usize,
    /// Liveness threshold used to evaluate `stuck`/`cluster_active`.
    pub liveness_threshold: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            max_active: 1,
            liveness_threshold: Duration::from_secs(30 * 60),
        }
    }
}

/// A read-only snapshot of all currently known nodes, built fresh per
/// policy evaluation. Holds no back-reference to the Action Manager, per
/// Design Note guidance against cyclic controller/manager references.
pub struct PolicyCheck<'a> {
    nodes: &'a [Box<dyn NodeView>],
    config: PolicyConfig,
    now: DateTime<Utc>,
}

impl<'a> PolicyCheck<'a> {
    /// Build a policy check over a borrowed snapshot of all known nodes.
    pub fn new(nodes: &'a [Box<dyn NodeView>], config: PolicyConfig, now: DateTime<Utc>) -> Self {
        PolicyCheck { nodes, config, now }
    }

    /// Evaluate whether `candidate` may proceed, given the current snapshot.
    ///
    /// Contract (spec §4.2), evaluated in order:
    /// 1. Empty snapshot is an error.
    /// 2. Count `cluster_active` nodes.
    /// 3. `starting_update = candidate.active == stabilize`.
    /// 4. If not starting: permit in-progress or terminal continuations
    ///    regardless of budget.
    /// 5. Otherwise permit iff `cluster_active < max_active`.
    pub fn check(&self, candidate: &Intent) -> Result<bool, PolicyError> {
        if self.nodes.is_empty() {
            return Err(PolicyError::SnapshotUnavailable);
        }

        let cluster_active_count = self
            .nodes
            .iter()
            .filter(|n| {
                let i = Intent::given(n.as_ref());
                i.cluster_active(self.now, self.config.liveness_threshold)
            })
            .count();

        let starting_update = candidate.active == crate::intent::Action::Stabilize;

        if !starting_update {
            if candidate.in_progress() || candidate.terminal() {
                return Ok(true);
            }
        }

        Ok(cluster_active_count < self.config.max_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{Action, AgentState, Tristate};
    use crate::node::tests::FakeNode;

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    fn boxed(n: FakeNode) -> Box<dyn NodeView> {
        Box::new(n)
    }

    #[test]
    fn empty_snapshot_is_an_error() {
        let nodes: Vec<Box<dyn NodeView>> = vec![];
        let check = PolicyCheck::new(&nodes, PolicyConfig::default(), now());
        let candidate = Intent {
            node_name: "n1".into(),
            wanted: Action::PrepareUpdate,
            active: Action::Stabilize,
            state: AgentState::Waiting,
            update_available: Tristate::Yes,
            busy_since: None,
        };
        assert!(matches!(
            check.check(&candidate),
            Err(PolicyError::SnapshotUnavailable)
        ));
    }

    #[test]
    fn scenario_denies_second_concurrent_start() {
        let nodes: Vec<Box<dyn NodeView>> = vec![boxed(
            FakeNode::new("busy-node")
                .with("wanted", "perform_update")
                .with("active", "perform_update")
                .with("state", "busy"),
        )];
        let check = PolicyCheck::new(&nodes, PolicyConfig::default(), now());
        let candidate = Intent {
            node_name: "n2".into(),
            wanted: Action::PrepareUpdate,
            active: Action::Stabilize,
            state: AgentState::Waiting,
            update_available: Tristate::Yes,
            busy_since: None,
        };
        assert_eq!(check.check(&candidate).unwrap(), false);
    }

    #[test]
    fn scenario_permits_in_progress_continuation_above_budget() {
        let nodes: Vec<Box<dyn NodeView>> = vec![boxed(
            FakeNode::new("busy-node")
                .with("wanted", "perform_update")
                .with("active", "perform_update")
                .with("state", "busy"),
        )];
        let check = PolicyCheck::new(&nodes, PolicyConfig::default(), now());
        let candidate = Intent {
            node_name: "busy-node".into(),
            wanted: Action::PerformUpdate,
            active: Action::PerformUpdate,
            state: AgentState::Busy,
            update_available: Tristate::No,
            busy_since: None,
        };
        assert_eq!(check.check(&candidate).unwrap(), true);
    }

    #[test]
    fn terminal_wrap_up_permitted_regardless_of_budget() {
        let nodes: Vec<Box<dyn NodeView>> = vec![
            boxed(
                FakeNode::new("other")
                    .with("wanted", "perform_update")
                    .with("active", "perform_update")
                    .with("state", "busy"),
            ),
            boxed(
                FakeNode::new("finishing")
                    .with("wanted", "reboot_update")
                    .with("active", "reboot_update")
                    .with("state", "waiting"),
            ),
        ];
        let check = PolicyCheck::new(&nodes, PolicyConfig::default(), now());
        let candidate = Intent {
            node_name: "finishing".into(),
            wanted: Action::RebootUpdate,
            active: Action::RebootUpdate,
            state: AgentState::Waiting,
            update_available: Tristate::No,
            busy_since: None,
        };
        assert!(candidate.terminal());
        assert_eq!(check.check(&candidate).unwrap(), true);
    }

    #[test]
    fn permits_first_start_under_budget() {
        let nodes: Vec<Box<dyn NodeView>> = vec![boxed(FakeNode::new("idle").with("wanted", "stabilize"))];
        let check = PolicyCheck::new(&nodes, PolicyConfig::default(), now());
        let candidate = Intent {
            node_name: "n2".into(),
            wanted: Action::PrepareUpdate,
            active: Action::Stabilize,
            state: AgentState::Waiting,
            update_available: Tristate::Yes,
            busy_since: None,
        };
        assert_eq!(check.check(&candidate).unwrap(), true);
    }
}
