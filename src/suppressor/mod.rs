//! Duplicate Suppressor (C5): remembers the last intent seen per node and
//! suppresses semantic duplicates.

use crate::intent::Intent;
use std::collections::HashMap;

/// Last-seen intent per node.
#[derive(Debug, Default)]
pub struct DuplicateSuppressor {
    last: HashMap<String, Intent>,
}

impl DuplicateSuppressor {
    /// An empty suppressor with no recorded intents.
    pub fn new() -> Self {
        Self::default()
    }

    /// The last recorded intent for `intent.node_name`, if any.
    pub fn last(&self, intent: &Intent) -> Option<&Intent> {
        self.last.get(&intent.node_name)
    }

    /// Overwrite the last recorded intent for its node.
    pub fn record(&mut self, intent: Intent) {
        self.last.insert(intent.node_name.clone(), intent);
    }

    /// Whether `intent` should be dropped as a duplicate of the last
    /// recorded intent for its node.
    pub fn is_duplicate(&self, intent: &Intent) -> bool {
        self.last(intent)
            .map(|prev| prev.equivalent(intent))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{Action, AgentState, Tristate};

    fn intent(node: &str, wanted: Action) -> Intent {
        Intent {
            node_name: node.into(),
            wanted,
            active: wanted,
            state: AgentState::Waiting,
            update_available: Tristate::No,
            busy_since: None,
        }
    }

    #[test]
    fn first_sighting_is_not_a_duplicate() {
        let supp = DuplicateSuppressor::new();
        assert!(!supp.is_duplicate(&intent("n1", Action::Stabilize)));
    }

    #[test]
    fn consecutive_equivalent_intents_are_suppressed() {
        let mut supp = DuplicateSuppressor::new();
        let i1 = intent("n1", Action::Stabilize);
        supp.record(i1.clone());
        let i2 = intent("n1", Action::Stabilize);
        assert!(supp.is_duplicate(&i2));
    }

    #[test]
    fn differing_intents_are_not_suppressed() {
        let mut supp = DuplicateSuppressor::new();
        supp.record(intent("n1", Action::Stabilize));
        assert!(!supp.is_duplicate(&intent("n1", Action::PrepareUpdate)));
    }

    #[test]
    fn suppression_is_per_node() {
        let mut supp = DuplicateSuppressor::new();
        supp.record(intent("n1", Action::Stabilize));
        assert!(!supp.is_duplicate(&intent("n2", Action::Stabilize)));
    }
}
