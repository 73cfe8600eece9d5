//! `NodeOperator` (C3) and `IntentPublisher` (C4), wired against
//! [`KubeClient`].

use super::client::{EvictionOutcome, KubeClient};
use super::node_record::NodeMetadataKeys;
use crate::intent::Intent;
use crate::node::{DrainOutcome, IntentPublisher, NodeOperator, OperatorError, PublishError};
use std::sync::Arc;

/// Kubernetes-backed node operator and intent publisher.
///
/// Per the Open Question recorded in DESIGN.md, `uncordon` is implemented
/// symmetrically with `cordon`: both route through the same
/// `patch_unschedulable` primitive, differing only in the flag's value.
#[derive(Clone, Debug)]
pub struct KubeOperator {
    client: Arc<KubeClient>,
    keys: Arc<NodeMetadataKeys>,
}

impl KubeOperator {
    /// Wrap a `KubeClient` as a `NodeOperator`/`IntentPublisher`, publishing
    /// through the wire key `keys.wanted` names.
    pub fn new(client: Arc<KubeClient>, keys: Arc<NodeMetadataKeys>) -> Self {
        KubeOperator { client, keys }
    }
}

#[async_trait::async_trait]
impl NodeOperator for KubeOperator {
    async fn cordon(&self, node_name: &str) -> Result<(), OperatorError> {
        self.client
            .patch_unschedulable(node_name, true)
            .await
            .map_err(|e| OperatorError::Cordon {
                node: node_name.to_string(),
                source: e.into(),
            })
    }

    async fn uncordon(&self, node_name: &str) -> Result<(), OperatorError> {
        self.client
            .patch_unschedulable(node_name, false)
            .await
            .map_err(|e| OperatorError::Uncordon {
                node: node_name.to_string(),
                source: e.into(),
            })
    }

    async fn drain(&self, node_name: &str) -> Result<DrainOutcome, OperatorError> {
        let pods = self
            .client
            .list_pods_on_node(node_name)
            .await
            .map_err(|e| OperatorError::Drain {
                node: node_name.to_string(),
                source: e.into(),
            })?;

        let mut outcome = DrainOutcome::default();
        for pod in pods {
            if pod.is_daemonset_owned() {
                continue;
            }
            match self
                .client
                .evict_pod(&pod.metadata.namespace, &pod.metadata.name)
                .await
            {
                Ok(EvictionOutcome::Evicted) => outcome.evicted += 1,
                Ok(EvictionOutcome::Refused) => outcome.refused += 1,
                Err(e) => {
                    log::warn!(
                        "node '{}': failed to evict pod '{}/{}': {}",
                        node_name,
                        pod.metadata.namespace,
                        pod.metadata.name,
                        e
                    );
                    outcome.refused += 1;
                }
            }
        }
        Ok(outcome)
    }
}

#[async_trait::async_trait]
impl IntentPublisher for KubeOperator {
    async fn post(&self, intent: &Intent) -> Result<(), PublishError> {
        self.client
            .patch_label(&intent.node_name, &self.keys.wanted, intent.wanted.as_wire())
            .await
            .map_err(|e| PublishError {
                node: intent.node_name.clone(),
                source: e.into(),
            })
    }
}
