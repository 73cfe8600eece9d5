//! Node view and the external-adapter traits the core is generic over.
//!
//! `NodeView`, `NodeOperator`, `IntentPublisher` and `NodeStore` are the
//! seams between the pure core (intent model, policy, queued loop) and
//! whatever concrete cluster client backs them in production. Production
//! wires [`crate::kube_adapter`]; tests wire in-memory fakes that record
//! calls, the same way the teacher lineage's own test harnesses do for
//! their external service clients.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Read-only view over a single node's identity and metadata.
///
/// The exact wire keys are illustrative (see spec §6); the core only
/// depends on `name()`, `get()` and `busy_since()`.
pub trait NodeView {
    /// The node's unique identifier.
    fn name(&self) -> &str;
    /// Read a single metadata value, if present.
    fn get(&self, key: &str) -> Option<&str>;
    /// When the node entered `busy` for its current action, if known.
    ///
    /// This is the liveness oracle referenced by spec §3/§9: the core does
    /// not compute wall-clock durations itself, it only compares a
    /// timestamp the adapter supplies against a configured threshold.
    fn busy_since(&self) -> Option<DateTime<Utc>>;
}

/// Errors surfaced by the node operator (C3).
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Cordon failed; fatal for the current iteration.
    #[error("failed to cordon node '{node}': {source}")]
    Cordon {
        /// The node that failed to cordon.
        node: String,
        /// The underlying cause.
        #[source]
        source: anyhow::Error,
    },
    /// Uncordon failed; fatal for the current iteration.
    #[error("failed to uncordon node '{node}': {source}")]
    Uncordon {
        /// The node that failed to uncordon.
        node: String,
        /// The underlying cause.
        #[source]
        source: anyhow::Error,
    },
    /// Drain failed; non-fatal, logged as a warning.
    #[error("failed to drain node '{node}': {source}")]
    Drain {
        /// The node that failed to drain.
        node: String,
        /// The underlying cause.
        #[source]
        source: anyhow::Error,
    },
}

/// Error surfaced by the intent publisher (C4).
#[derive(Debug, Error)]
#[error("failed to publish intent for node '{node}': {source}")]
pub struct PublishError {
    /// The node whose intent failed to publish.
    pub node: String,
    /// The underlying cause.
    #[source]
    pub source: anyhow::Error,
}

/// Cordon/uncordon/drain a node (C3).
///
/// Implementations must make `cordon`/`uncordon` idempotent. `drain` may
/// return `Ok` even when some workload refused eviction; the core treats
/// that as a warning, not a failure (see [`crate::node::DrainOutcome`]).
#[async_trait::async_trait]
pub trait NodeOperator: Send + Sync {
    /// Mark the node unschedulable. Idempotent on already-cordoned nodes.
    async fn cordon(&self, node_name: &str) -> Result<(), OperatorError>;
    /// Inverse of `cordon`. Idempotent.
    async fn uncordon(&self, node_name: &str) -> Result<(), OperatorError>;
    /// Evict evictable workload, honoring daemon-set exclusions.
    async fn drain(&self, node_name: &str) -> Result<DrainOutcome, OperatorError>;
}

/// Result of a drain attempt: the core only treats an `Err` as fatal, a
/// partial drain is surfaced for logging purposes only.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DrainOutcome {
    /// Number of pods successfully evicted.
    pub evicted: u32,
    /// Number of pods that refused eviction (e.g. a pod-disruption budget).
    pub refused: u32,
}

/// Persist the controller's desired next intent back onto a node (C4).
#[async_trait::async_trait]
pub trait IntentPublisher: Send + Sync {
    /// Write only `wanted` back to the node's metadata. Must be atomic with
    /// respect to concurrent updates; the adapter resolves conflicts, the
    /// core never retries on conflict.
    async fn post(&self, intent: &crate::intent::Intent) -> Result<(), PublishError>;
}

/// Best-effort, read-only view of all currently known nodes (consulted by
/// Policy Check through the Action Manager).
pub trait NodeStore: Send + Sync {
    /// Current cached snapshot. Need not be globally consistent.
    fn list(&self) -> Vec<Box<dyn NodeView>>;
}
