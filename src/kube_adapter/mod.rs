//! Kube Adapter (C9): the crate's concrete, swappable binding of the Node
//! Operator (C3), Intent Publisher (C4), and the node lister/event source
//! that feed the Action Manager (C7) and Event Intake (C6), against the
//! Kubernetes REST API.
//!
//! This is, per design, an approximate adapter (spec §9, SPEC_FULL.md
//! §4.8): it talks directly to the small slice of the API this controller
//! needs rather than depending on a full cluster-client crate, so it is the
//! seam a real one plugs into without touching anything under
//! [`crate::intent`], [`crate::policy`], [`crate::intake`] or
//! [`crate::manager`].

mod client;
mod node_record;
mod operator;
mod store;

pub use client::{ClusterConfig, EvictionOutcome, KubeClient, KubeError, OwnerReference, PodMetadata, PodRef};
pub use node_record::{NodeMetadataKeys, NodeRecord, BUSY_SINCE_ANNOTATION};
pub use operator::KubeOperator;
pub use store::KubeNodeStore;
