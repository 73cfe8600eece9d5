//! Cluster-wide node update coordinator.
//!
//! The binary in `main.rs` is a thin wiring layer over this library: CLI
//! parsing and the Kube Adapter (C9) construct the concrete `NodeStore`,
//! `NodeOperator` and `IntentPublisher` the core (C1-C7) runs against.
//! Splitting the crate this way also gives integration tests in `tests/` a
//! way to drive the Action Manager end-to-end against in-memory fakes,
//! without going through a process boundary.

#![deny(missing_docs)]

#[macro_use]
extern crate prometheus;

/// Command-Line Interface (CLI) logic.
pub mod cli;
/// File-based configuration.
pub mod config;
/// Event Intake (C6): node events to candidate intents, duplicate-suppressed.
pub mod intake;
/// Intent Model (C1): pure data and functions over node metadata.
pub mod intent;
/// Kube Adapter (C9): concrete cluster-client bindings for C3/C4/C6/NodeStore.
pub mod kube_adapter;
/// Action Manager (C7): the queued event loop.
pub mod manager;
/// Metrics service.
pub mod metrics;
/// Node view and external-adapter traits (C3/C4/NodeStore seams).
pub mod node;
/// Policy Check (C2): cluster-wide active-node budget.
pub mod policy;
/// Duplicate Suppressor (C5).
pub mod suppressor;
