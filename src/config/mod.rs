//! Configuration parsing and validation (C8).
//!
//! Mirrors the fragments/inputs/settings layering used elsewhere in this
//! lineage: TOML fragments (all fields optional) are scanned across a
//! fixed drop-in search path and merged lowest-to-highest precedence into
//! an [`inputs::ConfigInput`], then validated into a process-wide
//! [`Settings`]. CLI flags, parsed by [`crate::cli`], are applied last and
//! win over anything read from disk.

mod fragments;
pub(crate) mod inputs;

use crate::cli::CliOptions;
use crate::manager::QueueConfig;
use anyhow::Result;
use log::LevelFilter;
use serde::Serialize;
use std::time::Duration;

/// Runtime configuration for the controller.
///
/// Holds validated, process-wide settings: everything the Action Manager
/// (C7) and Policy Check (C2) need to run, plus logging verbosity.
#[derive(Debug, Serialize)]
pub struct Settings {
    /// Work-queue capacity (`Q_main`).
    pub q_main: usize,
    /// Input-queue capacity (`Q_in`).
    pub q_in: usize,
    /// Work-queue depth above which low-priority dropping activates.
    pub skip_threshold: usize,
    /// Cluster-wide active-node budget.
    pub max_active: usize,
    /// Probability a low-priority item is dropped under pressure.
    pub drop_probability: f64,
    /// Liveness threshold for the `stuck`/`cluster_active` oracle.
    #[serde(skip)]
    pub liveness_threshold: Duration,
    /// Logging verbosity, already resolved to a `log::LevelFilter`.
    #[serde(skip)]
    pub loglevel: LevelFilter,
}

impl Settings {
    /// Assemble runtime settings from on-disk fragments, then apply CLI
    /// overrides.
    pub fn assemble(cli: &CliOptions) -> Result<Self> {
        let prefixes = vec![
            "/usr/lib/".to_string(),
            "/run/".to_string(),
            "/etc/".to_string(),
        ];
        let common_path = format!("{}/config.d/", clap::crate_name!());
        let extensions = vec!["toml".to_string()];
        let cfg = inputs::ConfigInput::read_configs(prefixes, &common_path, extensions)?;
        Ok(Self::validate(cfg, cli))
    }

    /// Validate merged config input and layer CLI overrides on top.
    fn validate(cfg: inputs::ConfigInput, cli: &CliOptions) -> Self {
        let q_main = cli.q_main.unwrap_or(cfg.queues.q_main);
        let q_in = cli
            .q_in
            .or(cfg.queues.q_in)
            .unwrap_or_else(|| (q_main / 4).max(1));
        let skip_threshold = cli
            .skip_threshold
            .or(cfg.queues.skip_threshold)
            .unwrap_or(q_main / 2);
        let max_active = cli.max_active.unwrap_or(cfg.policy.max_active);
        let drop_probability = cli.drop_probability.unwrap_or(cfg.queues.drop_probability);
        let liveness_threshold_secs = cli
            .liveness_threshold_secs
            .unwrap_or(cfg.policy.liveness_threshold_secs);
        let verbosity = cli.verbosity.max(cfg.log.verbosity);

        Settings {
            q_main,
            q_in,
            skip_threshold,
            max_active,
            drop_probability,
            liveness_threshold: Duration::from_secs(liveness_threshold_secs),
            loglevel: match verbosity {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            },
        }
    }

    /// Project these settings into the Action Manager's queue config.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            q_main: self.q_main,
            q_in: self.q_in,
            skip_threshold: self.skip_threshold,
            max_active: self.max_active,
            drop_probability: self.drop_probability,
            liveness_threshold: self.liveness_threshold,
        }
    }
}
