use crate::config::fragments;
use anyhow::{Context, Result};
use fn_error_context::context;
use log::trace;
use serde::Serialize;

/// Runtime configuration holding environmental inputs, merged from fragments
/// but not yet validated into [`super::Settings`].
#[derive(Debug, Serialize)]
pub(crate) struct ConfigInput {
    pub(crate) queues: QueuesInput,
    pub(crate) policy: PolicyInput,
    pub(crate) log: LogInput,
}

impl ConfigInput {
    /// Read config fragments from the standard drop-in directories and
    /// merge them into a single input, lowest to highest precedence.
    #[context("failed to read and merge config fragments")]
    pub(crate) fn read_configs(
        dirs: Vec<String>,
        common_path: &str,
        extensions: Vec<String>,
    ) -> Result<Self> {
        let scanner = liboverdrop::FragmentScanner::new(dirs, common_path, true, extensions);

        let mut fragments = Vec::new();
        for (_, fpath) in scanner.scan() {
            trace!("reading config fragment '{}'", fpath.display());

            let content = std::fs::read(&fpath)
                .with_context(|| format!("failed to read file '{}'", fpath.display()))?;
            let frag: fragments::ConfigFragment =
                toml::from_slice(&content).context("failed to parse TOML")?;

            fragments.push(frag);
        }

        Ok(Self::merge_fragments(fragments))
    }

    /// Merge multiple fragments into a single configuration input.
    pub(crate) fn merge_fragments(fragments: Vec<fragments::ConfigFragment>) -> Self {
        let mut queues = vec![];
        let mut policies = vec![];
        let mut logs = vec![];

        for snip in fragments {
            if let Some(q) = snip.queues {
                queues.push(q);
            }
            if let Some(p) = snip.policy {
                policies.push(p);
            }
            if let Some(l) = snip.log {
                logs.push(l);
            }
        }

        Self {
            queues: QueuesInput::from_fragments(queues),
            policy: PolicyInput::from_fragments(policies),
            log: LogInput::from_fragments(logs),
        }
    }
}

/// Default work-queue capacity (`Q_main`), per spec.
pub(crate) const DEFAULT_Q_MAIN: usize = 100;
/// Default cluster-wide active-node budget.
pub(crate) const DEFAULT_MAX_ACTIVE: usize = 1;
/// Default probability a low-priority item is dropped under pressure.
pub(crate) const DEFAULT_DROP_PROBABILITY: f64 = 0.5;
/// Default liveness threshold, in seconds, for the `stuck` oracle.
pub(crate) const DEFAULT_LIVENESS_THRESHOLD_SECS: u64 = 30 * 60;

/// Queue capacities and backpressure tuning, with defaults applied.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct QueuesInput {
    pub(crate) q_main: usize,
    pub(crate) q_in: Option<usize>,
    pub(crate) skip_threshold: Option<usize>,
    pub(crate) drop_probability: f64,
}

impl QueuesInput {
    fn from_fragments(fragments: Vec<fragments::QueuesFragment>) -> Self {
        let mut cfg = Self {
            q_main: DEFAULT_Q_MAIN,
            q_in: None,
            skip_threshold: None,
            drop_probability: DEFAULT_DROP_PROBABILITY,
        };

        for snip in fragments {
            if let Some(v) = snip.q_main {
                cfg.q_main = v;
            }
            if let Some(v) = snip.q_in {
                cfg.q_in = Some(v);
            }
            if let Some(v) = snip.skip_threshold {
                cfg.skip_threshold = Some(v);
            }
            if let Some(v) = snip.drop_probability {
                cfg.drop_probability = v;
            }
        }

        cfg
    }
}

/// Cluster-wide active-node budget, with defaults applied.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct PolicyInput {
    pub(crate) max_active: usize,
    pub(crate) liveness_threshold_secs: u64,
}

impl PolicyInput {
    fn from_fragments(fragments: Vec<fragments::PolicyFragment>) -> Self {
        let mut cfg = Self {
            max_active: DEFAULT_MAX_ACTIVE,
            liveness_threshold_secs: DEFAULT_LIVENESS_THRESHOLD_SECS,
        };

        for snip in fragments {
            if let Some(v) = snip.max_active {
                cfg.max_active = v;
            }
            if let Some(v) = snip.liveness_threshold_secs {
                cfg.liveness_threshold_secs = v;
            }
        }

        cfg
    }
}

/// Logging verbosity, with defaults applied.
#[derive(Clone, Debug, Serialize)]
pub(crate) struct LogInput {
    pub(crate) verbosity: u8,
}

impl LogInput {
    fn from_fragments(fragments: Vec<fragments::LogFragment>) -> Self {
        let mut cfg = Self { verbosity: 0 };

        for snip in fragments {
            if let Some(v) = snip.verbosity {
                cfg.verbosity = v;
            }
        }

        cfg
    }
}
