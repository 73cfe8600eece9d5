//! TOML configuration fragments. Every field is optional; a fragment is a
//! sparse override layered over the defaults baked into [`super::inputs`].

use serde::Deserialize;

/// Top-level configuration stanza.
#[derive(Debug, Deserialize, PartialEq)]
pub(crate) struct ConfigFragment {
    /// Queue capacities and backpressure tuning.
    pub(crate) queues: Option<QueuesFragment>,
    /// Cluster-wide active-node budget.
    pub(crate) policy: Option<PolicyFragment>,
    /// Logging verbosity.
    pub(crate) log: Option<LogFragment>,
}

/// Config fragment for queue capacities and backpressure.
#[derive(Debug, Deserialize, PartialEq)]
pub(crate) struct QueuesFragment {
    /// Work-queue capacity (`Q_main`).
    pub(crate) q_main: Option<usize>,
    /// Input-queue capacity (`Q_in`); defaults to `Q_main / 4`.
    pub(crate) q_in: Option<usize>,
    /// Work-queue depth above which low-priority dropping activates.
    pub(crate) skip_threshold: Option<usize>,
    /// Probability (0.0-1.0) a low-priority item is dropped under pressure.
    pub(crate) drop_probability: Option<f64>,
}

/// Config fragment for the cluster-wide active-node budget.
#[derive(Debug, Deserialize, PartialEq)]
pub(crate) struct PolicyFragment {
    /// Maximum number of nodes counted as `cluster_active` at once.
    pub(crate) max_active: Option<usize>,
    /// Liveness threshold, in seconds, for the `stuck` oracle.
    pub(crate) liveness_threshold_secs: Option<u64>,
}

/// Config fragment for logging.
#[derive(Debug, Deserialize, PartialEq)]
pub(crate) struct LogFragment {
    /// Verbosity level (higher is more verbose), same scale as `-v` flags.
    pub(crate) verbosity: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sparse_fragment() {
        let toml = r#"
            [queues]
            q_main = 200

            [policy]
            max_active = 3
        "#;
        let frag: ConfigFragment = toml::from_str(toml).unwrap();
        assert_eq!(frag.queues.unwrap().q_main, Some(200));
        assert_eq!(frag.policy.unwrap().max_active, Some(3));
    }

    #[test]
    fn empty_fragment_is_all_none() {
        let frag: ConfigFragment = toml::from_str("").unwrap();
        assert!(frag.queues.is_none());
        assert!(frag.policy.is_none());
        assert!(frag.log.is_none());
    }
}
