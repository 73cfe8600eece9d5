//! Command-Line Interface (CLI) logic.

use clap::Parser;

/// CLI configuration options. Every tunable defaults to `None`, meaning
/// "defer to the on-disk configuration fragments" (see [`crate::config`]).
#[derive(Clone, Debug, Parser)]
#[command(name = "dogswatch", about = "Cluster-wide node update coordinator")]
pub struct CliOptions {
    /// Verbosity level (higher is more verbose).
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,

    /// Work-queue capacity (`Q_main`).
    #[arg(long = "q-main")]
    pub q_main: Option<usize>,

    /// Input-queue capacity (`Q_in`); defaults to `Q_main / 4`.
    #[arg(long = "q-in")]
    pub q_in: Option<usize>,

    /// Work-queue depth above which low-priority dropping activates.
    #[arg(long = "skip-threshold")]
    pub skip_threshold: Option<usize>,

    /// Cluster-wide active-node budget.
    #[arg(long = "max-active")]
    pub max_active: Option<usize>,

    /// Probability (0.0-1.0) a low-priority item is dropped under pressure.
    #[arg(long = "drop-probability")]
    pub drop_probability: Option<f64>,

    /// Liveness threshold, in seconds, for the `stuck` oracle.
    #[arg(long = "liveness-threshold-secs")]
    pub liveness_threshold_secs: Option<u64>,
}
