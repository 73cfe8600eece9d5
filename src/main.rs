//! Cluster-wide node update coordinator.

use clap::Parser;
use dogswatch::cli::CliOptions;
use dogswatch::config;
use dogswatch::intake;
use dogswatch::kube_adapter::{ClusterConfig, KubeClient, KubeNodeStore, KubeOperator, NodeMetadataKeys};
use dogswatch::manager::{ActionManager, RandomDropDecision};
use dogswatch::metrics;
use dogswatch::node::{IntentPublisher, NodeOperator, NodeStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// How often the Kube Adapter relists the cluster to refresh its node
/// snapshot and synthesize add/update/delete events (spec §9: this crate
/// polls rather than streaming a server-side watch). Not part of the
/// core's configuration surface (spec §6); an adapter-only concern.
const RELIST_INTERVAL: Duration = Duration::from_secs(10);

/// Binary entrypoint.
fn main() {
    let exit_code = run();
    std::process::exit(exit_code);
}

/// Run till completion or failure, pretty-printing termination errors if any.
fn run() -> i32 {
    let cli_opts = CliOptions::parse();

    let settings = match config::Settings::assemble(&cli_opts) {
        Ok(s) => s,
        Err(e) => {
            init_fallback_logging();
            log_error_chain(&e);
            return 1;
        }
    };

    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .format_module_path(false)
        .filter(Some(clap::crate_name!()), settings.loglevel)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            init_fallback_logging();
            log_error_chain(&e.into());
            return 1;
        }
    };

    match runtime.block_on(run_async(settings)) {
        Ok(()) => 0,
        Err(e) => {
            log_error_chain(&e);
            1
        }
    }
}

fn init_fallback_logging() {
    let _ = env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .format_module_path(false)
        .try_init();
}

/// Wire the Kube Adapter (C9) to the core (C1-C7) and run until a shutdown
/// signal is received.
async fn run_async(settings: config::Settings) -> anyhow::Result<()> {
    let cluster_config = ClusterConfig::from_in_cluster_env()?;
    let kube_client = Arc::new(KubeClient::new(cluster_config)?);
    let metadata_keys = Arc::new(NodeMetadataKeys::default());
    let store = KubeNodeStore::new(kube_client.clone(), metadata_keys.clone());
    let operator = Arc::new(KubeOperator::new(kube_client, metadata_keys));

    let (cancel_tx, cancel_rx) = watch::channel(false);

    let (manager, input_tx) = ActionManager::new(
        settings.queue_config(),
        cancel_rx.clone(),
        store.clone() as Arc<dyn NodeStore>,
        operator.clone() as Arc<dyn NodeOperator>,
        operator as Arc<dyn IntentPublisher>,
        Box::new(RandomDropDecision),
    );

    let intake = Arc::new(intake::EventIntake::new(input_tx, settings.liveness_threshold));
    let store_task = tokio::spawn(store.run(intake, cancel_rx.clone(), RELIST_INTERVAL));

    let metrics_task = match metrics::MetricsService::bind_socket() {
        Ok(service) => Some(tokio::spawn(service.run(cancel_rx))),
        Err(e) => {
            log::warn!("metrics service disabled: {}", e);
            None
        }
    };

    tokio::spawn(signal_task(cancel_tx));

    manager.run().await;

    store_task.abort();
    if let Some(t) = metrics_task {
        t.abort();
    }

    Ok(())
}

/// Wait for SIGTERM/SIGINT and signal the rest of the runtime to shut down.
async fn signal_task(cancel_tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                let _ = cancel_tx.send(true);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    log::info!("shutdown signal received, draining in-flight work");
    let _ = cancel_tx.send(true);
}

/// Pretty-print a chain of errors, as a series of error-priority log messages.
fn log_error_chain(err: &anyhow::Error) {
    log::error!("critical error: {}", err);
    for cause in err.chain().skip(1) {
        log::error!(" -> {}", cause);
    }
}
