//! Metrics endpoint over a Unix-domain socket.
//!
//! Every connection gets the current Prometheus registry, gathered and
//! text-encoded fresh, written once and the stream closed — the same
//! exposition shape the teacher lineage uses, just driven by a plain async
//! accept loop instead of an actor, since this crate does not carry an
//! actor-framework dependency.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::net::UnixListener;
use tokio::sync::watch;

/// Default Unix-domain socket path.
static SOCKET_PATH: &str = "/run/dogswatch/public/metrics.promsock";

/// Metrics exposition service.
#[derive(Debug)]
pub struct MetricsService {
    listener: UnixListener,
}

impl MetricsService {
    /// Bind the metrics service to its default Unix-domain socket.
    pub fn bind_socket() -> Result<Self> {
        Self::bind_socket_at(SOCKET_PATH)
            .with_context(|| format!("failed to setup metrics service on '{}'", SOCKET_PATH))
    }

    pub(crate) fn bind_socket_at(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::remove_file(path.as_ref()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                bail!("failed to remove socket file: {}", e);
            }
        };
        let listener = UnixListener::bind(path.as_ref())
            .context("failed to bind metrics service to Unix socket")?;
        Ok(Self { listener })
    }

    /// Accept connections and serve the current Prometheus registry on each
    /// until `cancel` fires.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;

                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow_and_update() {
                        log::debug!("metrics service: cancellation received, exiting");
                        return;
                    }
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((mut stream, _addr)) => {
                            tokio::spawn(async move {
                                use tokio::io::AsyncWriteExt;
                                match Self::prometheus_text_encode() {
                                    Ok(body) => {
                                        if let Err(e) = stream.write_all(&body).await {
                                            log::warn!("metrics service: failed to write response: {}", e);
                                        }
                                    }
                                    Err(e) => log::warn!("metrics service: failed to encode metrics: {}", e),
                                }
                            });
                        }
                        Err(e) => log::warn!("metrics service: failed to accept connection: {}", e),
                    }
                }
            }
        }
    }

    /// Gather metrics from the default registry and encode them in textual format.
    fn prometheus_text_encode() -> Result<Vec<u8>> {
        use prometheus::Encoder;

        let metric_families = prometheus::gather();
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}
