use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::DaemonError;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// One bounded TCP connect to `host:port`.
pub async fn probe_once(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            tracing::debug!(host, port, error = %err, "reachability probe failed");
            false
        }
        Err(_) => {
            tracing::debug!(host, port, "reachability probe timed out");
            false
        }
    }
}

/// Periodic probe of the gateway host, published on a `watch<bool>`.
#[derive(Debug, Clone)]
pub struct ReachabilityProbe {
    host: String,
    port: u16,
    interval: Duration,
    timeout: Duration,
}

impl ReachabilityProbe {
    pub fn new(host: impl Into<String>, port: u16, interval: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            interval,
            timeout: DEFAULT_PROBE_TIMEOUT.min(interval),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe once to seed the channel, then keep probing until shutdown.
    pub async fn start(
        self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> (watch::Receiver<bool>, JoinHandle<Result<(), DaemonError>>) {
        let initial = probe_once(&self.host, self.port, self.timeout).await;
        tracing::info!(host = %self.host, port = self.port, reachable = initial, "reachability probe started");
        let (tx, rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {
                        let reachable = probe_once(&self.host, self.port, self.timeout).await;
                        tx.send_if_modified(|current| {
                            if *current == reachable {
                                return false;
                            }
                            tracing::info!(reachable, "reachability changed");
                            *current = reachable;
                            true
                        });
                    }
                }
            }
            Ok(())
        });

        (rx, task)
    }
}
