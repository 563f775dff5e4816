//! One tunnel lifetime: configure, connect, monitor, tear down

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::bind::format_bind_addresses;
use crate::config::{TunnelConfig, DEFAULT_PRIVATE_KEY_PATH};
use crate::diagnostics::DiagnosticSink;
use crate::env::EnvSource;
use crate::exit::ExitStatus;
use crate::health::{HealthMonitor, DEFAULT_POLL_INTERVAL};
use crate::logging::LoggingConfig;
use crate::session::SshTunnel;

pub struct Tunneller {
    logging: LoggingConfig,
    key_path: PathBuf,
    poll_interval: Duration,
}

impl Tunneller {
    pub fn new(logging: LoggingConfig) -> Self {
        Self {
            logging,
            key_path: PathBuf::from(DEFAULT_PRIVATE_KEY_PATH),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Look for the private key somewhere other than `/private.key`
    pub fn with_key_path(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.key_path = key_path.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run until the tunnel fails or the process is signalled
    pub async fn run(&self, env: &impl EnvSource) -> ExitStatus {
        self.run_until(env, shutdown_signal()).await
    }

    /// Run until the tunnel fails or `shutdown` completes.
    ///
    /// Never returns while the tunnel is healthy; every return is logged with
    /// `SSH Tunnel ended` after the session has been torn down.
    pub async fn run_until<F>(&self, env: &impl EnvSource, shutdown: F) -> ExitStatus
    where
        F: Future<Output = ()>,
    {
        let sink = DiagnosticSink::new();
        if let Err(e) = self.logging.install(sink.clone()) {
            // Already installed by an embedding process or an earlier run
            tracing::debug!("Logging not installed: {}", e);
        }

        let status = self.supervise(env, sink, shutdown).await;
        tracing::warn!("SSH Tunnel ended");
        status
    }

    async fn supervise<F>(
        &self,
        env: &impl EnvSource,
        sink: DiagnosticSink,
        shutdown: F,
    ) -> ExitStatus
    where
        F: Future<Output = ()>,
    {
        tracing::info!("SSH Tunnel starting...");

        let config = match TunnelConfig::resolve(env, &self.key_path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("SSH Tunnel Failed {}", e);
                return e.exit_status();
            }
        };
        tracing::debug!("SSH Tunnel parameters: {}", config.dump());

        let mut tunnel = match SshTunnel::open(&config, sink.clone()).await {
            Ok(tunnel) => tunnel,
            Err(e) => {
                tracing::error!("SSH Tunnel Failed {}", e);
                return ExitStatus::SessionFailed;
            }
        };
        tracing::info!(
            "SSH Tunnels established on {}@{}: remote_bind_addresses: {}, local_bind_addresses: {}",
            config.username,
            config.remote_host,
            format_bind_addresses(&config.remote_bind_addresses),
            format_bind_addresses(&config.local_bind_addresses)
        );

        let monitor = HealthMonitor::new(sink).with_interval(self.poll_interval);
        let status = tokio::select! {
            status = monitor.watch(&tunnel) => status,
            _ = shutdown => {
                tracing::info!("Shutdown signal received, closing tunnel");
                ExitStatus::Interrupted
            }
        };

        tunnel.close().await;
        status
    }
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
