//! The authenticated SSH session and its forwards

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::ssh_key::HashAlg;
use russh::keys::PublicKey;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use crate::auth::AuthMode;
use crate::bind::BindAddress;
use crate::config::TunnelConfig;
use crate::diagnostics::DiagnosticSink;
use crate::error::SessionError;
use crate::forwarder::LocalForwarder;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const KEEPALIVE_MAX: usize = 3;
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-forward up/down status, keyed by forward index
#[async_trait]
pub trait ForwardStatus: Send + Sync {
    async fn check_forwards(&self) -> BTreeMap<usize, bool>;
}

/// Client callbacks for russh.
///
/// Host keys are accepted unconditionally and their fingerprint logged; the
/// tunnel runs unattended and has nowhere to persist a known_hosts file.
pub struct TunnelHandler {
    host: String,
    port: u16,
}

impl client::Handler for TunnelHandler {
    type Error = SessionError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::info!(
            "Accepting host key for {}:{} ({})",
            self.host,
            self.port,
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}

struct Forward {
    index: usize,
    local: BindAddress,
    remote: BindAddress,
    bound_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// A live tunnel: one SSH connection and one listener per forward.
///
/// Dropping the tunnel aborts every forwarder along with the connections it
/// is relaying; [`SshTunnel::close`] also disconnects the session politely.
pub struct SshTunnel {
    handle: Arc<Handle<TunnelHandler>>,
    forwards: Vec<Forward>,
    closed: bool,
}

impl SshTunnel {
    /// Connect, authenticate and start every forward in `config`
    pub async fn open(config: &TunnelConfig, sink: DiagnosticSink) -> Result<Self, SessionError> {
        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(config.keepalive_interval_secs)),
            keepalive_max: KEEPALIVE_MAX,
            ..Default::default()
        };
        let handler = TunnelHandler {
            host: config.remote_host.clone(),
            port: config.remote_port,
        };

        tracing::debug!("Connecting to SSH server at {}", config.remote_addr);
        let mut handle = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client::connect(Arc::new(ssh_config), config.remote_addr, handler),
        )
        .await
        .map_err(|_| {
            SessionError::Timeout(format!(
                "no SSH handshake with {} within {}s",
                config.remote_addr,
                CONNECT_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| SessionError::ConnectionFailed(format!("{}: {}", config.remote_addr, e)))?;

        authenticate(&mut handle, &config.username, &config.auth).await?;
        tracing::debug!("SSH authentication successful as {}", config.username);

        let mut tunnel = Self {
            handle: Arc::new(handle),
            forwards: Vec::with_capacity(config.local_bind_addresses.len()),
            closed: false,
        };

        // On error the partially built tunnel is dropped, aborting any
        // forwarders already started.
        for (index, (remote, local)) in config.forwards().enumerate() {
            let forwarder = LocalForwarder::new(
                index,
                local.clone(),
                remote.clone(),
                tunnel.handle.clone(),
                sink.clone(),
            );
            let listener = forwarder.bind().await?;
            let bound_addr = listener.local_addr()?;
            tracing::debug!("Forward {}: {} -> {}", index, bound_addr, remote);

            tunnel.forwards.push(Forward {
                index,
                local: local.clone(),
                remote: remote.clone(),
                bound_addr,
                task: tokio::spawn(forwarder.run(listener)),
            });
        }

        Ok(tunnel)
    }

    /// Addresses the local listeners actually bound, in forward order
    pub fn bound_addresses(&self) -> Vec<SocketAddr> {
        self.forwards.iter().map(|f| f.bound_addr).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed || self.handle.is_closed()
    }

    /// Stop every forwarder and disconnect. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        for forward in &self.forwards {
            forward.task.abort();
        }
        if !self.handle.is_closed() {
            if let Err(e) = self
                .handle
                .disconnect(russh::Disconnect::ByApplication, "tunnel closed", "en")
                .await
            {
                tracing::debug!("SSH disconnect: {}", e);
            }
        }
        tracing::debug!("Closed {} forwards", self.forwards.len());
    }

    async fn forward_is_up(&self, forward: &Forward) -> bool {
        if forward.task.is_finished() {
            tracing::debug!("Forward {}: listener task has exited", forward.index);
            return false;
        }

        let target = probe_addr(forward.bound_addr);
        match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(
                    "Forward {} ({} -> {}): probe failed: {}",
                    forward.index,
                    forward.local,
                    forward.remote,
                    e
                );
                false
            }
            Err(_) => {
                tracing::debug!("Forward {}: probe timed out", forward.index);
                false
            }
        }
    }
}

#[async_trait]
impl ForwardStatus for SshTunnel {
    /// A forward is up while the session is open, its listener is running,
    /// and its local address accepts a connection. The probe connection is
    /// relayed like any other, so a refusing remote target shows up as a
    /// diagnostic on the next poll.
    async fn check_forwards(&self) -> BTreeMap<usize, bool> {
        let session_open = !self.is_closed();
        if !session_open {
            tracing::debug!("SSH session is closed");
        }

        let mut status = BTreeMap::new();
        for forward in &self.forwards {
            let up = session_open && self.forward_is_up(forward).await;
            status.insert(forward.index, up);
        }
        status
    }
}

impl Drop for SshTunnel {
    fn drop(&mut self) {
        for forward in &self.forwards {
            forward.task.abort();
        }
    }
}

async fn authenticate(
    handle: &mut Handle<TunnelHandler>,
    username: &str,
    auth: &AuthMode,
) -> Result<(), SessionError> {
    let result = match auth {
        AuthMode::Password { password } => {
            handle
                .authenticate_password(username, password)
                .await
                .map_err(|e| SessionError::AuthenticationFailed(e.to_string()))?
        }
        AuthMode::Key {
            key_path,
            passphrase,
        } => {
            let key = russh::keys::load_secret_key(key_path, passphrase.as_deref())?;
            let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);
            handle
                .authenticate_publickey(username, key_with_hash)
                .await
                .map_err(|e| SessionError::AuthenticationFailed(e.to_string()))?
        }
    };

    if !result.success() {
        return Err(SessionError::AuthenticationFailed(format!(
            "{} authentication for '{}' rejected by server",
            auth.name(),
            username
        )));
    }
    Ok(())
}

/// Where to connect to reach a listener; wildcard binds are probed on loopback
fn probe_addr(bound: SocketAddr) -> SocketAddr {
    match bound.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), bound.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), bound.port())
        }
        _ => bound,
    }
}
