use std::net::SocketAddr;
use std::sync::Arc;

use russh::client::Handle;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;

use crate::bind::BindAddress;
use crate::diagnostics::{DiagnosticSink, REMOTE_SIDE_MARKER};
use crate::error::SessionError;
use crate::session::TunnelHandler;

/// Accepts connections on one local address and relays each through its own
/// `direct-tcpip` channel to the paired remote address
pub struct LocalForwarder {
    index: usize,
    local: BindAddress,
    remote: BindAddress,
    handle: Arc<Handle<TunnelHandler>>,
    sink: DiagnosticSink,
}

impl LocalForwarder {
    pub fn new(
        index: usize,
        local: BindAddress,
        remote: BindAddress,
        handle: Arc<Handle<TunnelHandler>>,
        sink: DiagnosticSink,
    ) -> Self {
        Self {
            index,
            local,
            remote,
            handle,
            sink,
        }
    }

    /// Bind the local listener. Errors are worded for operators, since the
    /// common causes (port taken, privileged port) are environmental.
    pub async fn bind(&self) -> Result<TcpListener, SessionError> {
        let addr = self.local.socket_addr_string();
        TcpListener::bind(&addr).await.map_err(|e| {
            let reason = match e.kind() {
                std::io::ErrorKind::AddrInUse => {
                    "port already in use by another process".to_string()
                }
                std::io::ErrorKind::PermissionDenied => {
                    "permission denied; ports below 1024 require elevated privileges".to_string()
                }
                std::io::ErrorKind::AddrNotAvailable => {
                    "address is not available on this host".to_string()
                }
                _ => e.to_string(),
            };
            SessionError::Bind {
                index: self.index,
                addr,
                reason,
            }
        })
    }

    /// Accept loop; runs until the task is aborted. Relays belong to the
    /// loop, so aborting it also ends every connection it accepted.
    pub async fn run(self, listener: TcpListener) {
        let forwarder = Arc::new(self);
        let mut relays = JoinSet::new();
        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer_addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
                        }
                        let forwarder = forwarder.clone();
                        relays.spawn(async move {
                            forwarder.relay(stream, peer_addr).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("Forward {} accept error: {}", forwarder.index, e);
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                },
                Some(finished) = relays.join_next(), if !relays.is_empty() => {
                    if let Err(e) = finished {
                        tracing::debug!("Forward {}: relay task failed: {}", forwarder.index, e);
                    }
                }
            }
        }
    }

    async fn relay(&self, mut stream: TcpStream, peer_addr: SocketAddr) {
        tracing::debug!(
            "Forward {}: connection from {} -> {}",
            self.index,
            peer_addr,
            self.remote
        );

        let channel = match self
            .handle
            .channel_open_direct_tcpip(
                self.remote.socket_host(),
                u32::from(self.remote.port),
                peer_addr.ip().to_string(),
                u32::from(peer_addr.port()),
            )
            .await
        {
            Ok(channel) => channel,
            Err(russh::Error::ChannelOpenFailure(reason)) => {
                let line = format!(
                    "Could not establish connection from local {} {} ({}): {:?}",
                    self.local, REMOTE_SIDE_MARKER, self.remote, reason
                );
                tracing::error!("{}", line);
                self.sink.record(line);
                return;
            }
            Err(e) => {
                tracing::error!(
                    "Forward {}: SSH session unavailable for {}: {}",
                    self.index,
                    self.remote,
                    e
                );
                return;
            }
        };

        let mut channel_stream = channel.into_stream();
        match copy_bidirectional(&mut stream, &mut channel_stream).await {
            Ok((sent, received)) => tracing::debug!(
                "Forward {}: connection from {} closed ({} bytes sent, {} bytes received)",
                self.index,
                peer_addr,
                sent,
                received
            ),
            Err(e) => tracing::debug!(
                "Forward {}: connection from {} ended: {}",
                self.index,
                peer_addr,
                e
            ),
        }
    }
}
