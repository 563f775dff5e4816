//! Mock SSH server for E2E tests
//!
//! Accepts password or public-key logins for a single user and serves
//! `direct-tcpip` channels by connecting to the requested target and
//! relaying bytes. Shutting the server down drops every live session, which
//! the tunnel sees as a dead connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use russh::keys::ssh_key::PublicKey;
use russh::server::{self, Auth, Msg, Session};
use russh::Channel;
use tokio::io::{copy_bidirectional, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const HOST_KEY: &str = include_str!("../fixtures/host_ed25519");
const CLIENT_PUBLIC_KEY: &str = include_str!("../fixtures/client_ed25519.pub");
const LOCKED_CLIENT_PUBLIC_KEY: &str = include_str!("../fixtures/client_ed25519_locked.pub");
const TRANSPORT_BUFFER: usize = 64 * 1024;

/// Logins the server accepts
#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
    pub authorized_keys: Vec<PublicKey>,
}

impl Credentials {
    pub fn password(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: Some(password.to_string()),
            authorized_keys: Vec::new(),
        }
    }

    /// Accept both committed client keys
    pub fn fixture_keys(username: &str) -> Self {
        let authorized_keys = [CLIENT_PUBLIC_KEY, LOCKED_CLIENT_PUBLIC_KEY]
            .iter()
            .map(|k| PublicKey::from_openssh(k.trim()).expect("Invalid fixture public key"))
            .collect();
        Self {
            username: username.to_string(),
            password: None,
            authorized_keys,
        }
    }
}

/// Counters observable from tests
#[derive(Clone, Debug, Default)]
pub struct ServerStats {
    pub sessions: usize,
    pub auth_failures: usize,
    pub channels_opened: usize,
    pub channels_refused: usize,
}

type TaskList = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// A running mock SSH server
pub struct MockSshServer {
    addr: SocketAddr,
    stats: Arc<Mutex<ServerStats>>,
    tasks: TaskList,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockSshServer {
    /// Start on an ephemeral loopback port
    pub async fn start(credentials: Credentials) -> Self {
        let host_key =
            russh::keys::decode_secret_key(HOST_KEY, None).expect("Invalid fixture host key");
        let config = Arc::new(server::Config {
            keys: vec![host_key],
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::ZERO),
            inactivity_timeout: None,
            ..Default::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock SSH server");
        let addr = listener.local_addr().unwrap();

        let stats = Arc::new(Mutex::new(ServerStats::default()));
        let tasks: TaskList = Arc::new(Mutex::new(Vec::new()));
        let credentials = Arc::new(credentials);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let accept_stats = stats.clone();
        let accept_tasks = tasks.clone();
        let accept_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Mock SSH server shutting down");
                        break;
                    }
                    result = listener.accept() => {
                        let (stream, peer_addr) = match result {
                            Ok(accepted) => accepted,
                            Err(e) => {
                                tracing::error!("Mock SSH accept error: {}", e);
                                break;
                            }
                        };
                        accept_stats.lock().sessions += 1;

                        let handler = SessionHandler {
                            credentials: credentials.clone(),
                            stats: accept_stats.clone(),
                            tasks: accept_tasks.clone(),
                        };
                        // russh drives the session on a task of its own, so the
                        // socket stays with a relay we can abort on shutdown.
                        let (session_end, transport_end) = tokio::io::duplex(TRANSPORT_BUFFER);
                        let transport = tokio::spawn(carry_transport(stream, transport_end));
                        accept_tasks.lock().push(transport);

                        let config = config.clone();
                        let session = tokio::spawn(async move {
                            match server::run_stream(config, session_end, handler).await {
                                Ok(running) => {
                                    if let Err(e) = running.await {
                                        tracing::debug!("Mock SSH session {} ended: {}", peer_addr, e);
                                    }
                                }
                                Err(e) => tracing::debug!("Mock SSH handshake with {} failed: {}", peer_addr, e),
                            }
                        });
                        accept_tasks.lock().push(session);
                    }
                }
            }
        });
        tasks.lock().push(accept_loop);

        Self {
            addr,
            stats,
            tasks,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn stats(&self) -> ServerStats {
        self.stats.lock().clone()
    }

    /// Stop accepting and drop every live session and relay
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Shuttle bytes between a client socket and its session; aborting this
/// closes the socket
async fn carry_transport(mut socket: TcpStream, mut session_end: DuplexStream) {
    if let Err(e) = copy_bidirectional(&mut socket, &mut session_end).await {
        tracing::debug!("Mock SSH transport ended: {}", e);
    }
}

impl Drop for MockSshServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct SessionHandler {
    credentials: Arc<Credentials>,
    stats: Arc<Mutex<ServerStats>>,
    tasks: TaskList,
}

impl SessionHandler {
    fn reject(&self) -> Auth {
        self.stats.lock().auth_failures += 1;
        Auth::reject()
    }
}

impl server::Handler for SessionHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let accepted = user == self.credentials.username
            && self.credentials.password.as_deref() == Some(password);
        Ok(if accepted { Auth::Accept } else { self.reject() })
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let accepted = user == self.credentials.username
            && self
                .credentials
                .authorized_keys
                .iter()
                .any(|k| k.key_data() == public_key.key_data());
        Ok(if accepted { Auth::Accept } else { self.reject() })
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let target = format!("{}:{}", host_to_connect, port_to_connect);
        let mut upstream = match TcpStream::connect(&target).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!("Mock SSH refusing channel to {}: {}", target, e);
                self.stats.lock().channels_refused += 1;
                return Ok(false);
            }
        };
        self.stats.lock().channels_opened += 1;

        let relay = tokio::spawn(async move {
            let mut channel_stream = channel.into_stream();
            let _ = copy_bidirectional(&mut upstream, &mut channel_stream).await;
        });
        self.tasks.lock().push(relay);
        Ok(true)
    }
}
