//! Echo service standing behind the tunnel
//!
//! Health probes connect and close without writing, so only connections
//! that carried data are recorded.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

type Payloads = Arc<RwLock<Vec<Vec<u8>>>>;

pub struct MockTcpService {
    addr: SocketAddr,
    payloads: Payloads,
    accept_task: Option<JoinHandle<()>>,
}

impl MockTcpService {
    /// Start on an ephemeral loopback port
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock TCP service");
        let addr = listener.local_addr().unwrap();
        let payloads = Payloads::default();

        let accept_task = tokio::spawn(serve(listener, payloads.clone()));
        Self {
            addr,
            payloads,
            accept_task: Some(accept_task),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// What each finished, non-empty connection sent
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.payloads.read().clone()
    }

    /// Close the listener; the port refuses connections once this returns
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            // Wait for the listener to be dropped with the task
            let _ = task.await;
        }
    }
}

impl Drop for MockTcpService {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

async fn serve(listener: TcpListener, payloads: Payloads) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(echo(stream, payloads.clone()));
            }
            Err(e) => {
                tracing::warn!("Mock TCP service stopped accepting: {}", e);
                return;
            }
        }
    }
}

async fn echo(mut stream: TcpStream, payloads: Payloads) {
    let mut seen = Vec::new();
    let mut buf = [0u8; 4096];

    while let Ok(n) = stream.read(&mut buf).await {
        if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
            break;
        }
        seen.extend_from_slice(&buf[..n]);
    }

    if !seen.is_empty() {
        payloads.write().push(seen);
    }
}
