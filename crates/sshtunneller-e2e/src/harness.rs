//! Shared setup for E2E tests
//!
//! Builds the environment a tunnel would see inside its container, pointing
//! at a [`MockSshServer`] and forwarding to a [`MockTcpService`].

use std::path::PathBuf;
use std::time::Duration;

use sshtunneller::{
    MapEnv, LOCAL_BIND_ADDRESSES, REMOTE_BIND_ADDRESSES, SSH_HOST, SSH_PASSWORD, SSH_PORT,
    SSH_PRIVATE_KEY_PASSWORD, SSH_USERNAME,
};

use crate::mock_ssh_server::MockSshServer;
use crate::mock_tcp_service::MockTcpService;

pub const USERNAME: &str = "tunnel";
pub const PASSWORD: &str = "hunter2";
/// Passphrase of `fixtures/client_ed25519_locked`
pub const LOCKED_KEY_PASSPHRASE: &str = "correct horse";

/// Poll interval short enough to keep the tests quick
pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Initialize tracing for tests (ignored if already installed)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sshtunneller=debug,sshtunneller_e2e=debug")
        .with_test_writer()
        .try_init();
}

/// Absolute path of a committed fixture
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

/// A loopback port nothing is listening on
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind probe port");
    listener.local_addr().unwrap().port()
}

/// Environment for a tunnel from `local_port` through `server` to `service`
pub fn tunnel_env(server: &MockSshServer, service: &MockTcpService, local_port: u16) -> MapEnv {
    MapEnv::new()
        .with(SSH_HOST, "127.0.0.1")
        .with(SSH_PORT, server.port().to_string())
        .with(SSH_USERNAME, USERNAME)
        .with(
            REMOTE_BIND_ADDRESSES,
            format!("[('127.0.0.1', {})]", service.port()),
        )
        .with(
            LOCAL_BIND_ADDRESSES,
            format!("[('127.0.0.1', {})]", local_port),
        )
}

/// [`tunnel_env`] with password authentication
pub fn password_env(server: &MockSshServer, service: &MockTcpService, local_port: u16) -> MapEnv {
    tunnel_env(server, service, local_port).with(SSH_PASSWORD, PASSWORD)
}

/// [`tunnel_env`] with the passphrase for the locked key
pub fn locked_key_env(
    server: &MockSshServer,
    service: &MockTcpService,
    local_port: u16,
) -> MapEnv {
    tunnel_env(server, service, local_port).with(SSH_PRIVATE_KEY_PASSWORD, LOCKED_KEY_PASSPHRASE)
}
