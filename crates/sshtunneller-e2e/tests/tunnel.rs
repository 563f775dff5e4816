//! Tunnel lifecycle end-to-end tests

use std::net::SocketAddr;
use std::time::Duration;

use sshtunneller::{
    DiagnosticSink, ExitStatus, ForwardStatus, LoggingConfig, MapEnv, SshTunnel, TunnelConfig,
    Tunneller, SSH_PASSWORD,
};
use sshtunneller_e2e::harness::{
    fixture_path, free_port, init_test, locked_key_env, password_env, tunnel_env, PASSWORD,
    TEST_POLL_INTERVAL, USERNAME,
};
use sshtunneller_e2e::{Credentials, MockSshServer, MockTcpService};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const EXIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Send `payload` through `addr` and return what came back
async fn echo_through(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr)
        .await
        .expect("Failed to connect to tunnel port");
    stream.write_all(payload).await.expect("Failed to write");
    stream.flush().await.expect("Failed to flush");

    let mut buf = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("Read timeout")
        .expect("Failed to read echo response");
    buf
}

/// Wait until the local end of the tunnel accepts connections
async fn wait_for_listener(port: u16) {
    for _ in 0..100 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("Tunnel never listened on port {}", port);
}

/// Run a full tunnel lifetime in the background. Dropping the returned
/// sender stops it with [`ExitStatus::Interrupted`].
fn spawn_tunneller(
    env: MapEnv,
    key_path: std::path::PathBuf,
) -> (JoinHandle<ExitStatus>, oneshot::Sender<()>) {
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let tunneller = Tunneller::new(LoggingConfig::default())
            .with_key_path(key_path)
            .with_poll_interval(TEST_POLL_INTERVAL);
        tunneller
            .run_until(&env, async move {
                let _ = stop_rx.await;
            })
            .await
    });
    (handle, stop_tx)
}

async fn exit_status(handle: JoinHandle<ExitStatus>) -> ExitStatus {
    tokio::time::timeout(EXIT_TIMEOUT, handle)
        .await
        .expect("Tunnel did not exit in time")
        .expect("Tunnel task panicked")
}

#[tokio::test]
async fn test_password_tunnel_relays_data() {
    init_test();

    let server = MockSshServer::start(Credentials::password(USERNAME, PASSWORD)).await;
    let service = MockTcpService::start().await;
    let env = password_env(&server, &service, 0);
    let dir = tempfile::tempdir().unwrap();

    let config = TunnelConfig::resolve(&env, &dir.path().join("private.key"))
        .expect("Failed to resolve config");
    let mut tunnel = SshTunnel::open(&config, DiagnosticSink::new())
        .await
        .expect("Failed to open tunnel");

    let local = tunnel.bound_addresses()[0];
    assert_ne!(local.port(), 0);

    let echoed = echo_through(local, b"Hello through the SSH tunnel!").await;
    assert_eq!(echoed, b"Hello through the SSH tunnel!");

    let status = tunnel.check_forwards().await;
    assert_eq!(status.len(), 1);
    assert_eq!(status.get(&0), Some(&true));

    tunnel.close().await;
    tunnel.close().await;
    assert!(tunnel.is_closed());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(service
        .received()
        .contains(&b"Hello through the SSH tunnel!".to_vec()));
    assert_eq!(server.stats().auth_failures, 0);
}

#[tokio::test]
async fn test_multiple_forwards() {
    init_test();

    let server = MockSshServer::start(Credentials::password(USERNAME, PASSWORD)).await;
    let first = MockTcpService::start().await;
    let second = MockTcpService::start().await;
    let env = password_env(&server, &first, 0)
        .with(
            sshtunneller::REMOTE_BIND_ADDRESSES,
            format!(
                "[('127.0.0.1', {}), ('127.0.0.1', {})]",
                first.port(),
                second.port()
            ),
        )
        .with(
            sshtunneller::LOCAL_BIND_ADDRESSES,
            "[('127.0.0.1', 0), ('127.0.0.1', 0)]",
        );
    let dir = tempfile::tempdir().unwrap();

    let config = TunnelConfig::resolve(&env, &dir.path().join("private.key")).unwrap();
    let mut tunnel = SshTunnel::open(&config, DiagnosticSink::new()).await.unwrap();
    let bound = tunnel.bound_addresses();
    assert_eq!(bound.len(), 2);

    assert_eq!(echo_through(bound[0], b"first").await, b"first");
    assert_eq!(echo_through(bound[1], b"second").await, b"second");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(first.received().contains(&b"first".to_vec()));
    assert!(second.received().contains(&b"second".to_vec()));

    tunnel.close().await;
}

#[tokio::test]
async fn test_dropped_tunnel_ends_open_connections() {
    init_test();

    let server = MockSshServer::start(Credentials::password(USERNAME, PASSWORD)).await;
    let service = MockTcpService::start().await;
    let env = password_env(&server, &service, 0);
    let dir = tempfile::tempdir().unwrap();

    let config = TunnelConfig::resolve(&env, &dir.path().join("private.key")).unwrap();
    let tunnel = SshTunnel::open(&config, DiagnosticSink::new()).await.unwrap();

    let mut stream = TcpStream::connect(tunnel.bound_addresses()[0]).await.unwrap();
    stream.write_all(b"before drop").await.unwrap();
    let mut buf = [0u8; 11];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("Read timeout")
        .unwrap();
    assert_eq!(&buf, b"before drop");

    // No close(): dropping alone must tear down the relayed connection
    drop(tunnel);
    let mut rest = Vec::new();
    let ended = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest)).await;
    assert!(ended.is_ok(), "Relayed connection outlived the tunnel");
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_wrong_password_is_session_failure() {
    init_test();

    let server = MockSshServer::start(Credentials::password(USERNAME, PASSWORD)).await;
    let service = MockTcpService::start().await;
    let local_port = free_port();
    let env = password_env(&server, &service, local_port).with(SSH_PASSWORD, "wrong");
    let dir = tempfile::tempdir().unwrap();

    let (handle, _stop) = spawn_tunneller(env, dir.path().join("private.key"));
    assert_eq!(exit_status(handle).await, ExitStatus::SessionFailed);
    assert!(server.stats().auth_failures >= 1);
}

#[tokio::test]
async fn test_key_authentication() {
    init_test();

    let server = MockSshServer::start(Credentials::fixture_keys(USERNAME)).await;
    let service = MockTcpService::start().await;
    let env = tunnel_env(&server, &service, 0);

    let config = TunnelConfig::resolve(&env, &fixture_path("client_ed25519")).unwrap();
    let mut tunnel = SshTunnel::open(&config, DiagnosticSink::new())
        .await
        .expect("Key authentication failed");

    let echoed = echo_through(tunnel.bound_addresses()[0], b"keyed").await;
    assert_eq!(echoed, b"keyed");
    tunnel.close().await;
}

#[tokio::test]
async fn test_locked_key_with_passphrase() {
    init_test();

    let server = MockSshServer::start(Credentials::fixture_keys(USERNAME)).await;
    let service = MockTcpService::start().await;
    let env = locked_key_env(&server, &service, 0);

    let config = TunnelConfig::resolve(&env, &fixture_path("client_ed25519_locked")).unwrap();
    let mut tunnel = SshTunnel::open(&config, DiagnosticSink::new())
        .await
        .expect("Authentication with the locked key failed");

    let echoed = echo_through(tunnel.bound_addresses()[0], b"unlocked").await;
    assert_eq!(echoed, b"unlocked");
    tunnel.close().await;
}

#[tokio::test]
async fn test_locked_key_without_passphrase_is_session_failure() {
    init_test();

    let server = MockSshServer::start(Credentials::fixture_keys(USERNAME)).await;
    let service = MockTcpService::start().await;
    let env = tunnel_env(&server, &service, free_port());

    let (handle, _stop) = spawn_tunneller(env, fixture_path("client_ed25519_locked"));
    assert_eq!(exit_status(handle).await, ExitStatus::SessionFailed);
}

#[tokio::test]
async fn test_local_port_in_use_is_session_failure() {
    init_test();

    let server = MockSshServer::start(Credentials::password(USERNAME, PASSWORD)).await;
    let service = MockTcpService::start().await;
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let env = password_env(&server, &service, occupied.local_addr().unwrap().port());
    let dir = tempfile::tempdir().unwrap();

    let (handle, _stop) = spawn_tunneller(env, dir.path().join("private.key"));
    assert_eq!(exit_status(handle).await, ExitStatus::SessionFailed);
}

#[tokio::test]
async fn test_remote_unreachable_ends_tunnel() {
    init_test();

    let server = MockSshServer::start(Credentials::password(USERNAME, PASSWORD)).await;
    let mut service = MockTcpService::start().await;
    let local_port = free_port();
    let env = password_env(&server, &service, local_port);
    let dir = tempfile::tempdir().unwrap();

    let (handle, _stop) = spawn_tunneller(env, dir.path().join("private.key"));
    wait_for_listener(local_port).await;

    // Healthy for a few polls
    tokio::time::sleep(TEST_POLL_INTERVAL * 3).await;
    assert!(!handle.is_finished());

    service.shutdown().await;
    assert_eq!(exit_status(handle).await, ExitStatus::RemoteUnreachable);
    assert!(server.stats().channels_refused >= 1);

    // Listener is released on the way out
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(("127.0.0.1", local_port)).await.is_err());
}

#[tokio::test]
async fn test_dead_session_ends_tunnel() {
    init_test();

    let mut server = MockSshServer::start(Credentials::password(USERNAME, PASSWORD)).await;
    let service = MockTcpService::start().await;
    let local_port = free_port();
    let env = password_env(&server, &service, local_port);
    let dir = tempfile::tempdir().unwrap();

    let (handle, _stop) = spawn_tunneller(env, dir.path().join("private.key"));
    wait_for_listener(local_port).await;
    tokio::time::sleep(TEST_POLL_INTERVAL * 3).await;
    assert!(!handle.is_finished());

    server.shutdown();
    assert_eq!(exit_status(handle).await, ExitStatus::TunnelDead);
}

#[tokio::test]
async fn test_shutdown_interrupts_healthy_tunnel() {
    init_test();

    let server = MockSshServer::start(Credentials::password(USERNAME, PASSWORD)).await;
    let service = MockTcpService::start().await;
    let local_port = free_port();
    let env = password_env(&server, &service, local_port);
    let dir = tempfile::tempdir().unwrap();

    let (handle, stop) = spawn_tunneller(env, dir.path().join("private.key"));
    wait_for_listener(local_port).await;

    let echoed = echo_through(SocketAddr::from(([127, 0, 0, 1], local_port)), b"still up").await;
    assert_eq!(echoed, b"still up");

    drop(stop);
    assert_eq!(exit_status(handle).await, ExitStatus::Interrupted);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(("127.0.0.1", local_port)).await.is_err());
}
