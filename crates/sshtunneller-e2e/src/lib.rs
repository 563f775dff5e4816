//! End-to-end test utilities for sshtunneller
//!
//! A real SSH server and a target service, both in-process, so the tunnel
//! can be exercised through its full lifecycle without external hosts.

pub mod harness;
pub mod mock_ssh_server;
pub mod mock_tcp_service;

pub use mock_ssh_server::{Credentials, MockSshServer, ServerStats};
pub use mock_tcp_service::MockTcpService;
