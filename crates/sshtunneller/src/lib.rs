//! SSH tunnel supervisor
//!
//! Opens one SSH session from environment configuration, forwards each local
//! bind address to its paired remote address, and exits with a distinct
//! status as soon as the tunnel stops being usable. Restarting is left to the
//! process supervisor (Docker's restart policy, systemd, ...), so a failed
//! tunnel always comes back as a fresh session.
//!
//! The library is used by the `sshtunneller` binary and by the end-to-end
//! tests, which drive [`Tunneller`] and [`SshTunnel`] against a mock server.

mod auth;
mod bind;
mod config;
mod diagnostics;
mod env;
mod error;
mod exit;
mod forwarder;
mod health;
mod lifecycle;
mod logging;
mod session;

pub use auth::{is_no_passphrase, select_auth, AuthMode, NO_PASSPHRASE_SENTINEL};
pub use bind::{format_bind_addresses, parse_bind_addresses, BindAddress, LiteralError};
pub use config::{
    TunnelConfig, DEFAULT_PRIVATE_KEY_PATH, KEEPALIVE_INTERVAL_SECS, LOCAL_BIND_ADDRESSES,
    REMOTE_BIND_ADDRESSES, SSH_HOST, SSH_PASSWORD, SSH_PORT, SSH_PRIVATE_KEY_PASSWORD,
    SSH_USERNAME,
};
pub use diagnostics::{DiagnosticLayer, DiagnosticSink, REMOTE_SIDE_MARKER};
pub use env::{EnvSource, MapEnv, ProcessEnv};
pub use error::{ConfigError, SessionError};
pub use exit::ExitStatus;
pub use health::{HealthAction, HealthMonitor, HealthSignal, DEFAULT_POLL_INTERVAL};
pub use lifecycle::Tunneller;
pub use logging::{parse_level, LogFormat, LoggingConfig};
pub use session::{ForwardStatus, SshTunnel, TunnelHandler};
