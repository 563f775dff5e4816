//! Tunnel configuration resolved from the environment
//!
//! | Variable | Required |
//! |---|---|
//! | `ssh_host` | yes |
//! | `ssh_port` | yes |
//! | `ssh_username` | yes |
//! | `ssh_password` | without a private key |
//! | `ssh_private_key_password` | no (`None` or unset for an unencrypted key) |
//! | `remote_bind_addresses` | yes |
//! | `local_bind_addresses` | yes, same length as `remote_bind_addresses` |
//!
//! The two credential variables accept secret references (`env://`,
//! `file://`, `base64://`) as well as literal values.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use serde::Serialize;
use sshtunneller_secrets::{SecretRef, SecretResolver};

use crate::auth::{is_no_passphrase, select_auth, AuthMode};
use crate::bind::{parse_bind_addresses, BindAddress};
use crate::env::EnvSource;
use crate::error::ConfigError;

/// Well-known location of the private key; its existence selects key auth
pub const DEFAULT_PRIVATE_KEY_PATH: &str = "/private.key";

/// Seconds between SSH keep-alive messages
pub const KEEPALIVE_INTERVAL_SECS: u64 = 30;

pub const SSH_HOST: &str = "ssh_host";
pub const SSH_PORT: &str = "ssh_port";
pub const SSH_USERNAME: &str = "ssh_username";
pub const SSH_PASSWORD: &str = "ssh_password";
pub const SSH_PRIVATE_KEY_PASSWORD: &str = "ssh_private_key_password";
pub const REMOTE_BIND_ADDRESSES: &str = "remote_bind_addresses";
pub const LOCAL_BIND_ADDRESSES: &str = "local_bind_addresses";

/// Everything needed to open the tunnel. Built once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelConfig {
    /// Host as given, kept for logs
    pub remote_host: String,
    pub remote_port: u16,
    /// Address `remote_host` resolved to at startup
    pub remote_addr: SocketAddr,
    pub username: String,
    pub auth: AuthMode,
    pub keepalive_interval_secs: u64,
    pub remote_bind_addresses: Vec<BindAddress>,
    pub local_bind_addresses: Vec<BindAddress>,
}

impl TunnelConfig {
    /// Resolve the configuration, looking for key material at `key_path`
    pub fn resolve(env: &impl EnvSource, key_path: &Path) -> Result<Self, ConfigError> {
        let remote_host = required(env, SSH_HOST)?;
        let remote_port = parse_port(&required(env, SSH_PORT)?)?;
        let username = required(env, SSH_USERNAME)?;

        let remote_addr = resolve_host(&remote_host, remote_port)?;
        tracing::debug!("Resolved {} to {}", remote_host, remote_addr);

        let password = secret(env, SSH_PASSWORD)?;
        let passphrase = match env.get(SSH_PRIVATE_KEY_PASSWORD) {
            Some(raw) if is_no_passphrase(&raw) => None,
            Some(_) => secret(env, SSH_PRIVATE_KEY_PASSWORD)?,
            None => None,
        };
        let key_file = key_path.exists().then_some(key_path);
        let auth = select_auth(key_file, password, passphrase)?;

        let remote_bind_addresses = bind_addresses(env, REMOTE_BIND_ADDRESSES)?;
        let local_bind_addresses = bind_addresses(env, LOCAL_BIND_ADDRESSES)?;
        if remote_bind_addresses.len() != local_bind_addresses.len() {
            return Err(ConfigError::BindCountMismatch {
                remote: remote_bind_addresses.len(),
                local: local_bind_addresses.len(),
            });
        }

        Ok(Self {
            remote_host,
            remote_port,
            remote_addr,
            username,
            auth,
            keepalive_interval_secs: KEEPALIVE_INTERVAL_SECS,
            remote_bind_addresses,
            local_bind_addresses,
        })
    }

    /// Forwards as (remote, local) pairs, in order
    pub fn forwards(&self) -> impl Iterator<Item = (&BindAddress, &BindAddress)> {
        self.remote_bind_addresses
            .iter()
            .zip(self.local_bind_addresses.iter())
    }

    /// Pretty dump of every field, credentials included. Only ever logged at
    /// debug level, which operators opt into.
    pub fn dump(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("<unserializable: {}>", e))
    }
}

fn required(env: &impl EnvSource, field: &'static str) -> Result<String, ConfigError> {
    env.non_empty(field).ok_or(ConfigError::missing(field))
}

fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(0) => Err(ConfigError::invalid(SSH_PORT, "port must not be 0")),
        Ok(port) => Ok(port),
        Err(e) => Err(ConfigError::invalid(
            SSH_PORT,
            format!("'{}' is not a port number: {}", raw, e),
        )),
    }
}

fn resolve_host(host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    let resolution_error = |reason: String| ConfigError::HostResolution {
        field: SSH_HOST,
        host: host.to_string(),
        reason,
    };

    (host, port)
        .to_socket_addrs()
        .map_err(|e| resolution_error(e.to_string()))?
        .next()
        .ok_or_else(|| resolution_error("no addresses returned".to_string()))
}

fn secret(env: &impl EnvSource, field: &'static str) -> Result<Option<String>, ConfigError> {
    let Some(raw) = env.non_empty(field) else {
        return Ok(None);
    };
    let reference: SecretRef = raw
        .parse()
        .map_err(|source| ConfigError::Secret { field, source })?;
    SecretResolver::with_lookup(|name| env.get(name))
        .resolve(&reference)
        .map(Some)
        .map_err(|source| ConfigError::Secret { field, source })
}

fn bind_addresses(
    env: &impl EnvSource,
    field: &'static str,
) -> Result<Vec<BindAddress>, ConfigError> {
    let literal = required(env, field)?;
    parse_bind_addresses(&literal).map_err(|e| ConfigError::MalformedLiteral {
        field,
        reason: e.to_string(),
    })
}
