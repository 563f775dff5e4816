use sshtunneller_secrets::SecretError;
use thiserror::Error;

use crate::exit::ExitStatus;

/// Fatal problems found while turning the environment into a `TunnelConfig`.
/// Every variant names the variable at fault.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required environment variable '{field}' is not set")]
    MissingField { field: &'static str },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Could not resolve '{field}' host '{host}': {reason}")]
    HostResolution {
        field: &'static str,
        host: String,
        reason: String,
    },

    #[error("Malformed literal in '{field}': {reason}")]
    MalformedLiteral { field: &'static str, reason: String },

    #[error(
        "remote_bind_addresses has {remote} entries but local_bind_addresses has {local}; \
         forwards are paired by position"
    )]
    BindCountMismatch { remote: usize, local: usize },

    #[error("{reason}")]
    MissingCredentials { reason: String },

    #[error("Failed to resolve secret for '{field}': {source}")]
    Secret {
        field: &'static str,
        #[source]
        source: SecretError,
    },
}

impl ConfigError {
    pub fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    pub fn credentials(reason: impl Into<String>) -> Self {
        Self::MissingCredentials {
            reason: reason.into(),
        }
    }

    pub fn exit_status(&self) -> ExitStatus {
        match self {
            ConfigError::MissingField { .. } => ExitStatus::MissingField,
            ConfigError::InvalidValue { .. } | ConfigError::HostResolution { .. } => {
                ExitStatus::InvalidValue
            }
            ConfigError::MalformedLiteral { .. } => ExitStatus::MalformedLiteral,
            ConfigError::BindCountMismatch { .. } => ExitStatus::BindCountMismatch,
            ConfigError::MissingCredentials { .. } | ConfigError::Secret { .. } => {
                ExitStatus::MissingCredentials
            }
        }
    }
}

/// Failures while opening the authenticated session or its forwards
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Key error: {0}")]
    KeyError(String),

    #[error("Failed to bind forward {index} on {addr}: {reason}")]
    Bind {
        index: usize,
        addr: String,
        reason: String,
    },

    #[error("SSH protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<russh::Error> for SessionError {
    fn from(err: russh::Error) -> Self {
        SessionError::ProtocolError(err.to_string())
    }
}

impl From<russh::keys::Error> for SessionError {
    fn from(err: russh::keys::Error) -> Self {
        SessionError::KeyError(err.to_string())
    }
}
