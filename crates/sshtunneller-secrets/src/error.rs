use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("'{reference}' is not a valid secret reference: {reason}")]
    Malformed { reference: String, reason: String },

    #[error("{scheme}:// secret references are not supported by this build")]
    Unsupported { scheme: &'static str },

    #[error("variable '{name}' named by env:// is not set")]
    UnsetVariable { name: String },

    #[error("cannot read secret file {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("base64 secret cannot be decoded: {reason}")]
    Undecodable { reason: String },

    #[error("{scheme}:// secret resolved to an empty value")]
    Empty { scheme: &'static str },
}

impl SecretError {
    pub(crate) fn malformed(reference: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}
