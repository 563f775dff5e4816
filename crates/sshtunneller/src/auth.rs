//! Choosing between key and password authentication

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::ConfigError;

/// Value of `ssh_private_key_password` that explicitly means "no passphrase"
pub const NO_PASSPHRASE_SENTINEL: &str = "None";

/// How the session authenticates. Exactly one credential is ever populated.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthMode {
    Password {
        password: String,
    },
    Key {
        key_path: PathBuf,
        passphrase: Option<String>,
    },
}

impl AuthMode {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMode::Password { .. } => "password",
            AuthMode::Key { .. } => "publickey",
        }
    }
}

// Kept out of ordinary logs; the full dump goes through serde instead.
impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"<redacted>")
                .finish(),
            AuthMode::Key {
                key_path,
                passphrase,
            } => f
                .debug_struct("Key")
                .field("key_path", key_path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Whether a passphrase value means "the key is not encrypted"
pub fn is_no_passphrase(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case(NO_PASSPHRASE_SENTINEL)
}

/// Pick the authentication mode.
///
/// `key_file` is `Some` only when the key material exists on disk. A present
/// key file always wins; its passphrase may be absent or the sentinel, both
/// meaning an unencrypted key. Without a key file a non-empty password is
/// required.
pub fn select_auth(
    key_file: Option<&Path>,
    password: Option<String>,
    passphrase: Option<String>,
) -> Result<AuthMode, ConfigError> {
    if let Some(key_path) = key_file {
        tracing::info!("Private key found, certificate mode enabled");
        if password.as_deref().is_some_and(|p| !p.is_empty()) {
            tracing::debug!("ssh_password is ignored while a private key is present");
        }
        let passphrase = passphrase.filter(|p| !is_no_passphrase(p));
        return Ok(AuthMode::Key {
            key_path: key_path.to_path_buf(),
            passphrase,
        });
    }

    match password {
        Some(password) if !password.is_empty() => Ok(AuthMode::Password { password }),
        Some(_) => Err(ConfigError::credentials(
            "ssh_password is empty and no private key was found",
        )),
        None => Err(ConfigError::credentials(
            "SSH password not provided and no private key was found; \
             set 'ssh_password' or mount a key",
        )),
    }
}
