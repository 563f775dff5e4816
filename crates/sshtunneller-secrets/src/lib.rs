//! Secret references for tunnel credentials
//!
//! Credential variables (`ssh_password`, `ssh_private_key_password`) may hold
//! either the secret itself or a reference to where it lives:
//!
//! - **Environment variables** (`env://VAR_NAME`): Another variable, looked up
//!   through the caller's environment source
//! - **Files** (`file:///run/secrets/ssh_password`): Read content from filesystem,
//!   the usual shape of Docker and Kubernetes mounted secrets
//! - **Base64** (`base64://c2VjcmV0`): Decoded inline value, for secrets with
//!   characters that are awkward to pass through a container runtime
//! - **Plain values**: Any string without one of the schemes above is a literal
//!
//! # Example
//!
//! ```rust,ignore
//! use sshtunneller_secrets::{SecretRef, SecretResolver};
//!
//! let reference: SecretRef = "file:///run/secrets/ssh_password".parse()?;
//! let password = SecretResolver::process().resolve(&reference)?;
//! ```
//!
//! # Features
//!
//! - `env` (default): Enable environment variable support
//! - `file` (default): Enable file reading support
//! - `base64` (default): Enable inline base64 values

mod backends;
mod error;
mod resolver;
mod uri;

pub use error::SecretError;
pub use resolver::SecretResolver;
pub use uri::SecretRef;
