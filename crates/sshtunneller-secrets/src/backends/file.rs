use std::path::Path;

use crate::error::SecretError;

/// Read a mounted secret (Docker, Kubernetes)
pub fn resolve(path: &Path) -> Result<String, SecretError> {
    std::fs::read_to_string(path).map_err(|source| SecretError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}
