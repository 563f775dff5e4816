use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::SecretError;

/// Decode an inline value; for passwords with quotes or `$` that survive
/// container runtimes badly
pub fn resolve(data: &str) -> Result<String, SecretError> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| SecretError::Undecodable {
            reason: e.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|_| SecretError::Undecodable {
        reason: "decoded bytes are not UTF-8".to_string(),
    })
}
