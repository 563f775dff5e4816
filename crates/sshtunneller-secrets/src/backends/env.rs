use crate::error::SecretError;

pub fn resolve(
    name: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, SecretError> {
    lookup(name).ok_or_else(|| SecretError::UnsetVariable {
        name: name.to_string(),
    })
}
