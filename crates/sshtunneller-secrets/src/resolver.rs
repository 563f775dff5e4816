use crate::error::SecretError;
use crate::uri::SecretRef;

type Lookup<'a> = Box<dyn Fn(&str) -> Option<String> + 'a>;

/// Turns a [`SecretRef`] into the secret itself.
///
/// `env://` names are looked up through a caller-supplied function so that
/// references resolve against the same variables as the rest of the
/// configuration.
pub struct SecretResolver<'a> {
    lookup: Lookup<'a>,
}

impl SecretResolver<'static> {
    /// Resolve `env://` against the process environment
    pub fn process() -> Self {
        Self {
            lookup: Box::new(|name| std::env::var(name).ok()),
        }
    }
}

impl<'a> SecretResolver<'a> {
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + 'a) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    /// Literals come back untouched. Referenced values are trimmed, since
    /// mounted files end with a newline, and must not be empty.
    pub fn resolve(&self, reference: &SecretRef) -> Result<String, SecretError> {
        let (scheme, value) = match reference {
            SecretRef::Literal(value) => return Ok(value.clone()),

            #[cfg(feature = "env")]
            SecretRef::Env(name) => ("env", crate::backends::env::resolve(name, &*self.lookup)?),
            #[cfg(not(feature = "env"))]
            SecretRef::Env(_) => return Err(SecretError::Unsupported { scheme: "env" }),

            #[cfg(feature = "file")]
            SecretRef::File(path) => ("file", crate::backends::file::resolve(path)?),
            #[cfg(not(feature = "file"))]
            SecretRef::File(_) => return Err(SecretError::Unsupported { scheme: "file" }),

            #[cfg(feature = "base64")]
            SecretRef::Base64(data) => ("base64", crate::backends::base64::resolve(data)?),
            #[cfg(not(feature = "base64"))]
            SecretRef::Base64(_) => return Err(SecretError::Unsupported { scheme: "base64" }),
        };
        tracing::debug!(scheme, "Resolved secret reference");

        let value = value.trim();
        if value.is_empty() {
            return Err(SecretError::Empty { scheme });
        }
        Ok(value.to_string())
    }
}

impl std::fmt::Debug for SecretResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretResolver").finish_non_exhaustive()
    }
}
