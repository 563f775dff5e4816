use std::path::PathBuf;
use std::str::FromStr;

use crate::error::SecretError;

/// Where a credential's value comes from.
///
/// Only the three schemes below are references; every other string,
/// including a bare path such as `/private.key`, is a literal. Environment
/// values are routinely real passwords, so nothing is guessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretRef {
    Literal(String),
    /// `env://NAME`
    Env(String),
    /// `file:///run/secrets/name`
    File(PathBuf),
    /// `base64://DATA`
    Base64(String),
}

impl SecretRef {
    /// Scheme name, `None` for literals
    pub fn scheme(&self) -> Option<&'static str> {
        match self {
            SecretRef::Literal(_) => None,
            SecretRef::Env(_) => Some("env"),
            SecretRef::File(_) => Some("file"),
            SecretRef::Base64(_) => Some("base64"),
        }
    }

    pub fn is_literal(&self) -> bool {
        self.scheme().is_none()
    }
}

impl FromStr for SecretRef {
    type Err = SecretError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((scheme, rest)) = s.split_once("://") else {
            return Ok(SecretRef::Literal(s.to_string()));
        };

        let reference = match scheme {
            "env" => SecretRef::Env(rest.to_string()),
            "file" => SecretRef::File(PathBuf::from(rest)),
            "base64" => SecretRef::Base64(rest.to_string()),
            // Passwords may legitimately contain "://"
            _ => return Ok(SecretRef::Literal(s.to_string())),
        };

        if rest.trim().is_empty() {
            return Err(SecretError::malformed(s, "nothing follows the scheme"));
        }
        if let SecretRef::Env(name) = &reference {
            if name.contains(|c: char| c == '=' || c == '\0' || c.is_whitespace()) {
                return Err(SecretError::malformed(s, "not a valid variable name"));
            }
        }
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemes() {
        assert_eq!(
            "env://TUNNEL_PASSWORD".parse::<SecretRef>().unwrap(),
            SecretRef::Env("TUNNEL_PASSWORD".to_string())
        );
        assert_eq!(
            "file:///run/secrets/ssh_password".parse::<SecretRef>().unwrap(),
            SecretRef::File(PathBuf::from("/run/secrets/ssh_password"))
        );
        assert_eq!(
            "base64://aHVudGVyMg==".parse::<SecretRef>().unwrap(),
            SecretRef::Base64("aHVudGVyMg==".to_string())
        );
    }

    #[test]
    fn test_literals() {
        for value in [
            "correct horse battery staple",
            "/private.key",
            "https://example.com",
            "p@ss://word",
        ] {
            let reference: SecretRef = value.parse().unwrap();
            assert!(reference.is_literal(), "{} should be literal", value);
        }
    }

    #[test]
    fn test_empty_reference_is_malformed() {
        for value in ["env://", "file://", "base64://  "] {
            assert!(matches!(
                value.parse::<SecretRef>(),
                Err(SecretError::Malformed { .. })
            ));
        }
    }

    #[test]
    fn test_bad_variable_name() {
        assert!("env://A=B".parse::<SecretRef>().is_err());
    }
}
