//! Read-only access to the variables the tunnel is configured from

use std::collections::HashMap;

/// Source of configuration strings. Implementations must not mutate
/// anything; resolution reads each variable at most once.
pub trait EnvSource {
    /// Raw value of `key`, `None` when unset
    fn get(&self, key: &str) -> Option<String>;

    /// Every variable, for prefix scans such as `log_level_<module>`
    fn vars(&self) -> Vec<(String, String)>;

    /// Value of `key` with empty strings treated as unset
    fn non_empty(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty())
    }
}

/// The process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars().collect()
    }
}

/// In-memory environment
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn without(mut self, key: &str) -> Self {
        self.vars.remove(key);
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvSource for MapEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn vars(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_value_is_unset() {
        let env = MapEnv::new().with("ssh_password", "");
        assert_eq!(env.get("ssh_password").as_deref(), Some(""));
        assert_eq!(env.non_empty("ssh_password"), None);
    }

    #[test]
    fn test_without_removes_variable() {
        let env: MapEnv = [("ssh_host", "example.com"), ("ssh_port", "22")]
            .into_iter()
            .collect();
        let env = env.without("ssh_port");
        assert!(env.get("ssh_port").is_none());
        assert_eq!(env.vars().len(), 1);
    }
}
