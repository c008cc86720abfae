use std::collections::HashMap;

/// Source of environment variables consulted by `DefaultSource::Env`.
///
/// Backends read the process environment unless given another source.
pub trait EnvSource: Send + Sync {
    /// Value of `name`, or `None` if unset or not valid UTF-8.
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads from `std::env`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed in-memory environment.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl EnvSource for MapEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// A single question put to the user for a missing configuration entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRequest {
    /// Schema key being asked for.
    pub key: String,
    /// Short prompt text, typically the key itself.
    pub query: String,
    /// Longer help text from the schema entry.
    pub description: String,
}

/// Interactive input collaborator used to fill in missing required
/// configuration.
///
/// An empty answer means "no value".
pub trait UiInput: Send + Sync {
    /// Ask the user and return their answer.
    ///
    /// # Errors
    ///
    /// Returns an error if input could not be read (closed terminal,
    /// interrupted prompt, non-interactive session).
    fn input(&self, request: &InputRequest) -> anyhow::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_env_returns_only_inserted_vars() {
        let env = MapEnv::new().with("ATLAS_TOKEN", "secret");
        assert_eq!(env.var("ATLAS_TOKEN").as_deref(), Some("secret"));
        assert_eq!(env.var("HOME"), None);
    }

    #[test]
    fn process_env_misses_unset_var() {
        assert_eq!(ProcessEnv.var("ATLAS_CORE_SURELY_UNSET_VARIABLE"), None);
    }
}
