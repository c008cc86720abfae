//! Validation, interactive input, and activation of backend configuration.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use atlas_core::{
    ConfigIssue, ConfigSchema, EnvSource, InputRequest, RawConfig, UiInput, ValidatedConfig,
    ValidationReport,
};
use tracing::{debug, info, warn};

/// Converts a validated config into backend settings, or rejects it with a
/// human-readable message.
pub type FinishHook<T> = Box<dyn Fn(&ValidatedConfig) -> Result<T, String> + Send + Sync>;

/// Errors from `input` and `configure`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {}", join_issues(.0))]
    Invalid(Vec<ConfigIssue>),
    #[error("{key}: required field is still unset after prompting")]
    Unset { key: String },
    #[error("{key}: {reason}")]
    InvalidInput { key: String, reason: String },
    #[error("{key}: failed to read input")]
    Input {
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{message}")]
    Rejected { message: String },
}

fn join_issues(issues: &[ConfigIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The configuration currently in effect.
#[derive(Debug)]
pub struct ActiveConfig<T> {
    pub validated: Arc<ValidatedConfig>,
    pub settings: Arc<T>,
}

/// Schema-driven configuration pipeline for one backend instance.
///
/// `configure` swaps the active config atomically, so readers on other
/// threads see either the previous config or the new one, never a mix.
pub struct Configurator<T> {
    schema: ConfigSchema,
    env: Arc<dyn EnvSource>,
    finish: FinishHook<T>,
    active: ArcSwapOption<ActiveConfig<T>>,
}

impl<T> Configurator<T> {
    pub fn new(
        schema: ConfigSchema,
        env: Arc<dyn EnvSource>,
        finish: impl Fn(&ValidatedConfig) -> Result<T, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            schema,
            env,
            finish: Box::new(finish),
            active: ArcSwapOption::empty(),
        }
    }

    #[must_use]
    pub fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    #[must_use]
    pub fn validate(&self, raw: &RawConfig) -> ValidationReport {
        self.schema.validate(raw, self.env.as_ref())
    }

    /// Prompts for required entries that have no value and no default, and
    /// returns `raw` with the answers merged in. `raw` itself is untouched.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Input` if the collaborator fails.
    /// - `ConfigError::Unset` if an answer is empty.
    /// - `ConfigError::InvalidInput` if an answer does not parse for the
    ///   entry's kind.
    pub fn input(&self, ui: &dyn UiInput, raw: &RawConfig) -> Result<RawConfig, ConfigError> {
        let mut filled = raw.clone();
        for entry in self.schema.unresolved_required(raw, self.env.as_ref()) {
            let request = InputRequest {
                key: entry.key.clone(),
                query: entry.key.clone(),
                description: entry.description.clone(),
            };
            debug!(key = %entry.key, "prompting for missing configuration");
            let answer = ui.input(&request).map_err(|source| ConfigError::Input {
                key: entry.key.clone(),
                source,
            })?;
            if answer.trim().is_empty() {
                return Err(ConfigError::Unset {
                    key: entry.key.clone(),
                });
            }
            let value = entry
                .kind
                .parse(&answer)
                .map_err(|reason| ConfigError::InvalidInput {
                    key: entry.key.clone(),
                    reason,
                })?;
            filled.set(entry.key.clone(), value);
        }
        Ok(filled)
    }

    /// Validates, resolves defaults, runs the finish hook, and activates the
    /// result. The previously active config stays in place on any failure.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` with every issue found, or
    /// `ConfigError::Rejected` when the finish hook refuses the config.
    pub fn configure(&self, raw: &RawConfig) -> Result<Arc<ActiveConfig<T>>, ConfigError> {
        let (warnings, resolved) = self.schema.resolve_with_warnings(raw, self.env.as_ref());
        for warning in &warnings {
            warn!("{warning}");
        }

        let validated = resolved.map_err(ConfigError::Invalid)?;
        let settings = (self.finish)(&validated).map_err(|message| {
            warn!(%message, "configuration rejected");
            ConfigError::Rejected { message }
        })?;

        let active = Arc::new(ActiveConfig {
            validated: Arc::new(validated),
            settings: Arc::new(settings),
        });
        self.active.store(Some(Arc::clone(&active)));
        info!(keys = active.validated.iter().count(), "configuration activated");
        Ok(active)
    }

    /// The active config, if `configure` has succeeded at least once.
    #[must_use]
    pub fn active(&self) -> Option<Arc<ActiveConfig<T>>> {
        self.active.load_full()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
