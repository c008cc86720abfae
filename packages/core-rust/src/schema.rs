//! Declarative configuration schema and the validation/resolution pass over it.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::config::{RawConfig, ValidatedConfig};
use crate::traits::EnvSource;
use crate::types::{Value, ValueKind};

// ---------------------------------------------------------------------------
// SchemaEntry
// ---------------------------------------------------------------------------

/// Where a value comes from when the caller did not supply one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultSource {
    /// No default. Required entries must be configured explicitly.
    None,
    /// A fixed value.
    Literal(Value),
    /// Read from an environment variable, parsed according to the entry kind.
    ///
    /// An empty variable counts as unset. When `overrides_config` is true a
    /// set variable replaces any configured value, otherwise it only fills
    /// a gap. `fallback` applies when the variable is unset.
    Env {
        var: String,
        fallback: Option<Value>,
        overrides_config: bool,
    },
}

impl DefaultSource {
    /// Environment default that only fills a gap in the configuration.
    #[must_use]
    pub fn env(var: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            fallback: None,
            overrides_config: false,
        }
    }

    /// Environment default that wins over any configured value.
    #[must_use]
    pub fn env_override(var: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            fallback: None,
            overrides_config: true,
        }
    }
}

/// One recognized configuration key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    pub key: String,
    pub kind: ValueKind,
    pub required: bool,
    pub default: DefaultSource,
    pub description: String,
}

impl SchemaEntry {
    /// A required entry with no default and no description.
    #[must_use]
    pub fn required(key: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            key: key.into(),
            kind,
            required: true,
            default: DefaultSource::None,
            description: String::new(),
        }
    }

    /// An optional entry with no default and no description.
    #[must_use]
    pub fn optional(key: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            required: false,
            ..Self::required(key, kind)
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: DefaultSource) -> Self {
        self.default = default;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A single problem found while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigIssue {
    #[error("{key}: required field is not set")]
    MissingRequired { key: String },
    #[error("{key}: expected {expected}, got {found}")]
    TypeMismatch {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("{key}: invalid or unknown key")]
    UnknownKey { key: String },
    #[error("{key}: environment variable {var}: {reason}")]
    InvalidEnvironment {
        key: String,
        var: String,
        reason: String,
    },
}

impl ConfigIssue {
    /// The configuration key this issue is about.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::MissingRequired { key }
            | Self::TypeMismatch { key, .. }
            | Self::UnknownKey { key }
            | Self::InvalidEnvironment { key, .. } => key,
        }
    }
}

/// Errors from building a schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("duplicate schema key: {key}")]
    DuplicateKey { key: String },
    #[error("{key}: default value is {found}, entry is {expected}")]
    DefaultKindMismatch {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

/// Outcome of [`ConfigSchema::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
    pub errors: Vec<ConfigIssue>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ConfigSchema
// ---------------------------------------------------------------------------

/// Ordered set of schema entries with unique keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSchema {
    entries: Vec<SchemaEntry>,
}

/// Per-pass accumulator shared by `validate` and `resolve`.
#[derive(Default)]
struct Evaluation {
    values: BTreeMap<String, Value>,
    warnings: Vec<String>,
    errors: Vec<ConfigIssue>,
}

impl ConfigSchema {
    /// Builds a schema, checking that keys are unique and that literal and
    /// fallback defaults match their entry's kind.
    ///
    /// # Errors
    ///
    /// Returns the first `SchemaError` found, in entry order.
    pub fn new(entries: Vec<SchemaEntry>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.key.as_str()) {
                return Err(SchemaError::DuplicateKey {
                    key: entry.key.clone(),
                });
            }
            let default_value = match &entry.default {
                DefaultSource::Literal(v) => Some(v),
                DefaultSource::Env { fallback, .. } => fallback.as_ref(),
                DefaultSource::None => None,
            };
            if let Some(v) = default_value {
                if v.kind() != entry.kind {
                    return Err(SchemaError::DefaultKindMismatch {
                        key: entry.key.clone(),
                        expected: entry.kind,
                        found: v.kind(),
                    });
                }
            }
        }
        Ok(Self { entries })
    }

    /// Entries in declaration order.
    #[must_use]
    pub fn describe(&self) -> &[SchemaEntry] {
        &self.entries
    }

    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&SchemaEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Checks `raw` against the schema without producing a config.
    ///
    /// Every problem is collected; nothing short-circuits.
    #[must_use]
    pub fn validate(&self, raw: &RawConfig, env: &dyn EnvSource) -> ValidationReport {
        let eval = self.evaluate(raw, env);
        ValidationReport {
            warnings: eval.warnings,
            errors: eval.errors,
        }
    }

    /// Validates `raw` and resolves defaults into a [`ValidatedConfig`].
    ///
    /// # Errors
    ///
    /// Returns every `ConfigIssue` found when the configuration is invalid.
    pub fn resolve(
        &self,
        raw: &RawConfig,
        env: &dyn EnvSource,
    ) -> Result<ValidatedConfig, Vec<ConfigIssue>> {
        self.resolve_with_warnings(raw, env).1
    }

    /// Like [`resolve`](Self::resolve), also returning the warnings from the
    /// same pass. The environment is read once, so the warnings always
    /// describe the returned config.
    #[must_use]
    pub fn resolve_with_warnings(
        &self,
        raw: &RawConfig,
        env: &dyn EnvSource,
    ) -> (Vec<String>, Result<ValidatedConfig, Vec<ConfigIssue>>) {
        let eval = self.evaluate(raw, env);
        let result = if eval.errors.is_empty() {
            Ok(ValidatedConfig::from_resolved(eval.values))
        } else {
            Err(eval.errors)
        };
        (eval.warnings, result)
    }

    /// Required entries that have neither a configured value nor a default
    /// that currently produces one. These are the entries worth prompting for.
    #[must_use]
    pub fn unresolved_required<'a>(
        &'a self,
        raw: &RawConfig,
        env: &dyn EnvSource,
    ) -> Vec<&'a SchemaEntry> {
        self.entries
            .iter()
            .filter(|e| e.required && !raw.contains(&e.key) && !has_default(e, env))
            .collect()
    }

    fn evaluate(&self, raw: &RawConfig, env: &dyn EnvSource) -> Evaluation {
        let mut eval = Evaluation::default();

        for (key, _) in raw.iter() {
            if self.entry(key).is_none() {
                eval.errors.push(ConfigIssue::UnknownKey {
                    key: key.to_string(),
                });
            }
        }

        for entry in &self.entries {
            let configured = raw.get(&entry.key);
            if let Some(v) = configured {
                if v.kind() != entry.kind {
                    eval.errors.push(ConfigIssue::TypeMismatch {
                        key: entry.key.clone(),
                        expected: entry.kind,
                        found: v.kind(),
                    });
                    continue;
                }
            }

            let resolved = match &entry.default {
                DefaultSource::None => configured.cloned(),
                DefaultSource::Literal(v) => configured.cloned().or_else(|| Some(v.clone())),
                DefaultSource::Env {
                    var,
                    fallback,
                    overrides_config,
                } => match env_value(env, var) {
                    Some(text) => match entry.kind.parse(&text) {
                        Ok(v) if configured.is_none() || *overrides_config => {
                            if configured.is_some() {
                                eval.warnings.push(format!(
                                    "{}: {var} is set and overrides the configured value",
                                    entry.key
                                ));
                            }
                            debug!(key = %entry.key, var = %var, "value taken from environment");
                            Some(v)
                        }
                        Ok(_) => configured.cloned(),
                        Err(reason) => {
                            eval.errors.push(ConfigIssue::InvalidEnvironment {
                                key: entry.key.clone(),
                                var: var.clone(),
                                reason,
                            });
                            continue;
                        }
                    },
                    None => configured.cloned().or_else(|| fallback.clone()),
                },
            };

            match resolved {
                Some(v) => {
                    eval.values.insert(entry.key.clone(), v);
                }
                None if entry.required => eval.errors.push(ConfigIssue::MissingRequired {
                    key: entry.key.clone(),
                }),
                None => {}
            }
        }

        eval
    }
}

/// Non-empty value of an environment variable.
fn env_value(env: &dyn EnvSource, var: &str) -> Option<String> {
    env.var(var).filter(|v| !v.is_empty())
}

fn has_default(entry: &SchemaEntry, env: &dyn EnvSource) -> bool {
    match &entry.default {
        DefaultSource::None => false,
        DefaultSource::Literal(_) => true,
        DefaultSource::Env { var, fallback, .. } => {
            fallback.is_some() || env_value(env, var).is_some()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
