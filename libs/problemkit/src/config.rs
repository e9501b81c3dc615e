//! Serializable engine configuration
//!
//! Loaded with figment from an optional YAML file, overridden by
//! `PROBLEMKIT__*` environment variables (`__` separates nested keys).

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::options::{ProblemDetailsOptions, ProblemDetailsOptionsBuilder, RuntimeEnvironment};
use crate::registry::RuleRegistry;

pub const ENV_PREFIX: &str = "PROBLEMKIT__";
pub const STATUS_PLACEHOLDER: &str = "{status}";
pub const DEFAULT_TYPE_URI_TEMPLATE: &str = "https://httpstatuscodes.io/{status}";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("type URI template '{0}' must contain {STATUS_PLACEHOLDER}")]
    InvalidTemplate(String),

    #[error("failed to load problem details config: {0}")]
    Load(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProblemDetailsConfig {
    pub environment: RuntimeEnvironment,
    /// Overrides the environment-based default when set.
    pub include_exception_details: Option<bool>,
    /// Also log unhandled faults that resolve to 4xx.
    pub log_client_errors: bool,
    pub type_uri_template: String,
}

impl Default for ProblemDetailsConfig {
    fn default() -> Self {
        Self {
            environment: RuntimeEnvironment::default(),
            include_exception_details: None,
            log_client_errors: false,
            type_uri_template: DEFAULT_TYPE_URI_TEMPLATE.to_owned(),
        }
    }
}

impl ProblemDetailsConfig {
    /// Defaults, then `path` when given, then the environment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a source cannot be read or the result is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file_exact(path));
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract from a caller-assembled figment, e.g. a host application section.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when extraction fails or the result is invalid.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns [`ConfigError::InvalidTemplate`] when the template lacks the placeholder.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.type_uri_template.contains(STATUS_PLACEHOLDER) {
            Ok(())
        } else {
            Err(ConfigError::InvalidTemplate(self.type_uri_template.clone()))
        }
    }

    /// Options builder seeded from this config; callers may keep customizing it.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidTemplate`] when the template lacks the placeholder.
    pub fn options_builder(
        &self,
        registry: RuleRegistry,
    ) -> Result<ProblemDetailsOptionsBuilder, ConfigError> {
        self.validate()?;

        let template = self.type_uri_template.clone();
        let mut builder = ProblemDetailsOptions::builder(registry)
            .environment(self.environment)
            .type_uri(move |status: StatusCode| {
                template.replace(STATUS_PLACEHOLDER, &status.as_u16().to_string())
            });

        if let Some(include) = self.include_exception_details {
            builder = builder.include_exception_details(move |_, _| include);
        }
        if self.log_client_errors {
            builder = builder.log_unhandled(|_, _, problem| {
                problem.status.as_u16() >= 400
            });
        }
        Ok(builder)
    }
}

impl ProblemDetailsOptions {
    /// # Errors
    /// Returns [`ConfigError::InvalidTemplate`] when the template lacks the placeholder.
    pub fn from_config(
        registry: RuleRegistry,
        config: &ProblemDetailsConfig,
    ) -> Result<Self, ConfigError> {
        Ok(config.options_builder(registry)?.build())
    }
}
