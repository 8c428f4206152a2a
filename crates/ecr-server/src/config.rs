//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ecr_core::{Action, ActionGraph, CoreError};
use ecr_fhir_client::RetryPolicy;
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::Directive;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Retry policy for FHIR reads
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Clinical data loading
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub triggers: TriggerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Report submission endpoint
    #[serde(default)]
    pub submission: SubmissionConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return invalid(format!("logging.level must be one of {LOG_LEVELS:?}"));
        }
        for directive in &self.logging.directives {
            if let Err(e) = directive.parse::<Directive>() {
                return invalid(format!("logging.directives: '{directive}' is not valid: {e}"));
            }
        }
        self.retry.validate().map_err(ConfigError::Invalid)?;

        if self.data.resource_types.iter().any(|t| t.trim().is_empty()) {
            return invalid("data.resource_types must not contain empty names".into());
        }
        if self.data.page_size == 0 {
            return invalid("data.page_size must be > 0".into());
        }
        if self.data.max_pages == 0 {
            return invalid("data.max_pages must be > 0".into());
        }
        if self.data.request_timeout.is_zero() {
            return invalid("data.request_timeout must be > 0".into());
        }
        if self.engine.periodic_update_interval.is_zero() {
            return invalid("engine.periodic_update_interval must be > 0".into());
        }
        if let Some(endpoint) = self.submission.endpoint.as_deref() {
            if let Err(e) = url::Url::parse(endpoint) {
                return invalid(format!("submission.endpoint is not a valid URL: {e}"));
            }
        }
        if self.submission.timeout.is_zero() {
            return invalid("submission.timeout must be > 0".into());
        }
        Ok(())
    }

    /// Builds the action graph: the configured action list, or the default
    /// reporting pipeline when none is configured.
    pub fn action_graph(&self) -> Result<ActionGraph, CoreError> {
        match &self.engine.actions {
            Some(actions) => ActionGraph::new(actions.clone()),
            None => ActionGraph::eicr_default(
                self.engine.periodic_update_interval,
                &self.data.resource_types,
            ),
        }
    }
}

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Per-target overrides, e.g. `ecr_fhir_client=debug`
    #[serde(default)]
    pub directives: Vec<String>,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directives: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Resource types searched by patient before matching and report generation
    #[serde(default = "default_resource_types")]
    pub resource_types: Vec<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Upper bound on bundle pages fetched per resource type
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}
fn default_resource_types() -> Vec<String> {
    [
        "Condition",
        "Observation",
        "MedicationRequest",
        "DiagnosticReport",
        "Immunization",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_page_size() -> u32 {
    50
}
fn default_max_pages() -> u32 {
    10
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}
impl Default for DataConfig {
    fn default() -> Self {
        Self {
            resource_types: default_resource_types(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TriggerConfig {
    /// JSON trigger catalog
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_periodic_interval", with = "humantime_serde")]
    pub periodic_update_interval: Duration,
    /// Replaces the default pipeline when set
    #[serde(default)]
    pub actions: Option<Vec<Action>>,
}
fn default_periodic_interval() -> Duration {
    Duration::from_secs(3600)
}
impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            periodic_update_interval: default_periodic_interval(),
            actions: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    /// Reports are only logged when unset
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_submission_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}
fn default_submission_timeout() -> Duration {
    Duration::from_secs(30)
}
impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: default_submission_timeout(),
        }
    }
}

/// Configuration file read when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "ecr.toml";

/// Prefix of environment overrides, e.g. `ECR__RETRY__MAX_ATTEMPTS=5`.
const ENV_PREFIX: &str = "ECR";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("Failed to read configuration: {0}")]
    Source(config::ConfigError),

    #[error("Failed to deserialize configuration: {0}")]
    Deserialize(config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid action graph: {0}")]
    ActionGraph(#[from] CoreError),
}

impl AppConfig {
    /// Reads the configuration file, applies `ECR__*` environment overrides
    /// and validates the result, including the action graph it describes.
    ///
    /// An explicitly named file must exist. Without a path, `ecr.toml` in the
    /// working directory is used when present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) if !p.exists() => return Err(ConfigError::Missing(p.to_path_buf())),
            Some(p) => Some(p.to_path_buf()),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.exists()),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            builder = builder.add_source(config::File::from(file.as_path()));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__"),
        );

        let cfg: AppConfig = builder
            .build()
            .map_err(ConfigError::Source)?
            .try_deserialize()
            .map_err(ConfigError::Deserialize)?;
        cfg.validate()?;
        let graph = cfg.action_graph()?;

        tracing::debug!(
            file = ?file,
            actions = graph.len(),
            resource_types = cfg.data.resource_types.len(),
            "Configuration loaded"
        );
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.engine.periodic_update_interval, Duration::from_secs(3600));
        assert_eq!(cfg.action_graph().unwrap().len(), 6);
    }

    #[test]
    fn test_invalid_level_rejected() {
        let mut cfg = AppConfig::default();
        cfg.logging.level = "verbose".into();
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("logging.level")));
    }

    #[test]
    fn test_bad_log_directive_rejected() {
        let mut cfg = AppConfig::default();
        cfg.logging.directives = vec!["ecr_fhir_client=debug".into()];
        assert!(cfg.validate().is_ok());
        cfg.logging.directives.push("ecr_engine=loud".into());
        assert!(cfg.validate().unwrap_err().to_string().contains("logging.directives"));
    }

    #[test]
    fn test_invalid_submission_endpoint_rejected() {
        let mut cfg = AppConfig::default();
        cfg.submission.endpoint = Some("not a url".into());
        assert!(cfg.validate().unwrap_err().to_string().contains("submission.endpoint"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("/nonexistent/ecr.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }
}
