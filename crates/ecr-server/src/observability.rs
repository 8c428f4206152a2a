//! Log output for the engine binary.
//!
//! Tracing starts at `info` so configuration loading is visible, then
//! switches to the filter built from [`LoggingConfig`]. `RUST_LOG`, when set,
//! wins over both.

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

const BOOTSTRAP_FILTER: &str = "info";

/// Handle for swapping the active filter after configuration is read.
pub struct LogHandle {
    reload: reload::Handle<EnvFilter, Registry>,
    env_override: bool,
}

impl LogHandle {
    /// Switches to the configured filter unless `RUST_LOG` is in charge.
    pub fn apply(&self, logging: &LoggingConfig) {
        if self.env_override {
            tracing::debug!("RUST_LOG is set; ignoring configured log filter");
            return;
        }
        let filter = filter_string(logging);
        match self.reload.modify(|f| *f = EnvFilter::new(&filter)) {
            Ok(()) => tracing::debug!(filter = %filter, "Log filter applied"),
            Err(e) => tracing::warn!(error = %e, "Failed to apply log filter"),
        }
    }
}

/// Installs the global subscriber with the bootstrap filter.
pub fn init_tracing() -> LogHandle {
    let env_filter = std::env::var_os("RUST_LOG")
        .is_some()
        .then(|| EnvFilter::try_from_default_env().ok())
        .flatten();
    let env_override = env_filter.is_some();
    let filter = env_filter.unwrap_or_else(|| EnvFilter::new(BOOTSTRAP_FILTER));

    let (layer, reload) = reload::Layer::new(filter);
    let _ = tracing_subscriber::registry()
        .with(layer)
        .with(fmt::layer().with_target(false))
        .try_init();

    LogHandle {
        reload,
        env_override,
    }
}

/// `EnvFilter` syntax for a logging section: the level, then each directive.
pub fn filter_string(logging: &LoggingConfig) -> String {
    std::iter::once(logging.level.to_ascii_lowercase())
        .chain(logging.directives.iter().map(|d| d.trim().to_string()))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_string_joins_level_and_directives() {
        let logging = LoggingConfig {
            level: "WARN".into(),
            directives: vec!["ecr_fhir_client=debug".into(), " ecr_auth=trace ".into()],
        };
        assert_eq!(
            filter_string(&logging),
            "warn,ecr_fhir_client=debug,ecr_auth=trace"
        );
        assert_eq!(filter_string(&LoggingConfig::default()), "info");
    }
}
