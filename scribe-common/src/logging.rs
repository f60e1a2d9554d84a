//! Tracing initialization shared by the Scribe binaries

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::{Error, Result};

/// Build the filter directive for a crate at the configured level
///
/// Unknown levels fall back to `info`.
pub fn filter_directive(crate_target: &str, level: &str) -> String {
    let level = match level.to_ascii_lowercase().as_str() {
        l @ ("trace" | "debug" | "info" | "warn" | "error") => l.to_string(),
        _ => "info".to_string(),
    };
    format!("{crate_target}={level},scribe_common={level},tower_http=info")
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the configured level. When `config.file` is set,
/// output goes to that file (appending, no ANSI colors) instead of stderr.
pub fn init_tracing(config: &LoggingConfig, crate_target: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(crate_target, &config.level)));

    let registry = tracing_subscriber::registry().with(filter);

    let result = match &config.file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .try_init()
        }
        None => registry.with(fmt::layer()).try_init(),
    };

    result.map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_known_level() {
        assert_eq!(
            filter_directive("scribe_pipeline", "DEBUG"),
            "scribe_pipeline=debug,scribe_common=debug,tower_http=info"
        );
    }

    #[test]
    fn test_filter_directive_unknown_level_falls_back() {
        assert!(filter_directive("scribe_client", "loud").starts_with("scribe_client=info"));
    }
}
