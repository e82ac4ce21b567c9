//! Log output setup.
//!
//! Library code logs through the `log` macros; `init` installs a
//! `tracing-subscriber` formatter that also picks up those records.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::errors::{OragError, Result};

/// Install the global subscriber. `RUST_LOG` wins over `config.level`.
///
/// Returns `Ok(false)` if a subscriber was already installed.
pub fn init(config: &LoggingConfig) -> Result<bool> {
    let filter = filter(config)?;

    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok())
}

fn filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level).map_err(|e| {
        OragError::config(format!("invalid logging.level '{}': {e}", config.level))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "orag=notalevel".to_string(),
        };
        assert!(matches!(init(&config), Err(OragError::Config(_))));
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        init(&config).unwrap();
        // a subscriber is installed now, whoever won the race
        assert!(!init(&config).unwrap());
    }
}
