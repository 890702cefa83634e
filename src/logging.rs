//! Logging setup for the `canham` binary.
//!
//! Log lines go through the `tracing-indicatif` writer, so they are printed
//! above the progress spinners of running tasks instead of tearing them.
//!
//! Priority for determining the filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `CANHAM_LOG` environment variable, any `EnvFilter` directive
//! 3. default to `info`

use anyhow::Context;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::LogLevel;

/// Environment variable read when no level is given on the command line.
pub const LOG_VAR: &str = "CANHAM_LOG";

/// Install the global subscriber. Call once, at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> anyhow::Result<()> {
    let filter = filter(cli_level, std::env::var(LOG_VAR).ok().as_deref());

    let indicatif_layer = IndicatifLayer::new();
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(indicatif_layer.get_stderr_writer());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(indicatif_layer)
        .try_init()
        .context("failed to install the log subscriber")
}

fn filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level.as_str());
    }

    env.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_level_wins() {
        let filter = filter(Some(LogLevel::Debug), Some("trace"));
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_env_directive() {
        let filter = filter(None, Some("canham=trace"));
        assert_eq!(filter.to_string(), "canham=trace");
    }

    #[test]
    fn test_fallback_to_info() {
        assert_eq!(filter(None, None).to_string(), "info");
        assert_eq!(filter(None, Some("  ")).to_string(), "info");
        assert_eq!(filter(None, Some("canham=loud")).to_string(), "info");
    }
}
