//! Tracing subscriber setup.

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Quiet - warnings and errors only
    Quiet,
    /// Normal - step and test lifecycle
    #[default]
    Normal,
    /// Verbose - locator candidates and dispatch tiers
    Verbose,
    /// Debug - every poll
    Debug,
}

impl Verbosity {
    /// Default filter directive when `RUST_LOG` is unset
    #[must_use]
    pub const fn directive(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            Self::Verbose => "storeflow=debug,info",
            Self::Debug => "debug",
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Filter for `verbosity`, overridden by `RUST_LOG` when set
#[must_use]
pub fn filter_for(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.directive()))
}

/// Install the global subscriber.
///
/// Safe to call more than once; only the first call takes effect. Returns
/// whether this call installed it.
pub fn init(verbosity: Verbosity, format: LogFormat) -> bool {
    let registry = tracing_subscriber::registry().with(filter_for(verbosity));
    let installed = match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_verbosity() {
        assert_eq!(Verbosity::default(), Verbosity::Normal);
    }

    #[test]
    fn test_directives() {
        assert_eq!(Verbosity::Quiet.directive(), "warn");
        assert_eq!(Verbosity::Normal.directive(), "info");
        assert!(Verbosity::Verbose.directive().contains("storeflow=debug"));
        assert_eq!(Verbosity::Debug.directive(), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init(Verbosity::Quiet, LogFormat::Pretty);
        assert!(!init(Verbosity::Debug, LogFormat::Json));
    }
}
