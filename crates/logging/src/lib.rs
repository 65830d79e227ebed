//! Chimera Logging
//!
//! One place to install the tracing subscriber for every Chimera binary.
//! `RUST_LOG` always wins; otherwise the filter is derived from [`LogLevel`].
//! Output goes to stderr so interactive menus on stdout stay readable.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Coarse log level chosen by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Filter directive used when `RUST_LOG` is unset
    pub fn directive(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "info,chimera=debug",
            Self::Trace => "debug,chimera=trace",
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
    }
}

/// Install the global subscriber, failing if one is already set
pub fn try_init(level: LogLevel) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(level.filter())
        .try_init()
}

/// Install the global subscriber, ignoring a previously installed one
pub fn init(level: LogLevel) {
    let _ = try_init(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives() {
        assert_eq!(LogLevel::Info.directive(), "info");
        assert_eq!(LogLevel::Debug.directive(), "info,chimera=debug");
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_second_init_is_harmless() {
        init(LogLevel::Warn);
        init(LogLevel::Debug);
        assert!(try_init(LogLevel::Info).is_err());
    }
}
