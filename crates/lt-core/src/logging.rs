//! Tracing subscriber setup.

use std::str::FromStr;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::{Error, Result};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::Config(format!("unknown log format: {other}"))),
        }
    }
}

/// Build the filter: `RUST_LOG` wins, otherwise `default_level`.
pub fn build_filter(default_level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level)
            .map_err(|err| Error::Config(format!("invalid log level {default_level:?}: {err}"))),
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays clean for
/// view output.
pub fn init(default_level: &str, format: LogFormat) -> Result<()> {
    let filter = build_filter(default_level)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|err| Error::Runtime(format!("logging already initialised: {err}")))
}
