use crate::error::{Error, Result};

use std::fmt;

use clap::ValueEnum;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Install the global tracing subscriber. Call once, before any component
/// starts.
pub fn init(filter: &str, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_new(filter)
        .map_err(|e| Error::InvalidConfiguration(format!("invalid log filter {filter:?}: {e}")))?;
    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry.with(tracing_fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_fmt::layer().json().flatten_event(true))
            .init(),
    }
    Ok(())
}
