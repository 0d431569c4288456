//! Logging initialization for the `meter-billing` binary.
//!
//! Filter priority:
//! 1. CLI flags (`-v/-q`)
//! 2. `RUST_LOG`
//! 3. `logging.default_filter` from the configuration

use crate::config::{LogFormat, LoggingConfig};
use anyhow::Result;
use clap_verbosity_flag::{LogLevel, Verbosity};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_logging<L: LogLevel>(verbosity: &Verbosity<L>, config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(verbosity, &config.default_filter)?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .compact(),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()?,
    }

    Ok(())
}

fn build_filter<L: LogLevel>(verbosity: &Verbosity<L>, default_filter: &str) -> Result<EnvFilter> {
    // Without -v/-q the flag level is only clap's default and must not shadow RUST_LOG
    if verbosity.is_present() {
        let directive = match verbosity.log_level() {
            Some(level) => level.to_string(),
            None => "off".to_string(),
        };
        return Ok(EnvFilter::try_new(directive)?);
    }

    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
}
