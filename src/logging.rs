//! Logging setup
//!
//! The subscriber is installed as the default for the current thread and
//! removed when the returned guard is dropped, so the process owns exactly
//! one logging lifetime instead of a global logger.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Keeps the subscriber installed while alive
pub struct LoggingGuard {
    _default: DefaultGuard,
}

/// Install stderr logging plus an optional append-only log file.
///
/// `RUST_LOG` overrides the INFO default.
pub fn init(log_file: Option<&Path>) -> Result<LoggingGuard> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter);

    Ok(LoggingGuard {
        _default: tracing::subscriber::set_default(subscriber),
    })
}
