//! Ошибки уровня приложения: загрузка настроек и инициализация логирования.
//!
//! Ошибки самой шины (`BusError`, `StatusCode`) живут в отдельном крейте
//! `soundbus-error` и переэкспортируются отсюда.

use std::io;

use thiserror::Error;

pub use soundbus_error::{BusError, ErrorExt, LogLevel, StatusCode};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter directive '{directive}': {reason}")]
    InvalidFilter { directive: String, reason: String },

    #[error("Invalid logging setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to prepare log directory {path}: {source}")]
    LogDir {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Global tracing subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Пишет ошибку шины в лог на уровне, который задаёт её `StatusCode`, вместе
/// с тегами `ErrorExt::metrics_tags`.
pub(crate) fn log_bus_error(
    err: &BusError,
    what: &str,
) {
    let tags = err
        .metrics_tags()
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ");
    match err.log_level() {
        LogLevel::Trace => trace!(error = %err, tags = %tags, "{}", what),
        LogLevel::Debug => debug!(error = %err, tags = %tags, "{}", what),
        LogLevel::Info => info!(error = %err, tags = %tags, "{}", what),
        LogLevel::Warn => warn!(error = %err, tags = %tags, "{}", what),
        LogLevel::Error => error!(error = %err, tags = %tags, "{}", what),
    }
}
