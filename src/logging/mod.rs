//! Логирование на `tracing`: фильтр из конфигурации (или `RUST_LOG`),
//! консольный слой в выбранном формате и необязательный неблокирующий
//! файловый слой.

#[cfg(test)]
pub(crate) mod capture;
pub mod config;
mod filters;
mod formatter;
pub mod handle;
pub mod sinks;

pub use config::{LogFormat, LoggingConfig};
pub use handle::LoggingHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::LoggingError;

/// Устанавливает глобальный подписчик `tracing`.
///
/// Повторный вызов возвращает `LoggingError::AlreadyInitialized`.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingHandle, LoggingError> {
    config.validate()?;

    let env_filter = filters::build_filter(config);
    let mut layers = vec![sinks::console::layer(config)];

    let file_guard = match &config.log_dir {
        Some(dir) => {
            let (file_layer, guard) = sinks::file::layer(config, dir)?;
            layers.push(file_layer);
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.level,
        format = ?config.format,
        log_dir = ?config.log_dir,
        "Logging system initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
