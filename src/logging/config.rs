use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::LoggingError;

/// Формат консольного вывода.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

/// Конфигурация логирования (секция `logging` настроек).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень для событий крейта (`trace`..`error`). `RUST_LOG` имеет
    /// приоритет.
    pub level: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    /// Каталог файлового лога. `None`: только консоль.
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            with_ansi: true,
            with_target: true,
            log_dir: None,
            file_name: "soundbus.log".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Директива `EnvFilter`: события крейта на заданном уровне, прочие
    /// зависимости не ниже `warn`.
    pub fn build_filter_directive(&self) -> String {
        format!("warn,soundbus={}", self.level)
    }

    pub fn validate(&self) -> Result<(), LoggingError> {
        let directive = self.build_filter_directive();
        EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidFilter {
            directive,
            reason: e.to_string(),
        })?;
        if self.log_dir.is_some() && self.file_name.trim().is_empty() {
            return Err(LoggingError::Invalid {
                field: "logging.file_name",
                reason: "must not be empty when log_dir is set".to_string(),
            });
        }
        Ok(())
    }
}
