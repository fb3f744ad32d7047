use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, logging::LoggingConfig, pubsub::TriggerKind};

/// Префикс переменных окружения: `SOUNDBUS_BUS__QUEUE_WARN_DEPTH`,
/// `SOUNDBUS_LOGGING__LEVEL` и т.д.
pub const ENV_PREFIX: &str = "SOUNDBUS";

/// Настройки шины.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Порог длины глобальной очереди, после которого публикация пишет
    /// предупреждение в лог.
    pub queue_warn_depth: usize,
    /// Порог числа шагов одного дренажа. Превышение только логируется:
    /// доставка продолжается.
    pub max_drain_steps: Option<usize>,
    pub trigger: TriggerKind,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            queue_warn_depth: 1024,
            max_drain_steps: None,
            trigger: TriggerKind::default(),
        }
    }
}

impl BusSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_warn_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "bus.queue_warn_depth",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.max_drain_steps == Some(0) {
            return Err(ConfigError::Invalid {
                field: "bus.max_drain_steps",
                reason: "must be greater than 0 when set".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub bus: BusSettings,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Загружает настройки: значения по умолчанию, затем переменные
    /// окружения с префиксом `SOUNDBUS_`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(None)
    }

    /// Как [`Settings::load`], но между значениями по умолчанию и
    /// окружением читает файл (toml/yaml/json по расширению).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::build(Some(path.as_ref()))
    }

    fn build(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Значения по умолчанию
            .set_default("bus.queue_warn_depth", 1024)?
            .set_default("bus.trigger", "tokio-local")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "compact")?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path));
        }

        let cfg = builder
            // Переменные окружения с префиксом SOUNDBUS_
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bus.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}
