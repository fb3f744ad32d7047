use std::error::Error;

use crate::{LogLevel, StatusCode};

/// Расширение для ошибок шины (object-safe).
///
/// Даёт статус-код, уровень логирования и теги для структурированных логов.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Статус ошибки.
    ///
    /// По умолчанию возвращает [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Уровень, на котором ошибку следует писать в лог.
    fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }

    /// Набор тегов (ключ–значение) для структурированных логов.
    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", self.type_name()),
            ("status_code", self.status_code().to_string()),
        ]
    }

    /// Имя типа ошибки (для логирования).
    fn type_name(&self) -> String {
        std::any::type_name::<Self>()
            .split("::")
            .last()
            .unwrap_or("Unknown")
            .to_string()
    }
}
