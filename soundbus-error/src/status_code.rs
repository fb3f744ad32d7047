use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок шины.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки аргументов API (канал, сообщение, callback)
/// - 3xxx: Жизненный цикл шины
/// - 4xxx: Ошибки пользовательского кода во время доставки
///
/// # Реализация:
/// - `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
/// - опционально: `strum` для `AsRefStr`/`EnumIter` (feature = "strum").
/// - опционально: `serde_repr` для сериализации в виде числового значения
///   (feature = "serde_repr").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unexpected = 1001,
    Internal = 1002,
    InvalidArgs = 1003,

    // === 2xxx: Аргументы API ===
    InvalidChannelName = 2000,
    InvalidMessage = 2001,
    InvalidCallback = 2002,
    NoSubscribers = 2003,

    // === 3xxx: Жизненный цикл ===
    ShutDown = 3000,

    // === 4xxx: Пользовательский код ===
    CallbackPanicked = 4000,
    CompactorPanicked = 4001,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    ///
    /// Использует `TryFrom<u32>` из `num_enum`; возвращает `None`, если
    /// значение не соответствует ни одному варианту.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Ошибка вызывающего кода: неверный аргумент публичного API или
    /// операция над остановленной шиной.
    pub fn is_caller_error(&self) -> bool {
        let c = self.code();
        if (2000..=3999).contains(&c) {
            return true;
        }
        matches!(self, Self::InvalidArgs)
    }

    /// Ошибка внутри пользовательского кода, вызванного шиной.
    pub fn is_user_code_error(&self) -> bool {
        (4000..=4999).contains(&self.code())
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NoSubscribers => LogLevel::Debug,
            Self::InvalidArgs
            | Self::InvalidChannelName
            | Self::InvalidMessage
            | Self::InvalidCallback
            | Self::ShutDown => LogLevel::Warn,
            Self::Internal | Self::CallbackPanicked | Self::CompactorPanicked => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        // Если включён feature "strum", используем human-readable имя (AsRefStr).
        // Иначе Debug-имя.
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
