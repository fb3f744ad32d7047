use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки публичного API шины и изоляции пользовательского кода.
///
/// Ошибки валидации возвращаются вызывающему как `Err(..)` и никогда не
/// превращаются в панику. `CallbackPanicked` и `CompactorPanicked` наружу не
/// возвращаются: шина только логирует их и продолжает доставку.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Пустое имя канала или нулевой числовой идентификатор.
    #[error("Invalid channel name: {name:?}")]
    InvalidChannelName { name: String },

    /// Полезная нагрузка сообщения не является объектом.
    #[error("Invalid message for channel {channel}: {reason}")]
    InvalidMessage { channel: String, reason: String },

    /// Callback нельзя вызвать (слабая ссылка уже мертва).
    #[error("Invalid callback for channel {channel}: {reason}")]
    InvalidCallback { channel: String, reason: String },

    /// У канала ещё нет списка подписчиков; шина не буферизует сообщения
    /// для будущих подписчиков.
    #[error("No subscribers for channel: {channel}")]
    NoSubscribers { channel: String },

    /// Шина остановлена через `shutdown`.
    #[error("Bus is shut down")]
    ShutDown,

    /// Подписчик запаниковал во время доставки.
    #[error("Subscriber {subscriber} on channel {channel} panicked: {reason}")]
    CallbackPanicked {
        channel: String,
        subscriber: u64,
        reason: String,
    },

    /// Компактор типа сообщения запаниковал.
    #[error("Compactor for type {kind} panicked: {reason}")]
    CompactorPanicked { kind: String, reason: String },
}

impl BusError {
    /// Имя канала, к которому относится ошибка (если есть).
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::InvalidChannelName { .. } | Self::ShutDown | Self::CompactorPanicked { .. } => {
                None
            }
            Self::InvalidMessage { channel, .. }
            | Self::InvalidCallback { channel, .. }
            | Self::NoSubscribers { channel }
            | Self::CallbackPanicked { channel, .. } => Some(channel),
        }
    }
}

impl ErrorExt for BusError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidChannelName { .. } => StatusCode::InvalidChannelName,
            Self::InvalidMessage { .. } => StatusCode::InvalidMessage,
            Self::InvalidCallback { .. } => StatusCode::InvalidCallback,
            Self::NoSubscribers { .. } => StatusCode::NoSubscribers,
            Self::ShutDown => StatusCode::ShutDown,
            Self::CallbackPanicked { .. } => StatusCode::CallbackPanicked,
            Self::CompactorPanicked { .. } => StatusCode::CompactorPanicked,
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "bus".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        if let Some(channel) = self.channel() {
            tags.push(("channel", channel.to_string()));
        }
        match self {
            Self::CallbackPanicked { subscriber, .. } => {
                tags.push(("subscriber", subscriber.to_string()));
            }
            Self::CompactorPanicked { kind, .. } => {
                tags.push(("kind", kind.clone()));
            }
            _ => {}
        }

        tags
    }
}
