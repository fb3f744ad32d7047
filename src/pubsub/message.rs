use std::sync::Arc;

use serde_json::{Map, Value};

use super::ChannelName;

/// Конверт публикуемого сообщения.
///
/// - `kind`: необязательный тег типа; по нему выбирается компактор.
/// - `payload`: JSON-объект. Любое другое значение отклоняется при
///   публикации с `InvalidMessage`.
/// - `channel` проставляется шиной в момент публикации.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    channel: Option<ChannelName>,
    kind: Option<Arc<str>>,
    payload: Value,
}

impl Message {
    /// Сообщение без тега типа.
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            channel: None,
            kind: None,
            payload: payload.into(),
        }
    }

    /// Сообщение с тегом типа (участвует в компактизации).
    pub fn typed(
        kind: impl Into<Arc<str>>,
        payload: impl Into<Value>,
    ) -> Self {
        Self {
            channel: None,
            kind: Some(kind.into()),
            payload: payload.into(),
        }
    }

    /// Канал, в который сообщение было опубликовано.
    pub fn channel(&self) -> Option<&ChannelName> {
        self.channel.as_ref()
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Value {
        &mut self.payload
    }

    /// Поле объекта полезной нагрузки.
    pub fn get(
        &self,
        field: &str,
    ) -> Option<&Value> {
        self.payload.get(field)
    }

    pub(crate) fn fields(&self) -> Option<&Map<String, Value>> {
        self.payload.as_object()
    }

    pub(crate) fn set_channel(
        &mut self,
        channel: ChannelName,
    ) {
        self.channel = Some(channel);
    }
}

impl From<Value> for Message {
    fn from(payload: Value) -> Self {
        Self::new(payload)
    }
}
