use std::{fmt, sync::Arc};

use soundbus_error::BusError;

use super::intern_channel;

/// Имя канала: непустая строка или ненулевое целое число.
///
/// Строковые имена интернируются, поэтому клонирование и сравнение дешёвые.
/// Пул имён общий для процесса и переживает отдельную шину: имя остаётся в
/// нём, пока его держит хоть одна шина или хоть один `ChannelName`, а
/// освобождается при `Bus::shutdown`. Приложению, которое создаёт каналы с
/// динамическими именами без конца, лучше брать числовые `Id`.
///
/// `ChannelName::Name("7")` и `ChannelName::Id(7)`: разные каналы.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelName {
    Name(Arc<str>),
    Id(i64),
}

impl ChannelName {
    /// Пустая строка и `0` не являются допустимыми именами канала.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Name(name) => !name.is_empty(),
            Self::Id(id) => *id != 0,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), BusError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(BusError::InvalidChannelName {
                name: self.to_string(),
            })
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Id(id) => write!(f, "{id}"),
        }
    }
}

impl From<&str> for ChannelName {
    fn from(name: &str) -> Self {
        Self::Name(intern_channel(name))
    }
}

impl From<String> for ChannelName {
    fn from(name: String) -> Self {
        Self::Name(intern_channel(name))
    }
}

impl From<&String> for ChannelName {
    fn from(name: &String) -> Self {
        Self::Name(intern_channel(name))
    }
}

impl From<Arc<str>> for ChannelName {
    fn from(name: Arc<str>) -> Self {
        Self::Name(intern_channel(name))
    }
}

impl From<i64> for ChannelName {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<i32> for ChannelName {
    fn from(id: i32) -> Self {
        Self::Id(id.into())
    }
}

impl From<u32> for ChannelName {
    fn from(id: u32) -> Self {
        Self::Id(id.into())
    }
}

impl From<&ChannelName> for ChannelName {
    fn from(name: &ChannelName) -> Self {
        name.clone()
    }
}
