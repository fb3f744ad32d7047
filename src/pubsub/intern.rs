use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Пул для повторного использования Arc<str> по одинаковым именам каналов.
/// Crate-private: другие модули внутри этого крейта видят, а внешние нет.
///
/// Пул общий для всего процесса, поэтому несколько независимых `Bus`
/// (например, в тестах) делят одни и те же ключи. Сам по себе пул только
/// растёт; имена, которые больше никто не держит, убирает
/// [`prune_unused_channels`].
static CHANNEL_INTERN: Lazy<DashMap<Box<str>, Arc<str>>> = Lazy::new(DashMap::new);

/// Возвращает interned Arc<str> для данного канала.
/// При первом вызове для нового имени создаёт Arc<str> и сохраняет его в пуле.
#[inline]
pub(crate) fn intern_channel<S: AsRef<str>>(chan: S) -> Arc<str> {
    let key = chan.as_ref();
    if let Some(existing) = CHANNEL_INTERN.get(key) {
        return existing.clone();
    }
    CHANNEL_INTERN
        .entry(Box::from(key))
        .or_insert_with(|| Arc::from(key))
        .clone()
}

/// Удаляет из пула имена, на которые не осталось ссылок вне пула.
/// Возвращает число удалённых имён.
pub(crate) fn prune_unused_channels() -> usize {
    let before = CHANNEL_INTERN.len();
    CHANNEL_INTERN.retain(|_, name| Arc::strong_count(name) > 1);
    before.saturating_sub(CHANNEL_INTERN.len())
}

#[cfg(test)]
pub(crate) fn is_interned(name: &str) -> bool {
    CHANNEL_INTERN.contains_key(name)
}
