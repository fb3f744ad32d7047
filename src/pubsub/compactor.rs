use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
    sync::Arc,
};

use rustc_hash::FxHashMap;
use serde_json::Value;

use super::{registry::Pending, Message};

/// Решение компактора: какое из двух сообщений выживает.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Survivor {
    /// Новое сообщение уже представлено ожидающим и отбрасывается.
    Existing,
    /// Слить нельзя, новое сообщение встаёт в очередь.
    Candidate,
}

/// Компактор типа сообщения: `(candidate, existing) -> survivor`.
///
/// Компактор выбирается по тегу кандидата, но ему предлагается каждое ещё
/// не начатое сообщение канала, в том числе без тега или с другим тегом:
/// при необходимости он сам проверяет `existing.kind()`. `existing` можно
/// изменить (например, перенести в него поля кандидата). Компактор не должен
/// обращаться к шине.
pub type Compactor = Rc<dyn Fn(&Message, &mut Message) -> Survivor>;

/// Компактор, который всегда оставляет уже ожидающее сообщение.
pub fn keep_existing() -> Compactor {
    Rc::new(|_: &Message, _: &mut Message| Survivor::Existing)
}

/// Компактор "последнее значение побеждает": поля кандидата переносятся в
/// ожидающее сообщение, которое сохраняет своё место в очереди.
pub fn merge_into_existing() -> Compactor {
    Rc::new(|candidate: &Message, existing: &mut Message| {
        let (Some(fields), Value::Object(target)) = (candidate.fields(), existing.payload_mut())
        else {
            return Survivor::Candidate;
        };
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
        Survivor::Existing
    })
}

/// Компакторы по тегу типа. Последняя регистрация побеждает.
#[derive(Default)]
pub(crate) struct Compactors {
    by_kind: FxHashMap<Arc<str>, Compactor>,
}

impl Compactors {
    /// Возвращает `true`, если заменил ранее зарегистрированный компактор.
    pub(crate) fn register(
        &mut self,
        kind: Arc<str>,
        compactor: Compactor,
    ) -> bool {
        self.by_kind.insert(kind, compactor).is_some()
    }

    pub(crate) fn get(
        &self,
        kind: &str,
    ) -> Option<Compactor> {
        self.by_kind.get(kind).cloned()
    }
}

/// Результат попытки компактизации.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Absorb {
    /// Кандидат поглощён сообщением с данной позицией в очереди.
    Into(usize),
    NoMatch,
    /// Компактор запаниковал; кандидат ставится в очередь как обычно.
    Panicked(String),
}

/// Ищет в очереди канала первое ещё не начатое сообщение, которое
/// поглощает кандидата. Первое совпадение в порядке очереди
/// побеждает.
pub(crate) fn absorb(
    compactor: &Compactor,
    candidate: &Message,
    queue: &mut VecDeque<Pending>,
) -> Absorb {
    for (pos, pending) in queue.iter_mut().enumerate() {
        if pending.is_started() {
            continue;
        }
        let existing = Rc::make_mut(&mut pending.message);
        match panic::catch_unwind(AssertUnwindSafe(|| compactor(candidate, existing))) {
            Ok(Survivor::Existing) => return Absorb::Into(pos),
            Ok(Survivor::Candidate) => {}
            Err(payload) => return Absorb::Panicked(panic_reason(payload.as_ref())),
        }
    }
    Absorb::NoMatch
}

/// Текст паники для логов.
pub(crate) fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
