use std::{
    fmt,
    rc::{Rc, Weak},
};

use super::{ChannelName, Message};

/// Callback подписчика. Идентичность callback определяется указателем `Rc`.
pub type Callback = Rc<dyn Fn(&Message)>;

/// Слабая ссылка на callback: шина не продлевает его жизнь.
pub type WeakCallback = Weak<dyn Fn(&Message)>;

/// Предикат фильтра или продолжения подписки.
pub type Predicate = Rc<dyn Fn(&Message) -> bool>;

/// Оборачивает замыкание в [`Callback`].
pub fn callback(f: impl Fn(&Message) + 'static) -> Callback {
    Rc::new(f)
}

/// Оборачивает замыкание в [`Predicate`].
pub fn predicate(f: impl Fn(&Message) -> bool + 'static) -> Predicate {
    Rc::new(f)
}

/// Идентификатор записи подписчика.
///
/// Монотонно растёт в пределах одной шины и никогда не переиспользуется,
/// поэтому служит одновременно индексом и поколением.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u64);

impl SubscriberId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Непрозрачный handle подписки, возвращаемый `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub(crate) channel: ChannelName,
    pub(crate) id: SubscriberId,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> &ChannelName {
        &self.channel
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

/// Необязательные параметры подписки.
///
/// - `filter` вызывается перед callback; `false` пропускает доставку, но
///   подписка остаётся.
/// - `continuation` вызывается после успешной доставки; `false` снимает
///   подписку (текущая доставка уже засчитана).
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    pub(crate) filter: Option<Predicate>,
    pub(crate) continuation: Option<Predicate>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(
        self,
        f: impl Fn(&Message) -> bool + 'static,
    ) -> Self {
        self.with_filter(Rc::new(f))
    }

    /// Фильтр с сохранённой идентичностью: его можно передать в
    /// `unsubscribe`.
    pub fn with_filter(
        mut self,
        filter: Predicate,
    ) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn continue_while(
        self,
        f: impl Fn(&Message) -> bool + 'static,
    ) -> Self {
        self.with_continuation(Rc::new(f))
    }

    pub fn with_continuation(
        mut self,
        continuation: Predicate,
    ) -> Self {
        self.continuation = Some(continuation);
        self
    }

    /// Подписка на одну доставку.
    pub fn once(self) -> Self {
        self.continue_while(|_| false)
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("filter", &self.filter.is_some())
            .field("continuation", &self.continuation.is_some())
            .finish()
    }
}

/// Ссылка на callback внутри записи подписчика.
#[derive(Clone)]
pub(crate) enum CallbackRef {
    Strong(Callback),
    Weak(WeakCallback),
}

impl CallbackRef {
    /// `None`: владелец callback уже освободил его.
    pub(crate) fn resolve(&self) -> Option<Callback> {
        match self {
            Self::Strong(cb) => Some(cb.clone()),
            Self::Weak(weak) => weak.upgrade(),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        match self {
            Self::Strong(_) => true,
            Self::Weak(weak) => weak.strong_count() > 0,
        }
    }

    pub(crate) fn points_to(
        &self,
        other: &Callback,
    ) -> bool {
        let other = Rc::as_ptr(other) as *const ();
        match self {
            Self::Strong(cb) => Rc::as_ptr(cb) as *const () == other,
            Self::Weak(weak) => Weak::as_ptr(weak) as *const () == other,
        }
    }
}

/// Запись подписчика в списке канала.
///
/// Удаляется физически только лениво, при начале доставки следующего
/// сообщения в канале.
pub(crate) struct Subscriber {
    pub(crate) id: SubscriberId,
    pub(crate) callback: Option<CallbackRef>,
    pub(crate) filter: Option<Predicate>,
    pub(crate) continuation: Option<Predicate>,
    pub(crate) deleted: bool,
}

impl Subscriber {
    pub(crate) fn new(
        id: SubscriberId,
        callback: CallbackRef,
        options: SubscribeOptions,
    ) -> Self {
        Self {
            id,
            callback: Some(callback),
            filter: options.filter,
            continuation: options.continuation,
            deleted: false,
        }
    }

    pub(crate) fn matches(
        &self,
        callback: &Callback,
        filter: Option<&Predicate>,
    ) -> bool {
        let same_callback = self
            .callback
            .as_ref()
            .is_some_and(|cb| cb.points_to(callback));
        let same_filter = match filter {
            None => true,
            Some(f) => self.filter.as_ref().is_some_and(|own| Rc::ptr_eq(own, f)),
        };
        same_callback && same_filter
    }

    /// Помечает запись удалённой и отдаёт ссылки на пользовательский код,
    /// чтобы вызывающий уничтожил их вне заимствования состояния шины.
    pub(crate) fn retire(&mut self) -> Retired {
        self.deleted = true;
        Retired {
            _callback: self.callback.take(),
            _filter: self.filter.take(),
            _continuation: self.continuation.take(),
        }
    }
}

/// Отложенное уничтожение пользовательских замыканий.
#[must_use]
pub(crate) struct Retired {
    _callback: Option<CallbackRef>,
    _filter: Option<Predicate>,
    _continuation: Option<Predicate>,
}
