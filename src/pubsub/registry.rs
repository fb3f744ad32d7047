use std::{collections::VecDeque, rc::Rc};

use rustc_hash::FxHashMap;

use super::{
    subscriber::{Retired, Subscriber},
    Callback, ChannelName, Message, Predicate, SubscriberId,
};

/// Сообщение в очереди канала вместе с курсором доставки.
pub(crate) struct Pending {
    pub(crate) message: Rc<Message>,
    /// `None`: доставка ещё не начата, иначе индекс текущего подписчика
    /// в снимке.
    pub(crate) cursor: Option<usize>,
    /// Длина списка подписчиков в момент начала доставки.
    pub(crate) snapshot_len: usize,
}

impl Pending {
    pub(crate) fn new(message: Message) -> Self {
        Self {
            message: Rc::new(message),
            cursor: None,
            snapshot_len: 0,
        }
    }

    pub(crate) fn is_started(&self) -> bool {
        self.cursor.is_some()
    }
}

/// Канал: упорядоченный список подписчиков и FIFO ожидающих сообщений.
#[derive(Default)]
pub(crate) struct ChannelState {
    pub(crate) subscribers: Vec<Subscriber>,
    pub(crate) queue: VecDeque<Pending>,
}

impl ChannelState {
    /// Ленивая очистка: удаляет помеченных подписчиков, проходя список с
    /// конца, чтобы индексы оставшихся не сдвигались до их проверки.
    pub(crate) fn sweep(
        &mut self,
        graveyard: &mut Vec<Subscriber>,
    ) {
        for i in (0..self.subscribers.len()).rev() {
            if self.subscribers[i].deleted {
                graveyard.push(self.subscribers.remove(i));
            }
        }
    }

    pub(crate) fn live_subscribers(&self) -> usize {
        self.subscribers.iter().filter(|s| !s.deleted).count()
    }
}

/// Реестр каналов шины.
#[derive(Default)]
pub(crate) struct Registry {
    channels: FxHashMap<ChannelName, ChannelState>,
    next_id: u64,
}

impl Registry {
    /// Идемпотентно создаёт канал; `true`, если канал новый.
    pub(crate) fn add_channel(
        &mut self,
        channel: &ChannelName,
    ) -> bool {
        if self.channels.contains_key(channel) {
            return false;
        }
        self.channels
            .insert(channel.clone(), ChannelState::default());
        true
    }

    pub(crate) fn has_channel(
        &self,
        channel: &ChannelName,
    ) -> bool {
        self.channels.contains_key(channel)
    }

    pub(crate) fn channel(
        &self,
        channel: &ChannelName,
    ) -> Option<&ChannelState> {
        self.channels.get(channel)
    }

    pub(crate) fn channel_mut(
        &mut self,
        channel: &ChannelName,
    ) -> Option<&mut ChannelState> {
        self.channels.get_mut(channel)
    }

    pub(crate) fn len(&self) -> usize {
        self.channels.len()
    }

    /// Добавляет запись в конец списка подписчиков канала.
    pub(crate) fn subscribe(
        &mut self,
        channel: &ChannelName,
        make: impl FnOnce(SubscriberId) -> Subscriber,
    ) -> SubscriberId {
        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        self.channels
            .entry(channel.clone())
            .or_default()
            .subscribers
            .push(make(id));
        id
    }

    /// Помечает удалёнными все записи с тем же callback (и тем же фильтром,
    /// если он задан).
    pub(crate) fn unsubscribe_matching(
        &mut self,
        channel: &ChannelName,
        callback: &Callback,
        filter: Option<&Predicate>,
    ) -> Vec<Retired> {
        let Some(state) = self.channels.get_mut(channel) else {
            return Vec::new();
        };
        state
            .subscribers
            .iter_mut()
            .filter(|s| !s.deleted && s.matches(callback, filter))
            .map(Subscriber::retire)
            .collect()
    }

    pub(crate) fn unsubscribe_id(
        &mut self,
        channel: &ChannelName,
        id: SubscriberId,
    ) -> Option<Retired> {
        self.subscriber_mut(channel, id)
            .filter(|s| !s.deleted)
            .map(Subscriber::retire)
    }

    pub(crate) fn subscriber_mut(
        &mut self,
        channel: &ChannelName,
        id: SubscriberId,
    ) -> Option<&mut Subscriber> {
        self.channels
            .get_mut(channel)?
            .subscribers
            .iter_mut()
            .find(|s| s.id == id)
    }

    pub(crate) fn is_deleted(
        &self,
        channel: &ChannelName,
        id: SubscriberId,
    ) -> bool {
        self.channels
            .get(channel)
            .and_then(|state| state.subscribers.iter().find(|s| s.id == id))
            .map_or(true, |s| s.deleted)
    }

    /// Забирает все каналы (используется при остановке шины).
    pub(crate) fn take_all(&mut self) -> FxHashMap<ChannelName, ChannelState> {
        std::mem::take(&mut self.channels)
    }
}
