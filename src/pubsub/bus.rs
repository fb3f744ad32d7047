use std::{
    cell::{Cell, RefCell},
    fmt,
    panic::{self, AssertUnwindSafe},
    rc::{Rc, Weak},
    sync::Arc,
};

use soundbus_error::BusError;
use tracing::{debug, error, info, warn};

use super::{
    compactor::{absorb, panic_reason, Absorb, Compactors},
    gate::{LevelGate, PostDrainQueue},
    intern::prune_unused_channels,
    registry::{Pending, Registry},
    scheduler::{dispatch_next, ExecutionQueue, StepMode},
    subscriber::{CallbackRef, Subscriber},
    trigger::{build_trigger, DeferredTrigger, ReadyQueue, TokioLocalTrigger, Wake},
    Callback, ChannelName, Compactor, Message, Predicate, SubscribeOptions,
    SubscriptionHandle, WeakCallback,
};
use crate::{config::BusSettings, error::log_bus_error};

/// Изменяемое состояние шины. Никогда не заимствуется во время вызова
/// пользовательского callback, фильтра, продолжения или post-drain колбэка.
#[derive(Default)]
pub(crate) struct State {
    pub(crate) registry: Registry,
    pub(crate) compactors: Compactors,
    pub(crate) execution: ExecutionQueue,
}

/// Счётчики шины.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    published: Cell<u64>,
    compacted: Cell<u64>,
    rejected: Cell<u64>,
    delivered: Cell<u64>,
    panics: Cell<u64>,
}

impl Counters {
    fn bump(cell: &Cell<u64>) {
        cell.set(cell.get() + 1);
    }

    pub(crate) fn record_delivered(&self) {
        Self::bump(&self.delivered);
    }

    pub(crate) fn record_panic(&self) {
        Self::bump(&self.panics);
    }
}

/// Снимок статистики шины.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusStats {
    /// Успешные вызовы `publish` (включая поглощённые компактором).
    pub published: u64,
    /// Сообщения, поглощённые компактором.
    pub compacted: u64,
    /// Отклонённые вызовы API.
    pub rejected: u64,
    /// Вызовы callback, завершившиеся без паники.
    pub delivered: u64,
    /// Паники в callback и post-drain колбэках.
    pub panics: u64,
    pub channels: usize,
    /// Записи глобальной очереди (одна на сообщение в очереди канала).
    pub queued_occurrences: usize,
    pub post_drain_pending: usize,
    pub level: usize,
}

pub(crate) struct Shared {
    pub(crate) state: RefCell<State>,
    pub(crate) gate: LevelGate,
    pub(crate) post_drain: PostDrainQueue,
    pub(crate) stats: Counters,
    trigger: Rc<dyn DeferredTrigger>,
    settings: BusSettings,
    closed: Cell<bool>,
    draining: Cell<bool>,
}

impl Shared {
    /// Понижает уровень и, если он стал 0, дренирует очереди.
    pub(crate) fn release(&self) {
        if !self.gate.lower() {
            warn!("release_callbacks called without a matching block_callbacks; ignoring");
            return;
        }
        self.drain();
    }

    /// Итеративный дренаж: сначала все шаги доставки, затем по одному
    /// post-drain колбэку, снова дренируя доставку перед каждым следующим.
    fn drain(&self) {
        let mut steps = 0usize;
        let mut warned = false;
        loop {
            while self.gate.is_open() && dispatch_next(self, StepMode::Batch) {
                steps += 1;
                if let Some(limit) = self.settings.max_drain_steps {
                    if steps > limit && !warned {
                        warned = true;
                        warn!(
                            steps,
                            limit,
                            queued = self.state.borrow().execution.len(),
                            "Drain exceeded max_drain_steps; possible publish cascade"
                        );
                    }
                }
            }
            if !self.gate.is_open() {
                return;
            }
            let Some(call) = self.post_drain.pop() else {
                break;
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(call)) {
                self.stats.record_panic();
                error!(
                    reason = %panic_reason(payload.as_ref()),
                    "after_all_events callback failed"
                );
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.state.borrow().execution.is_empty() && self.post_drain.is_empty()
    }
}

/// Шина событий с отложенной, реентерабельно-безопасной доставкой.
///
/// `Bus`: явный контекстный объект: создаётся владельцем приложения,
/// дёшево клонируется и передаётся компонентам, которые публикуют или
/// подписываются. Все клоны разделяют одно состояние. Шина однопоточная
/// (`!Send`).
///
/// Гарантии:
/// - `publish` никогда не вызывает подписчиков синхронно;
/// - сообщения канала доставляются в порядке постановки в очередь;
/// - подписчики сообщения фиксируются снимком в момент начала его доставки;
/// - пока уровень больше 0 (`block_callbacks`/`hold`), доставка не идёт.
#[derive(Clone)]
pub struct Bus {
    shared: Rc<Shared>,
}

/// Слабая ссылка на шину, для callback, которым нужна шина без создания
/// цикла владения.
#[derive(Clone)]
pub struct WeakBus {
    shared: Weak<Shared>,
}

impl WeakBus {
    pub fn upgrade(&self) -> Option<Bus> {
        self.shared.upgrade().map(|shared| Bus { shared })
    }
}

impl Bus {
    /// Создаёт шину с заданным отложенным триггером.
    pub fn new(
        settings: BusSettings,
        trigger: Rc<dyn DeferredTrigger>,
    ) -> Self {
        debug!(?settings, "Creating bus");
        Self {
            shared: Rc::new(Shared {
                state: RefCell::new(State::default()),
                gate: LevelGate::default(),
                post_drain: PostDrainQueue::default(),
                stats: Counters::default(),
                trigger,
                settings,
                closed: Cell::new(false),
                draining: Cell::new(false),
            }),
        }
    }

    /// Шина, которая будится через `tokio::task::spawn_local`.
    pub fn local(settings: BusSettings) -> Self {
        Self::new(settings, Rc::new(TokioLocalTrigger))
    }

    /// Шина с явной очередью готовых задач, которую прокачивает хост.
    pub fn manual(settings: BusSettings) -> (Self, ReadyQueue) {
        let queue = ReadyQueue::new();
        let bus = Self::new(settings, Rc::new(queue.clone()));
        (bus, queue)
    }

    /// Шина с триггером из `settings.trigger`.
    pub fn from_settings(settings: BusSettings) -> (Self, Option<ReadyQueue>) {
        let (trigger, queue) = build_trigger(settings.trigger);
        (Self::new(settings, trigger), queue)
    }

    pub fn downgrade(&self) -> WeakBus {
        WeakBus {
            shared: Rc::downgrade(&self.shared),
        }
    }

    ////////////////////////////////////////////////////////////////////////
    // Публикация
    ////////////////////////////////////////////////////////////////////////

    /// Публикует сообщение в канал.
    ///
    /// Возвращает текущую длину списка подписчиков канала. Доставка всегда
    /// откладывается: сообщение ставится в очередь (или поглощается
    /// компактором), а планировщик будится через триггер.
    pub fn publish(
        &self,
        channel: impl Into<ChannelName>,
        mut message: Message,
    ) -> Result<usize, BusError> {
        let channel = channel.into();
        self.ensure_open()?;
        self.check(channel.validate())?;
        if message.fields().is_none() {
            return self.reject(BusError::InvalidMessage {
                channel: channel.to_string(),
                reason: format!("payload must be an object, got {}", message.payload()),
            });
        }

        let subscribers = self
            .shared
            .state
            .borrow()
            .registry
            .channel(&channel)
            .map(|state| state.subscribers.len());
        let Some(subscribers) = subscribers else {
            return self.reject(BusError::NoSubscribers {
                channel: channel.to_string(),
            });
        };

        message.set_channel(channel.clone());
        self.compact_and_store(&channel, message);
        Counters::bump(&self.shared.stats.published);
        self.wake();
        Ok(subscribers)
    }

    /// Планирует отложенный шаг планировщика через триггер.
    pub fn wake(&self) {
        self.shared
            .trigger
            .defer(Wake::new(Rc::downgrade(&self.shared)));
    }

    fn compact_and_store(
        &self,
        channel: &ChannelName,
        message: Message,
    ) {
        let mut state = self.shared.state.borrow_mut();
        let State {
            registry,
            compactors,
            execution,
        } = &mut *state;
        let Some(chan) = registry.channel_mut(channel) else {
            return;
        };

        if let Some(compactor) = message.kind().and_then(|kind| compactors.get(kind)) {
            match absorb(&compactor, &message, &mut chan.queue) {
                Absorb::Into(position) => {
                    Counters::bump(&self.shared.stats.compacted);
                    debug!(%channel, kind = ?message.kind(), position, "Message compacted");
                    return;
                }
                Absorb::NoMatch => {}
                Absorb::Panicked(reason) => {
                    let err = BusError::CompactorPanicked {
                        kind: message.kind().unwrap_or_default().to_string(),
                        reason,
                    };
                    log_bus_error(&err, "Compactor failed; enqueueing message as is");
                }
            }
        }

        chan.queue.push_back(Pending::new(message));
        execution.push(channel.clone());

        let queued = execution.len();
        if queued > self.shared.settings.queue_warn_depth {
            warn!(
                %channel,
                queued,
                limit = self.shared.settings.queue_warn_depth,
                "Dispatch queue is growing past queue_warn_depth"
            );
        }
    }

    /// Регистрирует компактор для тега типа. Последняя регистрация побеждает.
    pub fn register_compactor(
        &self,
        kind: &str,
        compactor: Compactor,
    ) {
        let replaced = self
            .shared
            .state
            .borrow_mut()
            .compactors
            .register(Arc::from(kind), compactor);
        debug!(kind, replaced, "Compactor registered");
    }

    ////////////////////////////////////////////////////////////////////////
    // Подписки
    ////////////////////////////////////////////////////////////////////////

    /// Подписывает callback (сильная ссылка) на канал.
    pub fn subscribe(
        &self,
        channel: impl Into<ChannelName>,
        callback: Callback,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle, BusError> {
        self.register(channel.into(), CallbackRef::Strong(callback), options)
    }

    /// Подписка без владения callback: когда последний владелец отпускает
    /// его, подписка снимается при следующей попытке доставки.
    pub fn subscribe_weak(
        &self,
        channel: impl Into<ChannelName>,
        callback: &Callback,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle, BusError> {
        self.subscribe_downgraded(channel, Rc::downgrade(callback), options)
    }

    /// Как [`Bus::subscribe_weak`], но принимает уже ослабленную ссылку.
    /// Мёртвая ссылка отклоняется с `InvalidCallback`.
    pub fn subscribe_downgraded(
        &self,
        channel: impl Into<ChannelName>,
        callback: WeakCallback,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle, BusError> {
        self.register(channel.into(), CallbackRef::Weak(callback), options)
    }

    /// Подписка ровно на одну доставку.
    pub fn subscribe_once(
        &self,
        channel: impl Into<ChannelName>,
        callback: Callback,
    ) -> Result<SubscriptionHandle, BusError> {
        self.subscribe(channel, callback, SubscribeOptions::new().once())
    }

    /// Подписка, которая снимается при уничтожении возвращённого guard.
    pub fn subscribe_scoped(
        &self,
        channel: impl Into<ChannelName>,
        callback: Callback,
        options: SubscribeOptions,
    ) -> Result<SubscriptionGuard, BusError> {
        let handle = self.subscribe(channel, callback, options)?;
        Ok(SubscriptionGuard {
            bus: self.downgrade(),
            handle: Some(handle),
        })
    }

    fn register(
        &self,
        channel: ChannelName,
        callback: CallbackRef,
        options: SubscribeOptions,
    ) -> Result<SubscriptionHandle, BusError> {
        self.ensure_open()?;
        self.check(channel.validate())?;
        if !callback.is_alive() {
            return self.reject(BusError::InvalidCallback {
                channel: channel.to_string(),
                reason: "callback has already been dropped".to_string(),
            });
        }

        let id = self
            .shared
            .state
            .borrow_mut()
            .registry
            .subscribe(&channel, |id| Subscriber::new(id, callback, options));
        debug!(%channel, subscriber = %id, "Subscribed");
        Ok(SubscriptionHandle { channel, id })
    }

    /// Помечает удалёнными все подписки канала с этим callback (и этим
    /// фильтром, если он передан). Возвращает число снятых подписок.
    ///
    /// Отписка ленивая: она подавляет вызов для сообщения в процессе
    /// доставки, только если курсор ещё не дошёл до подписчика.
    pub fn unsubscribe(
        &self,
        channel: impl Into<ChannelName>,
        callback: &Callback,
        filter: Option<&Predicate>,
    ) -> usize {
        let channel = channel.into();
        let retired = self
            .shared
            .state
            .borrow_mut()
            .registry
            .unsubscribe_matching(&channel, callback, filter);
        let count = retired.len();
        drop(retired);
        debug!(%channel, count, "Unsubscribed by callback");
        count
    }

    /// Снимает ровно одну подписку. `false`, если она уже снята.
    pub fn unsubscribe_handle(
        &self,
        handle: &SubscriptionHandle,
    ) -> bool {
        let retired = self
            .shared
            .state
            .borrow_mut()
            .registry
            .unsubscribe_id(&handle.channel, handle.id);
        let found = retired.is_some();
        drop(retired);
        debug!(channel = %handle.channel, subscriber = %handle.id, found, "Unsubscribed by handle");
        found
    }

    ////////////////////////////////////////////////////////////////////////
    // Каналы
    ////////////////////////////////////////////////////////////////////////

    pub fn has_channel(
        &self,
        channel: impl Into<ChannelName>,
    ) -> bool {
        let channel = channel.into();
        channel.is_valid() && self.shared.state.borrow().registry.has_channel(&channel)
    }

    /// Число неудалённых подписчиков канала (0, если канала нет).
    pub fn subscriber_count(
        &self,
        channel: impl Into<ChannelName>,
    ) -> usize {
        let channel = channel.into();
        self.shared
            .state
            .borrow()
            .registry
            .channel(&channel)
            .map_or(0, |state| state.live_subscribers())
    }

    /// Идемпотентно создаёт канал. После этого `publish` в него принимается
    /// даже без подписчиков.
    pub fn add_channel(
        &self,
        channel: impl Into<ChannelName>,
    ) -> Result<(), BusError> {
        let channel = channel.into();
        self.ensure_open()?;
        self.check(channel.validate())?;
        if self.shared.state.borrow_mut().registry.add_channel(&channel) {
            debug!(%channel, "Channel added");
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////
    // Уровень и дренаж
    ////////////////////////////////////////////////////////////////////////

    /// Приостанавливает доставку (уровень += 1).
    pub fn block_callbacks(&self) {
        self.shared.gate.raise();
    }

    /// Уровень -= 1; на уровне 0 синхронно доставляет всё ожидающее и
    /// выполняет post-drain колбэки.
    pub fn release_callbacks(&self) {
        self.shared.release();
    }

    /// RAII-вариант пары `block_callbacks`/`release_callbacks`.
    pub fn hold(&self) -> CallbackHold {
        self.block_callbacks();
        CallbackHold { bus: self.clone() }
    }

    /// Ставит колбэк, который выполнится после полной доставки всех
    /// ожидающих сообщений. Если шина простаивает, выполняется сразу.
    pub fn after_all_events(
        &self,
        callback: impl FnOnce() + 'static,
    ) {
        self.shared.post_drain.push(Box::new(callback));
        self.block_callbacks();
        self.release_callbacks();
    }

    /// Текущий уровень реентерабельности.
    pub fn level(&self) -> usize {
        self.shared.gate.level()
    }

    /// `true`, если нет ни одного сообщения в очереди и ни одного
    /// post-drain колбэка.
    pub fn is_idle(&self) -> bool {
        self.shared.is_idle()
    }

    /// Ждёт, пока шина не опустеет, уступая исполнителю между проверками.
    ///
    /// Предназначено для шины с [`TokioLocalTrigger`] внутри `LocalSet`.
    /// Не завершится, пока уровень удерживается больше 0.
    pub async fn idle(&self) {
        while !self.is_idle() {
            tokio::task::yield_now().await;
        }
    }

    pub fn stats(&self) -> BusStats {
        let state = self.shared.state.borrow();
        let counters = &self.shared.stats;
        BusStats {
            published: counters.published.get(),
            compacted: counters.compacted.get(),
            rejected: counters.rejected.get(),
            delivered: counters.delivered.get(),
            panics: counters.panics.get(),
            channels: state.registry.len(),
            queued_occurrences: state.execution.len(),
            post_drain_pending: self.shared.post_drain.len(),
            level: self.shared.gate.level(),
        }
    }

    /// Останавливает шину: дренирует все очереди (если уровень позволяет),
    /// затем отклоняет новые публикации и подписки и освобождает всех
    /// подписчиков и компакторы.
    ///
    /// Напоследок из общего пула убираются имена каналов, которые больше
    /// никто не держит.
    pub fn shutdown(&self) {
        if self.shared.closed.get() || self.shared.draining.replace(true) {
            return;
        }
        self.block_callbacks();
        self.release_callbacks();
        self.shared.closed.set(true);

        let (channels, compactors, queued) = {
            let mut state = self.shared.state.borrow_mut();
            let queued = state.execution.len();
            state.execution.clear();
            (
                state.registry.take_all(),
                std::mem::take(&mut state.compactors),
                queued,
            )
        };
        let dropped_calls = self.shared.post_drain.clear();
        let stats = self.stats();
        info!(
            channels = channels.len(),
            undelivered = queued,
            dropped_after_all = dropped_calls,
            published = stats.published,
            delivered = stats.delivered,
            panics = stats.panics,
            "Bus shut down"
        );
        drop(channels);
        drop(compactors);
        let pruned = prune_unused_channels();
        debug!(pruned, "Unused channel names released");
        self.shared.draining.set(false);
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.get()
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.shared.closed.get() {
            return self.reject(BusError::ShutDown);
        }
        Ok(())
    }

    fn check(
        &self,
        result: Result<(), BusError>,
    ) -> Result<(), BusError> {
        match result {
            Ok(()) => Ok(()),
            Err(err) => self.reject(err),
        }
    }

    fn reject<T>(
        &self,
        err: BusError,
    ) -> Result<T, BusError> {
        Counters::bump(&self.shared.stats.rejected);
        log_bus_error(&err, "Bus call rejected");
        Err(err)
    }
}

impl fmt::Debug for Bus {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Bus").field("stats", &self.stats()).finish()
    }
}

/// Удерживает уровень > 0, пока жив. При уничтожении вызывает
/// `release_callbacks`.
#[must_use = "dropping the hold releases callbacks immediately"]
pub struct CallbackHold {
    bus: Bus,
}

impl Drop for CallbackHold {
    fn drop(&mut self) {
        self.bus.release_callbacks();
    }
}

/// Подписка, снимаемая при уничтожении guard.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct SubscriptionGuard {
    bus: WeakBus,
    handle: Option<SubscriptionHandle>,
}

impl SubscriptionGuard {
    pub fn handle(&self) -> Option<&SubscriptionHandle> {
        self.handle.as_ref()
    }

    /// Оставляет подписку навсегда и возвращает её handle.
    pub fn detach(mut self) -> Option<SubscriptionHandle> {
        self.handle.take()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let (Some(handle), Some(bus)) = (self.handle.take(), self.bus.upgrade()) {
            bus.unsubscribe_handle(&handle);
        }
    }
}
