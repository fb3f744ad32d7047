//! Планировщик доставки: один шаг = одно сообщение одному подписчику.
//!
//! Глобальная очередь содержит по одной записи на каждое сообщение в очереди
//! канала. Запись снимается, когда её сообщение доставлено всему снимку
//! подписчиков, поэтому канал с большим числом сообщений занимает столько же
//! слотов и не может вытеснить другие каналы.

use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

use soundbus_error::BusError;
use tracing::{debug, trace, warn};

use super::{
    bus::{Shared, State},
    compactor::panic_reason,
    registry::ChannelState,
    subscriber::{CallbackRef, Subscriber},
    ChannelName, Message, Predicate, SubscriberId,
};
use crate::error::log_bus_error;

/// Глобальная FIFO-очередь вхождений каналов.
#[derive(Debug, Default)]
pub(crate) struct ExecutionQueue {
    entries: VecDeque<ChannelName>,
}

impl ExecutionQueue {
    pub(crate) fn push(
        &mut self,
        channel: ChannelName,
    ) {
        self.entries.push_back(channel);
    }

    pub(crate) fn front(&self) -> Option<&ChannelName> {
        self.entries.front()
    }

    pub(crate) fn pop_front(&mut self) -> Option<ChannelName> {
        self.entries.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Как был вызван шаг.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepMode {
    /// Из цикла дренажа в `release_callbacks`: шаг только понижает уровень.
    Batch,
    /// Из отложенного пробуждения: после шага выполняется release и дренаж.
    Wake,
}

enum Step {
    /// Запись глобальной очереди без сообщения в канале.
    Stale(ChannelName),
    Completed {
        channel: ChannelName,
        recipients: usize,
    },
    Skipped {
        channel: ChannelName,
        id: SubscriberId,
    },
    Deliver(Delivery),
}

struct Delivery {
    channel: ChannelName,
    id: SubscriberId,
    message: Rc<Message>,
    callback: Option<CallbackRef>,
    filter: Option<Predicate>,
    continuation: Option<Predicate>,
}

enum Outcome {
    Filtered,
    Skipped,
    Dead,
    Delivered { keep: bool },
}

/// Выполняет один шаг доставки, если уровень равен 0.
///
/// Возвращает `true`, если в глобальной очереди была работа.
pub(crate) fn dispatch_next(
    shared: &Shared,
    mode: StepMode,
) -> bool {
    if !shared.gate.is_open() {
        return false;
    }

    let mut graveyard = Vec::new();
    let step = plan(&mut shared.state.borrow_mut(), &mut graveyard);
    // Замыкания удалённых подписчиков уничтожаются вне заимствования.
    drop(graveyard);

    let Some(step) = step else {
        return false;
    };

    shared.gate.raise();
    execute(shared, step);
    match mode {
        StepMode::Batch => {
            shared.gate.lower();
        }
        StepMode::Wake => shared.release(),
    }
    true
}

fn plan(
    state: &mut State,
    graveyard: &mut Vec<Subscriber>,
) -> Option<Step> {
    let channel = state.execution.front()?.clone();
    let State {
        registry,
        execution,
        ..
    } = state;

    let Some(chan) = registry.channel_mut(&channel) else {
        execution.pop_front();
        return Some(Step::Stale(channel));
    };
    let starting = match chan.queue.front() {
        None => {
            execution.pop_front();
            return Some(Step::Stale(channel));
        }
        Some(pending) => !pending.is_started(),
    };
    if starting {
        chan.sweep(graveyard);
    }

    let snapshot = chan.subscribers.len();
    let ChannelState { subscribers, queue } = chan;
    let front = queue.front_mut()?;
    let cursor = match front.cursor {
        None => {
            front.snapshot_len = snapshot;
            0
        }
        Some(cursor) => cursor + 1,
    };
    front.cursor = Some(cursor);

    let subscriber = (cursor < front.snapshot_len)
        .then(|| subscribers.get(cursor))
        .flatten();
    let Some(subscriber) = subscriber else {
        let recipients = front.snapshot_len;
        queue.pop_front();
        execution.pop_front();
        return Some(Step::Completed {
            channel,
            recipients,
        });
    };

    if subscriber.deleted {
        return Some(Step::Skipped {
            channel,
            id: subscriber.id,
        });
    }

    Some(Step::Deliver(Delivery {
        channel,
        id: subscriber.id,
        message: front.message.clone(),
        callback: subscriber.callback.clone(),
        filter: subscriber.filter.clone(),
        continuation: subscriber.continuation.clone(),
    }))
}

fn execute(
    shared: &Shared,
    step: Step,
) {
    match step {
        Step::Stale(channel) => {
            warn!(%channel, "Dispatch entry has no queued message; dropping it");
        }
        Step::Completed {
            channel,
            recipients,
        } => {
            trace!(%channel, recipients, "Message fully delivered");
        }
        Step::Skipped { channel, id } => {
            trace!(%channel, subscriber = %id, "Skipping unsubscribed subscriber");
        }
        Step::Deliver(delivery) => deliver(shared, delivery),
    }
}

fn deliver(
    shared: &Shared,
    delivery: Delivery,
) {
    let Delivery {
        channel,
        id,
        message,
        callback,
        filter,
        continuation,
    } = delivery;

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        if let Some(filter) = &filter {
            if !filter(&message) {
                return Outcome::Filtered;
            }
        }
        // Фильтр мог отписать подписчика.
        if shared.state.borrow().registry.is_deleted(&channel, id) {
            return Outcome::Skipped;
        }
        let Some(callback) = callback.as_ref().and_then(CallbackRef::resolve) else {
            return Outcome::Dead;
        };
        callback(&message);
        Outcome::Delivered {
            keep: continuation.as_ref().map_or(true, |c| c(&message)),
        }
    }));

    match result {
        Ok(Outcome::Filtered) => {
            trace!(%channel, subscriber = %id, "Message rejected by subscriber filter");
        }
        Ok(Outcome::Skipped) => {
            trace!(%channel, subscriber = %id, "Subscriber unsubscribed by its filter");
        }
        Ok(Outcome::Dead) => {
            retire(shared, &channel, id);
            debug!(%channel, subscriber = %id, "Subscriber callback was dropped; unsubscribing");
        }
        Ok(Outcome::Delivered { keep }) => {
            shared.stats.record_delivered();
            trace!(%channel, subscriber = %id, keep, "Message delivered");
            if !keep {
                retire(shared, &channel, id);
                debug!(%channel, subscriber = %id, "Continuation declined further messages");
            }
        }
        Err(payload) => {
            shared.stats.record_panic();
            let err = BusError::CallbackPanicked {
                channel: channel.to_string(),
                subscriber: id.get(),
                reason: panic_reason(payload.as_ref()),
            };
            log_bus_error(&err, "Event callback failed");
        }
    }
}

fn retire(
    shared: &Shared,
    channel: &ChannelName,
    id: SubscriberId,
) {
    let retired = shared
        .state
        .borrow_mut()
        .registry
        .subscriber_mut(channel, id)
        .map(Subscriber::retire);
    drop(retired);
}
