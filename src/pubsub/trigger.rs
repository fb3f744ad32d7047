use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    rc::{Rc, Weak},
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{
    bus::Shared,
    scheduler::{dispatch_next, StepMode},
};

/// Отложенный запуск планировщика.
///
/// `defer` обязан выполнить `wake.run()` только после того, как текущий стек
/// вызовов раскрутится: никогда синхронно внутри `defer`.
pub trait DeferredTrigger {
    fn defer(
        &self,
        wake: Wake,
    );
}

/// Задача пробуждения планировщика конкретной шины.
///
/// Если шина уже уничтожена, запуск ничего не делает.
pub struct Wake {
    target: Weak<Shared>,
}

impl Wake {
    pub(crate) fn new(target: Weak<Shared>) -> Self {
        Self { target }
    }

    /// Запускает шаг планировщика; дальше шина сама дренирует все очереди.
    /// Возвращает `true`, если нашлась работа.
    pub fn run(self) -> bool {
        match self.target.upgrade() {
            Some(shared) => dispatch_next(&shared, StepMode::Wake),
            None => false,
        }
    }
}

impl fmt::Debug for Wake {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Wake")
            .field("alive", &(self.target.strong_count() > 0))
            .finish()
    }
}

/// Пробуждение через `tokio::task::spawn_local`.
///
/// Шина с этим триггером должна публиковать сообщения изнутри
/// `tokio::task::LocalSet`. Вне runtime tokio пробуждение не планируется:
/// публикация остаётся в очереди шины, пишется предупреждение, а доставку
/// запустит следующий `Bus::wake` или `publish` уже внутри `LocalSet`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLocalTrigger;

impl DeferredTrigger for TokioLocalTrigger {
    fn defer(
        &self,
        wake: Wake,
    ) {
        if let Err(err) = tokio::runtime::Handle::try_current() {
            warn!(
                error = %err,
                "No tokio runtime for spawn_local; message stays queued until the next wake"
            );
            return;
        }
        tokio::task::spawn_local(async move {
            wake.run();
        });
    }
}

/// Явная очередь готовых задач однопоточного исполнителя.
///
/// Хост сам решает, когда вызвать [`ReadyQueue::run_ready`]. Удобна для
/// тестов и для встраивания в собственный цикл событий.
#[derive(Debug, Default, Clone)]
pub struct ReadyQueue {
    tasks: Rc<RefCell<VecDeque<Wake>>>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Выполняет задачи, пока очередь не опустеет (включая задачи,
    /// поставленные во время выполнения). Возвращает число выполненных задач.
    pub fn run_ready(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.tasks.borrow_mut().pop_front();
            let Some(wake) = next else {
                break;
            };
            wake.run();
            ran += 1;
        }
        ran
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

impl DeferredTrigger for ReadyQueue {
    fn defer(
        &self,
        wake: Wake,
    ) {
        self.tasks.borrow_mut().push_back(wake);
    }
}

/// Какой триггер использовать (секция `bus.trigger` настроек).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    #[default]
    TokioLocal,
    ReadyQueue,
}

/// Создаёт триггер по настройкам. Для `ReadyQueue` возвращается и сама
/// очередь, которую хост должен прокачивать.
pub fn build_trigger(kind: TriggerKind) -> (Rc<dyn DeferredTrigger>, Option<ReadyQueue>) {
    match kind {
        TriggerKind::TokioLocal => (Rc::new(TokioLocalTrigger), None),
        TriggerKind::ReadyQueue => {
            let queue = ReadyQueue::new();
            (Rc::new(queue.clone()), Some(queue))
        }
    }
}
