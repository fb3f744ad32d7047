use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
};

/// Счётчик реентерабельности. Доставка идёт только на уровне 0.
#[derive(Debug, Default)]
pub(crate) struct LevelGate {
    level: Cell<usize>,
}

impl LevelGate {
    pub(crate) fn raise(&self) {
        self.level.set(self.level.get() + 1);
    }

    /// Понижает уровень. `false`: уровень уже был 0 (несбалансированный
    /// release), значение не меняется.
    pub(crate) fn lower(&self) -> bool {
        match self.level.get() {
            0 => false,
            n => {
                self.level.set(n - 1);
                true
            }
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.level.get() == 0
    }

    pub(crate) fn level(&self) -> usize {
        self.level.get()
    }
}

pub(crate) type AfterAll = Box<dyn FnOnce()>;

/// Колбэки, которые выполняются только после полной доставки всех
/// ожидающих сообщений во всех каналах.
#[derive(Default)]
pub(crate) struct PostDrainQueue {
    calls: RefCell<VecDeque<AfterAll>>,
}

impl PostDrainQueue {
    pub(crate) fn push(
        &self,
        call: AfterAll,
    ) {
        self.calls.borrow_mut().push_back(call);
    }

    /// Заимствование отпускается до возврата, так что колбэк может снова
    /// вызвать `push`.
    pub(crate) fn pop(&self) -> Option<AfterAll> {
        self.calls.borrow_mut().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.borrow().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.calls.borrow().is_empty()
    }

    pub(crate) fn clear(&self) -> usize {
        let dropped = std::mem::take(&mut *self.calls.borrow_mut());
        dropped.len()
    }
}
