use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

type Observer<E> = Box<dyn FnMut(E)>;

/// Однопоточный источник уведомлений с одним подписчиком.
///
/// Уведомление, отправленное из обработчика, ставится в очередь и доставляется
/// после возврата из текущего обработчика, поэтому порядок сохраняется, а
/// обработчик никогда не вызывается рекурсивно. Подписчик может заменить или
/// снять себя прямо во время доставки.
pub struct Notifier<E> {
    pending: RefCell<VecDeque<E>>,
    delivering: Cell<bool>,
    observer: RefCell<Option<Observer<E>>>,
    generation: Cell<u64>,
}

impl<E> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Notifier<E> {
    pub fn new() -> Self {
        Self {
            pending: RefCell::new(VecDeque::new()),
            delivering: Cell::new(false),
            observer: RefCell::new(None),
            generation: Cell::new(0),
        }
    }

    pub fn subscribe(&self, observer: impl FnMut(E) + 'static) {
        self.generation.set(self.generation.get() + 1);
        *self.observer.borrow_mut() = Some(Box::new(observer));
    }

    pub fn unsubscribe(&self) {
        self.generation.set(self.generation.get() + 1);
        self.observer.borrow_mut().take();
    }

    pub fn emit(&self, event: E) {
        self.pending.borrow_mut().push_back(event);
        if self.delivering.replace(true) {
            return;
        }
        let _guard = DeliveryGuard(&self.delivering);

        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(event) = next else { break };

            let generation = self.generation.get();
            let taken = self.observer.borrow_mut().take();
            if let Some(mut observer) = taken {
                observer(event);
                if self.generation.get() == generation {
                    *self.observer.borrow_mut() = Some(observer);
                }
            }
        }
    }
}

struct DeliveryGuard<'a>(&'a Cell<bool>);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn nested_emit_is_delivered_after_current_observer_returns() {
        let notifier = Rc::new(Notifier::<u32>::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let weak = Rc::downgrade(&notifier);
        let sink = log.clone();
        notifier.subscribe(move |value| {
            sink.borrow_mut().push(format!("begin {}", value));
            if value == 1 {
                if let Some(n) = weak.upgrade() {
                    n.emit(2);
                }
            }
            sink.borrow_mut().push(format!("end {}", value));
        });

        notifier.emit(1);
        assert_eq!(
            *log.borrow(),
            vec!["begin 1", "end 1", "begin 2", "end 2"]
        );
    }

    #[test]
    fn observer_can_unsubscribe_itself() {
        let notifier = Rc::new(Notifier::<u32>::new());
        let count = Rc::new(Cell::new(0));

        let weak = Rc::downgrade(&notifier);
        let seen = count.clone();
        notifier.subscribe(move |_| {
            seen.set(seen.get() + 1);
            if let Some(n) = weak.upgrade() {
                n.unsubscribe();
            }
        });

        notifier.emit(1);
        notifier.emit(2);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn events_without_observer_are_dropped() {
        let notifier = Notifier::<u32>::new();
        notifier.emit(5);

        let seen = Rc::new(Cell::new(0));
        let sink = seen.clone();
        notifier.subscribe(move |v| sink.set(v));
        notifier.emit(9);
        assert_eq!(seen.get(), 9);
    }
}
