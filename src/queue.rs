use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Internal queue storage guarded by the queue lock.
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Blocking bounded FIFO shared by producers and one consumer.
///
/// Closing drops every queued item and wakes all waiters; afterwards pushes
/// are rejected and pops return `None`.
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block while full. Hands the item back if the queue is or becomes closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock().expect("batch queue poisoned");
        while !state.closed && state.items.len() >= self.capacity {
            state = self.not_full.wait(state).expect("batch queue poisoned");
        }
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until an item arrives or the queue is closed.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().expect("batch queue poisoned");
        loop {
            if state.closed {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            state = self.not_empty.wait(state).expect("batch queue poisoned");
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock().expect("batch queue poisoned");
        if state.closed {
            return None;
        }
        let item = state.items.pop_front();
        drop(state);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Drop queued items, reject further pushes, and wake every waiter.
    pub fn close(&self) {
        let drained: Vec<T> = {
            let mut state = self.state.lock().expect("batch queue poisoned");
            state.closed = true;
            state.items.drain(..).collect()
        };
        self.not_empty.notify_all();
        self.not_full.notify_all();
        drop(drained);
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("batch queue poisoned").closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("batch queue poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
