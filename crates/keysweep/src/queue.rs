use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct State<T> {
    items: VecDeque<T>,
    /// Producers that have not called `close` yet.
    producers: usize,
    cancelled: bool,
}

impl<T> State<T> {
    const fn closed(&self) -> bool {
        self.producers == 0
    }
}

/// A bounded FIFO hand-off between pipeline stages.
///
/// Producers block while the queue is full and consumers block while it is
/// empty. Two ways out:
///
/// - [`close`](Self::close): a producer is done. Once every producer has
///   closed, consumers drain what is left and then see `None`.
/// - [`cancel`](Self::cancel): stop now. Pending items are dropped and every
///   blocked producer or consumer wakes immediately.
pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items (at least one) fed by
    /// `producers` producers (at least one).
    pub fn new(capacity: usize, producers: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                producers: producers.max(1),
                cancelled: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Pushes `item`, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Hands `item` back if the queue was cancelled or fully closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.cancelled && !state.closed() {
            self.not_full.wait(&mut state);
        }
        if state.cancelled || state.closed() {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pops the oldest item, blocking while the queue is empty and still
    /// open. Returns `None` once cancelled, or once closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.cancelled {
                return None;
            }
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed() {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Marks one producer as finished.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.producers = state.producers.saturating_sub(1);
        let closed = state.closed();
        drop(state);
        if closed {
            self.not_empty.notify_all();
        }
    }

    /// Drops pending items and wakes everyone.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        state.items.clear();
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::{scope, sleep};
    use std::time::Duration;

    #[test]
    fn drains_after_all_producers_close() {
        let queue = BoundedQueue::new(2, 2);
        scope(|s| {
            for base in [0, 100] {
                let queue = &queue;
                s.spawn(move || {
                    for i in 0..10 {
                        queue.push(base + i).unwrap();
                    }
                    queue.close();
                });
            }
            let mut seen = Vec::new();
            while let Some(item) = queue.pop() {
                seen.push(item);
            }
            seen.sort_unstable();
            let expected: Vec<_> = (0..10).chain(100..110).collect();
            assert_eq!(seen, expected);
        });
    }

    #[test]
    fn capacity_bounds_producer() {
        let queue = BoundedQueue::new(3, 1);
        scope(|s| {
            s.spawn(|| {
                for i in 0..100 {
                    if queue.push(i).is_err() {
                        break;
                    }
                }
            });
            sleep(Duration::from_millis(50));
            assert!(queue.len() <= queue.capacity());
            queue.cancel();
        });
    }

    #[test]
    fn cancel_wakes_blocked_consumer() {
        let queue = BoundedQueue::<u64>::new(4, 1);
        scope(|s| {
            let consumer = s.spawn(|| queue.pop());
            sleep(Duration::from_millis(20));
            queue.cancel();
            assert_eq!(consumer.join().unwrap(), None);
        });
        assert_eq!(queue.push(1), Err(1));
    }

    #[test]
    fn push_after_close_is_refused() {
        let queue = BoundedQueue::new(4, 1);
        queue.push(1).unwrap();
        queue.close();
        assert_eq!(queue.push(2), Err(2));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), None);
    }
}
