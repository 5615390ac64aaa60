//! Blocking handoff queue between the cycle thread and its consumers
//!
//! A `Mutex<VecDeque<T>>` paired with a `Condvar`. Consumers sleep while the
//! queue is empty and every `send` wakes exactly one of them.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Which end of the backlog `receive` takes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainOrder {
    /// Oldest message first
    #[default]
    Fifo,
    /// Most recently sent message first
    Lifo,
}

/// Why `receive_timeout` came back empty-handed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    /// Nothing arrived before the timeout
    Timeout,
    /// The queue was closed and is drained
    Closed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    /// Consumers currently parked on the condvar
    waiting: usize,
}

/// Thread-safe unbounded queue with blocking receive
pub struct MessageQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    order: DrainOrder,
}

impl<T> MessageQueue<T> {
    pub fn new() -> Self {
        Self::with_order(DrainOrder::Fifo)
    }

    pub fn with_order(order: DrainOrder) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
                waiting: 0,
            }),
            not_empty: Condvar::new(),
            order,
        }
    }

    pub fn order(&self) -> DrainOrder {
        self.order
    }

    // Nothing a panicking holder leaves behind can break the queue, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, state: &mut QueueState<T>) -> Option<T> {
        match self.order {
            DrainOrder::Fifo => state.items.pop_front(),
            DrainOrder::Lifo => state.items.pop_back(),
        }
    }

    /// Push a message and wake one waiting consumer
    ///
    /// Never blocks. Messages sent after `close` are dropped.
    pub fn send(&self, msg: T) {
        let mut state = self.lock();
        if state.closed {
            log::trace!("dropping message sent to closed queue");
            return;
        }
        state.items.push_back(msg);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Block until a message is available and take it
    ///
    /// Returns `None` only once the queue is closed and drained.
    pub fn receive(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(msg) = self.take(&mut state) {
                return Some(msg);
            }
            if state.closed {
                return None;
            }
            state.waiting += 1;
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
            state.waiting -= 1;
        }
    }

    /// Like `receive`, but gives up after `timeout`
    ///
    /// Closing is checked under the same lock as the timeout, so a close
    /// that races with an expiring wait is reported as whichever came first.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<T, ReceiveError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(msg) = self.take(&mut state) {
                return Ok(msg);
            }
            if state.closed {
                return Err(ReceiveError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ReceiveError::Timeout);
            }
            state.waiting += 1;
            state = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            state.waiting -= 1;
        }
    }

    /// Take a message if one is already waiting
    pub fn try_receive(&self) -> Option<T> {
        let mut state = self.lock();
        self.take(&mut state)
    }

    /// Drop the backlog if no consumer is parked waiting for it
    ///
    /// A consumer that was woken but has not yet retaken the lock still
    /// counts as waiting, so a message already handed to it is never lost.
    /// Returns the number of messages dropped.
    pub fn discard_unclaimed(&self) -> usize {
        let mut state = self.lock();
        if state.waiting > 0 {
            return 0;
        }
        let dropped = state.items.len();
        state.items.clear();
        dropped
    }

    /// Stop accepting messages and wake every blocked consumer
    ///
    /// Messages already queued can still be received.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_drains_oldest_first() {
        let queue = MessageQueue::with_order(DrainOrder::Fifo);
        queue.send(1);
        queue.send(2);
        queue.send(3);
        assert_eq!(queue.receive(), Some(1));
        assert_eq!(queue.receive(), Some(2));
        assert_eq!(queue.receive(), Some(3));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_lifo_drains_newest_first() {
        let queue = MessageQueue::with_order(DrainOrder::Lifo);
        queue.send(1);
        queue.send(2);
        queue.send(3);
        assert_eq!(queue.receive(), Some(3));
        assert_eq!(queue.receive(), Some(2));
        assert_eq!(queue.receive(), Some(1));
    }

    #[test]
    fn test_receive_blocks_until_send() {
        let queue = Arc::new(MessageQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.receive())
        };

        thread::sleep(Duration::from_millis(50));
        queue.send("go");
        assert_eq!(consumer.join().unwrap(), Some("go"));
    }

    #[test]
    fn test_receive_timeout_expires_on_empty_queue() {
        let queue: MessageQueue<u32> = MessageQueue::new();
        let started = Instant::now();
        assert_eq!(
            queue.receive_timeout(Duration::from_millis(30)),
            Err(ReceiveError::Timeout)
        );
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_close_wakes_blocked_consumers() {
        let queue: Arc<MessageQueue<u32>> = Arc::new(MessageQueue::new());
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.receive())
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        queue.close();
        for consumer in consumers {
            assert_eq!(consumer.join().unwrap(), None);
        }
    }

    #[test]
    fn test_close_keeps_backlog_and_rejects_new_sends() {
        let queue = MessageQueue::new();
        queue.send(7);
        queue.close();
        queue.send(8);
        assert!(queue.is_closed());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.receive(), Some(7));
        assert_eq!(queue.receive(), None);
    }

    #[test]
    fn test_each_send_releases_one_consumer() {
        let queue = Arc::new(MessageQueue::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.receive_timeout(Duration::from_secs(5)))
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        for value in 0..4 {
            queue.send(value);
        }

        let mut received: Vec<u32> = consumers
            .into_iter()
            .map(|c| c.join().unwrap().expect("every consumer gets a value"))
            .collect();
        received.sort_unstable();
        assert_eq!(received, vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_try_receive_does_not_block() {
        let queue = MessageQueue::new();
        assert_eq!(queue.try_receive(), None);
        queue.send('a');
        assert_eq!(queue.try_receive(), Some('a'));
    }

    #[test]
    fn test_receive_timeout_reports_closed_queue() {
        let queue: MessageQueue<u32> = MessageQueue::new();
        queue.send(5);
        queue.close();
        assert_eq!(queue.receive_timeout(Duration::ZERO), Ok(5));
        assert_eq!(queue.receive_timeout(Duration::ZERO), Err(ReceiveError::Closed));
        assert_eq!(
            queue.receive_timeout(Duration::from_millis(20)),
            Err(ReceiveError::Closed)
        );
    }

    #[test]
    fn test_close_during_wait_reports_closed() {
        let queue: Arc<MessageQueue<u32>> = Arc::new(MessageQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.receive_timeout(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(consumer.join().unwrap(), Err(ReceiveError::Closed));
    }

    #[test]
    fn test_discard_unclaimed_clears_idle_backlog() {
        let queue = MessageQueue::new();
        queue.send(1);
        queue.send(2);
        assert_eq!(queue.discard_unclaimed(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.discard_unclaimed(), 0);
    }

    #[test]
    fn test_discard_unclaimed_spares_parked_consumer() {
        let queue: Arc<MessageQueue<u32>> = Arc::new(MessageQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.receive())
        };

        // Wait until the consumer is parked on the condvar
        while queue.lock().waiting == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        queue.send(9);
        queue.discard_unclaimed();
        assert_eq!(consumer.join().unwrap(), Some(9));
    }
}
