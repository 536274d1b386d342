use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Bounded frame queue with a drop-oldest policy.
///
/// Producers never block: pushing onto a full queue evicts the oldest
/// entry and hands it back to the caller (which counts it as dropped).
/// The single consumer waits on a condvar signal instead of spinning.
/// Dropping the oldest keeps playback steadier under bursty encode or
/// send latency than dropping the incoming frame would.
pub struct FrameQueue<T> {
    inner: Mutex<VecDeque<T>>,
    signal: Condvar,
    capacity: usize,
}

impl<T> FrameQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            signal: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueue an item. When the queue is full the oldest entry is evicted
    /// and returned so the caller can count the drop.
    pub fn push(&self, item: T) -> Option<T> {
        let mut q = self.lock();
        let evicted = if q.len() >= self.capacity {
            q.pop_front()
        } else {
            None
        };
        q.push_back(item);
        self.signal.notify_one();
        evicted
    }

    /// Dequeue without waiting.
    pub fn pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Dequeue, waiting up to `timeout` for an item to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut q = self.lock();
        loop {
            if let Some(item) = q.pop_front() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .signal
                .wait_timeout(q, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            q = guard;
        }
    }

    /// Remove the oldest `n` entries. Returns how many were removed.
    pub fn drop_oldest(&self, n: usize) -> usize {
        let mut q = self.lock();
        let count = n.min(q.len());
        q.drain(..count);
        count
    }

    /// Remove and drop everything. Returns how many entries were freed.
    pub fn clear(&self) -> usize {
        let mut q = self.lock();
        let count = q.len();
        q.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn push_pop_fifo() {
        let q = FrameQueue::new(3);
        assert!(q.push(1).is_none());
        assert!(q.push(2).is_none());
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let q = FrameQueue::new(2);
        assert!(q.push(1).is_none());
        assert!(q.push(2).is_none());
        assert_eq!(q.push(3), Some(1)); // oldest evicted
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
    }

    #[test]
    fn never_exceeds_capacity() {
        let q = FrameQueue::new(5);
        for i in 0..100 {
            q.push(i);
            assert!(q.len() <= 5);
        }
        // Survivors are the newest five
        assert_eq!(q.pop(), Some(95));
    }

    #[test]
    fn drop_oldest_keeps_newest() {
        let q = FrameQueue::new(10);
        for i in 0..8 {
            q.push(i);
        }
        assert_eq!(q.drop_oldest(4), 4);
        assert_eq!(q.pop(), Some(4));
    }

    #[test]
    fn drop_oldest_clamps_to_len() {
        let q = FrameQueue::new(10);
        q.push(1);
        assert_eq!(q.drop_oldest(100), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn pop_timeout_times_out() {
        let q: FrameQueue<u8> = FrameQueue::new(1);
        let start = Instant::now();
        assert!(q.pop_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn pop_timeout_wakes_on_push() {
        let q = Arc::new(FrameQueue::new(4));
        let q2 = q.clone();
        let handle = std::thread::spawn(move || q2.pop_timeout(Duration::from_secs(2)));
        std::thread::sleep(Duration::from_millis(20));
        q.push(42u8);
        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn clear_reports_count() {
        let q = FrameQueue::new(4);
        q.push(1);
        q.push(2);
        assert_eq!(q.clear(), 2);
        assert!(q.is_empty());
    }
}
