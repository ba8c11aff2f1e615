use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::types::Frame;

/// Bounded queue carrying received frames from the owning thread to any
/// number of consumer threads.
///
/// `push` never blocks: when the queue already holds `capacity` frames the
/// newest frame is rejected and `push` returns false. What callers do about
/// overflow is their policy, not the queue's.
#[derive(Clone)]
pub struct FrameQueue {
    tx: SyncSender<Frame>,
    rx: Arc<Mutex<Receiver<Frame>>>,
    capacity: usize,
}

impl FrameQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues a frame without blocking. Returns false when full.
    pub fn push(&self, frame: Frame) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    /// Dequeues the oldest frame, if any.
    pub fn pop(&self) -> Option<Frame> {
        self.receiver().try_recv().ok()
    }

    /// Dequeues the oldest frame, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        self.receiver().recv_timeout(timeout).ok()
    }

    fn receiver(&self) -> MutexGuard<'_, Receiver<Frame>> {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u32) -> Frame {
        Frame::new(id, &[]).unwrap()
    }

    #[test]
    fn test_push_pop_fifo() {
        let queue = FrameQueue::with_capacity(4);
        assert!(queue.push(frame(1)));
        assert!(queue.push(frame(2)));
        assert_eq!(queue.pop().unwrap().id, 1);
        assert_eq!(queue.pop().unwrap().id, 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_push_rejects_when_full() {
        let queue = FrameQueue::with_capacity(2);
        assert!(queue.push(frame(1)));
        assert!(queue.push(frame(2)));
        assert!(!queue.push(frame(3)));
        // Draining one slot makes room again.
        assert_eq!(queue.pop().unwrap().id, 1);
        assert!(queue.push(frame(3)));
    }

    #[test]
    fn test_pop_timeout_empty() {
        let queue = FrameQueue::with_capacity(1);
        assert!(queue.pop_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_cloned_handles_share_storage() {
        let queue = FrameQueue::with_capacity(2);
        let producer = queue.clone();
        assert!(producer.push(frame(7)));
        assert_eq!(queue.pop().unwrap().id, 7);
    }
}
