//! Notification queue between worker threads and the presentation layer.
//!
//! Producers (the launcher, cache sweeps) post typed notices from any
//! thread; the presentation layer drains the queue on its own schedule.
//! The queue is bounded: when the consumer falls behind, new notices are
//! dropped with a log line instead of blocking the producer.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::warn;

/// A user-facing event produced outside the presentation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Success(String),
    Failure(String),
}

impl Notice {
    pub fn text(&self) -> &str {
        match self {
            Notice::Info(text) | Notice::Success(text) | Notice::Failure(text) => text,
        }
    }
}

/// Bounded multi-producer queue of notices.
#[derive(Clone)]
pub struct NoticeQueue {
    tx: Sender<Notice>,
    rx: Receiver<Notice>,
}

impl NoticeQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    /// Posts a notice without blocking; a full queue drops the notice.
    pub fn post(&self, notice: Notice) {
        if self.tx.try_send(notice.clone()).is_err() {
            warn!(
                operation = "notify.post",
                dropped = notice.text(),
                "notification queue full, dropping notice"
            );
        }
    }

    /// Drains every queued notice in arrival order.
    pub fn drain(&self) -> Vec<Notice> {
        let mut notices = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(notice) => notices.push(notice),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        notices
    }
}

impl Default for NoticeQueue {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_and_drain_in_order() {
        let queue = NoticeQueue::new(8);
        queue.post(Notice::Info("fetching".into()));
        queue.post(Notice::Success("reindex finished".into()));

        let drained = queue.drain();
        assert_eq!(
            drained,
            vec![
                Notice::Info("fetching".into()),
                Notice::Success("reindex finished".into())
            ]
        );
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let queue = NoticeQueue::new(2);
        queue.post(Notice::Info("one".into()));
        queue.post(Notice::Info("two".into()));
        // Does not block even though the queue is full
        queue.post(Notice::Info("three".into()));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].text(), "one");
    }

    #[test]
    fn test_cross_thread_posting() {
        let queue = NoticeQueue::new(16);
        let producer = queue.clone();
        let handle = std::thread::spawn(move || {
            producer.post(Notice::Failure("till sync failed".into()));
        });
        handle.join().unwrap();

        let drained = queue.drain();
        assert_eq!(drained, vec![Notice::Failure("till sync failed".into())]);
    }
}
