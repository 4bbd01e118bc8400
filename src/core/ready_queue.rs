use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Result of a bounded pop.
#[derive(Debug, PartialEq, Eq)]
pub enum Pop {
    Item(String),
    Empty,
    Closed,
}

#[derive(Default)]
struct Inner {
    items: VecDeque<String>,
    queued: HashSet<String>,
    closed: bool,
}

/// FIFO of ready node ids shared by the dispatcher and all workers.
///
/// Closing the queue ends every worker's poll loop.
#[derive(Default)]
pub struct ReadyQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the id is already queued or the queue is closed.
    pub fn push(&self, node_id: impl Into<String>) -> bool {
        let node_id = node_id.into();
        {
            let mut inner = self.inner.lock();
            if inner.closed || !inner.queued.insert(node_id.clone()) {
                return false;
            }
            inner.items.push_back(node_id);
        }
        self.notify.notify_one();
        true
    }

    fn try_pop(&self) -> Pop {
        let mut inner = self.inner.lock();
        match inner.items.pop_front() {
            Some(id) => {
                inner.queued.remove(&id);
                Pop::Item(id)
            }
            None if inner.closed => Pop::Closed,
            None => Pop::Empty,
        }
    }

    /// Wait until an item is available. `None` once the queue is closed.
    pub async fn pop(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.try_pop() {
                Pop::Item(id) => return Some(id),
                Pop::Closed => return None,
                Pop::Empty => notified.await,
            }
        }
    }

    pub async fn pop_timeout(&self, timeout: Duration) -> Pop {
        match tokio::time::timeout(timeout, self.pop()).await {
            Ok(Some(id)) => Pop::Item(id),
            Ok(None) => Pop::Closed,
            Err(_) => Pop::Empty,
        }
    }

    /// Remove and return everything queued, in order.
    pub fn drain(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        inner.queued.clear();
        inner.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_and_dedup() {
        let q = ReadyQueue::new();
        assert!(q.push("a"));
        assert!(q.push("b"));
        assert!(!q.push("a"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().await.as_deref(), Some("a"));
        assert!(q.push("a"));
        assert_eq!(q.drain(), vec!["b", "a"]);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_pop_timeout_empty() {
        let q = ReadyQueue::new();
        assert_eq!(q.pop_timeout(Duration::from_millis(10)).await, Pop::Empty);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_wakes_waiters() {
        let q = Arc::new(ReadyQueue::new());
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        assert_eq!(waiter.await.unwrap(), None);
        assert!(!q.push("late"));
        assert_eq!(q.pop_timeout(Duration::from_millis(10)).await, Pop::Closed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_push_wakes_waiter() {
        let q = Arc::new(ReadyQueue::new());
        let waiter = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push("n1");
        assert_eq!(waiter.await.unwrap().as_deref(), Some("n1"));
    }
}
