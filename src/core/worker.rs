use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::GraphEngineEvent;
use super::ready_queue::{Pop, ReadyQueue};
use super::runtime_state::StopEvent;
use crate::nodes::Node;

/// Observable state of one worker, shared with the pool for scaling decisions.
#[derive(Debug)]
pub struct WorkerStatus {
    busy: AtomicBool,
    last_active: Mutex<Instant>,
}

impl WorkerStatus {
    fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
            last_active: Mutex::new(Instant::now()),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn idle_for(&self) -> Duration {
        if self.is_busy() {
            Duration::ZERO
        } else {
            self.last_active.lock().elapsed()
        }
    }

    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
        if !busy {
            *self.last_active.lock() = Instant::now();
        }
    }
}

/// Pulls ready node ids, runs the node and forwards every event it yields.
///
/// Exits when the queue is closed, when the stop event is set and no work
/// is left, or when the pool retires it. A node already running is always
/// driven to its terminal event first.
pub struct Worker {
    id: usize,
    queue: Arc<ReadyQueue>,
    nodes: Arc<HashMap<String, Arc<Node>>>,
    events: mpsc::UnboundedSender<GraphEngineEvent>,
    stop: Arc<StopEvent>,
    status: Arc<WorkerStatus>,
    retire: CancellationToken,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: Arc<ReadyQueue>,
        nodes: Arc<HashMap<String, Arc<Node>>>,
        events: mpsc::UnboundedSender<GraphEngineEvent>,
        stop: Arc<StopEvent>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            nodes,
            events,
            stop,
            status: Arc::new(WorkerStatus::new()),
            retire: CancellationToken::new(),
            poll_interval,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn status(&self) -> Arc<WorkerStatus> {
        Arc::clone(&self.status)
    }

    pub fn retire_token(&self) -> CancellationToken {
        self.retire.clone()
    }

    pub async fn run(self) {
        tracing::debug!(worker_id = self.id, "Worker started");
        loop {
            let popped = tokio::select! {
                _ = self.retire.cancelled() => break,
                popped = self.queue.pop_timeout(self.poll_interval) => popped,
            };
            let node_id = match popped {
                Pop::Closed => break,
                Pop::Empty if self.stop.is_set() => break,
                Pop::Empty => continue,
                Pop::Item(node_id) => node_id,
            };

            let Some(node) = self.nodes.get(&node_id) else {
                tracing::error!(worker_id = self.id, node_id = %node_id, "Unknown node id in ready queue");
                continue;
            };

            self.status.set_busy(true);
            let mut stream = node.run();
            let mut receiver_gone = false;
            while let Some(event) = stream.next().await {
                if self.events.send(event).is_err() {
                    receiver_gone = true;
                    break;
                }
            }
            self.status.set_busy(false);
            if receiver_gone {
                tracing::debug!(worker_id = self.id, "Event receiver dropped");
                break;
            }
        }
        tracing::debug!(worker_id = self.id, "Worker exited");
    }
}
