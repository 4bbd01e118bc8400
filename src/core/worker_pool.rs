use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::EngineConfig;
use super::events::GraphEngineEvent;
use super::ready_queue::ReadyQueue;
use super::runtime_state::StopEvent;
use super::worker::{Worker, WorkerStatus};
use crate::nodes::Node;

/// Sizing knobs of a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub scale_up_threshold: usize,
    pub scale_down_idle_time: Duration,
    pub poll_interval: Duration,
}

impl From<&EngineConfig> for WorkerPoolConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            scale_up_threshold: config.scale_up_threshold,
            scale_down_idle_time: config.scale_down_idle_time(),
            poll_interval: config.dispatcher_poll_interval(),
        }
    }
}

/// Initial worker count by graph size: small graphs start at the minimum,
/// large ones at the maximum.
pub fn initial_worker_count(node_count: usize, config: &WorkerPoolConfig) -> usize {
    let count = match node_count {
        0..=9 => config.min_workers,
        10..=49 => config.min_workers + 1,
        50..=99 => config.min_workers + 2,
        _ => config.max_workers,
    };
    count.clamp(config.min_workers, config.max_workers.max(config.min_workers))
}

struct WorkerHandle {
    status: Arc<WorkerStatus>,
    retire: CancellationToken,
    join: JoinHandle<()>,
}

/// Elastic set of [`Worker`] tasks sharing one ready queue and stop event.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<ReadyQueue>,
    nodes: Arc<HashMap<String, Arc<Node>>>,
    events: mpsc::UnboundedSender<GraphEngineEvent>,
    stop: Arc<StopEvent>,
    workers: Vec<WorkerHandle>,
    next_id: usize,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<ReadyQueue>,
        nodes: Arc<HashMap<String, Arc<Node>>>,
        events: mpsc::UnboundedSender<GraphEngineEvent>,
        stop: Arc<StopEvent>,
    ) -> Self {
        Self {
            config,
            queue,
            nodes,
            events,
            stop,
            workers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn start(&mut self, count: usize) {
        for _ in 0..count {
            self.spawn_worker();
        }
        tracing::debug!(workers = self.workers.len(), "Worker pool started");
    }

    /// Spawn one more worker unless the pool is at its maximum.
    pub fn add_worker(&mut self) -> bool {
        self.prune_finished();
        if self.workers.len() >= self.config.max_workers {
            return false;
        }
        self.spawn_worker();
        true
    }

    pub fn worker_count(&self) -> usize {
        self.workers.iter().filter(|w| !w.join.is_finished()).count()
    }

    pub fn busy_count(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| !w.join.is_finished() && w.status.is_busy())
            .count()
    }

    fn spawn_worker(&mut self) {
        let worker = Worker::new(
            self.next_id,
            Arc::clone(&self.queue),
            Arc::clone(&self.nodes),
            self.events.clone(),
            Arc::clone(&self.stop),
            self.config.poll_interval,
        );
        self.next_id += 1;
        let status = worker.status();
        let retire = worker.retire_token();
        let join = tokio::spawn(worker.run());
        self.workers.push(WorkerHandle {
            status,
            retire,
            join,
        });
    }

    fn prune_finished(&mut self) {
        self.workers.retain(|w| !w.join.is_finished());
    }

    /// Grow when the queue is deep and most workers are busy; otherwise
    /// retire at most one worker that has been idle long enough.
    pub fn check_scaling(&mut self, queue_depth: usize) {
        self.prune_finished();
        let count = self.workers.len();
        if count == 0 {
            return;
        }

        let busy = self.busy_count();
        let utilization = busy as f64 / count as f64;
        if count < self.config.max_workers
            && queue_depth > self.config.scale_up_threshold
            && utilization > 0.8
        {
            self.spawn_worker();
            tracing::info!(
                queue_depth,
                busy,
                workers = self.workers.len(),
                "Scaled worker pool up"
            );
            return;
        }

        if count > self.config.min_workers {
            let idle_time = self.config.scale_down_idle_time;
            if let Some(pos) = self
                .workers
                .iter()
                .position(|w| !w.status.is_busy() && w.status.idle_for() >= idle_time)
            {
                let handle = self.workers.remove(pos);
                handle.retire.cancel();
                tracing::debug!(workers = self.workers.len(), "Retired idle worker");
            }
        }
    }

    /// Join every worker, abandoning any that does not finish within
    /// `join_timeout`.
    pub async fn stop(&mut self, join_timeout: Duration) {
        let handles: Vec<WorkerHandle> = self.workers.drain(..).collect();
        for handle in &handles {
            handle.retire.cancel();
        }
        for handle in handles {
            match tokio::time::timeout(join_timeout, handle.join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Worker task failed"),
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = join_timeout.as_millis() as u64,
                        "Worker did not stop in time; abandoning it"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            min_workers: 1,
            max_workers: 10,
            scale_up_threshold: 3,
            scale_down_idle_time: Duration::from_millis(0),
            poll_interval: Duration::from_millis(5),
        }
    }

    fn pool(config: WorkerPoolConfig) -> WorkerPool {
        let (tx, _rx) = mpsc::unbounded_channel();
        WorkerPool::new(
            config,
            Arc::new(ReadyQueue::new()),
            Arc::new(HashMap::new()),
            tx,
            Arc::new(StopEvent::new()),
        )
    }

    #[test]
    fn test_initial_worker_count_by_graph_size() {
        let cfg = config();
        assert_eq!(initial_worker_count(3, &cfg), 1);
        assert_eq!(initial_worker_count(20, &cfg), 2);
        assert_eq!(initial_worker_count(60, &cfg), 3);
        assert_eq!(initial_worker_count(150, &cfg), 10);

        let tight = WorkerPoolConfig {
            min_workers: 2,
            max_workers: 2,
            ..config()
        };
        assert_eq!(initial_worker_count(60, &tight), 2);
    }

    #[tokio::test]
    async fn test_add_worker_respects_max() {
        let mut pool = pool(WorkerPoolConfig {
            max_workers: 2,
            ..config()
        });
        pool.start(1);
        assert!(pool.add_worker());
        assert!(!pool.add_worker());
        assert_eq!(pool.worker_count(), 2);
        pool.stop(Duration::from_secs(1)).await;
        assert_eq!(pool.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_idle_workers_scale_down_to_min() {
        let mut pool = pool(config());
        pool.start(3);
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.check_scaling(0);
        pool.check_scaling(0);
        pool.check_scaling(0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.worker_count(), 1);
        pool.stop(Duration::from_secs(1)).await;
    }
}
