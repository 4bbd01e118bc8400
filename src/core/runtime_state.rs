use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::Value;

use crate::error::WorkflowError;
use crate::graph::Graph;

use super::execution::GraphExecution;
use super::variable_pool::VariablePool;

/// Cooperative cancellation flag shared by every task of a run.
///
/// A child flag reports set when its parent is set, so a container node's
/// nested engine observes the outer run being stopped.
#[derive(Debug, Default)]
pub struct StopEvent {
    flag: AtomicBool,
    parent: Option<Arc<StopEvent>>,
}

impl StopEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child_of(parent: Arc<StopEvent>) -> Self {
        StopEvent {
            flag: AtomicBool::new(false),
            parent: Some(parent),
        }
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clears this flag only; a set parent stays visible.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.parent.as_ref().is_some_and(|p| p.is_set())
    }
}

/// Shared mutable context of a run.
///
/// Workers only read the variable pool; the dispatcher is the one writer.
/// The same state can be handed to several consecutive `run()` calls to
/// resume a paused run.
pub struct GraphRuntimeState {
    variable_pool: RwLock<VariablePool>,
    stop_event: Arc<StopEvent>,
    start_at: Mutex<(DateTime<Utc>, Instant)>,
    outputs: RwLock<HashMap<String, Value>>,
    node_run_steps: AtomicU32,
    execution: Mutex<GraphExecution>,
    graph: OnceLock<Arc<Graph>>,
}

impl GraphRuntimeState {
    pub fn new(variable_pool: VariablePool) -> Self {
        Self::with_stop_event(variable_pool, Arc::new(StopEvent::new()))
    }

    pub fn with_stop_event(variable_pool: VariablePool, stop_event: Arc<StopEvent>) -> Self {
        GraphRuntimeState {
            variable_pool: RwLock::new(variable_pool),
            stop_event,
            start_at: Mutex::new((Utc::now(), Instant::now())),
            outputs: RwLock::new(HashMap::new()),
            node_run_steps: AtomicU32::new(0),
            execution: Mutex::new(GraphExecution::new()),
            graph: OnceLock::new(),
        }
    }

    pub fn variable_pool(&self) -> RwLockReadGuard<'_, VariablePool> {
        self.variable_pool.read()
    }

    /// Write access for the dispatcher and for callers between runs
    /// (e.g. writing a human-input resolution before resuming).
    pub fn variable_pool_mut(&self) -> RwLockWriteGuard<'_, VariablePool> {
        self.variable_pool.write()
    }

    pub fn stop_event(&self) -> &Arc<StopEvent> {
        &self.stop_event
    }

    pub fn mark_started(&self) {
        *self.start_at.lock() = (Utc::now(), Instant::now());
    }

    pub fn start_at(&self) -> DateTime<Utc> {
        self.start_at.lock().0
    }

    pub fn elapsed(&self) -> Duration {
        self.start_at.lock().1.elapsed()
    }

    pub fn outputs(&self) -> HashMap<String, Value> {
        self.outputs.read().clone()
    }

    pub fn outputs_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.outputs.write()
    }

    pub fn node_run_steps(&self) -> u32 {
        self.node_run_steps.load(Ordering::SeqCst)
    }

    /// Returns the new step count.
    pub fn increment_node_run_steps(&self) -> u32 {
        self.node_run_steps.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn reset_node_run_steps(&self) {
        self.node_run_steps.store(0, Ordering::SeqCst);
    }

    pub fn execution(&self) -> MutexGuard<'_, GraphExecution> {
        self.execution.lock()
    }

    /// Bind this state to `graph`. A state serves one graph only.
    pub fn attach_graph(&self, graph: &Arc<Graph>) -> Result<(), WorkflowError> {
        let bound = self.graph.get_or_init(|| Arc::clone(graph));
        if Arc::ptr_eq(bound, graph) {
            Ok(())
        } else {
            Err(WorkflowError::ConfigError(
                "runtime state is already bound to another graph".into(),
            ))
        }
    }

    pub fn graph(&self) -> Option<&Arc<Graph>> {
        self.graph.get()
    }
}

impl Default for GraphRuntimeState {
    fn default() -> Self {
        Self::new(VariablePool::new())
    }
}

impl std::fmt::Debug for GraphRuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphRuntimeState")
            .field("stop_event", &self.stop_event.is_set())
            .field("node_run_steps", &self.node_run_steps())
            .field("status", &self.execution.lock().status())
            .finish()
    }
}
