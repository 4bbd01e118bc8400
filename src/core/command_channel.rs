use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// External control message delivered to a running engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum GraphEngineCommand {
    Abort {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Keys are dotted selectors (`node.field`), written through the dispatcher.
    UpdateVariables { variables: HashMap<String, Value> },
}

/// Source of commands polled by the dispatcher on every tick.
pub trait CommandChannel: Send + Sync {
    /// Drain every pending command.
    fn fetch_commands(&self) -> Vec<GraphEngineCommand>;
    fn send_command(&self, command: GraphEngineCommand);
}

/// Process-local channel, cloned handles share one queue.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCommandChannel {
    inner: Arc<Mutex<VecDeque<GraphEngineCommand>>>,
}

impl InMemoryCommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().len()
    }
}

impl CommandChannel for InMemoryCommandChannel {
    fn fetch_commands(&self) -> Vec<GraphEngineCommand> {
        self.inner.lock().drain(..).collect()
    }

    fn send_command(&self, command: GraphEngineCommand) {
        self.inner.lock().push_back(command);
    }
}
