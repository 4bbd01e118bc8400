//! Engine core: runtime state, scheduling, workers and the public
//! [`GraphEngine`] entry point.

pub mod command_channel;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod execution;
pub mod layers;
pub mod ready_queue;
pub mod runtime_context;
pub mod runtime_state;
pub mod sub_graph_runner;
pub mod variable_pool;
pub mod worker;
pub mod worker_pool;

pub use command_channel::{CommandChannel, GraphEngineCommand, InMemoryCommandChannel};
pub use config::EngineConfig;
pub use dispatcher::RunOutcome;
pub use engine::GraphEngine;
pub use events::{ContainerKind, ContainerScope, GraphEngineEvent, NodeRunMeta, PauseReason};
pub use execution::{ExecutionStatus, GraphExecution, NodeState};
pub use layers::{DebugLoggingLayer, Layer};
pub use ready_queue::ReadyQueue;
pub use runtime_context::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, TimeProvider,
};
pub use runtime_state::{GraphRuntimeState, StopEvent};
pub use variable_pool::{Segment, Selector, VariablePool};
