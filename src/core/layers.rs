//! Engine observers.
//!
//! A [`Layer`] sees the lifecycle of every run: start, each event, end.
//! Layer failures are logged and never affect the run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::error::WorkflowError;

use super::events::GraphEngineEvent;
use super::runtime_state::GraphRuntimeState;

pub trait Layer: Send + Sync {
    fn name(&self) -> &str;

    fn on_graph_start(&self, _state: &GraphRuntimeState) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_event(&self, _event: &GraphEngineEvent) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_graph_end(&self, _error: Option<&WorkflowError>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Logs every engine event at `debug` level.
#[derive(Debug, Default)]
pub struct DebugLoggingLayer;

impl Layer for DebugLoggingLayer {
    fn name(&self) -> &str {
        "debug_logging"
    }

    fn on_graph_start(&self, state: &GraphRuntimeState) -> anyhow::Result<()> {
        tracing::debug!(
            variables = state.variable_pool().len(),
            "Graph run starting"
        );
        Ok(())
    }

    fn on_event(&self, event: &GraphEngineEvent) -> anyhow::Result<()> {
        match event.meta() {
            Some(meta) => tracing::debug!(
                event = event.name(),
                node_id = %meta.node_id,
                node_type = %meta.node_type,
                execution_id = %meta.id,
                "Engine event"
            ),
            None => tracing::debug!(event = event.name(), "Engine event"),
        }
        Ok(())
    }

    fn on_graph_end(&self, error: Option<&WorkflowError>) -> anyhow::Result<()> {
        match error {
            Some(e) => tracing::debug!(error = %e, "Graph run ended with error"),
            None => tracing::debug!("Graph run ended"),
        }
        Ok(())
    }
}

/// Run `f` against every layer in order, swallowing errors and panics.
pub(crate) fn notify_layers<F>(layers: &[Arc<dyn Layer>], hook: &str, f: F)
where
    F: Fn(&dyn Layer) -> anyhow::Result<()>,
{
    for layer in layers {
        match std::panic::catch_unwind(AssertUnwindSafe(|| f(layer.as_ref()))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(layer = layer.name(), hook, error = %e, "Layer hook failed")
            }
            Err(_) => tracing::error!(layer = layer.name(), hook, "Layer hook panicked"),
        }
    }
}
