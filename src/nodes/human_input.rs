use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use crate::core::events::PauseReason;
use crate::core::variable_pool::{Segment, Selector};
use crate::dsl::schema::{HumanInputNodeData, NodeRunResult, DEFAULT_SOURCE_HANDLE};
use crate::error::NodeError;
use crate::nodes::executor::{NodeContext, NodeExecutor, NodeOutcome};

/// Reserved keys, written under the node's own id, that resolve a pause.
pub const RESOLUTION_HANDLE_KEY: &str = "edge_source_handle";
pub const RESOLUTION_ACTION_KEY: &str = "action";
pub const RESOLUTION_REASON_KEY: &str = "reason";

pub const APPROVE_ACTION: &str = "approve";

/// Pauses the run until a resolution appears in the variable pool.
///
/// Pending: no reserved key is bound, the node ends with a pause request
/// carrying its stable node id. Resolved: the chosen action becomes the
/// outgoing handle.
pub struct HumanInputExecutor {
    data: HumanInputNodeData,
}

impl HumanInputExecutor {
    pub fn new(data: HumanInputNodeData) -> Self {
        Self { data }
    }

    fn form_id(&self, node_id: &str) -> String {
        self.data
            .form_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("{}-form", node_id))
    }
}

fn resolution_string(ctx: &NodeContext<'_>, key: &str) -> Option<String> {
    ctx.pool
        .get(&Selector::new(ctx.node_id, key))
        .and_then(|seg| seg.as_string())
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl NodeExecutor for HumanInputExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let explicit = resolution_string(ctx, RESOLUTION_HANDLE_KEY)
            .or_else(|| resolution_string(ctx, RESOLUTION_ACTION_KEY));
        let reason = resolution_string(ctx, RESOLUTION_REASON_KEY);

        if explicit.is_none() && reason.is_none() {
            return Ok(NodeOutcome::Paused(PauseReason::HumanInputRequired {
                form_id: self.form_id(ctx.node_id),
                node_id: ctx.node_id.to_string(),
            }));
        }

        let graph = ctx.state.graph();
        let action = explicit
            .or_else(|| {
                graph
                    .and_then(|g| g.first_branch_handle(ctx.node_id))
                    .map(str::to_string)
            })
            .unwrap_or_else(|| DEFAULT_SOURCE_HANDLE.to_string());

        // an action without a matching edge follows the default edge
        let handle = match graph {
            Some(g)
                if !g
                    .get_outgoing_edges(ctx.node_id)
                    .iter()
                    .any(|e| e.source_handle == action) =>
            {
                DEFAULT_SOURCE_HANDLE.to_string()
            }
            _ => action.clone(),
        };

        let mut outputs = HashMap::new();
        for field in &self.data.inputs {
            let value = ctx
                .pool
                .get(&Selector::new(ctx.node_id, field.variable.as_str()))
                .filter(|seg| !seg.is_none());
            match value {
                Some(seg) => {
                    outputs.insert(field.variable.clone(), seg.to_value());
                }
                None if field.required => {
                    return Err(NodeError::InputValidationError(format!(
                        "Missing required human input: {}",
                        field.variable
                    )));
                }
                None => {
                    outputs.insert(field.variable.clone(), Segment::None.to_value());
                }
            }
        }
        outputs.insert(
            RESOLUTION_ACTION_KEY.to_string(),
            Value::String(action.clone()),
        );
        outputs.insert("approved".to_string(), Value::Bool(action == APPROVE_ACTION));
        outputs.insert(
            RESOLUTION_REASON_KEY.to_string(),
            reason.map(Value::String).unwrap_or(Value::Null),
        );

        Ok(NodeRunResult::succeeded(outputs).with_handle(handle).into())
    }
}
