use crate::controller::{ChatFailure, RequestController};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

pub mod cancel_request;
pub mod chat_completion;
pub mod list_active_requests;
pub mod request_status;

/// A decoded call from the outer protocol layer.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error(transparent)]
    Chat(#[from] ChatFailure),
    #[error("internal error: {0}")]
    Internal(String),
}

#[async_trait]
pub trait Tool: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    async fn call(&self, controller: &RequestController, args: Value) -> Result<Value, ToolError>;
}

pub struct ToolEntry {
    pub factory: fn() -> Box<dyn Tool>,
}

inventory::collect!(ToolEntry);

pub type ToolRegistry = HashMap<&'static str, Arc<dyn Tool>>;

pub fn registry() -> ToolRegistry {
    let mut map = HashMap::new();
    for entry in inventory::iter::<ToolEntry> {
        let tool = (entry.factory)();
        map.insert(tool.name(), Arc::<dyn Tool>::from(tool));
    }
    map
}

/// Tool catalog as served to clients, sorted by name.
pub fn definitions(registry: &ToolRegistry) -> Vec<Value> {
    let mut tools: Vec<&Arc<dyn Tool>> = registry.values().collect();
    tools.sort_by_key(|tool| tool.name());
    tools
        .into_iter()
        .map(|tool| {
            json!({
                "name": tool.name(),
                "description": tool.description(),
                "input_schema": tool.input_schema(),
            })
        })
        .collect()
}

pub async fn dispatch(
    registry: &ToolRegistry,
    controller: &RequestController,
    call: ToolCall,
) -> Result<Value, ToolError> {
    let tool = registry
        .get(call.name.as_str())
        .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
    let args = match call.arguments {
        Value::Null => json!({}),
        Value::Object(_) => call.arguments,
        _ => {
            return Err(ToolError::InvalidArguments(
                "arguments must be an object".to_string(),
            ));
        }
    };
    tracing::debug!(tool = %call.name, "dispatching tool call");
    tool.call(controller, args).await
}

pub(crate) fn request_id_arg(args: &Value) -> Result<&str, ToolError> {
    args.get("request_id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            ToolError::InvalidArguments("request_id is required and must be a string".to_string())
        })
}

pub(crate) fn not_found(request_id: &str) -> Value {
    json!({ "request_id": request_id, "status": "not_found" })
}
