use crate::controller::{ChatRequest, RequestController};
use crate::tools::{Tool, ToolEntry, ToolError};
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct ChatCompletionTool;

#[async_trait]
impl Tool for ChatCompletionTool {
    fn name(&self) -> &'static str {
        "chat_completion"
    }

    fn description(&self) -> &'static str {
        "Send a prompt to the local model and return its reply, optionally tracked for status and cancellation"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "model": { "type": "string" },
                "system": { "type": "string" },
                "prompt": { "type": "string", "minLength": 1 },
                "temperature": { "type": "number", "default": 0.2 },
                "max_tokens": { "type": "integer", "minimum": 1 },
                "timeout_ms": { "type": "integer", "minimum": 1 },
                "stream": { "type": "boolean", "default": false },
                "track_request": { "type": "boolean", "default": false }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    async fn call(&self, controller: &RequestController, args: Value) -> Result<Value, ToolError> {
        let request = parse_request(args)?;
        let reply = controller.start_chat(request).await?;
        Ok(reply.to_value())
    }
}

fn parse_request(args: Value) -> Result<ChatRequest, ToolError> {
    match args.get("prompt") {
        Some(Value::String(prompt)) if !prompt.trim().is_empty() => {}
        _ => {
            return Err(ToolError::InvalidArguments(
                "prompt is required and must be a non-empty string".to_string(),
            ));
        }
    }
    let args = strip_nulls(args);
    serde_json::from_value(args).map_err(|err| ToolError::InvalidArguments(err.to_string()))
}

fn strip_nulls(args: Value) -> Value {
    match args {
        Value::Object(mut map) => {
            map.retain(|_, v| !v.is_null());
            Value::Object(map)
        }
        other => other,
    }
}

inventory::submit!(ToolEntry {
    factory: || Box::new(ChatCompletionTool),
});
