use crate::controller::RequestController;
use crate::tools::{Tool, ToolEntry, ToolError, not_found, request_id_arg};
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct RequestStatusTool;

#[async_trait]
impl Tool for RequestStatusTool {
    fn name(&self) -> &'static str {
        "request_status"
    }

    fn description(&self) -> &'static str {
        "Report the status and progress of a tracked chat request"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request_id": { "type": "string" }
            },
            "required": ["request_id"],
            "additionalProperties": false
        })
    }

    async fn call(&self, controller: &RequestController, args: Value) -> Result<Value, ToolError> {
        let id = request_id_arg(&args)?;
        match controller.request_status(id) {
            Some(snapshot) => serde_json::to_value(snapshot)
                .map_err(|err| ToolError::Internal(err.to_string())),
            None => Ok(not_found(id)),
        }
    }
}

inventory::submit!(ToolEntry {
    factory: || Box::new(RequestStatusTool),
});
