use crate::controller::RequestController;
use crate::registry::CancelOutcome;
use crate::tools::{Tool, ToolEntry, ToolError, not_found, request_id_arg};
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct CancelRequestTool;

#[async_trait]
impl Tool for CancelRequestTool {
    fn name(&self) -> &'static str {
        "cancel_request"
    }

    fn description(&self) -> &'static str {
        "Cancel a tracked chat request that is still in flight"
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
        Ok(match controller.cancel(id) {
            CancelOutcome::NotFound => not_found(id),
            CancelOutcome::AlreadyTerminal(status) => json!({
                "request_id": id,
                "status": status.as_str(),
                "message": format!("request already {status}"),
            }),
            CancelOutcome::Cancelled => json!({
                "request_id": id,
                "status": "cancelled",
                "message": "request cancelled",
            }),
        })
    }
}

inventory::submit!(ToolEntry {
    factory: || Box::new(CancelRequestTool),
});
