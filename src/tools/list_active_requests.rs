use crate::controller::RequestController;
use crate::tools::{Tool, ToolEntry, ToolError};
use async_trait::async_trait;
use serde_json::{Value, json};

pub struct ListActiveRequestsTool;

#[async_trait]
impl Tool for ListActiveRequestsTool {
    fn name(&self) -> &'static str {
        "list_active_requests"
    }

    fn description(&self) -> &'static str {
        "List tracked chat requests that have not finished yet"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn call(&self, controller: &RequestController, _args: Value) -> Result<Value, ToolError> {
        let requests = controller.list_active();
        let count = requests.len();
        let requests =
            serde_json::to_value(requests).map_err(|err| ToolError::Internal(err.to_string()))?;
        Ok(json!({ "count": count, "requests": requests }))
    }
}

inventory::submit!(ToolEntry {
    factory: || Box::new(ListActiveRequestsTool),
});
