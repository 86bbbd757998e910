use crate::app::AppState;
use crate::error::{AppError, AppResult};
use crate::tools::{self, ToolCall, ToolError};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tools": tools::definitions(&state.tools) }))
}

pub async fn call_tool(
    State(state): State<AppState>,
    Json(call): Json<ToolCall>,
) -> AppResult<Json<Value>> {
    run_tool(&state, call).await.map(Json)
}

/// Every entry still held by the registry, finished ones included.
pub async fn list_requests(State(state): State<AppState>) -> Json<Value> {
    let requests = state.controller.registry().list();
    Json(json!({ "count": requests.len(), "requests": requests }))
}

pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let call = ToolCall::new("request_status", json!({ "request_id": id }));
    run_tool(&state, call).await.map(with_not_found_status)
}

pub async fn cancel_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let call = ToolCall::new("cancel_request", json!({ "request_id": id }));
    run_tool(&state, call).await.map(with_not_found_status)
}

async fn run_tool(state: &AppState, call: ToolCall) -> AppResult<Value> {
    tools::dispatch(&state.tools, &state.controller, call)
        .await
        .map_err(tool_error_to_app)
}

fn with_not_found_status(body: Value) -> Response {
    let status = if body.get("status").and_then(|v| v.as_str()) == Some("not_found") {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };
    (status, Json(body)).into_response()
}

fn tool_error_to_app(err: ToolError) -> AppError {
    match err {
        ToolError::UnknownTool(name) => AppError::new(
            StatusCode::NOT_FOUND,
            "unknown_tool",
            format!("unknown tool: {name}"),
        ),
        ToolError::InvalidArguments(message) => {
            AppError::new(StatusCode::BAD_REQUEST, "invalid_arguments", message)
        }
        ToolError::Chat(failure) => AppError::from(failure.error).with_request_id(failure.request_id),
        ToolError::Internal(message) => {
            AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
                .with_type("server_error")
        }
    }
}
