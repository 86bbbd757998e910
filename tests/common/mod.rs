#![allow(dead_code)]

use axum::Json;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use futures_util::StreamExt;
use lmrelay::config::RelayConfig;
use lmrelay::controller::RequestController;
use lmrelay::registry::RequestRegistry;
use lmrelay::upstream::UpstreamClient;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Bodies received by the mock upstream, oldest first.
pub type Captured = Arc<Mutex<Vec<Value>>>;

pub struct MockUpstream {
    pub addr: SocketAddr,
    pub captured: Captured,
}

impl MockUpstream {
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn last_body(&self) -> Value {
        self.captured
            .lock()
            .map(|guard| guard.last().cloned().unwrap_or(Value::Null))
            .unwrap_or(Value::Null)
    }
}

fn last_user_prompt(body: &Value) -> String {
    body.get("messages")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.last())
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

pub fn delta_line(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({ "choices": [{ "index": 0, "delta": { "content": text } }] })
    )
}

fn sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(body)
        .unwrap()
}

/// Streams `count` one-character deltas, then stalls without ever finishing.
fn stalled_stream(count: usize) -> Response {
    let head = futures_util::stream::iter(
        (0..count).map(|_| Ok::<_, Infallible>(Bytes::from(delta_line("x")))),
    );
    let body = head.chain(futures_util::stream::pending());
    sse_response(Body::from_stream(body))
}

async fn chat(
    axum::extract::State(captured): axum::extract::State<Captured>,
    Json(body): Json<Value>,
) -> Response {
    if let Ok(mut guard) = captured.lock() {
        guard.push(body.clone());
    }
    let prompt = last_user_prompt(&body);
    let streaming = body.get("stream").and_then(|v| v.as_bool()) == Some(true);

    match prompt.as_str() {
        "hang" => {
            tokio::time::sleep(Duration::from_secs(60)).await;
            return Json(json!({ "choices": [{ "message": { "content": "late" } }] }))
                .into_response();
        }
        "fail" => {
            return (StatusCode::SERVICE_UNAVAILABLE, "E".repeat(600)).into_response();
        }
        "garbage" => {
            return (StatusCode::OK, "not json at all").into_response();
        }
        "empty" => {
            return Json(json!({ "id": "chatcmpl-empty", "choices": [] })).into_response();
        }
        "stall-stream" => return stalled_stream(60),
        _ => {}
    }

    if streaming {
        let mut lines: Vec<String> = ["Hel", "lo", ", ", "world"]
            .iter()
            .map(|t| delta_line(t))
            .collect();
        lines.insert(2, "data: {broken\n\n".to_string());
        lines.push("data: [DONE]\n\n".to_string());
        let chunks = lines
            .into_iter()
            .map(|l| Ok::<_, Infallible>(Bytes::from(l)))
            .collect::<Vec<_>>();
        return sse_response(Body::from_stream(futures_util::stream::iter(chunks)));
    }

    let text = if prompt == "ping" {
        "pong".to_string()
    } else {
        format!("echo:{prompt}")
    };
    Json(json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "model": body.get("model").cloned().unwrap_or(Value::Null),
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": text } }]
    }))
    .into_response()
}

pub async fn start_upstream() -> MockUpstream {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route("/v1/chat/completions", post(chat))
        .with_state(Arc::clone(&captured));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    MockUpstream { addr, captured }
}

pub fn relay_config(base_url: String) -> RelayConfig {
    RelayConfig {
        base_url,
        ..RelayConfig::default()
    }
}

pub fn controller_with(config: RelayConfig) -> RequestController {
    let config = Arc::new(config);
    RequestController::new(
        UpstreamClient::new(reqwest::Client::new(), config.base_url.clone()),
        RequestRegistry::new(),
        config,
    )
}

/// Polls until `check` holds, failing the test after two seconds.
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
