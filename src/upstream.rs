use crate::error::ChatError;
use crate::stream;
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// Outbound `/chat/completions` body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatPayload {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
}

impl ChatPayload {
    pub fn new(
        model: &str,
        system: Option<&str>,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
        stream: bool,
    ) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system.filter(|s| !s.is_empty()) {
            messages.push(ChatMessage::new("system", system));
        }
        messages.push(ChatMessage::new("user", prompt));
        Self {
            model: model.to_string(),
            messages,
            temperature,
            max_tokens,
            stream,
        }
    }
}

/// Hooks the client calls while a streamed reply is being read.
pub trait CallObserver: Send + Sync {
    fn stream_opened(&self) {}
    fn progress(&self, _snapshot: String) {}
}

pub struct NoopObserver;

impl CallObserver for NoopObserver {}

pub struct SendOptions<'a> {
    pub deadline: Duration,
    pub cancel: &'a CancellationToken,
    pub progress_every: usize,
    pub observer: &'a dyn CallObserver,
}

#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub text: String,
    /// Raw upstream JSON, or a synthesized envelope for streamed replies.
    pub body: Value,
}

#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl UpstreamClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn endpoint(&self) -> String {
        join_url(&self.base_url, "chat/completions")
    }

    /// Runs one exchange. The deadline and the cancellation token race the
    /// whole exchange, stream reading included; whichever fires first aborts
    /// the in-flight request by dropping it.
    pub async fn send(
        &self,
        payload: &ChatPayload,
        opts: SendOptions<'_>,
    ) -> Result<UpstreamReply, ChatError> {
        let after_ms = opts.deadline.as_millis() as u64;
        let deadline = tokio::time::sleep(opts.deadline);
        tokio::select! {
            biased;
            _ = opts.cancel.cancelled() => Err(ChatError::Cancelled),
            _ = deadline => Err(ChatError::Timeout { after_ms }),
            result = self.exchange(payload, &opts) => result,
        }
    }

    async fn exchange(
        &self,
        payload: &ChatPayload,
        opts: &SendOptions<'_>,
    ) -> Result<UpstreamReply, ChatError> {
        let resp = self
            .http
            .post(self.endpoint())
            .json(payload)
            .send()
            .await
            .map_err(|err| ChatError::Network(err.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ChatError::UpstreamHttp {
                status: status.as_u16(),
                body: truncate_chars(&text, ERROR_BODY_LIMIT),
            });
        }

        if payload.stream {
            opts.observer.stream_opened();
            let text = stream::accumulate(
                resp.bytes_stream(),
                opts.cancel,
                opts.progress_every,
                |snapshot| opts.observer.progress(snapshot),
            )
            .await?;
            let body = json!({ "choices": [{ "message": { "content": text } }] });
            return Ok(UpstreamReply { text, body });
        }

        let raw = resp
            .text()
            .await
            .map_err(|err| ChatError::Network(err.to_string()))?;
        let body: Value =
            serde_json::from_str(&raw).map_err(|err| ChatError::Decode(err.to_string()))?;
        let text = message_content(&body).to_string();
        Ok(UpstreamReply { text, body })
    }
}

/// `choices[0].message.content`, or `""` when any step of the path is absent.
pub fn message_content(body: &Value) -> &str {
    body.get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_prepends_system_message() {
        let payload = ChatPayload::new("m", Some("be brief"), "hi", 0.2, 128, false);
        assert_eq!(
            payload.messages,
            vec![
                ChatMessage::new("system", "be brief"),
                ChatMessage::new("user", "hi")
            ]
        );
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["max_tokens"], 128);
        assert_eq!(value["stream"], false);
    }

    #[test]
    fn payload_without_system_has_only_user_message() {
        let payload = ChatPayload::new("m", None, "hi", 0.2, 128, true);
        assert_eq!(payload.messages, vec![ChatMessage::new("user", "hi")]);
        let empty_system = ChatPayload::new("m", Some(""), "hi", 0.2, 128, true);
        assert_eq!(empty_system.messages.len(), 1);
    }

    #[test]
    fn message_content_defaults_to_empty() {
        assert_eq!(message_content(&json!({})), "");
        assert_eq!(message_content(&json!({ "choices": [] })), "");
        assert_eq!(message_content(&json!({ "choices": [{}] })), "");
        assert_eq!(
            message_content(&json!({ "choices": [{ "message": { "content": null } }] })),
            ""
        );
        assert_eq!(
            message_content(&json!({ "choices": [{ "message": { "content": "pong" } }] })),
            "pong"
        );
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let http = reqwest::Client::new();
        assert_eq!(
            UpstreamClient::new(http.clone(), "http://localhost:1234/v1/").endpoint(),
            "http://localhost:1234/v1/chat/completions"
        );
        assert_eq!(
            UpstreamClient::new(http, "http://localhost:1234/v1").endpoint(),
            "http://localhost:1234/v1/chat/completions"
        );
    }

    #[test]
    fn error_body_truncates_on_char_boundary() {
        let body = "é".repeat(600);
        assert_eq!(truncate_chars(&body, 500).chars().count(), 500);
    }
}
