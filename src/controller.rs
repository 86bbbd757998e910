use crate::config::RelayConfig;
use crate::error::ChatError;
use crate::registry::{CancelOutcome, RequestRegistry, RequestSnapshot, RequestStatus};
use crate::upstream::{
    CallObserver, ChatPayload, NoopObserver, SendOptions, UpstreamClient, UpstreamReply,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TEMPERATURE: f64 = 0.2;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub track_request: bool,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub request_id: Option<String>,
    pub status: Option<RequestStatus>,
    pub duration_ms: u64,
    pub upstream: Value,
}

impl ChatReply {
    /// The upstream envelope with the relay's own fields layered on top.
    pub fn to_value(&self) -> Value {
        let mut out = match &self.upstream {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        out.insert("text".to_string(), json!(self.text));
        if let Some(id) = &self.request_id {
            out.insert("request_id".to_string(), json!(id));
        }
        if let Some(status) = self.status {
            out.insert("status".to_string(), json!(status.as_str()));
        }
        out.insert("duration_ms".to_string(), json!(self.duration_ms));
        Value::Object(out)
    }
}

/// A failed chat call. Once tracking was set up the id is kept so the caller
/// can still look up the terminal status.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct ChatFailure {
    pub request_id: Option<String>,
    pub error: ChatError,
}

impl ChatFailure {
    fn untracked(error: ChatError) -> Self {
        Self {
            request_id: None,
            error,
        }
    }
}

struct RegistryObserver<'a> {
    registry: &'a RequestRegistry,
    id: &'a str,
}

impl CallObserver for RegistryObserver<'_> {
    fn stream_opened(&self) {
        if let Err(err) = self.registry.transition(self.id, RequestStatus::Streaming) {
            tracing::debug!(request_id = %self.id, error = %err, "stream opened for missing entry");
        }
    }

    fn progress(&self, snapshot: String) {
        tracing::trace!(request_id = %self.id, progress = %snapshot, "stream progress");
        if let Err(err) = self.registry.set_progress(self.id, snapshot) {
            tracing::debug!(request_id = %self.id, error = %err, "progress for missing entry");
        }
    }
}

#[derive(Clone)]
pub struct RequestController {
    client: UpstreamClient,
    registry: RequestRegistry,
    config: Arc<RelayConfig>,
}

impl RequestController {
    pub fn new(client: UpstreamClient, registry: RequestRegistry, config: Arc<RelayConfig>) -> Self {
        Self {
            client,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Runs one chat call to completion. Tracking only adds a registry entry
    /// mirroring the call's progress; the call itself behaves the same.
    ///
    /// The exchange runs on its own task. Dropping the returned future stops
    /// the wait, not the call: it still ends at its deadline or on cancel, and
    /// its entry is finalized and evicted as usual.
    pub async fn start_chat(&self, req: ChatRequest) -> Result<ChatReply, ChatFailure> {
        if req.prompt.trim().is_empty() {
            return Err(ChatFailure::untracked(ChatError::InvalidArguments(
                "prompt must be a non-empty string".to_string(),
            )));
        }
        let model = req
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.config.default_model.as_str())
            .to_string();
        let payload = ChatPayload::new(
            &model,
            req.system.as_deref(),
            &req.prompt,
            req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            self.config.bounded_max_tokens(req.max_tokens),
            req.stream,
        );
        let deadline = Duration::from_millis(self.config.bounded_timeout_ms(req.timeout_ms));
        let started = Instant::now();

        let request_id = req.track_request.then(|| uuid::Uuid::new_v4().to_string());
        let cancel = match &request_id {
            Some(id) => self
                .registry
                .create(id, &model, &req.prompt)
                .map_err(|err| {
                    tracing::error!(request_id = %id, error = %err, "request id collision");
                    ChatFailure::untracked(ChatError::DuplicateId(id.clone()))
                })?,
            None => CancellationToken::new(),
        };

        metrics::counter!("lmrelay_requests_started_total").increment(1);
        tracing::info!(
            request_id = request_id.as_deref().unwrap_or("-"),
            model = %model,
            stream = req.stream,
            timeout_ms = deadline.as_millis() as u64,
            "chat request started"
        );

        if let Some(id) = &request_id {
            let _ = self.registry.transition(id, RequestStatus::Processing);
        }

        let ctl = self.clone();
        let task_id = request_id.clone();
        let call = tokio::spawn(async move {
            let result = match &task_id {
                Some(id) => {
                    let observer = RegistryObserver {
                        registry: &ctl.registry,
                        id,
                    };
                    ctl.send(&payload, deadline, &cancel, &observer).await
                }
                None => ctl.send(&payload, deadline, &cancel, &NoopObserver).await,
            };
            ctl.finalize(task_id, &cancel, started, result)
        });

        match call.await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(
                    request_id = request_id.as_deref().unwrap_or("-"),
                    error = %err,
                    "chat task aborted"
                );
                if let Some(id) = &request_id {
                    let _ = self.registry.transition(id, RequestStatus::Error);
                    self.registry.schedule_eviction(id, self.config.eviction_delay());
                }
                Err(ChatFailure {
                    request_id,
                    error: ChatError::Internal(err.to_string()),
                })
            }
        }
    }

    async fn send(
        &self,
        payload: &ChatPayload,
        deadline: Duration,
        cancel: &CancellationToken,
        observer: &dyn CallObserver,
    ) -> Result<UpstreamReply, ChatError> {
        self.client
            .send(
                payload,
                SendOptions {
                    deadline,
                    cancel,
                    progress_every: self.config.progress_every,
                    observer,
                },
            )
            .await
    }

    fn finalize(
        &self,
        request_id: Option<String>,
        cancel: &CancellationToken,
        started: Instant,
        result: Result<UpstreamReply, ChatError>,
    ) -> Result<ChatReply, ChatFailure> {
        let duration_ms = started.elapsed().as_millis() as u64;
        let target = match &result {
            Ok(_) => RequestStatus::Completed,
            Err(err) if err.is_abort() => RequestStatus::Cancelled,
            Err(_) => RequestStatus::Error,
        };
        if matches!(result, Err(ChatError::Timeout { .. })) {
            cancel.cancel();
        }

        // An external cancel may have landed after the upstream finished; the
        // entry's terminal status wins over the local outcome.
        let status = match &request_id {
            Some(id) => {
                let _ = self.registry.transition(id, target);
                self.registry.schedule_eviction(id, self.config.eviction_delay());
                self.registry.get(id).map(|s| s.status).unwrap_or(target)
            }
            None => target,
        };
        let result = match result {
            Ok(_) if status == RequestStatus::Cancelled => Err(ChatError::Cancelled),
            other => other,
        };

        metrics::counter!("lmrelay_requests_finished_total", "status" => status.as_str())
            .increment(1);
        metrics::histogram!("lmrelay_request_duration_ms").record(duration_ms as f64);

        match result {
            Ok(reply) => {
                tracing::info!(
                    request_id = request_id.as_deref().unwrap_or("-"),
                    duration_ms,
                    chars = reply.text.chars().count(),
                    "chat request completed"
                );
                Ok(ChatReply {
                    text: reply.text,
                    status: request_id.as_ref().map(|_| status),
                    request_id,
                    duration_ms,
                    upstream: reply.body,
                })
            }
            Err(error) => {
                tracing::warn!(
                    request_id = request_id.as_deref().unwrap_or("-"),
                    duration_ms,
                    status = %status,
                    error = %error,
                    "chat request failed"
                );
                Err(ChatFailure { request_id, error })
            }
        }
    }

    pub fn request_status(&self, id: &str) -> Option<RequestSnapshot> {
        self.registry.get(id)
    }

    pub fn cancel(&self, id: &str) -> CancelOutcome {
        let outcome = self.registry.cancel(id);
        match &outcome {
            CancelOutcome::Cancelled => {
                tracing::info!(request_id = %id, "request cancelled by caller");
                self.registry.schedule_eviction(id, self.config.eviction_delay());
            }
            CancelOutcome::AlreadyTerminal(status) => {
                tracing::debug!(request_id = %id, status = %status, "cancel ignored");
            }
            CancelOutcome::NotFound => {
                tracing::debug!(request_id = %id, "cancel for unknown request");
            }
        }
        outcome
    }

    pub fn list_active(&self) -> Vec<RequestSnapshot> {
        self.registry.list_active()
    }
}
