use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const PROMPT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Streaming,
    Completed,
    Cancelled,
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Error)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Streaming => 2,
            Self::Completed | Self::Cancelled | Self::Error => 3,
        }
    }

    /// Forward-only: nothing leaves a terminal state, and `cancelled`/`error`
    /// are reachable from any live state.
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Cancelled | Self::Error => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("request id already registered: {0}")]
    DuplicateId(String),
    #[error("request not found: {0}")]
    NotFound(String),
}

#[derive(Debug)]
pub struct TrackedRequest {
    pub id: String,
    pub model: String,
    pub prompt_preview: String,
    pub status: RequestStatus,
    pub progress: Option<String>,
    pub started_at: Instant,
    pub started_at_utc: DateTime<Utc>,
    pub finished_at: Option<Instant>,
    cancel: CancellationToken,
    seq: u64,
}

impl TrackedRequest {
    pub fn duration_ms(&self) -> u64 {
        let end = self.finished_at.unwrap_or_else(Instant::now);
        end.saturating_duration_since(self.started_at).as_millis() as u64
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            request_id: self.id.clone(),
            status: self.status,
            model: self.model.clone(),
            prompt_preview: self.prompt_preview.clone(),
            progress: self.progress.clone(),
            started_at: self.started_at_utc,
            duration_ms: self.duration_ms(),
        }
    }
}

/// Point-in-time copy of an entry, safe to hand out of the registry.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSnapshot {
    pub request_id: String,
    pub status: RequestStatus,
    pub model: String,
    pub prompt_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    NotFound,
    AlreadyTerminal(RequestStatus),
    Cancelled,
}

pub fn prompt_preview(prompt: &str) -> String {
    let mut chars = prompt.chars();
    let head: String = chars.by_ref().take(PROMPT_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[derive(Clone, Default)]
pub struct RequestRegistry {
    inner: Arc<DashMap<String, TrackedRequest>>,
    next_seq: Arc<AtomicU64>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a `pending` entry and returns the abort handle it owns.
    pub fn create(
        &self,
        id: &str,
        model: &str,
        prompt: &str,
    ) -> Result<CancellationToken, RegistryError> {
        match self.inner.entry(id.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateId(id.to_string())),
            Entry::Vacant(slot) => {
                let cancel = CancellationToken::new();
                slot.insert(TrackedRequest {
                    id: id.to_string(),
                    model: model.to_string(),
                    prompt_preview: prompt_preview(prompt),
                    status: RequestStatus::Pending,
                    progress: None,
                    started_at: Instant::now(),
                    started_at_utc: Utc::now(),
                    finished_at: None,
                    cancel: cancel.clone(),
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                });
                Ok(cancel)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<RequestSnapshot> {
        self.inner.get(id).map(|entry| entry.snapshot())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.contains_key(id)
    }

    pub fn mutate<R>(
        &self,
        id: &str,
        updater: impl FnOnce(&mut TrackedRequest) -> R,
    ) -> Result<R, RegistryError> {
        let mut entry = self
            .inner
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        Ok(updater(entry.value_mut()))
    }

    pub fn remove(&self, id: &str) {
        self.inner.remove(id);
    }

    pub fn list(&self) -> Vec<RequestSnapshot> {
        let mut rows: Vec<(u64, RequestSnapshot)> = self
            .inner
            .iter()
            .map(|entry| (entry.seq, entry.snapshot()))
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    pub fn list_active(&self) -> Vec<RequestSnapshot> {
        self.list()
            .into_iter()
            .filter(|snapshot| !snapshot.status.is_terminal())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Moves an entry forward. Returns `false` when the move is rejected, which
    /// is always the case once the entry is terminal.
    pub fn transition(&self, id: &str, next: RequestStatus) -> Result<bool, RegistryError> {
        self.mutate(id, |entry| {
            if !entry.status.can_transition_to(next) {
                tracing::debug!(
                    request_id = %id,
                    from = %entry.status,
                    to = %next,
                    "status transition rejected"
                );
                return false;
            }
            entry.status = next;
            if next.is_terminal() {
                entry.finished_at = Some(Instant::now());
            }
            true
        })
    }

    pub fn set_progress(&self, id: &str, progress: String) -> Result<bool, RegistryError> {
        self.mutate(id, |entry| {
            if entry.status.is_terminal() {
                return false;
            }
            entry.progress = Some(progress);
            true
        })
    }

    /// Marks a live entry cancelled and fires its abort handle. The handle is
    /// fired at most once; later calls report the terminal status instead.
    pub fn cancel(&self, id: &str) -> CancelOutcome {
        let outcome = self.mutate(id, |entry| {
            if entry.status.is_terminal() {
                return CancelOutcome::AlreadyTerminal(entry.status);
            }
            entry.status = RequestStatus::Cancelled;
            entry.finished_at = Some(Instant::now());
            entry.cancel.cancel();
            CancelOutcome::Cancelled
        });
        outcome.unwrap_or(CancelOutcome::NotFound)
    }

    /// Drops a terminal entry after `delay`. Entries that are somehow still
    /// live when the timer fires are left alone.
    pub fn schedule_eviction(&self, id: &str, delay: Duration) {
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner
                .remove_if(&id, |_, entry| entry.status.is_terminal())
                .is_some()
            {
                tracing::debug!(request_id = %id, "evicted finished request");
            }
        });
    }
}
