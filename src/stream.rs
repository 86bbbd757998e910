use crate::error::ChatError;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

const DONE_SENTINEL: &str = "[DONE]";

/// Reads a chat-completion event stream to the end, concatenating the
/// `choices[0].delta.content` fragments.
///
/// `on_progress` receives a snapshot every `progress_every` deltas. The
/// cancellation token is checked before every chunk and raced against each
/// pending read, so an idle upstream cannot hold the loop open after a cancel.
/// The stream is consumed by value and dropped on every return path.
pub async fn accumulate<S, B, E>(
    stream: S,
    cancel: &CancellationToken,
    progress_every: usize,
    mut on_progress: impl FnMut(String),
) -> Result<String, ChatError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let progress_every = progress_every.max(1);
    let mut events = std::pin::pin!(stream.eventsource());
    let mut text = String::new();
    let mut deltas = 0usize;
    let mut chars = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            next = events.next() => next,
        };
        let Some(ev) = next else { break };
        let ev = match ev {
            Ok(ev) => ev,
            Err(EventStreamError::Transport(err)) => {
                return Err(ChatError::Network(err.to_string()));
            }
            Err(err) => {
                tracing::debug!(error = %err, "skipping undecodable stream chunk");
                continue;
            }
        };
        let data = ev.data.trim();
        if data == DONE_SENTINEL {
            return Ok(text);
        }
        let Ok(payload) = serde_json::from_str::<Value>(data) else {
            tracing::trace!(data, "skipping malformed stream payload");
            continue;
        };
        let Some(delta) = delta_content(&payload) else {
            continue;
        };
        if delta.is_empty() {
            continue;
        }
        text.push_str(delta);
        deltas += 1;
        chars += delta.chars().count();
        if deltas % progress_every == 0 {
            on_progress(progress_snapshot(deltas, chars));
        }
    }

    Ok(text)
}

pub fn progress_snapshot(deltas: usize, chars: usize) -> String {
    format!("Received {deltas} tokens, {chars} characters")
}

fn delta_content(payload: &Value) -> Option<&str> {
    payload
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str())
}
