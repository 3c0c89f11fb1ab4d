use super::http::encode_param;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

const MAX_BACKOFF_SECS: u64 = 30;

/// One progress event pushed by the backend for a subscribed operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushEvent {
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub step: String,
    #[serde(default, deserialize_with = "super::null_as_default")]
    pub status: String,
    #[serde(default)]
    pub log: Option<String>,
    /// Full cumulative log; replaces the client's view when present.
    #[serde(rename = "allLogs", default)]
    pub all_logs: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    Connected,
    Disconnected(String),
    Progress(PushEvent),
}

/// Live subscription to one operation. Dropping it unsubscribes.
pub struct PushSubscription {
    events: mpsc::UnboundedReceiver<PushMessage>,
    task: Option<AbortHandle>,
}

impl PushSubscription {
    pub fn new(events: mpsc::UnboundedReceiver<PushMessage>, task: Option<AbortHandle>) -> Self {
        Self { events, task }
    }

    pub async fn recv(&mut self) -> Option<PushMessage> {
        self.events.recv().await
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub trait PushChannel: Send + Sync {
    /// Must be called from within a tokio runtime.
    fn subscribe(&self, operation_id: &str) -> PushSubscription;
}

/// Server-Sent Events feed keyed by operation id.
pub struct SsePushChannel {
    url: String,
    client: Client,
}

impl SsePushChannel {
    pub fn new(base_url: &str, push_path: &str, client: Client) -> Self {
        let path = if push_path.starts_with('/') {
            push_path.to_string()
        } else {
            format!("/{push_path}")
        };
        Self {
            url: format!("{}{}", base_url.trim_end_matches('/'), path),
            client,
        }
    }

    fn stream_url(&self, operation_id: &str) -> String {
        format!("{}?operation={}", self.url, encode_param(operation_id))
    }
}

impl PushChannel for SsePushChannel {
    /// The connection runs in a background task and reconnects with
    /// exponential backoff (1s → 2s → 4s → ... capped at 30s) until the
    /// subscription is dropped.
    fn subscribe(&self, operation_id: &str) -> PushSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let url = self.stream_url(operation_id);
        let client = self.client.clone();

        let task = tokio::spawn(async move {
            let mut backoff_secs: u64 = 1;

            loop {
                let resp = match client.get(&url).send().await {
                    Ok(r) if r.status().is_success() => {
                        backoff_secs = 1;
                        if tx.send(PushMessage::Connected).is_err() {
                            return;
                        }
                        r
                    }
                    Ok(r) => {
                        warn!("Push channel refused ({}): {}", r.status(), url);
                        let _ = tx.send(PushMessage::Disconnected(format!(
                            "Connect refused: {}",
                            r.status()
                        )));
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                        continue;
                    }
                    Err(e) => {
                        warn!("Push channel connect failed: {}", e);
                        let _ = tx.send(PushMessage::Disconnected(format!("Connect failed: {e}")));
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                        continue;
                    }
                };

                let mut stream = resp.bytes_stream();
                let mut buf: Vec<u8> = Vec::new();

                while let Some(chunk) = stream.next().await {
                    let chunk = match chunk {
                        Ok(c) => c,
                        Err(e) => {
                            warn!("Push stream error: {}", e);
                            break;
                        }
                    };
                    buf.extend_from_slice(&chunk);

                    for event in drain_frames(&mut buf) {
                        if tx.send(PushMessage::Progress(event)).is_err() {
                            return;
                        }
                    }
                }

                if tx
                    .send(PushMessage::Disconnected("Stream ended".to_string()))
                    .is_err()
                {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            }
        });

        PushSubscription::new(rx, Some(task.abort_handle()))
    }
}

/// Pull every complete SSE frame out of `buf`, leaving any partial frame.
/// Bytes are only decoded once a frame is whole, so a character split across
/// network chunks survives. Only `data:` lines are read; malformed payloads
/// are skipped.
fn drain_frames(buf: &mut Vec<u8>) -> Vec<PushEvent> {
    // CR never occurs inside a multi-byte UTF-8 sequence.
    if buf.contains(&b'\r') {
        buf.retain(|b| *b != b'\r');
    }
    let mut events = Vec::new();
    while let Some(pos) = buf.windows(2).position(|w| w == b"\n\n") {
        let frame: Vec<u8> = buf.drain(..pos + 2).collect();
        let frame = String::from_utf8_lossy(&frame[..pos]);

        for line in frame.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            match serde_json::from_str::<PushEvent>(data) {
                Ok(event) => events.push(event),
                Err(e) => debug!("Skipping malformed push frame: {}", e),
            }
        }
    }
    events
}
