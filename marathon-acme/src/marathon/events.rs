//! Marathon event stream subscription
//!
//! Consumes `/v2/events` as server-sent events and fires a reconciliation
//! trigger for every app-state-relevant event kind. Event payloads are not
//! parsed; the reconciler re-reads the full app list anyway. The loop
//! reconnects forever with exponential backoff and fires one synthetic
//! trigger after every (re)connect, since events sent while the stream was
//! down are lost.

use std::sync::Arc;

use futures_util::StreamExt;

use super::MarathonClient;
use crate::defaults;
use crate::reconciler::Trigger;

/// Event kinds that can change the set of desired domains.
pub const RELEVANT_EVENTS: &[&str] = &[
    "api_post_event",
    "status_update_event",
    "deployment_success",
    "health_status_changed_event",
];

/// One parsed server-sent event.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Frame {
    pub event: String,
    pub data: String,
}

/// Incremental SSE frame parser; chunks may split lines and frames anywhere.
#[derive(Debug, Default)]
pub(crate) struct FrameParser {
    buf: String,
    event: Option<String>,
    data: String,
}

impl FrameParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\r', '\n']);

            if line.is_empty() {
                if let Some(frame) = self.take_frame() {
                    frames.push(frame);
                }
            } else if let Some(rest) = line.strip_prefix("event:") {
                self.event = Some(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
            }
            // Comments (leading ':') and other fields (id:, retry:) are ignored.
        }
        frames
    }

    fn take_frame(&mut self) -> Option<Frame> {
        if self.event.is_none() && self.data.is_empty() {
            return None;
        }
        Some(Frame {
            event: self
                .event
                .take()
                .unwrap_or_else(|| "message".to_string()),
            data: std::mem::take(&mut self.data),
        })
    }
}

/// Subscription loop; runs until the task is aborted at shutdown.
pub async fn run(marathon: Arc<MarathonClient>, trigger: Trigger) {
    let mut backoff = defaults::EVENT_BACKOFF_MIN;

    loop {
        match marathon.open_event_stream().await {
            Ok(response) => {
                tracing::info!(url = %response.url(), "Subscribed to Marathon event stream");
                backoff = defaults::EVENT_BACKOFF_MIN;
                trigger.fire();

                let mut parser = FrameParser::default();
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(bytes) => {
                            for frame in parser.push(&bytes) {
                                if RELEVANT_EVENTS.contains(&frame.event.as_str()) {
                                    tracing::debug!(
                                        event = %frame.event,
                                        "Triggering reconciliation for Marathon event"
                                    );
                                    trigger.fire();
                                } else {
                                    tracing::trace!(event = %frame.event, "Ignoring Marathon event");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Marathon event stream read failed");
                            break;
                        }
                    }
                }
                tracing::warn!("Marathon event stream closed, reconnecting");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not subscribe to Marathon events");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(defaults::EVENT_BACKOFF_MAX);
    }
}
