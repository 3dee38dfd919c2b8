//! Server-sent-event client for the answer stream.
//!
//! The backend sends one JSON object per SSE message, tagged by `type`.
//! The source is closed (never reconnected) after a terminal event, a
//! transport error, or cancellation.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{retry, Event, EventSource};
use tokio_util::sync::CancellationToken;

use sarathi_core::error::{Result, SarathiError};
use sarathi_core::types::StreamEvent;

use crate::client::HttpBackend;
use crate::services::{AnswerRequest, EventStream, TextStreamService};

const STREAM_PATH: &str = "/api/text/stream";

/// Decode the data field of one SSE message.
///
/// Returns `Ok(None)` for keep-alive payloads that carry no event.
pub fn parse_event_data(data: &str) -> Result<Option<StreamEvent>> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed == "[DONE]" {
        return Ok(Some(StreamEvent::Done));
    }
    let event = serde_json::from_str::<StreamEvent>(trimmed)?;
    Ok(Some(match event {
        StreamEvent::Source(source) => StreamEvent::Source(source.normalized()),
        other => other,
    }))
}

/// [`TextStreamService`] over HTTP + SSE.
#[derive(Clone, Debug)]
pub struct HttpTextStream {
    backend: HttpBackend,
}

impl HttpTextStream {
    pub fn new(backend: HttpBackend) -> Self {
        Self { backend }
    }
}

struct SseState {
    source: EventSource,
    cancel: CancellationToken,
    finished: bool,
}

#[async_trait]
impl TextStreamService for HttpTextStream {
    async fn stream_answer(
        &self,
        request: AnswerRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream> {
        let builder = self
            .backend
            .client()
            .post(self.backend.url(STREAM_PATH))
            .header("Accept", "text/event-stream")
            .json(&request);

        let mut source = EventSource::new(builder)
            .map_err(|e| SarathiError::Transport(format!("cannot open answer stream: {}", e)))?;
        source.set_retry_policy(Box::new(retry::Never));

        tracing::debug!(language = %request.language, "Answer stream opened");

        let state = SseState {
            source,
            cancel,
            finished: false,
        };
        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if state.finished {
                    return None;
                }
                let next = tokio::select! {
                    _ = state.cancel.cancelled() => {
                        tracing::debug!("Answer stream cancelled");
                        state.source.close();
                        return None;
                    }
                    next = state.source.next() => next,
                };
                match next {
                    None => return None,
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(msg))) => match parse_event_data(&msg.data) {
                        Ok(Some(event)) => {
                            if event.is_terminal() {
                                state.source.close();
                                state.finished = true;
                            }
                            return Some((Ok(event), state));
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping malformed stream event");
                            continue;
                        }
                    },
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) => {
                        state.source.close();
                        return None;
                    }
                    Some(Err(reqwest_eventsource::Error::InvalidStatusCode(status, _))) => {
                        state.source.close();
                        state.finished = true;
                        let err = SarathiError::Service(format!("{}", status.as_u16()));
                        return Some((Err(err), state));
                    }
                    Some(Err(e)) => {
                        state.source.close();
                        state.finished = true;
                        return Some((Err(SarathiError::Transport(e.to_string())), state));
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

// =============================================================================
// Tests
// =============================================================================
