//! State machine for re-emitting backend events as OpenAI chat-completion chunks.
//!
//! [`TranslationSession`] turns one [`BackendEvent`] at a time into one
//! [`ChatCompletionChunk`], tracking whether a reasoning block is open.
//! [`emit_stream`] drives a session over the event sequence and writes SSE
//! frames to a sink, flushing on a fixed interval and on the terminal frame.
//!
//! Usage:
//!   let session = TranslationSession::new("gpt-4o");
//!   let outcome = emit_stream(events, sink, session, Duration::from_millis(100)).await?;

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::time::{Instant, MissedTickBehavior};

use super::backend_types::{BackendEvent, AGENT_THINKING, AGENT_THINKING_DETAIL};
use super::openai_types::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, CHUNK_OBJECT, FINISH_STOP, ROLE_ASSISTANT,
};
use super::random_id;
use crate::error::Result;

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

const WRITE_BUFFER_SIZE: usize = 4096;

/// What one backend event means for the outgoing stream.
enum EventKind {
    Finished,
    ReasoningStart,
    ReasoningDetail,
    Content,
}

fn classify(event: &BackendEvent) -> EventKind {
    if event.finished {
        return EventKind::Finished;
    }
    match event.agent_kind() {
        Some(AGENT_THINKING) => EventKind::ReasoningStart,
        Some(AGENT_THINKING_DETAIL) => EventKind::ReasoningDetail,
        _ => EventKind::Content,
    }
}

/// One translated event.
#[derive(Debug, Clone)]
pub struct TranslatedFrame {
    pub chunk: ChatCompletionChunk,
    /// Last frame of the response; `[DONE]` follows it.
    pub terminal: bool,
}

/// Per-response translation state.
#[derive(Debug, Clone)]
pub struct TranslationSession {
    stream_id: String,
    created_at: i64,
    fingerprint: String,
    model: String,
    inside_reasoning: bool,
}

impl TranslationSession {
    pub fn new(model: &str) -> Self {
        Self {
            stream_id: format!("chatcmpl-{}", random_id(29)),
            created_at: chrono::Utc::now().timestamp(),
            fingerprint: format!("fp_{}", random_id(10)),
            model: model.to_string(),
            inside_reasoning: false,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn inside_reasoning(&self) -> bool {
        self.inside_reasoning
    }

    /// Translate a single backend event.
    ///
    /// A `thinking` signal opens a reasoning block; the closing marker is
    /// prepended to the next content fragment rather than sent on its own.
    pub fn translate(&mut self, event: BackendEvent) -> TranslatedFrame {
        match classify(&event) {
            EventKind::Finished => TranslatedFrame {
                chunk: self.chunk(String::new(), Some(FINISH_STOP)),
                terminal: true,
            },
            EventKind::ReasoningStart => {
                self.inside_reasoning = true;
                self.frame(THINK_OPEN.to_string())
            }
            EventKind::ReasoningDetail => {
                let detail = event
                    .agent_status
                    .map(|status| status.metadata.reasoning_detail)
                    .unwrap_or_default();
                self.frame(detail)
            }
            EventKind::Content => {
                let mut text = event.text;
                if self.inside_reasoning {
                    text.insert_str(0, THINK_CLOSE);
                    self.inside_reasoning = false;
                }
                self.frame(text)
            }
        }
    }

    fn frame(&self, content: String) -> TranslatedFrame {
        TranslatedFrame {
            chunk: self.chunk(content, None),
            terminal: false,
        }
    }

    fn chunk(&self, content: String, finish_reason: Option<&str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.stream_id.clone(),
            object: CHUNK_OBJECT.to_string(),
            created: self.created_at,
            model: self.model.clone(),
            system_fingerprint: self.fingerprint.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: ROLE_ASSISTANT.to_string(),
                    content,
                },
                finish_reason: finish_reason.map(String::from),
            }],
        }
    }
}

/// How the emitted stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Terminal frame and `[DONE]` were written.
    Completed,
    /// Input ended (or was cancelled) before the backend declared completion;
    /// no `[DONE]` was written.
    Truncated,
}

/// Serialize one chunk as an SSE frame into `buf`.
pub fn encode_frame(buf: &mut Vec<u8>, chunk: &ChatCompletionChunk) -> Result<()> {
    buf.extend_from_slice(b"data: ");
    serde_json::to_writer(&mut *buf, chunk)?;
    buf.extend_from_slice(b"\n\n");
    Ok(())
}

/// Translate `events` into OpenAI SSE frames written to `sink`.
///
/// Frames are buffered and flushed every `flush_interval`, and immediately
/// after `[DONE]`. A decode error from `events` or a write error on `sink`
/// aborts the stream and is returned; nothing is written after the terminal
/// frame.
pub async fn emit_stream<S, W>(
    events: S,
    sink: W,
    mut session: TranslationSession,
    flush_interval: Duration,
) -> Result<StreamOutcome>
where
    S: Stream<Item = Result<BackendEvent>>,
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, sink);
    let mut flush_timer = tokio::time::interval_at(Instant::now() + flush_interval, flush_interval);
    flush_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut frame = Vec::with_capacity(512);

    futures::pin_mut!(events);

    loop {
        tokio::select! {
            biased;
            _ = flush_timer.tick() => writer.flush().await?,
            next = events.next() => {
                let event = match next {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        if let Err(flush_err) = writer.flush().await {
                            tracing::debug!(error = %flush_err, "flush failed after stream error");
                        }
                        return Err(e);
                    }
                    None => {
                        writer.flush().await?;
                        return Ok(StreamOutcome::Truncated);
                    }
                };

                let translated = session.translate(event);
                frame.clear();
                encode_frame(&mut frame, &translated.chunk)?;
                writer.write_all(&frame).await?;

                if translated.terminal {
                    writer.write_all(DONE_FRAME).await?;
                    writer.flush().await?;
                    return Ok(StreamOutcome::Completed);
                }
            }
        }
    }
}
