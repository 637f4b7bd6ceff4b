//! Ingest side of the stream translation: turns the backend's line-oriented
//! SSE body into a lazy sequence of [`BackendEvent`]s.
//!
//! Only lines starting with exactly `data: ` carry events. The payload is the
//! rest of the line without its newline; an empty payload is skipped and
//! `[DONE]` ends the sequence. Anything else must be one JSON object.
//! End of input and cancellation both end the sequence without an error.

use async_stream::try_stream;
use futures::Stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

use super::backend_types::BackendEvent;
use crate::error::{ProxyError, Result};

pub const DATA_PREFIX: &[u8] = b"data: ";
pub const DONE_SENTINEL: &[u8] = b"[DONE]";

#[derive(Clone, Copy, Debug)]
pub struct SseLimits {
    pub max_line_bytes: usize,
}

impl Default for SseLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Read one `\n`-terminated line into `out`.
///
/// Returns `false` at end of input. A trailing fragment without a newline is
/// an incomplete delivery and is discarded.
async fn read_line_limited<R>(reader: &mut R, out: &mut Vec<u8>, max_bytes: usize) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    out.clear();

    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(false);
        }

        let newline_pos = buf.iter().position(|b| *b == b'\n');
        let take_len = newline_pos.map_or(buf.len(), |pos| pos + 1);

        if out.len().saturating_add(take_len) > max_bytes {
            return Err(ProxyError::decode(format!(
                "SSE line exceeds max_line_bytes={max_bytes}"
            )));
        }

        out.extend_from_slice(&buf[..take_len]);
        reader.consume(take_len);

        if newline_pos.is_some() {
            return Ok(true);
        }
    }
}

/// Payload of a `data: ` line, without the line terminator.
fn data_payload(line: &[u8]) -> Option<&[u8]> {
    let rest = line.strip_prefix(DATA_PREFIX)?;
    let rest = rest.strip_suffix(b"\n").unwrap_or(rest);
    Some(rest.strip_suffix(b"\r").unwrap_or(rest))
}

fn preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    text.chars().take(120).collect()
}

/// Decode backend events from `reader` until `[DONE]`, end of input or
/// cancellation. A malformed payload yields one decode error and ends the
/// sequence.
///
/// The line buffer is reused for every line; each event handed out is an
/// owned value, so nothing the consumer holds aliases parser storage.
pub fn backend_events<R>(
    reader: R,
    cancel: CancellationToken,
    limits: SseLimits,
) -> impl Stream<Item = Result<BackendEvent>>
where
    R: AsyncBufRead + Unpin,
{
    try_stream! {
        let mut reader = reader;
        let mut line = Vec::with_capacity(1024);

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                read = read_line_limited(&mut reader, &mut line, limits.max_line_bytes) => Some(read),
            };
            let Some(read) = read else {
                tracing::debug!("backend stream cancelled");
                break;
            };
            if !read? {
                break;
            }

            let Some(payload) = data_payload(&line) else {
                continue;
            };
            if payload.is_empty() {
                continue;
            }
            if payload == DONE_SENTINEL {
                break;
            }

            let event: BackendEvent = serde_json::from_slice(payload).map_err(|e| {
                ProxyError::decode(format!("invalid backend event `{}`: {e}", preview(payload)))
            })?;
            yield event;
        }
    }
}
