//! Server-sent event decoding for the streaming-HTTP binding.
//!
//! Splits a byte stream on SSE boundaries (`data: …\n\n`), joins the `data:`
//! lines of each event, and parses the payload as JSON. Only the last
//! well-formed event is the logical response; earlier ones are handed to a
//! callback as progress.

use futures::stream::{Stream, StreamExt};

use super::errors::McpError;

// ─── Decoder ─────────────────────────────────────────────────────────────────

/// Incremental SSE framer. Buffers bytes so that events and multi-byte
/// characters split across chunks are reassembled.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the data payloads of every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        // CRLF framing is folded to LF.
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut payloads = Vec::new();
        while let Some(end) = find_boundary(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(data) = event_data(&event[..end]) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        event_data(&rest)
    }
}

fn find_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Extract the joined `data:` payload of one event, if any.
fn event_data(event: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(event);
    let mut lines = Vec::new();
    for line in text.lines() {
        if let Some(data) = line.strip_prefix("data:") {
            lines.push(data.strip_prefix(' ').unwrap_or(data));
        }
        // Ignore non-data lines (comments, event types, ids, retry)
    }
    if lines.is_empty() {
        return None;
    }
    let joined = lines.join("\n");
    if joined.trim().is_empty() {
        None
    } else {
        Some(joined)
    }
}

// ─── Stream reader ───────────────────────────────────────────────────────────

/// Read an event stream to the end and return the last well-formed JSON event.
///
/// Malformed frames are logged and dropped. Every well-formed event that is
/// superseded by a later one is passed to `on_progress`.
pub async fn read_last_event<S, B, E>(
    stream: S,
    provider: &str,
    mut on_progress: impl FnMut(serde_json::Value),
) -> Result<Option<serde_json::Value>, McpError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut decoder = SseDecoder::new();
    let mut last: Option<serde_json::Value> = None;
    futures::pin_mut!(stream);

    let mut accept = |data: String, last: &mut Option<serde_json::Value>| {
        match serde_json::from_str::<serde_json::Value>(&data) {
            Ok(value) => {
                if let Some(previous) = last.replace(value) {
                    on_progress(previous);
                }
            }
            Err(e) => {
                tracing::warn!(provider, error = %e, data = %data, "dropping malformed SSE frame");
            }
        }
    };

    while let Some(chunk) = stream.next().await {
        let bytes = chunk.map_err(|e| McpError::TransportError {
            provider: provider.to_string(),
            reason: format!("stream read error: {e}"),
        })?;
        for data in decoder.push(bytes.as_ref()) {
            accept(data, &mut last);
        }
    }
    if let Some(data) = decoder.finish() {
        accept(data, &mut last);
    }

    Ok(last)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
