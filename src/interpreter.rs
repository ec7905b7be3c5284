//! Turns raw chat-completion replies into assistant text.
//!
//! Non-streaming replies are a single JSON document. Streaming replies are
//! `data:`-prefixed lines terminated by `data: [DONE]`; network chunks are not
//! line aligned, so [`LineBuffer`] reassembles them before they reach
//! [`StreamInterpreter`].

use serde::Deserialize;
use tracing::debug;

use crate::error::ChatError;

const DATA_MARKER: &str = "data:";
const TERMINATOR: &str = "[DONE]";

/// Receives each streamed delta as soon as it is decoded.
pub trait DeltaObserver {
    fn on_delta(&mut self, delta: &str);
}

impl<F> DeltaObserver for F
where
    F: FnMut(&str),
{
    fn on_delta(&mut self, delta: &str) {
        self(delta)
    }
}

/// Observer that discards deltas.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeltas;

impl DeltaObserver for NoDeltas {
    fn on_delta(&mut self, _delta: &str) {}
}

#[derive(Debug, Deserialize)]
struct CompletionDocument {
    choices: Vec<DocumentChoice>,
}

#[derive(Debug, Deserialize)]
struct DocumentChoice {
    message: Option<DocumentMessage>,
}

#[derive(Debug, Deserialize)]
struct DocumentMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Extracts `choices[0].message.content` from a non-streaming reply.
pub fn interpret_document(raw: &str) -> Result<String, ChatError> {
    let parsed: CompletionDocument =
        serde_json::from_str(raw).map_err(|_| ChatError::malformed(raw))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .filter(|content| !content.is_empty())
        .map(|content| content.trim().to_string())
        .ok_or_else(|| ChatError::malformed(raw))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Continue,
    Finished,
}

/// Accumulates streamed deltas in arrival order.
#[derive(Debug, Default)]
pub struct StreamInterpreter {
    text: String,
    finished: bool,
    skipped_fragments: usize,
}

impl StreamInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_line(&mut self, line: &str, observer: &mut dyn DeltaObserver) -> StreamStatus {
        if self.finished {
            return StreamStatus::Finished;
        }

        let line = line.trim();
        let Some(payload) = line.strip_prefix(DATA_MARKER) else {
            return StreamStatus::Continue;
        };
        let payload = payload.trim();
        if payload == TERMINATOR {
            self.finished = true;
            return StreamStatus::Finished;
        }

        // A fragment cut at a chunk boundary is expected; drop just that one.
        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(err) => {
                self.skipped_fragments += 1;
                debug!(error = %err, fragment_len = payload.len(), "skipping unparsable stream fragment");
                return StreamStatus::Continue;
            }
        };

        let delta = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta)
            .and_then(|delta| delta.content);
        if let Some(delta) = delta
            && !delta.is_empty()
        {
            observer.on_delta(&delta);
            self.text.push_str(&delta);
        }

        StreamStatus::Continue
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn skipped_fragments(&self) -> usize {
        self.skipped_fragments
    }

    pub fn finish(self) -> String {
        self.text.trim().to_string()
    }
}

/// Splits arbitrary byte chunks into complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Returns the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
