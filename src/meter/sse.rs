//! Incremental parser for OpenAI-style server-sent events.
//!
//! K_i: Chunk boundaries are arbitrary. A line is only processed once its
//! terminating newline has arrived; the trailing partial line waits in the
//! buffer for the next chunk.

use serde::Deserialize;
use tracing::debug;

/// Prefix marking a data line.
pub const DATA_PREFIX: &str = "data: ";

/// Payload that ends the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Something the parser extracted from complete lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Non-empty `choices[0].delta.content`
    Content(String),
    /// The `[DONE]` terminator
    Done,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Line-buffering SSE parser.
///
/// Bytes are buffered rather than text so a multi-byte character split
/// across chunks is decoded intact.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    done: bool,
    skipped_lines: usize,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminator has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Data lines dropped because their payload was not a valid chunk.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// Append a chunk and return events from every line it completed.
    ///
    /// After [`SseEvent::Done`] nothing else is processed, including lines
    /// already sitting in the buffer.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        self.buffer.extend_from_slice(chunk);

        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            let line = String::from_utf8_lossy(&self.buffer[consumed..end]).into_owned();
            consumed = end + 1;

            if let Some(event) = self.process_line(&line) {
                let finished = event == SseEvent::Done;
                events.push(event);
                if finished {
                    self.done = true;
                    self.buffer.clear();
                    return events;
                }
            }
        }

        self.buffer.drain(..consumed);
        events
    }

    /// Flush the trailing line when the connection closes without a newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.done || self.buffer.is_empty() {
            self.buffer.clear();
            return Vec::new();
        }

        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();

        match self.process_line(&line) {
            Some(SseEvent::Done) => {
                self.done = true;
                vec![SseEvent::Done]
            }
            Some(event) => vec![event],
            None => Vec::new(),
        }
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        let payload = line.strip_prefix(DATA_PREFIX)?.trim();

        if payload == DONE_SENTINEL {
            return Some(SseEvent::Done);
        }

        match serde_json::from_str::<ChatCompletionChunk>(payload) {
            Ok(chunk) => chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta)
                .and_then(|delta| delta.content)
                .filter(|content| !content.is_empty())
                .map(SseEvent::Content),
            Err(e) => {
                self.skipped_lines += 1;
                debug!(payload = %payload, error = %e, "Skipping malformed stream payload");
                None
            }
        }
    }
}
