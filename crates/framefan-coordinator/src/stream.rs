//! Decoding of streamed worker responses.
//!
//! A worker replies with a sequence of JSON documents written back to back.
//! Network fragments are not aligned with documents: one fragment may hold
//! half a document or several of them.

use std::time::{Duration, Instant};

use chrono::Utc;
use framefan_models::WorkerError;
use serde_json::Value;
use tracing::{debug, warn};

/// Seconds of headroom below the invocation timeout that still count as a timeout.
const TIMEOUT_HEADROOM_SECS: f64 = 10.0;

/// What a worker went away without saying.
#[derive(Debug, Clone, PartialEq)]
pub struct CrashReport {
    pub elapsed_seconds: f64,
    /// Epoch milliseconds.
    pub start_timestamp: i64,
    /// Epoch milliseconds.
    pub crash_timestamp: i64,
    /// The worker most likely ran into the invocation timeout.
    pub likely_timed_out: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Progress(f64),
    Response(Value),
    Error(WorkerError),
    Crash(CrashReport),
}

#[derive(Debug)]
pub struct ResponseStreamDecoder {
    buffer: Vec<u8>,
    started: Instant,
    start_timestamp: i64,
    timeout: Option<Duration>,
    responded: bool,
}

impl Default for ResponseStreamDecoder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ResponseStreamDecoder {
    /// `timeout` is the invocation timeout, used to judge whether a crash was
    /// most likely a timeout.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            buffer: Vec::new(),
            started: Instant::now(),
            start_timestamp: Utc::now().timestamp_millis(),
            timeout,
            responded: false,
        }
    }

    /// Whether a terminal message (`Response` or `Error`) has been seen.
    pub fn responded(&self) -> bool {
        self.responded
    }

    /// Feed one fragment and return every event it completed.
    pub fn push(&mut self, fragment: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(fragment);

        let mut events = Vec::new();
        let mut consumed = 0;

        'resync: loop {
            let base = consumed;
            let mut documents =
                serde_json::Deserializer::from_slice(&self.buffer[base..]).into_iter::<Value>();
            loop {
                match documents.next() {
                    Some(Ok(value)) => {
                        consumed = base + documents.byte_offset();
                        if let Some(event) = classify(value) {
                            events.push(event);
                        }
                    }
                    Some(Err(e)) if e.is_eof() => break 'resync,
                    Some(Err(e)) => {
                        warn!(error = %e, "Discarding malformed worker output");
                        match next_document_start(&self.buffer, consumed) {
                            Some(start) => {
                                consumed = start;
                                continue 'resync;
                            }
                            None => {
                                consumed = self.buffer.len();
                                break 'resync;
                            }
                        }
                    }
                    None => {
                        consumed = self.buffer.len();
                        break 'resync;
                    }
                }
            }
        }

        self.buffer.drain(..consumed);
        if events
            .iter()
            .any(|e| matches!(e, StreamEvent::Response(_) | StreamEvent::Error(_)))
        {
            self.responded = true;
        }
        events
    }

    /// Close the stream. Yields a crash report if no terminal message arrived.
    pub fn finish(self) -> Option<StreamEvent> {
        if self.responded {
            return None;
        }
        if !self.buffer.is_empty() {
            debug!(bytes = self.buffer.len(), "Worker stream ended mid-document");
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let likely_timed_out = self
            .timeout
            .is_some_and(|t| elapsed + TIMEOUT_HEADROOM_SECS > t.as_secs_f64());

        Some(StreamEvent::Crash(CrashReport {
            elapsed_seconds: elapsed,
            start_timestamp: self.start_timestamp,
            crash_timestamp: Utc::now().timestamp_millis(),
            likely_timed_out,
        }))
    }
}

/// Where decoding resumes after a malformed document that begins at or after
/// `from`: the next `{` past the document's first byte.
fn next_document_start(buffer: &[u8], from: usize) -> Option<usize> {
    let first = from + buffer[from..].iter().position(|b| !b.is_ascii_whitespace())?;
    buffer[first + 1..]
        .iter()
        .position(|&b| b == b'{')
        .map(|offset| first + 1 + offset)
}

fn classify(value: Value) -> Option<StreamEvent> {
    if let Some(progress) = value.get("onProgress").and_then(Value::as_f64) {
        return Some(StreamEvent::Progress(progress));
    }
    match value.get("type").and_then(Value::as_str) {
        Some("error") => {
            let error = serde_json::from_value::<WorkerError>(value.clone())
                .unwrap_or_else(|_| WorkerError::new(value.to_string()));
            return Some(StreamEvent::Error(error));
        }
        Some("success") => return Some(StreamEvent::Response(value)),
        _ => {}
    }
    if let Some(response) = value.get("response") {
        return Some(StreamEvent::Response(response.clone()));
    }
    debug!(message = %value, "Ignoring unrecognized worker message");
    None
}
