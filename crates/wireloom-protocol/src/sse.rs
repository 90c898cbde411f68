//! Minimal SSE line framing, shared by both the Claude-shaped and the
//! OpenAI-shaped streaming bodies.

use bytes::Bytes;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental parser over a byte stream, splitting `\n`-delimited SSE
/// records into `SseEvent`s as `data:`/`event:` lines accumulate up to a
/// blank-line terminator.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, bytes: &Bytes) -> Vec<SseEvent> {
        self.push_str(&String::from_utf8_lossy(bytes))
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer.drain(..=pos);
            if line.is_empty() {
                if let Some(event) = self.finish_event() {
                    events.push(event);
                }
                continue;
            }
            if let Some(rest) = line.strip_prefix("event:") {
                self.event = Some(rest.trim_start().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines.push(rest.trim_start().to_string());
            }
            // Other SSE fields (id:, retry:, comments) are ignored; neither
            // provider we speak to emits them on the paths we use.
        }
        events
    }

    fn finish_event(&mut self) -> Option<SseEvent> {
        if self.data_lines.is_empty() && self.event.is_none() {
            return None;
        }
        let event = SseEvent {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        Some(event)
    }

    /// Flush any buffered, unterminated event at stream end.
    pub fn finish(mut self) -> Vec<SseEvent> {
        self.finish_event().into_iter().collect()
    }
}

/// Renders a single SSE record in `event: <name>\ndata: <payload>\n\n` form.
pub fn format_event(event: &str, data: &str) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

/// Renders an anonymous `data: <payload>\n\n` record (the OpenAI style).
pub fn format_data(data: &str) -> String {
    format!("data: {data}\n\n")
}

pub const DONE_MARKER: &str = "data: [DONE]\n\n";
