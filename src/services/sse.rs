//! Server-Sent Events parsing and formatting.
//!
//! The parser is incremental: upstream bytes arrive in arbitrary pieces and
//! events are only returned once their terminating blank line is seen.

/// SSE event parsed from a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: Option<String>,
}

/// Marker ending an OpenAI-style completion stream.
pub const DONE_MARKER: &str = "[DONE]";

/// Incremental SSE parser.
///
/// Bytes are buffered until a block boundary so multi-byte characters split
/// across network chunks decode intact. Carriage returns are discarded, which
/// folds `\r\n` line endings into `\n`.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every event completed by them.
    pub fn parse(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        events
    }

    /// Whether unterminated data is still buffered.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }
}

fn parse_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();

    for line in block.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event.event = Some(value.to_string()),
            "data" => match event.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => event.data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    (event.data.is_some() || event.event.is_some()).then_some(event)
}

/// Format a data-only SSE event.
pub fn format_sse_data(data: &str) -> String {
    format!("data: {}\n\n", data)
}

/// Format the end-of-stream marker.
pub fn format_sse_done() -> String {
    format_sse_data(DONE_MARKER)
}
