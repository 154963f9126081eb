use crate::realtime::{SseDecoder, parse_event};

/// Rebuilds the answer text from relay SSE chunks.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    decoder: SseDecoder,
    text: String,
    events: usize,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        let payloads = self.decoder.push(chunk);
        self.absorb(payloads);
    }

    fn absorb(&mut self, payloads: Vec<String>) {
        for event in payloads.iter().filter_map(|p| parse_event(p)) {
            self.events += 1;
            self.text.push_str(&event.response);
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn events(&self) -> usize {
        self.events
    }

    /// Flushes any unterminated final record and returns the full text.
    pub fn finish(mut self) -> String {
        let rest = self.decoder.finish();
        self.absorb(rest);
        self.text
    }
}
