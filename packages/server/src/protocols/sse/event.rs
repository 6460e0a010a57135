//! SSE wire format
//!
//! Events serialize per the W3C EventSource format: optional `event:`,
//! `id:`, and `retry:` lines, one `data:` line per payload line, and a
//! blank line terminator. Keepalives are a bare comment line.

/// One event to broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub retry: Option<u64>,
    pub data: String,
}

impl SseEvent {
    #[must_use]
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into(), ..Self::default() }
    }

    #[must_use]
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry_ms: u64) -> Self {
        self.retry = Some(retry_ms);
        self
    }

    /// Serializes the whole event including the blank-line terminator.
    #[must_use]
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 64);
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(retry) = &self.retry {
            out.push_str("retry: ");
            out.push_str(&retry.to_string());
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Comment line clients ignore; keeps intermediaries from timing out.
pub const KEEPALIVE: &str = ":\n\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_event_is_data_lines() {
        assert_eq!(SseEvent::new("hello").serialize(), "data: hello\n\n");
    }

    #[test]
    fn full_event_orders_fields() {
        let event = SseEvent::new("payload")
            .with_event("update")
            .with_id("42")
            .with_retry(3000);
        assert_eq!(
            event.serialize(),
            "event: update\nid: 42\nretry: 3000\ndata: payload\n\n"
        );
    }

    #[test]
    fn multiline_data_splits_per_line() {
        assert_eq!(
            SseEvent::new("a\nb").serialize(),
            "data: a\ndata: b\n\n"
        );
    }
}
