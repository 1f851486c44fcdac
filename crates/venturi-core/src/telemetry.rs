// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Telemetry Sinks
// ─────────────────────────────────────────────────────────────────────
//! Outbound per-cycle telemetry. The engine emits one flat
//! `TelemetryEvent` per processed frame; the sink decides where it goes.

use std::fmt::Write as _;

use venturi_types::TelemetryEvent;

/// Consumer of per-cycle telemetry events.
pub trait TelemetrySink: Send {
    fn emit(&mut self, event: &TelemetryEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn emit(&mut self, _event: &TelemetryEvent) {}
}

/// Keeps every event in memory. Intended for tests and replays.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Vec<TelemetryEvent>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TelemetryEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Values of one field across all events, in emission order.
    pub fn series(&self, name: &str) -> Vec<f64> {
        self.events.iter().filter_map(|e| e.field(name)).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl TelemetrySink for MemorySink {
    fn emit(&mut self, event: &TelemetryEvent) {
        self.events.push(event.clone());
    }
}

/// Renders each event as one `info` line of `key=value` pairs.
#[derive(Debug, Clone)]
pub struct LogSink {
    target: &'static str,
}

impl LogSink {
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }

    pub fn render(event: &TelemetryEvent) -> String {
        let mut line = format!("seq={} ts_us={}", event.seq, event.timestamp_us);
        for (name, value) in &event.fields {
            let _ = write!(line, " {name}={value:.6}");
        }
        line
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new("venturi::telemetry")
    }
}

impl TelemetrySink for LogSink {
    fn emit(&mut self, event: &TelemetryEvent) {
        log::info!(target: self.target, "{}", Self::render(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(seq: u64, score: f64) -> TelemetryEvent {
        TelemetryEvent {
            seq,
            timestamp_us: seq * 10,
            fields: vec![("score", score), ("impact", 0.0)],
        }
    }

    #[test]
    fn test_memory_sink_collects_series() {
        let mut sink = MemorySink::new();
        for i in 0..5 {
            sink.emit(&event(i, i as f64 * 0.1));
        }
        assert_eq!(sink.len(), 5);
        let scores = sink.series("score");
        assert_eq!(scores.len(), 5);
        assert!((scores[4] - 0.4).abs() < 1e-12);
        assert!(sink.series("missing").is_empty());
    }

    #[test]
    fn test_log_sink_render() {
        let line = LogSink::render(&event(3, 0.5));
        assert_eq!(line, "seq=3 ts_us=30 score=0.500000 impact=0.000000");
    }

    #[test]
    fn test_null_sink_accepts_events() {
        let mut sink = NullSink;
        sink.emit(&event(0, 0.0));
    }
}
