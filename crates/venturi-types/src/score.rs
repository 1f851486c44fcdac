// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Score, Performance Record and Telemetry Types
// ─────────────────────────────────────────────────────────────────────

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cognition::{TraitKind, TraitVector};
use crate::mode::OptimizationMode;

/// Clamp a value to [lo, hi], mapping NaN to lo and Inf to nearest bound.
#[inline]
pub fn clamp_score(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        log::warn!("clamp_score: NaN detected, clamping to {lo:.4}");
        return lo;
    }
    if value.is_infinite() {
        let boundary = if value > 0.0 { hi } else { lo };
        log::warn!("clamp_score: Inf detected, clamping to {boundary:.4}");
        return boundary;
    }
    value.clamp(lo, hi)
}

/// Composite-score bucket relative to the configured benchmark targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkTier {
    NeedsOptimization,
    Standard,
    Leading,
    Competitive,
    Champion,
}

impl BenchmarkTier {
    /// ≥0.9 Champion, ≥0.8 Competitive, ≥0.7 Leading, ≥0.6 Standard.
    pub fn from_score(score: f64) -> Self {
        let s = clamp_score(score, 0.0, 1.0);
        if s >= 0.9 {
            Self::Champion
        } else if s >= 0.8 {
            Self::Competitive
        } else if s >= 0.7 {
            Self::Leading
        } else if s >= 0.6 {
            Self::Standard
        } else {
            Self::NeedsOptimization
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NeedsOptimization => "needs_optimization",
            Self::Standard => "standard",
            Self::Leading => "leading",
            Self::Competitive => "competitive",
            Self::Champion => "champion",
        }
    }

    pub fn code(self) -> f64 {
        self as u8 as f64
    }
}

impl fmt::Display for BenchmarkTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-cycle snapshot retained in the rolling performance window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Sequence id of the frame that produced this cycle.
    pub seq: u64,
    /// Frame capture timestamp (µs).
    pub timestamp_us: u64,
    /// End-to-end pipeline latency for the frame (µs).
    pub latency_us: f64,
    /// Confidence-weighted accuracy estimate in [0, 1].
    pub accuracy_estimate: f64,
    /// Approximate working-set size of the online loop (bytes).
    pub memory_bytes: u64,
    /// Observed load fraction (latency / aggregate budget).
    pub cpu_load: f64,
    /// Gate 3 impact in [-1, 1].
    pub impact: f64,
    /// Composite score in [0, 1].
    pub score: f64,
    pub tier: BenchmarkTier,
    pub trait_snapshot: TraitVector,
    pub active_mode: OptimizationMode,
    /// True when any gate fell back to its last-known-good transform.
    pub degraded: bool,
}

/// Flat structured event handed to the telemetry collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub seq: u64,
    pub timestamp_us: u64,
    pub fields: Vec<(&'static str, f64)>,
}

impl TelemetryEvent {
    /// Event carrying every numeric field of the record and its traits.
    pub fn from_record(record: &PerformanceRecord) -> Self {
        let mut fields = Vec::with_capacity(24);
        fields.push(("latency_us", record.latency_us));
        fields.push(("accuracy_estimate", record.accuracy_estimate));
        fields.push(("memory_bytes", record.memory_bytes as f64));
        fields.push(("cpu_load", record.cpu_load));
        fields.push(("impact", record.impact));
        fields.push(("score", record.score));
        fields.push(("tier", record.tier.code()));
        fields.push(("mode", record.active_mode.code()));
        fields.push(("degraded", if record.degraded { 1.0 } else { 0.0 }));
        for kind in TraitKind::ALL {
            let state = record.trait_snapshot.get(kind);
            fields.push((trait_value_key(kind), state.value));
            fields.push((trait_velocity_key(kind), state.velocity));
        }
        Self {
            seq: record.seq,
            timestamp_us: record.timestamp_us,
            fields,
        }
    }

    pub fn with(mut self, name: &'static str, value: f64) -> Self {
        self.fields.push((name, value));
        self
    }

    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
    }
}

fn trait_value_key(kind: TraitKind) -> &'static str {
    match kind {
        TraitKind::Focus => "trait_focus",
        TraitKind::Resilience => "trait_resilience",
        TraitKind::Adaptability => "trait_adaptability",
        TraitKind::Extensible => "trait_extensible",
    }
}

fn trait_velocity_key(kind: TraitKind) -> &'static str {
    match kind {
        TraitKind::Focus => "velocity_focus",
        TraitKind::Resilience => "velocity_resilience",
        TraitKind::Adaptability => "velocity_adaptability",
        TraitKind::Extensible => "velocity_extensible",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_nan() {
        assert_eq!(clamp_score(f64::NAN, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_clamp_pos_inf() {
        assert_eq!(clamp_score(f64::INFINITY, 0.0, 1.0), 1.0);
    }

    #[test]
    fn test_clamp_neg_inf() {
        assert_eq!(clamp_score(f64::NEG_INFINITY, -1.0, 1.0), -1.0);
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(BenchmarkTier::from_score(0.95), BenchmarkTier::Champion);
        assert_eq!(BenchmarkTier::from_score(0.9), BenchmarkTier::Champion);
        assert_eq!(BenchmarkTier::from_score(0.85), BenchmarkTier::Competitive);
        assert_eq!(BenchmarkTier::from_score(0.7), BenchmarkTier::Leading);
        assert_eq!(BenchmarkTier::from_score(0.65), BenchmarkTier::Standard);
        assert_eq!(BenchmarkTier::from_score(0.2), BenchmarkTier::NeedsOptimization);
        assert_eq!(BenchmarkTier::from_score(f64::NAN), BenchmarkTier::NeedsOptimization);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(BenchmarkTier::Champion > BenchmarkTier::Competitive);
        assert!(BenchmarkTier::Standard > BenchmarkTier::NeedsOptimization);
    }

    #[test]
    fn test_telemetry_event_fields() {
        let record = PerformanceRecord {
            seq: 3,
            timestamp_us: 1_000,
            latency_us: 120.0,
            accuracy_estimate: 0.9,
            memory_bytes: 4096,
            cpu_load: 0.3,
            impact: 0.1,
            score: 0.82,
            tier: BenchmarkTier::Competitive,
            trait_snapshot: TraitVector::default(),
            active_mode: OptimizationMode::Balanced,
            degraded: false,
        };
        let ev = TelemetryEvent::from_record(&record).with("gate2_fallback", 1.0);
        assert_eq!(ev.seq, 3);
        assert_eq!(ev.field("latency_us"), Some(120.0));
        assert_eq!(ev.field("trait_focus"), Some(0.5));
        assert_eq!(ev.field("gate2_fallback"), Some(1.0));
        assert_eq!(ev.field("missing"), None);
    }
}
