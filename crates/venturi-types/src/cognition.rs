// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Cognitive Trait Vector
// ─────────────────────────────────────────────────────────────────────

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::score::clamp_score;

/// Named cognitive-state estimates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitKind {
    Focus,
    Resilience,
    Adaptability,
    Extensible,
}

impl TraitKind {
    pub const ALL: [TraitKind; 4] = [
        TraitKind::Focus,
        TraitKind::Resilience,
        TraitKind::Adaptability,
        TraitKind::Extensible,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::Resilience => "resilience",
            Self::Adaptability => "adaptability",
            Self::Extensible => "extensible",
        }
    }
}

impl fmt::Display for TraitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-trait evolution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraitPhase {
    /// No recent impact.
    #[default]
    Idle,
    /// Actively evolving.
    Updating,
    /// Velocity below the evolution threshold.
    Stable,
}

/// Value + velocity for one trait.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraitState {
    /// Always in [0, 1].
    pub value: f64,
    /// Magnitude bounded by the configured velocity cap.
    pub velocity: f64,
    pub phase: TraitPhase,
}

impl TraitState {
    pub fn at(value: f64) -> Self {
        Self {
            value: clamp_score(value, 0.0, 1.0),
            velocity: 0.0,
            phase: TraitPhase::Idle,
        }
    }
}

/// The four evolving traits. `Copy`, so a snapshot is just a copy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraitVector {
    pub focus: TraitState,
    pub resilience: TraitState,
    pub adaptability: TraitState,
    pub extensible: TraitState,
}

impl TraitVector {
    /// All traits at `value`, at rest.
    pub fn baseline(value: f64) -> Self {
        let s = TraitState::at(value);
        Self {
            focus: s,
            resilience: s,
            adaptability: s,
            extensible: s,
        }
    }

    pub fn get(&self, kind: TraitKind) -> &TraitState {
        match kind {
            TraitKind::Focus => &self.focus,
            TraitKind::Resilience => &self.resilience,
            TraitKind::Adaptability => &self.adaptability,
            TraitKind::Extensible => &self.extensible,
        }
    }

    pub fn get_mut(&mut self, kind: TraitKind) -> &mut TraitState {
        match kind {
            TraitKind::Focus => &mut self.focus,
            TraitKind::Resilience => &mut self.resilience,
            TraitKind::Adaptability => &mut self.adaptability,
            TraitKind::Extensible => &mut self.extensible,
        }
    }

    /// Values in `TraitKind::ALL` order.
    pub fn values(&self) -> [f64; 4] {
        [
            self.focus.value,
            self.resilience.value,
            self.adaptability.value,
            self.extensible.value,
        ]
    }

    pub fn mean(&self) -> f64 {
        self.values().iter().sum::<f64>() / 4.0
    }

    /// Population standard deviation of the four values.
    pub fn std_dev(&self) -> f64 {
        let mean = self.mean();
        let var = self
            .values()
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / 4.0;
        var.sqrt()
    }

    pub fn max_abs_velocity(&self) -> f64 {
        TraitKind::ALL
            .iter()
            .map(|k| self.get(*k).velocity.abs())
            .fold(0.0, f64::max)
    }

    /// True when every value lies in [0, 1].
    pub fn in_bounds(&self) -> bool {
        self.values().iter().all(|v| (0.0..=1.0).contains(v))
    }
}

impl Default for TraitVector {
    fn default() -> Self {
        Self::baseline(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline() {
        let t = TraitVector::default();
        assert_eq!(t.values(), [0.5; 4]);
        assert_eq!(t.focus.phase, TraitPhase::Idle);
        assert!(t.in_bounds());
    }

    #[test]
    fn test_baseline_clamps() {
        let t = TraitVector::baseline(3.0);
        assert_eq!(t.values(), [1.0; 4]);
    }

    #[test]
    fn test_std_dev_balanced_is_zero() {
        let t = TraitVector::baseline(0.3);
        assert!(t.std_dev().abs() < 1e-12);
    }

    #[test]
    fn test_get_mut_roundtrip() {
        let mut t = TraitVector::default();
        t.get_mut(TraitKind::Adaptability).value = 0.9;
        assert!((t.get(TraitKind::Adaptability).value - 0.9).abs() < 1e-12);
        assert!((t.adaptability.value - 0.9).abs() < 1e-12);
    }
}
