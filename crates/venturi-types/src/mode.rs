// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Optimization Modes
// ─────────────────────────────────────────────────────────────────────

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operating-mode weight profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMode {
    Performance,
    Efficiency,
    Balanced,
    /// Weights recomputed every cycle from trend + benchmark comparison.
    Adaptive,
}

impl OptimizationMode {
    pub const ALL: [OptimizationMode; 4] = [
        OptimizationMode::Performance,
        OptimizationMode::Efficiency,
        OptimizationMode::Balanced,
        OptimizationMode::Adaptive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Efficiency => "efficiency",
            Self::Balanced => "balanced",
            Self::Adaptive => "adaptive",
        }
    }

    /// Stable numeric code for telemetry fields.
    pub fn code(self) -> f64 {
        match self {
            Self::Performance => 0.0,
            Self::Efficiency => 1.0,
            Self::Balanced => 2.0,
            Self::Adaptive => 3.0,
        }
    }

    /// Fixed weight pair, or the neutral pair for Adaptive before its
    /// first recompute.
    pub fn default_weights(self) -> ModeWeights {
        match self {
            Self::Performance => ModeWeights::from_focus(0.6),
            Self::Efficiency => ModeWeights::from_focus(0.3),
            Self::Balanced | Self::Adaptive => ModeWeights::from_focus(0.5),
        }
    }
}

impl fmt::Display for OptimizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(focus_weight, latency_weight)` pair. Always sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeWeights {
    pub focus_weight: f64,
    pub latency_weight: f64,
}

impl ModeWeights {
    /// Build a normalised pair from the focus share. Non-finite input
    /// falls back to 0.5; the share is clamped to [0, 1].
    pub fn from_focus(focus: f64) -> Self {
        let focus = if focus.is_finite() {
            focus.clamp(0.0, 1.0)
        } else {
            0.5
        };
        Self {
            focus_weight: focus,
            latency_weight: 1.0 - focus,
        }
    }

    pub fn sum(&self) -> f64 {
        self.focus_weight + self.latency_weight
    }

    pub fn is_normalised(&self, eps: f64) -> bool {
        (self.sum() - 1.0).abs() <= eps
    }
}

impl Default for ModeWeights {
    fn default() -> Self {
        Self::from_focus(0.5)
    }
}
