// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Performance Scorer & Tier Classifier
// ─────────────────────────────────────────────────────────────────────
//! Composite per-cycle score against the configured benchmark targets.
//!
//! Four sub-scores, each normalised to [0, 1]:
//! - **latency**: `min(1, target / latency)`
//! - **impact**: `(impact + 1) / 2`
//! - **trait balance**: `1 - 2·stddev(trait values)`
//! - **benchmark**: mean of `min(1, accuracy / target)` and
//!   `min(1, memory_target / memory)`
//!
//! The composite is their weighted sum, bucketed into a `BenchmarkTier`.

use serde::Serialize;

use venturi_types::config::{BenchmarkTargets, ScoreWeights};
use venturi_types::score::clamp_score;
use venturi_types::{BenchmarkTier, TraitVector};

/// Sub-scores and composite for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub latency: f64,
    pub impact: f64,
    pub trait_balance: f64,
    pub benchmark: f64,
    pub composite: f64,
    pub tier: BenchmarkTier,
}

/// Ratio score: 1.0 when `actual` meets `target`, decaying as it overshoots.
fn meets(target: f64, actual: f64) -> f64 {
    if actual <= 0.0 {
        return 1.0;
    }
    clamp_score((target / actual).min(1.0), 0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct PerformanceScorer {
    weights: ScoreWeights,
    targets: BenchmarkTargets,
}

impl PerformanceScorer {
    pub fn new(weights: ScoreWeights, targets: BenchmarkTargets) -> Self {
        Self { weights, targets }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    pub fn targets(&self) -> &BenchmarkTargets {
        &self.targets
    }

    pub fn latency_score(&self, latency_us: f64) -> f64 {
        meets(self.targets.latency_us, latency_us)
    }

    pub fn impact_score(&self, impact: f64) -> f64 {
        clamp_score((impact + 1.0) / 2.0, 0.0, 1.0)
    }

    pub fn trait_balance(&self, traits: &TraitVector) -> f64 {
        clamp_score(1.0 - 2.0 * traits.std_dev(), 0.0, 1.0)
    }

    pub fn benchmark_score(&self, accuracy: f64, memory_bytes: u64) -> f64 {
        let acc = if self.targets.accuracy > 0.0 {
            clamp_score((accuracy / self.targets.accuracy).min(1.0), 0.0, 1.0)
        } else {
            1.0
        };
        let mem = meets(self.targets.memory_bytes as f64, memory_bytes as f64);
        (acc + mem) / 2.0
    }

    /// Score one cycle.
    pub fn score(
        &self,
        latency_us: f64,
        impact: f64,
        traits: &TraitVector,
        accuracy: f64,
        memory_bytes: u64,
    ) -> ScoreBreakdown {
        let latency = self.latency_score(latency_us);
        let impact = self.impact_score(impact);
        let trait_balance = self.trait_balance(traits);
        let benchmark = self.benchmark_score(accuracy, memory_bytes);
        let w = &self.weights;
        let total = w.sum();
        let raw = w.latency * latency
            + w.impact * impact
            + w.trait_balance * trait_balance
            + w.benchmark * benchmark;
        let composite = if total > 0.0 {
            clamp_score(raw / total, 0.0, 1.0)
        } else {
            0.0
        };
        ScoreBreakdown {
            latency,
            impact,
            trait_balance,
            benchmark,
            composite,
            tier: BenchmarkTier::from_score(composite),
        }
    }
}
