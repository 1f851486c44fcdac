// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Trait Evolution
// ─────────────────────────────────────────────────────────────────────
//! Momentum-based evolution of the four cognitive-state traits.
//!
//! Per cycle, per trait:
//!
//! ```text
//! ΔT        = α × impact × weight × env_factor
//! velocity' = clamp(ω × velocity + (1 − ω) × ΔT, −cap, cap)
//! trait'    = clip(trait + velocity', 0, 1)
//! ```
//!
//! When the clip engages the velocity is absorbed, so a pinned trait is
//! at rest. Phases: Idle (|impact| below `idle_epsilon`), Stable
//! (|velocity| < τ), otherwise Updating. A Stable trait whose ΔT is
//! negligible skips the recompute.

use venturi_types::config::{EnvironmentConfig, TraitConfig, TraitWeights};
use venturi_types::{ModeWeights, TraitKind, TraitPhase, TraitVector};

/// Per-trait weights derived from the active mode's pair.
///
/// focus ← focus_weight, resilience ← latency_weight, adaptability and
/// extensible ← mean of the pair; each scaled by its base weight.
pub fn trait_weights(mode: ModeWeights, base: &TraitWeights) -> [f64; 4] {
    let mid = 0.5 * (mode.focus_weight + mode.latency_weight);
    [
        mode.focus_weight * base.focus,
        mode.latency_weight * base.resilience,
        mid * base.adaptability,
        mid * base.extensible,
    ]
}

pub struct TraitEvolution {
    cfg: TraitConfig,
    env_factor: f64,
    traits: TraitVector,
    cycles: u64,
    skips: u64,
}

impl TraitEvolution {
    pub fn new(cfg: TraitConfig, env_factor: f64) -> Self {
        let traits = TraitVector::baseline(cfg.baseline);
        Self {
            cfg,
            env_factor,
            traits,
            cycles: 0,
            skips: 0,
        }
    }

    pub fn from_config(cfg: TraitConfig, env: &EnvironmentConfig) -> Self {
        Self::new(cfg, env.factor())
    }

    /// Read-only snapshot.
    pub fn snapshot(&self) -> TraitVector {
        self.traits
    }

    pub fn env_factor(&self) -> f64 {
        self.env_factor
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Trait updates skipped because the trait was Stable with negligible ΔT.
    pub fn skips(&self) -> u64 {
        self.skips
    }

    /// One evolution cycle under the active mode.
    pub fn step(&mut self, impact: f64, mode: ModeWeights) -> TraitVector {
        let weights = trait_weights(mode, &self.cfg.base_weights);
        self.step_with_weights(impact, weights)
    }

    /// One evolution cycle with explicit per-trait weights.
    pub fn step_with_weights(&mut self, impact: f64, weights: [f64; 4]) -> TraitVector {
        let impact = if impact.is_finite() { impact } else { 0.0 };
        let idle = impact.abs() < self.cfg.idle_epsilon;
        let alpha = self.cfg.adaptation_rate;
        let omega = self.cfg.momentum;
        let cap = self.cfg.velocity_cap;

        for (kind, w) in TraitKind::ALL.iter().zip(weights) {
            let state = self.traits.get_mut(*kind);
            let w = if w.is_finite() { w } else { 0.0 };
            let delta = alpha * impact * w * self.env_factor;

            // Only a trait at rest may skip; residual momentum must keep decaying.
            if state.phase != TraitPhase::Updating
                && delta.abs() <= self.cfg.skip_epsilon
                && state.velocity.abs() <= self.cfg.skip_epsilon
            {
                if idle {
                    state.phase = TraitPhase::Idle;
                }
                self.skips += 1;
                continue;
            }

            let mut velocity = (omega * state.velocity + (1.0 - omega) * delta).clamp(-cap, cap);
            let mut value = state.value + velocity;
            if value > 1.0 {
                value = 1.0;
                velocity = 0.0;
            } else if value < 0.0 {
                value = 0.0;
                velocity = 0.0;
            }
            state.value = value;
            state.velocity = velocity;
            state.phase = if idle {
                TraitPhase::Idle
            } else if velocity.abs() < self.cfg.evolution_threshold {
                TraitPhase::Stable
            } else {
                TraitPhase::Updating
            };
        }
        self.cycles += 1;
        self.traits
    }

    /// Replace trait values (exploration), keeping velocities.
    pub fn apply_candidate(&mut self, candidate: &TraitVector) {
        for kind in TraitKind::ALL {
            let v = candidate.get(kind).value;
            let state = self.traits.get_mut(kind);
            state.value = if v.is_finite() { v.clamp(0.0, 1.0) } else { state.value };
            state.phase = TraitPhase::Updating;
        }
    }

    /// Restore a saved snapshot wholesale.
    pub fn restore(&mut self, saved: TraitVector) {
        self.traits = saved;
    }

    /// Take back a displacement applied by `apply_candidate`, keeping
    /// whatever the update rule has done since. Offsets follow `TraitKind::ALL`.
    pub fn withdraw(&mut self, offsets: [f64; 4]) {
        for (kind, offset) in TraitKind::ALL.into_iter().zip(offsets) {
            let state = self.traits.get_mut(kind);
            if offset.is_finite() {
                state.value = (state.value - offset).clamp(0.0, 1.0);
            }
            state.phase = if state.velocity.abs() < self.cfg.evolution_threshold {
                TraitPhase::Stable
            } else {
                TraitPhase::Updating
            };
        }
    }

    /// Back to baseline, at rest.
    pub fn reset(&mut self) {
        self.traits = TraitVector::baseline(self.cfg.baseline);
    }
}
