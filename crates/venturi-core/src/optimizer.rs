// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Mode Selector & Autonomous Optimizer
// ─────────────────────────────────────────────────────────────────────
//! Trend-driven operating-mode selection with hysteresis and a thrash
//! guard, plus bounded hill-climbing exploration over the trait vector.
//!
//! Candidate table (latency trend × performance trend):
//!
//! | latency   | performance | candidate          |
//! |-----------|-------------|--------------------|
//! | Declining | Declining   | Efficiency         |
//! | Declining | any other   | Adaptive           |
//! | other     | Declining   | Performance        |
//! | Improving | Improving   | keep current       |
//! | otherwise |             | Balanced           |
//!
//! A supervisory alert from the gate pipeline forces Efficiency at once.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use venturi_types::config::{BenchmarkTargets, ExplorationConfig, ModeConfig};
use venturi_types::{ModeWeights, OptimizationMode, TraitKind, TraitVector, VenturiError};

use crate::evolution::TraitEvolution;
use crate::window::PerformanceWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

impl Trend {
    /// Classify a slope. `higher_is_better` is false for latency.
    pub fn classify(slope: f64, epsilon: f64, higher_is_better: bool) -> Self {
        let s = if higher_is_better { slope } else { -slope };
        if !s.is_finite() {
            Self::Stable
        } else if s > epsilon {
            Self::Improving
        } else if s < -epsilon {
            Self::Declining
        } else {
            Self::Stable
        }
    }
}

/// Outcome of one selector evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ModeDecision {
    Hold,
    Switched {
        from: OptimizationMode,
        to: OptimizationMode,
        forced: bool,
    },
    /// Switch attempt refused by the thrash guard.
    Suppressed(VenturiError),
}

pub struct ModeSelector {
    cfg: ModeConfig,
    current: OptimizationMode,
    adaptive: ModeWeights,
    candidate: Option<OptimizationMode>,
    streak: u32,
    cycle: u64,
    switch_cycles: VecDeque<u64>,
    switches: u64,
    forced: u64,
    suppressed: u64,
    last_trends: (Trend, Trend),
}

impl ModeSelector {
    pub fn new(cfg: ModeConfig) -> Self {
        Self {
            current: cfg.initial,
            cfg,
            adaptive: ModeWeights::default(),
            candidate: None,
            streak: 0,
            cycle: 0,
            switch_cycles: VecDeque::new(),
            switches: 0,
            forced: 0,
            suppressed: 0,
            last_trends: (Trend::Stable, Trend::Stable),
        }
    }

    pub fn current(&self) -> OptimizationMode {
        self.current
    }

    /// Weight pair of the active mode.
    pub fn weights(&self) -> ModeWeights {
        match self.current {
            OptimizationMode::Adaptive => self.adaptive,
            m => self.cfg.weights(m),
        }
    }

    /// Weight pair any mode would use right now.
    pub fn weights_for(&self, mode: OptimizationMode) -> ModeWeights {
        match mode {
            OptimizationMode::Adaptive => self.adaptive,
            m => self.cfg.weights(m),
        }
    }

    pub fn switches(&self) -> u64 {
        self.switches
    }

    pub fn forced_switches(&self) -> u64 {
        self.forced
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// (latency trend, performance trend) from the last evaluation.
    pub fn last_trends(&self) -> (Trend, Trend) {
        self.last_trends
    }

    /// Recompute the Adaptive pair from the window and benchmark targets.
    pub fn refresh_adaptive(&mut self, window: &PerformanceWindow, targets: &BenchmarkTargets) {
        if window.is_empty() {
            return;
        }
        let gap = ((targets.accuracy - window.mean_accuracy()) / targets.accuracy).clamp(-1.0, 1.0);
        let pressure =
            ((window.mean_latency_us() - targets.latency_us) / targets.latency_us).clamp(-1.0, 1.0);
        let focus = (0.5 + self.cfg.adaptive_gain * (gap - pressure))
            .clamp(self.cfg.adaptive_min, self.cfg.adaptive_max);
        self.adaptive = ModeWeights::from_focus(focus);
    }

    fn candidate_for(&self, latency: Trend, perf: Trend) -> OptimizationMode {
        match (latency, perf) {
            (Trend::Declining, Trend::Declining) => OptimizationMode::Efficiency,
            (Trend::Declining, _) => OptimizationMode::Adaptive,
            (_, Trend::Declining) => OptimizationMode::Performance,
            (Trend::Improving, Trend::Improving) => self.current,
            _ => OptimizationMode::Balanced,
        }
    }

    fn prune_history(&mut self) {
        while let Some(&c) = self.switch_cycles.front() {
            if self.cycle - c < self.cfg.thrash_window {
                break;
            }
            self.switch_cycles.pop_front();
        }
    }

    fn commit(&mut self, to: OptimizationMode, forced: bool) -> ModeDecision {
        let from = self.current;
        self.current = to;
        self.candidate = None;
        self.streak = 0;
        self.switches += 1;
        self.switch_cycles.push_back(self.cycle);
        if forced {
            self.forced += 1;
            log::warn!("mode {from} -> {to} forced by supervisor alert");
        } else {
            log::info!("mode {from} -> {to}");
        }
        ModeDecision::Switched { from, to, forced }
    }

    /// One selector cycle. Call once per frame after the record is in the window.
    pub fn evaluate(
        &mut self,
        window: &PerformanceWindow,
        targets: &BenchmarkTargets,
        supervisor_alert: bool,
    ) -> ModeDecision {
        self.cycle += 1;
        self.prune_history();
        self.refresh_adaptive(window, targets);

        if supervisor_alert {
            if self.current == OptimizationMode::Efficiency {
                return ModeDecision::Hold;
            }
            return self.commit(OptimizationMode::Efficiency, true);
        }

        if self.cycle % self.cfg.evaluation_interval.max(1) != 0 || window.len() < self.cfg.min_window {
            return ModeDecision::Hold;
        }

        let eps = self.cfg.trend_epsilon;
        let perf = Trend::classify(window.score_slope(), eps, true);
        let mean_latency = window.mean_latency_us();
        let rel_latency_slope = if mean_latency > 0.0 {
            window.latency_slope() / mean_latency
        } else {
            0.0
        };
        let latency = Trend::classify(rel_latency_slope, eps, false);
        self.last_trends = (latency, perf);

        let want = self.candidate_for(latency, perf);
        if want == self.current {
            self.candidate = None;
            self.streak = 0;
            return ModeDecision::Hold;
        }
        if self.candidate == Some(want) {
            self.streak += 1;
        } else {
            self.candidate = Some(want);
            self.streak = 1;
        }
        if self.streak < self.cfg.hysteresis_cycles {
            return ModeDecision::Hold;
        }

        if self.switch_cycles.len() >= self.cfg.max_switches {
            self.suppressed += 1;
            self.candidate = None;
            self.streak = 0;
            let err = VenturiError::ModeThrashGuard {
                attempted: want,
                switches: self.switch_cycles.len(),
            };
            log::warn!("{err}");
            return ModeDecision::Suppressed(err);
        }
        self.commit(want, false)
    }
}

// ── Exploration ─────────────────────────────────────────────────────

/// Pluggable exploration capability: propose a nearby trait vector.
pub trait Explorer: Send {
    fn name(&self) -> &'static str;
    fn explore(&mut self, traits: &TraitVector) -> Option<TraitVector>;
}

/// Deterministic default: never proposes anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExploration;

impl Explorer for NoExploration {
    fn name(&self) -> &'static str {
        "none"
    }

    fn explore(&mut self, _traits: &TraitVector) -> Option<TraitVector> {
        None
    }
}

/// Uniform perturbation of each trait value within ±magnitude.
pub struct BoundedPerturbation {
    rng: StdRng,
    magnitude: f64,
}

impl BoundedPerturbation {
    pub fn new(magnitude: f64, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            magnitude: magnitude.abs(),
        }
    }

    pub fn from_config(cfg: &ExplorationConfig) -> Self {
        Self::new(cfg.magnitude, cfg.seed)
    }
}

impl Explorer for BoundedPerturbation {
    fn name(&self) -> &'static str {
        "bounded_perturbation"
    }

    fn explore(&mut self, traits: &TraitVector) -> Option<TraitVector> {
        let mut candidate = *traits;
        for kind in TraitKind::ALL {
            let m = self.magnitude;
            let noise = self.rng.gen_range(-m..=m);
            let state = candidate.get_mut(kind);
            state.value = (state.value + noise).clamp(0.0, 1.0);
        }
        Some(candidate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorationEvent {
    None,
    Started,
    Probing,
    Kept,
    Reverted,
}

struct Probe {
    /// Per-trait displacement the candidate applied, in `TraitKind::ALL` order.
    offsets: [f64; 4],
    baseline: f64,
    scores: Vec<f64>,
}

/// Probes explorer candidates and keeps them only if the score improves.
pub struct HillClimber {
    enabled: bool,
    interval: u64,
    probe_cycles: usize,
    explorer: Box<dyn Explorer>,
    since_last: u64,
    probe: Option<Probe>,
    kept: u64,
    reverted: u64,
}

impl HillClimber {
    pub fn new(cfg: &ExplorationConfig, explorer: Box<dyn Explorer>) -> Self {
        Self {
            enabled: cfg.enabled,
            interval: cfg.interval,
            probe_cycles: cfg.probe_cycles as usize,
            explorer,
            since_last: 0,
            probe: None,
            kept: 0,
            reverted: 0,
        }
    }

    pub fn explorer_name(&self) -> &'static str {
        self.explorer.name()
    }

    pub fn is_probing(&self) -> bool {
        self.probe.is_some()
    }

    pub fn kept(&self) -> u64 {
        self.kept
    }

    pub fn reverted(&self) -> u64 {
        self.reverted
    }

    /// Advance one cycle. `score` is this cycle's composite score and
    /// `baseline` the recent mean used to judge a new probe.
    pub fn observe(
        &mut self,
        score: f64,
        baseline: f64,
        evolution: &mut TraitEvolution,
    ) -> ExplorationEvent {
        if let Some(probe) = self.probe.as_mut() {
            probe.scores.push(score);
            if probe.scores.len() < self.probe_cycles {
                return ExplorationEvent::Probing;
            }
            let mean = probe.scores.iter().sum::<f64>() / probe.scores.len() as f64;
            let improved = mean > probe.baseline;
            let offsets = probe.offsets;
            self.probe = None;
            self.since_last = 0;
            return if improved {
                self.kept += 1;
                log::debug!("exploration kept (mean {mean:.4})");
                ExplorationEvent::Kept
            } else {
                // Undo only the displacement; evolution kept running meanwhile.
                evolution.withdraw(offsets);
                self.reverted += 1;
                log::debug!("exploration reverted (mean {mean:.4})");
                ExplorationEvent::Reverted
            };
        }

        if !self.enabled {
            return ExplorationEvent::None;
        }
        self.since_last += 1;
        if self.since_last < self.interval {
            return ExplorationEvent::None;
        }
        self.since_last = 0;
        let saved = evolution.snapshot();
        match self.explorer.explore(&saved) {
            Some(candidate) => {
                evolution.apply_candidate(&candidate);
                let applied = evolution.snapshot();
                let mut offsets = [0.0; 4];
                for (o, kind) in offsets.iter_mut().zip(TraitKind::ALL) {
                    *o = applied.get(kind).value - saved.get(kind).value;
                }
                self.probe = Some(Probe {
                    offsets,
                    baseline,
                    scores: Vec::with_capacity(self.probe_cycles),
                });
                ExplorationEvent::Started
            }
            None => ExplorationEvent::None,
        }
    }
}
