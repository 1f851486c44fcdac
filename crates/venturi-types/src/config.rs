// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Configuration
// ─────────────────────────────────────────────────────────────────────
//! Strongly-typed session configuration.
//!
//! Read once at startup and immutable for the session unless an
//! explicit recalibration is requested. Every section carries
//! `#[serde(default)]`, so a JSON document only needs the keys it
//! overrides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::artifact::{CompressionLevel, ValidationThresholds};
use crate::error::{VenturiError, VenturiResult};
use crate::mode::{ModeWeights, OptimizationMode};

/// Runtime configuration for the Venturi Kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VenturiConfig {
    pub ingest: IngestConfig,
    pub gates: GateConfig,
    pub stability: StabilityConfig,
    pub flow: FlowConfig,
    pub traits: TraitConfig,
    pub modes: ModeConfig,
    pub scoring: ScoreWeights,
    pub benchmark: BenchmarkTargets,
    pub compression: CompressionConfig,
    pub window: WindowConfig,
    pub exploration: ExplorationConfig,
    pub environment: EnvironmentConfig,
    /// Grace period for draining in-flight frames on shutdown.
    pub shutdown_grace_ms: u64,
}

impl Default for VenturiConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            gates: GateConfig::default(),
            stability: StabilityConfig::default(),
            flow: FlowConfig::default(),
            traits: TraitConfig::default(),
            modes: ModeConfig::default(),
            scoring: ScoreWeights::default(),
            benchmark: BenchmarkTargets::default(),
            compression: CompressionConfig::default(),
            window: WindowConfig::default(),
            exploration: ExplorationConfig::default(),
            environment: EnvironmentConfig::default(),
            shutdown_grace_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub channels: usize,
    /// Readings per frame.
    pub frame_len: usize,
    /// Downstream queue capacity; the oldest frame is dropped when full.
    pub queue_capacity: usize,
    /// Frames that may arrive early and wait for a gap to fill.
    pub reorder_window: usize,
    /// Terminal frames archived for diagnostics.
    pub diagnostic_ring: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channels: 8,
            frame_len: 32,
            queue_capacity: 64,
            reorder_window: 4,
            diagnostic_ring: 16,
        }
    }
}

/// Per-gate soft time budgets in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateBudgets {
    pub constriction_us: f64,
    pub throat_us: f64,
    pub diffuser_us: f64,
    /// Whole-pipeline target.
    pub aggregate_us: f64,
}

impl Default for GateBudgets {
    fn default() -> Self {
        Self {
            constriction_us: 130.0,
            throat_us: 200.0,
            diffuser_us: 80.0,
            aggregate_us: 450.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub budgets: GateBudgets,
    /// Constriction amplification applied to the excess rate-of-change.
    pub enhancement_gain: f64,
    /// Constriction threshold before the flow controller has run.
    pub initial_threshold: f64,
    pub threshold_min: f64,
    pub threshold_max: f64,
    /// Accuracy attributed to the classical Throat fallback.
    pub fallback_accuracy: f64,
    /// Consecutive degraded frames that raise a supervisory alert.
    pub degraded_alert_after: u32,
    /// EMA factor for the Diffuser neural-state estimate and gate throughput.
    pub state_smoothing: f64,
    /// Gain inside tanh() when mapping state change to impact.
    pub impact_gain: f64,
    /// Magnitude clamp for last-known-good output.
    pub max_abs_output: f64,
    /// EMA factor for observed Throat inference cost.
    pub cost_smoothing: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            budgets: GateBudgets::default(),
            enhancement_gain: 0.25,
            initial_threshold: 0.05,
            threshold_min: 0.001,
            threshold_max: 1.0,
            fallback_accuracy: 0.85,
            degraded_alert_after: 3,
            state_smoothing: 0.2,
            impact_gain: 4.0,
            max_abs_output: 1.0e6,
            cost_smoothing: 0.2,
        }
    }
}

/// Discharge-coefficient stability monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
    /// Relative drift tolerance (0.001 = ±0.1 %).
    pub tolerance: f64,
    /// Consecutive out-of-tolerance frames before a breach fires.
    pub breach_cycles: u32,
    /// Raw coefficient samples used for (re)calibration.
    pub calibration_window: usize,
    /// EMA factor for the smoothed coefficient.
    pub coefficient_smoothing: f64,
    /// Anti-windup clamp on the accumulated drift integral.
    pub integral_limit: f64,
    /// Compute recalibrations on the worker thread (false = at the next
    /// frame boundary, for deterministic replays).
    pub background: bool,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.001,
            breach_cycles: 3,
            calibration_window: 16,
            coefficient_smoothing: 0.1,
            integral_limit: 0.05,
            background: true,
        }
    }
}

/// PID flow regulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// EMA factor applied to the derivative term.
    pub derivative_alpha: f64,
    pub integral_limit: f64,
    pub output_limit: f64,
    pub target_performance: f64,
    pub target_efficiency: f64,
    pub target_balanced: f64,
    pub target_adaptive_min: f64,
    pub target_adaptive_max: f64,
    pub throughput_min: f64,
    pub throughput_max: f64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            kp: 0.8,
            ki: 0.1,
            kd: 0.05,
            derivative_alpha: 0.3,
            integral_limit: 5.0,
            output_limit: 1.0,
            target_performance: 0.75,
            target_efficiency: 0.40,
            target_balanced: 0.60,
            target_adaptive_min: 0.40,
            target_adaptive_max: 0.75,
            throughput_min: 0.25,
            throughput_max: 1.0,
        }
    }
}

/// Base multipliers applied on top of the mode-derived trait weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraitWeights {
    pub focus: f64,
    pub resilience: f64,
    pub adaptability: f64,
    pub extensible: f64,
}

impl TraitWeights {
    pub fn uniform(w: f64) -> Self {
        Self {
            focus: w,
            resilience: w,
            adaptability: w,
            extensible: w,
        }
    }

    fn as_array(&self) -> [f64; 4] {
        [self.focus, self.resilience, self.adaptability, self.extensible]
    }
}

impl Default for TraitWeights {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraitConfig {
    /// α
    pub adaptation_rate: f64,
    /// ω
    pub momentum: f64,
    /// τ: below this velocity magnitude a trait is Stable.
    pub evolution_threshold: f64,
    pub velocity_cap: f64,
    pub baseline: f64,
    pub idle_epsilon: f64,
    /// Stable traits whose ΔT is at most this skip the recompute.
    pub skip_epsilon: f64,
    pub base_weights: TraitWeights,
}

impl Default for TraitConfig {
    fn default() -> Self {
        Self {
            adaptation_rate: 0.1,
            momentum: 0.8,
            evolution_threshold: 0.05,
            velocity_cap: 0.5,
            baseline: 0.5,
            idle_epsilon: 1e-4,
            skip_epsilon: 1e-9,
            base_weights: TraitWeights::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    pub initial: OptimizationMode,
    pub performance: ModeWeights,
    pub efficiency: ModeWeights,
    pub balanced: ModeWeights,
    /// Evaluate the window every K cycles.
    pub evaluation_interval: u64,
    /// Consecutive evaluations a candidate must persist before switching.
    pub hysteresis_cycles: u32,
    /// Slope magnitude separating a trend from "stable".
    pub trend_epsilon: f64,
    /// Records required before trends are evaluated.
    pub min_window: usize,
    pub max_switches: usize,
    pub thrash_window: u64,
    pub adaptive_gain: f64,
    pub adaptive_min: f64,
    pub adaptive_max: f64,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            initial: OptimizationMode::Balanced,
            performance: OptimizationMode::Performance.default_weights(),
            efficiency: OptimizationMode::Efficiency.default_weights(),
            balanced: OptimizationMode::Balanced.default_weights(),
            evaluation_interval: 1,
            hysteresis_cycles: 3,
            trend_epsilon: 1e-4,
            min_window: 8,
            max_switches: 6,
            thrash_window: 100,
            adaptive_gain: 0.5,
            adaptive_min: 0.2,
            adaptive_max: 0.8,
        }
    }
}

impl ModeConfig {
    /// Fixed weight pair for a mode. Adaptive returns the neutral pair;
    /// its live pair is owned by the mode selector.
    pub fn weights(&self, mode: OptimizationMode) -> ModeWeights {
        match mode {
            OptimizationMode::Performance => self.performance,
            OptimizationMode::Efficiency => self.efficiency,
            OptimizationMode::Balanced => self.balanced,
            OptimizationMode::Adaptive => ModeWeights::default(),
        }
    }
}

/// Composite-score weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub latency: f64,
    pub impact: f64,
    pub trait_balance: f64,
    pub benchmark: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            latency: 0.3,
            impact: 0.3,
            trait_balance: 0.2,
            benchmark: 0.2,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.latency + self.impact + self.trait_balance + self.benchmark
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkTargets {
    pub latency_us: f64,
    pub accuracy: f64,
    pub size_bytes: u64,
    pub memory_bytes: u64,
}

impl Default for BenchmarkTargets {
    fn default() -> Self {
        Self {
            latency_us: 450.0,
            accuracy: 0.959,
            size_bytes: 64 * 1024,
            memory_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub level: CompressionLevel,
    pub workers: usize,
    pub queue_capacity: usize,
    pub handoff_capacity: usize,
    pub retry_less_aggressive: bool,
    pub thresholds: ValidationThresholds,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            level: CompressionLevel::Balanced,
            workers: 2,
            queue_capacity: 8,
            handoff_capacity: 4,
            retry_less_aggressive: true,
            thresholds: ValidationThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Rolling `PerformanceRecord` capacity (FIFO eviction).
    pub performance_window: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            performance_window: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorationConfig {
    pub enabled: bool,
    /// Per-trait perturbation bound.
    pub magnitude: f64,
    /// Cycles a probe runs before it is judged.
    pub probe_cycles: u32,
    /// Cycles between probes.
    pub interval: u64,
    pub seed: u64,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            magnitude: 0.02,
            probe_cycles: 5,
            interval: 25,
            seed: 7,
        }
    }
}

/// Lookup table from deployment-environment label to `env_factor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub active: String,
    pub factors: BTreeMap<String, f64>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        let mut factors = BTreeMap::new();
        factors.insert("laboratory".to_string(), 1.0);
        factors.insert("clinical".to_string(), 0.9);
        factors.insert("home".to_string(), 0.8);
        factors.insert("field".to_string(), 0.6);
        Self {
            active: "laboratory".to_string(),
            factors,
        }
    }
}

impl EnvironmentConfig {
    /// Factor for the active label. Unknown labels are rejected by
    /// `validate()`, so the fallback of 1.0 only covers unvalidated use.
    pub fn factor(&self) -> f64 {
        self.factors.get(&self.active).copied().unwrap_or(1.0)
    }
}

fn check_unit(name: &str, v: f64) -> VenturiResult<()> {
    if !(0.0..=1.0).contains(&v) {
        return Err(VenturiError::Config(format!(
            "{name} must be in [0, 1], got {v}"
        )));
    }
    Ok(())
}

fn check_positive(name: &str, v: f64) -> VenturiResult<()> {
    if !(v.is_finite() && v > 0.0) {
        return Err(VenturiError::Config(format!("{name} must be > 0, got {v}")));
    }
    Ok(())
}

fn check_nonzero(name: &str, v: usize) -> VenturiResult<()> {
    if v == 0 {
        return Err(VenturiError::Config(format!("{name} must be >= 1")));
    }
    Ok(())
}

fn check_pair(name: &str, w: &ModeWeights) -> VenturiResult<()> {
    check_unit(&format!("{name}.focus_weight"), w.focus_weight)?;
    check_unit(&format!("{name}.latency_weight"), w.latency_weight)?;
    if !w.is_normalised(1e-9) {
        return Err(VenturiError::Config(format!(
            "{name} weights must sum to 1.0, got {} + {} = {}",
            w.focus_weight,
            w.latency_weight,
            w.sum()
        )));
    }
    Ok(())
}

impl VenturiConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> VenturiResult<()> {
        let i = &self.ingest;
        check_nonzero("ingest.channels", i.channels)?;
        check_nonzero("ingest.frame_len", i.frame_len)?;
        if i.frame_len < 2 {
            return Err(VenturiError::Config(
                "ingest.frame_len must be >= 2".to_string(),
            ));
        }
        check_nonzero("ingest.queue_capacity", i.queue_capacity)?;

        let g = &self.gates;
        check_positive("gates.budgets.constriction_us", g.budgets.constriction_us)?;
        check_positive("gates.budgets.throat_us", g.budgets.throat_us)?;
        check_positive("gates.budgets.diffuser_us", g.budgets.diffuser_us)?;
        check_positive("gates.budgets.aggregate_us", g.budgets.aggregate_us)?;
        let stage_sum = g.budgets.constriction_us + g.budgets.throat_us + g.budgets.diffuser_us;
        if stage_sum > g.budgets.aggregate_us {
            return Err(VenturiError::Config(format!(
                "gate budgets sum to {stage_sum}us, exceeding aggregate {}us",
                g.budgets.aggregate_us
            )));
        }
        check_positive("gates.enhancement_gain", g.enhancement_gain)?;
        check_positive("gates.threshold_min", g.threshold_min)?;
        if g.threshold_min > g.threshold_max {
            return Err(VenturiError::Config(
                "gates.threshold_min must be <= gates.threshold_max".to_string(),
            ));
        }
        if !(g.threshold_min..=g.threshold_max).contains(&g.initial_threshold) {
            return Err(VenturiError::Config(format!(
                "gates.initial_threshold must be in [{}, {}], got {}",
                g.threshold_min, g.threshold_max, g.initial_threshold
            )));
        }
        check_unit("gates.fallback_accuracy", g.fallback_accuracy)?;
        if g.degraded_alert_after == 0 {
            return Err(VenturiError::Config(
                "gates.degraded_alert_after must be >= 1".to_string(),
            ));
        }
        check_unit("gates.state_smoothing", g.state_smoothing)?;
        check_unit("gates.cost_smoothing", g.cost_smoothing)?;
        check_positive("gates.impact_gain", g.impact_gain)?;
        check_positive("gates.max_abs_output", g.max_abs_output)?;

        let s = &self.stability;
        check_positive("stability.tolerance", s.tolerance)?;
        if s.breach_cycles == 0 {
            return Err(VenturiError::Config(
                "stability.breach_cycles must be >= 1".to_string(),
            ));
        }
        check_nonzero("stability.calibration_window", s.calibration_window)?;
        check_unit("stability.coefficient_smoothing", s.coefficient_smoothing)?;
        check_positive("stability.integral_limit", s.integral_limit)?;

        let f = &self.flow;
        for (name, v) in [("flow.kp", f.kp), ("flow.ki", f.ki), ("flow.kd", f.kd)] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(VenturiError::Config(format!("{name} must be >= 0, got {v}")));
            }
        }
        check_unit("flow.derivative_alpha", f.derivative_alpha)?;
        check_positive("flow.integral_limit", f.integral_limit)?;
        check_positive("flow.output_limit", f.output_limit)?;
        for (name, v) in [
            ("flow.target_performance", f.target_performance),
            ("flow.target_efficiency", f.target_efficiency),
            ("flow.target_balanced", f.target_balanced),
            ("flow.target_adaptive_min", f.target_adaptive_min),
            ("flow.target_adaptive_max", f.target_adaptive_max),
        ] {
            check_unit(name, v)?;
        }
        if f.target_adaptive_min > f.target_adaptive_max {
            return Err(VenturiError::Config(
                "flow.target_adaptive_min must be <= flow.target_adaptive_max".to_string(),
            ));
        }
        check_positive("flow.throughput_min", f.throughput_min)?;
        if f.throughput_min > f.throughput_max || f.throughput_max > 1.0 {
            return Err(VenturiError::Config(
                "flow throughput bounds must satisfy 0 < min <= max <= 1".to_string(),
            ));
        }

        let t = &self.traits;
        check_positive("traits.adaptation_rate", t.adaptation_rate)?;
        check_unit("traits.momentum", t.momentum)?;
        if t.momentum >= 1.0 {
            return Err(VenturiError::Config(
                "traits.momentum must be < 1".to_string(),
            ));
        }
        check_positive("traits.evolution_threshold", t.evolution_threshold)?;
        check_positive("traits.velocity_cap", t.velocity_cap)?;
        check_unit("traits.baseline", t.baseline)?;
        for (idx, w) in t.base_weights.as_array().iter().enumerate() {
            if !(w.is_finite() && *w >= 0.0) {
                return Err(VenturiError::Config(format!(
                    "traits.base_weights[{idx}] must be >= 0, got {w}"
                )));
            }
        }

        let m = &self.modes;
        check_pair("modes.performance", &m.performance)?;
        check_pair("modes.efficiency", &m.efficiency)?;
        check_pair("modes.balanced", &m.balanced)?;
        if m.evaluation_interval == 0 {
            return Err(VenturiError::Config(
                "modes.evaluation_interval must be >= 1".to_string(),
            ));
        }
        if m.hysteresis_cycles == 0 {
            return Err(VenturiError::Config(
                "modes.hysteresis_cycles must be >= 1".to_string(),
            ));
        }
        if m.min_window < 2 {
            return Err(VenturiError::Config(
                "modes.min_window must be >= 2".to_string(),
            ));
        }
        check_nonzero("modes.max_switches", m.max_switches)?;
        check_unit("modes.adaptive_min", m.adaptive_min)?;
        check_unit("modes.adaptive_max", m.adaptive_max)?;
        if m.adaptive_min > m.adaptive_max {
            return Err(VenturiError::Config(
                "modes.adaptive_min must be <= modes.adaptive_max".to_string(),
            ));
        }

        let w = &self.scoring;
        for (name, v) in [
            ("scoring.latency", w.latency),
            ("scoring.impact", w.impact),
            ("scoring.trait_balance", w.trait_balance),
            ("scoring.benchmark", w.benchmark),
        ] {
            check_unit(name, v)?;
        }
        if (w.sum() - 1.0).abs() > 1e-9 {
            return Err(VenturiError::Config(format!(
                "scoring weights must sum to 1.0, got {}",
                w.sum()
            )));
        }

        let b = &self.benchmark;
        check_positive("benchmark.latency_us", b.latency_us)?;
        check_unit("benchmark.accuracy", b.accuracy)?;
        if b.memory_bytes == 0 || b.size_bytes == 0 {
            return Err(VenturiError::Config(
                "benchmark size and memory targets must be > 0".to_string(),
            ));
        }

        let c = &self.compression;
        check_nonzero("compression.workers", c.workers)?;
        check_nonzero("compression.queue_capacity", c.queue_capacity)?;
        check_nonzero("compression.handoff_capacity", c.handoff_capacity)?;
        check_positive("compression.thresholds.max_latency_us", c.thresholds.max_latency_us)?;
        check_unit("compression.thresholds.min_accuracy", c.thresholds.min_accuracy)?;

        check_nonzero("window.performance_window", self.window.performance_window)?;
        if self.window.performance_window < m.min_window {
            return Err(VenturiError::Config(format!(
                "window.performance_window ({}) must be >= modes.min_window ({})",
                self.window.performance_window, m.min_window
            )));
        }

        let x = &self.exploration;
        check_unit("exploration.magnitude", x.magnitude)?;
        if x.probe_cycles == 0 || x.interval == 0 {
            return Err(VenturiError::Config(
                "exploration.probe_cycles and exploration.interval must be >= 1".to_string(),
            ));
        }

        let e = &self.environment;
        if e.factors.is_empty() {
            return Err(VenturiError::Config(
                "environment.factors must not be empty".to_string(),
            ));
        }
        for (label, v) in &e.factors {
            if !(v.is_finite() && *v >= 0.0) {
                return Err(VenturiError::Config(format!(
                    "environment factor '{label}' must be >= 0, got {v}"
                )));
            }
        }
        if !e.factors.contains_key(&e.active) {
            return Err(VenturiError::Config(format!(
                "environment.active '{}' has no entry in environment.factors",
                e.active
            )));
        }
        Ok(())
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> VenturiResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| VenturiError::Config(format!("JSON parse error: {e}")))
    }

    /// Serialise to pretty JSON.
    pub fn to_json(&self) -> VenturiResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| VenturiError::Config(format!("JSON encode error: {e}")))
    }

    /// Target load fraction for a fixed mode.
    pub fn target_load(&self, mode: OptimizationMode) -> f64 {
        match mode {
            OptimizationMode::Performance => self.flow.target_performance,
            OptimizationMode::Efficiency => self.flow.target_efficiency,
            OptimizationMode::Balanced => self.flow.target_balanced,
            OptimizationMode::Adaptive => {
                0.5 * (self.flow.target_adaptive_min + self.flow.target_adaptive_max)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        VenturiConfig::default().validate().unwrap();
    }

    #[test]
    fn test_budget_sum_exceeds_aggregate() {
        let mut cfg = VenturiConfig::default();
        cfg.gates.budgets.throat_us = 400.0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("aggregate"));
    }

    #[test]
    fn test_unnormalised_mode_pair_rejected() {
        let mut cfg = VenturiConfig::default();
        cfg.modes.performance = ModeWeights {
            focus_weight: 0.6,
            latency_weight: 0.6,
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("modes.performance"));
    }

    #[test]
    fn test_score_weights_must_sum_to_one() {
        let mut cfg = VenturiConfig::default();
        cfg.scoring.impact = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unknown_environment_rejected() {
        let mut cfg = VenturiConfig::default();
        cfg.environment.active = "orbit".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("orbit"));
    }

    #[test]
    fn test_momentum_one_rejected() {
        let mut cfg = VenturiConfig::default();
        cfg.traits.momentum = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = VenturiConfig::from_json(
            r#"{"traits": {"adaptation_rate": 0.2}, "environment": {"active": "field"}}"#,
        )
        .unwrap();
        assert!((cfg.traits.adaptation_rate - 0.2).abs() < 1e-12);
        assert!((cfg.traits.momentum - 0.8).abs() < 1e-12);
        assert_eq!(cfg.environment.active, "field");
        // factors table falls back to the default mapping
        assert!((cfg.environment.factor() - 0.6).abs() < 1e-12);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_json_roundtrip() {
        let cfg = VenturiConfig::default();
        let back = VenturiConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn test_bad_json() {
        let err = VenturiConfig::from_json("{not json").unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_target_load_per_mode() {
        let cfg = VenturiConfig::default();
        assert!((cfg.target_load(OptimizationMode::Performance) - 0.75).abs() < 1e-12);
        assert!((cfg.target_load(OptimizationMode::Efficiency) - 0.40).abs() < 1e-12);
        let adaptive = cfg.target_load(OptimizationMode::Adaptive);
        assert!((0.40..=0.75).contains(&adaptive));
    }
}
