// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Venturi Gates
// ─────────────────────────────────────────────────────────────────────
//! The three ordered pipeline stages and their per-gate state.
//!
//! - **Constriction**: amplifies samples whose first difference exceeds
//!   the flow controller's threshold.
//! - **Throat**: denoises through the active inference backend, or the
//!   classical fallback when the backend's predicted cost would overrun.
//! - **Diffuser**: removes the calibrated pipeline gain and turns the
//!   change in the smoothed per-channel RMS state into a signed impact.
//!
//! Gate transforms are pure with respect to `GateState`; the pipeline
//! owns one `GateState` per gate and applies the degraded-frame and
//! stability bookkeeping around each transform.

use std::sync::Arc;

use venturi_control::{DischargeMonitor, StabilityStatus};
use venturi_types::config::StabilityConfig;
use venturi_types::{CompressedModelArtifact, GateId, VenturiResult};

use crate::clock::Clock;
use crate::inference::{ArtifactBackend, ClassicalFallback, InferenceBackend};

/// Root-mean-square of a slice; 0.0 when empty.
pub fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

/// Per-gate mutable state, owned by the pipeline for the whole session.
#[derive(Debug, Clone)]
pub struct GateState {
    gate: GateId,
    throughput: f64,
    monitor: DischargeMonitor,
    last_good_gain: f64,
    consecutive_degraded: u32,
    degraded_total: u64,
    alerts: u64,
}

impl GateState {
    pub fn new(gate: GateId, stability: StabilityConfig) -> Self {
        Self {
            gate,
            throughput: 1.0,
            monitor: DischargeMonitor::new(gate, stability),
            last_good_gain: 1.0,
            consecutive_degraded: 0,
            degraded_total: 0,
            alerts: 0,
        }
    }

    pub fn gate(&self) -> GateId {
        self.gate
    }

    /// Smoothed throughput estimate in [0, 1].
    pub fn throughput(&self) -> f64 {
        self.throughput
    }

    pub fn discharge_coefficient(&self) -> f64 {
        self.monitor.coefficient()
    }

    /// Calibrated coefficient, 1.0 until the initial calibration completes.
    pub fn calibrated_coefficient(&self) -> f64 {
        self.monitor.calibrated().unwrap_or(1.0)
    }

    pub fn integral_error(&self) -> f64 {
        self.monitor.integral_error()
    }

    pub fn last_good_gain(&self) -> f64 {
        self.last_good_gain
    }

    pub fn consecutive_degraded(&self) -> u32 {
        self.consecutive_degraded
    }

    pub fn degraded_total(&self) -> u64 {
        self.degraded_total
    }

    pub fn alerts(&self) -> u64 {
        self.alerts
    }

    pub fn monitor(&self) -> &DischargeMonitor {
        &self.monitor
    }

    pub(crate) fn monitor_mut(&mut self) -> &mut DischargeMonitor {
        &mut self.monitor
    }

    /// Book a successful frame. `gain` is RMS(out)/RMS(in) (None for silent input).
    pub(crate) fn record_success(
        &mut self,
        gain: Option<f64>,
        throughput_sample: f64,
        smoothing: f64,
        max_gain: f64,
    ) -> StabilityStatus {
        self.consecutive_degraded = 0;
        if throughput_sample.is_finite() {
            self.throughput =
                (1.0 - smoothing) * self.throughput + smoothing * throughput_sample.clamp(0.0, 1.0);
        }
        match gain {
            Some(g) if g.is_finite() && g > 0.0 => {
                self.last_good_gain = g.min(max_gain);
                self.monitor.observe(g)
            }
            _ => StabilityStatus::Ignored,
        }
    }

    /// Book a degraded frame. Returns true when this frame raises an alert.
    pub(crate) fn record_degraded(&mut self, alert_after: u32) -> bool {
        self.degraded_total += 1;
        self.consecutive_degraded += 1;
        if self.consecutive_degraded >= alert_after {
            self.consecutive_degraded = 0;
            self.alerts += 1;
            return true;
        }
        false
    }

    /// Last-known-good transform: scale by the last healthy gain.
    pub(crate) fn apply_last_good(&self, input: &[f64], out: &mut [f64], max_abs: f64) {
        for (o, &x) in out.iter_mut().zip(input) {
            let v = x * self.last_good_gain;
            *o = if v.is_finite() {
                v.clamp(-max_abs, max_abs)
            } else {
                0.0
            };
        }
    }
}

// ── Gate 1: Constriction ────────────────────────────────────────────

pub struct Constriction {
    gain: f64,
}

impl Constriction {
    pub fn new(enhancement_gain: f64) -> Self {
        Self {
            gain: enhancement_gain,
        }
    }

    /// Returns the fraction of samples amplified.
    pub fn transform(
        &self,
        input: &[f64],
        channels: usize,
        threshold: f64,
        out: &mut [f64],
    ) -> VenturiResult<f64> {
        let len = input.len() / channels.max(1);
        let mut amplified = 0usize;
        for ch in 0..channels {
            if len > 0 {
                out[ch] = input[ch];
            }
            for t in 1..len {
                let x = input[t * channels + ch];
                let d = x - input[(t - 1) * channels + ch];
                let excess = d.abs() - threshold;
                out[t * channels + ch] = if excess > 0.0 {
                    amplified += 1;
                    x + self.gain * excess * d.signum()
                } else {
                    x
                };
            }
        }
        let candidates = channels * len.saturating_sub(1);
        Ok(if candidates == 0 {
            0.0
        } else {
            amplified as f64 / candidates as f64
        })
    }
}

// ── Gate 2: Throat ──────────────────────────────────────────────────

/// Details of one Throat pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroatOutcome {
    pub used_fallback: bool,
    pub accuracy: f64,
    /// Predicted model cost at this throughput, if a model is installed.
    pub predicted_cost_us: Option<f64>,
}

pub struct Throat {
    model: Option<Box<dyn InferenceBackend>>,
    fallback: ClassicalFallback,
    observed_cost_us: Option<f64>,
    cost_smoothing: f64,
    model_frames: u64,
    fallback_frames: u64,
    /// Set while the observed cost alone keeps the model off.
    throttled: bool,
}

impl Throat {
    pub fn new(fallback_accuracy: f64, cost_smoothing: f64) -> Self {
        Self {
            model: None,
            fallback: ClassicalFallback::new(fallback_accuracy),
            observed_cost_us: None,
            cost_smoothing,
            model_frames: 0,
            fallback_frames: 0,
            throttled: false,
        }
    }

    /// Replace the active backend. Returns the retired backend's version.
    pub fn install(&mut self, backend: Box<dyn InferenceBackend>) -> Option<u64> {
        self.observed_cost_us = None;
        self.throttled = false;
        self.model.replace(backend).and_then(|old| old.version())
    }

    pub fn install_artifact(&mut self, artifact: Arc<CompressedModelArtifact>) -> Option<u64> {
        self.install(Box::new(ArtifactBackend::new(artifact)))
    }

    pub fn active_version(&self) -> Option<u64> {
        self.model.as_ref().and_then(|m| m.version())
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn model_frames(&self) -> u64 {
        self.model_frames
    }

    pub fn fallback_frames(&self) -> u64 {
        self.fallback_frames
    }

    pub fn is_throttled(&self) -> bool {
        self.throttled
    }

    /// Full-throughput cost prediction: the larger of the declared and
    /// observed cost.
    pub fn predicted_cost_us(&self) -> Option<f64> {
        let model = self.model.as_ref()?;
        let declared = model.estimated_cost_us();
        Some(match self.observed_cost_us {
            Some(observed) => declared.max(observed),
            None => declared,
        })
    }

    /// Run the model if it fits in `budget_us`, otherwise the fallback.
    pub fn transform(
        &mut self,
        input: &[f64],
        channels: usize,
        throughput: f64,
        budget_us: f64,
        clock: &dyn Clock,
        out: &mut [f64],
    ) -> VenturiResult<ThroatOutcome> {
        let predicted = self.predicted_cost_us().map(|c| c * throughput);
        let fits = matches!(predicted, Some(p) if p.is_finite() && p <= budget_us);

        if let (true, Some(model)) = (fits, self.model.as_ref()) {
            let t0 = clock.now_us();
            model.denoise(input, channels, throughput, out)?;
            let elapsed = clock.now_us().saturating_sub(t0) as f64;
            // normalise back to full throughput before smoothing
            let full = elapsed / throughput.max(1e-6);
            let a = self.cost_smoothing;
            self.observed_cost_us = Some(match self.observed_cost_us {
                Some(prev) => (1.0 - a) * prev + a * full,
                None => full,
            });
            self.model_frames += 1;
            if self.throttled {
                log::info!("throat: model cost back within budget, inference resumed");
                self.throttled = false;
            }
            return Ok(ThroatOutcome {
                used_fallback: false,
                accuracy: model.accuracy(),
                predicted_cost_us: predicted,
            });
        }

        if let (Some(p), Some(model)) = (predicted, self.model.as_ref()) {
            let declared = model.estimated_cost_us();
            let declared_fits = declared.is_finite() && declared * throughput <= budget_us;
            match self.observed_cost_us {
                // Only measurements hold the model off: relax them towards
                // the declared cost so one stall cannot retire it for good.
                Some(observed) if declared_fits && observed > declared => {
                    if !self.throttled {
                        log::warn!(
                            "throat: observed cost {observed:.1}us keeps {} off budget {budget_us:.1}us, classical fallback",
                            model.name()
                        );
                        self.throttled = true;
                    }
                    let a = self.cost_smoothing.clamp(0.05, 1.0);
                    self.observed_cost_us = Some((1.0 - a) * observed + a * declared);
                }
                _ => log::debug!(
                    "throat: predicted {p:.1}us > budget {budget_us:.1}us, classical fallback"
                ),
            }
        }
        self.fallback.denoise(input, channels, throughput, out)?;
        self.fallback_frames += 1;
        Ok(ThroatOutcome {
            used_fallback: true,
            accuracy: self.fallback.accuracy(),
            predicted_cost_us: predicted,
        })
    }
}

// ── Gate 3: Diffuser ────────────────────────────────────────────────

pub struct Diffuser {
    impact_gain: f64,
    smoothing: f64,
    state: Vec<f64>,
    frame_rms: Vec<f64>,
    primed: bool,
}

impl Diffuser {
    pub fn new(channels: usize, impact_gain: f64, smoothing: f64) -> Self {
        Self {
            impact_gain,
            smoothing,
            state: vec![0.0; channels],
            frame_rms: vec![0.0; channels],
            primed: false,
        }
    }

    /// Smoothed per-channel RMS neural-state estimate.
    pub fn state(&self) -> &[f64] {
        &self.state
    }

    /// Denormalise by the calibrated upstream gain.
    pub fn transform(&self, input: &[f64], pipeline_gain: f64, out: &mut [f64]) -> VenturiResult<()> {
        let inv = if pipeline_gain.is_finite() && pipeline_gain.abs() > 1e-12 {
            1.0 / pipeline_gain
        } else {
            1.0
        };
        for (o, &x) in out.iter_mut().zip(input) {
            *o = x * inv;
        }
        Ok(())
    }

    /// Fold a healthy output frame into the state estimate and return
    /// impact in [-1, 1].
    pub fn update_state(&mut self, out: &[f64], channels: usize) -> f64 {
        let len = out.len() / channels.max(1);
        if len == 0 {
            return 0.0;
        }
        for ch in 0..channels {
            let ss: f64 = (0..len).map(|t| out[t * channels + ch].powi(2)).sum();
            self.frame_rms[ch] = (ss / len as f64).sqrt();
        }
        if !self.primed {
            self.state.copy_from_slice(&self.frame_rms);
            self.primed = true;
            return 0.0;
        }
        let before = self.state.iter().sum::<f64>() / channels as f64;
        let s = self.smoothing;
        for (st, &r) in self.state.iter_mut().zip(&self.frame_rms) {
            *st = (1.0 - s) * *st + s * r;
        }
        let after = self.state.iter().sum::<f64>() / channels as f64;
        if before <= 1e-12 {
            return 0.0;
        }
        let impact = (self.impact_gain * (after - before) / before).tanh();
        if impact.is_finite() {
            impact
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        self.state.iter_mut().for_each(|v| *v = 0.0);
        self.primed = false;
    }
}
