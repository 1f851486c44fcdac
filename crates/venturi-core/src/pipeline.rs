// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Gate Pipeline
// ─────────────────────────────────────────────────────────────────────
//! Runs Constriction → Throat → Diffuser over one frame with per-gate
//! soft timeouts, degraded-frame substitution and discharge-coefficient
//! monitoring.
//!
//! Scratch buffers are allocated once per frame shape; the per-frame path
//! does arithmetic only. Recalibration results and new artifacts are
//! picked up in `frame_boundary`, never mid-frame.

use std::sync::Arc;

use venturi_control::{Calibrator, FlowSetpoints, StabilityStatus};
use venturi_types::config::{GateConfig, StabilityConfig};
use venturi_types::{
    ArtifactHandoff, CompressedModelArtifact, GateId, SampleFrame, VenturiError, VenturiResult,
};

use crate::clock::Clock;
use crate::gates::{rms, Constriction, Diffuser, GateState, Throat, ThroatOutcome};
use crate::inference::InferenceBackend;

/// Per-frame pipeline result.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub seq: u64,
    /// Aggregate measured latency.
    pub latency_us: f64,
    pub gate_elapsed_us: [f64; 3],
    pub impact: f64,
    pub accuracy_estimate: f64,
    /// Any gate fell back to its last-known-good transform.
    pub degraded: bool,
    pub degraded_gates: [bool; 3],
    /// Raised when a gate reached its consecutive-degraded limit.
    pub supervisor_alert: bool,
    pub used_fallback: bool,
    pub amplified_fraction: f64,
    /// Mean-square energy of the Throat output.
    pub pattern_energy: f64,
    /// Mean-square energy removed by the Throat.
    pub noise_removed: f64,
    pub stability_breaches: u32,
}

/// What changed at a frame boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundaryUpdate {
    pub calibrations_applied: usize,
    pub artifact_version: Option<u64>,
}

struct GateRun {
    elapsed_us: f64,
    degraded: bool,
    alert: bool,
    breach: bool,
}

pub struct VenturiPipeline {
    cfg: GateConfig,
    channels: usize,
    clock: Arc<dyn Clock>,
    states: [GateState; 3],
    constriction: Constriction,
    throat: Throat,
    diffuser: Diffuser,
    calibrator: Calibrator,
    stage1: Vec<f64>,
    stage2: Vec<f64>,
    stage3: Vec<f64>,
    frames: u64,
    artifact_swaps: u64,
    calibration_failures: u64,
}

impl VenturiPipeline {
    pub fn new(
        cfg: GateConfig,
        stability: StabilityConfig,
        channels: usize,
        frame_len: usize,
        clock: Arc<dyn Clock>,
    ) -> VenturiResult<Self> {
        let calibrator = Calibrator::from_config(&stability)?;
        let n = channels * frame_len;
        Ok(Self {
            states: [
                GateState::new(GateId::Constriction, stability.clone()),
                GateState::new(GateId::Throat, stability.clone()),
                GateState::new(GateId::Diffuser, stability),
            ],
            constriction: Constriction::new(cfg.enhancement_gain),
            throat: Throat::new(cfg.fallback_accuracy, cfg.cost_smoothing),
            diffuser: Diffuser::new(channels, cfg.impact_gain, cfg.state_smoothing),
            calibrator,
            stage1: vec![0.0; n],
            stage2: vec![0.0; n],
            stage3: vec![0.0; n],
            cfg,
            channels,
            clock,
            frames: 0,
            artifact_swaps: 0,
            calibration_failures: 0,
        })
    }

    pub fn gate_state(&self, gate: GateId) -> &GateState {
        &self.states[gate.index()]
    }

    pub fn gate_states(&self) -> &[GateState; 3] {
        &self.states
    }

    pub fn throat(&self) -> &Throat {
        &self.throat
    }

    pub fn diffuser(&self) -> &Diffuser {
        &self.diffuser
    }

    pub fn calibrator(&self) -> &Calibrator {
        &self.calibrator
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn artifact_swaps(&self) -> u64 {
        self.artifact_swaps
    }

    /// Total recalibrations applied across all gates.
    pub fn recalibrations(&self) -> u64 {
        self.states.iter().map(|s| s.monitor().recalibrations()).sum()
    }

    pub fn active_artifact_version(&self) -> Option<u64> {
        self.throat.active_version()
    }

    /// Install a backend directly (tests, external accelerators).
    pub fn install_backend(&mut self, backend: Box<dyn InferenceBackend>) {
        self.throat.install(backend);
    }

    /// Apply everything that may only change between frames.
    pub fn frame_boundary(&mut self, handoff: Option<&ArtifactHandoff>) -> BoundaryUpdate {
        let mut update = BoundaryUpdate::default();
        for result in self.calibrator.poll_ready() {
            self.states[result.gate.index()].monitor_mut().apply(&result);
            update.calibrations_applied += 1;
        }
        if let Some(artifact) = handoff.and_then(|h| h.poll_latest()) {
            update.artifact_version = Some(artifact.version);
            self.swap_artifact(artifact);
        }
        update
    }

    pub fn swap_artifact(&mut self, artifact: Arc<CompressedModelArtifact>) {
        let version = artifact.version;
        let summary = artifact.summary();
        let retired = self.throat.install_artifact(artifact);
        self.artifact_swaps += 1;
        match retired {
            Some(old) => log::info!("throat: artifact v{old} retired, now {summary}"),
            None => log::info!("throat: activated {summary}"),
        }
        log::debug!("throat: active version {version}");
    }

    /// Request a recalibration of every gate. Returns how many were queued.
    pub fn recalibrate(&mut self) -> usize {
        let mut queued = 0;
        for state in self.states.iter_mut() {
            if let Some(request) = state.monitor_mut().request_recalibration() {
                match self.calibrator.submit(request) {
                    Ok(()) => queued += 1,
                    Err(e) => {
                        log::warn!("{}: recalibration not queued: {e}", state.gate());
                        state.monitor_mut().cancel_pending();
                        self.calibration_failures += 1;
                    }
                }
            }
        }
        queued
    }

    /// Process one validated frame.
    pub fn process(&mut self, frame: &SampleFrame, setpoints: FlowSetpoints) -> PipelineReport {
        let input = frame.data();
        let n = input.len();
        if self.stage1.len() != n {
            self.stage1.resize(n, 0.0);
            self.stage2.resize(n, 0.0);
            self.stage3.resize(n, 0.0);
        }
        let ch = self.channels;
        let clock = Arc::clone(&self.clock);
        let t_start = clock.now_us();

        // ── Gate 1 ──
        let mut amplified = 0.0;
        let constriction = &self.constriction;
        let g1 = run_gate(
            &mut self.states[0],
            &self.cfg,
            self.cfg.budgets.constriction_us,
            clock.as_ref(),
            input,
            &mut self.stage1,
            |out| {
                amplified = constriction.transform(input, ch, setpoints.gate1_threshold, out)?;
                Ok(amplified)
            },
        );
        self.handle_stability(GateId::Constriction, &g1);

        // ── Gate 2 ──
        let mut throat_outcome: Option<ThroatOutcome> = None;
        let throat = &mut self.throat;
        let budget2 = self.cfg.budgets.throat_us;
        let stage1 = &self.stage1;
        let g2 = run_gate(
            &mut self.states[1],
            &self.cfg,
            budget2,
            clock.as_ref(),
            stage1,
            &mut self.stage2,
            |out| {
                let o = throat.transform(
                    stage1,
                    ch,
                    setpoints.gate2_throughput,
                    budget2,
                    clock.as_ref(),
                    out,
                )?;
                throat_outcome = Some(o);
                Ok(if o.used_fallback {
                    0.0
                } else {
                    setpoints.gate2_throughput
                })
            },
        );
        self.handle_stability(GateId::Throat, &g2);

        let (pattern_energy, noise_removed) = if g2.run.degraded {
            (0.0, 0.0)
        } else {
            let energy = rms(&self.stage2).powi(2);
            let removed = self
                .stage1
                .iter()
                .zip(&self.stage2)
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                / n.max(1) as f64;
            (energy, removed)
        };

        // ── Gate 3 ──
        let pipeline_gain =
            self.states[0].calibrated_coefficient() * self.states[1].calibrated_coefficient();
        let diffuser = &self.diffuser;
        let stage2 = &self.stage2;
        let g3 = run_gate(
            &mut self.states[2],
            &self.cfg,
            self.cfg.budgets.diffuser_us,
            clock.as_ref(),
            stage2,
            &mut self.stage3,
            |out| {
                diffuser.transform(stage2, pipeline_gain, out)?;
                Ok(1.0)
            },
        );
        self.handle_stability(GateId::Diffuser, &g3);
        let impact = if g3.run.degraded {
            0.0
        } else {
            self.diffuser.update_state(&self.stage3, ch)
        };

        let latency_us = clock.now_us().saturating_sub(t_start) as f64;
        self.frames += 1;

        let runs = [&g1.run, &g2.run, &g3.run];
        let degraded_gates = [runs[0].degraded, runs[1].degraded, runs[2].degraded];
        let supervisor_alert = runs.iter().any(|r| r.alert);
        if supervisor_alert {
            log::error!(
                "frame {}: repeated gate degradation, raising supervisor alert",
                frame.seq()
            );
        }
        let accuracy_estimate = match (&throat_outcome, g2.run.degraded) {
            (Some(o), false) => o.accuracy,
            _ => self.cfg.fallback_accuracy,
        };

        PipelineReport {
            seq: frame.seq(),
            latency_us,
            gate_elapsed_us: [runs[0].elapsed_us, runs[1].elapsed_us, runs[2].elapsed_us],
            impact,
            accuracy_estimate,
            degraded: degraded_gates.iter().any(|&d| d),
            degraded_gates,
            supervisor_alert,
            used_fallback: throat_outcome.map_or(true, |o| o.used_fallback),
            amplified_fraction: amplified,
            pattern_energy,
            noise_removed,
            stability_breaches: runs.iter().filter(|r| r.breach).count() as u32,
        }
    }

    fn handle_stability(&mut self, gate: GateId, outcome: &GateOutcome) {
        if let Some(StabilityStatus::CalibrationReady { request }) = &outcome.status {
            if let Err(e) = self.calibrator.submit(request.clone()) {
                log::warn!("{gate}: recalibration not queued: {e}");
                self.states[gate.index()].monitor_mut().cancel_pending();
                self.calibration_failures += 1;
            }
        }
    }

    /// Approximate working-set size in bytes.
    pub fn memory_bytes(&self) -> usize {
        let f = std::mem::size_of::<f64>();
        (self.stage1.capacity() + self.stage2.capacity() + self.stage3.capacity()) * f
            + self.diffuser.state().len() * 2 * f
    }

    /// Stop background calibration work.
    pub fn shutdown(&mut self) {
        self.calibrator.shutdown();
    }
}

struct GateOutcome {
    run: GateRun,
    status: Option<StabilityStatus>,
}

/// Run one gate transform with timing, output checks and bookkeeping.
fn run_gate<F>(
    state: &mut GateState,
    cfg: &GateConfig,
    budget_us: f64,
    clock: &dyn Clock,
    input: &[f64],
    out: &mut [f64],
    compute: F,
) -> GateOutcome
where
    F: FnOnce(&mut [f64]) -> VenturiResult<f64>,
{
    let gate = state.gate();
    let t0 = clock.now_us();
    let result = compute(out);
    let elapsed_us = clock.now_us().saturating_sub(t0) as f64;

    let max_abs = cfg.max_abs_output;
    let failure = match &result {
        Err(e) => Some(VenturiError::GateComputation {
            gate,
            reason: e.to_string(),
        }),
        Ok(_) if out.iter().any(|v| !v.is_finite() || v.abs() > max_abs) => {
            Some(VenturiError::GateComputation {
                gate,
                reason: "non-finite or out-of-range output".to_string(),
            })
        }
        Ok(_) if elapsed_us > budget_us => Some(VenturiError::GateComputation {
            gate,
            reason: format!("soft timeout {elapsed_us:.0}us > {budget_us:.0}us"),
        }),
        Ok(_) => None,
    };

    if let Some(err) = failure {
        log::debug!("{err}; applying last-known-good transform");
        state.apply_last_good(input, out, max_abs);
        let alert = state.record_degraded(cfg.degraded_alert_after);
        return GateOutcome {
            run: GateRun {
                elapsed_us,
                degraded: true,
                alert,
                breach: false,
            },
            status: None,
        };
    }

    let throughput_sample = result.unwrap_or(0.0);
    let in_rms = rms(input);
    let gain = if in_rms > 1e-12 {
        Some(rms(out) / in_rms)
    } else {
        None
    };
    let status = state.record_success(gain, throughput_sample, cfg.state_smoothing, max_abs);
    let breach = matches!(status, StabilityStatus::Breach { .. });
    GateOutcome {
        run: GateRun {
            elapsed_us,
            degraded: false,
            alert: false,
            breach,
        },
        status: Some(status),
    }
}
