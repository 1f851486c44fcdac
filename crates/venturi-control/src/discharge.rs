// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Discharge-Coefficient Stability
// ─────────────────────────────────────────────────────────────────────
//! Per-gate discharge-coefficient monitoring and recalibration.
//!
//! The discharge coefficient of a gate is RMS(out)/RMS(in) for one frame.
//! The monitor smooths it, compares it against the calibrated value and
//! counts consecutive out-of-tolerance frames. After `breach_cycles` such
//! frames it fires exactly one breach, collects a fresh calibration window
//! from the frames that follow and then hands back one recalibration
//! request. No further breach fires until the fresh coefficient has been
//! applied.
//!
//! Fresh coefficients are computed by a `Calibrator`, either on a
//! background worker (results collected at the next frame boundary) or
//! inline at the next boundary for deterministic replays.

use std::collections::VecDeque;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use venturi_types::config::StabilityConfig;
use venturi_types::{GateId, VenturiError, VenturiResult};

/// Samples shipped to the calibrator after a breach.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalibrationRequest {
    pub gate: GateId,
    pub samples: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub gate: GateId,
    pub coefficient: f64,
}

/// Outcome of feeding one raw coefficient to a monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum StabilityStatus {
    /// Sample unusable (silent input or non-finite); state unchanged.
    Ignored,
    /// Collecting the initial calibration window.
    Warmup { collected: usize },
    /// Initial calibration just completed.
    Calibrated { coefficient: f64 },
    Within { drift: f64 },
    Drifting { drift: f64, consecutive: u32 },
    /// Fired once per episode. Collection of a fresh window starts.
    Breach { drift: f64 },
    /// Fresh window complete; hand the request to a `Calibrator`.
    CalibrationReady { request: RecalibrationRequest },
    /// Collecting the fresh window, or a recalibration is in flight.
    AwaitingRecalibration { drift: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Monitoring,
    Collecting,
    Awaiting,
}

/// Mean of the usable samples in a calibration window.
pub fn mean_coefficient(samples: &[f64]) -> VenturiResult<f64> {
    let mut sum = 0.0;
    let mut n = 0usize;
    for &s in samples {
        if s.is_finite() && s > 0.0 {
            sum += s;
            n += 1;
        }
    }
    if n == 0 {
        return Err(VenturiError::Numerical(format!(
            "calibration window has no usable samples ({} total)",
            samples.len()
        )));
    }
    Ok(sum / n as f64)
}

#[derive(Debug, Clone)]
pub struct DischargeMonitor {
    gate: GateId,
    cfg: StabilityConfig,
    window: VecDeque<f64>,
    smoothed: f64,
    calibrated: Option<f64>,
    integral_error: f64,
    consecutive: u32,
    phase: Phase,
    breaches: u64,
    recalibrations: u64,
}

impl DischargeMonitor {
    pub fn new(gate: GateId, cfg: StabilityConfig) -> Self {
        Self {
            gate,
            window: VecDeque::with_capacity(cfg.calibration_window),
            cfg,
            smoothed: 1.0,
            calibrated: None,
            integral_error: 0.0,
            consecutive: 0,
            phase: Phase::Monitoring,
            breaches: 0,
            recalibrations: 0,
        }
    }

    pub fn gate(&self) -> GateId {
        self.gate
    }

    /// Smoothed coefficient estimate.
    pub fn coefficient(&self) -> f64 {
        self.smoothed
    }

    /// Calibrated reference, `None` during warm-up.
    pub fn calibrated(&self) -> Option<f64> {
        self.calibrated
    }

    pub fn integral_error(&self) -> f64 {
        self.integral_error
    }

    /// Relative drift of the smoothed estimate from calibration.
    pub fn drift(&self) -> f64 {
        match self.calibrated {
            Some(c) if c > 0.0 => (self.smoothed / c - 1.0).abs(),
            _ => 0.0,
        }
    }

    /// True from a breach (or explicit request) until `apply`.
    pub fn is_pending(&self) -> bool {
        self.phase != Phase::Monitoring
    }

    pub fn breaches(&self) -> u64 {
        self.breaches
    }

    pub fn recalibrations(&self) -> u64 {
        self.recalibrations
    }

    pub fn observe(&mut self, raw: f64) -> StabilityStatus {
        if !(raw.is_finite() && raw > 0.0) {
            return StabilityStatus::Ignored;
        }
        if self.window.len() == self.cfg.calibration_window {
            self.window.pop_front();
        }
        self.window.push_back(raw);

        let calibrated = match self.calibrated {
            Some(c) => c,
            None => {
                if self.window.len() < self.cfg.calibration_window {
                    return StabilityStatus::Warmup {
                        collected: self.window.len(),
                    };
                }
                let samples: Vec<f64> = self.window.iter().copied().collect();
                return match mean_coefficient(&samples) {
                    Ok(c) => {
                        self.calibrated = Some(c);
                        self.smoothed = c;
                        log::debug!("{}: initial discharge coefficient {c:.6}", self.gate);
                        StabilityStatus::Calibrated { coefficient: c }
                    }
                    Err(_) => StabilityStatus::Warmup {
                        collected: self.window.len(),
                    },
                };
            }
        };

        let beta = self.cfg.coefficient_smoothing;
        self.smoothed = (1.0 - beta) * self.smoothed + beta * raw;
        let rel = self.smoothed / calibrated - 1.0;
        let drift = rel.abs();
        let limit = self.cfg.integral_limit;
        self.integral_error = (self.integral_error + rel).clamp(-limit, limit);

        match self.phase {
            Phase::Monitoring => {}
            Phase::Collecting if self.window.len() >= self.cfg.calibration_window => {
                self.phase = Phase::Awaiting;
                return StabilityStatus::CalibrationReady {
                    request: self.request(),
                };
            }
            Phase::Collecting | Phase::Awaiting => {
                return StabilityStatus::AwaitingRecalibration { drift };
            }
        }

        let saturated = self.integral_error.abs() >= limit;
        if drift > self.cfg.tolerance || saturated {
            self.consecutive += 1;
            if self.consecutive >= self.cfg.breach_cycles {
                self.phase = Phase::Collecting;
                self.window.clear();
                self.breaches += 1;
                log::warn!(
                    "{}: stability breach, drift {:.4}% over {} frames",
                    self.gate,
                    drift * 100.0,
                    self.consecutive
                );
                return StabilityStatus::Breach { drift };
            }
            StabilityStatus::Drifting {
                drift,
                consecutive: self.consecutive,
            }
        } else {
            self.consecutive = 0;
            StabilityStatus::Within { drift }
        }
    }

    fn request(&self) -> RecalibrationRequest {
        RecalibrationRequest {
            gate: self.gate,
            samples: self.window.iter().copied().collect(),
        }
    }

    /// Explicit recalibration from the current window. `None` while one
    /// is already in flight or before any sample has been seen.
    pub fn request_recalibration(&mut self) -> Option<RecalibrationRequest> {
        if self.is_pending() || self.window.is_empty() {
            return None;
        }
        self.phase = Phase::Awaiting;
        Some(self.request())
    }

    /// Abandon an in-flight recalibration (e.g. the calibrator refused
    /// the request). Monitoring resumes against the old reference.
    pub fn cancel_pending(&mut self) {
        self.phase = Phase::Monitoring;
        self.consecutive = 0;
    }

    /// Swap in a fresh coefficient. Resets the drift integral and counters.
    pub fn apply(&mut self, result: &CalibrationResult) {
        if !(result.coefficient.is_finite() && result.coefficient > 0.0) {
            log::warn!(
                "{}: discarding unusable calibration {}",
                self.gate,
                result.coefficient
            );
            self.phase = Phase::Monitoring;
            return;
        }
        self.calibrated = Some(result.coefficient);
        self.smoothed = result.coefficient;
        self.integral_error = 0.0;
        self.consecutive = 0;
        self.phase = Phase::Monitoring;
        self.recalibrations += 1;
        log::info!(
            "{}: recalibrated discharge coefficient {:.6}",
            self.gate,
            result.coefficient
        );
    }
}

enum Executor {
    Inline {
        ready: Vec<CalibrationResult>,
    },
    Background {
        tx: Option<Sender<RecalibrationRequest>>,
        rx: Receiver<CalibrationResult>,
        handle: Option<JoinHandle<()>>,
    },
}

/// Computes fresh coefficients off the gate path.
pub struct Calibrator {
    exec: Executor,
    submitted: u64,
    completed: u64,
}

impl Calibrator {
    /// Requests are computed at the next `poll_ready`.
    pub fn inline() -> Self {
        Self {
            exec: Executor::Inline { ready: Vec::new() },
            submitted: 0,
            completed: 0,
        }
    }

    /// Spawn the calibration worker with a bounded request queue.
    pub fn background(capacity: usize) -> VenturiResult<Self> {
        let (req_tx, req_rx) = bounded::<RecalibrationRequest>(capacity.max(1));
        let (res_tx, res_rx) = unbounded::<CalibrationResult>();
        let handle = std::thread::Builder::new()
            .name("venturi-calibration".into())
            .spawn(move || {
                for req in req_rx.iter() {
                    match mean_coefficient(&req.samples) {
                        Ok(coefficient) => {
                            let result = CalibrationResult {
                                gate: req.gate,
                                coefficient,
                            };
                            if res_tx.send(result).is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("{}: calibration failed: {e}", req.gate),
                    }
                }
            })
            .map_err(|e| VenturiError::Channel(format!("spawn calibration worker: {e}")))?;
        Ok(Self {
            exec: Executor::Background {
                tx: Some(req_tx),
                rx: res_rx,
                handle: Some(handle),
            },
            submitted: 0,
            completed: 0,
        })
    }

    pub fn from_config(cfg: &StabilityConfig) -> VenturiResult<Self> {
        if cfg.background {
            Self::background(GateId::ALL.len() * 2)
        } else {
            Ok(Self::inline())
        }
    }

    pub fn is_background(&self) -> bool {
        matches!(self.exec, Executor::Background { .. })
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Never blocks. A full queue or stopped worker is reported as `Channel`.
    pub fn submit(&mut self, request: RecalibrationRequest) -> VenturiResult<()> {
        match &mut self.exec {
            Executor::Inline { ready } => {
                let coefficient = mean_coefficient(&request.samples)?;
                ready.push(CalibrationResult {
                    gate: request.gate,
                    coefficient,
                });
            }
            Executor::Background { tx, .. } => {
                let tx = tx
                    .as_ref()
                    .ok_or_else(|| VenturiError::Shutdown("calibration worker stopped".into()))?;
                tx.try_send(request).map_err(|e| match e {
                    TrySendError::Full(r) => {
                        VenturiError::Channel(format!("calibration queue full ({})", r.gate))
                    }
                    TrySendError::Disconnected(r) => {
                        VenturiError::Channel(format!("calibration worker gone ({})", r.gate))
                    }
                })?;
            }
        }
        self.submitted += 1;
        Ok(())
    }

    /// Results available now. Called at frame boundaries.
    pub fn poll_ready(&mut self) -> Vec<CalibrationResult> {
        let out: Vec<CalibrationResult> = match &mut self.exec {
            Executor::Inline { ready } => std::mem::take(ready),
            Executor::Background { rx, .. } => rx.try_iter().collect(),
        };
        self.completed += out.len() as u64;
        out
    }

    /// Wait up to `timeout` for one result. Off the hot path only.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<CalibrationResult> {
        let got = match &mut self.exec {
            Executor::Inline { ready } => {
                if ready.is_empty() {
                    None
                } else {
                    Some(ready.remove(0))
                }
            }
            Executor::Background { rx, .. } => match rx.recv_timeout(timeout) {
                Ok(r) => Some(r),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
        };
        if got.is_some() {
            self.completed += 1;
        }
        got
    }

    /// Stop the worker and join it. Idempotent.
    pub fn shutdown(&mut self) {
        if let Executor::Background { tx, handle, .. } = &mut self.exec {
            tx.take();
            if let Some(h) = handle.take() {
                if h.join().is_err() {
                    log::error!("calibration worker panicked");
                }
            }
        }
    }
}

impl Drop for Calibrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> StabilityConfig {
        StabilityConfig {
            calibration_window: 4,
            background: false,
            ..StabilityConfig::default()
        }
    }

    fn calibrated_monitor() -> DischargeMonitor {
        let mut m = DischargeMonitor::new(GateId::Throat, cfg());
        for _ in 0..4 {
            m.observe(1.0);
        }
        assert_eq!(m.calibrated(), Some(1.0));
        m
    }

    #[test]
    fn test_mean_coefficient_skips_unusable() {
        let c = mean_coefficient(&[1.0, f64::NAN, 3.0, 0.0]).unwrap();
        assert!((c - 2.0).abs() < 1e-12);
        assert!(mean_coefficient(&[f64::NAN, -1.0]).is_err());
    }

    #[test]
    fn test_warmup_then_calibrated() {
        let mut m = DischargeMonitor::new(GateId::Constriction, cfg());
        assert_eq!(m.observe(1.0), StabilityStatus::Warmup { collected: 1 });
        m.observe(1.0);
        m.observe(1.0);
        assert_eq!(
            m.observe(1.0),
            StabilityStatus::Calibrated { coefficient: 1.0 }
        );
    }

    #[test]
    fn test_ignored_samples_leave_state() {
        let mut m = calibrated_monitor();
        assert_eq!(m.observe(f64::NAN), StabilityStatus::Ignored);
        assert_eq!(m.observe(0.0), StabilityStatus::Ignored);
        assert_eq!(m.coefficient(), 1.0);
    }

    #[test]
    fn test_stable_input_within_tolerance() {
        let mut m = calibrated_monitor();
        for _ in 0..50 {
            match m.observe(1.0) {
                StabilityStatus::Within { drift } => assert!(drift < 1e-12),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_sustained_drift_fires_exactly_one_breach() {
        let mut m = calibrated_monitor();
        let mut breaches = 0;
        let mut requests = Vec::new();
        for _ in 0..40 {
            match m.observe(1.05) {
                StabilityStatus::Breach { .. } => breaches += 1,
                StabilityStatus::CalibrationReady { request } => requests.push(request),
                _ => {}
            }
        }
        assert_eq!(breaches, 1);
        assert_eq!(requests.len(), 1);
        assert_eq!(m.breaches(), 1);
        assert!(m.is_pending());
        // the fresh window only holds post-breach samples
        assert!(requests[0].samples.iter().all(|&s| (s - 1.05).abs() < 1e-12));

        let mut cal = Calibrator::inline();
        cal.submit(requests.remove(0)).unwrap();
        for r in cal.poll_ready() {
            m.apply(&r);
        }
        assert!(!m.is_pending());
        assert_eq!(m.integral_error(), 0.0);
        for _ in 0..20 {
            let status = m.observe(1.05);
            assert!(
                matches!(status, StabilityStatus::Within { .. }),
                "expected back within tolerance, got {status:?}"
            );
        }
        assert!(m.drift() <= 0.001);
    }

    #[test]
    fn test_drift_counts_consecutive_frames() {
        let mut m = calibrated_monitor();
        assert!(matches!(
            m.observe(1.05),
            StabilityStatus::Drifting { consecutive: 1, .. }
        ));
        assert!(matches!(
            m.observe(1.05),
            StabilityStatus::Drifting { consecutive: 2, .. }
        ));
        assert!(matches!(m.observe(1.05), StabilityStatus::Breach { .. }));
    }

    #[test]
    fn test_slow_drift_saturates_integral() {
        let mut c = cfg();
        c.integral_limit = 0.005;
        let mut m = DischargeMonitor::new(GateId::Diffuser, c);
        for _ in 0..4 {
            m.observe(1.0);
        }
        let mut fired = false;
        for _ in 0..200 {
            // 0.05 % bias, inside tolerance
            if let StabilityStatus::Breach { .. } = m.observe(1.0005) {
                fired = true;
                break;
            }
        }
        assert!(fired, "integral never saturated: {}", m.integral_error());
    }

    #[test]
    fn test_request_recalibration_once() {
        let mut m = calibrated_monitor();
        assert!(m.request_recalibration().is_some());
        assert!(m.request_recalibration().is_none());
    }

    #[test]
    fn test_apply_rejects_non_finite() {
        let mut m = calibrated_monitor();
        m.request_recalibration();
        m.apply(&CalibrationResult {
            gate: GateId::Throat,
            coefficient: f64::NAN,
        });
        assert_eq!(m.calibrated(), Some(1.0));
        assert!(!m.is_pending());
    }

    #[test]
    fn test_background_worker_computes_mean() {
        let mut cal = Calibrator::background(4).unwrap();
        assert!(cal.is_background());
        cal.submit(RecalibrationRequest {
            gate: GateId::Throat,
            samples: vec![0.9, 1.1],
        })
        .unwrap();
        let r = cal.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(r.gate, GateId::Throat);
        assert!((r.coefficient - 1.0).abs() < 1e-12);
        cal.shutdown();
        assert!(cal.submit(RecalibrationRequest {
            gate: GateId::Throat,
            samples: vec![1.0],
        })
        .is_err());
    }

    #[test]
    fn test_inline_defers_to_poll() {
        let mut cal = Calibrator::inline();
        cal.submit(RecalibrationRequest {
            gate: GateId::Constriction,
            samples: vec![2.0, 4.0],
        })
        .unwrap();
        assert_eq!(cal.submitted(), 1);
        let ready = cal.poll_ready();
        assert_eq!(ready.len(), 1);
        assert!((ready[0].coefficient - 3.0).abs() < 1e-12);
        assert!(cal.poll_ready().is_empty());
        assert_eq!(cal.completed(), 1);
    }
}
