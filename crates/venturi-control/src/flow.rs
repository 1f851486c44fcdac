// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Flow Controller
// ─────────────────────────────────────────────────────────────────────
//! Mode-aware PID regulator for the gate pipeline.
//!
//! Error signal: e(t) = target_load(mode) − observed_load(t)
//!
//! Positive output means headroom: the Constriction threshold drops (more
//! components amplified) and Throat throughput rises (more inference taps).
//! Negative output does the opposite. The integral and derivative memory
//! is cleared on every mode switch so error accumulated under one regime
//! never carries into the next.

use serde::{Deserialize, Serialize};
use venturi_types::config::FlowConfig;
use venturi_types::OptimizationMode;

use crate::pid::{pid_step, PidState};

/// Gate setpoints for the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowSetpoints {
    /// Constriction rate-of-change threshold.
    pub gate1_threshold: f64,
    /// Fraction of Throat inference taps to run, in [throughput_min, throughput_max].
    pub gate2_throughput: f64,
}

pub struct FlowController {
    cfg: FlowConfig,
    threshold_min: f64,
    threshold_max: f64,
    pid: PidState,
    mode: OptimizationMode,
    adaptive_focus: f64,
    setpoints: FlowSetpoints,
    last_output: f64,
    steps: u64,
}

impl FlowController {
    /// `threshold_min..=threshold_max` bounds the Constriction threshold;
    /// `initial_threshold` is used until the first step.
    pub fn new(
        cfg: FlowConfig,
        threshold_min: f64,
        threshold_max: f64,
        initial_threshold: f64,
        mode: OptimizationMode,
    ) -> Self {
        let pid = PidState::new(0.0, cfg.kp, cfg.ki, cfg.kd)
            .with_integral_limit(cfg.integral_limit)
            .with_output_limit(cfg.output_limit)
            .with_derivative_alpha(cfg.derivative_alpha);
        let mut ctl = Self {
            setpoints: FlowSetpoints {
                gate1_threshold: initial_threshold.clamp(threshold_min, threshold_max),
                gate2_throughput: cfg.throughput_max,
            },
            cfg,
            threshold_min,
            threshold_max,
            pid,
            mode,
            adaptive_focus: 0.5,
            last_output: 0.0,
            steps: 0,
        };
        ctl.pid.setpoint = ctl.target_load();
        ctl
    }

    pub fn mode(&self) -> OptimizationMode {
        self.mode
    }

    pub fn setpoints(&self) -> FlowSetpoints {
        self.setpoints
    }

    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    pub fn integral(&self) -> f64 {
        self.pid.integral
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Target load fraction for the active mode.
    pub fn target_load(&self) -> f64 {
        let c = &self.cfg;
        match self.mode {
            OptimizationMode::Performance => c.target_performance,
            OptimizationMode::Efficiency => c.target_efficiency,
            OptimizationMode::Balanced => c.target_balanced,
            OptimizationMode::Adaptive => {
                c.target_adaptive_min
                    + (c.target_adaptive_max - c.target_adaptive_min) * self.adaptive_focus
            }
        }
    }

    /// Switch regime. Clears integral and derivative memory.
    pub fn switch_mode(&mut self, mode: OptimizationMode) {
        if mode != self.mode {
            log::debug!("flow: {} -> {}, PID memory reset", self.mode, mode);
        }
        self.mode = mode;
        self.pid.reset();
        self.pid.setpoint = self.target_load();
    }

    /// Update the Adaptive focus weight. Only moves the target; the PID
    /// memory is kept because the regime has not changed.
    pub fn set_adaptive_focus(&mut self, focus: f64) {
        self.adaptive_focus = if focus.is_finite() {
            focus.clamp(0.0, 1.0)
        } else {
            0.5
        };
        self.pid.setpoint = self.target_load();
    }

    /// One control cycle. `observed_load` is the fraction of the aggregate
    /// latency budget consumed by the last frame.
    pub fn step(&mut self, observed_load: f64) -> FlowSetpoints {
        let u = pid_step(&mut self.pid, observed_load, 1.0);
        self.last_output = u;
        self.steps += 1;

        // u normalised to [0, 1]: 0 = throttle fully, 1 = full headroom
        let open = (0.5 + 0.5 * u / self.cfg.output_limit).clamp(0.0, 1.0);

        let tp = self.cfg.throughput_min + (self.cfg.throughput_max - self.cfg.throughput_min) * open;

        // threshold interpolated in log space, high when throttled
        let (lo, hi) = (self.threshold_min.ln(), self.threshold_max.ln());
        let threshold = (hi + (lo - hi) * open).exp();

        self.setpoints = FlowSetpoints {
            gate1_threshold: threshold.clamp(self.threshold_min, self.threshold_max),
            gate2_throughput: tp.clamp(self.cfg.throughput_min, self.cfg.throughput_max),
        };
        self.setpoints
    }

    /// Clear controller memory without changing the mode.
    pub fn reset(&mut self) {
        self.pid.reset();
        self.last_output = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(mode: OptimizationMode) -> FlowController {
        FlowController::new(FlowConfig::default(), 0.001, 1.0, 0.05, mode)
    }

    #[test]
    fn test_target_load_per_mode() {
        assert!((controller(OptimizationMode::Performance).target_load() - 0.75).abs() < 1e-12);
        assert!((controller(OptimizationMode::Efficiency).target_load() - 0.40).abs() < 1e-12);
        assert!((controller(OptimizationMode::Balanced).target_load() - 0.60).abs() < 1e-12);
    }

    #[test]
    fn test_adaptive_target_interpolates() {
        let mut ctl = controller(OptimizationMode::Adaptive);
        ctl.set_adaptive_focus(0.0);
        assert!((ctl.target_load() - 0.40).abs() < 1e-12);
        ctl.set_adaptive_focus(1.0);
        assert!((ctl.target_load() - 0.75).abs() < 1e-12);
        ctl.set_adaptive_focus(f64::NAN);
        assert!((ctl.target_load() - 0.575).abs() < 1e-12);
    }

    #[test]
    fn test_headroom_opens_gates() {
        let mut ctl = controller(OptimizationMode::Balanced);
        let low = ctl.step(0.1);
        let mut ctl = controller(OptimizationMode::Balanced);
        let high = ctl.step(1.2);
        assert!(low.gate2_throughput > high.gate2_throughput);
        assert!(low.gate1_threshold < high.gate1_threshold);
    }

    #[test]
    fn test_setpoints_stay_in_bounds() {
        let mut ctl = controller(OptimizationMode::Performance);
        for load in [0.0, 10.0, -5.0, f64::NAN, 0.5, 1e9] {
            let sp = ctl.step(load);
            assert!((0.25..=1.0).contains(&sp.gate2_throughput), "{sp:?}");
            assert!((0.001..=1.0).contains(&sp.gate1_threshold), "{sp:?}");
        }
    }

    #[test]
    fn test_mode_switch_resets_integral() {
        let mut ctl = controller(OptimizationMode::Balanced);
        for _ in 0..20 {
            ctl.step(0.1);
        }
        assert!(ctl.integral() > 0.0);
        ctl.switch_mode(OptimizationMode::Efficiency);
        assert_eq!(ctl.integral(), 0.0);
        assert!((ctl.target_load() - 0.40).abs() < 1e-12);
    }

    #[test]
    fn test_converges_on_linear_plant() {
        // load responds linearly to throughput: load = 0.8 * throughput
        let mut ctl = controller(OptimizationMode::Balanced);
        let mut load = 0.8;
        for _ in 0..300 {
            let sp = ctl.step(load);
            load = 0.8 * sp.gate2_throughput;
        }
        assert!((load - 0.60).abs() < 0.01, "load settled at {load}");
    }
}
