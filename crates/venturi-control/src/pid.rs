// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — PID Primitive
// ─────────────────────────────────────────────────────────────────────
//! PID controller with anti-windup clamping and an exponentially
//! smoothed derivative term.

use serde::{Deserialize, Serialize};

/// Internal state for a PID controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidState {
    pub setpoint: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// EMA factor for the derivative (1.0 = raw derivative).
    pub derivative_alpha: f64,
    pub integral: f64,
    pub integral_min: f64,
    pub integral_max: f64,
    pub output_min: f64,
    pub output_max: f64,
    pub last_error: f64,
    pub smoothed_derivative: f64,
    /// False until the first step; the derivative has no history before it.
    pub primed: bool,
}

impl PidState {
    pub fn new(setpoint: f64, kp: f64, ki: f64, kd: f64) -> Self {
        Self {
            setpoint,
            kp,
            ki,
            kd,
            derivative_alpha: 0.3,
            integral: 0.0,
            integral_min: -2.0,
            integral_max: 2.0,
            output_min: -1.0,
            output_max: 1.0,
            last_error: 0.0,
            smoothed_derivative: 0.0,
            primed: false,
        }
    }

    pub fn with_integral_limit(mut self, limit: f64) -> Self {
        self.integral_min = -limit.abs();
        self.integral_max = limit.abs();
        self
    }

    pub fn with_output_limit(mut self, limit: f64) -> Self {
        self.output_min = -limit.abs();
        self.output_max = limit.abs();
        self
    }

    pub fn with_derivative_alpha(mut self, alpha: f64) -> Self {
        self.derivative_alpha = alpha.clamp(0.0, 1.0);
        self
    }

    /// Clear integral and derivative memory; gains and limits are kept.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.smoothed_derivative = 0.0;
        self.primed = false;
    }
}

impl Default for PidState {
    fn default() -> Self {
        Self::new(0.0, 0.8, 0.1, 0.05)
    }
}

/// Execute one PID step. Returns the clamped control output.
///
/// Non-finite measurements leave the state untouched and return the
/// proportional-free output of the stored integral.
pub fn pid_step(pid: &mut PidState, measured: f64, dt: f64) -> f64 {
    if !measured.is_finite() || !(dt.is_finite() && dt > 0.0) {
        log::warn!("pid_step: ignoring measurement {measured} (dt={dt})");
        return (pid.ki * pid.integral).clamp(pid.output_min, pid.output_max);
    }
    let error = pid.setpoint - measured;

    pid.integral += error * dt;
    pid.integral = pid.integral.clamp(pid.integral_min, pid.integral_max);

    let raw_derivative = if pid.primed {
        (error - pid.last_error) / dt
    } else {
        0.0
    };
    let a = pid.derivative_alpha;
    pid.smoothed_derivative = a * raw_derivative + (1.0 - a) * pid.smoothed_derivative;

    let output = pid.kp * error + pid.ki * pid.integral + pid.kd * pid.smoothed_derivative;
    let output = output.clamp(pid.output_min, pid.output_max);
    pid.last_error = error;
    pid.primed = true;
    output
}
