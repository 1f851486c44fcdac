// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Flow Control & Stability
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Closed-loop regulation for the Venturi gate pipeline.
//!
//! - `pid`: PID primitive with anti-windup and a smoothed derivative
//! - `flow`: mode-aware flow controller producing gate setpoints
//! - `discharge`: per-gate discharge-coefficient drift monitor and the
//!   calibration executor (inline or background worker)

pub mod discharge;
pub mod flow;
pub mod pid;

pub use discharge::{
    mean_coefficient, CalibrationResult, Calibrator, DischargeMonitor, RecalibrationRequest,
    StabilityStatus,
};
pub use flow::{FlowController, FlowSetpoints};
pub use pid::{pid_step, PidState};
