// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Error Taxonomy
// ─────────────────────────────────────────────────────────────────────

use thiserror::Error;

use crate::frame::GateId;
use crate::mode::OptimizationMode;

/// Root error type for all Venturi Kernel failures.
///
/// The first six variants are the hot-path taxonomy. None of them halts
/// frame processing: each is handled where it is raised and only
/// counted, logged, or escalated as a supervisory alert.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VenturiError {
    /// Malformed or non-finite input frame. Dropped and counted.
    #[error("invalid frame {seq}: {reason}")]
    FrameInvalid { seq: u64, reason: String },

    /// Numeric failure inside a gate. The frame is degraded to the
    /// gate's last-known-good transform.
    #[error("gate {gate} computation error: {reason}")]
    GateComputation { gate: GateId, reason: String },

    /// Discharge-coefficient drift beyond tolerance.
    #[error("stability breach on gate {gate}: drift {drift:.6}")]
    StabilityBreach { gate: GateId, drift: f64 },

    /// Candidate artifact missed its validation thresholds.
    #[error("artifact v{version} failed validation: {reason}")]
    ArtifactValidation { version: u64, reason: String },

    /// Mode switch suppressed by the thrash guard.
    #[error("mode switch to {attempted} suppressed after {switches} recent switches")]
    ModeThrashGuard {
        attempted: OptimizationMode,
        switches: usize,
    },

    /// Out-of-order or duplicate frame.
    #[error("sequence violation: expected {expected}, got {got}")]
    SequenceViolation { expected: u64, got: u64 },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Numerical error (NaN/Inf outside a gate).
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Background channel disconnected or full.
    #[error("channel error: {0}")]
    Channel(String),

    /// Operation refused because the engine or service is shutting down.
    #[error("shutdown: {0}")]
    Shutdown(String),
}

pub type VenturiResult<T> = Result<T, VenturiError>;

impl VenturiError {
    /// Short stable label, used as a metric/telemetry key.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FrameInvalid { .. } => "frame_invalid",
            Self::GateComputation { .. } => "gate_computation",
            Self::StabilityBreach { .. } => "stability_breach",
            Self::ArtifactValidation { .. } => "artifact_validation",
            Self::ModeThrashGuard { .. } => "mode_thrash_guard",
            Self::SequenceViolation { .. } => "sequence_violation",
            Self::Config(_) => "config",
            Self::Numerical(_) => "numerical",
            Self::Channel(_) => "channel",
            Self::Shutdown(_) => "shutdown",
        }
    }
}
