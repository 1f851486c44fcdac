// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Model Compression
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Offline compression of the Throat gate's denoising model.
//!
//! - `model`: layer chain, reference inference and calibration traces
//! - `techniques`: quantization, structured pruning, BatchNorm fusion and
//!   the portable `VNTR` blob
//! - `chain`: the per-level technique chain plus measurement
//! - `validate`: threshold checks and less-aggressive retry
//! - `service`: worker pool publishing accepted artifacts for hot-swap

pub mod chain;
pub mod model;
pub mod service;
pub mod techniques;
pub mod validate;

pub use chain::{compress, Candidate, CandidateMetrics, LevelProfile};
pub use model::{CalibrationSet, Layer, LayerKind, ModelDescriptor};
pub use service::{CompressionJob, CompressionService, JobOutcome, ServiceStats};
pub use techniques::{export, fuse, import, prune, quantize};
pub use validate::{compress_validated, validate_artifact, validate_candidate, Accepted, Shortfall};
