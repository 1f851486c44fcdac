// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Types
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Data model, configuration, and error taxonomy for the Venturi
//! Kernel, the real-time adaptive pipeline for multi-channel neural
//! telemetry.
//!
//! Everything here is plain data: frames, trait vectors, performance
//! records, mode weight profiles, and compressed-model artifact
//! descriptors. The only piece of machinery is the artifact handoff
//! channel, which is the single crossing point between the offline
//! compression workers and the online loop.

pub mod artifact;
pub mod cognition;
pub mod config;
pub mod error;
pub mod frame;
pub mod mode;
pub mod score;

pub use artifact::{
    artifact_channel, ArtifactHandoff, ArtifactPublisher, CompressedModelArtifact,
    CompressionLevel, Precision, Technique, ValidationThresholds,
};
pub use cognition::{TraitKind, TraitPhase, TraitState, TraitVector};
pub use config::VenturiConfig;
pub use error::{VenturiError, VenturiResult};
pub use frame::{GateId, RawReading, SampleFrame};
pub use mode::{ModeWeights, OptimizationMode};
pub use score::{clamp_score, BenchmarkTier, PerformanceRecord, TelemetryEvent};
