// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Core Engine
// (C) 1998-2026 Miroslav Sotek. All rights reserved.
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
#![deny(unsafe_code)]
//! Real-time adaptive processing of multi-channel neural telemetry.
//!
//! Each frame flows Ingest → Venturi gates → Flow Controller → Trait
//! Evolution → Scorer → Mode Selector inside one explicit control loop
//! (`VenturiEngine`). Compressed inference artifacts arrive from the
//! offline compression service through a non-blocking handoff and are
//! swapped in at frame boundaries.
//!
//! # Hot-path invariants
//!
//! 1. **Nothing blocks**: gate inference is skipped in favour of the
//!    classical fallback whenever its predicted cost exceeds the Throat
//!    budget; recalibration and compression results arrive by message
//!    passing and are only collected at frame boundaries.
//!
//! 2. **Bad input degrades, never halts**: non-finite frames are rejected
//!    and counted; numeric failures inside a gate fall back to the gate's
//!    last-known-good gain. Repeated failures escalate to a supervisory
//!    alert that forces Efficiency mode.
//!
//! 3. **One configuration per frame**: mode switches, recalibrations and
//!    artifact swaps are applied between frames only.
//!
//! 4. **Bounded state**: traits stay in [0, 1] with capped velocity; the
//!    performance window, frame queue, reorder window and diagnostic ring
//!    all have fixed capacity.

pub mod clock;
pub mod engine;
pub mod evolution;
pub mod gates;
pub mod inference;
pub mod ingest;
pub mod optimizer;
pub mod pipeline;
pub mod scorer;
pub mod telemetry;
pub mod window;

pub use clock::{Clock, MonotonicClock, StepClock};
pub use engine::{EngineStats, ShutdownReport, ShutdownSignal, VenturiEngine};
pub use evolution::TraitEvolution;
pub use inference::{ArtifactBackend, ClassicalFallback, ExternalBackend, InferenceBackend};
pub use ingest::{DiagnosticRing, FrameAssembler, FrameQueue, Resequencer};
pub use optimizer::{
    BoundedPerturbation, Explorer, HillClimber, ModeDecision, ModeSelector, NoExploration, Trend,
};
pub use pipeline::{PipelineReport, VenturiPipeline};
pub use scorer::{PerformanceScorer, ScoreBreakdown};
pub use telemetry::{LogSink, MemorySink, NullSink, TelemetrySink};
pub use window::PerformanceWindow;
