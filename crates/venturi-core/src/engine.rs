// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Engine Control Loop
// ─────────────────────────────────────────────────────────────────────
//! The single owner of every online component.
//!
//! Per frame, in order:
//!
//! 1. frame boundary: newest artifact, finished recalibrations, pending
//!    mode switch and Adaptive focus are applied
//! 2. Venturi gates
//! 3. flow controller update from the measured load
//! 4. trait evolution from the Diffuser impact
//! 5. exploration probe bookkeeping
//! 6. composite score and tier
//! 7. `PerformanceRecord` into the rolling window
//! 8. mode selection (applied at the next boundary)
//! 9. frame archived in the diagnostic ring
//!
//! Only step 1 may change configuration, so each frame runs under exactly
//! one mode, one artifact and one set of calibration coefficients.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use venturi_control::{FlowController, FlowSetpoints};
use venturi_types::{
    ArtifactHandoff, OptimizationMode, PerformanceRecord, RawReading, SampleFrame,
    TelemetryEvent, TraitVector, VenturiConfig, VenturiError, VenturiResult,
};

use crate::clock::Clock;
use crate::evolution::TraitEvolution;
use crate::inference::InferenceBackend;
use crate::ingest::{validate_frame, DiagnosticRing, FrameAssembler, FrameQueue, Resequencer};
use crate::optimizer::{Explorer, HillClimber, ModeDecision, ModeSelector};
use crate::pipeline::{PipelineReport, VenturiPipeline};
use crate::scorer::PerformanceScorer;
use crate::telemetry::TelemetrySink;
use crate::window::PerformanceWindow;

/// Cooperative stop flag shared between the engine loop and its owner.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Outcome of a graceful shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Queued frames processed during the grace period.
    pub drained: usize,
    /// Queued frames left unprocessed when the grace period ran out.
    pub abandoned: usize,
}

/// Session counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub frames_processed: u64,
    pub frames_invalid: u64,
    pub frames_dropped: u64,
    pub sequence_violations: u64,
    pub ids_skipped: u64,
    pub degraded_frames: u64,
    pub supervisor_alerts: u64,
    pub fallback_frames: u64,
    pub stability_breaches: u64,
    pub recalibrations: u64,
    pub artifact_swaps: u64,
    pub mode_switches: u64,
    pub forced_switches: u64,
    pub suppressed_switches: u64,
    pub exploration_kept: u64,
    pub exploration_reverted: u64,
}

pub struct VenturiEngine {
    cfg: VenturiConfig,
    assembler: FrameAssembler,
    resequencer: Resequencer,
    queue: FrameQueue,
    ring: DiagnosticRing,
    pipeline: VenturiPipeline,
    flow: FlowController,
    evolution: TraitEvolution,
    selector: ModeSelector,
    climber: HillClimber,
    scorer: PerformanceScorer,
    window: PerformanceWindow,
    handoff: Option<ArtifactHandoff>,
    pending_mode: Option<OptimizationMode>,
    last_report: Option<PipelineReport>,
    frames_processed: u64,
    external_invalid: u64,
    degraded_frames: u64,
    supervisor_alerts: u64,
    fallback_frames: u64,
    stability_breaches: u64,
    stopped: bool,
}

impl VenturiEngine {
    /// Validate `config` and build every component.
    pub fn new(
        config: VenturiConfig,
        clock: Arc<dyn Clock>,
        explorer: Box<dyn Explorer>,
    ) -> VenturiResult<Self> {
        config.validate()?;
        let ingest = &config.ingest;
        let gates = &config.gates;
        let pipeline = VenturiPipeline::new(
            gates.clone(),
            config.stability.clone(),
            ingest.channels,
            ingest.frame_len,
            clock,
        )?;
        let flow = FlowController::new(
            config.flow.clone(),
            gates.threshold_min,
            gates.threshold_max,
            gates.initial_threshold,
            config.modes.initial,
        );
        let engine = Self {
            assembler: FrameAssembler::from_config(ingest),
            resequencer: Resequencer::new(ingest.reorder_window),
            queue: FrameQueue::new(ingest.queue_capacity),
            ring: DiagnosticRing::new(ingest.diagnostic_ring),
            pipeline,
            flow,
            evolution: TraitEvolution::from_config(config.traits.clone(), &config.environment),
            selector: ModeSelector::new(config.modes.clone()),
            climber: HillClimber::new(&config.exploration, explorer),
            scorer: PerformanceScorer::new(config.scoring, config.benchmark),
            window: PerformanceWindow::new(config.window.performance_window),
            handoff: None,
            pending_mode: None,
            last_report: None,
            frames_processed: 0,
            external_invalid: 0,
            degraded_frames: 0,
            supervisor_alerts: 0,
            fallback_frames: 0,
            stability_breaches: 0,
            stopped: false,
            cfg: config,
        };
        log::info!(
            "venturi engine ready: {} ch x {} samples, mode {}, environment {}",
            engine.cfg.ingest.channels,
            engine.cfg.ingest.frame_len,
            engine.selector.current(),
            engine.cfg.environment.active,
        );
        Ok(engine)
    }

    /// Attach the consumer end of the compression service's artifact channel.
    pub fn with_artifact_handoff(mut self, handoff: ArtifactHandoff) -> Self {
        self.handoff = Some(handoff);
        self
    }

    /// Install a Throat backend directly, bypassing the compression handoff.
    pub fn install_backend(&mut self, backend: Box<dyn InferenceBackend>) {
        self.pipeline.install_backend(backend);
    }

    pub fn config(&self) -> &VenturiConfig {
        &self.cfg
    }

    pub fn mode(&self) -> OptimizationMode {
        self.selector.current()
    }

    /// Mode the flow controller is regulating for. Lags `mode()` by one
    /// frame after a switch.
    pub fn flow_mode(&self) -> OptimizationMode {
        self.flow.mode()
    }

    pub fn setpoints(&self) -> FlowSetpoints {
        self.flow.setpoints()
    }

    pub fn traits(&self) -> TraitVector {
        self.evolution.snapshot()
    }

    pub fn pipeline(&self) -> &VenturiPipeline {
        &self.pipeline
    }

    pub fn window(&self) -> &PerformanceWindow {
        &self.window
    }

    pub fn diagnostics(&self) -> &DiagnosticRing {
        &self.ring
    }

    pub fn last_report(&self) -> Option<&PipelineReport> {
        self.last_report.as_ref()
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            frames_processed: self.frames_processed,
            frames_invalid: self.assembler.invalid_frames() + self.external_invalid,
            frames_dropped: self.queue.dropped_frames(),
            sequence_violations: self.resequencer.violations(),
            ids_skipped: self.resequencer.skipped(),
            degraded_frames: self.degraded_frames,
            supervisor_alerts: self.supervisor_alerts,
            fallback_frames: self.fallback_frames,
            stability_breaches: self.stability_breaches,
            recalibrations: self.pipeline.recalibrations(),
            artifact_swaps: self.pipeline.artifact_swaps(),
            mode_switches: self.selector.switches(),
            forced_switches: self.selector.forced_switches(),
            suppressed_switches: self.selector.suppressed(),
            exploration_kept: self.climber.kept(),
            exploration_reverted: self.climber.reverted(),
        }
    }

    /// Working-set estimate fed to the memory benchmark sub-score.
    pub fn memory_bytes(&self) -> u64 {
        (self.pipeline.memory_bytes() + self.window.size_bytes() + self.ring.size_bytes()) as u64
    }

    fn ensure_running(&self) -> VenturiResult<()> {
        if self.stopped {
            return Err(VenturiError::Shutdown("engine stopped".into()));
        }
        Ok(())
    }

    fn enqueue(&mut self, frame: SampleFrame) {
        // the queue logs the eviction and counts it
        let _ = self.queue.push(frame);
    }

    // ── Ingest ──────────────────────────────────────────────────────

    /// Feed one reading. A completed frame is queued, not processed.
    pub fn ingest_reading(&mut self, reading: RawReading) -> VenturiResult<()> {
        self.ensure_running()?;
        if let Some(frame) = self.assembler.push(reading)? {
            self.enqueue(frame);
        }
        Ok(())
    }

    /// Feed a frame carrying its own sequence id. Frames are released to
    /// the queue strictly in id order.
    pub fn ingest_frame(&mut self, frame: SampleFrame) -> VenturiResult<()> {
        self.ensure_running()?;
        if let Err(e) = validate_frame(&frame, self.cfg.ingest.channels) {
            self.external_invalid += 1;
            log::warn!("{e}");
            self.resequencer.mark_consumed(frame.seq());
            self.release_ready();
            return Err(e);
        }
        self.resequencer.push(frame)?;
        self.release_ready();
        Ok(())
    }

    fn release_ready(&mut self) {
        while let Some(frame) = self.resequencer.pop_ready() {
            self.enqueue(frame);
        }
    }

    /// Process the oldest queued frame, if any.
    pub fn step(&mut self) -> Option<PerformanceRecord> {
        let frame = self.queue.pop()?;
        Some(self.process_one(frame))
    }

    fn drain(&mut self) -> Vec<PerformanceRecord> {
        let mut records = Vec::with_capacity(self.queue.len());
        while let Some(record) = self.step() {
            records.push(record);
        }
        records
    }

    /// Ingest one reading and process every frame that became ready.
    pub fn process_reading(&mut self, reading: RawReading) -> VenturiResult<Vec<PerformanceRecord>> {
        self.ingest_reading(reading)?;
        Ok(self.drain())
    }

    /// Ingest one sequenced frame and process every frame that became ready.
    pub fn process_frame(&mut self, frame: SampleFrame) -> VenturiResult<Vec<PerformanceRecord>> {
        self.ingest_frame(frame)?;
        Ok(self.drain())
    }

    // ── Control loop ────────────────────────────────────────────────

    fn frame_boundary(&mut self) {
        let update = self.pipeline.frame_boundary(self.handoff.as_ref());
        if update.calibrations_applied > 0 {
            log::info!(
                "applied {} recalibrated discharge coefficient(s)",
                update.calibrations_applied
            );
        }
        self.flow.set_adaptive_focus(
            self.selector
                .weights_for(OptimizationMode::Adaptive)
                .focus_weight,
        );
        if let Some(mode) = self.pending_mode.take() {
            self.flow.switch_mode(mode);
        }
    }

    fn process_one(&mut self, frame: SampleFrame) -> PerformanceRecord {
        self.frame_boundary();

        let report = self.pipeline.process(&frame, self.flow.setpoints());

        let load = report.latency_us / self.cfg.gates.budgets.aggregate_us;
        self.flow.step(load);

        let traits = self.evolution.step(report.impact, self.selector.weights());

        let memory_bytes = self.memory_bytes();
        let breakdown = self.scorer.score(
            report.latency_us,
            report.impact,
            &traits,
            report.accuracy_estimate,
            memory_bytes,
        );

        let probe_baseline = self
            .window
            .recent_mean_score(self.cfg.exploration.probe_cycles as usize);
        self.climber
            .observe(breakdown.composite, probe_baseline, &mut self.evolution);

        let record = PerformanceRecord {
            seq: frame.seq(),
            timestamp_us: frame.timestamp_us(),
            latency_us: report.latency_us,
            accuracy_estimate: report.accuracy_estimate,
            memory_bytes,
            cpu_load: load,
            impact: report.impact,
            score: breakdown.composite,
            tier: breakdown.tier,
            trait_snapshot: traits,
            active_mode: self.flow.mode(),
            degraded: report.degraded,
        };
        self.window.push(record.clone());

        match self
            .selector
            .evaluate(&self.window, self.scorer.targets(), report.supervisor_alert)
        {
            ModeDecision::Switched { to, .. } => self.pending_mode = Some(to),
            ModeDecision::Hold | ModeDecision::Suppressed(_) => {}
        }

        self.frames_processed += 1;
        self.degraded_frames += u64::from(report.degraded);
        self.supervisor_alerts += u64::from(report.supervisor_alert);
        self.fallback_frames += u64::from(report.used_fallback);
        self.stability_breaches += u64::from(report.stability_breaches);
        log::debug!(
            "frame {}: latency {:.1}us impact {:+.4} score {:.4} ({})",
            record.seq,
            record.latency_us,
            record.impact,
            record.score,
            record.tier
        );
        self.last_report = Some(report);
        self.ring.push(frame);
        record
    }

    /// Telemetry event for a record, enriched with the engine's counters.
    pub fn telemetry_event(&self, record: &PerformanceRecord) -> TelemetryEvent {
        let stats = self.stats();
        let setpoints = self.flow.setpoints();
        let mut event = TelemetryEvent::from_record(record)
            .with("frames_dropped", stats.frames_dropped as f64)
            .with("frames_invalid", stats.frames_invalid as f64)
            .with("gate1_threshold", setpoints.gate1_threshold)
            .with("gate2_throughput", setpoints.gate2_throughput)
            .with(
                "artifact_version",
                self.pipeline.active_artifact_version().map_or(-1.0, |v| v as f64),
            );
        if let Some(report) = self.last_report.as_ref().filter(|r| r.seq == record.seq) {
            event = event
                .with("used_fallback", if report.used_fallback { 1.0 } else { 0.0 })
                .with(
                    "supervisor_alert",
                    if report.supervisor_alert { 1.0 } else { 0.0 },
                )
                .with("pattern_energy", report.pattern_energy)
                .with("noise_removed", report.noise_removed);
        }
        event
    }

    /// Drive the engine from a reading source until it is exhausted or
    /// `signal` fires, then shut down gracefully.
    pub fn run<I>(
        &mut self,
        source: I,
        sink: &mut dyn TelemetrySink,
        signal: &ShutdownSignal,
    ) -> VenturiResult<ShutdownReport>
    where
        I: IntoIterator<Item = RawReading>,
    {
        for reading in source {
            if signal.is_triggered() {
                log::info!("shutdown signalled, leaving source loop");
                break;
            }
            match self.process_reading(reading) {
                Ok(records) => {
                    for record in &records {
                        let event = self.telemetry_event(record);
                        sink.emit(&event);
                    }
                }
                Err(VenturiError::FrameInvalid { seq, reason }) => {
                    log::warn!("frame {seq} dropped: {reason}");
                }
                Err(e) => return Err(e),
            }
        }
        let grace = Duration::from_millis(self.cfg.shutdown_grace_ms);
        Ok(self.shutdown(grace, sink))
    }

    /// Request a recalibration of every gate. Results are applied at a
    /// later frame boundary.
    pub fn recalibrate(&mut self) -> usize {
        let queued = self.pipeline.recalibrate();
        log::info!("recalibration requested for {queued} gate(s)");
        queued
    }

    /// Drain queued frames for at most `grace`, then stop background work.
    /// Further ingest is refused with `VenturiError::Shutdown`.
    pub fn shutdown(&mut self, grace: Duration, sink: &mut dyn TelemetrySink) -> ShutdownReport {
        if self.stopped {
            return ShutdownReport {
                drained: 0,
                abandoned: self.queue.len(),
            };
        }
        let deadline = Instant::now() + grace;
        let mut drained = 0;
        while Instant::now() < deadline {
            let Some(record) = self.step() else {
                break;
            };
            let event = self.telemetry_event(&record);
            sink.emit(&event);
            drained += 1;
        }
        let abandoned = self.queue.len();
        if abandoned > 0 {
            log::warn!("shutdown grace expired with {abandoned} frame(s) queued");
        }
        self.pipeline.shutdown();
        self.stopped = true;
        log::info!(
            "venturi engine stopped after {} frame(s), drained {drained}",
            self.frames_processed
        );
        ShutdownReport { drained, abandoned }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::StepClock;
    use crate::inference::ExternalBackend;
    use crate::optimizer::NoExploration;
    use crate::telemetry::MemorySink;
    use venturi_types::GateId;

    const CH: usize = 2;
    const LEN: usize = 8;

    fn config() -> VenturiConfig {
        let mut cfg = VenturiConfig::default();
        cfg.ingest.channels = CH;
        cfg.ingest.frame_len = LEN;
        cfg.stability.background = false;
        cfg.stability.calibration_window = 4;
        cfg
    }

    fn engine_with(cfg: VenturiConfig) -> VenturiEngine {
        VenturiEngine::new(cfg, Arc::new(StepClock::new(1)), Box::new(NoExploration)).unwrap()
    }

    fn engine() -> VenturiEngine {
        engine_with(config())
    }

    fn readings(n: usize) -> Vec<RawReading> {
        (0..n)
            .map(|t| {
                let values = (0..CH)
                    .map(|ch| (t as f64 * 0.3 + ch as f64).sin() * (1.0 + t as f64 * 0.002))
                    .collect();
                RawReading::new(values, t as u64 * 250)
            })
            .collect()
    }

    fn frame(seq: u64, value: f64) -> SampleFrame {
        let data = (0..CH * LEN).map(|i| value * (i as f64 * 0.7).cos()).collect();
        SampleFrame::new(seq, seq * 2000, CH, data)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = config();
        cfg.ingest.channels = 0;
        let err = VenturiEngine::new(cfg, Arc::new(StepClock::new(1)), Box::new(NoExploration))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_reading_stream_produces_records() {
        let mut e = engine();
        let mut records = Vec::new();
        for r in readings(LEN * 10) {
            records.extend(e.process_reading(r).unwrap());
        }
        assert_eq!(records.len(), 10);
        let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, (0..10).collect::<Vec<_>>());
        for r in &records {
            assert!(r.trait_snapshot.in_bounds());
            assert!((0.0..=1.0).contains(&r.score));
            assert!(r.impact.abs() <= 1.0);
        }
        assert_eq!(e.stats().frames_processed, 10);
        assert_eq!(e.diagnostics().len(), 10);
    }

    #[test]
    fn test_identical_inputs_give_identical_records() {
        let run = || {
            let mut e = engine();
            let mut out = Vec::new();
            for r in readings(LEN * 40) {
                out.extend(e.process_reading(r).unwrap());
            }
            out
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_non_finite_frame_leaves_state_unchanged() {
        let mut e = engine();
        e.process_frame(frame(0, 1.0)).unwrap();
        let traits = e.traits();
        let throat = e.pipeline().gate_state(GateId::Throat).discharge_coefficient();
        let bad = SampleFrame::new(1, 2000, CH, vec![f64::NAN; CH * LEN]);
        let err = e.process_frame(bad).unwrap_err();
        assert_eq!(err.kind(), "frame_invalid");
        assert_eq!(e.traits(), traits);
        assert_eq!(
            e.pipeline().gate_state(GateId::Throat).discharge_coefficient(),
            throat
        );
        assert_eq!(e.stats().frames_invalid, 1);
        // the rejected id does not hold back the next frame
        assert_eq!(e.process_frame(frame(2, 1.0)).unwrap().len(), 1);
    }

    #[test]
    fn test_out_of_order_frames_released_in_order() {
        let mut e = engine();
        assert!(e.process_frame(frame(1, 1.0)).unwrap().is_empty());
        let records = e.process_frame(frame(0, 1.0)).unwrap();
        let seqs: Vec<u64> = records.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
        assert!(e.process_frame(frame(1, 1.0)).is_err());
        assert_eq!(e.stats().sequence_violations, 1);
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let mut cfg = config();
        cfg.ingest.queue_capacity = 2;
        let mut e = engine_with(cfg);
        for r in readings(LEN * 5) {
            e.ingest_reading(r).unwrap();
        }
        assert_eq!(e.queued_frames(), 2);
        assert_eq!(e.stats().frames_dropped, 3);
        let first = e.step().unwrap();
        assert_eq!(first.seq, 3);
        assert!(e.step().is_some());
        assert!(e.step().is_none());
    }

    #[test]
    fn test_supervisor_alert_forces_efficiency() {
        let mut e = engine();
        e.install_backend(Box::new(ExternalBackend::new(
            "broken",
            1.0,
            0.99,
            |_, _, _, out| {
                out.iter_mut().for_each(|v| *v = f64::INFINITY);
                Ok(())
            },
        )));
        for seq in 0..4 {
            let records = e.process_frame(frame(seq, 1.0)).unwrap();
            assert!(records[0].degraded);
        }
        assert_eq!(e.mode(), OptimizationMode::Efficiency);
        assert_eq!(e.flow_mode(), OptimizationMode::Efficiency);
        let stats = e.stats();
        assert_eq!(stats.supervisor_alerts, 1);
        assert_eq!(stats.forced_switches, 1);
        assert_eq!(stats.degraded_frames, 4);
    }

    fn mode_changes(records: &[PerformanceRecord]) -> usize {
        records
            .windows(2)
            .filter(|w| w[0].active_mode != w[1].active_mode)
            .count()
    }

    #[test]
    fn test_improving_stream_stays_within_switch_cap() {
        let mut cfg = config();
        cfg.modes.thrash_window = 1000;
        let cap = cfg.modes.max_switches;
        let mut e = engine_with(cfg);
        let mut records = Vec::new();
        for seq in 0..300u64 {
            let amplitude = 1.0 + (seq as f64 / 150.0).min(1.0);
            records.extend(e.process_frame(frame(seq, amplitude)).unwrap());
        }
        assert_eq!(records.len(), 300);
        let stats = e.stats();
        // Supervisor-forced switches bypass the guard.
        let voluntary = (stats.mode_switches - stats.forced_switches) as usize;
        assert!(voluntary <= cap, "{voluntary} voluntary switches");
        assert!(mode_changes(&records) <= cap + stats.forced_switches as usize);
        assert!(records.iter().map(|r| r.impact).sum::<f64>() > 0.0);
        assert!(records.iter().all(|r| r.trait_snapshot.in_bounds()));
    }

    #[test]
    fn test_oscillating_stream_switches_are_capped() {
        let mut cfg = config();
        cfg.modes.max_switches = 1;
        cfg.modes.hysteresis_cycles = 1;
        cfg.modes.thrash_window = 1000;
        let mut e = engine_with(cfg);
        let mut records = Vec::new();
        for seq in 0..300u64 {
            let amplitude = 1.0 + 0.8 * (seq as f64 * 0.15).sin();
            records.extend(e.process_frame(frame(seq, amplitude)).unwrap());
        }
        let stats = e.stats();
        let forced = stats.forced_switches;
        assert!(stats.mode_switches - forced <= 1, "{} switches", stats.mode_switches);
        assert!(mode_changes(&records) as u64 <= 1 + forced);
    }

    #[test]
    fn test_mode_switch_applies_at_next_boundary() {
        let mut e = engine();
        e.install_backend(Box::new(ExternalBackend::new(
            "broken",
            1.0,
            0.99,
            |_, _, _, _| Err(VenturiError::Numerical("diverged".into())),
        )));
        let mut last = None;
        for seq in 0..3 {
            last = e.process_frame(frame(seq, 1.0)).unwrap().pop();
        }
        let third = last.unwrap();
        assert_eq!(third.active_mode, OptimizationMode::Balanced);
        assert_eq!(e.mode(), OptimizationMode::Efficiency);
        assert_eq!(e.flow_mode(), OptimizationMode::Balanced);
        let fourth = e.process_frame(frame(3, 1.0)).unwrap().pop().unwrap();
        assert_eq!(fourth.active_mode, OptimizationMode::Efficiency);
    }

    #[test]
    fn test_artifact_handoff_swapped_at_boundary() {
        use venturi_types::{artifact_channel, CompressedModelArtifact, CompressionLevel};
        let (publisher, handoff) = artifact_channel(2);
        let mut e = engine().with_artifact_handoff(handoff);
        e.process_frame(frame(0, 1.0)).unwrap();
        assert!(e.last_report().unwrap().used_fallback);
        publisher
            .publish(Arc::new(CompressedModelArtifact {
                version: 7,
                model_name: "denoiser".into(),
                level: CompressionLevel::Balanced,
                compression_ratio: 3.0,
                measured_latency_us: 5.0,
                measured_accuracy: 0.97,
                size_bytes: 48,
                original_size_bytes: 144,
                technique_chain: Vec::new(),
                kernel: Arc::from(vec![0.6, 0.4]),
                binary: Arc::from(Vec::new()),
            }))
            .unwrap();
        let rec = e.process_frame(frame(1, 1.0)).unwrap().pop().unwrap();
        assert!((rec.accuracy_estimate - 0.97).abs() < 1e-12);
        assert_eq!(e.pipeline().active_artifact_version(), Some(7));
        let event = e.telemetry_event(&rec);
        assert_eq!(event.field("artifact_version"), Some(7.0));
        assert_eq!(event.field("used_fallback"), Some(0.0));
    }

    #[test]
    fn test_run_emits_telemetry_and_stops() {
        let mut e = engine();
        let mut sink = MemorySink::new();
        let signal = ShutdownSignal::new();
        let report = e.run(readings(LEN * 6), &mut sink, &signal).unwrap();
        assert_eq!(sink.len(), 6);
        assert_eq!(report.abandoned, 0);
        assert!(e.is_stopped());
        let err = e.ingest_reading(readings(1).remove(0)).unwrap_err();
        assert_eq!(err.kind(), "shutdown");
    }

    #[test]
    fn test_run_honours_shutdown_signal() {
        let mut e = engine();
        let mut sink = MemorySink::new();
        let signal = ShutdownSignal::new();
        signal.trigger();
        e.run(readings(LEN * 6), &mut sink, &signal).unwrap();
        assert!(sink.is_empty());
        assert_eq!(e.stats().frames_processed, 0);
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let mut e = engine();
        for r in readings(LEN * 3) {
            e.ingest_reading(r).unwrap();
        }
        let mut sink = MemorySink::new();
        let report = e.shutdown(Duration::from_secs(5), &mut sink);
        assert_eq!(report, ShutdownReport { drained: 3, abandoned: 0 });
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_explicit_recalibrate() {
        // pin the Constriction threshold so no gate drifts on its own
        let mut cfg = config();
        cfg.gates.threshold_min = 0.05;
        cfg.gates.threshold_max = 0.05;
        let mut e = engine_with(cfg);
        for seq in 0..6 {
            e.process_frame(frame(seq, 1.0)).unwrap();
        }
        assert_eq!(e.recalibrate(), 3);
        e.process_frame(frame(6, 1.0)).unwrap();
        assert_eq!(e.stats().recalibrations, 3);
    }
}
