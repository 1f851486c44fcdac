// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Hot Path Benchmarks
// ─────────────────────────────────────────────────────────────────────
//! Criterion benchmarks proving one frame clears the sub-millisecond
//! aggregate budget: the gates alone, the scorer alone, and the full
//! engine step.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use venturi_control::FlowSetpoints;
use venturi_core::{
    ArtifactBackend, MonotonicClock, NoExploration, PerformanceScorer, VenturiEngine, VenturiPipeline,
};
use venturi_types::{
    CompressedModelArtifact, CompressionLevel, SampleFrame, TraitVector, VenturiConfig,
};

const CH: usize = 8;
const LEN: usize = 32;

fn config() -> VenturiConfig {
    let mut cfg = VenturiConfig::default();
    cfg.ingest.channels = CH;
    cfg.ingest.frame_len = LEN;
    cfg
}

fn frame(seq: u64) -> SampleFrame {
    let data = (0..CH * LEN)
        .map(|i| ((seq as f64) * 0.1 + i as f64 * 0.37).sin())
        .collect();
    SampleFrame::new(seq, seq * 4000, CH, data)
}

fn artifact() -> Arc<CompressedModelArtifact> {
    let kernel: Vec<f64> = (0..16).map(|i| 0.8f64.powi(i)).collect();
    Arc::new(CompressedModelArtifact {
        version: 1,
        model_name: "bench".into(),
        level: CompressionLevel::Balanced,
        compression_ratio: 4.0,
        measured_latency_us: 10.0,
        measured_accuracy: 0.97,
        size_bytes: 17,
        original_size_bytes: 68,
        technique_chain: Vec::new(),
        kernel: Arc::from(kernel),
        binary: Arc::from(Vec::new()),
    })
}

fn pipeline(cfg: &VenturiConfig) -> VenturiPipeline {
    VenturiPipeline::new(
        cfg.gates.clone(),
        cfg.stability.clone(),
        CH,
        LEN,
        Arc::new(MonotonicClock::new()),
    )
    .unwrap()
}

fn setpoints(cfg: &VenturiConfig) -> FlowSetpoints {
    FlowSetpoints {
        gate1_threshold: cfg.gates.initial_threshold,
        gate2_throughput: cfg.flow.throughput_max,
    }
}

// ── VenturiPipeline.process() ───────────────────────────────────────

fn bench_pipeline_fallback(c: &mut Criterion) {
    let cfg = config();
    let mut pipeline = pipeline(&cfg);
    let setpoints = setpoints(&cfg);
    let f = frame(0);
    c.bench_function("pipeline_fallback", |b| {
        b.iter(|| pipeline.process(black_box(&f), setpoints))
    });
}

fn bench_pipeline_artifact(c: &mut Criterion) {
    let cfg = config();
    let mut pipeline = pipeline(&cfg);
    pipeline.swap_artifact(artifact());
    let setpoints = setpoints(&cfg);
    let f = frame(0);
    c.bench_function("pipeline_artifact", |b| {
        b.iter(|| pipeline.process(black_box(&f), setpoints))
    });
}

// ── PerformanceScorer.score() ───────────────────────────────────────

fn bench_scorer(c: &mut Criterion) {
    let cfg = config();
    let scorer = PerformanceScorer::new(cfg.scoring, cfg.benchmark);
    let traits = TraitVector::baseline(0.5);
    c.bench_function("scorer_score", |b| {
        b.iter(|| scorer.score(black_box(120.0), black_box(0.3), &traits, 0.96, 512 * 1024))
    });
}

// ── Full engine step ────────────────────────────────────────────────

fn bench_engine_frame(c: &mut Criterion) {
    let mut engine = VenturiEngine::new(
        config(),
        Arc::new(MonotonicClock::new()),
        Box::new(NoExploration),
    )
    .unwrap();
    engine.install_backend(Box::new(ArtifactBackend::new(artifact())));
    let mut seq = 0u64;
    c.bench_function("engine_frame", |b| {
        b.iter(|| {
            let out = engine.process_frame(frame(seq));
            seq += 1;
            black_box(out)
        })
    });
}

criterion_group!(
    benches,
    bench_pipeline_fallback,
    bench_pipeline_artifact,
    bench_scorer,
    bench_engine_frame,
);
criterion_main!(benches);
