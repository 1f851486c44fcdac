// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Compression Benchmarks
// ─────────────────────────────────────────────────────────────────────
//! Criterion benchmarks for the offline chain. None of this runs on the
//! per-frame path, but a full Balanced pass should stay well under the
//! interval at which new artifacts are requested.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use venturi_compress::{compress, export, import, CalibrationSet, Layer, ModelDescriptor};
use venturi_types::{CompressionLevel, Precision};

fn denoiser() -> ModelDescriptor {
    let taps: Vec<f64> = (0..64)
        .map(|i| (-(i as f64 - 8.0).powi(2) / 40.0).exp())
        .collect();
    ModelDescriptor::new(
        "denoiser",
        vec![
            Layer::conv("c1", taps, 0.0),
            Layer::batch_norm("bn1", 0.1, 0.0),
            Layer::activation("act", 50.0),
            Layer::conv("c2", vec![0.5, 0.3, 0.2], 0.0),
        ],
        0.975,
    )
}

// ── Full chain per level ────────────────────────────────────────────

fn bench_compress_levels(c: &mut Criterion) {
    let model = denoiser();
    let calib = CalibrationSet::synthetic(8, 256);
    for level in [
        CompressionLevel::Conservative,
        CompressionLevel::Balanced,
        CompressionLevel::Aggressive,
    ] {
        c.bench_function(&format!("compress_{level:?}").to_lowercase(), |b| {
            b.iter(|| compress(black_box(&model), black_box(&calib), level))
        });
    }
}

// ── Blob export / import ────────────────────────────────────────────

fn bench_blob(c: &mut Criterion) {
    let model = denoiser();
    c.bench_function("export_int8", |b| {
        b.iter(|| export(black_box(&model), Precision::Int8))
    });
    let blob = export(&model, Precision::Int8);
    c.bench_function("import_int8", |b| {
        b.iter(|| import("denoiser", black_box(&blob), 0.975))
    });
}

criterion_group!(benches, bench_compress_levels, bench_blob);
criterion_main!(benches);
