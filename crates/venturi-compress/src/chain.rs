// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Compression Chain
// ─────────────────────────────────────────────────────────────────────
//! quantize → structured prune → fuse → export at one of three levels,
//! followed by measurement on the calibration set.

use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use venturi_types::{
    CompressedModelArtifact, CompressionLevel, Precision, Technique, VenturiError, VenturiResult,
};

use crate::model::{CalibrationSet, ModelDescriptor};
use crate::techniques::{
    export, fuse, import, prune, quantize, FusionReport, PruningReport, QuantizationReport,
};

/// Weight-block width used by structured pruning.
pub const PRUNE_BLOCK: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelProfile {
    pub precision: Precision,
    pub sparsity: f64,
    pub block_size: usize,
}

impl LevelProfile {
    pub fn for_level(level: CompressionLevel) -> Self {
        let (precision, sparsity) = match level {
            CompressionLevel::Conservative => (Precision::F16, 0.10),
            CompressionLevel::Balanced => (Precision::Int8, 0.30),
            CompressionLevel::Aggressive => (Precision::Int8, 0.55),
        };
        Self {
            precision,
            sparsity,
            block_size: PRUNE_BLOCK,
        }
    }

    pub fn chain(&self) -> Vec<Technique> {
        vec![
            Technique::Quantize {
                precision: self.precision,
            },
            Technique::Prune {
                sparsity: self.sparsity,
            },
            Technique::Fuse,
            Technique::Export,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CandidateMetrics {
    pub size_bytes: u64,
    pub original_size_bytes: u64,
    pub compression_ratio: f64,
    /// Output agreement with the original model, in [0, 1].
    pub fidelity: f64,
    /// Baseline accuracy × fidelity.
    pub accuracy: f64,
    /// Median timed kernel inference over the calibration traces.
    pub latency_us: f64,
    /// Sum of the exported kernel taps.
    pub kernel_gain: f64,
}

/// A compressed model awaiting validation.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub level: CompressionLevel,
    pub model: ModelDescriptor,
    pub precision: Precision,
    pub chain: Vec<Technique>,
    pub kernel: Vec<f64>,
    pub blob: Vec<u8>,
    pub metrics: CandidateMetrics,
    pub quantization: QuantizationReport,
    pub pruning: PruningReport,
    pub fusion: FusionReport,
}

impl Candidate {
    pub fn into_artifact(self, version: u64) -> CompressedModelArtifact {
        CompressedModelArtifact {
            version,
            model_name: self.model.name,
            level: self.level,
            compression_ratio: self.metrics.compression_ratio,
            measured_latency_us: self.metrics.latency_us,
            measured_accuracy: self.metrics.accuracy,
            size_bytes: self.metrics.size_bytes,
            original_size_bytes: self.metrics.original_size_bytes,
            technique_chain: self.chain,
            kernel: Arc::from(self.kernel),
            binary: Arc::from(self.blob),
        }
    }
}

/// Run the full chain for `level` and measure the result.
pub fn compress(
    model: &ModelDescriptor,
    calibration: &CalibrationSet,
    level: CompressionLevel,
) -> VenturiResult<Candidate> {
    model.check()?;
    if calibration.is_empty() {
        return Err(VenturiError::Config("empty calibration set".into()));
    }
    let profile = LevelProfile::for_level(level);
    let mut compressed = model.clone();
    let quantization = quantize(&mut compressed, profile.precision);
    let pruning = prune(&mut compressed, profile.sparsity, profile.block_size)?;
    let fusion = fuse(&mut compressed, profile.precision);
    let blob = export(&compressed, profile.precision);
    // Measure what the blob actually carries, not the in-memory copy.
    let decoded = import(&model.name, &blob, model.baseline_accuracy)?;
    let kernel = decoded.kernel();

    let original_size_bytes = (model.param_count() * Precision::F32.bytes_per_param()) as u64;
    let size_bytes =
        (compressed.surviving_params() * profile.precision.bytes_per_param()).max(1) as u64;
    let fidelity = fidelity(model, &decoded, calibration);
    let metrics = CandidateMetrics {
        size_bytes,
        original_size_bytes,
        compression_ratio: original_size_bytes as f64 / size_bytes as f64,
        fidelity,
        accuracy: model.baseline_accuracy * fidelity,
        latency_us: measure_latency_us(&kernel, calibration),
        kernel_gain: kernel.iter().sum(),
    };
    log::debug!(
        "{} {:?}: ratio {:.2} fidelity {:.4} latency {:.1}us ({} blocks pruned, {} folded)",
        model.name,
        level,
        metrics.compression_ratio,
        metrics.fidelity,
        metrics.latency_us,
        pruning.pruned_blocks,
        fusion.folded
    );
    Ok(Candidate {
        level,
        model: compressed,
        precision: profile.precision,
        chain: profile.chain(),
        kernel,
        blob,
        metrics,
        quantization,
        pruning,
        fusion,
    })
}

/// `1 − ‖y_c − y_o‖ / ‖y_o‖` over every calibration trace, clamped to [0, 1].
pub fn fidelity(
    original: &ModelDescriptor,
    compressed: &ModelDescriptor,
    calibration: &CalibrationSet,
) -> f64 {
    let mut err = 0.0;
    let mut energy = 0.0;
    for trace in &calibration.traces {
        let yo = original.forward(trace);
        let yc = compressed.forward(trace);
        for (a, b) in yo.iter().zip(&yc) {
            err += (a - b).powi(2);
            energy += a * a;
        }
    }
    if !(err.is_finite() && energy.is_finite()) {
        return 0.0;
    }
    if energy <= f64::EPSILON {
        return if err <= f64::EPSILON { 1.0 } else { 0.0 };
    }
    (1.0 - (err / energy).sqrt()).clamp(0.0, 1.0)
}

/// Median wall time of one normalised FIR pass per calibration trace.
pub fn measure_latency_us(kernel: &[f64], calibration: &CalibrationSet) -> f64 {
    let norm: f64 = kernel.iter().sum();
    let norm = if norm.abs() > 1e-12 { norm } else { 1.0 };
    let longest = calibration.traces.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = vec![0.0; longest];
    let mut samples: Vec<f64> = calibration
        .traces
        .iter()
        .map(|trace| {
            let t0 = Instant::now();
            for t in 0..trace.len() {
                let mut acc = 0.0;
                for (j, &h) in kernel.iter().enumerate() {
                    acc += h * trace[t.saturating_sub(j)];
                }
                out[t] = acc / norm;
            }
            black_box(&out);
            t0.elapsed().as_secs_f64() * 1e6
        })
        .collect();
    samples.sort_by(|a, b| a.total_cmp(b));
    match samples.len() {
        0 => 0.0,
        n if n % 2 == 1 => samples[n / 2],
        n => (samples[n / 2 - 1] + samples[n / 2]) / 2.0,
    }
}
