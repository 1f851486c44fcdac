// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Throat Inference Backends
// ─────────────────────────────────────────────────────────────────────
//! Inference backend trait used by the Throat gate, plus the classical
//! fallback.
//!
//! The compressed artifact runs behind `ArtifactBackend`. Anything else
//! (an embedded runtime, a remote accelerator) can be plugged in through
//! `ExternalBackend`. `ClassicalFallback` is the cheap deterministic path
//! the Throat switches to whenever a backend would overrun its budget.

use std::sync::Arc;

use venturi_types::{CompressedModelArtifact, VenturiError, VenturiResult};

/// Trait for Throat inference backends.
///
/// `denoise` writes one output value per input value; data is
/// sample-major with `channels` interleaved channels.
pub trait InferenceBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Artifact version behind this backend, if any.
    fn version(&self) -> Option<u64> {
        None
    }

    /// Declared cost of one full-throughput frame, in microseconds.
    fn estimated_cost_us(&self) -> f64;

    /// Accuracy attributed to frames processed by this backend.
    fn accuracy(&self) -> f64;

    /// `throughput` in (0, 1] scales how much of the model runs.
    fn denoise(
        &self,
        input: &[f64],
        channels: usize,
        throughput: f64,
        out: &mut [f64],
    ) -> VenturiResult<()>;
}

/// Causal FIR denoiser driven by a compressed artifact's kernel.
pub struct ArtifactBackend {
    artifact: Arc<CompressedModelArtifact>,
}

impl ArtifactBackend {
    pub fn new(artifact: Arc<CompressedModelArtifact>) -> Self {
        Self { artifact }
    }

    pub fn artifact(&self) -> &Arc<CompressedModelArtifact> {
        &self.artifact
    }

    /// Number of taps run at `throughput`.
    pub fn active_taps(&self, throughput: f64) -> usize {
        let total = self.artifact.kernel.len();
        let t = if throughput.is_finite() {
            throughput.clamp(0.0, 1.0)
        } else {
            1.0
        };
        ((total as f64 * t).ceil() as usize).clamp(1, total.max(1))
    }
}

impl InferenceBackend for ArtifactBackend {
    fn name(&self) -> &str {
        &self.artifact.model_name
    }

    fn version(&self) -> Option<u64> {
        Some(self.artifact.version)
    }

    fn estimated_cost_us(&self) -> f64 {
        self.artifact.measured_latency_us
    }

    fn accuracy(&self) -> f64 {
        self.artifact.measured_accuracy
    }

    fn denoise(
        &self,
        input: &[f64],
        channels: usize,
        throughput: f64,
        out: &mut [f64],
    ) -> VenturiResult<()> {
        if self.artifact.kernel.is_empty() {
            return Err(VenturiError::Numerical(format!(
                "artifact v{} has an empty kernel",
                self.artifact.version
            )));
        }
        let taps = &self.artifact.kernel[..self.active_taps(throughput)];
        let norm: f64 = taps.iter().sum();
        if !norm.is_finite() || norm.abs() < 1e-12 {
            return Err(VenturiError::Numerical(format!(
                "artifact v{} kernel gain {norm} is unusable",
                self.artifact.version
            )));
        }
        fir_filter(input, channels, taps, norm, out);
        Ok(())
    }
}

/// y[t] = Σ h[j]·x[t−j] / norm, holding x[0] before the frame start.
fn fir_filter(input: &[f64], channels: usize, taps: &[f64], norm: f64, out: &mut [f64]) {
    let len = input.len() / channels.max(1);
    for ch in 0..channels {
        for t in 0..len {
            let mut acc = 0.0;
            for (j, &h) in taps.iter().enumerate() {
                acc += h * input[t.saturating_sub(j) * channels + ch];
            }
            out[t * channels + ch] = acc / norm;
        }
    }
}

/// Three-point centred moving average; edges replicate.
pub struct ClassicalFallback {
    accuracy: f64,
}

impl ClassicalFallback {
    pub fn new(accuracy: f64) -> Self {
        Self { accuracy }
    }
}

impl InferenceBackend for ClassicalFallback {
    fn name(&self) -> &str {
        "classical"
    }

    fn estimated_cost_us(&self) -> f64 {
        0.0
    }

    fn accuracy(&self) -> f64 {
        self.accuracy
    }

    fn denoise(
        &self,
        input: &[f64],
        channels: usize,
        _throughput: f64,
        out: &mut [f64],
    ) -> VenturiResult<()> {
        let len = input.len() / channels.max(1);
        for ch in 0..channels {
            for t in 0..len {
                let prev = input[t.saturating_sub(1) * channels + ch];
                let cur = input[t * channels + ch];
                let next = input[(t + 1).min(len - 1) * channels + ch];
                out[t * channels + ch] = (prev + cur + next) / 3.0;
            }
        }
        Ok(())
    }
}

type DenoiseFn = Box<dyn Fn(&[f64], usize, f64, &mut [f64]) -> VenturiResult<()> + Send + Sync>;

/// External backend that calls a denoising function.
pub struct ExternalBackend {
    name: String,
    cost_us: f64,
    accuracy: f64,
    denoise_fn: DenoiseFn,
}

impl ExternalBackend {
    pub fn new(
        name: impl Into<String>,
        cost_us: f64,
        accuracy: f64,
        denoise_fn: impl Fn(&[f64], usize, f64, &mut [f64]) -> VenturiResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            cost_us,
            accuracy,
            denoise_fn: Box::new(denoise_fn),
        }
    }
}

impl InferenceBackend for ExternalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn estimated_cost_us(&self) -> f64 {
        self.cost_us
    }

    fn accuracy(&self) -> f64 {
        self.accuracy
    }

    fn denoise(
        &self,
        input: &[f64],
        channels: usize,
        throughput: f64,
        out: &mut [f64],
    ) -> VenturiResult<()> {
        (self.denoise_fn)(input, channels, throughput, out)
    }
}
