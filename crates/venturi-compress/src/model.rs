// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Model Descriptors & Calibration Sets
// ─────────────────────────────────────────────────────────────────────
//! A trained denoising model as a chain of 1-D layers over a single
//! channel trace.
//!
//! The linear part of the chain (Conv taps, Linear gains, BatchNorm
//! scales) collapses into one causal FIR impulse response, which is what
//! the Throat gate ultimately runs. `forward` keeps the full semantics
//! (biases, shifts, saturation) and is the reference used to measure how
//! much fidelity a compressed model retains.

use serde::{Deserialize, Serialize};

use venturi_types::{VenturiError, VenturiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Causal convolution: `y[t] = Σ w[j]·x[t−j] + bias`.
    Conv,
    /// Pointwise affine: `y = w[0]·x + bias`.
    Linear,
    /// Folded normalisation: `y = scale·x + shift`.
    BatchNorm,
    /// Soft saturation: `y = scale·tanh(x / scale)`.
    Activation,
}

impl LayerKind {
    pub fn code(self) -> u8 {
        match self {
            Self::Conv => 0,
            Self::Linear => 1,
            Self::BatchNorm => 2,
            Self::Activation => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Conv),
            1 => Some(Self::Linear),
            2 => Some(Self::BatchNorm),
            3 => Some(Self::Activation),
            _ => None,
        }
    }

    /// Conv and Linear layers can absorb a following BatchNorm.
    pub fn is_foldable_target(self) -> bool {
        matches!(self, Self::Conv | Self::Linear)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    /// Conv taps or the single Linear gain; empty otherwise.
    pub weights: Vec<f64>,
    pub bias: f64,
    /// BatchNorm scale, or the Activation saturation limit.
    pub scale: f64,
    pub shift: f64,
}

impl Layer {
    pub fn conv(name: impl Into<String>, taps: Vec<f64>, bias: f64) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Conv,
            weights: taps,
            bias,
            scale: 1.0,
            shift: 0.0,
        }
    }

    pub fn linear(name: impl Into<String>, gain: f64, bias: f64) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Linear,
            weights: vec![gain],
            bias,
            scale: 1.0,
            shift: 0.0,
        }
    }

    pub fn batch_norm(name: impl Into<String>, scale: f64, shift: f64) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::BatchNorm,
            weights: Vec::new(),
            bias: 0.0,
            scale,
            shift,
        }
    }

    pub fn activation(name: impl Into<String>, limit: f64) -> Self {
        Self {
            name: name.into(),
            kind: LayerKind::Activation,
            weights: Vec::new(),
            bias: 0.0,
            scale: limit,
            shift: 0.0,
        }
    }

    /// Stored parameters: weights plus the scalars the kind uses.
    pub fn param_count(&self) -> usize {
        match self.kind {
            LayerKind::Conv | LayerKind::Linear => self.weights.len() + 1,
            LayerKind::BatchNorm => 2,
            LayerKind::Activation => 1,
        }
    }

    /// Parameters that survive pruning (zeroed weights are dropped).
    pub fn surviving_params(&self) -> usize {
        let dropped = self.weights.iter().filter(|w| **w == 0.0).count();
        self.param_count() - dropped
    }

    fn apply(&self, x: &[f64], out: &mut Vec<f64>) {
        out.clear();
        match self.kind {
            LayerKind::Conv => {
                for t in 0..x.len() {
                    let mut acc = self.bias;
                    for (j, &w) in self.weights.iter().enumerate() {
                        acc += w * x[t.saturating_sub(j)];
                    }
                    out.push(acc);
                }
            }
            LayerKind::Linear => {
                let g = self.weights.first().copied().unwrap_or(1.0);
                out.extend(x.iter().map(|v| g * v + self.bias));
            }
            LayerKind::BatchNorm => out.extend(x.iter().map(|v| self.scale * v + self.shift)),
            LayerKind::Activation => {
                let limit = self.scale;
                if limit > 0.0 {
                    out.extend(x.iter().map(|v| limit * (v / limit).tanh()));
                } else {
                    out.extend_from_slice(x);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub layers: Vec<Layer>,
    /// Accuracy of the uncompressed model on its evaluation set.
    pub baseline_accuracy: f64,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, layers: Vec<Layer>, baseline_accuracy: f64) -> Self {
        Self {
            name: name.into(),
            layers,
            baseline_accuracy,
        }
    }

    pub fn check(&self) -> VenturiResult<()> {
        if self.layers.is_empty() {
            return Err(VenturiError::Config(format!("model {} has no layers", self.name)));
        }
        if !(0.0..=1.0).contains(&self.baseline_accuracy) {
            return Err(VenturiError::Config(format!(
                "model {} baseline accuracy {} outside [0, 1]",
                self.name, self.baseline_accuracy
            )));
        }
        for layer in &self.layers {
            let finite = layer.weights.iter().all(|w| w.is_finite())
                && layer.bias.is_finite()
                && layer.scale.is_finite()
                && layer.shift.is_finite();
            if !finite {
                return Err(VenturiError::Numerical(format!(
                    "model {} layer {} has non-finite parameters",
                    self.name, layer.name
                )));
            }
        }
        Ok(())
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::param_count).sum()
    }

    pub fn surviving_params(&self) -> usize {
        self.layers.iter().map(Layer::surviving_params).sum()
    }

    /// Full-semantics inference over one trace.
    pub fn forward(&self, trace: &[f64]) -> Vec<f64> {
        let mut cur = trace.to_vec();
        let mut next = Vec::with_capacity(trace.len());
        for layer in &self.layers {
            layer.apply(&cur, &mut next);
            std::mem::swap(&mut cur, &mut next);
        }
        cur
    }

    /// Impulse response of the linear part of the chain.
    pub fn kernel(&self) -> Vec<f64> {
        let mut h = vec![1.0];
        for layer in &self.layers {
            match layer.kind {
                LayerKind::Conv if !layer.weights.is_empty() => h = convolve(&h, &layer.weights),
                LayerKind::Conv => {}
                LayerKind::Linear => {
                    let g = layer.weights.first().copied().unwrap_or(1.0);
                    h.iter_mut().for_each(|v| *v *= g);
                }
                LayerKind::BatchNorm => h.iter_mut().for_each(|v| *v *= layer.scale),
                LayerKind::Activation => {}
            }
        }
        h
    }
}

fn convolve(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        for (j, &y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// Representative input traces used to measure a compressed model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSet {
    pub traces: Vec<Vec<f64>>,
}

impl CalibrationSet {
    pub fn new(traces: Vec<Vec<f64>>) -> VenturiResult<Self> {
        if traces.is_empty() || traces.iter().any(|t| t.is_empty()) {
            return Err(VenturiError::Config(
                "calibration set needs at least one non-empty trace".into(),
            ));
        }
        if traces.iter().flatten().any(|v| !v.is_finite()) {
            return Err(VenturiError::Numerical(
                "calibration set contains non-finite samples".into(),
            ));
        }
        Ok(Self { traces })
    }

    /// Deterministic band-limited traces: a few sinusoids plus a
    /// pseudo-random high-frequency component.
    pub fn synthetic(count: usize, len: usize) -> Self {
        let traces = (0..count.max(1))
            .map(|k| {
                let k = k as f64;
                (0..len.max(1))
                    .map(|t| {
                        let t = t as f64;
                        (0.05 * t + k).sin()
                            + 0.5 * (0.013 * t * (k + 1.0)).cos()
                            + 0.2 * (2.7 * t + 1.3 * k).sin()
                    })
                    .collect()
            })
            .collect();
        Self { traces }
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}
