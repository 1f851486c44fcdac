// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Compression Techniques
// ─────────────────────────────────────────────────────────────────────
//! Quantization, structured pruning, BatchNorm folding and portable
//! export. Every technique works in place on a `ModelDescriptor` and
//! returns a small report of what it did.
//!
//! Blob layout (all little-endian):
//!
//! ```text
//! "VNTR" | u16 format | u8 precision | u8 reserved | u32 layers
//! per layer:
//!   u8 kind | u32 n | f32 bias | f32 scale | f32 shift
//!   F32:  n × f32
//!   F16:  n × u16 (IEEE half)
//!   Int8: f32 step | n × i8
//! ```

use std::cmp::Ordering;

use serde::Serialize;

use venturi_types::{Precision, VenturiError, VenturiResult};

use crate::model::{Layer, LayerKind, ModelDescriptor};

pub const BLOB_MAGIC: &[u8; 4] = b"VNTR";
pub const BLOB_FORMAT: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuantizationReport {
    pub precision: Precision,
    /// Mean squared error introduced over all weights.
    pub mse: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PruningReport {
    pub target_sparsity: f64,
    pub achieved_sparsity: f64,
    pub block_size: usize,
    pub pruned_blocks: usize,
    pub kept_blocks: usize,
    pub l2_error: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FusionReport {
    pub folded: usize,
}

// ── Quantization ────────────────────────────────────────────────────

/// Nearest IEEE half-precision bit pattern (round-half-even, saturating).
pub fn f16_bits(x: f64) -> u16 {
    let bits = (x as f32).to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mant = bits & 0x7f_ffff;
    if exp == 0xff {
        return sign | 0x7c00 | if mant != 0 { 0x200 } else { 0 };
    }
    let e = exp - 127 + 15;
    if e >= 0x1f {
        return sign | 0x7bff;
    }
    if e <= 0 {
        if e < -10 {
            return sign;
        }
        let m = mant | 0x80_0000;
        let shift = (14 - e) as u32;
        let half = m >> shift;
        let rem = m & ((1 << shift) - 1);
        let halfway = 1 << (shift - 1);
        let rounded = if rem > halfway || (rem == halfway && half & 1 == 1) {
            half + 1
        } else {
            half
        };
        return sign | rounded as u16;
    }
    let half_m = mant >> 13;
    let rem = mant & 0x1fff;
    let mut out = ((e as u32) << 10) | half_m;
    if rem > 0x1000 || (rem == 0x1000 && half_m & 1 == 1) {
        out += 1;
    }
    sign | out as u16
}

pub fn f16_value(h: u16) -> f64 {
    let sign = if h & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exp = i32::from((h >> 10) & 0x1f);
    let mant = f64::from(h & 0x3ff);
    match exp {
        0 => sign * mant * 2f64.powi(-24),
        0x1f if mant == 0.0 => sign * f64::INFINITY,
        0x1f => f64::NAN,
        e => sign * (1.0 + mant / 1024.0) * 2f64.powi(e - 15),
    }
}

/// Symmetric int8 step for a weight slice.
pub fn int8_step(weights: &[f64]) -> f64 {
    let max = weights.iter().fold(0.0f64, |m, w| m.max(w.abs()));
    if max > 0.0 {
        max / 127.0
    } else {
        1.0
    }
}

/// Snap every weight (and scalar parameter) to the precision grid.
pub fn quantize(model: &mut ModelDescriptor, precision: Precision) -> QuantizationReport {
    let mut sq_err = 0.0;
    let mut n = 0usize;
    for layer in model.layers.iter_mut() {
        let before = layer.weights.clone();
        match precision {
            Precision::F32 => layer.weights.iter_mut().for_each(|w| *w = f64::from(*w as f32)),
            Precision::F16 => layer.weights.iter_mut().for_each(|w| *w = f16_value(f16_bits(*w))),
            Precision::Int8 => {
                let step = int8_step(&layer.weights);
                layer
                    .weights
                    .iter_mut()
                    .for_each(|w| *w = (*w / step).round().clamp(-127.0, 127.0) * step);
            }
        }
        // scalars are stored at f32 regardless of precision
        layer.bias = f64::from(layer.bias as f32);
        layer.scale = f64::from(layer.scale as f32);
        layer.shift = f64::from(layer.shift as f32);
        sq_err += before
            .iter()
            .zip(&layer.weights)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>();
        n += before.len();
    }
    QuantizationReport {
        precision,
        mse: if n > 0 { sq_err / n as f64 } else { 0.0 },
    }
}

// ── Structured pruning ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Block {
    layer: usize,
    start: usize,
    len: usize,
    norm_sq: f64,
}

/// Zero the lowest-norm weight blocks across all Conv layers until
/// `sparsity` of the blocks are gone. Each layer keeps its strongest block.
pub fn prune(
    model: &mut ModelDescriptor,
    sparsity: f64,
    block_size: usize,
) -> VenturiResult<PruningReport> {
    if block_size == 0 {
        return Err(VenturiError::Config("prune block size must be > 0".into()));
    }
    if !(0.0..=1.0).contains(&sparsity) {
        return Err(VenturiError::Config(format!(
            "prune sparsity {sparsity} outside [0, 1]"
        )));
    }

    let mut blocks = Vec::new();
    let mut strongest: Vec<Option<usize>> = vec![None; model.layers.len()];
    for (li, layer) in model.layers.iter().enumerate() {
        if layer.kind != LayerKind::Conv {
            continue;
        }
        for (bi, chunk) in layer.weights.chunks(block_size).enumerate() {
            let norm_sq = chunk.iter().map(|w| w * w).sum::<f64>();
            let idx = blocks.len();
            blocks.push(Block {
                layer: li,
                start: bi * block_size,
                len: chunk.len(),
                norm_sq,
            });
            let stronger = strongest[li].map_or(true, |s: usize| norm_sq > blocks[s].norm_sq);
            if stronger {
                strongest[li] = Some(idx);
            }
        }
    }
    let protected: Vec<usize> = strongest.into_iter().flatten().collect();

    let total = blocks.len();
    let target = (total as f64 * sparsity).floor() as usize;
    let mut order: Vec<usize> = (0..total).filter(|i| !protected.contains(i)).collect();
    order.sort_unstable_by(|&a, &b| {
        blocks[a]
            .norm_sq
            .partial_cmp(&blocks[b].norm_sq)
            .unwrap_or(Ordering::Equal)
    });

    let mut pruned = 0;
    let mut l2_error = 0.0;
    for &i in order.iter().take(target) {
        let b = blocks[i];
        model.layers[b.layer].weights[b.start..b.start + b.len].fill(0.0);
        l2_error += b.norm_sq;
        pruned += 1;
    }

    Ok(PruningReport {
        target_sparsity: sparsity,
        achieved_sparsity: if total > 0 {
            pruned as f64 / total as f64
        } else {
            0.0
        },
        block_size,
        pruned_blocks: pruned,
        kept_blocks: total - pruned,
        l2_error: l2_error.sqrt(),
    })
}

// ── Fusion ──────────────────────────────────────────────────────────

/// Fold every BatchNorm directly following a Conv or Linear layer into it.
/// Folded weights are re-snapped to `precision`.
pub fn fuse(model: &mut ModelDescriptor, precision: Precision) -> FusionReport {
    let mut out: Vec<Layer> = Vec::with_capacity(model.layers.len());
    let mut folded = 0;
    for layer in model.layers.drain(..) {
        if layer.kind == LayerKind::BatchNorm {
            if let Some(prev) = out.last_mut().filter(|p| p.kind.is_foldable_target()) {
                prev.weights.iter_mut().for_each(|w| *w *= layer.scale);
                prev.bias = prev.bias * layer.scale + layer.shift;
                prev.name = format!("{}+{}", prev.name, layer.name);
                folded += 1;
                continue;
            }
        }
        out.push(layer);
    }
    model.layers = out;
    if folded > 0 && precision != Precision::F32 {
        quantize(model, precision);
    }
    FusionReport { folded }
}

// ── Export ──────────────────────────────────────────────────────────

fn precision_code(p: Precision) -> u8 {
    match p {
        Precision::F32 => 0,
        Precision::F16 => 1,
        Precision::Int8 => 2,
    }
}

fn precision_from_code(code: u8) -> Option<Precision> {
    match code {
        0 => Some(Precision::F32),
        1 => Some(Precision::F16),
        2 => Some(Precision::Int8),
        _ => None,
    }
}

/// Serialise a model to the portable blob format.
pub fn export(model: &ModelDescriptor, precision: Precision) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + model.param_count() * 4);
    buf.extend_from_slice(BLOB_MAGIC);
    buf.extend_from_slice(&BLOB_FORMAT.to_le_bytes());
    buf.push(precision_code(precision));
    buf.push(0);
    buf.extend_from_slice(&(model.layers.len() as u32).to_le_bytes());
    for layer in &model.layers {
        buf.push(layer.kind.code());
        buf.extend_from_slice(&(layer.weights.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(layer.bias as f32).to_le_bytes());
        buf.extend_from_slice(&(layer.scale as f32).to_le_bytes());
        buf.extend_from_slice(&(layer.shift as f32).to_le_bytes());
        match precision {
            Precision::F32 => {
                for w in &layer.weights {
                    buf.extend_from_slice(&(*w as f32).to_le_bytes());
                }
            }
            Precision::F16 => {
                for w in &layer.weights {
                    buf.extend_from_slice(&f16_bits(*w).to_le_bytes());
                }
            }
            Precision::Int8 => {
                let step = int8_step(&layer.weights);
                buf.extend_from_slice(&(step as f32).to_le_bytes());
                for w in &layer.weights {
                    let q = (*w / step).round().clamp(-127.0, 127.0) as i8;
                    buf.extend_from_slice(&q.to_le_bytes());
                }
            }
        }
    }
    buf
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> VenturiResult<&'a [u8]> {
        let end = self.pos + n;
        let slice = self.buf.get(self.pos..end).ok_or_else(|| {
            VenturiError::Numerical(format!("blob truncated at byte {}", self.pos))
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> VenturiResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> VenturiResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> VenturiResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> VenturiResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> VenturiResult<f64> {
        Ok(f64::from(f32::from_le_bytes(self.array()?)))
    }
}

/// Parse a blob produced by `export`.
pub fn import(name: &str, blob: &[u8], baseline_accuracy: f64) -> VenturiResult<ModelDescriptor> {
    let mut r = Reader { buf: blob, pos: 0 };
    if r.take(4)? != BLOB_MAGIC {
        return Err(VenturiError::Numerical("blob magic mismatch".into()));
    }
    let format = r.u16()?;
    if format != BLOB_FORMAT {
        return Err(VenturiError::Numerical(format!(
            "unsupported blob format {format}"
        )));
    }
    let precision = precision_from_code(r.u8()?)
        .ok_or_else(|| VenturiError::Numerical("unknown blob precision".into()))?;
    r.u8()?;
    let count = r.u32()? as usize;
    let mut layers = Vec::with_capacity(count.min(1024));
    for i in 0..count {
        let kind = LayerKind::from_code(r.u8()?)
            .ok_or_else(|| VenturiError::Numerical(format!("layer {i}: unknown kind")))?;
        let n = r.u32()? as usize;
        let bias = r.f32()?;
        let scale = r.f32()?;
        let shift = r.f32()?;
        let weights = match precision {
            Precision::F32 => (0..n).map(|_| r.f32()).collect::<VenturiResult<Vec<_>>>()?,
            Precision::F16 => (0..n)
                .map(|_| r.u16().map(f16_value))
                .collect::<VenturiResult<Vec<_>>>()?,
            Precision::Int8 => {
                let step = r.f32()?;
                r.take(n)?
                    .iter()
                    .map(|&b| f64::from(b as i8) * step)
                    .collect()
            }
        };
        layers.push(Layer {
            name: format!("layer{i}"),
            kind,
            weights,
            bias,
            scale,
            shift,
        });
    }
    if r.pos != blob.len() {
        return Err(VenturiError::Numerical(format!(
            "{} trailing byte(s) after blob",
            blob.len() - r.pos
        )));
    }
    Ok(ModelDescriptor::new(name, layers, baseline_accuracy))
}
