// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Compressed Model Artifacts + Hot-Swap Handoff
// ─────────────────────────────────────────────────────────────────────
//! Artifact descriptors produced by the offline compression workers and
//! the lock-free channel that hands them to the Throat gate.
//!
//! The online loop never blocks on the handoff: it drains whatever has
//! been published with `try_recv` at a frame boundary and keeps the
//! newest artifact. Every artifact is immutable and shared by `Arc`, so
//! a swap is a single pointer replacement and can never be observed
//! half-done.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::error::{VenturiError, VenturiResult};

/// Numeric precision of stored weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    F32,
    F16,
    Int8,
}

impl Precision {
    pub fn bytes_per_param(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 => 2,
            Self::Int8 => 1,
        }
    }
}

/// One step of a compression chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "technique", rename_all = "snake_case")]
pub enum Technique {
    Quantize { precision: Precision },
    /// Structured pruning: fraction of weight blocks removed.
    Prune { sparsity: f64 },
    /// Fold normalisation layers into the preceding linear layer.
    Fuse,
    /// Portable binary export.
    Export,
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quantize { precision } => write!(f, "quantize({precision:?})"),
            Self::Prune { sparsity } => write!(f, "prune({sparsity:.2})"),
            Self::Fuse => f.write_str("fuse"),
            Self::Export => f.write_str("export"),
        }
    }
}

/// Compression aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionLevel {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

impl CompressionLevel {
    /// Next level down, used for retry after a validation failure.
    pub fn less_aggressive(self) -> Option<Self> {
        match self {
            Self::Aggressive => Some(Self::Balanced),
            Self::Balanced => Some(Self::Conservative),
            Self::Conservative => None,
        }
    }
}

/// Thresholds a candidate must meet before it is eligible for hot-swap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationThresholds {
    pub max_latency_us: f64,
    pub min_accuracy: f64,
    pub max_size_bytes: u64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            max_latency_us: 150.0,
            min_accuracy: 0.959,
            max_size_bytes: 64 * 1024,
        }
    }
}

/// Versioned, immutable, self-describing compressed inference artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedModelArtifact {
    pub version: u64,
    pub model_name: String,
    pub level: CompressionLevel,
    /// original_size_bytes / size_bytes.
    pub compression_ratio: f64,
    pub measured_latency_us: f64,
    pub measured_accuracy: f64,
    pub size_bytes: u64,
    pub original_size_bytes: u64,
    pub technique_chain: Vec<Technique>,
    /// Decoded denoising kernel consumed by the Throat gate.
    pub kernel: Arc<[f64]>,
    /// Exported binary blob.
    #[serde(skip, default = "empty_binary")]
    pub binary: Arc<[u8]>,
}

fn empty_binary() -> Arc<[u8]> {
    Arc::from(Vec::new())
}

impl CompressedModelArtifact {
    pub fn summary(&self) -> String {
        let chain: Vec<String> = self.technique_chain.iter().map(|t| t.to_string()).collect();
        format!(
            "{} v{} [{}] ratio={:.2} latency={:.1}us accuracy={:.4} size={}B",
            self.model_name,
            self.version,
            chain.join(" -> "),
            self.compression_ratio,
            self.measured_latency_us,
            self.measured_accuracy,
            self.size_bytes
        )
    }
}

/// Create a bounded artifact handoff channel.
pub fn artifact_channel(capacity: usize) -> (ArtifactPublisher, ArtifactHandoff) {
    let (tx, rx) = bounded(capacity.max(1));
    (ArtifactPublisher { tx }, ArtifactHandoff { rx })
}

/// Producer side, owned by the compression service. Cloneable.
#[derive(Clone)]
pub struct ArtifactPublisher {
    tx: Sender<Arc<CompressedModelArtifact>>,
}

impl ArtifactPublisher {
    /// Publish without blocking.
    pub fn publish(&self, artifact: Arc<CompressedModelArtifact>) -> VenturiResult<()> {
        let version = artifact.version;
        match self.tx.try_send(artifact) {
            Ok(()) => {
                log::debug!("artifact v{version} published");
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(VenturiError::Channel(format!(
                "artifact handoff full, v{version} not published"
            ))),
            Err(TrySendError::Disconnected(_)) => Err(VenturiError::Channel(format!(
                "artifact consumer gone, v{version} not published"
            ))),
        }
    }
}

/// Consumer side, owned by the online loop.
pub struct ArtifactHandoff {
    rx: Receiver<Arc<CompressedModelArtifact>>,
}

impl ArtifactHandoff {
    /// Drain everything published so far and return the newest artifact.
    /// Intermediate artifacts are retired (dropped) here.
    pub fn poll_latest(&self) -> Option<Arc<CompressedModelArtifact>> {
        let mut latest: Option<Arc<CompressedModelArtifact>> = None;
        for artifact in self.rx.try_iter() {
            if let Some(prev) = latest.replace(artifact) {
                log::debug!("artifact v{} superseded before activation", prev.version);
            }
        }
        latest
    }
}
