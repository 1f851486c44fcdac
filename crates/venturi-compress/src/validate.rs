// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Candidate Validation
// ─────────────────────────────────────────────────────────────────────
//! Threshold checks that gate every artifact before hot-swap.
//!
//! A failing candidate is discarded and reported as `ArtifactValidation`
//! with every shortfall listed. `compress_validated` optionally walks one
//! level at a time towards Conservative until a candidate passes.

use std::fmt;

use venturi_types::{
    CompressedModelArtifact, CompressionLevel, ValidationThresholds, VenturiError, VenturiResult,
};

use crate::chain::{compress, Candidate, CandidateMetrics};
use crate::model::{CalibrationSet, ModelDescriptor};
use crate::techniques::import;

/// Relative tolerance for `ratio × size ≈ original`.
pub const RATIO_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub enum Shortfall {
    Latency { measured_us: f64, max_us: f64 },
    Accuracy { measured: f64, min: f64 },
    Size { bytes: u64, max_bytes: u64 },
    /// Non-finite metric or an unusable kernel.
    Malformed(String),
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latency { measured_us, max_us } => {
                write!(f, "latency {measured_us:.1}us > {max_us:.1}us")
            }
            Self::Accuracy { measured, min } => {
                write!(f, "accuracy {:.2}% < {:.2}%", measured * 100.0, min * 100.0)
            }
            Self::Size { bytes, max_bytes } => write!(f, "size {bytes}B > {max_bytes}B"),
            Self::Malformed(reason) => f.write_str(reason),
        }
    }
}

/// Every threshold the metrics miss. Empty means pass.
pub fn check(
    latency_us: f64,
    accuracy: f64,
    size_bytes: u64,
    thresholds: &ValidationThresholds,
) -> Vec<Shortfall> {
    let mut out = Vec::new();
    if !(latency_us.is_finite() && accuracy.is_finite()) {
        out.push(Shortfall::Malformed(format!(
            "non-finite metrics (latency {latency_us}, accuracy {accuracy})"
        )));
        return out;
    }
    if latency_us > thresholds.max_latency_us {
        out.push(Shortfall::Latency {
            measured_us: latency_us,
            max_us: thresholds.max_latency_us,
        });
    }
    if accuracy < thresholds.min_accuracy {
        out.push(Shortfall::Accuracy {
            measured: accuracy,
            min: thresholds.min_accuracy,
        });
    }
    if size_bytes > thresholds.max_size_bytes {
        out.push(Shortfall::Size {
            bytes: size_bytes,
            max_bytes: thresholds.max_size_bytes,
        });
    }
    out
}

pub fn check_metrics(metrics: &CandidateMetrics, thresholds: &ValidationThresholds) -> Vec<Shortfall> {
    check(
        metrics.latency_us,
        metrics.accuracy,
        metrics.size_bytes,
        thresholds,
    )
}

fn kernel_shortfall(kernel: &[f64]) -> Option<Shortfall> {
    if kernel.is_empty() {
        return Some(Shortfall::Malformed("empty kernel".into()));
    }
    if kernel.iter().any(|h| !h.is_finite()) {
        return Some(Shortfall::Malformed("non-finite kernel taps".into()));
    }
    let gain: f64 = kernel.iter().sum();
    if gain <= 1e-12 {
        return Some(Shortfall::Malformed(format!("kernel gain {gain:.3e} not positive")));
    }
    None
}

fn rejection(version: u64, shortfalls: &[Shortfall]) -> VenturiError {
    let reason: Vec<String> = shortfalls.iter().map(|s| s.to_string()).collect();
    VenturiError::ArtifactValidation {
        version,
        reason: reason.join("; "),
    }
}

/// Validate a candidate that would be published as `version`.
pub fn validate_candidate(
    candidate: &Candidate,
    thresholds: &ValidationThresholds,
    version: u64,
) -> VenturiResult<()> {
    let mut shortfalls = check_metrics(&candidate.metrics, thresholds);
    shortfalls.extend(kernel_shortfall(&candidate.kernel));
    if shortfalls.is_empty() {
        Ok(())
    } else {
        Err(rejection(version, &shortfalls))
    }
}

/// Re-validate a finished artifact from its declared metrics.
///
/// Also checks that the declared ratio is consistent with the declared
/// sizes and, when a binary is attached, that it decodes to a model whose
/// kernel matches the one the artifact carries.
pub fn validate_artifact(
    artifact: &CompressedModelArtifact,
    thresholds: &ValidationThresholds,
) -> VenturiResult<()> {
    let mut shortfalls = check(
        artifact.measured_latency_us,
        artifact.measured_accuracy,
        artifact.size_bytes,
        thresholds,
    );
    shortfalls.extend(kernel_shortfall(&artifact.kernel));

    let rebuilt = artifact.compression_ratio * artifact.size_bytes as f64;
    let original = artifact.original_size_bytes as f64;
    if !(rebuilt.is_finite() && (rebuilt - original).abs() <= RATIO_TOLERANCE * original.max(1.0)) {
        shortfalls.push(Shortfall::Malformed(format!(
            "ratio {:.4} × {}B does not match original {}B",
            artifact.compression_ratio, artifact.size_bytes, artifact.original_size_bytes
        )));
    }

    if !artifact.binary.is_empty() {
        match import(&artifact.model_name, &artifact.binary, artifact.measured_accuracy) {
            Ok(model) => {
                let kernel = model.kernel();
                let matches = kernel.len() == artifact.kernel.len()
                    && kernel
                        .iter()
                        .zip(artifact.kernel.iter())
                        .all(|(a, b)| (a - b).abs() <= 1e-9 * (1.0 + b.abs()));
                if !matches {
                    shortfalls.push(Shortfall::Malformed(
                        "binary kernel differs from declared kernel".into(),
                    ));
                }
            }
            Err(e) => shortfalls.push(Shortfall::Malformed(format!("binary unreadable: {e}"))),
        }
    }

    if shortfalls.is_empty() {
        Ok(())
    } else {
        Err(rejection(artifact.version, &shortfalls))
    }
}

/// A validated candidate plus the levels tried to get it.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub candidate: Candidate,
    pub attempts: Vec<CompressionLevel>,
}

/// Compress at `level`, validate, and on failure optionally retry one level
/// less aggressive until Conservative has been tried. Returns the last
/// rejection when nothing passes.
pub fn compress_validated(
    model: &ModelDescriptor,
    calibration: &CalibrationSet,
    level: CompressionLevel,
    thresholds: &ValidationThresholds,
    retry_less_aggressive: bool,
    version: u64,
) -> VenturiResult<Accepted> {
    let mut attempts = Vec::new();
    let mut next = Some(level);
    let mut last_err = None;
    while let Some(level) = next {
        attempts.push(level);
        let candidate = compress(model, calibration, level)?;
        match validate_candidate(&candidate, thresholds, version) {
            Ok(()) => {
                return Ok(Accepted {
                    candidate,
                    attempts,
                })
            }
            Err(e) => {
                log::warn!("{} {:?} candidate rejected: {e}", model.name, level);
                last_err = Some(e);
            }
        }
        next = if retry_less_aggressive {
            level.less_aggressive()
        } else {
            None
        };
    }
    Err(last_err.unwrap_or_else(|| VenturiError::ArtifactValidation {
        version,
        reason: "no candidate produced".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Layer;
    use std::sync::Arc;

    fn thresholds() -> ValidationThresholds {
        ValidationThresholds {
            max_latency_us: 1e6,
            min_accuracy: 0.959,
            max_size_bytes: 64 * 1024,
        }
    }

    fn model() -> ModelDescriptor {
        let taps: Vec<f64> = (0..16).map(|i| 0.8f64.powi(i)).collect();
        ModelDescriptor::new(
            "denoiser",
            vec![
                Layer::conv("c1", taps, 0.0),
                Layer::batch_norm("bn1", 0.5, 0.0),
                Layer::activation("act", 100.0),
            ],
            0.98,
        )
    }

    fn metrics(accuracy: f64) -> CandidateMetrics {
        CandidateMetrics {
            size_bytes: 1000,
            original_size_bytes: 4000,
            compression_ratio: 4.0,
            fidelity: accuracy / 0.98,
            accuracy,
            latency_us: 20.0,
            kernel_gain: 1.0,
        }
    }

    // ── Threshold tests ─────────────────────────────────────────────

    #[test]
    fn test_accuracy_below_threshold_is_rejected() {
        let shortfalls = check_metrics(&metrics(0.94), &thresholds());
        assert_eq!(shortfalls.len(), 1);
        assert!(matches!(shortfalls[0], Shortfall::Accuracy { .. }));
        assert!(shortfalls[0].to_string().contains("94.00%"));
    }

    #[test]
    fn test_all_shortfalls_reported() {
        let t = ValidationThresholds {
            max_latency_us: 10.0,
            min_accuracy: 0.99,
            max_size_bytes: 100,
        };
        assert_eq!(check_metrics(&metrics(0.96), &t).len(), 3);
    }

    #[test]
    fn test_non_finite_metrics_are_malformed() {
        let s = check(f64::NAN, 0.97, 10, &thresholds());
        assert!(matches!(s[0], Shortfall::Malformed(_)));
    }

    #[test]
    fn test_candidate_rejection_is_artifact_validation() {
        let mut cand = compress(&model(), &CalibrationSet::synthetic(2, 64), CompressionLevel::Balanced)
            .unwrap();
        cand.metrics.accuracy = 0.94;
        let err = validate_candidate(&cand, &thresholds(), 5).unwrap_err();
        assert_eq!(err.kind(), "artifact_validation");
        match err {
            VenturiError::ArtifactValidation { version, reason } => {
                assert_eq!(version, 5);
                assert!(reason.contains("accuracy"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    // ── Round-trip tests ────────────────────────────────────────────

    #[test]
    fn test_accepted_artifact_revalidates() {
        let accepted = compress_validated(
            &model(),
            &CalibrationSet::synthetic(3, 128),
            CompressionLevel::Balanced,
            &thresholds(),
            true,
            1,
        )
        .unwrap();
        let artifact = accepted.candidate.into_artifact(1);
        validate_artifact(&artifact, &thresholds()).unwrap();
        validate_artifact(&artifact, &thresholds()).unwrap();
        let rebuilt = artifact.compression_ratio * artifact.size_bytes as f64;
        assert!((rebuilt - artifact.original_size_bytes as f64).abs() < 1e-6);
    }

    #[test]
    fn test_tampered_artifact_fails_revalidation() {
        let cand = compress(&model(), &CalibrationSet::synthetic(2, 64), CompressionLevel::Conservative)
            .unwrap();
        let mut artifact = cand.into_artifact(2);
        artifact.compression_ratio *= 2.0;
        assert!(validate_artifact(&artifact, &thresholds()).is_err());

        let cand = compress(&model(), &CalibrationSet::synthetic(2, 64), CompressionLevel::Conservative)
            .unwrap();
        let mut artifact = cand.into_artifact(3);
        let mut taps = artifact.kernel.to_vec();
        taps[0] += 1.0;
        artifact.kernel = Arc::from(taps);
        let err = validate_artifact(&artifact, &thresholds()).unwrap_err();
        assert!(err.to_string().contains("binary kernel"));
    }

    // ── Retry tests ─────────────────────────────────────────────────

    #[test]
    fn test_retry_walks_towards_conservative() {
        let calib = CalibrationSet::synthetic(3, 128);
        let m = model();
        let accuracy = |level| compress(&m, &calib, level).unwrap().metrics.accuracy;
        let conservative = accuracy(CompressionLevel::Conservative);
        assert!(conservative > accuracy(CompressionLevel::Balanced));
        assert!(conservative > accuracy(CompressionLevel::Aggressive));
        // Only the conservative candidate clears this bar.
        let t = ValidationThresholds {
            min_accuracy: conservative,
            ..thresholds()
        };
        let accepted =
            compress_validated(&m, &calib, CompressionLevel::Aggressive, &t, true, 1).unwrap();
        assert_eq!(accepted.candidate.level, CompressionLevel::Conservative);
        assert_eq!(
            accepted.attempts,
            vec![
                CompressionLevel::Aggressive,
                CompressionLevel::Balanced,
                CompressionLevel::Conservative
            ]
        );
    }

    #[test]
    fn test_no_retry_returns_rejection() {
        let t = ValidationThresholds {
            min_accuracy: 1.0,
            ..thresholds()
        };
        let err = compress_validated(
            &model(),
            &CalibrationSet::synthetic(2, 64),
            CompressionLevel::Aggressive,
            &t,
            false,
            7,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "artifact_validation");
    }
}
