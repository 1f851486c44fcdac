// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Compression Service
// ─────────────────────────────────────────────────────────────────────
//! Worker pool that compresses, validates and publishes artifacts off the
//! hot path.
//!
//! Jobs go through a bounded crossbeam queue and are never waited on by
//! the submitter. Accepted artifacts get the next version and are
//! published through the `ArtifactPublisher`; version assignment and
//! publishing happen under one lock, so the online loop always sees
//! versions in increasing order. A rejected candidate changes nothing:
//! the previously published artifact stays active.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;

use venturi_types::config::CompressionConfig;
use venturi_types::{
    ArtifactPublisher, CompressedModelArtifact, CompressionLevel, VenturiError, VenturiResult,
};

use crate::model::{CalibrationSet, ModelDescriptor};
use crate::validate::compress_validated;

/// One unit of offline work.
#[derive(Debug, Clone)]
pub struct CompressionJob {
    pub model: Arc<ModelDescriptor>,
    pub calibration: Arc<CalibrationSet>,
    /// Falls back to the configured level.
    pub level: Option<CompressionLevel>,
}

impl CompressionJob {
    pub fn new(model: Arc<ModelDescriptor>, calibration: Arc<CalibrationSet>) -> Self {
        Self {
            model,
            calibration,
            level: None,
        }
    }

    pub fn at_level(mut self, level: CompressionLevel) -> Self {
        self.level = Some(level);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Published {
        version: u64,
        model: String,
        level: CompressionLevel,
        attempts: Vec<CompressionLevel>,
    },
    Rejected {
        model: String,
        error: VenturiError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub submitted: u64,
    pub published: u64,
    pub rejected: u64,
    /// Extra attempts spent at less aggressive levels.
    pub retries: u64,
    pub publish_failures: u64,
}

struct Bookkeeping {
    stats: ServiceStats,
    latest: Option<Arc<CompressedModelArtifact>>,
}

struct Shared {
    cfg: CompressionConfig,
    publisher: ArtifactPublisher,
    book: Mutex<Bookkeeping>,
    last_version: AtomicU64,
}

impl Shared {
    fn run(&self, job: CompressionJob) -> JobOutcome {
        let level = job.level.unwrap_or(self.cfg.level);
        let name = job.model.name.clone();
        let prospective = self.last_version.load(Ordering::Acquire) + 1;
        let accepted = compress_validated(
            &job.model,
            &job.calibration,
            level,
            &self.cfg.thresholds,
            self.cfg.retry_less_aggressive,
            prospective,
        );
        let accepted = match accepted {
            Ok(a) => a,
            Err(error) => {
                let mut book = self.book.lock();
                book.stats.rejected += 1;
                log::warn!("{name}: compression rejected, previous artifact retained: {error}");
                return JobOutcome::Rejected { model: name, error };
            }
        };

        let retries = accepted.attempts.len().saturating_sub(1) as u64;
        let level = accepted.candidate.level;
        let mut book = self.book.lock();
        book.stats.retries += retries;
        let version = self.last_version.load(Ordering::Acquire) + 1;
        let artifact = Arc::new(accepted.candidate.into_artifact(version));
        if let Err(error) = self.publisher.publish(Arc::clone(&artifact)) {
            book.stats.publish_failures += 1;
            log::warn!("{name}: {error}");
            return JobOutcome::Rejected { model: name, error };
        }
        self.last_version.store(version, Ordering::Release);
        book.stats.published += 1;
        log::info!("published {}", artifact.summary());
        book.latest = Some(artifact);
        JobOutcome::Published {
            version,
            model: name,
            level,
            attempts: accepted.attempts,
        }
    }
}

pub struct CompressionService {
    shared: Arc<Shared>,
    jobs: Option<Sender<CompressionJob>>,
    outcomes: Receiver<JobOutcome>,
    workers: Vec<JoinHandle<()>>,
}

impl CompressionService {
    /// Spawn `cfg.workers` threads (at least one) on a bounded job queue.
    pub fn start(cfg: CompressionConfig, publisher: ArtifactPublisher) -> VenturiResult<Self> {
        let (job_tx, job_rx) = bounded::<CompressionJob>(cfg.queue_capacity.max(1));
        let (out_tx, out_rx) = unbounded::<JobOutcome>();
        let count = cfg.workers.max(1);
        let shared = Arc::new(Shared {
            cfg,
            publisher,
            book: Mutex::new(Bookkeeping {
                stats: ServiceStats::default(),
                latest: None,
            }),
            last_version: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(count);
        for i in 0..count {
            let rx = job_rx.clone();
            let tx = out_tx.clone();
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("venturi-compress-{i}"))
                .spawn(move || {
                    for job in rx.iter() {
                        if tx.send(shared.run(job)).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|e| VenturiError::Channel(format!("spawn compression worker {i}: {e}")))?;
            workers.push(handle);
        }
        log::debug!("compression service started with {count} worker(s)");
        Ok(Self {
            shared,
            jobs: Some(job_tx),
            outcomes: out_rx,
            workers,
        })
    }

    /// Never blocks. A full queue or stopped service is an error.
    pub fn submit(&self, job: CompressionJob) -> VenturiResult<()> {
        let tx = self
            .jobs
            .as_ref()
            .ok_or_else(|| VenturiError::Shutdown("compression service stopped".into()))?;
        tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(j) => {
                VenturiError::Channel(format!("compression queue full ({})", j.model.name))
            }
            TrySendError::Disconnected(j) => {
                VenturiError::Channel(format!("compression workers gone ({})", j.model.name))
            }
        })?;
        self.shared.book.lock().stats.submitted += 1;
        Ok(())
    }

    pub fn try_outcomes(&self) -> Vec<JobOutcome> {
        self.outcomes.try_iter().collect()
    }

    pub fn recv_outcome_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        self.outcomes.recv_timeout(timeout).ok()
    }

    pub fn stats(&self) -> ServiceStats {
        self.shared.book.lock().stats
    }

    /// Last artifact published, i.e. the one the online loop will run.
    pub fn latest_accepted(&self) -> Option<Arc<CompressedModelArtifact>> {
        self.shared.book.lock().latest.clone()
    }

    pub fn last_version(&self) -> u64 {
        self.shared.last_version.load(Ordering::Acquire)
    }

    /// Close the queue, let workers finish queued jobs and join them.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        if self.jobs.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("compression worker panicked");
            }
        }
        log::debug!("compression service stopped");
    }
}

impl Drop for CompressionService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
