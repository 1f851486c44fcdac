// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Rolling Performance Window
// ─────────────────────────────────────────────────────────────────────
//! Bounded FIFO of `PerformanceRecord`s with the trend statistics the
//! mode selector needs.

use std::collections::VecDeque;

use venturi_types::PerformanceRecord;

/// Least-squares slope of `values` against their index. 0.0 for fewer
/// than two points.
pub fn least_squares_slope(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let ys: Vec<f64> = values.collect();
    let mean_x = (n - 1) as f64 / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (i, &y) in ys.iter().enumerate() {
        let dx = i as f64 - mean_x;
        sum_xy += dx * (y - mean_y);
        sum_xx += dx * dx;
    }
    sum_xy / sum_xx
}

pub struct PerformanceWindow {
    records: VecDeque<PerformanceRecord>,
    capacity: usize,
    evicted: u64,
}

impl PerformanceWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    pub fn push(&mut self, record: PerformanceRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
            self.evicted += 1;
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn latest(&self) -> Option<&PerformanceRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &PerformanceRecord> + '_ {
        self.records.iter()
    }

    fn mean_of(&self, f: impl Fn(&PerformanceRecord) -> f64) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        self.records.iter().map(f).sum::<f64>() / self.records.len() as f64
    }

    pub fn mean_score(&self) -> f64 {
        self.mean_of(|r| r.score)
    }

    pub fn mean_latency_us(&self) -> f64 {
        self.mean_of(|r| r.latency_us)
    }

    pub fn mean_accuracy(&self) -> f64 {
        self.mean_of(|r| r.accuracy_estimate)
    }

    /// Mean score of the newest `n` records.
    pub fn recent_mean_score(&self, n: usize) -> f64 {
        let n = n.min(self.records.len());
        if n == 0 {
            return 0.0;
        }
        self.records.iter().rev().take(n).map(|r| r.score).sum::<f64>() / n as f64
    }

    pub fn score_slope(&self) -> f64 {
        least_squares_slope(self.records.iter().map(|r| r.score))
    }

    pub fn latency_slope(&self) -> f64 {
        least_squares_slope(self.records.iter().map(|r| r.latency_us))
    }

    /// Relative change between the mean score of the older and newer
    /// halves of the window.
    pub fn improvement_rate(&self) -> f64 {
        let n = self.records.len();
        if n < 2 {
            return 0.0;
        }
        let half = n / 2;
        let older = self.records.iter().take(half).map(|r| r.score).sum::<f64>() / half as f64;
        let newer =
            self.records.iter().skip(half).map(|r| r.score).sum::<f64>() / (n - half) as f64;
        if older.abs() < 1e-12 {
            0.0
        } else {
            (newer - older) / older
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.records.capacity() * std::mem::size_of::<PerformanceRecord>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use venturi_types::{BenchmarkTier, OptimizationMode, TraitVector};

    fn record(seq: u64, score: f64, latency_us: f64) -> PerformanceRecord {
        PerformanceRecord {
            seq,
            timestamp_us: seq,
            latency_us,
            accuracy_estimate: 0.9,
            memory_bytes: 0,
            cpu_load: 0.5,
            impact: 0.0,
            score,
            tier: BenchmarkTier::from_score(score),
            trait_snapshot: TraitVector::default(),
            active_mode: OptimizationMode::Balanced,
            degraded: false,
        }
    }

    #[test]
    fn test_slope_of_line() {
        let s = least_squares_slope([1.0, 3.0, 5.0, 7.0].into_iter());
        assert!((s - 2.0).abs() < 1e-12, "slope {s}");
        assert_eq!(least_squares_slope([4.0].into_iter()), 0.0);
        assert!(least_squares_slope([2.0, 2.0, 2.0].into_iter()).abs() < 1e-12);
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut w = PerformanceWindow::new(5);
        for i in 0..20 {
            w.push(record(i, 0.5, 100.0));
            assert!(w.len() <= 5);
        }
        assert_eq!(w.evicted(), 15);
        assert_eq!(w.iter().next().unwrap().seq, 15);
        assert_eq!(w.latest().unwrap().seq, 19);
    }

    #[test]
    fn test_improvement_rate() {
        let mut w = PerformanceWindow::new(4);
        for (i, s) in [0.4, 0.4, 0.6, 0.6].into_iter().enumerate() {
            w.push(record(i as u64, s, 100.0));
        }
        assert!((w.improvement_rate() - 0.5).abs() < 1e-12);
        assert!(w.score_slope() > 0.0);
        assert!(w.latency_slope().abs() < 1e-12);
    }

    #[test]
    fn test_recent_mean() {
        let mut w = PerformanceWindow::new(8);
        for (i, s) in [0.1, 0.2, 0.9, 0.7].into_iter().enumerate() {
            w.push(record(i as u64, s, 100.0));
        }
        assert!((w.recent_mean_score(2) - 0.8).abs() < 1e-12);
        assert!((w.recent_mean_score(100) - 0.475).abs() < 1e-12);
    }
}
