// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Signal Ingest & Framing
// ─────────────────────────────────────────────────────────────────────
//! Reading assembly, bounded queueing, resequencing and the diagnostic
//! ring.
//!
//! Nothing here blocks the data source: a full queue evicts its oldest
//! frame, and a reorder window that overflows skips the missing ids.

use std::collections::{BTreeMap, VecDeque};

use venturi_types::config::IngestConfig;
use venturi_types::{RawReading, SampleFrame, VenturiError, VenturiResult};

/// Collects readings into fixed-length frames with strictly increasing ids.
pub struct FrameAssembler {
    channels: usize,
    frame_len: usize,
    next_seq: u64,
    buf: Vec<f64>,
    first_ts: u64,
    collected: usize,
    taint: Option<String>,
    frames: u64,
    invalid_frames: u64,
}

impl FrameAssembler {
    pub fn new(channels: usize, frame_len: usize) -> Self {
        Self {
            channels,
            frame_len,
            next_seq: 0,
            buf: Vec::with_capacity(channels * frame_len),
            first_ts: 0,
            collected: 0,
            taint: None,
            frames: 0,
            invalid_frames: 0,
        }
    }

    pub fn from_config(cfg: &IngestConfig) -> Self {
        Self::new(cfg.channels, cfg.frame_len)
    }

    /// Sequence id the next completed frame will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn pending_readings(&self) -> usize {
        self.collected
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn invalid_frames(&self) -> u64 {
        self.invalid_frames
    }

    /// Add one reading. Returns the frame once `frame_len` readings are in.
    ///
    /// A frame containing any non-finite value or malformed reading is
    /// rejected as `FrameInvalid`; its sequence id is still consumed.
    pub fn push(&mut self, reading: RawReading) -> VenturiResult<Option<SampleFrame>> {
        if self.collected == 0 {
            self.first_ts = reading.timestamp_us;
        }
        if reading.channel_values.len() != self.channels {
            if self.taint.is_none() {
                self.taint = Some(format!(
                    "reading {} has {} channels, expected {}",
                    self.collected,
                    reading.channel_values.len(),
                    self.channels
                ));
            }
            self.buf.extend(std::iter::repeat(0.0).take(self.channels));
        } else {
            if self.taint.is_none() {
                if let Some(ch) = reading.channel_values.iter().position(|v| !v.is_finite()) {
                    self.taint = Some(format!(
                        "non-finite value at reading {} channel {ch}",
                        self.collected
                    ));
                }
            }
            self.buf.extend_from_slice(&reading.channel_values);
        }
        self.collected += 1;

        if self.collected < self.frame_len {
            return Ok(None);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.collected = 0;
        let data = std::mem::replace(&mut self.buf, Vec::with_capacity(self.channels * self.frame_len));
        if let Some(reason) = self.taint.take() {
            self.invalid_frames += 1;
            log::warn!("frame {seq} rejected: {reason}");
            return Err(VenturiError::FrameInvalid { seq, reason });
        }
        self.frames += 1;
        Ok(Some(SampleFrame::new(seq, self.first_ts, self.channels, data)))
    }

    /// Discard a partially assembled frame.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.collected = 0;
        self.taint = None;
    }
}

/// Validate an externally built frame against the session shape.
pub fn validate_frame(frame: &SampleFrame, channels: usize) -> VenturiResult<()> {
    if frame.channels() != channels
        || frame.is_empty()
        || channels == 0
        || frame.data().len() % channels != 0
    {
        return Err(VenturiError::FrameInvalid {
            seq: frame.seq(),
            reason: format!(
                "{} values over {} channels, expected whole readings of {channels} channels",
                frame.data().len(),
                frame.channels()
            ),
        });
    }
    if let Some(idx) = frame.first_non_finite() {
        return Err(VenturiError::FrameInvalid {
            seq: frame.seq(),
            reason: format!("non-finite value at index {idx}"),
        });
    }
    Ok(())
}

/// Bounded FIFO between ingest and the gates. `push` never blocks.
pub struct FrameQueue {
    buf: VecDeque<SampleFrame>,
    capacity: usize,
    dropped: u64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Enqueue; when full the oldest frame is evicted and returned.
    pub fn push(&mut self, frame: SampleFrame) -> Option<SampleFrame> {
        let evicted = if self.buf.len() >= self.capacity {
            self.dropped += 1;
            let old = self.buf.pop_front();
            if let Some(f) = &old {
                log::warn!("frame queue full, dropped frame {}", f.seq());
            }
            old
        } else {
            None
        };
        self.buf.push_back(frame);
        evicted
    }

    pub fn pop(&mut self) -> Option<SampleFrame> {
        self.buf.pop_front()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped
    }
}

/// Releases frames strictly in sequence-id order.
pub struct Resequencer {
    next_expected: u64,
    window: usize,
    /// `None` marks an id rejected upstream; it is passed over on release.
    pending: BTreeMap<u64, Option<SampleFrame>>,
    violations: u64,
    skipped: u64,
}

impl Resequencer {
    pub fn new(window: usize) -> Self {
        Self::starting_at(0, window)
    }

    pub fn starting_at(first_seq: u64, window: usize) -> Self {
        Self {
            next_expected: first_seq,
            window,
            pending: BTreeMap::new(),
            violations: 0,
            skipped: 0,
        }
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    pub fn waiting(&self) -> usize {
        self.pending.len()
    }

    pub fn violations(&self) -> u64 {
        self.violations
    }

    /// Ids given up on after the reorder window overflowed.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Accept a frame. Late and duplicate ids are `SequenceViolation`.
    pub fn push(&mut self, frame: SampleFrame) -> VenturiResult<()> {
        let seq = frame.seq();
        if seq < self.next_expected || self.pending.contains_key(&seq) {
            self.violations += 1;
            log::warn!(
                "sequence violation: got {seq}, expected {}",
                self.next_expected
            );
            return Err(VenturiError::SequenceViolation {
                expected: self.next_expected,
                got: seq,
            });
        }
        self.pending.insert(seq, Some(frame));
        self.enforce_window();
        Ok(())
    }

    fn enforce_window(&mut self) {
        if self.pending.len() > self.window {
            if let Some(&first) = self.pending.keys().next() {
                if first > self.next_expected {
                    let gap = first - self.next_expected;
                    log::warn!(
                        "reorder window overflow: skipping {gap} missing id(s) {}..{first}",
                        self.next_expected
                    );
                    self.skipped += gap;
                    self.next_expected = first;
                }
            }
        }
    }

    /// Mark an id as consumed without a frame (rejected at ingest) so the
    /// frames behind it are not held back.
    pub fn mark_consumed(&mut self, seq: u64) {
        if seq < self.next_expected || self.pending.contains_key(&seq) {
            return;
        }
        self.pending.insert(seq, None);
        self.enforce_window();
    }

    /// Next in-order frame, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<SampleFrame> {
        loop {
            let slot = self.pending.remove(&self.next_expected)?;
            self.next_expected += 1;
            if let Some(frame) = slot {
                return Some(frame);
            }
        }
    }
}

/// Bounded archive of recent terminal frames.
pub struct DiagnosticRing {
    buf: VecDeque<SampleFrame>,
    capacity: usize,
}

impl DiagnosticRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, frame: SampleFrame) {
        if self.capacity == 0 {
            return;
        }
        if self.buf.len() >= self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn latest(&self) -> Option<&SampleFrame> {
        self.buf.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleFrame> {
        self.buf.iter()
    }

    pub fn size_bytes(&self) -> usize {
        self.buf.iter().map(|f| f.size_bytes()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(values: &[f64], ts: u64) -> RawReading {
        RawReading::new(values.to_vec(), ts)
    }

    fn frame(seq: u64) -> SampleFrame {
        SampleFrame::new(seq, seq * 100, 2, vec![0.0; 4])
    }

    // ── FrameAssembler tests ──────────────────────────────────────

    #[test]
    fn test_assembler_emits_after_frame_len() {
        let mut asm = FrameAssembler::new(2, 3);
        assert!(asm.push(reading(&[1.0, 2.0], 10)).unwrap().is_none());
        assert!(asm.push(reading(&[3.0, 4.0], 20)).unwrap().is_none());
        let f = asm.push(reading(&[5.0, 6.0], 30)).unwrap().unwrap();
        assert_eq!(f.seq(), 0);
        assert_eq!(f.timestamp_us(), 10);
        assert_eq!(f.len(), 3);
        assert_eq!(f.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let ch1: Vec<f64> = f.channel(1).collect();
        assert_eq!(ch1, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_assembler_rejects_non_finite_and_consumes_seq() {
        let mut asm = FrameAssembler::new(2, 2);
        asm.push(reading(&[1.0, f64::NAN], 0)).unwrap();
        let err = asm.push(reading(&[1.0, 1.0], 1)).unwrap_err();
        assert_eq!(err.kind(), "frame_invalid");
        assert!(matches!(err, VenturiError::FrameInvalid { seq: 0, .. }));
        assert_eq!(asm.invalid_frames(), 1);

        asm.push(reading(&[1.0, 1.0], 2)).unwrap();
        let f = asm.push(reading(&[1.0, 1.0], 3)).unwrap().unwrap();
        assert_eq!(f.seq(), 1, "ids must stay strictly increasing");
    }

    #[test]
    fn test_assembler_rejects_wrong_channel_count() {
        let mut asm = FrameAssembler::new(3, 1);
        let err = asm.push(reading(&[1.0, 2.0], 0)).unwrap_err();
        assert!(err.to_string().contains("expected 3"));
    }

    #[test]
    fn test_assembler_reset_discards_partial() {
        let mut asm = FrameAssembler::new(1, 4);
        asm.push(reading(&[1.0], 0)).unwrap();
        asm.reset();
        assert_eq!(asm.pending_readings(), 0);
        assert_eq!(asm.next_seq(), 0);
    }

    #[test]
    fn test_validate_frame() {
        let ok = SampleFrame::new(0, 0, 2, vec![1.0, 2.0]);
        assert!(validate_frame(&ok, 2).is_ok());
        assert!(validate_frame(&ok, 3).is_err());
        let bad = SampleFrame::new(1, 0, 2, vec![f64::INFINITY, f64::NAN]);
        assert!(validate_frame(&bad, 2).is_err());
    }

    #[test]
    fn test_validate_rejects_ragged_frame() {
        // Deserialised frames skip the constructor's shape check.
        let ragged: SampleFrame = serde_json::from_str(
            r#"{"seq":7,"timestamp_us":0,"channels":2,"data":[1.0,2.0,3.0]}"#,
        )
        .unwrap();
        match validate_frame(&ragged, 2) {
            Err(VenturiError::FrameInvalid { seq, .. }) => assert_eq!(seq, 7),
            other => panic!("ragged frame accepted: {other:?}"),
        }
        let zero: SampleFrame = serde_json::from_str(
            r#"{"seq":8,"timestamp_us":0,"channels":0,"data":[1.0]}"#,
        )
        .unwrap();
        assert!(validate_frame(&zero, 0).is_err());
    }

    // ── FrameQueue tests ──────────────────────────────────────────

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let mut q = FrameQueue::new(2);
        assert!(q.push(frame(0)).is_none());
        assert!(q.push(frame(1)).is_none());
        let evicted = q.push(frame(2)).unwrap();
        assert_eq!(evicted.seq(), 0);
        assert_eq!(q.dropped_frames(), 1);
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop().unwrap().seq(), 1);
        assert_eq!(q.pop().unwrap().seq(), 2);
        assert!(q.is_empty());
    }

    // ── Resequencer tests ─────────────────────────────────────────

    #[test]
    fn test_resequencer_reorders() {
        let mut r = Resequencer::new(4);
        r.push(frame(1)).unwrap();
        assert!(r.pop_ready().is_none());
        r.push(frame(0)).unwrap();
        assert_eq!(r.pop_ready().unwrap().seq(), 0);
        assert_eq!(r.pop_ready().unwrap().seq(), 1);
        assert!(r.pop_ready().is_none());
    }

    #[test]
    fn test_resequencer_rejects_duplicate_and_late() {
        let mut r = Resequencer::new(4);
        r.push(frame(0)).unwrap();
        r.pop_ready();
        let late = r.push(frame(0)).unwrap_err();
        assert_eq!(
            late,
            VenturiError::SequenceViolation {
                expected: 1,
                got: 0
            }
        );
        r.push(frame(2)).unwrap();
        assert!(r.push(frame(2)).is_err());
        assert_eq!(r.violations(), 2);
    }

    #[test]
    fn test_resequencer_skips_gap_on_overflow() {
        let mut r = Resequencer::new(2);
        // id 0 never arrives
        r.push(frame(1)).unwrap();
        r.push(frame(2)).unwrap();
        r.push(frame(3)).unwrap();
        assert_eq!(r.skipped(), 1);
        let ids: Vec<u64> = std::iter::from_fn(|| r.pop_ready()).map(|f| f.seq()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_resequencer_mark_consumed() {
        let mut r = Resequencer::new(4);
        r.mark_consumed(0);
        r.push(frame(1)).unwrap();
        assert_eq!(r.pop_ready().unwrap().seq(), 1);
    }

    #[test]
    fn test_resequencer_mark_consumed_ahead_of_cursor() {
        let mut r = Resequencer::new(4);
        r.mark_consumed(1);
        r.push(frame(2)).unwrap();
        assert!(r.pop_ready().is_none(), "id 0 still outstanding");
        r.push(frame(0)).unwrap();
        let ids: Vec<u64> = std::iter::from_fn(|| r.pop_ready()).map(|f| f.seq()).collect();
        assert_eq!(ids, vec![0, 2]);
        assert!(r.push(frame(1)).is_err(), "rejected id cannot be replayed");
    }

    // ── DiagnosticRing tests ──────────────────────────────────────

    #[test]
    fn test_ring_is_bounded() {
        let mut ring = DiagnosticRing::new(3);
        for i in 0..10 {
            ring.push(frame(i));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.latest().unwrap().seq(), 9);
        let ids: Vec<u64> = ring.iter().map(|f| f.seq()).collect();
        assert_eq!(ids, vec![7, 8, 9]);
    }
}
