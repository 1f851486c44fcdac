// ─────────────────────────────────────────────────────────────────────
// Venturi Kernel — Sample Frames
// ─────────────────────────────────────────────────────────────────────

use std::fmt;

use serde::{Deserialize, Serialize};

/// One sensor record: a value per channel plus the device timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub channel_values: Vec<f64>,
    /// Capture timestamp in microseconds, as reported by the source.
    pub timestamp_us: u64,
}

impl RawReading {
    pub fn new(channel_values: Vec<f64>, timestamp_us: u64) -> Self {
        Self {
            channel_values,
            timestamp_us,
        }
    }
}

/// Immutable block of `len` readings across `channels` channels.
///
/// Data is stored sample-major: `data[i * channels + ch]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFrame {
    seq: u64,
    timestamp_us: u64,
    channels: usize,
    data: Box<[f64]>,
}

impl SampleFrame {
    /// Build a frame. `data.len()` must be a multiple of `channels`;
    /// callers (the ingest assembler) guarantee that.
    pub fn new(seq: u64, timestamp_us: u64, channels: usize, data: Vec<f64>) -> Self {
        debug_assert!(channels > 0 && data.len() % channels == 0);
        Self {
            seq,
            timestamp_us,
            channels,
            data: data.into_boxed_slice(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of readings (time steps) in the frame.
    pub fn len(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.data.len() / self.channels
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Iterate one channel's samples in time order.
    pub fn channel(&self, ch: usize) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().skip(ch).step_by(self.channels.max(1)).copied()
    }

    /// Index of the first non-finite value, if any.
    pub fn first_non_finite(&self) -> Option<usize> {
        self.data.iter().position(|v| !v.is_finite())
    }

    /// Approximate heap footprint in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f64>()
    }
}

/// The three ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateId {
    Constriction,
    Throat,
    Diffuser,
}

impl GateId {
    pub const ALL: [GateId; 3] = [GateId::Constriction, GateId::Throat, GateId::Diffuser];

    pub fn index(self) -> usize {
        match self {
            Self::Constriction => 0,
            Self::Throat => 1,
            Self::Diffuser => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Constriction => "constriction",
            Self::Throat => "throat",
            Self::Diffuser => "diffuser",
        }
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
