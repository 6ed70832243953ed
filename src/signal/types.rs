//! Time-indexed multichannel signal buffer.
//!
//! The buffer is produced by the preprocessing stage (resampled, gap-filled,
//! low-pass filtered) and is immutable once built. Residual missing readings
//! may be present as NaN; they are never fabricated here.

use crate::error::BufferDefect;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A named sensor channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Skin conductance in microsiemens
    Eda,
    AccelX,
    AccelY,
    AccelZ,
    /// Skin temperature
    Temp,
}

impl Channel {
    /// All channels in canonical column order.
    pub const ALL: [Channel; 5] = [
        Channel::Eda,
        Channel::AccelX,
        Channel::AccelY,
        Channel::AccelZ,
        Channel::Temp,
    ];

    /// The three accelerometer axes.
    pub const ACCEL: [Channel; 3] = [Channel::AccelX, Channel::AccelY, Channel::AccelZ];

    /// Canonical column name.
    pub fn column_name(&self) -> &'static str {
        match self {
            Channel::Eda => "EDA",
            Channel::AccelX => "AccelX",
            Channel::AccelY => "AccelY",
            Channel::AccelZ => "AccelZ",
            Channel::Temp => "Temp",
        }
    }

    /// Look up a channel by column name (case-insensitive).
    pub fn from_column_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.column_name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// One reading across all channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// Skin conductance (uS)
    pub eda: f64,
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub temp: f64,
}

impl Sample {
    fn value(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Eda => self.eda,
            Channel::AccelX => self.accel_x,
            Channel::AccelY => self.accel_y,
            Channel::AccelZ => self.accel_z,
            Channel::Temp => self.temp,
        }
    }
}

/// An ordered, uniformly-sampled sequence of readings stored column-wise.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalBuffer {
    sample_rate_hz: f64,
    timestamps: Vec<DateTime<Utc>>,
    channels: BTreeMap<Channel, Vec<f64>>,
}

impl SignalBuffer {
    /// Build a buffer from pre-assembled columns.
    ///
    /// Every column must have one reading per timestamp, and timestamps must be
    /// strictly increasing. Channels may be omitted; operations that need them
    /// will report the absence.
    pub fn from_columns(
        sample_rate_hz: f64,
        timestamps: Vec<DateTime<Utc>>,
        channels: BTreeMap<Channel, Vec<f64>>,
    ) -> Result<Self, BufferDefect> {
        if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
            return Err(BufferDefect::InvalidSampleRate(sample_rate_hz));
        }

        if let Some(index) = timestamps
            .windows(2)
            .position(|pair| pair[1] <= pair[0])
            .map(|i| i + 1)
        {
            return Err(BufferDefect::NonIncreasingTimestamp { index });
        }

        for (&channel, values) in &channels {
            if values.len() != timestamps.len() {
                return Err(BufferDefect::LengthMismatch {
                    channel,
                    expected: timestamps.len(),
                    found: values.len(),
                });
            }
        }

        Ok(Self {
            sample_rate_hz,
            timestamps,
            channels,
        })
    }

    /// Build a buffer whose timestamps are generated from `start` at the
    /// nominal sample spacing.
    pub fn uniform(
        start: DateTime<Utc>,
        sample_rate_hz: f64,
        channels: BTreeMap<Channel, Vec<f64>>,
    ) -> Result<Self, BufferDefect> {
        if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
            return Err(BufferDefect::InvalidSampleRate(sample_rate_hz));
        }
        let len = channels.values().map(Vec::len).max().unwrap_or(0);
        let timestamps = (0..len)
            .map(|i| start + offset_duration(i, sample_rate_hz))
            .collect();
        Self::from_columns(sample_rate_hz, timestamps, channels)
    }

    /// Nominal sample rate in Hz.
    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    /// Nominal spacing between samples in seconds.
    pub fn period_secs(&self) -> f64 {
        1.0 / self.sample_rate_hz
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    /// Timestamp of sample `index`. Panics if out of range.
    pub fn timestamp(&self, index: usize) -> DateTime<Utc> {
        self.timestamps[index]
    }

    /// Check whether a channel is present.
    pub fn has_channel(&self, channel: Channel) -> bool {
        self.channels.contains_key(&channel)
    }

    /// Get the readings of one channel.
    pub fn channel(&self, channel: Channel) -> Result<&[f64], BufferDefect> {
        self.channels
            .get(&channel)
            .map(Vec::as_slice)
            .ok_or(BufferDefect::MissingChannel(channel))
    }

    /// Require that all listed channels are present.
    pub fn require(&self, channels: &[Channel]) -> Result<(), BufferDefect> {
        match channels.iter().find(|c| !self.has_channel(**c)) {
            Some(&missing) => Err(BufferDefect::MissingChannel(missing)),
            None => Ok(()),
        }
    }

    /// Convert a number of seconds into a whole number of samples (at least 1).
    pub fn samples_for(&self, secs: f64) -> usize {
        ((secs * self.sample_rate_hz).round() as usize).max(1)
    }

    /// Reassemble a row. Absent channels read as NaN.
    pub fn sample(&self, index: usize) -> Option<Sample> {
        let timestamp = *self.timestamps.get(index)?;
        let read = |c: Channel| {
            self.channels
                .get(&c)
                .and_then(|v| v.get(index))
                .copied()
                .unwrap_or(f64::NAN)
        };
        Some(Sample {
            timestamp,
            eda: read(Channel::Eda),
            accel_x: read(Channel::AccelX),
            accel_y: read(Channel::AccelY),
            accel_z: read(Channel::AccelZ),
            temp: read(Channel::Temp),
        })
    }
}

/// Append-only builder for a [`SignalBuffer`] with all channels present.
#[derive(Debug)]
pub struct SignalBufferBuilder {
    sample_rate_hz: f64,
    timestamps: Vec<DateTime<Utc>>,
    columns: BTreeMap<Channel, Vec<f64>>,
}

impl SignalBufferBuilder {
    pub fn new(sample_rate_hz: f64) -> Self {
        Self {
            sample_rate_hz,
            timestamps: Vec::new(),
            columns: Channel::ALL.into_iter().map(|c| (c, Vec::new())).collect(),
        }
    }

    /// Append a sample. Timestamps must be strictly increasing.
    pub fn push(&mut self, sample: Sample) -> Result<(), BufferDefect> {
        if let Some(&last) = self.timestamps.last() {
            if sample.timestamp <= last {
                return Err(BufferDefect::NonIncreasingTimestamp {
                    index: self.timestamps.len(),
                });
            }
        }

        self.timestamps.push(sample.timestamp);
        for (channel, column) in self.columns.iter_mut() {
            column.push(sample.value(*channel));
        }
        Ok(())
    }

    /// Number of samples appended so far.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn build(self) -> Result<SignalBuffer, BufferDefect> {
        SignalBuffer::from_columns(self.sample_rate_hz, self.timestamps, self.columns)
    }
}

/// Offset of sample `index` from the start of a uniform series.
fn offset_duration(index: usize, sample_rate_hz: f64) -> Duration {
    Duration::nanoseconds((index as f64 * 1e9 / sample_rate_hz).round() as i64)
}

/// Seconds elapsed from `start` to `end`.
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start)
        .num_microseconds()
        .map_or(f64::INFINITY, |us| us as f64 / 1e6)
}
