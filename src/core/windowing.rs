//! Sliding windows over a signal buffer.
//!
//! Windows have a fixed duration and advance by a fixed step, so they may
//! overlap (step < size) or leave space between them (step > size). Only
//! complete windows are produced. A window that contains missing readings or
//! a timestamp jump is reported as a gap instead of being analysed.

use crate::signal::{Channel, SignalBuffer};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A stretch of the buffer analysed as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalWindow {
    /// Position of this window in the plan
    pub index: usize,
    /// Start time of the window
    pub start: DateTime<Utc>,
    /// End time of the window (exclusive)
    pub end: DateTime<Utc>,
    /// Sample indices covered
    pub range: Range<usize>,
}

/// Why a window was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GapReason {
    /// A reading in this channel is NaN or infinite
    MissingValues { channel: Channel },
    /// Consecutive timestamps are further apart than the sample period allows
    TimeGap { after_index: usize },
}

/// A window skipped because of residual missing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataGap {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub reason: GapReason,
}

impl DataGap {
    pub fn new(window: &SignalWindow, reason: GapReason) -> Self {
        Self {
            window_start: window.start,
            window_end: window.end,
            reason,
        }
    }
}

/// Timestamp spacing tolerated before a step counts as a gap, in periods.
const GAP_TOLERANCE_PERIODS: f64 = 1.5;

/// Plans fixed-size windows over a buffer.
#[derive(Debug, Clone)]
pub struct WindowManager {
    /// Samples per window
    size_samples: usize,
    /// Samples between window starts
    step_samples: usize,
    sample_rate_hz: f64,
}

impl WindowManager {
    /// Create a window manager for the given window size and step.
    pub fn new(size: std::time::Duration, step: std::time::Duration, sample_rate_hz: f64) -> Self {
        let to_samples = |d: std::time::Duration| {
            ((d.as_secs_f64() * sample_rate_hz).round() as usize).max(1)
        };
        Self {
            size_samples: to_samples(size),
            step_samples: to_samples(step),
            sample_rate_hz,
        }
    }

    pub fn size_samples(&self) -> usize {
        self.size_samples
    }

    pub fn step_samples(&self) -> usize {
        self.step_samples
    }

    /// Lay out every complete window over `buffer`.
    pub fn windows(&self, buffer: &SignalBuffer) -> Vec<SignalWindow> {
        let span = Duration::nanoseconds(
            (self.size_samples as f64 * 1e9 / self.sample_rate_hz).round() as i64,
        );

        let mut windows = Vec::new();
        let mut first = 0;
        while first + self.size_samples <= buffer.len() {
            let start = buffer.timestamp(first);
            windows.push(SignalWindow {
                index: windows.len(),
                start,
                end: start + span,
                range: first..first + self.size_samples,
            });
            first += self.step_samples;
        }

        let covered = windows.last().map_or(0, |w| w.range.end);
        if covered < buffer.len() {
            tracing::debug!(
                trailing_samples = buffer.len() - covered,
                "Trailing samples do not fill a window"
            );
        }

        windows
    }

    /// Check that a window has complete data in the given channels.
    pub fn check(
        &self,
        buffer: &SignalBuffer,
        window: &SignalWindow,
        channels: &[Channel],
    ) -> Result<(), GapReason> {
        for &channel in channels {
            let values = buffer
                .channel(channel)
                .map_err(|_| GapReason::MissingValues { channel })?;
            if values[window.range.clone()].iter().any(|v| !v.is_finite()) {
                return Err(GapReason::MissingValues { channel });
            }
        }

        let max_step = Duration::nanoseconds(
            (GAP_TOLERANCE_PERIODS * 1e9 / self.sample_rate_hz).round() as i64,
        );
        let timestamps = &buffer.timestamps()[window.range.clone()];
        if let Some(i) = timestamps
            .windows(2)
            .position(|pair| pair[1] - pair[0] > max_step)
        {
            return Err(GapReason::TimeGap {
                after_index: window.range.start + i,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::time::Duration as StdDuration;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap()
    }

    fn buffer(len: usize) -> SignalBuffer {
        let mut channels = BTreeMap::new();
        channels.insert(Channel::Eda, vec![1.0; len]);
        SignalBuffer::uniform(start(), 8.0, channels).unwrap()
    }

    #[test]
    fn test_window_bounds() {
        let manager = WindowManager::new(StdDuration::from_secs(5), StdDuration::from_secs(5), 8.0);
        let windows = manager.windows(&buffer(80));
        let window = &windows[0];

        assert_eq!(window.start, start());
        // End is exclusive: the first sample of the next window
        assert_eq!(window.end, start() + Duration::seconds(5));
        assert_eq!(window.end, windows[1].start);
        assert_eq!(window.range, 0..40);
    }

    #[test]
    fn test_non_overlapping_windows() {
        let manager = WindowManager::new(StdDuration::from_secs(5), StdDuration::from_secs(5), 8.0);
        let windows = manager.windows(&buffer(100));

        // 100 samples = 12.5 s: two full windows, the rest is dropped
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].range, 40..80);
        assert_eq!(windows[1].start, start() + Duration::seconds(5));
        assert_eq!(windows[1].index, 1);
    }

    #[test]
    fn test_overlapping_windows() {
        let manager = WindowManager::new(StdDuration::from_secs(4), StdDuration::from_secs(1), 8.0);
        let windows = manager.windows(&buffer(64));

        // Starts at 0..=4 seconds
        assert_eq!(windows.len(), 5);
        assert_eq!(windows[4].range, 32..64);
    }

    #[test]
    fn test_short_buffer_has_no_windows() {
        let manager = WindowManager::new(StdDuration::from_secs(5), StdDuration::from_secs(5), 8.0);
        assert!(manager.windows(&buffer(39)).is_empty());
    }

    #[test]
    fn test_gap_detection() {
        let mut eda = vec![1.0; 80];
        eda[50] = f64::NAN;
        let mut channels = BTreeMap::new();
        channels.insert(Channel::Eda, eda);
        let buffer = SignalBuffer::uniform(start(), 8.0, channels).unwrap();

        let manager = WindowManager::new(StdDuration::from_secs(5), StdDuration::from_secs(5), 8.0);
        let windows = manager.windows(&buffer);
        assert!(manager.check(&buffer, &windows[0], &[Channel::Eda]).is_ok());
        assert_eq!(
            manager.check(&buffer, &windows[1], &[Channel::Eda]),
            Err(GapReason::MissingValues { channel: Channel::Eda })
        );
        assert_eq!(
            manager.check(&buffer, &windows[0], &[Channel::AccelX]),
            Err(GapReason::MissingValues { channel: Channel::AccelX })
        );
    }

    #[test]
    fn test_time_gap_detection() {
        let mut timestamps: Vec<DateTime<Utc>> =
            (0..40).map(|i| start() + Duration::milliseconds(125 * i)).collect();
        // Drop a second's worth of samples after index 20
        for ts in timestamps.iter_mut().skip(21) {
            *ts += Duration::seconds(1);
        }
        let mut channels = BTreeMap::new();
        channels.insert(Channel::Eda, vec![1.0; 40]);
        let buffer = SignalBuffer::from_columns(8.0, timestamps, channels).unwrap();

        let manager = WindowManager::new(StdDuration::from_secs(5), StdDuration::from_secs(5), 8.0);
        let windows = manager.windows(&buffer);
        assert_eq!(
            manager.check(&buffer, &windows[0], &[Channel::Eda]),
            Err(GapReason::TimeGap { after_index: 20 })
        );
    }
}
