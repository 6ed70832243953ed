//! Skin-conductance response (SCR) peak detection.
//!
//! Peaks are found in a single forward pass over the first difference of the
//! EDA channel. A closed state machine debounces the sign sequence: an apex is
//! only a candidate when at least `offset` rising steps lead into it and at
//! least `offset` falling steps leave it. Candidates whose rise from the run's
//! starting minimum reaches `threshold` are confirmed, then bounded index scans
//! locate the onset (backwards) and the half-recovery point (forwards).
//!
//! Zero differences ("ties") continue whatever run is in progress. They never
//! count as a rising or falling step, so a flat signal never produces a peak.

use crate::config::PeakConfig;
use crate::error::AnalysisError;
use crate::quality::Annotation;
use crate::signal::{seconds_between, Channel, SignalBuffer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A detected skin-conductance response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Time of the apex
    pub apex_time: DateTime<Utc>,
    /// EDA level at the apex (uS)
    pub apex_amplitude: f64,
    /// Time the response started rising
    pub onset_time: DateTime<Utc>,
    /// EDA level at the onset (uS)
    pub onset_amplitude: f64,
    /// First time the signal fell back to half the amplitude, if it did so
    /// within the decay window
    pub half_recovery_time: Option<DateTime<Utc>>,
    /// Seconds from onset to apex
    pub rise_time: f64,
    /// Seconds from apex to half recovery
    pub decay_time: Option<f64>,
    /// Onset was set to the rise-window boundary because no local minimum
    /// was found inside it
    pub onset_clipped: bool,
    /// Steepest rise between onset and apex (uS/s)
    pub max_derivative: f64,
    /// Seconds from the 50% crossing on the rising edge to half recovery
    pub width: Option<f64>,
    /// Amplitude times width (uS*s)
    pub auc: Option<f64>,
    /// Sample index of the apex
    pub apex_index: usize,
    /// Sample index of the onset
    pub onset_index: usize,
}

impl Peak {
    /// Rise in conductance from onset to apex.
    pub fn amplitude(&self) -> f64 {
        self.apex_amplitude - self.onset_amplitude
    }

    /// Whether the decay reached 50% inside the search window.
    pub fn is_resolved(&self) -> bool {
        self.half_recovery_time.is_some()
    }

    /// Qualifications carried by this peak.
    pub fn annotations(&self) -> Vec<Annotation> {
        let mut annotations = Vec::new();
        if self.onset_clipped {
            annotations.push(Annotation::ClippedOnset);
        }
        if !self.is_resolved() {
            annotations.push(Annotation::UnresolvedDecay);
        }
        annotations
    }

    /// End of the time range this peak covers.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.half_recovery_time.unwrap_or(self.apex_time)
    }
}

/// Direction of one sample-to-sample step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Up,
    Down,
    Flat,
    /// Either side of the step is not a finite number
    Invalid,
}

impl Step {
    /// Classify the step from `from` to `to`.
    pub fn between(from: f64, to: f64) -> Self {
        let diff = to - from;
        if !diff.is_finite() {
            Step::Invalid
        } else if diff > 0.0 {
            Step::Up
        } else if diff < 0.0 {
            Step::Down
        } else {
            Step::Flat
        }
    }
}

/// Scanner state. Sample indices refer to the EDA channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// No rise in progress
    Baseline,
    /// Rising from `start`; `top` is the first sample at the current maximum
    Rising { start: usize, top: usize, run: usize },
    /// Falling from an apex that had a long enough rise, not yet debounced
    CandidatePeak {
        start: usize,
        apex: usize,
        fall_run: usize,
    },
    /// Falling with no open candidate; waits for the next rise
    Falling,
}

/// An apex whose shape passed debouncing on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Starting minimum of the rising run
    pub start: usize,
    pub apex: usize,
}

impl ScanState {
    /// Advance over the step from sample `k` to sample `k + 1`.
    ///
    /// Returns the next state and, when the fall after an apex reaches
    /// `offset` steps, the debounced candidate.
    pub fn advance(self, k: usize, step: Step, offset: usize) -> (ScanState, Option<Candidate>) {
        use ScanState::*;

        match (self, step) {
            (_, Step::Invalid) => (Baseline, None),

            (Baseline | Falling, Step::Up) => (
                Rising {
                    start: k,
                    top: k + 1,
                    run: 1,
                },
                None,
            ),
            (Baseline, _) => (Baseline, None),
            (Falling, _) => (Falling, None),

            (Rising { start, run, .. }, Step::Up) => (
                Rising {
                    start,
                    top: k + 1,
                    run: run + 1,
                },
                None,
            ),
            (state @ Rising { .. }, Step::Flat) => (state, None),
            (Rising { start, top, run }, Step::Down) => {
                if run >= offset {
                    Self::falling_from(start, top, 1, offset)
                } else {
                    (Falling, None)
                }
            }

            (CandidatePeak { start, apex, fall_run }, Step::Down) => {
                Self::falling_from(start, apex, fall_run + 1, offset)
            }
            (state @ CandidatePeak { .. }, Step::Flat) => (state, None),
            // A new rise before the fall was long enough breaks the candidate
            (CandidatePeak { .. }, Step::Up) => (
                Rising {
                    start: k,
                    top: k + 1,
                    run: 1,
                },
                None,
            ),
        }
    }

    fn falling_from(
        start: usize,
        apex: usize,
        fall_run: usize,
        offset: usize,
    ) -> (ScanState, Option<Candidate>) {
        if fall_run >= offset {
            (ScanState::Falling, Some(Candidate { start, apex }))
        } else {
            (
                ScanState::CandidatePeak {
                    start,
                    apex,
                    fall_run,
                },
                None,
            )
        }
    }
}

/// Run the debouncing state machine over a series and collect candidates.
///
/// This is independent of the amplitude threshold, which only filters the
/// result.
pub fn scan_candidates(values: &[f64], offset: usize) -> Vec<Candidate> {
    let mut state = ScanState::Baseline;
    let mut candidates = Vec::new();

    for (k, pair) in values.windows(2).enumerate() {
        let (next, candidate) = state.advance(k, Step::between(pair[0], pair[1]), offset);
        if let Some(candidate) = candidate {
            candidates.push(candidate);
        }
        state = next;
    }

    if let ScanState::CandidatePeak { apex, .. } = state {
        tracing::debug!(apex, "Discarding unconfirmed candidate at end of buffer");
    }

    candidates
}

/// Stateless SCR peak detector over a validated configuration.
#[derive(Debug, Clone)]
pub struct PeakDetector {
    config: PeakConfig,
}

impl PeakDetector {
    /// Create a detector, rejecting invalid parameters.
    pub fn new(config: PeakConfig) -> Result<Self, AnalysisError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PeakConfig {
        &self.config
    }

    /// Detect peaks in the EDA channel of `buffer`.
    pub fn detect(&self, buffer: &SignalBuffer) -> Result<Vec<Peak>, AnalysisError> {
        let eda = buffer.channel(Channel::Eda)?;
        let offset = self.config.offset;

        if eda.len() < 2 * offset + 1 {
            tracing::debug!(
                samples = eda.len(),
                offset,
                "Buffer too short for peak detection"
            );
            return Ok(Vec::new());
        }

        let rise_samples = buffer.samples_for(self.config.max_rise_time.as_secs_f64());
        let decay_samples = buffer.samples_for(self.config.max_decay_time.as_secs_f64());

        let peaks: Vec<Peak> = scan_candidates(eda, offset)
            .into_iter()
            .filter(|c| eda[c.apex] - eda[c.start] >= self.config.threshold)
            .map(|c| self.resolve(buffer, eda, c.apex, rise_samples, decay_samples))
            .collect();

        tracing::debug!(peaks = peaks.len(), "Peak detection complete");
        Ok(peaks)
    }

    /// Locate onset and half recovery around a confirmed apex.
    fn resolve(
        &self,
        buffer: &SignalBuffer,
        eda: &[f64],
        apex: usize,
        rise_samples: usize,
        decay_samples: usize,
    ) -> Peak {
        let rate = buffer.sample_rate_hz();

        let (onset, onset_clipped) = find_onset(eda, apex, rise_samples);
        let apex_amplitude = eda[apex];
        let onset_amplitude = eda[onset];
        let half_level = onset_amplitude + 0.5 * (apex_amplitude - onset_amplitude);

        let recovery = find_half_recovery(eda, apex, decay_samples, half_level);
        let half_rise = (onset..=apex).find(|&i| eda[i] >= half_level);

        let apex_time = buffer.timestamp(apex);
        let onset_time = buffer.timestamp(onset);
        let half_recovery_time = recovery.map(|i| buffer.timestamp(i));

        let max_derivative = eda[onset..=apex]
            .windows(2)
            .map(|pair| (pair[1] - pair[0]) * rate)
            .fold(0.0_f64, f64::max);

        let width = match (half_rise, half_recovery_time) {
            (Some(i), Some(end)) => Some(seconds_between(buffer.timestamp(i), end)),
            _ => None,
        };

        if onset_clipped {
            tracing::debug!(apex, onset, "Onset clipped to rise window boundary");
        }
        if recovery.is_none() {
            tracing::debug!(apex, "Decay unresolved within decay window");
        }

        Peak {
            apex_time,
            apex_amplitude,
            onset_time,
            onset_amplitude,
            half_recovery_time,
            rise_time: seconds_between(onset_time, apex_time),
            decay_time: half_recovery_time.map(|t| seconds_between(apex_time, t)),
            onset_clipped,
            max_derivative,
            width,
            auc: width.map(|w| w * (apex_amplitude - onset_amplitude)),
            apex_index: apex,
            onset_index: onset,
        }
    }
}

/// Detect peaks with explicit parameters.
pub fn detect(
    buffer: &SignalBuffer,
    threshold: f64,
    offset: usize,
    max_rise_secs: f64,
    max_decay_secs: f64,
) -> Result<Vec<Peak>, AnalysisError> {
    let config = PeakConfig::new(threshold, offset, max_rise_secs, max_decay_secs)?;
    PeakDetector::new(config)?.detect(buffer)
}

/// Scan backwards from `apex` for the most recent local minimum.
///
/// A local minimum is a sample where the effective direction changes from
/// not-rising to rising; flat steps take the direction of the step before
/// them. Returns the onset index and whether it had to be clipped to the
/// window boundary.
fn find_onset(eda: &[f64], apex: usize, rise_samples: usize) -> (usize, bool) {
    let boundary = apex.saturating_sub(rise_samples);
    let first = boundary.saturating_sub(1);

    // Direction carried into the search window by the last non-flat step
    let mut prev = matches!(
        (0..first)
            .rev()
            .map(|k| Step::between(eda[k], eda[k + 1]))
            .find(|step| *step != Step::Flat),
        Some(Step::Up)
    );

    // rising[k - first] is the effective direction of the step k -> k+1
    let mut rising = Vec::with_capacity(apex - first);
    for pair in eda[first..=apex].windows(2) {
        prev = match Step::between(pair[0], pair[1]) {
            Step::Up => true,
            Step::Down | Step::Invalid => false,
            Step::Flat => prev,
        };
        rising.push(prev);
    }

    (boundary.max(1)..apex)
        .rev()
        .find(|&m| rising[m - first] && !rising[m - 1 - first])
        .map_or((boundary, true), |m| (m, false))
}

/// Scan forwards from `apex` for the first sample at or below `level`.
fn find_half_recovery(eda: &[f64], apex: usize, decay_samples: usize, level: f64) -> Option<usize> {
    let end = (apex + decay_samples).min(eda.len() - 1);
    (apex + 1..=end).find(|&i| eda[i] <= level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    const RATE: f64 = 8.0;

    fn eda_buffer(values: Vec<f64>) -> SignalBuffer {
        let mut channels = BTreeMap::new();
        channels.insert(Channel::Eda, values);
        let start = Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap();
        SignalBuffer::uniform(start, RATE, channels).unwrap()
    }

    /// Flat baseline, linear rise over `rise` samples, linear fall over `fall`.
    fn sawtooth(base: f64, amplitude: f64, lead: usize, rise: usize, fall: usize, tail: usize) -> Vec<f64> {
        let mut values = vec![base; lead + 1];
        for i in 1..=rise {
            values.push(base + amplitude * i as f64 / rise as f64);
        }
        for i in 1..=fall {
            values.push(base + amplitude * (1.0 - i as f64 / fall as f64));
        }
        values.extend(std::iter::repeat(base).take(tail));
        values
    }

    fn detector(threshold: f64, offset: usize) -> PeakDetector {
        PeakDetector::new(PeakConfig::new(threshold, offset, 4.0, 4.0).unwrap()).unwrap()
    }

    #[test]
    fn test_state_machine_debounces_short_runs() {
        // One step up then one step down: needs offset 1
        assert_eq!(scan_candidates(&[0.0, 1.0, 0.0], 1), vec![Candidate { start: 0, apex: 1 }]);
        assert!(scan_candidates(&[0.0, 1.0, 0.0], 2).is_empty());

        // Two up, one down, then rising again: fall run broken for offset 2
        assert!(scan_candidates(&[0.0, 1.0, 2.0, 1.5, 3.0], 2).is_empty());

        // Two up, two down
        assert_eq!(
            scan_candidates(&[0.0, 1.0, 2.0, 1.0, 0.0], 2),
            vec![Candidate { start: 0, apex: 2 }]
        );
    }

    #[test]
    fn test_ties_continue_runs() {
        // Plateau at the top keeps the first maximum sample as apex
        assert_eq!(
            scan_candidates(&[0.0, 1.0, 2.0, 2.0, 2.0, 1.0, 0.0], 2),
            vec![Candidate { start: 0, apex: 2 }]
        );

        // A tie inside the rise neither breaks nor extends it
        assert!(scan_candidates(&[0.0, 1.0, 1.0, 0.5, 0.0], 2).is_empty());
        assert_eq!(
            scan_candidates(&[0.0, 1.0, 1.0, 2.0, 1.0, 1.0, 0.0], 2),
            vec![Candidate { start: 0, apex: 3 }]
        );
    }

    #[test]
    fn test_transition_function() {
        let state = ScanState::Baseline;
        let (state, out) = state.advance(4, Step::Up, 1);
        assert_eq!(state, ScanState::Rising { start: 4, top: 5, run: 1 });
        assert!(out.is_none());

        let (state, out) = state.advance(5, Step::Down, 1);
        assert_eq!(state, ScanState::Falling);
        assert_eq!(out, Some(Candidate { start: 4, apex: 5 }));

        let (state, _) = state.advance(6, Step::Flat, 1);
        assert_eq!(state, ScanState::Falling);

        let (state, _) = ScanState::Rising { start: 0, top: 3, run: 3 }.advance(3, Step::Invalid, 1);
        assert_eq!(state, ScanState::Baseline);
    }

    #[test]
    fn test_short_buffer_yields_nothing() {
        let detector = detector(0.01, 3);
        for len in 0..7 {
            let values: Vec<f64> = (0..len).map(|i| (i as f64 * 0.9).sin()).collect();
            assert!(detector.detect(&eda_buffer(values)).unwrap().is_empty());
        }
    }

    #[test]
    fn test_flat_signal_has_no_peaks() {
        let peaks = detector(0.001, 1).detect(&eda_buffer(vec![2.5; 400])).unwrap();
        assert!(peaks.is_empty());
    }

    #[test]
    fn test_sawtooth_single_peak() {
        let (rise, fall) = (12, 20);
        let values = sawtooth(0.0, 0.3, 8, rise, fall, 40);
        let peaks = detector(0.02, 3).detect(&eda_buffer(values)).unwrap();

        assert_eq!(peaks.len(), 1);
        let peak = &peaks[0];
        assert!((peak.apex_amplitude - 0.3).abs() < 1e-9);
        assert!((peak.rise_time - rise as f64 / RATE).abs() < 1e-9);
        assert_eq!(peak.onset_index, 8);
        assert!(!peak.onset_clipped);
        assert!(peak.onset_time < peak.apex_time);

        // Half of 0.3 is reached halfway down the fall
        let decay = peak.decay_time.unwrap();
        assert!((decay - (fall / 2) as f64 / RATE).abs() < 1e-9);
        assert!(peak.apex_time <= peak.half_recovery_time.unwrap());
        assert!(peak.annotations().is_empty());

        // Steepest step is 0.3 / 12 per sample
        assert!((peak.max_derivative - 0.3 / 12.0 * RATE).abs() < 1e-9);
        assert!(peak.width.is_some());
        assert!(peak.auc.unwrap() > 0.0);
    }

    #[test]
    fn test_subthreshold_peak_rejected() {
        let values = sawtooth(1.0, 0.01, 4, 5, 5, 4);
        assert!(detector(0.02, 1).detect(&eda_buffer(values.clone())).unwrap().is_empty());
        assert_eq!(detector(0.005, 1).detect(&eda_buffer(values)).unwrap().len(), 1);
    }

    #[test]
    fn test_clipped_onset() {
        // Rise lasts 6 seconds but the rise window is 2 seconds
        let values = sawtooth(0.0, 1.0, 4, 48, 8, 4);
        let config = PeakConfig::new(0.02, 1, 2.0, 4.0).unwrap();
        let peaks = PeakDetector::new(config).unwrap().detect(&eda_buffer(values)).unwrap();

        assert_eq!(peaks.len(), 1);
        let peak = &peaks[0];
        assert!(peak.onset_clipped);
        assert_eq!(peak.apex_index - peak.onset_index, 16);
        assert!((peak.rise_time - 2.0).abs() < 1e-9);
        assert!(peak.annotations().contains(&Annotation::ClippedOnset));
    }

    #[test]
    fn test_unresolved_decay_still_emitted() {
        // Falls only a little before the buffer ends
        let mut values = sawtooth(0.0, 1.0, 4, 8, 0, 0);
        values.extend([0.95, 0.9, 0.88]);
        let peaks = detector(0.02, 1).detect(&eda_buffer(values)).unwrap();

        assert_eq!(peaks.len(), 1);
        assert!(peaks[0].half_recovery_time.is_none());
        assert!(peaks[0].decay_time.is_none());
        assert!(peaks[0].width.is_none());
        assert_eq!(peaks[0].annotations(), vec![Annotation::UnresolvedDecay]);
    }

    #[test]
    fn test_nan_resets_scan() {
        let mut values = vec![0.0, 0.1, 0.2, 0.3, f64::NAN, 0.2, 0.1, 0.0];
        assert!(detector(0.02, 2).detect(&eda_buffer(values.clone())).unwrap().is_empty());

        values[4] = 0.4;
        assert_eq!(detector(0.02, 2).detect(&eda_buffer(values)).unwrap().len(), 1);
    }

    #[test]
    fn test_threshold_monotonicity() {
        let mut values = Vec::new();
        for (i, amp) in [0.01, 0.03, 0.05, 0.08, 0.2, 0.015].iter().enumerate() {
            values.extend(sawtooth(1.0 + i as f64 * 0.01, *amp, 6, 5, 7, 6));
        }
        let buffer = eda_buffer(values);

        let mut last = usize::MAX;
        for threshold in [0.001, 0.01, 0.02, 0.04, 0.07, 0.1, 0.5] {
            let count = detector(threshold, 1).detect(&buffer).unwrap().len();
            assert!(count <= last, "threshold {threshold} increased count");
            last = count;
        }
    }

    /// Onset search that derives every direction from the start of the series.
    fn onset_from_full_history(eda: &[f64], apex: usize, rise_samples: usize) -> (usize, bool) {
        let boundary = apex.saturating_sub(rise_samples);
        let mut rising = Vec::new();
        let mut prev = false;
        for pair in eda[..=apex].windows(2) {
            prev = match Step::between(pair[0], pair[1]) {
                Step::Up => true,
                Step::Down | Step::Invalid => false,
                Step::Flat => prev,
            };
            rising.push(prev);
        }
        (boundary.max(1)..apex)
            .rev()
            .find(|&m| rising[m] && !rising[m - 1])
            .map_or((boundary, true), |m| (m, false))
    }

    #[test]
    fn test_onset_search_only_needs_the_rise_window() {
        // Quantized values give plenty of plateaus; one NaN breaks a run
        let mut eda: Vec<f64> = (0..300).map(|i| ((i * 7919 + i / 5) % 13) as f64 / 4.0).collect();
        for v in eda.iter_mut().skip(120).take(20) {
            *v = 1.0;
        }
        eda[200] = f64::NAN;

        for rise_samples in [1, 3, 8, 32, 400] {
            for apex in 1..eda.len() {
                assert_eq!(
                    find_onset(&eda, apex, rise_samples),
                    onset_from_full_history(&eda, apex, rise_samples),
                    "apex {apex}, rise window {rise_samples}"
                );
            }
        }
    }

    #[test]
    fn test_long_recording() {
        // Six hours at 8 Hz with one response every 20 seconds
        let blocks = 1080;
        let mut values = Vec::with_capacity(blocks * 160);
        for _ in 0..blocks {
            values.extend(sawtooth(2.0, 0.05, 39, 8, 24, 88));
        }
        assert_eq!(values.len(), blocks * 160);

        let peaks = detector(0.02, 1).detect(&eda_buffer(values)).unwrap();
        assert_eq!(peaks.len(), blocks);
        for (b, peak) in peaks.iter().enumerate() {
            assert_eq!(peak.onset_index, b * 160 + 39);
            assert_eq!(peak.apex_index, b * 160 + 47);
            assert!(!peak.onset_clipped);
            assert!(peak.is_resolved());
        }
    }

    #[test]
    fn test_missing_eda_channel() {
        let mut channels = BTreeMap::new();
        channels.insert(Channel::AccelX, vec![0.0; 10]);
        let buffer = SignalBuffer::uniform(Utc::now(), RATE, channels).unwrap();

        assert!(matches!(
            detector(0.02, 1).detect(&buffer),
            Err(AnalysisError::MalformedBuffer(_))
        ));
    }

    #[test]
    fn test_detect_rejects_invalid_configuration() {
        let buffer = eda_buffer(vec![0.0; 10]);
        assert!(matches!(
            detect(&buffer, 0.0, 1, 4.0, 4.0),
            Err(AnalysisError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            detect(&buffer, 0.02, 0, 4.0, 4.0),
            Err(AnalysisError::InvalidConfiguration(_))
        ));
    }
}
