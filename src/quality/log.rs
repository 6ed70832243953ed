//! Data-quality log for an analysis run.
//!
//! Degraded results (clipped onsets, unresolved decays, skipped windows,
//! ambiguous labels) are kept in the output rather than dropped. This log
//! counts them so a caller can see at a glance how much of a run is qualified.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A qualification attached to a peak, window or label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annotation {
    /// No local minimum inside the rise window; onset set to the window boundary
    ClippedOnset,
    /// Decay did not reach 50% of the amplitude inside the decay window
    UnresolvedDecay,
    /// Window skipped because of missing readings or a timestamp gap
    DataGapSkipped,
    /// Predictor output was invalid or too close to call
    AmbiguousClassification,
    /// Multiclass said clean while binary did not
    InconsistentPrediction,
    /// Feature vector was non-finite or EDA was flat
    DegenerateFeatures,
}

impl Annotation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Annotation::ClippedOnset => "clipped_onset",
            Annotation::UnresolvedDecay => "unresolved_decay",
            Annotation::DataGapSkipped => "data_gap_skipped",
            Annotation::AmbiguousClassification => "ambiguous_classification",
            Annotation::InconsistentPrediction => "inconsistent_prediction",
            Annotation::DegenerateFeatures => "degenerate_features",
        }
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters for one analysis run.
#[derive(Debug)]
pub struct QualityLog {
    /// Number of peaks emitted
    peaks_detected: AtomicU64,
    /// Number of windows turned into feature vectors
    windows_extracted: AtomicU64,
    /// Number of labels produced
    windows_classified: AtomicU64,
    /// Number of labels that ended up Unknown
    unknown_labels: AtomicU64,
    clipped_onsets: AtomicU64,
    unresolved_decays: AtomicU64,
    gaps_skipped: AtomicU64,
    ambiguous_classifications: AtomicU64,
    inconsistent_predictions: AtomicU64,
    degenerate_windows: AtomicU64,
    /// Run start time
    run_start: DateTime<Utc>,
}

impl QualityLog {
    /// Create a new quality log.
    pub fn new() -> Self {
        Self {
            peaks_detected: AtomicU64::new(0),
            windows_extracted: AtomicU64::new(0),
            windows_classified: AtomicU64::new(0),
            unknown_labels: AtomicU64::new(0),
            clipped_onsets: AtomicU64::new(0),
            unresolved_decays: AtomicU64::new(0),
            gaps_skipped: AtomicU64::new(0),
            ambiguous_classifications: AtomicU64::new(0),
            inconsistent_predictions: AtomicU64::new(0),
            degenerate_windows: AtomicU64::new(0),
            run_start: Utc::now(),
        }
    }

    /// Record emitted peaks.
    pub fn record_peaks(&self, count: u64) {
        self.peaks_detected.fetch_add(count, Ordering::Relaxed);
    }

    /// Record extracted feature windows.
    pub fn record_windows_extracted(&self, count: u64) {
        self.windows_extracted.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a produced label.
    pub fn record_label(&self, unknown: bool) {
        self.windows_classified.fetch_add(1, Ordering::Relaxed);
        if unknown {
            self.unknown_labels.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one annotation.
    pub fn record_annotation(&self, annotation: Annotation) {
        let counter = match annotation {
            Annotation::ClippedOnset => &self.clipped_onsets,
            Annotation::UnresolvedDecay => &self.unresolved_decays,
            Annotation::DataGapSkipped => &self.gaps_skipped,
            Annotation::AmbiguousClassification => &self.ambiguous_classifications,
            Annotation::InconsistentPrediction => &self.inconsistent_predictions,
            Annotation::DegenerateFeatures => &self.degenerate_windows,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record every annotation in a slice.
    pub fn record_annotations(&self, annotations: &[Annotation]) {
        for annotation in annotations {
            self.record_annotation(*annotation);
        }
    }

    /// Get the current statistics.
    pub fn stats(&self) -> QualityStats {
        QualityStats {
            peaks_detected: self.peaks_detected.load(Ordering::Relaxed),
            windows_extracted: self.windows_extracted.load(Ordering::Relaxed),
            windows_classified: self.windows_classified.load(Ordering::Relaxed),
            unknown_labels: self.unknown_labels.load(Ordering::Relaxed),
            clipped_onsets: self.clipped_onsets.load(Ordering::Relaxed),
            unresolved_decays: self.unresolved_decays.load(Ordering::Relaxed),
            gaps_skipped: self.gaps_skipped.load(Ordering::Relaxed),
            ambiguous_classifications: self.ambiguous_classifications.load(Ordering::Relaxed),
            inconsistent_predictions: self.inconsistent_predictions.load(Ordering::Relaxed),
            degenerate_windows: self.degenerate_windows.load(Ordering::Relaxed),
            run_start: self.run_start,
            run_duration_ms: (Utc::now() - self.run_start).num_milliseconds().max(0) as u64,
        }
    }
}

impl Default for QualityLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of quality statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityStats {
    pub peaks_detected: u64,
    pub windows_extracted: u64,
    pub windows_classified: u64,
    pub unknown_labels: u64,
    pub clipped_onsets: u64,
    pub unresolved_decays: u64,
    pub gaps_skipped: u64,
    pub ambiguous_classifications: u64,
    pub inconsistent_predictions: u64,
    pub degenerate_windows: u64,
    pub run_start: DateTime<Utc>,
    pub run_duration_ms: u64,
}

impl QualityStats {
    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        format!(
            "Run Statistics:\n\
             - Peaks detected: {}\n\
             - Windows extracted: {}\n\
             - Windows classified: {} ({} unknown)\n\
             \n\
             Qualified Results:\n\
             - Clipped onsets: {}\n\
             - Unresolved decays: {}\n\
             - Windows skipped for gaps: {}\n\
             - Ambiguous classifications: {}\n\
             - Inconsistent predictions: {}\n\
             - Degenerate windows: {}",
            self.peaks_detected,
            self.windows_extracted,
            self.windows_classified,
            self.unknown_labels,
            self.clipped_onsets,
            self.unresolved_decays,
            self.gaps_skipped,
            self.ambiguous_classifications,
            self.inconsistent_predictions,
            self.degenerate_windows
        )
    }
}
