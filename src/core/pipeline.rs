//! End-to-end analysis runs.
//!
//! A [`Pipeline`] is built once from a validated [`Config`] and can then be
//! run over any number of buffers. Peak detection and artifact classification
//! are independent; a run performs either or both.

use crate::config::Config;
use crate::core::assembler::{AnalysisResult, ResultAssembler};
use crate::core::classifier::{ArtifactClassifier, ClassifierMode, Predictors};
use crate::core::features::{FeatureExtractor, REQUIRED_CHANNELS};
use crate::core::peaks::PeakDetector;
use crate::error::AnalysisError;
use crate::quality::{Annotation, QualityLog};
use crate::signal::{Channel, SignalBuffer};

/// Which analyses a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Analyses {
    /// Detect SCR peaks
    pub peaks: bool,
    /// Classify windows, in the given mode
    pub artifacts: Option<ClassifierMode>,
}

impl Analyses {
    pub fn all(mode: ClassifierMode) -> Self {
        Self {
            peaks: true,
            artifacts: Some(mode),
        }
    }

    pub fn peaks_only() -> Self {
        Self {
            peaks: true,
            artifacts: None,
        }
    }

    pub fn artifacts_only(mode: ClassifierMode) -> Self {
        Self {
            peaks: false,
            artifacts: Some(mode),
        }
    }
}

/// Validated, reusable analysis pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Config,
    detector: PeakDetector,
    extractor: FeatureExtractor,
    classifier: ArtifactClassifier,
    assembler: ResultAssembler,
}

impl Pipeline {
    /// Build a pipeline. Fails if any configuration value is out of range.
    pub fn new(config: Config, predictors: Predictors) -> Result<Self, AnalysisError> {
        config.validate()?;

        Ok(Self {
            detector: PeakDetector::new(config.peaks.clone())?,
            extractor: FeatureExtractor::new(config.windows.clone()),
            classifier: ArtifactClassifier::new(predictors, config.classifier.ambiguity_margin)?,
            assembler: ResultAssembler::from_config(&config.output)?,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn assembler(&self) -> &ResultAssembler {
        &self.assembler
    }

    /// Check that `buffer` can feed every requested analysis.
    pub fn check(&self, buffer: &SignalBuffer, analyses: Analyses) -> Result<(), AnalysisError> {
        if analyses.peaks {
            buffer.require(&[Channel::Eda])?;
        }
        if analyses.artifacts.is_some() {
            buffer.require(&REQUIRED_CHANNELS)?;
            self.config.windows.validate(buffer.sample_rate_hz())?;
        }
        Ok(())
    }

    /// Run the requested analyses over `buffer`.
    ///
    /// The buffer is checked against every requested analysis before any
    /// scan starts.
    pub fn run(
        &self,
        buffer: &SignalBuffer,
        analyses: Analyses,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.check(buffer, analyses)?;

        if (buffer.sample_rate_hz() - self.config.sample_rate_hz).abs() > 1e-9 {
            tracing::warn!(
                buffer_hz = buffer.sample_rate_hz(),
                configured_hz = self.config.sample_rate_hz,
                "Buffer sample rate differs from configuration; using buffer rate"
            );
        }

        let log = QualityLog::new();

        let peaks = if analyses.peaks {
            let peaks = self.detector.detect(buffer)?;
            log.record_peaks(peaks.len() as u64);
            for peak in &peaks {
                log.record_annotations(&peak.annotations());
            }
            peaks
        } else {
            Vec::new()
        };

        let (labels, gaps) = match analyses.artifacts {
            Some(mode) => {
                let extraction = self.extractor.extract(buffer)?;
                log.record_windows_extracted(extraction.vectors.len() as u64);
                for _ in &extraction.gaps {
                    log.record_annotation(Annotation::DataGapSkipped);
                }

                let labels = self.classifier.classify(&extraction.vectors, mode);
                for label in &labels {
                    log.record_label(label.is_unknown());
                    log.record_annotations(&label.annotations);
                }
                (labels, extraction.gaps)
            }
            None => (Vec::new(), Vec::new()),
        };

        let stats = log.stats();
        tracing::info!(
            samples = buffer.len(),
            peaks = stats.peaks_detected,
            windows = stats.windows_classified,
            unknown = stats.unknown_labels,
            gaps = stats.gaps_skipped,
            "Analysis complete"
        );

        Ok(self.assembler.assemble(peaks, labels, gaps, stats))
    }
}
