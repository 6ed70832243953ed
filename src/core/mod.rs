//! Core analysis for EDA recordings.
//!
//! This module contains:
//! - SCR peak detection over the EDA channel
//! - Window management and gap detection
//! - Feature computation from signal windows
//! - Artifact classification of feature windows
//! - Result assembly and table rendering
//! - The pipeline running all of the above

pub mod assembler;
pub mod classifier;
pub mod features;
pub mod peaks;
pub mod pipeline;
pub mod windowing;

// Re-export commonly used types
pub use assembler::{
    AnalysisResult, OutputFormat, RenderError, ResultAssembler, Table, PRODUCER_NAME,
};
pub use classifier::{
    ArtifactClassifier, BinaryClass, ClassProbabilities, ClassifierMode, Label, LinearModel,
    ModelError, MulticlassClass, Predictor, Predictors,
};
pub use features::{Extraction, FeatureExtractor, FeatureVector, FEATURE_NAMES, REQUIRED_CHANNELS};
pub use peaks::{Peak, PeakDetector};
pub use pipeline::{Analyses, Pipeline};
pub use windowing::{DataGap, GapReason, SignalWindow, WindowManager};
