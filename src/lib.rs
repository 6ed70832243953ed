//! Synheart EDA - peak and artifact analysis for electrodermal activity.
//!
//! This library analyses preprocessed wrist-sensor recordings (skin
//! conductance plus a 3-axis accelerometer) in two independent ways:
//!
//! - **Peak detection**: skin-conductance responses (SCRs) with onset, apex,
//!   half-recovery and shape descriptors
//! - **Artifact classification**: fixed-length windows labelled clean or
//!   artifact (binary), or by artifact subtype (multiclass)
//!
//! Degraded results are never dropped silently. Clipped onsets, unresolved
//! decays, skipped windows and untrustworthy labels all carry annotations and
//! are counted in the run's quality statistics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Synheart EDA                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                    ┌─────────────┐                           │
//! │               ┌───▶│    Peaks    │──────────────┐            │
//! │               │    │  (SCR FSM)  │              ▼            │
//! │  ┌─────────┐  │    └─────────────┘       ┌─────────────┐    │
//! │  │ Signal  │──┤                          │  Assembler  │    │
//! │  │ Buffer  │  │    ┌─────────────┐       │  (tables)   │    │
//! │  └─────────┘  └───▶│  Windowing  │       └─────────────┘    │
//! │                    │ + Features  │              ▲            │
//! │                    └──────┬──────┘              │            │
//! │                           ▼                     │            │
//! │                    ┌─────────────┐              │            │
//! │                    │ Classifier  │──────────────┘            │
//! │                    │ (predictor) │                           │
//! │                    └─────────────┘                           │
//! │                                                              │
//! │   Quality log: annotations and counters for the whole run    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use synheart_eda::{read_signal_file, Analyses, ClassifierMode, Config, Pipeline, Predictors};
//! use std::path::Path;
//!
//! let config = Config::default();
//! let buffer = read_signal_file(Path::new("recording.csv"), config.sample_rate_hz)?;
//!
//! let pipeline = Pipeline::new(config, Predictors::default())?;
//! let result = pipeline.run(&buffer, Analyses::all(ClassifierMode::Both))?;
//!
//! println!("{} peaks, {} windows", result.peaks.len(), result.labels.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod quality;
pub mod signal;

// Re-export key types at crate root for convenience
pub use config::{ClassifierConfig, Config, ConfigError, OutputConfig, PeakConfig, WindowConfig};
pub use core::{
    Analyses, AnalysisResult, ArtifactClassifier, BinaryClass, ClassifierMode, FeatureExtractor,
    FeatureVector, Label, LinearModel, MulticlassClass, OutputFormat, Peak, PeakDetector,
    Pipeline, Predictor, Predictors, ResultAssembler, Table,
};
pub use error::{AnalysisError, BufferDefect};
pub use quality::{Annotation, QualityLog, QualityStats};
pub use signal::{read_signal_csv, read_signal_file, Channel, Sample, SignalBuffer};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
