//! Data-quality tracking for analysis runs.
//!
//! This module counts and names the degraded-but-present results the
//! pipelines produce, so no anomaly is silently dropped.

pub mod log;

// Re-export commonly used types
pub use log::{Annotation, QualityLog, QualityStats};
