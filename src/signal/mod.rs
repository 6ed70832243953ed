//! Signal input for the analysis pipelines.
//!
//! This module provides the multichannel buffer both pipelines read from and a
//! reader for preprocessed signal tables.

pub mod reader;
pub mod types;

// Re-export commonly used types
pub use reader::{read_signal_csv, read_signal_file, CsvError};
pub use types::{seconds_between, Channel, Sample, SignalBuffer, SignalBufferBuilder};
