//! Configuration for the EDA analysis pipelines.

use crate::core::assembler::OutputFormat;
use crate::core::classifier::ClassifierMode;
use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main configuration for an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Rate the preprocessed signal was resampled to
    pub sample_rate_hz: f64,

    /// Peak detection parameters
    pub peaks: PeakConfig,

    /// Feature window parameters
    pub windows: WindowConfig,

    /// Artifact classifier parameters
    pub classifier: ClassifierConfig,

    /// Output table rendering
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate_hz: 8.0,
            peaks: PeakConfig::default(),
            windows: WindowConfig::default(),
            classifier: ClassifierConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit file.
    pub fn save_to(&self, config_path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("synheart-eda")
            .join("config.json")
    }

    /// Check every section. Runs before any scan begins.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(AnalysisError::invalid(format!(
                "sample rate must be positive, got {}",
                self.sample_rate_hz
            )));
        }
        self.peaks.validate()?;
        self.windows.validate(self.sample_rate_hz)?;
        self.classifier.validate()?;
        self.output.validate()?;
        Ok(())
    }
}

/// Peak detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakConfig {
    /// Minimum rise (uS) from the run's starting minimum to the apex
    pub threshold: f64,

    /// Rising samples before and falling samples after an apex
    pub offset: usize,

    /// How far before the apex to look for the onset
    #[serde(with = "duration_serde")]
    pub max_rise_time: Duration,

    /// How far after the apex to look for 50% recovery
    #[serde(with = "duration_serde")]
    pub max_decay_time: Duration,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            offset: 1,
            max_rise_time: Duration::from_secs(4),
            max_decay_time: Duration::from_secs(4),
        }
    }
}

impl PeakConfig {
    /// Build from raw values, rejecting anything out of range.
    pub fn new(
        threshold: f64,
        offset: usize,
        max_rise_secs: f64,
        max_decay_secs: f64,
    ) -> Result<Self, AnalysisError> {
        let config = Self {
            threshold,
            offset,
            max_rise_time: positive_secs(max_rise_secs, "max_rise_time")?,
            max_decay_time: positive_secs(max_decay_secs, "max_decay_time")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(AnalysisError::invalid(format!(
                "threshold must be positive, got {}",
                self.threshold
            )));
        }
        if self.offset < 1 {
            return Err(AnalysisError::invalid("offset must be at least 1"));
        }
        if self.max_rise_time.is_zero() {
            return Err(AnalysisError::invalid("max_rise_time must be positive"));
        }
        if self.max_decay_time.is_zero() {
            return Err(AnalysisError::invalid("max_decay_time must be positive"));
        }
        Ok(())
    }
}

/// Sliding feature window parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Length of each window
    #[serde(with = "duration_serde")]
    pub size: Duration,

    /// Distance between window starts
    #[serde(with = "duration_serde")]
    pub step: Duration,

    /// Frequency separating "low" from "high" energy (Hz)
    pub hf_cutoff_hz: f64,

    /// Worker threads for feature extraction (1 = sequential)
    pub workers: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            size: Duration::from_secs(5),
            step: Duration::from_secs(5),
            hf_cutoff_hz: 1.0,
            workers: 1,
        }
    }
}

impl WindowConfig {
    /// Build from raw values, rejecting anything out of range.
    pub fn new(size_secs: f64, step_secs: f64) -> Result<Self, AnalysisError> {
        Ok(Self {
            size: positive_secs(size_secs, "window size")?,
            step: positive_secs(step_secs, "window step")?,
            ..Self::default()
        })
    }

    pub fn validate(&self, sample_rate_hz: f64) -> Result<(), AnalysisError> {
        if self.size.is_zero() || self.step.is_zero() {
            return Err(AnalysisError::invalid("window size and step must be positive"));
        }
        if self.size.as_secs_f64() * sample_rate_hz < 2.0 {
            return Err(AnalysisError::invalid(
                "window must span at least two samples",
            ));
        }
        let nyquist = sample_rate_hz / 2.0;
        if !(self.hf_cutoff_hz > 0.0 && self.hf_cutoff_hz < nyquist) {
            return Err(AnalysisError::invalid(format!(
                "hf_cutoff_hz must be in (0, {nyquist}), got {}",
                self.hf_cutoff_hz
            )));
        }
        if self.workers == 0 {
            return Err(AnalysisError::invalid("workers must be at least 1"));
        }
        Ok(())
    }
}

/// Artifact classifier parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Which predictor(s) label the windows
    pub mode: ClassifierMode,

    /// Top-two probability margin below which a label is Unknown
    pub ambiguity_margin: f64,

    /// JSON model for the binary predictor (built-in weights if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_model: Option<PathBuf>,

    /// JSON model for the multiclass predictor (built-in weights if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiclass_model: Option<PathBuf>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            mode: ClassifierMode::Binary,
            ambiguity_margin: 0.05,
            binary_model: None,
            multiclass_model: None,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !(0.0..1.0).contains(&self.ambiguity_margin) {
            return Err(AnalysisError::invalid(format!(
                "ambiguity_margin must be in [0, 1), got {}",
                self.ambiguity_margin
            )));
        }
        Ok(())
    }
}

/// Output table rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Table format
    pub format: OutputFormat,

    /// IANA timezone for rendered timestamps (UTC if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl OutputConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if let Some(ref tz) = self.timezone {
            tz.parse::<chrono_tz::Tz>()
                .map_err(|e| AnalysisError::invalid(format!("unknown timezone '{tz}': {e}")))?;
        }
        Ok(())
    }
}

/// Convert seconds to a positive duration.
fn positive_secs(secs: f64, name: &str) -> Result<Duration, AnalysisError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(AnalysisError::invalid(format!(
            "{name} must be positive, got {secs}"
        ))),
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
}

/// Serde support for Duration as fractional seconds.
mod duration_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
