//! Feature computation from signal windows.
//!
//! Each complete window of the buffer yields one fixed-size feature vector
//! describing the EDA level and shape, the acceleration magnitude, and how
//! much of each signal's energy sits above a cutoff frequency. Haar wavelet
//! detail statistics capture abrupt EDA changes typical of contact artifacts.
//!
//! Extraction is deterministic. Windows are independent, so they can be spread
//! over worker threads; results are reordered by window index afterwards.

use crate::config::WindowConfig;
use crate::core::windowing::{DataGap, SignalWindow, WindowManager};
use crate::error::AnalysisError;
use crate::signal::{Channel, SignalBuffer};
use chrono::{DateTime, Utc};
use rustfft::{num_complex::Complex64, FftPlanner};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// EDA level and shape descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdaFeatures {
    /// Mean conductance (uS)
    pub mean: f64,
    /// Population variance (uS^2)
    pub variance: f64,
    pub min: f64,
    pub max: f64,
    /// Least-squares slope (uS/s)
    pub slope: f64,
    /// Largest absolute first derivative (uS/s)
    pub deriv_max_abs: f64,
    /// Mean absolute first derivative (uS/s)
    pub deriv_mean_abs: f64,
    /// Largest absolute second derivative (uS/s^2)
    pub second_deriv_max_abs: f64,
}

/// Acceleration magnitude descriptors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccelFeatures {
    pub magnitude_mean: f64,
    pub magnitude_variance: f64,
    pub magnitude_max: f64,
    /// Standard deviation over mean (0 when the mean is 0)
    pub magnitude_cv: f64,
}

/// Frequency-domain motion proxies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectralFeatures {
    /// Share of EDA energy above the cutoff
    pub eda_hf_energy_ratio: f64,
    /// Share of acceleration magnitude energy above the cutoff
    pub accel_hf_energy_ratio: f64,
}

/// Haar wavelet detail statistics of the EDA channel, three levels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaveletFeatures {
    pub max_abs: [f64; 3],
    pub std: [f64; 3],
}

/// Names of every feature, in vector order.
pub const FEATURE_NAMES: [&str; 20] = [
    "eda_mean",
    "eda_variance",
    "eda_min",
    "eda_max",
    "eda_slope",
    "eda_deriv_max_abs",
    "eda_deriv_mean_abs",
    "eda_second_deriv_max_abs",
    "accel_magnitude_mean",
    "accel_magnitude_variance",
    "accel_magnitude_max",
    "accel_magnitude_cv",
    "eda_hf_energy_ratio",
    "accel_hf_energy_ratio",
    "eda_wavelet_l1_max_abs",
    "eda_wavelet_l1_std",
    "eda_wavelet_l2_max_abs",
    "eda_wavelet_l2_std",
    "eda_wavelet_l3_max_abs",
    "eda_wavelet_l3_std",
];

/// All computed features for a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub eda: EdaFeatures,
    pub accel: AccelFeatures,
    pub spectral: SpectralFeatures,
    pub wavelet: WaveletFeatures,
    /// EDA held one constant value (zero variance)
    pub eda_flat: bool,
}

impl FeatureVector {
    /// Look up a feature by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        let value = match name {
            "eda_mean" => self.eda.mean,
            "eda_variance" => self.eda.variance,
            "eda_min" => self.eda.min,
            "eda_max" => self.eda.max,
            "eda_slope" => self.eda.slope,
            "eda_deriv_max_abs" => self.eda.deriv_max_abs,
            "eda_deriv_mean_abs" => self.eda.deriv_mean_abs,
            "eda_second_deriv_max_abs" => self.eda.second_deriv_max_abs,
            "accel_magnitude_mean" => self.accel.magnitude_mean,
            "accel_magnitude_variance" => self.accel.magnitude_variance,
            "accel_magnitude_max" => self.accel.magnitude_max,
            "accel_magnitude_cv" => self.accel.magnitude_cv,
            "eda_hf_energy_ratio" => self.spectral.eda_hf_energy_ratio,
            "accel_hf_energy_ratio" => self.spectral.accel_hf_energy_ratio,
            "eda_wavelet_l1_max_abs" => self.wavelet.max_abs[0],
            "eda_wavelet_l1_std" => self.wavelet.std[0],
            "eda_wavelet_l2_max_abs" => self.wavelet.max_abs[1],
            "eda_wavelet_l2_std" => self.wavelet.std[1],
            "eda_wavelet_l3_max_abs" => self.wavelet.max_abs[2],
            "eda_wavelet_l3_std" => self.wavelet.std[2],
            _ => return None,
        };
        Some(value)
    }

    /// Every feature as (name, value), in [`FEATURE_NAMES`] order.
    pub fn named(&self) -> Vec<(&'static str, f64)> {
        FEATURE_NAMES
            .iter()
            .filter_map(|&name| self.get(name).map(|v| (name, v)))
            .collect()
    }

    /// Whether the vector cannot be classified meaningfully: EDA without any
    /// variation, or a non-finite feature.
    pub fn is_degenerate(&self) -> bool {
        self.eda_flat || self.named().iter().any(|(_, v)| !v.is_finite())
    }
}

/// Result of feature extraction over a buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// One vector per complete window with usable data
    pub vectors: Vec<FeatureVector>,
    /// Windows skipped because of missing data
    pub gaps: Vec<DataGap>,
}

/// Channels the extractor reads.
pub const REQUIRED_CHANNELS: [Channel; 4] = [
    Channel::Eda,
    Channel::AccelX,
    Channel::AccelY,
    Channel::AccelZ,
];

/// Below this, a window's energy is treated as zero.
const ENERGY_FLOOR: f64 = 1e-20;

/// Number of Haar decomposition levels.
const WAVELET_LEVELS: usize = 3;

/// Computes feature vectors over sliding windows.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: WindowConfig,
}

impl FeatureExtractor {
    pub fn new(config: WindowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Extract features, fanning out to worker threads when configured.
    pub fn extract(&self, buffer: &SignalBuffer) -> Result<Extraction, AnalysisError> {
        self.extract_parallel(buffer, self.config.workers)
    }

    /// Extract features on `workers` scoped threads (1 = on the calling thread).
    pub fn extract_parallel(
        &self,
        buffer: &SignalBuffer,
        workers: usize,
    ) -> Result<Extraction, AnalysisError> {
        self.config.validate(buffer.sample_rate_hz())?;
        buffer.require(&REQUIRED_CHANNELS)?;

        let manager = WindowManager::new(self.config.size, self.config.step, buffer.sample_rate_hz());
        let windows = manager.windows(buffer);

        let results = if workers > 1 && windows.len() > 1 {
            self.compute_parallel(buffer, &manager, &windows, workers)
        } else {
            windows
                .iter()
                .map(|w| self.compute_window(buffer, &manager, w))
                .collect()
        };

        let mut extraction = Extraction::default();
        for result in results {
            match result {
                Ok(vector) => extraction.vectors.push(vector),
                Err(gap) => {
                    tracing::debug!(start = %gap.window_start, reason = ?gap.reason, "Skipping window");
                    extraction.gaps.push(gap);
                }
            }
        }

        if !extraction.gaps.is_empty() {
            tracing::warn!(
                skipped = extraction.gaps.len(),
                total = windows.len(),
                "Windows skipped for missing data"
            );
        }

        Ok(extraction)
    }

    /// Compute windows on scoped worker threads and restore window order.
    fn compute_parallel(
        &self,
        buffer: &SignalBuffer,
        manager: &WindowManager,
        windows: &[SignalWindow],
        workers: usize,
    ) -> Vec<Result<FeatureVector, DataGap>> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<&SignalWindow>();
        let (out_tx, out_rx) = crossbeam_channel::unbounded();

        for window in windows {
            job_tx.send(window).ok();
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for _ in 0..workers.min(windows.len()) {
                let job_rx = job_rx.clone();
                let out_tx = out_tx.clone();
                scope.spawn(move || {
                    for window in job_rx.iter() {
                        let result = self.compute_window(buffer, manager, window);
                        if out_tx.send((window.index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(out_tx);

        let mut indexed: Vec<(usize, Result<FeatureVector, DataGap>)> = out_rx.iter().collect();
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }

    /// Compute the feature vector of one window, or report it as a gap.
    fn compute_window(
        &self,
        buffer: &SignalBuffer,
        manager: &WindowManager,
        window: &SignalWindow,
    ) -> Result<FeatureVector, DataGap> {
        manager
            .check(buffer, window, &REQUIRED_CHANNELS)
            .map_err(|reason| DataGap::new(window, reason))?;

        // Channels are present: check() above verified them
        let slice = |c: Channel| {
            buffer
                .channel(c)
                .map(|v| &v[window.range.clone()])
                .unwrap_or(&[])
        };
        let eda = slice(Channel::Eda);
        let (ax, ay, az) = (
            slice(Channel::AccelX),
            slice(Channel::AccelY),
            slice(Channel::AccelZ),
        );

        let rate = buffer.sample_rate_hz();
        let magnitude: Vec<f64> = ax
            .iter()
            .zip(ay)
            .zip(az)
            .map(|((x, y), z)| (x * x + y * y + z * z).sqrt())
            .collect();

        Ok(FeatureVector {
            window_start: window.start,
            window_end: window.end,
            eda: compute_eda_features(eda, rate),
            accel: compute_accel_features(&magnitude),
            spectral: SpectralFeatures {
                eda_hf_energy_ratio: hf_energy_ratio(eda, rate, self.config.hf_cutoff_hz),
                accel_hf_energy_ratio: hf_energy_ratio(&magnitude, rate, self.config.hf_cutoff_hz),
            },
            wavelet: compute_wavelet_features(eda),
            eda_flat: is_flat(eda),
        })
    }
}

/// Extract features with explicit window parameters.
pub fn extract(
    buffer: &SignalBuffer,
    window_secs: f64,
    step_secs: f64,
) -> Result<Extraction, AnalysisError> {
    FeatureExtractor::new(WindowConfig::new(window_secs, step_secs)?).extract(buffer)
}

/// Compute EDA features from one window of readings.
fn compute_eda_features(eda: &[f64], rate: f64) -> EdaFeatures {
    if eda.is_empty() {
        return EdaFeatures::default();
    }

    let deriv: Vec<f64> = eda.windows(2).map(|p| (p[1] - p[0]) * rate).collect();
    let second: Vec<f64> = deriv.windows(2).map(|p| (p[1] - p[0]) * rate).collect();

    EdaFeatures {
        mean: eda.mean(),
        variance: eda.population_variance(),
        min: eda.iter().copied().fold(f64::INFINITY, f64::min),
        max: eda.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        slope: linear_slope(eda, rate),
        deriv_max_abs: max_abs(&deriv),
        deriv_mean_abs: if deriv.is_empty() {
            0.0
        } else {
            deriv.iter().map(|d| d.abs()).mean()
        },
        second_deriv_max_abs: max_abs(&second),
    }
}

/// Compute acceleration magnitude features.
fn compute_accel_features(magnitude: &[f64]) -> AccelFeatures {
    if magnitude.is_empty() {
        return AccelFeatures::default();
    }

    let mean = magnitude.mean();
    let variance = magnitude.population_variance();
    AccelFeatures {
        magnitude_mean: mean,
        magnitude_variance: variance,
        magnitude_max: magnitude.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        magnitude_cv: if mean.abs() > 0.0 {
            variance.sqrt() / mean.abs()
        } else {
            0.0
        },
    }
}

/// Least-squares slope against time in seconds.
fn linear_slope(values: &[f64], rate: f64) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let t_mean = (n - 1) as f64 / 2.0;
    let v_mean = values.mean();
    let (mut num, mut den) = (0.0, 0.0);
    for (i, v) in values.iter().enumerate() {
        let dt = i as f64 - t_mean;
        num += dt * (v - v_mean);
        den += dt * dt;
    }
    // Per-sample slope converted to per-second
    num / den * rate
}

/// Share of (mean-removed) signal energy above `cutoff_hz`, over the
/// positive-frequency bins of the FFT.
fn hf_energy_ratio(values: &[f64], rate: f64, cutoff_hz: f64) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let mean = values.mean();
    let mut spectrum: Vec<Complex64> = values
        .iter()
        .map(|v| Complex64::new(v - mean, 0.0))
        .collect();
    FftPlanner::<f64>::new()
        .plan_fft_forward(n)
        .process(&mut spectrum);

    let freq_resolution = rate / n as f64;
    let (mut total, mut high) = (0.0, 0.0);
    for (k, bin) in spectrum.iter().enumerate().take(n / 2 + 1).skip(1) {
        let power = bin.norm_sqr();
        total += power;
        if k as f64 * freq_resolution > cutoff_hz {
            high += power;
        }
    }

    if total < ENERGY_FLOOR {
        0.0
    } else {
        high / total
    }
}

/// Haar detail coefficient statistics for the first three levels.
fn compute_wavelet_features(values: &[f64]) -> WaveletFeatures {
    let mut features = WaveletFeatures::default();
    let mut approx = values.to_vec();

    for level in 0..WAVELET_LEVELS {
        // An odd trailing sample is dropped at each level
        let details: Vec<f64> = approx
            .chunks_exact(2)
            .map(|p| (p[0] - p[1]) / std::f64::consts::SQRT_2)
            .collect();
        approx = approx
            .chunks_exact(2)
            .map(|p| (p[0] + p[1]) / std::f64::consts::SQRT_2)
            .collect();

        features.max_abs[level] = max_abs(&details);
        features.std[level] = if details.is_empty() {
            0.0
        } else {
            details.as_slice().population_std_dev()
        };
    }

    features
}

fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

fn is_flat(values: &[f64]) -> bool {
    values.windows(2).all(|p| p[0] == p[1])
}
