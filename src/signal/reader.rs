//! Reader for preprocessed signal tables.
//!
//! Expects a header row naming a `Timestamp` column plus any of the canonical
//! channel columns (`EDA`, `AccelX`, `AccelY`, `AccelZ`, `Temp`). Timestamps
//! are either milliseconds since the Unix epoch or RFC3339 strings. Empty
//! cells read as NaN. No resampling or filtering happens here.

use crate::error::BufferDefect;
use crate::signal::types::{Channel, SignalBuffer};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Errors reading a signal table.
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Parse(#[from] csv::Error),

    #[error("input has no header row")]
    MissingHeader,

    #[error("header has no Timestamp column")]
    MissingTimestampColumn,

    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        line: u64,
        expected: u64,
        found: u64,
    },

    #[error("line {line}: invalid timestamp '{value}'")]
    InvalidTimestamp { line: u64, value: String },

    #[error("line {line}: invalid {channel} value '{value}'")]
    InvalidNumber {
        line: u64,
        channel: Channel,
        value: String,
    },

    #[error(transparent)]
    Buffer(#[from] BufferDefect),
}

impl CsvError {
    fn from_record_error(err: csv::Error) -> Self {
        if let csv::ErrorKind::UnequalLengths {
            pos,
            expected_len,
            len,
        } = err.kind()
        {
            return CsvError::FieldCount {
                line: pos.as_ref().map_or(0, |p| p.line()),
                expected: *expected_len,
                found: *len,
            };
        }
        CsvError::Parse(err)
    }
}

/// Read a signal table from a file.
pub fn read_signal_file(path: &Path, sample_rate_hz: f64) -> Result<SignalBuffer, CsvError> {
    let file = std::fs::File::open(path)?;
    read_signal_csv(file, sample_rate_hz)
}

/// Read a signal table from any reader.
pub fn read_signal_csv<R: Read>(reader: R, sample_rate_hz: f64) -> Result<SignalBuffer, CsvError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(CsvError::MissingHeader);
    }

    let timestamp_col = headers
        .iter()
        .position(|n| n.eq_ignore_ascii_case("timestamp"))
        .ok_or(CsvError::MissingTimestampColumn)?;

    // Unknown columns are ignored
    let channel_cols: Vec<(usize, Channel)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, n)| Channel::from_column_name(n).map(|c| (i, c)))
        .collect();

    let mut timestamps = Vec::new();
    let mut columns: BTreeMap<Channel, Vec<f64>> =
        channel_cols.iter().map(|&(_, c)| (c, Vec::new())).collect();

    for result in reader.records() {
        let record = result.map_err(CsvError::from_record_error)?;
        let line = record.position().map_or(0, |p| p.line());

        let raw_ts = record.get(timestamp_col).unwrap_or_default();
        let timestamp = parse_timestamp(raw_ts).ok_or_else(|| CsvError::InvalidTimestamp {
            line,
            value: raw_ts.to_string(),
        })?;
        timestamps.push(timestamp);

        for &(col, channel) in &channel_cols {
            let raw = record.get(col).unwrap_or_default();
            let value = if raw.is_empty() {
                f64::NAN
            } else {
                raw.parse::<f64>().map_err(|_| CsvError::InvalidNumber {
                    line,
                    channel,
                    value: raw.to_string(),
                })?
            };
            if let Some(column) = columns.get_mut(&channel) {
                column.push(value);
            }
        }
    }

    tracing::debug!(
        samples = timestamps.len(),
        channels = columns.len(),
        "Read signal table"
    );

    Ok(SignalBuffer::from_columns(sample_rate_hz, timestamps, columns)?)
}

/// Parse epoch milliseconds or an RFC3339 timestamp.
///
/// Integer milliseconds are exact; fractional milliseconds keep their
/// sub-millisecond part as nanoseconds.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ms) = raw.parse::<i64>() {
        return Utc.timestamp_millis_opt(ms).single();
    }
    if let Ok(ms) = raw.parse::<f64>() {
        if !ms.is_finite() {
            return None;
        }
        let whole = ms.floor();
        let nanos = ((ms - whole) * 1e6).round() as i64;
        return Utc
            .timestamp_millis_opt(whole as i64)
            .single()
            .map(|t| t + Duration::nanoseconds(nanos));
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
