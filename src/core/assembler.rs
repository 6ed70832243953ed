//! Result assembly and table rendering.
//!
//! Peaks, labels and skipped windows all live on the buffer's timeline. The
//! assembler bundles them with run metadata into an [`AnalysisResult`] and
//! renders three views of it: a peak table, a label table, and a merged
//! timeline sorted by start time. Peaks and labels keep their own time
//! ranges; overlapping entries are listed side by side, never merged.

use crate::config::OutputConfig;
use crate::core::classifier::{ClassProbabilities, Label};
use crate::core::peaks::Peak;
use crate::core::windowing::{DataGap, GapReason};
use crate::error::AnalysisError;
use crate::quality::{Annotation, QualityStats};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Version of the result layout.
pub const RESULT_VERSION: &str = "1.0";

/// The name of this producer.
pub const PRODUCER_NAME: &str = "synheart-eda";

/// Table output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{other}' (expected csv or json)")),
        }
    }
}

/// Which view of a result to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Peaks,
    Labels,
    Timeline,
}

impl Table {
    /// Column names, in output order.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::Peaks => &[
                "onset_time",
                "apex_time",
                "half_recovery_time",
                "apex_amplitude",
                "onset_amplitude",
                "amplitude",
                "rise_time",
                "decay_time",
                "max_derivative",
                "width",
                "auc",
                "onset_clipped",
            ],
            Table::Labels => &[
                "window_start",
                "window_end",
                "binary_label",
                "multiclass_label",
                "binary_probabilities",
                "multiclass_probabilities",
                "annotations",
            ],
            Table::Timeline => &["start", "end", "kind", "description"],
        }
    }
}

/// Errors rendering a table.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV output is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Producer metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    /// Name of the producing software
    pub name: String,
    /// Version of the producing software
    pub version: String,
    /// Unique instance identifier (UUID)
    pub instance_id: String,
}

/// Everything one analysis run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub result_version: String,
    /// Unique per run
    pub run_id: Uuid,
    pub computed_at_utc: DateTime<Utc>,
    pub producer: Producer,
    pub peaks: Vec<Peak>,
    pub labels: Vec<Label>,
    /// Windows skipped for missing data
    pub gaps: Vec<DataGap>,
    pub quality: QualityStats,
}

/// One row of the peak table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakRow {
    pub onset_time: String,
    pub apex_time: String,
    pub half_recovery_time: Option<String>,
    pub apex_amplitude: f64,
    pub onset_amplitude: f64,
    pub amplitude: f64,
    pub rise_time: f64,
    pub decay_time: Option<f64>,
    pub max_derivative: f64,
    pub width: Option<f64>,
    pub auc: Option<f64>,
    pub onset_clipped: bool,
}

/// One row of the label table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelRow {
    pub window_start: String,
    pub window_end: String,
    pub binary_label: Option<String>,
    pub multiclass_label: Option<String>,
    pub binary_probabilities: Option<String>,
    pub multiclass_probabilities: Option<String>,
    pub annotations: String,
}

/// Kind of entry on the merged timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Peak,
    Window,
    Gap,
}

/// One row of the merged timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineRow {
    pub start: String,
    pub end: String,
    pub kind: TimelineKind,
    pub description: String,
}

/// Builds results and renders their tables.
#[derive(Debug, Clone)]
pub struct ResultAssembler {
    instance_id: Uuid,
    timezone: Option<Tz>,
}

impl ResultAssembler {
    /// Create an assembler rendering timestamps in UTC.
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            timezone: None,
        }
    }

    /// Render timestamps in the given timezone.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = Some(timezone);
        self
    }

    /// Create an assembler from output settings.
    pub fn from_config(config: &OutputConfig) -> Result<Self, AnalysisError> {
        let assembler = Self::new();
        match config.timezone {
            Some(ref name) => {
                let tz = name
                    .parse::<Tz>()
                    .map_err(|e| AnalysisError::invalid(format!("unknown timezone '{name}': {e}")))?;
                Ok(assembler.with_timezone(tz))
            }
            None => Ok(assembler),
        }
    }

    /// Get the instance ID.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Bundle the outputs of one run.
    pub fn assemble(
        &self,
        peaks: Vec<Peak>,
        labels: Vec<Label>,
        gaps: Vec<DataGap>,
        quality: QualityStats,
    ) -> AnalysisResult {
        AnalysisResult {
            result_version: RESULT_VERSION.to_string(),
            run_id: Uuid::new_v4(),
            computed_at_utc: Utc::now(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                instance_id: self.instance_id.to_string(),
            },
            peaks,
            labels,
            gaps,
            quality,
        }
    }

    /// Render a timestamp in the configured timezone.
    pub fn format_time(&self, time: DateTime<Utc>) -> String {
        match self.timezone {
            Some(tz) => time.with_timezone(&tz).to_rfc3339(),
            None => time.to_rfc3339(),
        }
    }

    pub fn peak_rows(&self, result: &AnalysisResult) -> Vec<PeakRow> {
        result
            .peaks
            .iter()
            .map(|p| PeakRow {
                onset_time: self.format_time(p.onset_time),
                apex_time: self.format_time(p.apex_time),
                half_recovery_time: p.half_recovery_time.map(|t| self.format_time(t)),
                apex_amplitude: p.apex_amplitude,
                onset_amplitude: p.onset_amplitude,
                amplitude: p.amplitude(),
                rise_time: p.rise_time,
                decay_time: p.decay_time,
                max_derivative: p.max_derivative,
                width: p.width,
                auc: p.auc,
                onset_clipped: p.onset_clipped,
            })
            .collect()
    }

    pub fn label_rows(&self, result: &AnalysisResult) -> Vec<LabelRow> {
        result
            .labels
            .iter()
            .map(|l| LabelRow {
                window_start: self.format_time(l.window_start),
                window_end: self.format_time(l.window_end),
                binary_label: l.binary.map(|c| c.as_str().to_string()),
                multiclass_label: l.multiclass.map(|c| c.as_str().to_string()),
                binary_probabilities: l.binary_probabilities.as_ref().map(ClassProbabilities::render),
                multiclass_probabilities: l
                    .multiclass_probabilities
                    .as_ref()
                    .map(ClassProbabilities::render),
                annotations: join_annotations(&l.annotations),
            })
            .collect()
    }

    /// Peaks, labels and gaps on one timeline, sorted by start time.
    pub fn timeline_rows(&self, result: &AnalysisResult) -> Vec<TimelineRow> {
        let mut entries: Vec<(DateTime<Utc>, DateTime<Utc>, TimelineKind, String)> = Vec::new();

        for peak in &result.peaks {
            let mut description = format!("amplitude={:.4} uS", peak.amplitude());
            let annotations = peak.annotations();
            if !annotations.is_empty() {
                description.push_str(&format!(" [{}]", join_annotations(&annotations)));
            }
            entries.push((peak.onset_time, peak.end_time(), TimelineKind::Peak, description));
        }

        for label in &result.labels {
            let mut parts = Vec::new();
            if let Some(binary) = label.binary {
                parts.push(format!("binary={}", binary.as_str()));
            }
            if let Some(multiclass) = label.multiclass {
                parts.push(format!("multiclass={}", multiclass.as_str()));
            }
            if !label.annotations.is_empty() {
                parts.push(format!("[{}]", join_annotations(&label.annotations)));
            }
            entries.push((
                label.window_start,
                label.window_end,
                TimelineKind::Window,
                parts.join(" "),
            ));
        }

        for gap in &result.gaps {
            let description = match gap.reason {
                GapReason::MissingValues { channel } => format!("missing {channel} readings"),
                GapReason::TimeGap { after_index } => {
                    format!("timestamp gap after sample {after_index}")
                }
            };
            entries.push((gap.window_start, gap.window_end, TimelineKind::Gap, description));
        }

        // Stable: equal starts keep peak, window, gap order
        entries.sort_by(|a, b| a.0.cmp(&b.0).then(a.2.cmp(&b.2)));

        entries
            .into_iter()
            .map(|(start, end, kind, description)| TimelineRow {
                start: self.format_time(start),
                end: self.format_time(end),
                kind,
                description,
            })
            .collect()
    }

    /// Render one table in the given format.
    pub fn render(
        &self,
        result: &AnalysisResult,
        table: Table,
        format: OutputFormat,
    ) -> Result<String, RenderError> {
        match table {
            Table::Peaks => render_rows(&self.peak_rows(result), table, format),
            Table::Labels => render_rows(&self.label_rows(result), table, format),
            Table::Timeline => render_rows(&self.timeline_rows(result), table, format),
        }
    }

    /// Render the whole result as JSON.
    pub fn render_result(&self, result: &AnalysisResult) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(result)
    }
}

impl Default for ResultAssembler {
    fn default() -> Self {
        Self::new()
    }
}

fn render_rows<R: Serialize>(
    rows: &[R],
    table: Table,
    format: OutputFormat,
) -> Result<String, RenderError> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(rows)?),
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            if rows.is_empty() {
                // serialize() derives the header from the first row
                writer.write_record(table.columns())?;
            }
            for row in rows {
                writer.serialize(row)?;
            }
            let bytes = writer.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
            Ok(String::from_utf8(bytes)?)
        }
    }
}

fn join_annotations(annotations: &[Annotation]) -> String {
    annotations
        .iter()
        .map(Annotation::as_str)
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::{BinaryClass, MulticlassClass};
    use crate::quality::QualityLog;
    use crate::signal::Channel;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn peak(onset: i64, apex: i64, recovery: Option<i64>) -> Peak {
        Peak {
            apex_time: t(apex),
            apex_amplitude: 1.05,
            onset_time: t(onset),
            onset_amplitude: 1.0,
            half_recovery_time: recovery.map(t),
            rise_time: (apex - onset) as f64,
            decay_time: recovery.map(|r| (r - apex) as f64),
            onset_clipped: false,
            max_derivative: 0.1,
            width: recovery.map(|r| (r - onset) as f64),
            auc: recovery.map(|r| (r - onset) as f64 * 0.05),
            apex_index: (apex * 8) as usize,
            onset_index: (onset * 8) as usize,
        }
    }

    fn label(start: i64, binary: BinaryClass) -> Label {
        Label {
            window_start: t(start),
            window_end: t(start + 5),
            binary: Some(binary),
            multiclass: None,
            binary_probabilities: Some(ClassProbabilities(vec![
                ("clean".to_string(), 0.9),
                ("artifact".to_string(), 0.1),
            ])),
            multiclass_probabilities: None,
            annotations: Vec::new(),
        }
    }

    fn result() -> AnalysisResult {
        let gap = DataGap {
            window_start: t(10),
            window_end: t(15),
            reason: GapReason::MissingValues { channel: Channel::Eda },
        };
        ResultAssembler::new().assemble(
            vec![peak(7, 8, Some(9)), peak(2, 3, None)],
            vec![label(5, BinaryClass::Artifact), label(0, BinaryClass::Clean)],
            vec![gap],
            QualityLog::new().stats(),
        )
    }

    #[test]
    fn test_assemble_metadata() {
        let assembler = ResultAssembler::new();
        let a = assembler.assemble(vec![], vec![], vec![], QualityLog::new().stats());
        let b = assembler.assemble(vec![], vec![], vec![], QualityLog::new().stats());

        assert_eq!(a.result_version, RESULT_VERSION);
        assert_eq!(a.producer.name, PRODUCER_NAME);
        assert_eq!(a.producer.instance_id, assembler.instance_id().to_string());
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn test_peak_table_csv() {
        let result = result();
        let csv = ResultAssembler::new()
            .render(&result, Table::Peaks, OutputFormat::Csv)
            .unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("onset_time,apex_time,half_recovery_time"));
        assert!(lines[0].ends_with("onset_clipped"));

        // Unresolved decay leaves the recovery and decay columns empty
        let fields: Vec<&str> = lines[2].split(',').collect();
        assert_eq!(fields.len(), 12);
        assert_eq!(fields[2], "");
        assert_eq!(fields[7], "");
    }

    #[test]
    fn test_label_table_json() {
        let result = result();
        let json = ResultAssembler::new()
            .render(&result, Table::Labels, OutputFormat::Json)
            .unwrap();
        let rows: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(rows.as_array().unwrap().len(), 2);
        assert_eq!(rows[0]["binary_label"], "artifact");
        assert_eq!(rows[0]["multiclass_label"], serde_json::Value::Null);
        assert_eq!(rows[1]["binary_probabilities"], "clean=0.9000;artifact=0.1000");
    }

    #[test]
    fn test_timeline_sorted_by_start() {
        let rows = ResultAssembler::new().timeline_rows(&result());
        let kinds: Vec<TimelineKind> = rows.iter().map(|r| r.kind).collect();

        assert_eq!(
            kinds,
            vec![
                TimelineKind::Window, // 0s
                TimelineKind::Peak,   // 2s
                TimelineKind::Window, // 5s
                TimelineKind::Peak,   // 7s
                TimelineKind::Gap,    // 10s
            ]
        );
        assert!(rows[1].description.contains("unresolved_decay"));
        assert_eq!(rows[4].description, "missing EDA readings");
        // Unresolved peak ends at its apex
        assert_eq!(rows[1].end, t(3).to_rfc3339());
    }

    #[test]
    fn test_timezone_rendering() {
        let tz: Tz = "Asia/Tokyo".parse().unwrap();
        let assembler = ResultAssembler::new().with_timezone(tz);
        assert_eq!(assembler.format_time(t(0)), "2024-01-22T19:00:00+09:00");

        let config = OutputConfig {
            format: OutputFormat::Csv,
            timezone: Some("Nowhere/City".to_string()),
        };
        assert!(ResultAssembler::from_config(&config).is_err());
    }

    #[test]
    fn test_csv_headers_match_columns() {
        let result = result();
        let assembler = ResultAssembler::new();
        let empty = assembler.assemble(vec![], vec![], vec![], QualityLog::new().stats());

        for table in [Table::Peaks, Table::Labels, Table::Timeline] {
            let header = table.columns().join(",");
            let full = assembler.render(&result, table, OutputFormat::Csv).unwrap();
            assert_eq!(full.lines().next(), Some(header.as_str()));

            // Empty tables still carry their header
            let csv = assembler.render(&empty, table, OutputFormat::Csv).unwrap();
            assert_eq!(csv, format!("{header}\n"));
        }
    }

    #[test]
    fn test_csv_quotes_fields() {
        let rows = vec![TimelineRow {
            start: t(0).to_rfc3339(),
            end: t(5).to_rfc3339(),
            kind: TimelineKind::Window,
            description: "say \"hi\", twice".to_string(),
        }];
        let rendered = render_rows(&rows, Table::Timeline, OutputFormat::Csv).unwrap();
        assert!(rendered.ends_with(",window,\"say \"\"hi\"\", twice\"\n"));

        let mut reader = csv::Reader::from_reader(rendered.as_bytes());
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[3], "say \"hi\", twice");
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::default(), OutputFormat::Csv);
    }

    #[test]
    fn test_inconsistent_label_description() {
        let mut l = label(0, BinaryClass::Artifact);
        l.multiclass = Some(MulticlassClass::Unknown);
        l.annotations.push(Annotation::InconsistentPrediction);
        let result = ResultAssembler::new().assemble(vec![], vec![l], vec![], QualityLog::new().stats());

        let rows = ResultAssembler::new().timeline_rows(&result);
        assert_eq!(
            rows[0].description,
            "binary=artifact multiclass=unknown [inconsistent_prediction]"
        );
    }
}
