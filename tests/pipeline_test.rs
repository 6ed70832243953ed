//! End-to-end tests for the analysis pipeline

use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::io::Cursor;
use synheart_eda::{
    read_signal_csv, Analyses, Annotation, BinaryClass, Channel, ClassifierMode, Config,
    MulticlassClass, OutputFormat, Pipeline, Predictors, SignalBuffer, Table,
};

const RATE: f64 = 8.0;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap()
}

/// Add an SCR-like pulse: linear rise over 1 s, linear decay over 3 s.
fn add_pulse(eda: &mut [f64], at: usize, amplitude: f64) {
    let rise = 8;
    let fall = 24;
    for i in 1..=rise {
        eda[at + i] += amplitude * i as f64 / rise as f64;
    }
    for i in 1..fall {
        eda[at + rise + i] += amplitude * (1.0 - i as f64 / fall as f64);
    }
}

fn resting_accel(channels: &mut BTreeMap<Channel, Vec<f64>>, len: usize) {
    channels.insert(Channel::AccelX, vec![0.0; len]);
    channels.insert(Channel::AccelY, vec![0.0; len]);
    channels.insert(Channel::AccelZ, vec![1.0; len]);
}

fn buffer(channels: BTreeMap<Channel, Vec<f64>>) -> SignalBuffer {
    SignalBuffer::uniform(start(), RATE, channels).unwrap()
}

fn pipeline() -> Pipeline {
    Pipeline::new(Config::default(), Predictors::default()).unwrap()
}

/// A minute of varied data: pulses, a quiet stretch, motion, and a contact jump.
fn mixed_recording() -> SignalBuffer {
    let len = 480;
    let mut eda: Vec<f64> = (0..len).map(|i| 2.0 + 0.002 * (i as f64 * 0.2).sin()).collect();
    add_pulse(&mut eda, 16, 0.08);
    add_pulse(&mut eda, 120, 0.2);
    for v in eda.iter_mut().skip(300).take(6) {
        *v += 1.5;
    }

    let mut channels = BTreeMap::new();
    resting_accel(&mut channels, len);
    if let Some(z) = channels.get_mut(&Channel::AccelZ) {
        for (i, v) in z.iter_mut().enumerate().skip(200).take(80) {
            *v = if i % 4 == 0 { 4.0 } else { 1.0 + 0.05 * (i % 3) as f64 };
        }
    }
    channels.insert(Channel::Eda, eda);
    buffer(channels)
}

#[test]
fn test_only_suprathreshold_pulse_detected() {
    let len = 480;
    let mut eda = vec![2.0; len];
    add_pulse(&mut eda, 80, 0.05);
    add_pulse(&mut eda, 280, 0.01);

    let mut channels = BTreeMap::new();
    channels.insert(Channel::Eda, eda);
    let result = pipeline().run(&buffer(channels), Analyses::peaks_only()).unwrap();

    assert_eq!(result.peaks.len(), 1);
    let peak = &result.peaks[0];
    assert!((peak.amplitude() - 0.05).abs() < 1e-9);
    assert_eq!(peak.apex_index, 88);
    assert!((peak.rise_time - 1.0).abs() < 1e-9);
    assert!(peak.is_resolved());
    assert_eq!(result.quality.peaks_detected, 1);
}

#[test]
fn test_quiet_window_clean_and_motion_window_artifact() {
    let len = 80;
    let eda: Vec<f64> = (0..len).map(|i| 2.0 + 0.001 * (i as f64 * 0.3).sin()).collect();
    let mut channels = BTreeMap::new();
    channels.insert(Channel::Eda, eda);
    resting_accel(&mut channels, len);
    if let Some(z) = channels.get_mut(&Channel::AccelZ) {
        for (i, v) in z.iter_mut().enumerate().skip(40) {
            if i % 4 == 0 {
                *v = 4.0;
            }
        }
    }

    let result = pipeline()
        .run(&buffer(channels), Analyses::artifacts_only(ClassifierMode::Binary))
        .unwrap();

    assert_eq!(result.labels.len(), 2);
    assert_eq!(result.labels[0].binary, Some(BinaryClass::Clean));
    assert_eq!(result.labels[1].binary, Some(BinaryClass::Artifact));
    assert!(result.labels.iter().all(|l| l.multiclass.is_none()));
}

#[test]
fn test_both_mode_never_clean_against_binary() {
    let result = pipeline()
        .run(&mixed_recording(), Analyses::artifacts_only(ClassifierMode::Both))
        .unwrap();

    assert_eq!(result.labels.len(), 12);
    for label in &result.labels {
        if label.multiclass == Some(MulticlassClass::Clean) {
            assert_eq!(label.binary, Some(BinaryClass::Clean));
        }
    }

    // Motion stretch and contact jump are both flagged
    let flagged = result
        .labels
        .iter()
        .filter(|l| l.binary == Some(BinaryClass::Artifact))
        .count();
    assert!(flagged >= 3, "only {flagged} artifact windows");
}

#[test]
fn test_peak_timing_order() {
    let result = pipeline().run(&mixed_recording(), Analyses::peaks_only()).unwrap();

    assert!(!result.peaks.is_empty());
    for peak in &result.peaks {
        assert!(peak.onset_time < peak.apex_time);
        if let Some(recovery) = peak.half_recovery_time {
            assert!(peak.apex_time <= recovery);
        }
    }
}

#[test]
fn test_runs_are_idempotent() {
    let pipeline = pipeline();
    let buffer = mixed_recording();
    let analyses = Analyses::all(ClassifierMode::Both);

    let first = pipeline.run(&buffer, analyses).unwrap();
    let second = pipeline.run(&buffer, analyses).unwrap();

    assert_eq!(first.peaks, second.peaks);
    assert_eq!(first.labels, second.labels);
    assert_eq!(first.gaps, second.gaps);
    assert_ne!(first.run_id, second.run_id);
}

#[test]
fn test_parallel_extraction_matches_sequential() {
    let buffer = mixed_recording();
    let mut config = Config::default();
    config.windows.step = std::time::Duration::from_millis(2500);

    let sequential = Pipeline::new(config.clone(), Predictors::default())
        .unwrap()
        .run(&buffer, Analyses::artifacts_only(ClassifierMode::Both))
        .unwrap();

    config.windows.workers = 4;
    let parallel = Pipeline::new(config, Predictors::default())
        .unwrap()
        .run(&buffer, Analyses::artifacts_only(ClassifierMode::Both))
        .unwrap();

    assert_eq!(sequential.labels, parallel.labels);
    assert_eq!(parallel.labels.len(), 23);
}

#[test]
fn test_flat_recording() {
    let len = 160;
    let mut channels = BTreeMap::new();
    channels.insert(Channel::Eda, vec![3.0; len]);
    resting_accel(&mut channels, len);

    let result = pipeline()
        .run(&buffer(channels), Analyses::all(ClassifierMode::Binary))
        .unwrap();

    assert!(result.peaks.is_empty());
    assert_eq!(result.labels.len(), 4);
    for label in &result.labels {
        assert_eq!(label.binary, Some(BinaryClass::Unknown));
        assert_eq!(label.annotations, vec![Annotation::DegenerateFeatures]);
    }
    assert_eq!(result.quality.degenerate_windows, 4);
    assert_eq!(result.quality.unknown_labels, 4);
}

#[test]
fn test_lifted_electrode_is_unknown_not_clean() {
    // EDA reads exactly zero while the wrist moves slightly
    let len = 80;
    let mut channels = BTreeMap::new();
    channels.insert(Channel::Eda, vec![0.0; len]);
    resting_accel(&mut channels, len);
    channels.insert(
        Channel::AccelX,
        (0..len).map(|i| if i % 2 == 0 { 0.0 } else { 0.01 }).collect(),
    );
    // Second window: near-flat but real EDA stays classifiable
    let eda: Vec<f64> = (0..len)
        .map(|i| if i < 40 { 0.0 } else { 2.0 + 0.001 * (i as f64 * 0.3).sin() })
        .collect();
    channels.insert(Channel::Eda, eda);

    let result = pipeline()
        .run(&buffer(channels), Analyses::artifacts_only(ClassifierMode::Both))
        .unwrap();

    assert_eq!(result.labels.len(), 2);
    let lifted = &result.labels[0];
    assert_eq!(lifted.binary, Some(BinaryClass::Unknown));
    assert_eq!(lifted.multiclass, Some(MulticlassClass::Unknown));
    assert_eq!(lifted.annotations, vec![Annotation::DegenerateFeatures]);

    let quiet = &result.labels[1];
    assert_eq!(quiet.binary, Some(BinaryClass::Clean));
    assert!(quiet.annotations.is_empty());
    assert_eq!(result.quality.degenerate_windows, 1);
}

#[test]
fn test_csv_input_end_to_end() {
    let base_ms: i64 = 1_705_917_600_000;
    let mut eda = vec![1.5; 120];
    add_pulse(&mut eda, 30, 0.1);

    let mut csv = String::from("Timestamp,EDA,AccelX,AccelY,AccelZ\n");
    for (i, v) in eda.iter().enumerate() {
        let ts = base_ms + 125 * i as i64;
        // Residual missing reading in the last window
        let eda_field = if i == 100 { String::new() } else { v.to_string() };
        csv.push_str(&format!("{ts},{eda_field},0.0,0.0,1.0\n"));
    }

    let buffer = read_signal_csv(Cursor::new(csv), RATE).unwrap();
    assert!(!buffer.has_channel(Channel::Temp));

    let pipeline = pipeline();
    let result = pipeline
        .run(&buffer, Analyses::all(ClassifierMode::Binary))
        .unwrap();

    assert_eq!(result.peaks.len(), 1);
    assert_eq!(result.labels.len(), 2);
    assert_eq!(result.gaps.len(), 1);

    let timeline = pipeline
        .assembler()
        .render(&result, Table::Timeline, OutputFormat::Csv)
        .unwrap();
    let rows: Vec<&str> = timeline.lines().skip(1).collect();
    assert_eq!(rows.len(), 4);
    assert!(rows[3].contains(",gap,"));
}

#[test]
fn test_invalid_configuration_fails_before_scan() {
    let mut config = Config::default();
    config.classifier.ambiguity_margin = 1.5;
    assert!(Pipeline::new(config, Predictors::default()).is_err());

    let mut config = Config::default();
    config.peaks.offset = 0;
    assert!(Pipeline::new(config, Predictors::default()).is_err());
}
