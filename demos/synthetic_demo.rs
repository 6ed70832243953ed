//! Demonstration of the Synheart EDA analysis pipeline.
//!
//! This example shows how to:
//! 1. Build a signal buffer from samples
//! 2. Configure and validate a pipeline
//! 3. Detect SCR peaks and classify artifact windows
//! 4. Render the peak, label and timeline tables
//!
//! Run with: cargo run --example synthetic_demo

use chrono::{Duration, Utc};
use synheart_eda::{
    core::Table, signal::SignalBufferBuilder, Analyses, ClassifierMode, Config, OutputFormat,
    Pipeline, Predictors, Sample,
};

const RATE: f64 = 8.0;
const SECONDS: usize = 60;

/// One minute of wrist data: two responses, a burst of motion, a contact slip.
fn synthetic_sample(i: usize, start: chrono::DateTime<Utc>) -> Sample {
    let t = i as f64 / RATE;

    let mut eda = 2.0 + 0.01 * (t * 0.3).sin();
    for (onset, amplitude) in [(8.0, 0.12), (31.0, 0.3)] {
        let dt = t - onset;
        if (0.0..1.5).contains(&dt) {
            eda += amplitude * dt / 1.5;
        } else if dt >= 1.5 {
            eda += amplitude * (-(dt - 1.5) / 3.0).exp();
        }
    }
    if (47.0..48.0).contains(&t) {
        eda += 2.0;
    }

    let motion = (20.0..30.0).contains(&t);
    let accel_z = if motion && i % 3 == 0 { 3.5 } else { 1.0 };

    Sample {
        timestamp: start + Duration::milliseconds((i as f64 * 1000.0 / RATE) as i64),
        eda,
        accel_x: if motion { 0.4 * (t * 9.0).sin() } else { 0.0 },
        accel_y: 0.0,
        accel_z,
        temp: 33.5,
    }
}

fn main() {
    println!("Synheart EDA - Synthetic Demo");
    println!("=============================");
    println!();

    let start = Utc::now();
    let mut builder = SignalBufferBuilder::new(RATE);
    for i in 0..SECONDS * RATE as usize {
        if let Err(e) = builder.push(synthetic_sample(i, start)) {
            eprintln!("Error building buffer: {e}");
            return;
        }
    }
    let buffer = match builder.build() {
        Ok(buffer) => buffer,
        Err(e) => {
            eprintln!("Error building buffer: {e}");
            return;
        }
    };
    println!("Built {} samples at {RATE} Hz", buffer.len());

    let mut config = Config::default();
    config.windows.workers = 4;
    let pipeline = match Pipeline::new(config, Predictors::default()) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return;
        }
    };

    let result = match pipeline.run(&buffer, Analyses::all(ClassifierMode::Both)) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Analysis failed: {e}");
            return;
        }
    };

    println!("Run ID: {}", result.run_id);
    println!();

    for (title, table) in [
        ("Peaks", Table::Peaks),
        ("Labels", Table::Labels),
        ("Timeline", Table::Timeline),
    ] {
        println!("--- {title} ---");
        match pipeline.assembler().render(&result, table, OutputFormat::Csv) {
            Ok(rendered) => print!("{rendered}"),
            Err(e) => eprintln!("Render error: {e}"),
        }
        println!();
    }

    println!("{}", result.quality.summary());
}
