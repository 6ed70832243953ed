//! Synheart EDA CLI
//!
//! Peak detection and artifact classification for preprocessed EDA recordings.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use synheart_eda::{
    config::Config,
    core::{Analyses, AnalysisResult, ClassifierMode, OutputFormat, Pipeline, Predictors, Table},
    read_signal_file, VERSION,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "synheart-eda")]
#[command(author = "Synheart")]
#[command(version = VERSION)]
#[command(about = "EDA peak detection and artifact classification", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect skin-conductance response peaks
    Peaks {
        #[command(flatten)]
        io: IoArgs,

        #[command(flatten)]
        peaks: PeakArgs,
    },

    /// Classify windows as clean or artifact
    Artifacts {
        #[command(flatten)]
        io: IoArgs,

        #[command(flatten)]
        artifacts: ArtifactArgs,
    },

    /// Run both analyses and write all tables
    Analyze {
        #[command(flatten)]
        io: IoArgs,

        #[command(flatten)]
        peaks: PeakArgs,

        #[command(flatten)]
        artifacts: ArtifactArgs,

        /// Directory for peaks, labels and timeline tables (prints the
        /// timeline when unset)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Show configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        save: bool,
    },
}

#[derive(Args)]
struct IoArgs {
    /// Preprocessed signal CSV (Timestamp, EDA, AccelX, AccelY, AccelZ, Temp)
    input: PathBuf,

    /// Sample rate of the input in Hz
    #[arg(long)]
    sample_rate: Option<f64>,

    /// Table format (csv or json)
    #[arg(long)]
    format: Option<OutputFormat>,

    /// IANA timezone for rendered timestamps
    #[arg(long)]
    timezone: Option<String>,

    /// Write the table to a file instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct PeakArgs {
    /// Minimum rise in uS
    #[arg(long)]
    threshold: Option<f64>,

    /// Rising and falling samples required around an apex
    #[arg(long)]
    offset: Option<usize>,

    /// Onset search window in seconds
    #[arg(long)]
    max_rise_time: Option<f64>,

    /// Half-recovery search window in seconds
    #[arg(long)]
    max_decay_time: Option<f64>,
}

#[derive(Args)]
struct ArtifactArgs {
    /// Classifier mode (binary, multiclass or both)
    #[arg(long)]
    mode: Option<ClassifierMode>,

    /// Window length in seconds
    #[arg(long)]
    window: Option<f64>,

    /// Window step in seconds
    #[arg(long)]
    step: Option<f64>,

    /// Worker threads for feature extraction
    #[arg(long)]
    workers: Option<usize>,

    /// JSON model for the binary predictor
    #[arg(long)]
    binary_model: Option<PathBuf>,

    /// JSON model for the multiclass predictor
    #[arg(long)]
    multiclass_model: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Peaks { io, peaks } => {
            peaks.apply(&mut config)?;
            let (pipeline, result) = run(&io, config, |_| Analyses::peaks_only())?;
            emit(&io, &pipeline, &result, Table::Peaks)
        }
        Commands::Artifacts { io, artifacts } => {
            artifacts.apply(&mut config)?;
            let (pipeline, result) =
                run(&io, config, |c| Analyses::artifacts_only(c.classifier.mode))?;
            emit(&io, &pipeline, &result, Table::Labels)
        }
        Commands::Analyze {
            io,
            peaks,
            artifacts,
            output_dir,
        } => {
            peaks.apply(&mut config)?;
            artifacts.apply(&mut config)?;
            let (pipeline, result) = run(&io, config, |c| Analyses::all(c.classifier.mode))?;
            match output_dir {
                Some(dir) => write_all(&dir, &pipeline, &result),
                None => emit(&io, &pipeline, &result, Table::Timeline),
            }
        }
        Commands::Config { save } => cmd_config(&config, cli.config.as_deref(), save),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Config::load().context("Failed to load config"),
    }
}

impl IoArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(rate) = self.sample_rate {
            config.sample_rate_hz = rate;
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
        if let Some(ref tz) = self.timezone {
            config.output.timezone = Some(tz.clone());
        }
    }
}

impl PeakArgs {
    fn apply(&self, config: &mut Config) -> Result<()> {
        let peaks = &mut config.peaks;
        if let Some(threshold) = self.threshold {
            peaks.threshold = threshold;
        }
        if let Some(offset) = self.offset {
            peaks.offset = offset;
        }
        if let Some(secs) = self.max_rise_time {
            peaks.max_rise_time = seconds(secs, "--max-rise-time")?;
        }
        if let Some(secs) = self.max_decay_time {
            peaks.max_decay_time = seconds(secs, "--max-decay-time")?;
        }
        Ok(())
    }
}

impl ArtifactArgs {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(mode) = self.mode {
            config.classifier.mode = mode;
        }
        if let Some(secs) = self.window {
            config.windows.size = seconds(secs, "--window")?;
        }
        if let Some(secs) = self.step {
            config.windows.step = seconds(secs, "--step")?;
        }
        if let Some(workers) = self.workers {
            config.windows.workers = workers;
        }
        if let Some(ref path) = self.binary_model {
            config.classifier.binary_model = Some(path.clone());
        }
        if let Some(ref path) = self.multiclass_model {
            config.classifier.multiclass_model = Some(path.clone());
        }
        Ok(())
    }
}

fn seconds(secs: f64, flag: &str) -> Result<std::time::Duration> {
    std::time::Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .with_context(|| format!("{flag} must be a positive number of seconds, got {secs}"))
}

/// Build the pipeline, read the input and run the selected analyses.
fn run(
    io: &IoArgs,
    mut config: Config,
    analyses: impl FnOnce(&Config) -> Analyses,
) -> Result<(Pipeline, AnalysisResult)> {
    io.apply(&mut config);
    let analyses = analyses(&config);

    let predictors = Predictors::from_config(&config.classifier).context("Failed to load model")?;
    let rate = config.sample_rate_hz;
    let pipeline = Pipeline::new(config, predictors).context("Invalid configuration")?;

    let buffer = read_signal_file(&io.input, rate)
        .with_context(|| format!("Failed to read {}", io.input.display()))?;
    tracing::info!(
        input = %io.input.display(),
        samples = buffer.len(),
        rate_hz = rate,
        "Loaded signal"
    );

    let result = pipeline.run(&buffer, analyses).context("Analysis failed")?;
    eprintln!("{}", result.quality.summary());
    Ok((pipeline, result))
}

/// Render one table to the output file or stdout.
fn emit(io: &IoArgs, pipeline: &Pipeline, result: &AnalysisResult, table: Table) -> Result<()> {
    let format = pipeline.config().output.format;
    let rendered = pipeline
        .assembler()
        .render(result, table, format)
        .context("Failed to render table")?;

    match io.output {
        Some(ref path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "Wrote table");
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

/// Write every table, plus the full result as JSON, into `dir`.
fn write_all(dir: &Path, pipeline: &Pipeline, result: &AnalysisResult) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let format = pipeline.config().output.format;
    let extension = match format {
        OutputFormat::Csv => "csv",
        OutputFormat::Json => "json",
    };
    let assembler = pipeline.assembler();

    for (table, name) in [
        (Table::Peaks, "peaks"),
        (Table::Labels, "labels"),
        (Table::Timeline, "timeline"),
    ] {
        let path = dir.join(format!("{name}.{extension}"));
        let rendered = assembler.render(result, table, format)?;
        std::fs::write(&path, rendered)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let path = dir.join("result.json");
    std::fs::write(&path, assembler.render_result(result)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("Run {} written to {}", result.run_id, dir.display());
    Ok(())
}

fn cmd_config(config: &Config, path: Option<&Path>, save: bool) -> Result<()> {
    if let Err(e) = config.validate() {
        bail!("Configuration is invalid: {e}");
    }

    println!("Configuration");
    println!("=============");
    println!();
    let config_path = path.map(Path::to_path_buf).unwrap_or_else(Config::config_path);
    println!("Config file: {:?}", config_path);
    println!();
    println!("{}", serde_json::to_string_pretty(config)?);

    if save {
        config
            .save_to(&config_path)
            .context("Failed to save config")?;
        println!();
        println!("Saved to {:?}", config_path);
    }
    Ok(())
}
