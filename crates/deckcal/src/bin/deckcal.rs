use std::{error::Error, path::PathBuf};

use clap::{Parser, Subcommand};
use deckcal::points::FitInput;
use deckcal::session::{DeckCalibrationConfig, DeckCalibrationFile, Mount};
use deckcal::simulate::{simulate_calibration, SimulationParams};
use log::{info, LevelFilter};

#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

/// Deck coordinate calibration for gantry liquid handlers.
#[derive(Debug, Parser)]
#[command(author, version, about = "Deck coordinate calibration for gantry liquid handlers")]
struct Cli {
    /// Log level for the console logger.
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    /// Emit JSON log lines (requires the `tracing` feature).
    #[arg(long, global = true)]
    json_log: bool,

    /// Also append console log lines to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Fit a deck transform from a JSON file with `nominal`, `measured` and
    /// `z_offset`, and print it as JSON.
    Fit { input: PathBuf },

    /// Run a full calibration session against the simulated gantry.
    Simulate {
        /// JSON DeckCalibrationConfig. Defaults are used if omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, default_value = "left")]
        mount: Mount,
        #[arg(long, default_value = "p300_multi_v1")]
        model: String,
        #[arg(long, default_value_t = 51.7)]
        tip_length: f64,
        /// Deck rotation about Z in degrees.
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        rotation_deg: f64,
        /// Deck shift in mm.
        #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_hyphen_values = true)]
        shift: Option<Vec<f64>>,
        /// Where to write the calibration file.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print a stored calibration file.
    Show { path: PathBuf },
}

fn init_logging(cli: &Cli) -> Result<(), Box<dyn Error>> {
    #[cfg(feature = "tracing")]
    {
        if cli.json_log {
            let _ = LogTracer::init();
            deckcal::init_tracing(true);
            return Ok(());
        }
    }
    match &cli.log_file {
        Some(path) => deckcal::init_with_file(cli.log_level, path)?,
        None => deckcal::init_with_level(cli.log_level)?,
    }
    #[cfg(not(feature = "tracing"))]
    {
        if cli.json_log {
            log::warn!("--json-log needs the `tracing` feature; using the console logger");
        }
    }
    Ok(())
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match cli.command {
        Cmd::Fit { input } => {
            let input = FitInput::load_json(&input)?;
            let fit = input.fit()?;
            println!("{}", serde_json::to_string_pretty(&fit)?);
        }
        Cmd::Simulate {
            config,
            mount,
            model,
            tip_length,
            rotation_deg,
            shift,
            output,
        } => {
            let mut config = match config {
                Some(path) => DeckCalibrationConfig::load_json(path)?,
                None => DeckCalibrationConfig::default(),
            };
            if output.is_some() {
                config.calibration_path = output;
            }
            let shift = match shift.as_deref() {
                Some(&[x, y, z]) => [x, y, z],
                _ => [0.0; 3],
            };
            let params = SimulationParams {
                mount,
                model,
                tip_length,
                rotation_deg,
                shift,
            };
            let report = simulate_calibration(config, &params)?;
            info!(
                "recovered deck error within {:.2e} after {} jogs",
                report.max_deviation, report.jogs
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Cmd::Show { path } => {
            let file = DeckCalibrationFile::load_json(&path)?;
            println!("{}", serde_json::to_string_pretty(&file)?);
        }
    }
    Ok(())
}
