use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::roster::SkippedEntry;
use rollcall_core::{
    encode_roster, AttendanceLog, AttendanceSession, Clock, SessionEnd, StopFlag, SystemClock,
};
use rollcall_hw::Camera;
use rollcall_vision::OnnxVision;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod stop;

use config::Config;
use stop::KeyboardStop;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance taker")]
struct Cli {
    /// Roster and settings file
    #[arg(short, long, global = true, default_value = "rollcall.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take attendance from the camera until `q` + Enter or Ctrl-C
    Run {
        /// V4L2 device (overrides config)
        #[arg(short, long)]
        device: Option<String>,
        /// Directory for the attendance log (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Match threshold for the configured metric (overrides config)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Encode the roster and report which students enrolled
    Check {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
    /// Print a saved attendance log
    Show {
        /// Path to an attendance CSV
        log: PathBuf,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            device,
            output_dir,
            threshold,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(device) = device {
                config.camera_device = device;
            }
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            if threshold.is_some() {
                config.threshold = threshold;
            }
            run(&config)
        }
        Commands::Check { json } => check(&load_config(&cli.config)?, json),
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
        Commands::Show { log } => show(&log),
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(path).with_context(|| format!("loading {}", path.display()))?;
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

fn load_vision(config: &Config) -> Result<OnnxVision> {
    OnnxVision::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))
}

fn run(config: &Config) -> Result<()> {
    let mut vision = load_vision(config)?;
    let report = encode_roster(&config.roster, &mut vision);
    print_skipped(&report.skipped);

    let flag = StopFlag::new();
    let handler_flag = flag.clone();
    ctrlc::set_handler(move || handler_flag.request_stop())
        .context("failed to install Ctrl-C handler")?;
    let mut stop = KeyboardStop::new(flag);

    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("opening camera {}", config.camera_device))?;
    println!(
        "Camera {}: {}x{} {}",
        camera.device_path, camera.width, camera.height, camera.fourcc
    );
    let stream = camera
        .stream(config.warmup_frames)
        .context("starting capture stream")?;

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating {}", config.output_dir.display()))?;
    let clock = SystemClock;
    let log = AttendanceLog::new(AttendanceLog::session_path(&config.output_dir, clock.now()));

    let mut session = AttendanceSession::new(
        report.roster,
        vision,
        config.matcher(),
        log,
        clock,
        config.session_options(),
    );

    println!(
        "Taking attendance for {} student(s). Press q + Enter or Ctrl-C to stop.",
        session.roster().len()
    );
    let summary = session.run(stream, &mut stop)?;

    if let SessionEnd::CaptureFailed(e) = &summary.end {
        eprintln!("Camera stopped delivering frames: {e}");
    }
    println!(
        "{} frame(s), {} face(s), {} marked present",
        summary.frames, summary.faces, summary.marked
    );
    if summary.marked > 0 {
        for record in session.log().records() {
            println!("  {:<24} {}", record.name, record.formatted_time());
        }
        println!("Saved to {}", summary.log_path.display());
    }
    Ok(())
}

#[derive(Serialize)]
struct CheckReport {
    enrolled: Vec<String>,
    skipped: Vec<SkippedReport>,
}

#[derive(Serialize)]
struct SkippedReport {
    name: String,
    image: PathBuf,
    reason: String,
}

fn check(config: &Config, json: bool) -> Result<()> {
    let mut vision = load_vision(config)?;
    let report = encode_roster(&config.roster, &mut vision);

    if json {
        let out = CheckReport {
            enrolled: report
                .roster
                .identities()
                .iter()
                .map(|id| id.display_name())
                .collect(),
            skipped: report
                .skipped
                .iter()
                .map(|s| SkippedReport {
                    name: s.entry.name.clone(),
                    image: s.entry.image.clone(),
                    reason: s.reason.to_string(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!(
        "{} of {} student(s) enrolled",
        report.roster.len(),
        config.roster.len()
    );
    for id in report.roster.identities() {
        println!("  ok    {}", id.display_name());
    }
    print_skipped(&report.skipped);
    Ok(())
}

fn print_skipped(skipped: &[SkippedEntry]) {
    for s in skipped {
        println!("  skip  {} ({}): {}", s.entry.name, s.entry.image.display(), s.reason);
    }
}

fn show(path: &Path) -> Result<()> {
    let records =
        AttendanceLog::load(path).with_context(|| format!("reading {}", path.display()))?;
    if records.is_empty() {
        println!("No one was marked present in {}", path.display());
        return Ok(());
    }
    for record in &records {
        println!("{:<24} {}", record.name, record.formatted_time());
    }
    println!("{} present", records.len());
    Ok(())
}
