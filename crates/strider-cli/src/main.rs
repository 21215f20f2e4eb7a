//! `strider-cli` – command line entry point for the Strider front end.
//!
//! ```text
//! strider replay --log run.jsonl [--config strider.toml] [--trajectory out.tum] [--gt-cloud map.pcd]
//! strider default-config > strider.toml
//! strider init-config [--path FILE] [--force]
//! ```
//!
//! Without `--config` the vault at `~/.strider/config.toml` is used when it
//! exists, the built-in defaults otherwise. `STRIDER_*` environment
//! overrides apply on top of either.

mod config;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use strider_runtime::replay::{load_log, replay, write_tum};
use strider_runtime::telemetry::init_tracing;
use strider_runtime::{Frontend, FrontendConfig, ScanOutput};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "strider", version)]
#[command(about = "LiDAR-inertial odometry front end", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON-lines measurement log through the front end
    Replay {
        /// JSON-lines measurement log
        #[arg(long, value_name = "FILE")]
        log: PathBuf,

        /// TOML configuration (defaults to ~/.strider/config.toml)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Write the integrated trajectory here in TUM format
        #[arg(long, value_name = "FILE")]
        trajectory: Option<PathBuf>,

        /// ASCII PCD file seeding the local map
        #[arg(long, value_name = "FILE")]
        gt_cloud: Option<PathBuf>,
    },
    /// Print the default configuration as TOML
    DefaultConfig,
    /// Write the default configuration to the vault
    InitConfig {
        /// Destination (defaults to ~/.strider/config.toml)
        #[arg(long, value_name = "FILE")]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let guard = match init_tracing("strider") {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}: {}", "Tracing setup failed".red(), e);
            return ExitCode::FAILURE;
        }
    };
    info!(otlp = guard.is_exporting(), "tracing initialised");

    let result = match cli.command {
        Command::Replay {
            log,
            config,
            trajectory,
            gt_cloud,
        } => resolve_config(config.as_deref()).and_then(|mut cfg| {
            if gt_cloud.is_some() {
                cfg.ground_truth.point_cloud_filename = gt_cloud;
            }
            run_replay(&log, cfg, trajectory.as_deref())
        }),
        Command::DefaultConfig => config::to_toml(&FrontendConfig::default()).map(|text| print!("{text}")),
        Command::InitConfig { path, force } => {
            let path = path.unwrap_or_else(config::config_path);
            init_config(&path, force).map(|()| {
                println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                );
            })
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Replay
// ─────────────────────────────────────────────────────────────────────────────

fn run_replay(log: &Path, cfg: FrontendConfig, trajectory: Option<&Path>) -> Result<(), String> {
    let frontend = Frontend::new(cfg).map_err(|e| e.to_string())?;
    let mut sync = load_log(log).map_err(|e| e.to_string())?;
    let outputs = replay(&frontend, &mut sync);
    info!(scans = outputs.len(), "replay complete");

    if let Some(path) = trajectory {
        write_tum(path, &outputs).map_err(|e| e.to_string())?;
        println!(
            "  {} Trajectory written to {}",
            "✓".green().bold(),
            path.display().to_string().bold()
        );
    }
    print_summary(&outputs, frontend.keyframe_count());
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<(), String> {
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()));
    }
    config::save_to(&FrontendConfig::default(), path)
}

fn resolve_config(explicit: Option<&Path>) -> Result<FrontendConfig, String> {
    let mut cfg = match explicit {
        Some(path) => config::load_from(path)?
            .ok_or_else(|| format!("Config file {} does not exist", path.display()))?,
        None => {
            let path = config::config_path();
            match config::load_from(&path)? {
                Some(cfg) => {
                    println!("  Config loaded from {}", path.display().to_string().bold());
                    cfg
                }
                None => FrontendConfig::default(),
            }
        }
    };
    config::apply_env_overrides(&mut cfg);
    Ok(cfg)
}

fn print_summary(outputs: &[ScanOutput], keyframes: usize) {
    println!();
    println!("  {}", "Replay summary".bold().cyan());
    println!("    Scans processed : {}", outputs.len());

    let mut modes: BTreeMap<&str, usize> = BTreeMap::new();
    for output in outputs {
        *modes.entry(output.mode.name()).or_default() += 1;
    }
    for (mode, count) in &modes {
        println!("    Mode {:<12}: {}", mode, count);
    }

    let Some(last) = outputs.last() else {
        println!("    {}", "No scans in log.".yellow());
        return;
    };
    let t = last.integrated.pose.translation.vector;
    let (roll, pitch, yaw) = last.integrated.pose.rotation.euler_angles();
    println!(
        "    Final pose      : x {:.3}  y {:.3}  z {:.3}  roll {:.3}  pitch {:.3}  yaw {:.3}",
        t.x, t.y, t.z, roll, pitch, yaw
    );

    let d = &last.diagnostics;
    let degraded = outputs.iter().filter(|o| o.state.is_degraded()).count();
    let label = if degraded == 0 {
        "0".green()
    } else {
        degraded.to_string().yellow()
    };
    println!("    Degraded scans  : {} ({} failed, {} rejected)", label, d.registration_failures, d.threshold_rejections);
    println!("    Keyframes added : {} ({} in map)", d.keyframes_added, keyframes);
    println!("    Map refreshes   : {}", d.map_refreshes);
    println!("    Dropped scans   : {}", d.dropped_scans);
    println!(
        "    Unavailable     : imu {}  odometry {}  pose {}",
        d.imu_unavailable, d.odometry_unavailable, d.pose_stamped_unavailable
    );
    println!(
        "    Bad samples     : {} malformed, {} duplicate, {} imu frame mismatches",
        d.malformed_samples, d.duplicate_samples, d.imu_frame_mismatches
    );
}
