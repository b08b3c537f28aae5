//! CLI Entry Point for xy-stage
//!
//! Drives a two-axis stage from the terminal:
//! - One-shot commands (`status`, `move`, `jog`, `stop`)
//! - An interactive `shell` for jogging, bookmarking and returning to positions
//! - Diagnostics (`ports`, `config`)
//!
//! # Usage
//!
//! ```bash
//! xy-stage --backend simulated status
//! xy-stage --port /dev/ttyUSB0 move --x 30000 --y 7000
//! xy-stage jog up --step-mm 0.5
//! xy-stage shell
//! ```
//!
//! When the hardware backend cannot find the stage by USB ID and no `--port`
//! was given, the user is asked for a port; an empty answer aborts.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xy_stage::config::{StageConfig, DEFAULT_CONFIG_PATH};
use xy_stage::hardware::port_resolver::list_ports;
use xy_stage::locations::SavedLocations;
use xy_stage::logging::OutputFormat;
use xy_stage::motion::{self, Direction, XyPosition};
use xy_stage::{logging, AxisHandle, LimitKind, StageController, StageError, Units};

/// Default jog step in millimetres.
const DEFAULT_JOG_STEP_MM: f64 = 1.0;

/// Status line shown when the device refuses a motion command.
const REJECTED_STATUS: &str = "Command rejected, possibly out of range?";

#[derive(Parser)]
#[command(name = "xy-stage")]
#[command(about = "Two-axis motorized stage control", long_about = None)]
struct Cli {
    /// Backend to use: hardware (zaber) or simulated (sim, dummy)
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Serial port, skipping USB autodetection
    #[arg(long, global = true)]
    port: Option<String>,

    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true)]
    log_format: Option<OutputFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports with their USB identifiers
    Ports,

    /// Print the effective configuration as TOML
    Config,

    /// Show position, homed state and travel limits of both axes
    Status,

    /// Move to an absolute XY position (micrometres)
    Move {
        /// Target X (µm)
        #[arg(long, allow_hyphen_values = true)]
        x: f64,

        /// Target Y (µm)
        #[arg(long, allow_hyphen_values = true)]
        y: f64,

        /// Return as soon as both moves are accepted
        #[arg(long)]
        no_wait: bool,
    },

    /// Jog one step in a direction
    Jog {
        /// up, down, left or right
        direction: Direction,

        /// Step size (mm)
        #[arg(long, default_value_t = DEFAULT_JOG_STEP_MM)]
        step_mm: f64,
    },

    /// Stop both axes
    Stop,

    /// Interactive line-based control loop
    Shell,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = StageConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(backend) = cli.backend {
        config.application.backend = backend;
    }
    if let Some(port) = cli.port {
        config.hardware.port = Some(port);
    }
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.application.log_format = format;
    }
    config.validate()?;

    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Ports => {
            show_ports();
            Ok(())
        }
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        command => run_stage_command(command, config).await,
    }
}

fn show_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports detected on this system");
    }
    for port in ports {
        println!("{}", port);
    }
}

async fn run_stage_command(command: Commands, mut config: StageConfig) -> Result<()> {
    let mut stage = open_stage(&mut config).await?;
    let (x, y) = stage.initialize().await?;

    let result = match command {
        Commands::Status => show_status(&x, &y).await,
        Commands::Move { x: tx, y: ty, no_wait } => report(
            motion::move_xy(x.as_ref(), y.as_ref(), XyPosition::new(tx, ty), !no_wait).await,
        ),
        Commands::Jog { direction, step_mm } => {
            report(motion::jog(x.as_ref(), y.as_ref(), direction, step_mm).await)
        }
        Commands::Stop => motion::stop_all(x.as_ref(), y.as_ref())
            .await
            .map_err(anyhow::Error::from),
        Commands::Shell => run_shell(&x, &y).await,
        Commands::Ports | Commands::Config => Ok(()),
    };

    stage.close();
    result
}

/// Open the configured backend, asking for a port if autodetection fails.
async fn open_stage(config: &mut StageConfig) -> Result<StageController> {
    let selector = config.application.backend.clone();
    match StageController::open_selector(&selector, config).await {
        Err(StageError::DeviceNotFound { vid, pid }) => {
            println!(
                "Stage not autodetected (USB {:04x}:{:04x}). Enter the serial port, or leave blank to quit.",
                vid, pid
            );
            show_ports();
            let answer = read_line("port> ").await?.unwrap_or_default();
            if answer.is_empty() {
                bail!("No serial port given");
            }
            config.hardware.port = Some(answer);
            Ok(StageController::open_selector(&selector, config).await?)
        }
        other => Ok(other?),
    }
}

async fn show_status(x: &AxisHandle, y: &AxisHandle) -> Result<()> {
    for axis in [x, y] {
        let position = axis.position(Units::Micrometres).await?;
        let min = axis.limit(LimitKind::Min, Units::Micrometres).await?;
        let max = axis.limit(LimitKind::Max, Units::Micrometres).await?;
        let homed = axis.is_homed().await?;
        let busy = axis.is_busy().await?;
        println!(
            "{}: {:.3} µm  [{:.3} .. {:.3}]  homed={} busy={}",
            axis.name().to_uppercase(),
            position,
            min,
            max,
            homed,
            busy
        );
    }
    Ok(())
}

/// Print a status line for recoverable errors, propagate the rest.
fn report(result: Result<(), StageError>) -> Result<()> {
    match result {
        Err(e @ StageError::InvalidTarget { .. }) => {
            println!("{}", e);
            Ok(())
        }
        Err(e) if e.is_recoverable() => {
            tracing::warn!("{}", e);
            println!("{}", REJECTED_STATUS);
            Ok(())
        }
        other => Ok(other?),
    }
}

/// Read one trimmed line from stdin; `None` on end of input.
async fn read_line(prompt: &str) -> Result<Option<String>> {
    use std::io::Write;

    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || -> Result<Option<String>> {
        print!("{}", prompt);
        std::io::stdout().flush()?;
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    })
    .await?
}

const SHELL_HELP: &str = "\
commands:
  pos                     show current position
  move <x_um> <y_um>      move to an absolute position
  jog <dir> [step_mm]     jog up/down/left/right
  stop                    stop both axes
  save <name>             bookmark the current position
  goto <name>             move to a bookmark
  list                    list bookmarks
  export <path>           write bookmarks as tab-separated text
  quit                    leave the shell";

async fn run_shell(x: &AxisHandle, y: &AxisHandle) -> Result<()> {
    let mut locations = SavedLocations::new();
    println!("{}", SHELL_HELP);

    while let Some(line) = read_line("stage> ").await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = words.split_first() else {
            continue;
        };

        let outcome = match command {
            "quit" | "exit" | "q" => break,
            "help" | "?" => {
                println!("{}", SHELL_HELP);
                Ok(())
            }
            "pos" => motion::read_xy(x.as_ref(), y.as_ref())
                .await
                .map(|p| println!("{}", p))
                .map_err(anyhow::Error::from),
            "move" => match parse_xy(args) {
                Some(target) => report(motion::move_xy(x.as_ref(), y.as_ref(), target, true).await),
                None => usage("move <x_um> <y_um>"),
            },
            "jog" => match parse_jog(args) {
                Some((direction, step_mm)) => {
                    report(motion::jog(x.as_ref(), y.as_ref(), direction, step_mm).await)
                }
                None => usage("jog <up|down|left|right> [step_mm]"),
            },
            "stop" => motion::stop_all(x.as_ref(), y.as_ref())
                .await
                .map_err(anyhow::Error::from),
            "save" => match args.first() {
                Some(name) => motion::read_xy(x.as_ref(), y.as_ref())
                    .await
                    .map(|p| {
                        locations.save(name, p);
                        println!("Saved '{}' at {}", name, p);
                    })
                    .map_err(anyhow::Error::from),
                None => usage("save <name>"),
            },
            "goto" => match args.first() {
                Some(name) => match locations.get(name) {
                    Some(location) => report(
                        motion::move_xy(x.as_ref(), y.as_ref(), location.position(), true).await,
                    ),
                    None => {
                        println!("{}", unknown_location(name));
                        Ok(())
                    }
                },
                None => usage("goto <saved name>"),
            },
            "list" => {
                for location in locations.iter() {
                    println!("{:<16} {}", location.name, location.position());
                }
                Ok(())
            }
            "export" => match args.first() {
                Some(path) => locations
                    .export_to(path)
                    .map(|()| println!("Exported {} locations to {}", locations.len(), path))
                    .map_err(anyhow::Error::from),
                None => usage("export <path>"),
            },
            other => usage(&format!("unknown command '{}', try 'help'", other)),
        };

        // Transport failures end the session; everything else was reported
        outcome?;
    }

    Ok(())
}

fn unknown_location(name: &str) -> String {
    format!("no saved location '{}'", name)
}

fn usage(text: &str) -> Result<()> {
    println!("usage: {}", text);
    Ok(())
}

fn parse_xy(args: &[&str]) -> Option<XyPosition> {
    match args {
        [x, y] => Some(XyPosition::new(x.parse().ok()?, y.parse().ok()?)),
        _ => None,
    }
}

fn parse_jog(args: &[&str]) -> Option<(Direction, f64)> {
    match args {
        [direction] => Some((direction.parse().ok()?, DEFAULT_JOG_STEP_MM)),
        [direction, step] => Some((direction.parse().ok()?, step.parse().ok()?)),
        _ => None,
    }
}
