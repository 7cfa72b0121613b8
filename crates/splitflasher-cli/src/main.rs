//! SplitFlasher - Flash both halves of a split keyboard over UF2
//!
//! # Usage
//!
//! ```bash
//! # Show bootloader volumes that are currently mounted
//! splitflasher list
//!
//! # Load a firmware archive and flash each half as it is plugged in
//! splitflasher flash corne.zip
//!
//! # Use a different mount root and volume label
//! splitflasher flash corne.zip --mount-root /media/me --label RPI-RP2
//! ```

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use clap_mangen::Man;
use console::style;
use splitflasher_core::Settings;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod commands;
mod progress;

/// Session events are rendered directly, so their log echo is muted on a terminal
const TERMINAL_FILTER: &str = "info,splitflasher_core::events=off";

/// SplitFlasher - Flash both halves of a split keyboard over UF2
#[derive(Parser)]
#[command(name = "splitflasher")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this configuration file instead of the default one
    #[arg(long, global = true, env = "SPLITFLASHER_CONFIG", value_name = "FILE")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Flash a firmware archive onto both halves as they are connected
    ///
    /// The session reads `load <archive.zip>`, `reset`, `release` and `quit`
    /// from stdin. It runs until `quit` or Ctrl+C; closing stdin does not end
    /// it.
    Flash {
        /// Firmware archive (.zip) containing a right and a left UF2 image
        archive: Option<PathBuf>,

        /// Directory bootloader volumes are mounted under
        #[arg(long, value_name = "DIR")]
        mount_root: Option<PathBuf>,

        /// Accepted volume label (repeatable)
        #[arg(short, long = "label", value_name = "NAME")]
        labels: Vec<String>,

        /// Seconds a flashed device is ignored when it remounts (0 disables)
        #[arg(long, value_name = "SECS")]
        ignore_window: Option<u64>,

        /// Append log output to this file
        #[arg(long, value_name = "FILE")]
        log_file: Option<PathBuf>,
    },

    /// List bootloader volumes that are currently mounted
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,

        /// Directory bootloader volumes are mounted under
        #[arg(long, value_name = "DIR")]
        mount_root: Option<PathBuf>,
    },

    /// Show or create the configuration file
    Config {
        /// Create a configuration file with default values
        #[arg(long)]
        init: bool,

        /// Print the configuration file path
        #[arg(long)]
        path: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Generate man pages
    Mangen {
        /// Output directory for man pages
        #[arg(short, long, default_value = ".")]
        out_dir: String,
    },
}

fn main() {
    // Set up panic handler for nicer error messages
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("{} {}", style("Error:").red().bold(), panic_info);
    }));

    if let Err(e) = run() {
        eprintln!("{} {}", style("Error:").red().bold(), e);

        // Show cause chain in verbose mode
        if std::env::var("RUST_BACKTRACE").is_ok() {
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("  {} {}", style("Caused by:").yellow(), cause);
                source = cause.source();
            }
        }

        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config_file.clone().or_else(Settings::config_path);
    let settings = Settings::load_from_path(config_path.clone());

    let log_file = match &cli.command {
        Commands::Flash { log_file, .. } => log_file
            .clone()
            .or_else(|| settings.session.log_file.clone()),
        _ => None,
    };
    init_logging(cli.verbose, cli.quiet, log_file)?;

    // Set up Ctrl+C handler
    let running = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        if !r.load(std::sync::atomic::Ordering::SeqCst) {
            // Second Ctrl+C, force exit
            eprintln!("\n{}", style("Forced exit").red().bold());
            std::process::exit(130);
        }
        r.store(false, std::sync::atomic::Ordering::SeqCst);
        eprintln!(
            "\n{}",
            style("Stopping... Press Ctrl+C again to force exit").yellow()
        );
    })?;

    match cli.command {
        Commands::Flash {
            archive,
            mount_root,
            labels,
            ignore_window,
            log_file: _,
        } => commands::flash::execute(commands::flash::FlashArgs {
            archive,
            mount_root,
            labels,
            ignore_window,
            settings,
            running,
            quiet: cli.quiet,
        }),
        Commands::List { json, mount_root } => {
            commands::list::execute(&settings, mount_root, json, cli.quiet)
        }
        Commands::Config { init, path, json } => {
            commands::config::execute(commands::config::ConfigArgs {
                init,
                path,
                json,
                silent: cli.quiet,
                config_file: config_path,
            })
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut std::io::stdout());
            Ok(())
        }
        Commands::Mangen { out_dir } => {
            let cmd = Cli::command();
            let out_path = std::path::Path::new(&out_dir);
            std::fs::create_dir_all(out_path)?;

            // Generate main man page
            let man = Man::new(cmd.clone());
            let mut buffer = Vec::new();
            man.render(&mut buffer)?;
            std::fs::write(out_path.join("splitflasher.1"), buffer)?;
            if !cli.quiet {
                println!("Generated: {}/splitflasher.1", out_dir);
            }

            // Generate man pages for subcommands
            for subcommand in cmd.get_subcommands() {
                let name = subcommand.get_name();
                // Skip hidden commands and meta commands
                if subcommand.is_hide_set()
                    || name == "completions"
                    || name == "mangen"
                    || name == "help"
                {
                    continue;
                }

                let man = Man::new(subcommand.clone());
                let mut buffer = Vec::new();
                man.render(&mut buffer)?;
                let filename = format!("splitflasher-{}.1", name);
                std::fs::write(out_path.join(&filename), buffer)?;
                if !cli.quiet {
                    println!("Generated: {}/{}", out_dir, filename);
                }
            }

            if !cli.quiet {
                println!(
                    "\nInstall with: sudo cp {}/*.1 /usr/local/share/man/man1/",
                    out_dir
                );
            }
            Ok(())
        }
    }
}

/// Install the tracing subscriber
///
/// With a log file everything at info level and above is appended to it;
/// otherwise logs go to the terminal without the session event echo.
fn init_logging(verbose: bool, quiet: bool, log_file: Option<PathBuf>) -> Result<()> {
    let filter = |terminal: bool| {
        if verbose {
            EnvFilter::new("debug")
        } else if quiet && terminal {
            EnvFilter::new("off")
        } else if terminal {
            EnvFilter::new(TERMINAL_FILTER)
        } else {
            EnvFilter::new("info")
        }
    };

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter(false))
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter(true))
                .with_target(false)
                .without_time()
                .init();
        }
    }

    Ok(())
}
