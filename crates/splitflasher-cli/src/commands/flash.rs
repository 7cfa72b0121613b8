//! Flash command - runs an interactive flashing session
//!
//! The session watches the mount root for bootloader volumes and copies the
//! right image to the first device and the left image to the second. While
//! it runs, commands are read from stdin:
//!
//! - `load <archive>`: load another firmware archive
//! - `reset`: drop the current session
//! - `release`: stop ignoring recently flashed devices
//! - `quit`: exit
//!
//! End of input only stops command reading. The session keeps flashing
//! until `quit` or Ctrl+C, so it can run with stdin closed or detached.

use anyhow::{Context, Result, bail};
use console::style;
use splitflasher_core::{IngestRequest, Input, ServiceHandle, Settings, SplitFlasher};
use splitflasher_detect::VolumeWatcher;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use crate::progress::EventRenderer;

/// How often the session loop checks for Ctrl+C and stdin
const TICK: Duration = Duration::from_millis(100);

/// Arguments for the flash command
pub struct FlashArgs {
    pub archive: Option<PathBuf>,
    pub mount_root: Option<PathBuf>,
    pub labels: Vec<String>,
    pub ignore_window: Option<u64>,
    pub settings: Settings,
    pub running: Arc<AtomicBool>,
    pub quiet: bool,
}

/// A line typed while the session runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Load a firmware archive
    Load(PathBuf),
    /// Drop the current session
    Reset,
    /// Clear remount suppression
    Release,
    /// Leave the session
    Quit,
    /// Show the command list
    Help,
    /// Blank line
    Empty,
    /// Anything else
    Unknown(String),
}

/// Parse one line of session input
///
/// A line that names an existing `.zip` file on its own is treated as a
/// `load`, so archives can be dragged into the terminal.
pub fn parse_command(line: &str) -> SessionCommand {
    let line = line.trim();
    if line.is_empty() {
        return SessionCommand::Empty;
    }

    let (word, rest) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(w, r)| (w, r.trim()));

    match word.to_ascii_lowercase().as_str() {
        "load" | "l" if !rest.is_empty() => SessionCommand::Load(PathBuf::from(unquote(rest))),
        "reset" | "r" if rest.is_empty() => SessionCommand::Reset,
        "release" if rest.is_empty() => SessionCommand::Release,
        "quit" | "q" | "exit" if rest.is_empty() => SessionCommand::Quit,
        "help" | "h" | "?" if rest.is_empty() => SessionCommand::Help,
        _ => {
            let path = unquote(line);
            if path.to_ascii_lowercase().ends_with(".zip") {
                SessionCommand::Load(PathBuf::from(path))
            } else {
                SessionCommand::Unknown(line.to_string())
            }
        }
    }
}

/// Strip one pair of matching quotes
fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|s| s.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}

/// Execute the flash command
pub fn execute(args: FlashArgs) -> Result<()> {
    let mut config = args
        .settings
        .to_config()
        .context("Invalid configuration")?;
    if let Some(root) = args.mount_root {
        config = config.mount_root(root);
    }
    if !args.labels.is_empty() {
        config = config.labels(args.labels);
    }
    if let Some(secs) = args.ignore_window {
        config = config.ignore_window(Duration::from_secs(secs));
    }

    if !config.mount_root.is_dir() {
        bail!(
            "Mount root {} does not exist",
            config.mount_root.display()
        );
    }

    let quiet = args.quiet;
    if !quiet {
        println!("{}", style("SplitFlasher").bold().cyan());
        println!(
            "  {} {}",
            style("Watching:").bold(),
            style(config.mount_root.display()).cyan()
        );
        println!(
            "  {} {}",
            style("Labels:").bold(),
            config.labels.join(", ")
        );
        println!();
    }

    let (event_tx, event_rx) = mpsc::channel();
    let flasher = SplitFlasher::with_config(config);
    let handle = flasher
        .spawn(Arc::new(event_tx))
        .context("Failed to start flashing session")?;

    let inbox = handle.sender();
    let _watcher = VolumeWatcher::start(flasher.config().watch_config(), move |event| {
        if inbox.send(Input::from(event)).is_err() {
            tracing::debug!("Session stopped, dropping mount event");
        }
    })
    .context("Failed to watch for bootloader volumes")?;
    handle.scan()?;

    let mut renderer = EventRenderer::new(quiet);

    if let Some(archive) = args.archive {
        load(&handle, archive, &event_rx, &mut renderer);
    } else if !quiet {
        println!(
            "{}",
            style("Type 'load <archive.zip>' to load firmware, 'help' for commands.").dim()
        );
    }

    let mut commands = Some(spawn_stdin_reader());

    while args.running.load(Ordering::SeqCst) {
        match event_rx.recv_timeout(TICK) {
            Ok(event) => renderer.render(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        match commands.as_ref().map(mpsc::Receiver::try_recv) {
            Some(Ok(line)) => {
                if !run_command(parse_command(&line), &handle, &event_rx, &mut renderer, quiet)? {
                    break;
                }
            }
            Some(Err(mpsc::TryRecvError::Disconnected)) => {
                tracing::debug!("Input closed, running until interrupted");
                commands = None;
                renderer.notice("Input closed. Press Ctrl+C to stop.");
            }
            Some(Err(mpsc::TryRecvError::Empty)) | None => {}
        }
    }

    handle.shutdown();

    // Show whatever the session reported before stopping
    while let Ok(event) = event_rx.try_recv() {
        renderer.render(&event);
    }
    renderer.clear();

    if !quiet {
        println!("{}", style("Session ended.").dim());
    }
    Ok(())
}

/// Handle one session command; returns `false` when the session should end
fn run_command(
    command: SessionCommand,
    handle: &ServiceHandle,
    events: &mpsc::Receiver<splitflasher_core::Event>,
    renderer: &mut EventRenderer,
    quiet: bool,
) -> Result<bool> {
    match command {
        SessionCommand::Load(path) => load(handle, path, events, renderer),
        SessionCommand::Reset => handle.reset()?,
        SessionCommand::Release => handle.release_suppression()?,
        SessionCommand::Quit => return Ok(false),
        SessionCommand::Help => {
            if !quiet {
                print_help();
            }
        }
        SessionCommand::Empty => {}
        SessionCommand::Unknown(line) => {
            eprintln!(
                "{} Unknown command: {} (type 'help')",
                style("⚠").yellow(),
                line
            );
        }
    }
    Ok(true)
}

/// Load an archive, rendering the events it produced
///
/// Ingestion failures are reported by the session itself.
fn load(
    handle: &ServiceHandle,
    archive: PathBuf,
    events: &mpsc::Receiver<splitflasher_core::Event>,
    renderer: &mut EventRenderer,
) {
    tracing::debug!("Loading {:?}", archive);
    if let Err(e) = handle.ingest(IngestRequest::Path(archive)) {
        tracing::debug!("Ingest failed: {}", e);
    }
    while let Ok(event) = events.try_recv() {
        renderer.render(&event);
    }
}

fn print_help() {
    println!("{}", style("Commands:").bold());
    println!("  load <archive.zip>  Load firmware (a bare .zip path also works)");
    println!("  reset               Drop the current firmware and queue");
    println!("  release             Stop ignoring recently flashed devices");
    println!("  quit                Exit");
}

/// Read stdin lines on a background thread
///
/// The channel disconnects at end of input.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!("Cannot read commands from stdin: {}", e);
    }
    rx
}
