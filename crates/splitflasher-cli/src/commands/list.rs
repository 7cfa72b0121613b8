//! List command - displays mounted bootloader volumes

use anyhow::{Context, Result};
use console::style;
use splitflasher_core::Settings;
use splitflasher_detect::{TargetVolume, VolumeClassifier, default_resolver, list_target_volumes};
use std::path::PathBuf;

/// Execute the list command
pub fn execute(
    settings: &Settings,
    mount_root: Option<PathBuf>,
    json: bool,
    silent: bool,
) -> Result<()> {
    let config = settings.to_config().context("Invalid configuration")?;
    let root = mount_root.unwrap_or(config.mount_root);

    let mut classifier = VolumeClassifier::new(&root, config.labels.clone(), default_resolver());
    let volumes = list_target_volumes(&mut classifier)?;

    // JSON output mode - always output even in silent mode (it's machine-readable)
    if json {
        println!("{}", serde_json::to_string_pretty(&volumes)?);
        return Ok(());
    }

    // Silent mode - no human-readable output
    if silent {
        return Ok(());
    }

    if volumes.is_empty() {
        println!("No bootloader volumes found under {}.", root.display());
        println!(
            "{}",
            style(format!(
                "Tip: Double-tap reset on a keyboard half. Accepted labels: {}",
                config.labels.join(", ")
            ))
            .dim()
        );
        return Ok(());
    }

    println!(
        "{} {} volume(s):\n",
        style("Found").green().bold(),
        volumes.len()
    );

    for volume in &volumes {
        print_volume(volume);
    }

    Ok(())
}

/// Print a single volume's information
fn print_volume(volume: &TargetVolume) {
    println!(
        "{} {} {}",
        style("✓").green().bold(),
        style(&volume.label).white().bold(),
        style(volume.path.display()).dim()
    );

    match &volume.device_id {
        Some(id) => println!("    Device: {}", style(id).cyan()),
        None => println!("    Device: {}", style("unknown").yellow()),
    }

    println!();
}
