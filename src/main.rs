// Headless Sense HAT emulator
// Drives the emulated sensors until Ctrl+C, or replays a recording

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use sense_emu::{Emulator, EmulatorConfig, Playback, SystemClock};

fn main() -> Result<()> {
    let config_path = EmulatorConfig::default_path();
    let config = EmulatorConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    info!("Loaded config from {}", config_path.display());

    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_clone.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    let mut emulator = Emulator::start(&config).context("Failed to start emulator")?;

    if let Some(file) = &config.playback.file {
        let playback = Playback::new(SystemClock).with_stop(Arc::clone(&stop));
        let stats = emulator
            .play_with(file, &playback)
            .with_context(|| format!("Playback of {} failed", file.display()))?;
        info!("Played {} records, skipped {}", stats.played, stats.skipped);
        return Ok(());
    }

    info!("Emulator ready. Press Ctrl+C to exit.");
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }
    info!("Shutting down");
    drop(emulator);
    Ok(())
}
