/// Clapper service binary
///
/// Listens for double claps on the default microphone, or replays a recording
/// given in `CLAPPER_INPUT` (`.wav` or raw 16-bit little-endian PCM).

use anyhow::{Context, Result};
use clapper::{
    Clapper, ClapperConfig, MicrophoneSource, MonotonicClock, ReplaySource, StartupState,
};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Control loop period
const TICK_INTERVAL: Duration = Duration::from_millis(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("clapper=debug".parse()?))
        .init();

    info!("Starting clapper service");

    let config = ClapperConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    match std::env::var("CLAPPER_INPUT") {
        Ok(path) => {
            // Pad with silence so a double clap at the very end is still accepted
            let tail = Duration::from_millis(config.time_window_max_ms) + TICK_INTERVAL;
            let source = ReplaySource::open(&path, config.sample_rate)
                .with_context(|| format!("Failed to open recording {}", path))?
                .with_trailing_silence(tail);
            run(config, source, ReplaySource::is_finished).await
        }
        Err(_) => run_device(config).await,
    }
}

#[cfg(feature = "device")]
async fn run_device(config: ClapperConfig) -> Result<()> {
    let microphone = clapper::CpalMicrophone::default_device().context("Failed to open microphone")?;
    run(config, microphone, |_| false).await
}

#[cfg(not(feature = "device"))]
async fn run_device(_config: ClapperConfig) -> Result<()> {
    anyhow::bail!("CLAPPER_INPUT is not set and live capture needs the `device` feature")
}

/// Tick the clapper until Ctrl-C or until `finished` reports the source is done
async fn run<M, F>(config: ClapperConfig, microphone: M, finished: F) -> Result<()>
where
    M: MicrophoneSource,
    F: Fn(&M) -> bool,
{
    let mut clapper = Clapper::new(config, microphone, MonotonicClock::new())?;

    clapper.on_clap_state(|state| info!("Clap state: {}", state));
    clapper.on_double_clap(|| info!("Double clap detected!"));
    clapper.setup();

    info!("Clapper running. Clap twice...");

    let mut interval = tokio::time::interval(TICK_INTERVAL);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // Event loop
    loop {
        tokio::select! {
            _ = interval.tick() => {
                clapper.tick();
                if clapper.startup_state() == StartupState::Running && finished(clapper.microphone()) {
                    info!("Recording finished");
                    break;
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down");
                break;
            }
        }
    }

    // Cleanup
    clapper.stop();
    info!("Final stats: {}", serde_json::to_string(&clapper.stats())?);
    info!("Clapper service stopped");

    Ok(())
}
