//! surfchan: run the bridge in play mode
//!
//! Launches the server, waits for the plugin and the operator, then sends
//! idle steps so a human can drive while telemetry and captures flow through
//! the bridge. Runs until Ctrl-C or the game disconnects.
//!
//! Usage: `surfchan [config.json] [map]`

use anyhow::{Result, anyhow};
use std::io::BufRead;
use std::sync::Arc;
use surfchan_bridge::Signal;
use surfchan_core::{BridgeConfig, StepAction, SurfError};
use surfchan_game::{Screen, SessionState, SyncBridge};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1) {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };
    let map_name = match args.get(2) {
        Some(name) => name.clone(),
        None => {
            let mut names: Vec<&String> = config.maps.keys().collect();
            names.sort();
            names
                .first()
                .map(|name| name.to_string())
                .ok_or_else(|| anyhow!("no maps configured"))?
        }
    };

    info!("Starting surfchan on map {}", map_name);

    let screen = screen(&config);
    let bridge = SyncBridge::start(config, screen)?;
    bridge.watch_ctrl_c();
    spawn_operator_input(bridge.start_trigger());

    let result = play(&bridge, &map_name);
    bridge.close()?;
    info!("Step timings: {}", bridge.timings());
    result
}

#[cfg(feature = "desktop")]
fn screen(_config: &BridgeConfig) -> Arc<dyn Screen> {
    Arc::new(surfchan_game::DesktopScreen::new())
}

#[cfg(not(feature = "desktop"))]
fn screen(config: &BridgeConfig) -> Arc<dyn Screen> {
    warn!("Built without the `desktop` feature, observations will be blank frames");
    let size = config.window.size as i32;
    Arc::new(surfchan_game::HeadlessScreen::new(
        config.window.title.clone(),
        surfchan_game::WindowRect {
            left: 0,
            top: 0,
            right: size,
            bottom: size,
        },
    ))
}

/// Idle-step until the bridge is interrupted or the game goes away
fn play(bridge: &SyncBridge, map_name: &str) -> Result<()> {
    match bridge.init(map_name) {
        Ok(()) => {}
        Err(SurfError::Cancelled) => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    loop {
        if bridge.bridge().session_state() != SessionState::Connected {
            warn!("Game disconnected, stopping");
            return Ok(());
        }
        match bridge.step(StepAction::idle()) {
            Ok(obs) => debug!(
                "pos={:?} speed={:.1} crouch={}",
                obs.telemetry.position, obs.telemetry.speed, obs.telemetry.crouching
            ),
            Err(SurfError::Cancelled) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Fire the start gate when the operator presses enter
fn spawn_operator_input(gate: Signal) {
    std::thread::spawn(move || {
        info!("Press enter to start...");
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) => warn!("stdin closed, starting without operator"),
            Ok(_) => {}
            Err(e) => warn!("Failed to read stdin ({}), starting without operator", e),
        }
        gate.fire();
    });
}
