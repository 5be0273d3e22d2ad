// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Walkie-Talkie terminal front-end.

use anyhow::Result;
use bluer::Address;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use walkie_talkie::audio::CpalBackend;
use walkie_talkie::bluetooth::{BluezRadio, ConnectionManager, Peer, Radio};
use walkie_talkie::config::Config;
use walkie_talkie::session::SessionContext;
use walkie_talkie::{ActionBus, SessionState, WalkieTalkie};

/// A line typed on stdin.
#[derive(Debug, PartialEq)]
enum Command {
    Scan,
    Stop,
    Connect(String),
    Listen,
    Talk,
    Over,
    Disconnect,
    State,
    Devices,
    Audio,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let command = match words.next()? {
        "scan" => Command::Scan,
        "stop" => Command::Stop,
        "connect" => {
            let target = words.collect::<Vec<_>>().join(" ");
            if target.is_empty() {
                return None;
            }
            Command::Connect(target)
        }
        "listen" => Command::Listen,
        "talk" => Command::Talk,
        "over" => Command::Over,
        "disconnect" => Command::Disconnect,
        "state" => Command::State,
        "devices" => Command::Devices,
        "audio" => Command::Audio,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => return None,
    };
    Some(command)
}

/// Resolve a peer typed by address or name against the last search.
fn resolve_peer(state: &SessionState, target: &str) -> Option<Peer> {
    if let Ok(address) = target.parse::<Address>() {
        return Some(
            state
                .devices()
                .into_iter()
                .find(|p| p.address == address)
                .cloned()
                .unwrap_or_else(|| Peer::new(address)),
        );
    }
    state
        .devices()
        .into_iter()
        .find(|p| p.name.as_deref() == Some(target))
        .cloned()
}

fn print_help() {
    println!("Commands:");
    println!("  scan               search for nearby devices");
    println!("  stop               stop searching");
    println!("  devices            list devices found by the last search");
    println!("  audio              list microphones and speakers");
    println!("  connect <addr|name>");
    println!("  listen             wait for a peer to connect");
    println!("  talk / over        start / stop speaking");
    println!("  disconnect");
    println!("  state");
    println!("  quit");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("walkie_talkie=info".parse()?),
        )
        .init();

    info!("Starting Walkie-Talkie v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    // Initialize Bluetooth
    let radio = BluezRadio::new().await?;
    radio.set_name(&config.bluetooth.device_name).await?;
    let radio: Arc<dyn Radio> = Arc::new(radio);

    let audio = Arc::new(CpalBackend::new(
        config.audio.input_device.clone(),
        config.audio.output_device.clone(),
    ));

    let context = SessionContext::new(ActionBus::new());
    let manager = ConnectionManager::new(
        radio,
        context.clone(),
        config.bluetooth.manager_config(),
    );
    let walkie = WalkieTalkie::with_voice_idle(context, audio, config.audio.voice_idle());
    let reducer = walkie.spawn();

    let enabled = manager.is_radio_enabled().await;
    if !enabled {
        warn!("Bluetooth adapter is off");
    }
    walkie.set_radio_enabled(enabled);

    // Log state changes
    let mut states = walkie.subscribe();
    let state_log = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            match &state {
                SessionState::Connected { distance, mode } => {
                    info!("State: Connected ({} m, {})", distance, mode.as_str())
                }
                SessionState::Searching { devices } => {
                    info!("State: {} ({} found)", state.as_str(), devices.len())
                }
                _ => info!("State: {}", state.as_str()),
            }
        }
    });

    print_help();
    info!("Ready.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        error!("stdin: {}", e);
                        break;
                    }
                };
                let Some(command) = parse_command(&line) else {
                    if !line.trim().is_empty() {
                        println!("Unknown command, type 'help'");
                    }
                    continue;
                };
                match command {
                    Command::Scan => manager.start_discovery().await,
                    Command::Stop => manager.stop_discovery(),
                    Command::Connect(target) => match resolve_peer(&walkie.state(), &target) {
                        Some(peer) => manager.connect(peer),
                        None => println!("Unknown device '{}'", target),
                    },
                    Command::Listen => manager.listen(),
                    Command::Talk => {
                        if !walkie.start_speaking() {
                            println!("Can't talk now ({})", walkie.state().as_str());
                        }
                    }
                    Command::Over => {
                        walkie.stop_speaking();
                    }
                    Command::Disconnect => manager.disconnect().await,
                    Command::State => {
                        walkie.set_radio_enabled(manager.is_radio_enabled().await);
                        println!("{:?}", walkie.state());
                    }
                    Command::Devices => {
                        for peer in walkie.state().devices() {
                            let bonded = if peer.is_bonded() { " [paired]" } else { "" };
                            println!("  {}{}", peer, bonded);
                        }
                    }
                    Command::Audio => {
                        let (inputs, outputs) = CpalBackend::list_devices();
                        println!("Microphones:");
                        for name in inputs {
                            println!("  {}", name);
                        }
                        println!("Speakers:");
                        for name in outputs {
                            println!("  {}", name);
                        }
                    }
                    Command::Help => print_help(),
                    Command::Quit => {
                        info!("Quit requested");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    manager.disconnect().await;
    manager.shutdown();
    reducer.abort();
    state_log.abort();

    info!("Walkie-Talkie stopped");
    Ok(())
}
