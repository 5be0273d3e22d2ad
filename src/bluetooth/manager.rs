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

//! Discovery and connection management.
//!
//! Drives classic discovery, one outbound connect or one inbound accept at a
//! time, and BLE advertise + scan for ranging once a peer is connected.
//! Every outcome is reported on the action bus.

use futures::StreamExt;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::constants::{channel_uuid, DEFAULT_ACCEPT_TIMEOUT_MS};
use super::radio::{BoxedChannel, Peer, Radio, RadioGuard};
use super::ranging::PeerRanging;
use super::socket::TransportSocket;
use crate::error::Error;
use crate::events::{Action, ActionBus};
use crate::session::SessionContext;

/// Connection manager settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Local name carried in BLE advertisements.
    pub local_name: String,
    /// How long one inbound accept waits.
    pub accept_timeout: Duration,
    /// Advertise and scan for ranging after connecting.
    pub ranging: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            local_name: "Walkie-Talkie".to_string(),
            accept_timeout: Duration::from_millis(DEFAULT_ACCEPT_TIMEOUT_MS),
            ranging: true,
        }
    }
}

/// BLE advertisement plus the scan task feeding the distance estimator.
/// Dropping it stops both.
struct Ranging {
    _advertisement: Option<RadioGuard>,
    scan: Option<JoinHandle<()>>,
}

impl Drop for Ranging {
    fn drop(&mut self) {
        if let Some(scan) = self.scan.take() {
            scan.abort();
        }
    }
}

/// Discovery/connection manager for a single peer session.
pub struct ConnectionManager {
    radio: Arc<dyn Radio>,
    context: Arc<SessionContext>,
    config: ManagerConfig,
    discovery: Mutex<Option<JoinHandle<()>>>,
    connecting: Mutex<Option<JoinHandle<()>>>,
    ranging: Mutex<Option<Ranging>>,
}

impl ConnectionManager {
    pub fn new(
        radio: Arc<dyn Radio>,
        context: Arc<SessionContext>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            radio,
            context,
            config,
            discovery: Mutex::new(None),
            connecting: Mutex::new(None),
            ranging: Mutex::new(None),
        })
    }

    fn bus(&self) -> &ActionBus {
        self.context.bus()
    }

    /// Whether the radio is present and powered.
    pub async fn is_radio_enabled(&self) -> bool {
        self.radio.is_enabled().await
    }

    /// Start classic discovery.
    ///
    /// Emits `DiscoveryStarted`, one `DeviceDiscovered` per bonded peer, then
    /// one per peer the radio finds until discovery is stopped.
    pub async fn start_discovery(&self) {
        self.cancel_discovery();

        let mut found = match self.radio.start_discovery().await {
            Ok(found) => found,
            Err(e) => {
                error!("Discovery not started: {}", e);
                self.bus().emit(Action::error_with(e, "Discovery not started"));
                return;
            }
        };
        info!("Discovery started");
        self.bus().emit(Action::DiscoveryStarted);

        match self.radio.bonded_peers().await {
            Ok(peers) => {
                for peer in peers {
                    debug!("Bonded peer: {}", peer);
                    self.bus().emit(Action::DeviceDiscovered(peer));
                }
            }
            Err(e) => warn!("Failed to list bonded peers: {}", e),
        }

        let bus = self.bus().clone();
        let task = tokio::spawn(async move {
            while let Some(peer) = found.next().await {
                debug!("Found peer: {}", peer);
                bus.emit(Action::DeviceDiscovered(peer));
            }
            debug!("Discovery stream ended");
        });

        let previous = self.discovery.lock().replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Cancel discovery and emit `DiscoveryStopped`. Safe to call repeatedly.
    pub fn stop_discovery(&self) {
        if self.cancel_discovery() {
            info!("Discovery stopped");
        }
        self.bus().emit(Action::DiscoveryStopped);
    }

    /// Drop the found-peer subscription, which takes the radio out of discovery.
    fn cancel_discovery(&self) -> bool {
        match self.discovery.lock().take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Connect to `peer` in the background.
    ///
    /// On success the channel becomes the transport socket and
    /// `DeviceConnected` is emitted. A failed attempt emits `Error`.
    pub fn connect(self: &Arc<Self>, peer: Peer) {
        let this = self.clone();
        let task = tokio::spawn(async move {
            // Discovery slows down connection setup.
            this.stop_discovery();

            info!("Connecting to {}", peer);
            match this.radio.connect(&peer, channel_uuid()).await {
                Ok(channel) => {
                    this.install(channel, peer.clone()).await;
                    this.announce(peer).await;
                }
                Err(e) => {
                    error!("Connection to {} failed: {}", peer, e);
                    this.bus().emit(Action::error_with(e, "Connection failed"));
                }
            }
        });
        self.replace_connecting(task);
    }

    /// Wait for one inbound connection in the background.
    ///
    /// Emits `ListenForConnections` immediately. Each accept waits up to
    /// `timeout`; a timeout or I/O error emits `Error` and ends listening.
    pub fn listen_for_connection(self: &Arc<Self>, timeout: Duration) {
        self.bus().emit(Action::ListenForConnections);

        let this = self.clone();
        let task = tokio::spawn(async move { this.accept_loop(timeout).await });
        self.replace_connecting(task);
    }

    /// Listen with the configured accept timeout.
    pub fn listen(self: &Arc<Self>) {
        self.listen_for_connection(self.config.accept_timeout);
    }

    async fn accept_loop(self: Arc<Self>, timeout: Duration) {
        let mut listener = match self.radio.listen(channel_uuid()).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to open server channel: {}", e);
                self.bus().emit(Action::error_with(e, "Listen failed"));
                return;
            }
        };
        info!("Waiting for connections...");

        loop {
            match tokio::time::timeout(timeout, listener.accept()).await {
                Ok(Ok((channel, peer))) => {
                    info!("Connection from {}", peer);
                    self.install(channel, peer.clone()).await;
                    drop(listener);
                    debug!("Server channel closed");
                    self.announce(peer).await;
                    break;
                }
                Ok(Err(Error::Io(e))) if e.kind() == io::ErrorKind::Interrupted => {
                    debug!("Accept interrupted, retrying");
                }
                Ok(Err(e)) => {
                    error!("Accept error: {}", e);
                    self.bus().emit(Action::error_with(e, "Listen failed"));
                    break;
                }
                Err(_) => {
                    warn!("No connection within {:?}", timeout);
                    self.bus().emit(Action::error("Listen timeout"));
                    break;
                }
            }
        }
    }

    fn replace_connecting(&self, task: JoinHandle<()>) {
        let previous = self.connecting.lock().replace(task);
        if let Some(previous) = previous {
            if !previous.is_finished() {
                debug!("Abandoning previous connection attempt");
                previous.abort();
            }
        }
    }

    async fn install(&self, channel: BoxedChannel, peer: Peer) {
        self.context
            .socket()
            .install(TransportSocket::new(channel, peer))
            .await;
    }

    async fn announce(&self, peer: Peer) {
        info!("Connected to {}", peer);
        let address = peer.address;
        self.bus().emit(Action::DeviceConnected(peer));

        if self.config.ranging {
            self.start_ranging(address).await;
        }
    }

    async fn start_ranging(&self, peer: bluer::Address) {
        self.stop_ranging();

        let advertisement = match self
            .radio
            .advertise(&self.config.local_name, channel_uuid())
            .await
        {
            Ok(guard) => {
                info!("BLE advertising started as '{}'", self.config.local_name);
                Some(guard)
            }
            Err(e) => {
                warn!("BLE advertising failed: {}", e);
                None
            }
        };

        let scan = match self.radio.scan(channel_uuid()).await {
            Ok(mut samples) => {
                info!("BLE scan started for {}", peer);
                let bus = self.bus().clone();
                Some(tokio::spawn(async move {
                    let mut ranging = PeerRanging::new(peer);
                    while let Some(sample) = samples.next().await {
                        if let Some(distance) = ranging.push(&sample) {
                            debug!("Distance to {}: {} m", peer, distance);
                            bus.emit(Action::DistanceChanged(distance));
                        }
                    }
                    debug!("BLE scan ended");
                }))
            }
            Err(e) => {
                warn!("BLE scan failed: {}", e);
                None
            }
        };

        *self.ranging.lock() = Some(Ranging {
            _advertisement: advertisement,
            scan,
        });
    }

    fn stop_ranging(&self) {
        let ranging = self.ranging.lock().take();
        if ranging.is_some() {
            drop(ranging);
            info!("BLE advertising and scan stopped");
        }
    }

    /// Close the transport socket. A no-op when already disconnected.
    pub async fn disconnect(&self) {
        self.stop_ranging();
        if self.context.socket().clear().await {
            info!("Disconnected");
            self.bus().emit(Action::DeviceDisconnected);
        }
    }

    /// Stop ranging and discovery. Safe to call more than once.
    pub fn shutdown(&self) {
        self.stop_ranging();
        self.cancel_discovery();
        if let Some(task) = self.connecting.lock().take() {
            task.abort();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
