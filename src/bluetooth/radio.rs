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

//! Radio capabilities consumed by the connection manager.
//!
//! The manager never touches BlueZ directly. Everything it needs from the
//! platform (enumerating bonded peers, classic discovery, opening and
//! accepting RFCOMM channels, BLE advertise and scan) goes through
//! [`Radio`], so the session logic runs unchanged against in-memory doubles.

use async_trait::async_trait;
use bluer::Address;
use futures::stream::BoxStream;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::error::Result;

/// A reliable, ordered, bidirectional byte stream to the peer.
pub trait Channel: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Channel for T {}

/// Owned channel handed over to the transport socket.
pub type BoxedChannel = Box<dyn Channel>;

/// Keeps a platform registration alive; dropping it releases the registration.
pub type RadioGuard = Box<dyn Send>;

/// Pairing state as reported by the OS pairing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BondState {
    Bonded,
    Unbonded,
}

/// A remote device, keyed by its hardware address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub address: Address,
    pub name: Option<String>,
    pub bond_state: BondState,
}

impl Peer {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            name: None,
            bond_state: BondState::Unbonded,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn bonded(mut self) -> Self {
        self.bond_state = BondState::Bonded;
        self
    }

    pub fn is_bonded(&self) -> bool {
        self.bond_state == BondState::Bonded
    }

    /// Name if known, otherwise the address.
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.address.to_string())
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.address),
            None => write!(f, "{}", self.address),
        }
    }
}

/// One BLE scan result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RssiSample {
    pub address: Address,
    /// Signal strength in dBm.
    pub rssi: i16,
}

/// Server side of an RFCOMM service record.
///
/// Dropping the listener closes the server channel.
#[async_trait]
pub trait ChannelListener: Send {
    /// Wait for one inbound connection.
    async fn accept(&mut self) -> Result<(BoxedChannel, Peer)>;
}

/// Platform Bluetooth radio.
#[async_trait]
pub trait Radio: Send + Sync + 'static {
    /// Whether the adapter is present and powered.
    async fn is_enabled(&self) -> bool;

    /// Peers in the OS pairing store.
    async fn bonded_peers(&self) -> Result<Vec<Peer>>;

    /// Put the radio into classic discovery.
    ///
    /// Yields one peer per found device. Discovery stays active for as long
    /// as the stream is alive; dropping it cancels discovery.
    async fn start_discovery(&self) -> Result<BoxStream<'static, Peer>>;

    /// Open an RFCOMM client channel to `peer` on the `service` record.
    async fn connect(&self, peer: &Peer, service: Uuid) -> Result<BoxedChannel>;

    /// Register an RFCOMM server record for `service`.
    async fn listen(&self, service: Uuid) -> Result<Box<dyn ChannelListener>>;

    /// Start non-connectable BLE advertising with the device name and `service`.
    async fn advertise(&self, local_name: &str, service: Uuid) -> Result<RadioGuard>;

    /// BLE scan filtered to `service`. Scanning stops when the stream is dropped.
    async fn scan(&self, service: Uuid) -> Result<BoxStream<'static, RssiSample>>;
}
