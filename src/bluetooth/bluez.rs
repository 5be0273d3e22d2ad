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

//! BlueZ radio.
//!
//! RFCOMM channels are negotiated through BlueZ profiles registered on the
//! fixed service UUID, so the SDP record matches what the Android peer
//! looks up. Ranging uses an LE broadcast advertisement and an LE discovery
//! session filtered to the same UUID.

use async_trait::async_trait;
use bluer::adv::{Advertisement, Type as AdvertisementType};
use bluer::rfcomm::{Profile, ProfileHandle, Role, Stream};
use bluer::{Adapter, AdapterEvent, Address, Device, DiscoveryFilter, DiscoveryTransport, Session};
use futures::stream::BoxStream;
use futures::StreamExt;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::constants::SERVICE_NAME;
use super::radio::{BondState, BoxedChannel, ChannelListener, Peer, Radio, RadioGuard, RssiSample};
use crate::error::{Error, Result};

/// Radio backed by the default BlueZ adapter.
pub struct BluezRadio {
    session: Session,
    adapter: Adapter,
}

impl BluezRadio {
    /// Open a BlueZ session on the default adapter and power it on.
    pub async fn new() -> Result<Self> {
        info!("Initializing Bluetooth radio...");

        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = session
            .default_adapter()
            .await
            .map_err(|e| Error::RadioUnavailable(e.to_string()))?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        if !adapter.is_powered().await? {
            info!("Powering on Bluetooth adapter...");
            adapter.set_powered(true).await?;
        }

        Ok(Self { session, adapter })
    }

    /// Set the name shown to classic discovery.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.adapter.set_alias(name.to_string()).await?;
        info!("Bluetooth name set to: {}", name);
        Ok(())
    }

    fn profile(service: Uuid, role: Role) -> Profile {
        Profile {
            uuid: service,
            name: Some(SERVICE_NAME.to_string()),
            role: Some(role),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        }
    }
}

async fn peer_from_device(device: &Device) -> Peer {
    let name = match device.alias().await {
        Ok(alias) => Some(alias),
        Err(_) => device.name().await.ok().flatten(),
    };
    let bond_state = if device.is_paired().await.unwrap_or(false) {
        BondState::Bonded
    } else {
        BondState::Unbonded
    };
    Peer {
        address: device.address(),
        name,
        bond_state,
    }
}

async fn peer_for(adapter: &Adapter, address: Address) -> Peer {
    match adapter.device(address) {
        Ok(device) => peer_from_device(&device).await,
        Err(_) => Peer::new(address),
    }
}

#[async_trait]
impl Radio for BluezRadio {
    async fn is_enabled(&self) -> bool {
        self.adapter.is_powered().await.unwrap_or(false)
    }

    async fn bonded_peers(&self) -> Result<Vec<Peer>> {
        let mut peers = Vec::new();
        for address in self.adapter.device_addresses().await? {
            let device = self.adapter.device(address)?;
            if device.is_paired().await? {
                peers.push(peer_from_device(&device).await);
            }
        }
        Ok(peers)
    }

    async fn start_discovery(&self) -> Result<BoxStream<'static, Peer>> {
        if !self.adapter.is_powered().await? {
            return Err(Error::DiscoveryNotStarted);
        }

        self.adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::BrEdr,
                ..Default::default()
            })
            .await?;

        let events = self.adapter.discover_devices().await.map_err(|e| {
            warn!("BlueZ refused discovery: {}", e);
            Error::DiscoveryNotStarted
        })?;

        let adapter = self.adapter.clone();
        let found = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                match event {
                    AdapterEvent::DeviceAdded(address) => Some(peer_for(&adapter, address).await),
                    _ => None,
                }
            }
        });
        Ok(found.boxed())
    }

    async fn connect(&self, peer: &Peer, service: Uuid) -> Result<BoxedChannel> {
        let mut profile = self
            .session
            .register_profile(Self::profile(service, Role::Client))
            .await?;
        let device = self.adapter.device(peer.address)?;
        debug!("Client profile registered for {}", service);

        let request = tokio::select! {
            res = device.connect_profile(&service) => {
                res?;
                profile.next().await
            }
            request = profile.next() => request,
        };
        let request = request.ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "no RFCOMM connection from profile",
            ))
        })?;

        let stream = request.accept()?;
        Ok(Box::new(ProfileChannel {
            stream,
            _profile: profile,
        }))
    }

    async fn listen(&self, service: Uuid) -> Result<Box<dyn ChannelListener>> {
        let profile = self
            .session
            .register_profile(Self::profile(service, Role::Server))
            .await?;
        info!("RFCOMM service record registered (UUID: {})", service);

        Ok(Box::new(ProfileListener {
            adapter: self.adapter.clone(),
            profile: Some(profile),
        }))
    }

    async fn advertise(&self, local_name: &str, service: Uuid) -> Result<RadioGuard> {
        let advertisement = Advertisement {
            advertisement_type: AdvertisementType::Broadcast,
            service_uuids: [service].into_iter().collect(),
            local_name: Some(local_name.to_string()),
            ..Default::default()
        };
        let handle = self.adapter.advertise(advertisement).await?;
        Ok(Box::new(handle))
    }

    async fn scan(&self, service: Uuid) -> Result<BoxStream<'static, RssiSample>> {
        self.adapter
            .set_discovery_filter(DiscoveryFilter {
                uuids: [service].into_iter().collect(),
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..Default::default()
            })
            .await?;

        let events = self.adapter.discover_devices_with_changes().await?;
        let adapter = self.adapter.clone();
        let samples = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move {
                let AdapterEvent::DeviceAdded(address) = event else {
                    return None;
                };
                let rssi = adapter.device(address).ok()?.rssi().await.ok().flatten()?;
                Some(RssiSample { address, rssi })
            }
        });
        Ok(samples.boxed())
    }
}

/// Server side of the registered RFCOMM profile.
struct ProfileListener {
    adapter: Adapter,
    profile: Option<ProfileHandle>,
}

#[async_trait]
impl ChannelListener for ProfileListener {
    async fn accept(&mut self) -> Result<(BoxedChannel, Peer)> {
        let profile = self.profile.as_mut().ok_or_else(|| {
            Error::Io(io::Error::new(io::ErrorKind::NotConnected, "listener closed"))
        })?;
        let request = profile.next().await.ok_or_else(|| {
            Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "profile unregistered"))
        })?;

        let address = request.device();
        let stream = request.accept()?;
        let peer = peer_for(&self.adapter, address).await;

        // The profile registration lives as long as the connection.
        let Some(profile) = self.profile.take() else {
            return Err(Error::NotConnected);
        };
        Ok((
            Box::new(ProfileChannel {
                stream,
                _profile: profile,
            }),
            peer,
        ))
    }
}

pin_project! {
    /// RFCOMM stream that keeps its BlueZ profile registered.
    struct ProfileChannel {
        #[pin]
        stream: Stream,
        _profile: ProfileHandle,
    }
}

impl AsyncRead for ProfileChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.project().stream.poll_read(cx, buf)
    }
}

impl AsyncWrite for ProfileChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().stream.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().stream.poll_shutdown(cx)
    }
}
