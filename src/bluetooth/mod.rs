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

//! Bluetooth communication module.
//!
//! RFCOMM transport between the two peers, classic discovery, and BLE
//! ranging.

mod bluez;
pub mod constants;
mod manager;
mod radio;
mod ranging;
mod socket;

pub use bluez::BluezRadio;
pub use constants::channel_uuid;
pub use manager::{ConnectionManager, ManagerConfig};
pub use radio::{
    BondState, BoxedChannel, Channel, ChannelListener, Peer, Radio, RadioGuard, RssiSample,
};
pub use ranging::{rssi_to_distance, round_to_tenth, DistanceEstimator, PeerRanging};
pub use socket::{SocketHolder, TransportSocket};
