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

//! Channel identifier and ranging constants shared by both peers.

use md5::{Digest, Md5};
use std::sync::OnceLock;
use uuid::{Builder, Uuid};

/// Namespace string hashed into the channel identifier.
///
/// Part of the wire contract: both peers must hash the same bytes.
pub const APP_NAMESPACE: &str = "com.kartollika.walkietalkie";

/// Service name registered alongside the RFCOMM record.
pub const SERVICE_NAME: &str = "Bluetooth Service";

/// Calibrated RSSI at one meter, in dBm.
pub const RSSI_MEASURED_POWER: i16 = -69;

/// Free-space path-loss exponent.
pub const PATH_LOSS_EXPONENT: f64 = 2.0;

/// Below this RSSI the estimator switches to the short averaging window.
pub const WEAK_SIGNAL_RSSI: i16 = -82;

/// Samples averaged per estimate with a stable signal.
pub const SAMPLES_PER_ESTIMATE: u32 = 5;

/// Samples averaged per estimate with a weak signal.
pub const SAMPLES_PER_ESTIMATE_WEAK: u32 = 2;

/// Default inbound accept timeout in milliseconds.
pub const DEFAULT_ACCEPT_TIMEOUT_MS: u64 = 10_000;

/// Name-based (MD5, version 3) UUID over raw bytes, with no namespace prefix.
pub fn name_uuid_from_bytes(name: &[u8]) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&Md5::digest(name));
    Builder::from_md5_bytes(bytes).into_uuid()
}

/// The RFCOMM service / BLE service identifier for this application.
pub fn channel_uuid() -> Uuid {
    static CHANNEL: OnceLock<Uuid> = OnceLock::new();
    *CHANNEL.get_or_init(|| name_uuid_from_bytes(APP_NAMESPACE.as_bytes()))
}
