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

//! Session state exposed to the front-end.

use bluer::Address;
use std::collections::HashMap;

use crate::bluetooth::Peer;

/// Audio direction while connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkieMode {
    #[default]
    Idle,
    Speaking,
    Listening,
}

impl WalkieMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalkieMode::Idle => "Idle",
            WalkieMode::Speaking => "Speaking",
            WalkieMode::Listening => "Listening",
        }
    }
}

/// Externally visible session state. Exactly one variant is active.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// No connection. Carries the radio state last reported by the
    /// front-end.
    Idle { bluetooth_enabled: bool },
    /// Classic discovery in progress, peers keyed by address.
    Searching { devices: HashMap<Address, Peer> },
    /// Waiting for an inbound connection.
    Listening,
    /// One live session.
    Connected { distance: f64, mode: WalkieMode },
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle {
            bluetooth_enabled: false,
        }
    }
}

impl SessionState {
    pub fn idle(bluetooth_enabled: bool) -> Self {
        SessionState::Idle { bluetooth_enabled }
    }

    pub fn searching() -> Self {
        SessionState::Searching {
            devices: HashMap::new(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle { .. } => "Idle",
            SessionState::Searching { .. } => "Searching...",
            SessionState::Listening => "Listening...",
            SessionState::Connected { .. } => "Connected",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle { .. })
    }

    /// Whether the radio was on when last checked, when idle.
    pub fn bluetooth_enabled(&self) -> Option<bool> {
        match self {
            SessionState::Idle { bluetooth_enabled } => Some(*bluetooth_enabled),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected { .. })
    }

    /// Audio mode, when connected.
    pub fn mode(&self) -> Option<WalkieMode> {
        match self {
            SessionState::Connected { mode, .. } => Some(*mode),
            _ => None,
        }
    }

    /// Distance to the peer in meters, when connected.
    pub fn distance(&self) -> Option<f64> {
        match self {
            SessionState::Connected { distance, .. } => Some(*distance),
            _ => None,
        }
    }

    /// Discovered peers sorted by address, when searching.
    pub fn devices(&self) -> Vec<&Peer> {
        match self {
            SessionState::Searching { devices } => {
                let mut peers: Vec<&Peer> = devices.values().collect();
                peers.sort_by_key(|p| p.address);
                peers
            }
            _ => Vec::new(),
        }
    }
}
