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

//! Bluetooth walkie-talkie core.
//!
//! Discovery and connection over RFCOMM, full-duplex PCM streaming on the
//! shared socket, BLE RSSI ranging, and the session state machine that a
//! front-end drives.

pub mod audio;
pub mod bluetooth;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod state;
pub mod walkie;

pub use error::{Error, Result};
pub use events::{Action, ActionBus};
pub use state::{SessionState, WalkieMode};
pub use walkie::WalkieTalkie;
