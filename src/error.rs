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

//! Error types for the walkie-talkie core.

use thiserror::Error;

/// Errors raised by the Bluetooth session and the audio workers.
#[derive(Error, Debug)]
pub enum Error {
    /// No usable Bluetooth adapter.
    #[error("Bluetooth radio unavailable: {0}")]
    RadioUnavailable(String),

    /// The radio refused to enter discovery mode.
    #[error("Discovery not started")]
    DiscoveryNotStarted,

    /// BlueZ reported an error.
    #[error("BlueZ error: {0}")]
    Bluetooth(#[from] bluer::Error),

    /// Socket or stream I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An audio device could not be opened.
    #[error("Audio device can't initialize: {0}")]
    AudioInit(String),

    /// An open audio stream failed.
    #[error("Audio stream error: {0}")]
    AudioStream(String),

    /// No transport socket is installed.
    #[error("Not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, Error>;
