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

//! Domain actions and the bus that carries them to the state machine.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::bluetooth::Peer;
use crate::error::Error;

/// One-shot event produced by the connection manager or the audio workers.
#[derive(Debug, Clone)]
pub enum Action {
    DiscoveryStarted,
    DiscoveryStopped,
    DeviceDiscovered(Peer),
    DeviceConnected(Peer),
    DeviceDisconnected,
    ListenForConnections,
    /// Smoothed distance to the peer in meters.
    DistanceChanged(f64),
    ReceivingVoiceStarted,
    Error {
        cause: Option<Arc<Error>>,
        message: String,
    },
}

impl Action {
    pub fn error(message: impl Into<String>) -> Self {
        Action::Error {
            cause: None,
            message: message.into(),
        }
    }

    pub fn error_with(cause: impl Into<Error>, message: impl Into<String>) -> Self {
        Action::Error {
            cause: Some(Arc::new(cause.into())),
            message: message.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::DiscoveryStarted => "DiscoveryStarted",
            Action::DiscoveryStopped => "DiscoveryStopped",
            Action::DeviceDiscovered(_) => "DeviceDiscovered",
            Action::DeviceConnected(_) => "DeviceConnected",
            Action::DeviceDisconnected => "DeviceDisconnected",
            Action::ListenForConnections => "ListenForConnections",
            Action::DistanceChanged(_) => "DistanceChanged",
            Action::ReceivingVoiceStarted => "ReceivingVoiceStarted",
            Action::Error { .. } => "Error",
        }
    }
}

/// Buffered actions beyond the one being delivered.
pub const EXTRA_BUFFER_CAPACITY: usize = 1;

/// Broadcast stream of [`Action`]s.
///
/// Emitting never blocks. A consumer that falls behind loses the oldest
/// pending actions; later actions supersede them.
#[derive(Debug, Clone)]
pub struct ActionBus {
    tx: broadcast::Sender<Action>,
}

impl Default for ActionBus {
    fn default() -> Self {
        Self::with_capacity(1 + EXTRA_BUFFER_CAPACITY)
    }
}

impl ActionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus holding up to `capacity` undelivered actions.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, action: Action) {
        trace!("Action: {:?}", action);
        if self.tx.send(action).is_err() {
            trace!("No action subscriber");
        }
    }

    /// Subscribe to actions emitted from now on.
    ///
    /// The state machine is the one intended subscriber.
    pub fn subscribe(&self) -> ActionStream {
        ActionStream {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving end of an [`ActionBus`].
pub struct ActionStream {
    rx: broadcast::Receiver<Action>,
}

impl ActionStream {
    /// Next action, or `None` once every bus handle is gone.
    pub async fn recv(&mut self) -> Option<Action> {
        loop {
            match self.rx.recv().await {
                Ok(action) => return Some(action),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Action consumer lagged, dropped {} oldest", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next action if one is already pending.
    pub fn try_recv(&mut self) -> Option<Action> {
        loop {
            match self.rx.try_recv() {
                Ok(action) => return Some(action),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!("Action consumer lagged, dropped {} oldest", skipped);
                }
                Err(_) => return None,
            }
        }
    }
}
