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

//! Shared session context.

use std::sync::Arc;

use crate::bluetooth::SocketHolder;
use crate::events::ActionBus;

/// State shared by every component of one walkie-talkie session.
///
/// The connection manager is the only writer of the socket slot. Audio
/// workers read the socket and emit actions; the state machine consumes them.
pub struct SessionContext {
    bus: ActionBus,
    socket: SocketHolder,
}

impl SessionContext {
    pub fn new(bus: ActionBus) -> Arc<Self> {
        Arc::new(Self {
            bus,
            socket: SocketHolder::new(),
        })
    }

    pub fn bus(&self) -> &ActionBus {
        &self.bus
    }

    pub fn socket(&self) -> &SocketHolder {
        &self.socket
    }
}
