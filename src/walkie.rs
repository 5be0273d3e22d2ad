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

//! Walkie-talkie state machine.
//!
//! Reduces the action bus into a single [`SessionState`] and owns the audio
//! workers for the live session. All bus deliveries are serialized through
//! one reducer task.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::{AudioBackend, CaptureWorker, PlaybackWorker, Worker};
use crate::events::{Action, ActionStream};
use crate::session::SessionContext;
use crate::state::{SessionState, WalkieMode};

/// How long the mode stays `Listening` after the last received voice chunk.
pub const VOICE_IDLE_TIMEOUT: Duration = Duration::from_millis(500);

/// Front-end handle to the session state machine.
#[derive(Clone)]
pub struct WalkieTalkie {
    inner: Arc<Inner>,
}

struct Inner {
    state: watch::Sender<SessionState>,
    context: Arc<SessionContext>,
    audio: Arc<dyn AudioBackend>,
    voice_idle: Duration,
    /// Radio state carried by `Idle`.
    radio_enabled: AtomicBool,
    /// Last distance estimate, kept across reconnects.
    last_distance: Mutex<f64>,
    voice_timer: Mutex<Option<JoinHandle<()>>>,
    capture: Mutex<Option<Worker>>,
    playback: Mutex<Option<Worker>>,
}

impl WalkieTalkie {
    pub fn new(context: Arc<SessionContext>, audio: Arc<dyn AudioBackend>) -> Self {
        Self::with_voice_idle(context, audio, VOICE_IDLE_TIMEOUT)
    }

    pub fn with_voice_idle(
        context: Arc<SessionContext>,
        audio: Arc<dyn AudioBackend>,
        voice_idle: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(Inner {
                state,
                context,
                audio,
                voice_idle,
                radio_enabled: AtomicBool::new(false),
                last_distance: Mutex::new(0.0),
                voice_timer: Mutex::new(None),
                capture: Mutex::new(None),
                playback: Mutex::new(None),
            }),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Record whether the radio is on. Shown while `Idle`.
    pub fn set_radio_enabled(&self, enabled: bool) {
        self.inner.radio_enabled.store(enabled, Ordering::Release);
        self.inner.state.send_if_modified(|state| match state {
            SessionState::Idle { bluetooth_enabled } if *bluetooth_enabled != enabled => {
                *bluetooth_enabled = enabled;
                true
            }
            _ => false,
        });
    }

    fn idle(&self) -> SessionState {
        SessionState::idle(self.inner.radio_enabled.load(Ordering::Acquire))
    }

    /// Start the reducer on the session's action bus.
    ///
    /// The subscription is taken before this returns, so every action
    /// emitted afterwards is seen. The task ends when the bus closes or the
    /// last handle is dropped.
    pub fn spawn(&self) -> JoinHandle<()> {
        let actions = self.inner.context.bus().subscribe();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(run(weak, actions))
    }

    /// Apply one action.
    pub fn reduce(&self, action: Action) {
        debug!("Reducing {}", action.name());
        let was_connected = self.inner.state.borrow().is_connected();

        match action {
            Action::DiscoveryStarted => {
                self.inner.state.send_replace(SessionState::searching());
            }
            Action::DeviceDiscovered(peer) => {
                self.inner.state.send_if_modified(|state| match state {
                    SessionState::Searching { devices } => {
                        devices.insert(peer.address, peer);
                        true
                    }
                    _ => false,
                });
            }
            Action::DiscoveryStopped | Action::DeviceDisconnected => {
                self.inner.state.send_replace(self.idle());
            }
            Action::ListenForConnections => {
                self.inner.state.send_replace(SessionState::Listening);
            }
            Action::DeviceConnected(peer) => {
                info!("Connected to {}", peer);
                self.stop_audio();
                let distance = *self.inner.last_distance.lock();
                self.inner.state.send_replace(SessionState::Connected {
                    distance,
                    mode: WalkieMode::Idle,
                });
                self.start_playback();
                return;
            }
            Action::Error { message, cause } => {
                match cause {
                    Some(cause) => warn!("{}: {}", message, cause),
                    None => warn!("{}", message),
                }
                self.inner.state.send_replace(self.idle());
            }
            Action::DistanceChanged(meters) => {
                self.inner.state.send_if_modified(|state| match state {
                    SessionState::Connected { distance, .. } => {
                        *distance = meters;
                        true
                    }
                    _ => false,
                });
                if was_connected {
                    *self.inner.last_distance.lock() = meters;
                }
            }
            Action::ReceivingVoiceStarted => {
                let listening = self.inner.state.send_if_modified(|state| match state {
                    SessionState::Connected { mode, .. } if *mode != WalkieMode::Listening => {
                        *mode = WalkieMode::Listening;
                        true
                    }
                    _ => false,
                });
                if listening || self.mode() == Some(WalkieMode::Listening) {
                    self.restart_voice_timer();
                }
            }
        }

        if was_connected && !self.inner.state.borrow().is_connected() {
            self.stop_audio();
        }
    }

    /// Start talking. Ignored unless connected, and while the peer is
    /// talking.
    pub fn start_speaking(&self) -> bool {
        let started = self.inner.state.send_if_modified(|state| match state {
            SessionState::Connected { mode, .. } if *mode == WalkieMode::Idle => {
                *mode = WalkieMode::Speaking;
                true
            }
            _ => false,
        });
        if !started {
            debug!("start_speaking ignored in {:?}", self.mode());
            return false;
        }

        let worker = CaptureWorker::spawn(self.inner.context.clone(), self.inner.audio.clone());
        if let Some(previous) = self.inner.capture.lock().replace(worker) {
            previous.stop();
        }
        true
    }

    /// Stop talking. Ignored unless connected, and while the peer is
    /// talking.
    pub fn stop_speaking(&self) -> bool {
        let stopped = self.inner.state.send_if_modified(|state| match state {
            SessionState::Connected { mode, .. } if *mode != WalkieMode::Listening => {
                let changed = *mode != WalkieMode::Idle;
                *mode = WalkieMode::Idle;
                changed
            }
            _ => false,
        });
        if self.mode().is_some_and(|mode| mode != WalkieMode::Listening) {
            if let Some(worker) = self.inner.capture.lock().take() {
                worker.stop();
            }
        }
        stopped
    }

    fn mode(&self) -> Option<WalkieMode> {
        self.inner.state.borrow().mode()
    }

    fn start_playback(&self) {
        let worker = PlaybackWorker::spawn(self.inner.context.clone(), self.inner.audio.clone());
        if let Some(previous) = self.inner.playback.lock().replace(worker) {
            previous.stop();
        }
    }

    fn stop_audio(&self) {
        self.inner.stop_audio();
    }

    fn restart_voice_timer(&self) {
        let weak = Arc::downgrade(&self.inner);
        let idle = self.inner.voice_idle;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.state.send_if_modified(|state| match state {
                SessionState::Connected { mode, .. } if *mode == WalkieMode::Listening => {
                    *mode = WalkieMode::Idle;
                    true
                }
                _ => false,
            });
        });

        if let Some(previous) = self.inner.voice_timer.lock().replace(timer) {
            previous.abort();
        }
    }
}

impl Inner {
    fn stop_audio(&self) {
        if let Some(timer) = self.voice_timer.lock().take() {
            timer.abort();
        }
        if let Some(worker) = self.capture.lock().take() {
            worker.stop();
        }
        if let Some(worker) = self.playback.lock().take() {
            worker.stop();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_audio();
    }
}

async fn run(inner: Weak<Inner>, mut actions: ActionStream) {
    while let Some(action) = actions.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        WalkieTalkie { inner }.reduce(action);
    }
    debug!("State machine stopped");
}
