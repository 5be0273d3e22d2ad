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

//! Socket to speaker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use super::device::{buffer_size, AudioBackend, Direction, PcmFormat, PlaybackDevice, END_OF_STREAM};
use super::Worker;
use crate::bluetooth::TransportSocket;
use crate::error::Error;
use crate::events::Action;
use crate::session::SessionContext;

/// Renders PCM received on the transport socket while running.
///
/// Every chunk played signals `ReceivingVoiceStarted`; the state machine
/// debounces the repeats.
pub struct PlaybackWorker;

impl PlaybackWorker {
    pub fn spawn(context: Arc<SessionContext>, backend: Arc<dyn AudioBackend>) -> Worker {
        Worker::spawn(move |running| run(context, backend, running))
    }
}

async fn run(context: Arc<SessionContext>, backend: Arc<dyn AudioBackend>, running: Arc<AtomicBool>) {
    let format = PcmFormat::VOICE;
    let buffer_size = buffer_size(backend.as_ref(), Direction::Playback, format);
    debug!("Playback buffer size = {}", buffer_size);

    // Opening may block while the platform starts the stream.
    let opened =
        tokio::task::spawn_blocking(move || backend.open_playback(format, buffer_size)).await;
    let mut device = match opened {
        Ok(Ok(device)) => device,
        Ok(Err(e)) => {
            error!("Audio track can't initialize: {}", e);
            running.store(false, Ordering::Release);
            return;
        }
        Err(e) => {
            error!("Audio track open panicked: {}", e);
            running.store(false, Ordering::Release);
            return;
        }
    };

    let Some(socket) = context.socket().get() else {
        if running.load(Ordering::Acquire) {
            error!("No transport socket for playback");
            context
                .bus()
                .emit(Action::error_with(Error::NotConnected, "Input stream closed"));
        }
        running.store(false, Ordering::Release);
        return;
    };

    info!("Playback started");
    let mut buffer = vec![0u8; buffer_size];
    if let Err(e) = stream(&context, &socket, device.as_mut(), &mut buffer, &running).await {
        if !running.load(Ordering::Acquire) || socket.is_closed() {
            // The session was torn down or replaced under us.
            debug!("Playback socket closed: {}", e);
        } else {
            error!("Playback read failed: {}", e);
            context
                .bus()
                .emit(Action::error_with(e, "Input stream closed"));
        }
    }

    running.store(false, Ordering::Release);
    drop(device);
    info!("Playback stopped");
}

async fn stream(
    context: &SessionContext,
    socket: &TransportSocket,
    device: &mut dyn PlaybackDevice,
    buffer: &mut [u8],
    running: &AtomicBool,
) -> std::io::Result<()> {
    let mut count = socket.read(buffer).await?;

    while running.load(Ordering::Acquire) && count != END_OF_STREAM && count != 0 {
        context.bus().emit(Action::ReceivingVoiceStarted);
        if let Err(e) = device.write(&buffer[..count]).await {
            error!("Audio track write failed: {}", e);
            return Ok(());
        }
        count = socket.read(buffer).await?;
    }

    match count {
        0 => info!("Peer closed the stream"),
        END_OF_STREAM => info!("End of transmission"),
        _ => {}
    }
    Ok(())
}
