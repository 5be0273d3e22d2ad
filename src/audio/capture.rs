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

//! Microphone to socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::device::{buffer_size, AudioBackend, Direction, PcmFormat};
use super::Worker;
use crate::events::Action;
use crate::session::SessionContext;

/// Streams microphone frames to the transport socket while running.
pub struct CaptureWorker;

impl CaptureWorker {
    pub fn spawn(context: Arc<SessionContext>, backend: Arc<dyn AudioBackend>) -> Worker {
        Worker::spawn(move |running| run(context, backend, running))
    }
}

async fn run(context: Arc<SessionContext>, backend: Arc<dyn AudioBackend>, running: Arc<AtomicBool>) {
    let format = PcmFormat::VOICE;
    let buffer_size = buffer_size(backend.as_ref(), Direction::Capture, format);
    debug!("Capture buffer size = {}", buffer_size);

    let Some(socket) = context.socket().get() else {
        info!("No transport socket, capture not started");
        running.store(false, Ordering::Release);
        return;
    };

    let opened =
        tokio::task::spawn_blocking(move || backend.open_capture(format, buffer_size)).await;
    let mut device = match opened {
        Ok(Ok(device)) => device,
        Ok(Err(e)) => {
            error!("Audio record can't initialize: {}", e);
            running.store(false, Ordering::Release);
            return;
        }
        Err(e) => {
            error!("Audio record open panicked: {}", e);
            running.store(false, Ordering::Release);
            return;
        }
    };

    let mut buffer = vec![0u8; buffer_size];
    info!("Capture started");

    while running.load(Ordering::Acquire) {
        let count = match device.read(&mut buffer).await {
            Ok(count) => count,
            Err(e) => {
                error!("Capture device failed: {}", e);
                break;
            }
        };

        if count > buffer.len() {
            warn!("Unexpected length returned: {}", count);
            continue;
        }

        if let Err(e) = socket.write_all(&buffer[..count]).await {
            if !running.load(Ordering::Acquire) || socket.is_closed() {
                debug!("Capture socket closed: {}", e);
            } else {
                error!("Capture write failed: {}", e);
                context
                    .bus()
                    .emit(Action::error_with(e, "Output stream closed"));
            }
            break;
        }
    }

    running.store(false, Ordering::Release);
    drop(device);
    info!("Capture stopped");
}
