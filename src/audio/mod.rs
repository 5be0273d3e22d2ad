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

//! Audio capture and playback over the transport socket.

mod capture;
mod cpal_backend;
mod device;
mod playback;

pub use capture::CaptureWorker;
pub use cpal_backend::CpalBackend;
pub use device::{
    buffer_size, AudioBackend, CaptureDevice, Direction, PcmFormat, PlaybackDevice,
    END_OF_STREAM,
};
pub use playback::PlaybackWorker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Handle to a running audio worker.
///
/// Stopping is cooperative: the worker observes the flag at the top of its
/// next loop iteration and finishes the buffer it is on.
pub struct Worker {
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Worker {
    fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(body(running.clone()));
        Self { running, task }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Wait for the worker to finish on its own.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            tracing::error!("Audio worker panicked: {}", e);
        }
    }
}
