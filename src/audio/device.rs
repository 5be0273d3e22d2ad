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

//! PCM format and the audio device capabilities the workers consume.

use async_trait::async_trait;

use crate::error::Result;

/// A single byte read where a full buffer was expected ends the stream.
pub const END_OF_STREAM: usize = 1;

/// Stream direction, for buffer sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Capture,
    Playback,
}

/// Signed 16-bit little-endian PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    /// Wire format: 8000 Hz mono.
    pub const VOICE: PcmFormat = PcmFormat {
        sample_rate: 8000,
        channels: 1,
    };

    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn bytes_per_frame(&self) -> usize {
        Self::BYTES_PER_SAMPLE * usize::from(self.channels)
    }

    /// Buffer size used when the platform can't report a minimum.
    pub fn fallback_buffer_size(&self) -> usize {
        self.sample_rate as usize * 2
    }
}

/// Microphone stream.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Read PCM bytes into `buf`, returning how many bytes the device
    /// reports. A count larger than `buf` is a device fault and the data
    /// must not be used. `Err` means the device is gone.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Speaker stream.
#[async_trait]
pub trait PlaybackDevice: Send {
    /// Queue PCM bytes for output.
    async fn write(&mut self, buf: &[u8]) -> Result<()>;
}

/// Platform audio subsystem. Devices are released when dropped.
pub trait AudioBackend: Send + Sync {
    /// Minimum viable buffer size in bytes, if the platform can tell.
    fn min_buffer_size(&self, direction: Direction, format: PcmFormat) -> Option<usize>;

    fn open_capture(&self, format: PcmFormat, buffer_size: usize)
        -> Result<Box<dyn CaptureDevice>>;

    fn open_playback(
        &self,
        format: PcmFormat,
        buffer_size: usize,
    ) -> Result<Box<dyn PlaybackDevice>>;
}

/// Buffer size for `direction`, or `sample_rate * 2` bytes when unknown.
pub fn buffer_size(backend: &dyn AudioBackend, direction: Direction, format: PcmFormat) -> usize {
    backend
        .min_buffer_size(direction, format)
        .filter(|size| *size > 0)
        .unwrap_or_else(|| format.fallback_buffer_size())
}
