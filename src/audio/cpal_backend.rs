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

//! Audio backend on cpal.
//!
//! cpal streams are not `Send` on every platform, so each device owns a
//! dedicated thread that builds the stream, keeps it alive, and drops it
//! when the device handle is dropped. Samples cross the thread boundary
//! through channels.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream,
    StreamConfig, SupportedBufferSize, SupportedStreamConfigRange,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use super::device::{AudioBackend, CaptureDevice, Direction, PcmFormat, PlaybackDevice};
use crate::error::{Error, Result};

/// Captured chunks buffered between the audio callback and the worker.
const MAX_CAPTURE_CHUNKS: usize = 64;

/// Playback queue limit, in buffers, before the oldest samples are dropped.
const MAX_PLAYBACK_BUFFERS: usize = 4;

/// Device sample formats we can convert from and to, best first.
const SUPPORTED_FORMATS: [SampleFormat; 3] = [SampleFormat::I16, SampleFormat::F32, SampleFormat::U16];

/// Device-side stream layout. The wire is always LE i16 mono; capture
/// downmixes extra channels and playback duplicates into them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Negotiated {
    sample_format: SampleFormat,
    channels: u16,
    buffer_size: SupportedBufferSize,
}

/// Pick a config at the voice sample rate, preferring mono, then stereo,
/// then any channel count, and i16 over f32 over u16 within each.
fn negotiate(ranges: &[SupportedStreamConfigRange], format: PcmFormat) -> Option<Negotiated> {
    let usable = |range: &&SupportedStreamConfigRange| {
        range.channels() > 0
            && range.min_sample_rate().0 <= format.sample_rate
            && range.max_sample_rate().0 >= format.sample_rate
    };
    let channel_rank = |channels: u16| match channels {
        c if c == format.channels => 0,
        2 => 1,
        _ => 2,
    };

    ranges
        .iter()
        .filter(usable)
        .filter_map(|range| {
            let rank = SUPPORTED_FORMATS
                .iter()
                .position(|f| *f == range.sample_format())?;
            Some(((channel_rank(range.channels()), rank), range))
        })
        .min_by_key(|(key, _)| *key)
        .map(|(_, range)| Negotiated {
            sample_format: range.sample_format(),
            channels: range.channels(),
            buffer_size: *range.buffer_size(),
        })
}

/// System audio through cpal, with optional device selection by name.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalBackend {
    pub fn new(input_device: Option<String>, output_device: Option<String>) -> Self {
        Self {
            input_device,
            output_device,
        }
    }

    /// Names of the available input and output devices.
    pub fn list_devices() -> (Vec<String>, Vec<String>) {
        let host = cpal::default_host();
        let inputs = host
            .input_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default();
        let outputs = host
            .output_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default();
        (inputs, outputs)
    }

    fn device(&self, direction: Direction) -> Option<Device> {
        let host = cpal::default_host();
        let (wanted, default) = match direction {
            Direction::Capture => (self.input_device.as_deref(), host.default_input_device()),
            Direction::Playback => (self.output_device.as_deref(), host.default_output_device()),
        };

        let Some(wanted) = wanted else {
            return default;
        };

        let found = match direction {
            Direction::Capture => host.input_devices().ok().and_then(|mut devices| {
                devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            }),
            Direction::Playback => host.output_devices().ok().and_then(|mut devices| {
                devices.find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            }),
        };

        if found.is_none() {
            warn!("Audio device '{}' not found, using default", wanted);
        }
        found.or(default)
    }

    fn negotiate(
        &self,
        device: &Device,
        direction: Direction,
        format: PcmFormat,
    ) -> Result<Negotiated> {
        let ranges: Vec<_> = match direction {
            Direction::Capture => device
                .supported_input_configs()
                .map_err(|e| Error::AudioInit(e.to_string()))?
                .collect(),
            Direction::Playback => device
                .supported_output_configs()
                .map_err(|e| Error::AudioInit(e.to_string()))?
                .collect(),
        };

        negotiate(&ranges, format).ok_or_else(|| {
            Error::AudioInit(format!(
                "device has no {} Hz config in a supported sample format",
                format.sample_rate
            ))
        })
    }
}

/// Stream config for `negotiated`, asking for `buffer_size` wire bytes per
/// callback when the device allows it.
fn stream_config(format: PcmFormat, negotiated: Negotiated, buffer_size: usize) -> StreamConfig {
    let frames = u32::try_from(buffer_size / format.bytes_per_frame()).ok();
    let buffer_size = match (negotiated.buffer_size, frames) {
        (SupportedBufferSize::Range { min, max }, Some(frames)) if (min..=max).contains(&frames) => {
            BufferSize::Fixed(frames)
        }
        _ => BufferSize::Default,
    };
    StreamConfig {
        channels: negotiated.channels,
        sample_rate: SampleRate(format.sample_rate),
        buffer_size,
    }
}

/// Average one interleaved frame down to a single i16 sample.
fn downmix<T>(frame: &[T]) -> i16
where
    T: Sample,
    i16: FromSample<T>,
{
    let sum: i32 = frame.iter().map(|s| i32::from(i16::from_sample(*s))).sum();
    (sum / frame.len().max(1) as i32) as i16
}

fn build_capture<T>(
    device: &Device,
    config: &StreamConfig,
    frames_tx: async_channel::Sender<Vec<u8>>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = usize::from(config.channels.max(1));
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let bytes: Vec<u8> = data
                .chunks_exact(channels)
                .flat_map(|frame| downmix(frame).to_le_bytes())
                .collect();
            if frames_tx.try_send(bytes).is_err() {
                debug!("Capture queue full, chunk dropped");
            }
        },
        |err| error!("Audio capture error: {}", err),
        None,
    )
}

fn build_playback<T>(
    device: &Device,
    config: &StreamConfig,
    samples: Arc<Mutex<VecDeque<i16>>>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = usize::from(config.channels.max(1));
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut samples = samples.lock();
            for frame in data.chunks_mut(channels) {
                let sample = T::from_sample(samples.pop_front().unwrap_or(0));
                frame.fill(sample);
            }
        },
        |err| error!("Audio playback error: {}", err),
        None,
    )
}

/// Build a stream on its own thread and keep it alive until `stop_rx`
/// disconnects. Returns once the stream is playing or failed to start.
fn run_stream<F>(name: &str, build: F) -> Result<std_mpsc::Sender<()>>
where
    F: FnOnce() -> Result<Stream> + Send + 'static,
{
    let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let label = name.to_string();

    thread::Builder::new().name(name.into()).spawn(move || {
        let stream = match build() {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        if let Err(e) = stream.play() {
            let _ = ready_tx.send(Err(Error::AudioInit(e.to_string())));
            return;
        }
        let _ = ready_tx.send(Ok(()));
        // Parked until the device handle drops its sender.
        let _ = stop_rx.recv();
        drop(stream);
        debug!("{} stream released", label);
    })?;

    ready_rx
        .recv()
        .map_err(|_| Error::AudioInit(format!("{} thread exited", name)))??;
    Ok(stop_tx)
}

impl AudioBackend for CpalBackend {
    fn min_buffer_size(&self, direction: Direction, format: PcmFormat) -> Option<usize> {
        let device = self.device(direction)?;
        match self.negotiate(&device, direction, format).ok()?.buffer_size {
            SupportedBufferSize::Range { min, .. } => Some(min as usize * format.bytes_per_frame()),
            SupportedBufferSize::Unknown => None,
        }
    }

    /// Blocks until the stream thread has started the stream.
    fn open_capture(
        &self,
        format: PcmFormat,
        buffer_size: usize,
    ) -> Result<Box<dyn CaptureDevice>> {
        let device = self
            .device(Direction::Capture)
            .ok_or_else(|| Error::AudioInit("no input device".into()))?;
        let negotiated = self.negotiate(&device, Direction::Capture, format)?;
        let config = stream_config(format, negotiated, buffer_size);
        let (frames_tx, frames_rx) = async_channel::bounded::<Vec<u8>>(MAX_CAPTURE_CHUNKS);

        let stream_config = config.clone();
        let stop = run_stream("audio-capture", move || {
            let stream = match negotiated.sample_format {
                SampleFormat::I16 => build_capture::<i16>(&device, &stream_config, frames_tx),
                SampleFormat::F32 => build_capture::<f32>(&device, &stream_config, frames_tx),
                SampleFormat::U16 => build_capture::<u16>(&device, &stream_config, frames_tx),
                other => {
                    return Err(Error::AudioInit(format!("unsupported sample format {:?}", other)))
                }
            };
            stream.map_err(|e| Error::AudioInit(e.to_string()))
        })?;
        info!(
            "Microphone opened: {:?} as {:?}",
            config, negotiated.sample_format
        );

        Ok(Box::new(CpalCapture {
            frames: frames_rx,
            pending: VecDeque::new(),
            _stop: stop,
        }))
    }

    /// Blocks until the stream thread has started the stream.
    fn open_playback(
        &self,
        format: PcmFormat,
        buffer_size: usize,
    ) -> Result<Box<dyn PlaybackDevice>> {
        let device = self
            .device(Direction::Playback)
            .ok_or_else(|| Error::AudioInit("no output device".into()))?;
        let negotiated = self.negotiate(&device, Direction::Playback, format)?;
        let config = stream_config(format, negotiated, buffer_size);
        let queue = Arc::new(Mutex::new(VecDeque::<i16>::new()));

        let samples = queue.clone();
        let stream_config = config.clone();
        let stop = run_stream("audio-playback", move || {
            let stream = match negotiated.sample_format {
                SampleFormat::I16 => build_playback::<i16>(&device, &stream_config, samples),
                SampleFormat::F32 => build_playback::<f32>(&device, &stream_config, samples),
                SampleFormat::U16 => build_playback::<u16>(&device, &stream_config, samples),
                other => {
                    return Err(Error::AudioInit(format!("unsupported sample format {:?}", other)))
                }
            };
            stream.map_err(|e| Error::AudioInit(e.to_string()))
        })?;
        info!(
            "Speaker opened: {:?} as {:?}",
            config, negotiated.sample_format
        );

        Ok(Box::new(CpalPlayback {
            queue,
            carry: None,
            max_samples: MAX_PLAYBACK_BUFFERS * buffer_size / PcmFormat::BYTES_PER_SAMPLE,
            _stop: stop,
        }))
    }
}

struct CpalCapture {
    frames: async_channel::Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    _stop: std_mpsc::Sender<()>,
}

#[async_trait]
impl CaptureDevice for CpalCapture {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        while self.pending.len() < buf.len() {
            let chunk = self
                .frames
                .recv()
                .await
                .map_err(|_| Error::AudioStream("capture stream closed".into()))?;
            self.pending.extend(chunk);
        }

        let len = buf.len();
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..len)) {
            *dst = src;
        }
        Ok(buf.len())
    }
}

struct CpalPlayback {
    queue: Arc<Mutex<VecDeque<i16>>>,
    /// Odd trailing byte from the previous write.
    carry: Option<u8>,
    max_samples: usize,
    _stop: std_mpsc::Sender<()>,
}

impl CpalPlayback {
    fn decode(&mut self, buf: &[u8]) -> Vec<i16> {
        let mut bytes: Vec<u8> = Vec::with_capacity(buf.len() + 1);
        bytes.extend(self.carry.take());
        bytes.extend_from_slice(buf);

        let mut chunks = bytes.chunks_exact(2);
        let samples = chunks
            .by_ref()
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        self.carry = chunks.remainder().first().copied();
        samples
    }
}

#[async_trait]
impl PlaybackDevice for CpalPlayback {
    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        let samples = self.decode(buf);
        let mut queue = self.queue.lock();
        queue.extend(samples);
        if queue.len() > self.max_samples {
            let excess = queue.len() - self.max_samples;
            queue.drain(..excess);
            debug!("Playback lagging, dropped {} samples", excess);
        }
        Ok(())
    }
}
