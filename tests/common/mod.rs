//! Test doubles for the radio and the audio devices.

#![allow(dead_code)]

use async_trait::async_trait;
use bluer::Address;
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use walkie_talkie::audio::{AudioBackend, CaptureDevice, Direction, PcmFormat, PlaybackDevice};
use walkie_talkie::bluetooth::{
    BoxedChannel, ChannelListener, Peer, Radio, RadioGuard, RssiSample,
};
use walkie_talkie::events::ActionStream;
use walkie_talkie::{Action, Error, Result};

pub fn address(last: u8) -> Address {
    Address::new([0x10, 0x20, 0x30, 0x40, 0x50, last])
}

/// Both ends of an in-memory RFCOMM channel.
pub fn channel_pair() -> (BoxedChannel, BoxedChannel) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (Box::new(a), Box::new(b))
}

/// Next action, failing the test if none arrives.
pub async fn next_action(actions: &mut ActionStream) -> Action {
    tokio::time::timeout(Duration::from_secs(30), actions.recv())
        .await
        .expect("timed out waiting for an action")
        .expect("action bus closed")
}

/// Radio whose discovery, inbound connections, and RSSI readings are fed by
/// the test.
pub struct MockRadio {
    pub enabled: AtomicBool,
    pub fail_discovery: AtomicBool,
    pub bonded: Mutex<Vec<Peer>>,
    outbound: Mutex<Option<BoxedChannel>>,
    found: (async_channel::Sender<Peer>, async_channel::Receiver<Peer>),
    inbound: (
        async_channel::Sender<(BoxedChannel, Peer)>,
        async_channel::Receiver<(BoxedChannel, Peer)>,
    ),
    rssi: (
        async_channel::Sender<RssiSample>,
        async_channel::Receiver<RssiSample>,
    ),
    advertising: Arc<AtomicUsize>,
    pub connect_attempts: AtomicUsize,
}

impl MockRadio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            fail_discovery: AtomicBool::new(false),
            bonded: Mutex::new(Vec::new()),
            outbound: Mutex::new(None),
            found: async_channel::unbounded(),
            inbound: async_channel::unbounded(),
            rssi: async_channel::unbounded(),
            advertising: Arc::new(AtomicUsize::new(0)),
            connect_attempts: AtomicUsize::new(0),
        })
    }

    /// Report a device found by discovery.
    pub fn find(&self, peer: Peer) {
        let _ = self.found.0.try_send(peer);
    }

    /// Channel handed out by the next `connect`.
    pub fn accept_outbound(&self, channel: BoxedChannel) {
        *self.outbound.lock() = Some(channel);
    }

    /// Simulate a peer connecting to our server record.
    pub fn incoming(&self, channel: BoxedChannel, peer: Peer) {
        let _ = self.inbound.0.try_send((channel, peer));
    }

    pub fn rssi(&self, address: Address, rssi: i16) {
        let _ = self.rssi.0.try_send(RssiSample { address, rssi });
    }

    /// Number of live advertisements.
    pub fn advertising(&self) -> usize {
        self.advertising.load(Ordering::SeqCst)
    }
}

struct Advertisement(Arc<AtomicUsize>);

impl Drop for Advertisement {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockListener {
    inbound: async_channel::Receiver<(BoxedChannel, Peer)>,
}

#[async_trait]
impl ChannelListener for MockListener {
    async fn accept(&mut self) -> Result<(BoxedChannel, Peer)> {
        self.inbound.recv().await.map_err(|_| {
            Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "radio gone"))
        })
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn bonded_peers(&self) -> Result<Vec<Peer>> {
        Ok(self.bonded.lock().clone())
    }

    async fn start_discovery(&self) -> Result<BoxStream<'static, Peer>> {
        if self.fail_discovery.load(Ordering::SeqCst) {
            return Err(Error::DiscoveryNotStarted);
        }
        Ok(self.found.1.clone().boxed())
    }

    async fn connect(&self, _peer: &Peer, _service: Uuid) -> Result<BoxedChannel> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.outbound.lock().take().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "host is down",
            ))
        })
    }

    async fn listen(&self, _service: Uuid) -> Result<Box<dyn ChannelListener>> {
        Ok(Box::new(MockListener {
            inbound: self.inbound.1.clone(),
        }))
    }

    async fn advertise(&self, _local_name: &str, _service: Uuid) -> Result<RadioGuard> {
        self.advertising.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Advertisement(self.advertising.clone())))
    }

    async fn scan(&self, _service: Uuid) -> Result<BoxStream<'static, RssiSample>> {
        Ok(self.rssi.1.clone().boxed())
    }
}

/// Microphone that yields fixed chunks, then reports the device gone.
struct ScriptedMic {
    chunks: Vec<Vec<u8>>,
}

#[async_trait]
impl CaptureDevice for ScriptedMic {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.chunks.is_empty() {
            return Err(Error::AudioStream("microphone unplugged".into()));
        }
        let chunk = self.chunks.remove(0);
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

struct RecordingSpeaker {
    played: Arc<Mutex<Vec<u8>>>,
}

#[async_trait]
impl PlaybackDevice for RecordingSpeaker {
    async fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.played.lock().extend_from_slice(buf);
        Ok(())
    }
}

/// Audio backend with a scripted microphone and a recording speaker.
pub struct MockAudio {
    pub buffer_size: usize,
    mic: Mutex<Vec<Vec<u8>>>,
    pub played: Arc<Mutex<Vec<u8>>>,
}

impl MockAudio {
    pub fn new(buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer_size,
            mic: Mutex::new(Vec::new()),
            played: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Chunks the next opened microphone yields.
    pub fn speak(&self, chunks: Vec<Vec<u8>>) {
        *self.mic.lock() = chunks;
    }

    pub fn played(&self) -> Vec<u8> {
        self.played.lock().clone()
    }
}

impl AudioBackend for MockAudio {
    fn min_buffer_size(&self, _: Direction, _: PcmFormat) -> Option<usize> {
        Some(self.buffer_size)
    }

    fn open_capture(&self, _: PcmFormat, _: usize) -> Result<Box<dyn CaptureDevice>> {
        Ok(Box::new(ScriptedMic {
            chunks: std::mem::take(&mut *self.mic.lock()),
        }))
    }

    fn open_playback(&self, _: PcmFormat, _: usize) -> Result<Box<dyn PlaybackDevice>> {
        Ok(Box::new(RecordingSpeaker {
            played: self.played.clone(),
        }))
    }
}
