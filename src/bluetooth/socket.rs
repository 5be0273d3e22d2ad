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

//! The single active transport socket and its process-wide holder.

use parking_lot::RwLock;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use super::radio::{BoxedChannel, Peer};

/// Connected RFCOMM stream shared by the capture and playback workers.
///
/// Reads and writes go through separate halves so both directions run
/// concurrently. Closing wakes any read or write that is parked on the
/// stream and fails it with `BrokenPipe`.
pub struct TransportSocket {
    peer: Peer,
    reader: Mutex<ReadHalf<BoxedChannel>>,
    writer: Mutex<WriteHalf<BoxedChannel>>,
    closed: watch::Sender<bool>,
}

impl TransportSocket {
    pub fn new(channel: BoxedChannel, peer: Peer) -> Self {
        let (reader, writer) = tokio::io::split(channel);
        let (closed, _) = watch::channel(false);
        Self {
            peer,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed,
        }
    }

    /// The remote end of this socket.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Read whatever is available, up to `buf.len()` bytes.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(closed_error());
        }

        let mut reader = self.reader.lock().await;
        tokio::select! {
            res = reader.read(buf) => res,
            _ = wait_closed(closed) => Err(closed_error()),
        }
    }

    /// Write all of `buf` and flush.
    pub async fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(closed_error());
        }

        let mut writer = self.writer.lock().await;
        tokio::select! {
            res = async {
                writer.write_all(buf).await?;
                writer.flush().await
            } => res,
            _ = wait_closed(closed) => Err(closed_error()),
        }
    }

    /// Close the socket. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Socket shutdown: {}", e);
        }
        info!("Transport socket to {} closed", self.peer);
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "transport socket closed")
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed || closed.changed().await.is_err() {
            return;
        }
    }
}

/// Holder for the one live [`TransportSocket`].
///
/// Only the connection manager installs or clears the socket; audio workers
/// take a shared handle with [`SocketHolder::get`].
#[derive(Default)]
pub struct SocketHolder {
    slot: RwLock<Option<Arc<TransportSocket>>>,
}

impl SocketHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current socket, if connected.
    pub fn get(&self) -> Option<Arc<TransportSocket>> {
        self.slot.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Install a freshly connected socket, closing any previous one first.
    pub(crate) async fn install(&self, socket: TransportSocket) -> Arc<TransportSocket> {
        self.clear().await;

        let socket = Arc::new(socket);
        let previous = {
            let mut slot = self.slot.write();
            slot.replace(socket.clone())
        };
        // Lost a race with another install; never leak the displaced socket.
        if let Some(previous) = previous {
            previous.close().await;
        }
        socket
    }

    /// Close the current socket and clear the slot.
    ///
    /// Returns `false` when there was nothing to close.
    pub(crate) async fn clear(&self) -> bool {
        let Some(socket) = self.get() else {
            return false;
        };

        socket.close().await;
        let mut slot = self.slot.write();
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, &socket)) {
            slot.take();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluer::Address;
    use tokio::io::duplex;

    fn peer() -> Peer {
        Peer::new(Address::new([1, 2, 3, 4, 5, 6]))
    }

    #[tokio::test]
    async fn test_socket_read_write() {
        let (local, mut remote) = duplex(64);
        let socket = TransportSocket::new(Box::new(local), peer());

        socket.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        remote.write_all(b"world").await.unwrap();
        let mut buf = [0u8; 16];
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"world");
    }

    #[tokio::test]
    async fn test_close_wakes_pending_read() {
        let (local, _remote) = duplex(64);
        let socket = Arc::new(TransportSocket::new(Box::new(local), peer()));

        let reader = socket.clone();
        let pending = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            reader.read(&mut buf).await
        });

        tokio::task::yield_now().await;
        socket.close().await;

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(socket.is_closed());
        assert!(socket.write_all(b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let holder = SocketHolder::new();
        assert!(!holder.clear().await);

        let (local, _remote) = duplex(64);
        let socket = holder
            .install(TransportSocket::new(Box::new(local), peer()))
            .await;
        assert!(holder.is_connected());

        assert!(holder.clear().await);
        assert!(socket.is_closed());
        assert!(holder.get().is_none());

        assert!(!holder.clear().await);
        assert!(holder.get().is_none());
    }

    #[tokio::test]
    async fn test_install_closes_previous() {
        let holder = SocketHolder::new();
        let (first, _r1) = duplex(64);
        let (second, _r2) = duplex(64);

        let old = holder
            .install(TransportSocket::new(Box::new(first), peer()))
            .await;
        let new = holder
            .install(TransportSocket::new(Box::new(second), peer()))
            .await;

        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert!(Arc::ptr_eq(&holder.get().unwrap(), &new));
    }
}
