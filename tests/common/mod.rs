//! Shared test utilities for the binding integration tests.
//!
//! Provides an echo registry matching the reference echo firmware, a harness
//! that records every push and disconnect, and receive helpers with timeouts.

#![allow(dead_code)]

use bytes::Bytes;
use serial_binding::port::{MockPortOptions, MockTransport, OpenOptions, PortRegistry, Transport};
use serial_binding::{Binding, BindingError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};

/// Path of the simulated echo device.
pub const ECHO_PORT: &str = "/dev/exists";

/// What the echo firmware sends once it is ready.
pub const READY: &[u8] = b"READY";

/// How long a receive waits before the test fails.
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait before concluding nothing else is coming.
const QUIET_PERIOD: Duration = Duration::from_millis(50);

/// Registry with a single echo device at [`ECHO_PORT`].
pub fn echo_registry() -> PortRegistry {
    let registry = PortRegistry::new();
    registry.register(ECHO_PORT, MockPortOptions::echo());
    registry
}

/// Options the reference suite opens ports with.
pub fn default_open_options() -> OpenOptions {
    OpenOptions::default()
}

/// A binding plus everything it pushed or reported.
pub struct Harness {
    pub binding: Binding,
    pub chunks: UnboundedReceiver<Bytes>,
    pub disconnects: UnboundedReceiver<BindingError>,
}

impl Harness {
    /// Binding whose push capability always asks for more.
    pub fn new(transport: impl Transport) -> Self {
        Self::with_push(transport, |_| true)
    }

    /// Binding whose push capability answers with `accept`.
    pub fn with_push<F>(transport: impl Transport, accept: F) -> Self
    where
        F: FnMut(&Bytes) -> bool + Send + 'static,
    {
        Self::with_push_shared(Arc::new(transport), accept)
    }

    pub fn with_push_shared<F>(transport: Arc<dyn Transport>, mut accept: F) -> Self
    where
        F: FnMut(&Bytes) -> bool + Send + 'static,
    {
        let (chunk_tx, chunks) = mpsc::unbounded_channel();
        let (disconnect_tx, disconnects) = mpsc::unbounded_channel();
        let binding = Binding::builder()
            .push(move |chunk| {
                let more = accept(&chunk);
                let _ = chunk_tx.send(chunk);
                more
            })
            .disconnect(move |err| {
                let _ = disconnect_tx.send(err);
            })
            .build_shared(transport)
            .expect("both capabilities supplied");
        Self {
            binding,
            chunks,
            disconnects,
        }
    }

    /// Echo harness over `registry`.
    pub fn echo(registry: &PortRegistry) -> Self {
        Self::new(MockTransport::new(registry.clone()))
    }

    /// Open [`ECHO_PORT`] with the default options.
    pub async fn open_echo(&self) {
        self.binding
            .open(ECHO_PORT, default_open_options())
            .expect("valid options")
            .await
            .expect("echo port opens");
    }

    /// Next pushed chunk.
    pub async fn next_chunk(&mut self) -> Bytes {
        tokio::time::timeout(RECV_TIMEOUT, self.chunks.recv())
            .await
            .expect("timed out waiting for a push")
            .expect("push channel closed")
    }

    /// Collect pushes until at least `len` bytes arrived.
    pub async fn read_exact(&mut self, len: usize) -> Vec<u8> {
        let mut received = Vec::new();
        while received.len() < len {
            received.extend_from_slice(&self.next_chunk().await);
        }
        received
    }

    /// Assert no push happens within a short period.
    pub async fn assert_no_push(&mut self) {
        tokio::time::sleep(QUIET_PERIOD).await;
        match self.chunks.try_recv() {
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            Ok(chunk) => panic!("unexpected push of {chunk:?}"),
        }
    }

    pub async fn next_disconnect(&mut self) -> BindingError {
        tokio::time::timeout(RECV_TIMEOUT, self.disconnects.recv())
            .await
            .expect("timed out waiting for a disconnect")
            .expect("disconnect channel closed")
    }
}
