//! Simulated transport for testing.
//!
//! `MockTransport` serves the devices registered in a [`PortRegistry`]. Echo
//! devices greet each new session with a readiness preamble and reflect every
//! accepted write back as inbound data, which exercises the whole
//! write/read/flow-control path without hardware.
//!
//! # Example
//! ```
//! use serial_binding::port::{MockPortOptions, MockTransport, PortRegistry};
//!
//! let registry = PortRegistry::new();
//! registry.register("/dev/exists", MockPortOptions::echo());
//!
//! let transport = MockTransport::new(registry.clone());
//! assert_eq!(transport.registry().len(), 1);
//! ```

use super::registry::{PortRegistry, SessionId};
use super::traits::{
    Connection, InboundSink, OpenOptions, PortInfo, SetOptions, Transport, TransportCapabilities,
};
use crate::error::{BindingError, BindingResult, Operation};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace};

pub use super::registry::MockPortOptions;

/// Transport over simulated devices.
#[derive(Debug, Clone)]
pub struct MockTransport {
    registry: PortRegistry,
    shared_access: bool,
}

impl MockTransport {
    pub fn new(registry: PortRegistry) -> Self {
        Self {
            registry,
            shared_access: true,
        }
    }

    /// Simulate a platform that cannot share ports: `lock: false` is
    /// accepted but every session is exclusive.
    pub fn exclusive_only(mut self) -> Self {
        self.shared_access = false;
        self
    }

    pub fn registry(&self) -> &PortRegistry {
        &self.registry
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            shared_access: self.shared_access,
        }
    }

    async fn list(&self) -> BindingResult<Vec<PortInfo>> {
        Ok(self.registry.list())
    }

    async fn connect(
        &self,
        path: &str,
        options: &OpenOptions,
        sink: InboundSink,
    ) -> BindingResult<Box<dyn Connection>> {
        let session = self
            .registry
            .attach(path, options, self.shared_access, sink.clone())?;

        if let Some(ready) = self.registry.preamble(path) {
            debug!(path, bytes = ready.len(), "sending readiness preamble");
            sink.data(ready);
        }

        Ok(Box::new(MockConnection {
            registry: self.registry.clone(),
            path: path.to_string(),
            session,
        }))
    }
}

/// One session on a simulated device.
#[derive(Debug)]
pub struct MockConnection {
    registry: PortRegistry,
    path: String,
    session: SessionId,
}

impl MockConnection {
    /// Fails once the device was removed or replaced under this session.
    fn ensure_attached(&self, op: Operation) -> BindingResult<()> {
        if self.registry.is_attached(&self.path, self.session) {
            Ok(())
        } else {
            Err(BindingError::disconnected(op, "device removed"))
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn write(&mut self, data: Bytes) -> BindingResult<()> {
        self.ensure_attached(Operation::Write)?;
        let echo = self.registry.record_write(&self.path, data.clone())?;
        trace!(path = %self.path, bytes = data.len(), echo, "write accepted");
        if echo {
            self.registry.emit(&self.path, data);
        }
        Ok(())
    }

    async fn update(&mut self, baud_rate: u32) -> BindingResult<()> {
        self.ensure_attached(Operation::Update)?;
        self.registry.record_baud_rate(&self.path, baud_rate)
    }

    async fn set(&mut self, flags: &SetOptions) -> BindingResult<()> {
        self.ensure_attached(Operation::Set)?;
        trace!(path = %self.path, ?flags, "line flags set");
        Ok(())
    }

    async fn flush(&mut self) -> BindingResult<()> {
        self.ensure_attached(Operation::Flush)
    }

    async fn drain(&mut self) -> BindingResult<()> {
        self.ensure_attached(Operation::Drain)
    }

    async fn close(self: Box<Self>) -> BindingResult<()> {
        self.registry.detach(&self.path, self.session);
        Ok(())
    }
}
