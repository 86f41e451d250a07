//! Device table shared by a transport and every binding opened through it.
//!
//! The registry is the single exclusion point per port: lock arbitration,
//! the recorded open options and the set of live sessions all sit behind one
//! mutex. For the simulated transport it is also the device namespace; the OS
//! transport creates entries implicitly on first open.

use super::traits::{InboundSink, OpenOptions, PortInfo};
use crate::error::{BindingError, BindingResult, Operation};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Identifies one attached session on a port.
pub type SessionId = u64;

/// Manufacturer reported for simulated devices unless overridden.
pub const DEFAULT_MANUFACTURER: &str = "The J5 Robotics Company";

/// Preamble an echo device sends when a session connects.
pub const DEFAULT_READY_DATA: &[u8] = b"READY";

/// Behaviour of a simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockPortOptions {
    /// Reflect written bytes back as inbound data.
    pub echo: bool,
    /// Sent to each new session on connect when `echo` is set.
    pub ready_data: Bytes,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
}

impl Default for MockPortOptions {
    fn default() -> Self {
        Self {
            echo: false,
            ready_data: Bytes::from_static(DEFAULT_READY_DATA),
            manufacturer: Some(DEFAULT_MANUFACTURER.to_string()),
            serial_number: None,
            vendor_id: None,
            product_id: None,
        }
    }
}

impl MockPortOptions {
    /// An echo device with the default `READY` preamble.
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Default::default()
        }
    }

    pub fn with_ready_data(mut self, ready_data: impl Into<Bytes>) -> Self {
        self.ready_data = ready_data.into();
        self
    }
}

#[derive(Debug)]
struct Session {
    id: SessionId,
    locked: bool,
    sink: InboundSink,
}

#[derive(Debug)]
struct Port {
    info: PortInfo,
    echo: bool,
    ready_data: Bytes,
    last_write: Option<Bytes>,
    open_options: Option<OpenOptions>,
    sessions: Vec<Session>,
}

impl Port {
    fn new(info: PortInfo) -> Self {
        Self {
            info,
            echo: false,
            ready_data: Bytes::new(),
            last_write: None,
            open_options: None,
            sessions: Vec::new(),
        }
    }

    fn is_locked(&self) -> bool {
        self.sessions.iter().any(|s| s.locked)
    }

    fn sinks(&self) -> Vec<InboundSink> {
        self.sessions.iter().map(|s| s.sink.clone()).collect()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    ports: BTreeMap<String, Port>,
    next_session: SessionId,
}

/// Shared, cloneable device table.
#[derive(Debug, Clone, Default)]
pub struct PortRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a simulated device at `path`.
    ///
    /// Sessions on a replaced device are told it disconnected; they do not
    /// carry over to the new one.
    pub fn register(&self, path: impl Into<String>, options: MockPortOptions) {
        let path = path.into();
        let info = PortInfo {
            path: path.clone(),
            manufacturer: options.manufacturer,
            serial_number: options.serial_number,
            vendor_id: options.vendor_id,
            product_id: options.product_id,
            ..Default::default()
        }
        .normalized();

        let mut port = Port::new(info);
        port.echo = options.echo;
        port.ready_data = options.ready_data;

        debug!(path = %path, echo = port.echo, "registered port");
        let replaced = self.inner.lock().ports.insert(path.clone(), port);
        if let Some(old) = replaced {
            notify_gone(&path, &old, "device replaced");
        }
    }

    /// Create an entry for `path` unless one exists.
    pub fn ensure(&self, info: PortInfo) {
        let mut state = self.inner.lock();
        state
            .ports
            .entry(info.path.clone())
            .or_insert_with(|| Port::new(info.normalized()));
    }

    /// Drop `path` if it has no live sessions. Returns whether it was removed.
    pub fn forget_idle(&self, path: &str) -> bool {
        let mut state = self.inner.lock();
        let idle = state
            .ports
            .get(path)
            .is_some_and(|p| p.sessions.is_empty());
        if idle {
            state.ports.remove(path);
        }
        idle
    }

    /// Forget every port, disconnecting their sessions.
    pub fn reset(&self) {
        let ports = std::mem::take(&mut self.inner.lock().ports);
        for (path, port) in &ports {
            notify_gone(path, port, "registry reset");
        }
    }

    /// Forget `path`, disconnecting its sessions.
    pub fn remove(&self, path: &str) -> bool {
        let removed = self.inner.lock().ports.remove(path);
        match removed {
            Some(port) => {
                notify_gone(path, &port, "device removed");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.lock().ports.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().ports.is_empty()
    }

    /// Device descriptions, ordered by path.
    pub fn list(&self) -> Vec<PortInfo> {
        self.inner
            .lock()
            .ports
            .values()
            .map(|p| p.info.clone())
            .collect()
    }

    /// Attach a new session to `path`.
    ///
    /// Fails with `PortLocked` while any live session holds a lock. The new
    /// session is locked if it asked to be or if the transport cannot share
    /// ports. The options become the port's recorded configuration.
    pub fn attach(
        &self,
        path: &str,
        options: &OpenOptions,
        shared_access: bool,
        sink: InboundSink,
    ) -> BindingResult<SessionId> {
        let mut state = self.inner.lock();
        state.next_session += 1;
        let id = state.next_session;

        let port = state
            .ports
            .get_mut(path)
            .ok_or_else(|| BindingError::not_found(Operation::Open, path))?;

        if port.is_locked() {
            warn!(path, "open rejected, port is locked by another session");
            return Err(BindingError::locked(Operation::Open, path));
        }

        let locked = options.lock || !shared_access;
        port.sessions.push(Session { id, locked, sink });
        port.open_options = Some(options.clone());
        debug!(path, session = id, locked, "session attached");
        Ok(id)
    }

    /// Release a session and its lock. Returns whether it was attached.
    pub fn detach(&self, path: &str, id: SessionId) -> bool {
        let mut state = self.inner.lock();
        let Some(port) = state.ports.get_mut(path) else {
            return false;
        };
        let before = port.sessions.len();
        port.sessions.retain(|s| s.id != id);
        let removed = port.sessions.len() != before;
        if port.sessions.is_empty() {
            port.open_options = None;
        }
        if removed {
            debug!(path, session = id, "session detached");
        }
        removed
    }

    /// Whether session `id` is still attached to `path`.
    pub fn is_attached(&self, path: &str, id: SessionId) -> bool {
        self.inner
            .lock()
            .ports
            .get(path)
            .is_some_and(|p| p.sessions.iter().any(|s| s.id == id))
    }

    /// Merge a new baud rate into the recorded options of `path`.
    pub fn record_baud_rate(&self, path: &str, baud_rate: u32) -> BindingResult<()> {
        let mut state = self.inner.lock();
        let port = state
            .ports
            .get_mut(path)
            .ok_or_else(|| BindingError::disconnected(Operation::Update, "device removed"))?;
        let options = port
            .open_options
            .as_mut()
            .ok_or_else(|| BindingError::closed(Operation::Update))?;
        options.baud_rate = baud_rate;
        Ok(())
    }

    /// Remember the most recent write on `path`. Returns whether the device
    /// echoes.
    pub fn record_write(&self, path: &str, data: Bytes) -> BindingResult<bool> {
        let mut state = self.inner.lock();
        let port = state
            .ports
            .get_mut(path)
            .ok_or_else(|| BindingError::disconnected(Operation::Write, "device removed"))?;
        port.last_write = Some(data);
        Ok(port.echo)
    }

    /// Readiness preamble for a newly connected session, if the device sends one.
    pub fn preamble(&self, path: &str) -> Option<Bytes> {
        let state = self.inner.lock();
        let port = state.ports.get(path)?;
        (port.echo && !port.ready_data.is_empty()).then(|| port.ready_data.clone())
    }

    /// Deliver bytes from the device to every live session on `path`.
    ///
    /// Returns the number of sessions the bytes were queued for.
    pub fn emit(&self, path: &str, data: impl Into<Bytes>) -> usize {
        let data = data.into();
        if data.is_empty() {
            return 0;
        }
        let sinks = match self.inner.lock().ports.get(path) {
            Some(port) => port.sinks(),
            None => return 0,
        };
        debug!(path, bytes = data.len(), sessions = sinks.len(), "emitting data");
        sinks
            .iter()
            .filter(|sink| sink.data(data.clone()))
            .count()
    }

    /// Notify every live session on `path` that the device vanished.
    pub fn disconnect(&self, path: &str, reason: &str) -> usize {
        let sinks = match self.inner.lock().ports.get(path) {
            Some(port) => port.sinks(),
            None => return 0,
        };
        warn!(path, reason, sessions = sinks.len(), "device disconnected");
        sinks
            .iter()
            .filter(|sink| sink.disconnected(reason))
            .count()
    }

    pub fn last_write(&self, path: &str) -> Option<Bytes> {
        self.inner.lock().ports.get(path)?.last_write.clone()
    }

    pub fn open_options(&self, path: &str) -> Option<OpenOptions> {
        self.inner.lock().ports.get(path)?.open_options.clone()
    }

    pub fn is_locked(&self, path: &str) -> bool {
        self.inner
            .lock()
            .ports
            .get(path)
            .is_some_and(Port::is_locked)
    }

    pub fn session_count(&self, path: &str) -> usize {
        self.inner
            .lock()
            .ports
            .get(path)
            .map_or(0, |p| p.sessions.len())
    }
}

/// Tell every session of a dropped port that its device is gone.
fn notify_gone(path: &str, port: &Port, reason: &str) {
    if port.sessions.is_empty() {
        return;
    }
    warn!(path, reason, sessions = port.sessions.len(), "dropping port with live sessions");
    for session in &port.sessions {
        session.sink.disconnected(reason);
    }
}
