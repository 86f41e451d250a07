//! The binding: one consumer's view of a serial session.
//!
//! A [`Binding`] is a cheap handle onto a task that owns the session. Every
//! operation is validated synchronously, then queued for that task; the
//! returned [`Pending`] future resolves once the operation's side effects are
//! complete. The command is queued before the call returns, so dropping the
//! future does not cancel the operation.
//!
//! Inbound data is delivered through the push capability given at
//! construction. Delivery only happens after read intent ([`Binding::resume`])
//! and stops whenever the push capability returns `false`.
//!
//! ```no_run
//! use serial_binding::port::{MockPortOptions, MockTransport, OpenOptions, PortRegistry};
//! use serial_binding::Binding;
//!
//! # async fn demo() -> serial_binding::BindingResult<()> {
//! let registry = PortRegistry::new();
//! registry.register("/dev/robot", MockPortOptions::echo());
//!
//! let binding = Binding::builder()
//!     .push(|chunk| {
//!         println!("received {chunk:?}");
//!         true
//!     })
//!     .disconnect(|err| eprintln!("{err}"))
//!     .build(MockTransport::new(registry))?;
//!
//! binding.open("/dev/robot", OpenOptions::default())?.await?;
//! binding.resume()?;
//! binding.write(&b"ping"[..])?.await?;
//! binding.close()?.await?;
//! # Ok(())
//! # }
//! ```

mod actor;
mod command;
pub mod flow;

use self::actor::BindingActor;
use self::command::{Command, Event};
use crate::error::{BindingError, BindingResult, Operation};
use crate::port::{OpenOptions, PortInfo, SetOptions, Transport, UpdateOptions};
use bytes::Bytes;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

pub use self::flow::{FlowController, FlowState};

/// Consumer readiness: receives a chunk and returns whether it wants more.
pub type PushFn = Box<dyn FnMut(Bytes) -> bool + Send>;

/// Out-of-band notification that the device went away.
pub type DisconnectFn = Box<dyn FnMut(BindingError) + Send>;

/// Flags the actor publishes for synchronous inspection.
#[derive(Debug, Default)]
pub(crate) struct Status {
    open: AtomicBool,
    flowing: AtomicBool,
    disconnected: AtomicBool,
    path: Mutex<Option<String>>,
}

/// Completion of a queued operation.
///
/// Resolves exactly once. If the session task is gone before it replies the
/// operation reports `PortClosed`.
#[must_use = "the operation runs regardless, but its outcome is only observable by awaiting"]
#[derive(Debug)]
pub struct Pending {
    op: Operation,
    reply: oneshot::Receiver<BindingResult<()>>,
}

impl Future for Pending {
    type Output = BindingResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let op = self.op;
        match Pin::new(&mut self.reply).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BindingError::closed(op))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Collects the capabilities a [`Binding`] needs.
#[derive(Default)]
pub struct BindingBuilder {
    push: Option<PushFn>,
    disconnect: Option<DisconnectFn>,
}

impl BindingBuilder {
    pub fn push<F>(mut self, push: F) -> Self
    where
        F: FnMut(Bytes) -> bool + Send + 'static,
    {
        self.push = Some(Box::new(push));
        self
    }

    pub fn disconnect<F>(mut self, disconnect: F) -> Self
    where
        F: FnMut(BindingError) + Send + 'static,
    {
        self.disconnect = Some(Box::new(disconnect));
        self
    }

    /// Spawn the session task over `transport`.
    ///
    /// Fails with `InvalidArgument` if either capability is missing. Must be
    /// called from within a Tokio runtime.
    pub fn build(self, transport: impl Transport) -> BindingResult<Binding> {
        self.build_shared(Arc::new(transport))
    }

    /// Like [`build`](Self::build), for a transport shared with other bindings.
    pub fn build_shared(self, transport: Arc<dyn Transport>) -> BindingResult<Binding> {
        let push = self
            .push
            .ok_or_else(|| BindingError::invalid(Operation::New, "push capability is required"))?;
        let disconnect = self.disconnect.ok_or_else(|| {
            BindingError::invalid(Operation::New, "disconnect capability is required")
        })?;

        let (events, receiver) = mpsc::unbounded_channel();
        let status = Arc::new(Status::default());
        let actor = BindingActor::new(
            transport,
            push,
            disconnect,
            Arc::clone(&status),
            events.downgrade(),
        );
        tokio::spawn(actor.run(receiver));

        Ok(Binding { events, status })
    }
}

impl std::fmt::Debug for BindingBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingBuilder")
            .field("push", &self.push.is_some())
            .field("disconnect", &self.disconnect.is_some())
            .finish()
    }
}

/// Handle onto one session state machine.
///
/// Clones share the same session. When the last clone is dropped the task
/// closes any open session and exits.
#[derive(Debug, Clone)]
pub struct Binding {
    events: mpsc::UnboundedSender<Event>,
    status: Arc<Status>,
}

impl Binding {
    pub fn builder() -> BindingBuilder {
        BindingBuilder::default()
    }

    /// Enumerate the devices `transport` can open.
    pub async fn list<T>(transport: &T) -> BindingResult<Vec<PortInfo>>
    where
        T: Transport + ?Sized,
    {
        let ports = transport
            .list()
            .await
            .map_err(|e| e.with_operation(Operation::List))?;
        Ok(ports.into_iter().map(PortInfo::normalized).collect())
    }

    pub fn is_open(&self) -> bool {
        self.status.open.load(Ordering::SeqCst)
    }

    pub fn is_flowing(&self) -> bool {
        self.status.flowing.load(Ordering::SeqCst)
    }

    /// Whether the transport reported a disconnect for the open session.
    pub fn is_disconnected(&self) -> bool {
        self.status.disconnected.load(Ordering::SeqCst)
    }

    /// Path of the open session, if any.
    pub fn path(&self) -> Option<String> {
        self.status.path.lock().clone()
    }

    pub fn open(&self, path: impl Into<String>, options: OpenOptions) -> BindingResult<Pending> {
        let path = path.into();
        if path.is_empty() {
            return Err(BindingError::invalid(Operation::Open, "path must not be empty"));
        }
        options.validate()?;
        Ok(self.request(Operation::Open, |reply| Command::Open {
            path,
            options,
            reply,
        }))
    }

    pub fn close(&self) -> BindingResult<Pending> {
        Ok(self.request(Operation::Close, |reply| Command::Close { reply }))
    }

    /// Change the baud rate of the open session.
    pub fn update(&self, options: UpdateOptions) -> BindingResult<Pending> {
        let baud_rate = options.validate()?;
        Ok(self.request(Operation::Update, |reply| Command::Update {
            baud_rate,
            reply,
        }))
    }

    /// Drive the line-control flags.
    pub fn set(&self, flags: SetOptions) -> BindingResult<Pending> {
        Ok(self.request(Operation::Set, |reply| Command::Set { flags, reply }))
    }

    /// Hand bytes to the transport. Resolves on acceptance.
    pub fn write(&self, data: impl Into<Bytes>) -> BindingResult<Pending> {
        let data = data.into();
        Ok(self.request(Operation::Write, |reply| Command::Write { data, reply }))
    }

    pub fn flush(&self) -> BindingResult<Pending> {
        Ok(self.request(Operation::Flush, |reply| Command::Flush { reply }))
    }

    /// Resolves after every write queued before it has been accepted.
    pub fn drain(&self) -> BindingResult<Pending> {
        Ok(self.request(Operation::Drain, |reply| Command::Drain { reply }))
    }

    /// Signal read intent: start (or restart) delivery through the push
    /// capability. Fails fast on a closed or disconnected binding.
    pub fn resume(&self) -> BindingResult<()> {
        if !self.is_open() {
            return Err(BindingError::closed(Operation::Read));
        }
        if self.is_disconnected() {
            return Err(BindingError::disconnected(
                Operation::Read,
                "device disconnected",
            ));
        }
        self.events
            .send(Event::Command(Command::Resume))
            .map_err(|_| BindingError::closed(Operation::Read))
    }

    fn request(
        &self,
        op: Operation,
        command: impl FnOnce(command::Reply) -> Command,
    ) -> Pending {
        let (tx, rx) = oneshot::channel();
        // On failure the reply sender is dropped with the command and the
        // future resolves to PortClosed.
        let _ = self.events.send(Event::Command(command(tx)));
        Pending { op, reply: rx }
    }
}
