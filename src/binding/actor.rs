//! The task that owns a binding's session.
//!
//! All state mutation happens here, one event at a time. Each open session
//! gets a fresh epoch; inbound events tagged with an older epoch belong to a
//! session that is already closed and are dropped.

use super::command::{Command, Event, Reply};
use super::flow::FlowController;
use super::{DisconnectFn, PushFn, Status};
use crate::error::{BindingError, BindingResult, Operation};
use crate::port::{Connection, Inbound, InboundSink, OpenOptions, Transport};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

struct Session {
    path: String,
    connection: Box<dyn Connection>,
    /// Reason reported by the transport, once it disconnected.
    disconnected: Option<String>,
}

pub(crate) struct BindingActor {
    transport: Arc<dyn Transport>,
    push: PushFn,
    disconnect: DisconnectFn,
    status: Arc<Status>,
    events: mpsc::WeakUnboundedSender<Event>,
    session: Option<Session>,
    epoch: u64,
    flow: FlowController,
    delivery_scheduled: bool,
}

impl BindingActor {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        push: PushFn,
        disconnect: DisconnectFn,
        status: Arc<Status>,
        events: mpsc::WeakUnboundedSender<Event>,
    ) -> Self {
        Self {
            transport,
            push,
            disconnect,
            status,
            events,
            session: None,
            epoch: 0,
            flow: FlowController::new(),
            delivery_scheduled: false,
        }
    }

    /// Process events until every handle is gone, then release the session.
    pub(crate) async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            match event {
                Event::Command(command) => self.handle_command(command).await,
                Event::Inbound { epoch, inbound } if epoch == self.epoch => {
                    self.handle_inbound(inbound)
                }
                Event::Inbound { epoch, .. } => {
                    trace!(epoch, current = self.epoch, "dropping inbound event from closed session")
                }
                Event::Deliver { epoch } if epoch == self.epoch => {
                    self.delivery_scheduled = false;
                    self.deliver();
                }
                Event::Deliver { .. } => {}
            }
        }

        if let Some(session) = self.session.take() {
            debug!(path = %session.path, "all handles dropped, closing port");
            if let Err(err) = session.connection.close().await {
                warn!(path = %session.path, error = %err, "failed to close port on shutdown");
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        trace!(command = command.name(), epoch = self.epoch, "dispatching command");
        match command {
            Command::Open {
                path,
                options,
                reply,
            } => {
                let result = self.open(path, options).await;
                respond(reply, result);
            }
            Command::Close { reply } => {
                let result = self.close().await;
                respond(reply, result);
            }
            Command::Update { baud_rate, reply } => {
                let result = match self.active(Operation::Update) {
                    Ok(session) => session.connection.update(baud_rate).await,
                    Err(err) => Err(err),
                };
                if result.is_ok() {
                    debug!(baud_rate, "baud rate updated");
                }
                respond(reply, result.map_err(|e| e.with_operation(Operation::Update)));
            }
            Command::Set { flags, reply } => {
                let result = match self.active(Operation::Set) {
                    Ok(session) => session.connection.set(&flags).await,
                    Err(err) => Err(err),
                };
                respond(reply, result.map_err(|e| e.with_operation(Operation::Set)));
            }
            Command::Write { data, reply } => {
                let result = match self.active(Operation::Write) {
                    Ok(session) => session.connection.write(data).await,
                    Err(err) => Err(err),
                };
                respond(reply, result.map_err(|e| e.with_operation(Operation::Write)));
            }
            Command::Flush { reply } => {
                let result = match self.active(Operation::Flush) {
                    Ok(session) => session.connection.flush().await,
                    Err(err) => Err(err),
                };
                respond(reply, result.map_err(|e| e.with_operation(Operation::Flush)));
            }
            Command::Drain { reply } => {
                let result = match self.active(Operation::Drain) {
                    Ok(session) => session.connection.drain().await,
                    Err(err) => Err(err),
                };
                respond(reply, result.map_err(|e| e.with_operation(Operation::Drain)));
            }
            Command::Resume => self.resume(),
        }
    }

    async fn open(&mut self, path: String, options: OpenOptions) -> BindingResult<()> {
        if let Some(session) = &self.session {
            return Err(BindingError::invalid(
                Operation::Open,
                format!("already open on {}", session.path),
            ));
        }

        self.epoch += 1;
        let sink = self.sink();
        let connection = self
            .transport
            .connect(&path, &options, sink)
            .await
            .map_err(|e| e.with_operation(Operation::Open))?;

        self.flow.reset();
        self.delivery_scheduled = false;
        self.status.open.store(true, Ordering::SeqCst);
        self.status.flowing.store(false, Ordering::SeqCst);
        self.status.disconnected.store(false, Ordering::SeqCst);
        *self.status.path.lock() = Some(path.clone());

        info!(
            path = %path,
            baud_rate = options.baud_rate,
            lock = options.lock,
            "port opened"
        );
        self.session = Some(Session {
            path,
            connection,
            disconnected: None,
        });
        Ok(())
    }

    async fn close(&mut self) -> BindingResult<()> {
        let session = self
            .session
            .take()
            .ok_or_else(|| BindingError::closed(Operation::Close))?;

        self.epoch += 1;
        let dropped = self.flow.pending_len();
        self.flow.reset();
        self.delivery_scheduled = false;
        self.status.open.store(false, Ordering::SeqCst);
        self.status.flowing.store(false, Ordering::SeqCst);
        self.status.disconnected.store(false, Ordering::SeqCst);
        *self.status.path.lock() = None;

        let result = session
            .connection
            .close()
            .await
            .map_err(|e| e.with_operation(Operation::Close));
        info!(path = %session.path, dropped, "port closed");
        result
    }

    /// The open, connected session, or the error an operation should fail with.
    fn active(&mut self, op: Operation) -> BindingResult<&mut Session> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| BindingError::closed(op))?;
        if let Some(reason) = &session.disconnected {
            return Err(BindingError::disconnected(op, reason.clone()));
        }
        Ok(session)
    }

    fn resume(&mut self) {
        if self.active(Operation::Read).is_err() {
            trace!("read intent on inactive binding ignored");
            return;
        }
        let due = self.flow.resume();
        self.status.flowing.store(true, Ordering::SeqCst);
        if due {
            self.schedule_delivery();
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match inbound {
            Inbound::Data(bytes) => {
                debug!(path = %session.path, bytes = bytes.len(), "data arrived");
                if self.flow.arrive(&bytes) {
                    self.schedule_delivery();
                }
            }
            Inbound::Disconnected(reason) => {
                if session.disconnected.is_some() {
                    return;
                }
                warn!(path = %session.path, reason = %reason, "transport disconnected");
                session.disconnected = Some(reason.clone());
                self.status.disconnected.store(true, Ordering::SeqCst);
                (self.disconnect)(BindingError::disconnected(Operation::Read, reason));
            }
        }
    }

    /// Queue a delivery behind whatever is already waiting. Arrivals while
    /// one is queued are picked up by that delivery.
    fn schedule_delivery(&mut self) {
        if self.delivery_scheduled {
            return;
        }
        let Some(events) = self.events.upgrade() else {
            return;
        };
        if events.send(Event::Deliver { epoch: self.epoch }).is_ok() {
            self.delivery_scheduled = true;
        }
    }

    fn deliver(&mut self) {
        if self.session.is_none() {
            return;
        }
        let push = &mut self.push;
        let pushes = self.flow.deliver(|chunk| {
            debug!(bytes = chunk.len(), "delivering data");
            push(chunk)
        });
        let flowing = self.flow.is_flowing();
        self.status.flowing.store(flowing, Ordering::SeqCst);
        if pushes > 0 && !flowing {
            debug!(pending = self.flow.pending_len(), "consumer saturated, pausing");
        }
    }

    /// Sink for the session being opened. Holds only a weak reference to the
    /// queue so a live connection does not keep the actor alive.
    fn sink(&self) -> InboundSink {
        let events = self.events.clone();
        let epoch = self.epoch;
        InboundSink::new(move |inbound| {
            events
                .upgrade()
                .is_some_and(|tx| tx.send(Event::Inbound { epoch, inbound }).is_ok())
        })
    }
}

fn respond(reply: Reply, result: BindingResult<()>) {
    if let Err(err) = &result {
        debug!(error = %err, "operation failed");
    }
    // The caller may have dropped its future; the side effects already happened.
    let _ = reply.send(result);
}
