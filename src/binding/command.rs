//! Messages carried on a binding's event queue.
//!
//! Commands from the handle and events from the transport share one queue so
//! the actor sees them in exactly the order they happened.

use crate::error::BindingResult;
use crate::port::{Inbound, OpenOptions, SetOptions};
use bytes::Bytes;
use tokio::sync::oneshot;

pub(crate) type Reply = oneshot::Sender<BindingResult<()>>;

/// Everything the actor reacts to.
#[derive(Debug)]
pub(crate) enum Event {
    Command(Command),

    /// Data or a disconnect from the transport, tagged with the session it
    /// belongs to.
    Inbound { epoch: u64, inbound: Inbound },

    /// A delivery scheduled by the actor itself.
    Deliver { epoch: u64 },
}

/// Operations requested through a [`Binding`](super::Binding) handle.
#[derive(Debug)]
pub(crate) enum Command {
    Open {
        path: String,
        options: OpenOptions,
        reply: Reply,
    },
    Close {
        reply: Reply,
    },
    Update {
        baud_rate: u32,
        reply: Reply,
    },
    Set {
        flags: SetOptions,
        reply: Reply,
    },
    Write {
        data: Bytes,
        reply: Reply,
    },
    Flush {
        reply: Reply,
    },
    Drain {
        reply: Reply,
    },

    /// Read intent. Has no completion.
    Resume,
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Close { .. } => "close",
            Self::Update { .. } => "update",
            Self::Set { .. } => "set",
            Self::Write { .. } => "write",
            Self::Flush { .. } => "flush",
            Self::Drain { .. } => "drain",
            Self::Resume => "resume",
        }
    }
}
