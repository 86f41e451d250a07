//! Core types and traits for the transport layer.
//!
//! A [`Transport`] addresses devices by path and hands out one
//! [`Connection`] per open session. Both the simulated echo transport and the
//! OS transport implement these traits, so the binding above them behaves the
//! same whichever is plugged in.

use crate::error::{BindingError, BindingResult, Operation};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Options recorded when a port is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenOptions {
    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Number of data bits per character.
    pub data_bits: DataBits,

    /// Parity checking mode.
    pub parity: Parity,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// RTS/CTS hardware flow control.
    pub rtscts: bool,

    pub xon: bool,
    pub xoff: bool,
    pub xany: bool,

    /// Hang up (drop DTR) on close.
    pub hupcl: bool,

    /// Request exclusive access to the port for this session.
    pub lock: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            rtscts: false,
            xon: false,
            xoff: false,
            xany: false,
            hupcl: true,
            lock: true,
        }
    }
}

impl OpenOptions {
    /// Options with the given baud rate and defaults for everything else.
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }

    /// Same options with the lock request replaced.
    pub fn with_lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    /// Reject options no device could be opened with.
    pub fn validate(&self) -> BindingResult<()> {
        if self.baud_rate == 0 {
            return Err(BindingError::invalid(
                Operation::Open,
                "baud_rate must be greater than zero",
            ));
        }
        Ok(())
    }

    /// The flow control mode implied by the individual flags.
    ///
    /// Hardware flow control wins when both are requested.
    pub fn flow_control(&self) -> FlowControl {
        if self.rtscts {
            FlowControl::Hardware
        } else if self.xon || self.xoff {
            FlowControl::Software
        } else {
            FlowControl::None
        }
    }
}

/// Live configuration change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    pub baud_rate: Option<u32>,
}

impl UpdateOptions {
    pub fn baud_rate(baud_rate: u32) -> Self {
        Self {
            baud_rate: Some(baud_rate),
        }
    }

    /// Extract the baud rate, rejecting a missing or zero value.
    pub fn validate(&self) -> BindingResult<u32> {
        match self.baud_rate {
            Some(0) => Err(BindingError::invalid(
                Operation::Update,
                "baud_rate must be greater than zero",
            )),
            Some(rate) => Ok(rate),
            None => Err(BindingError::invalid(Operation::Update, "missing baud_rate")),
        }
    }
}

/// Transient line-control flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetOptions {
    pub brk: bool,
    pub cts: bool,
    pub dtr: bool,
    pub dts: bool,
    pub rts: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            brk: false,
            cts: false,
            dtr: true,
            dts: false,
            rts: true,
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    Two,
}

/// Description of a device as reported by `list`.
///
/// Unknown fields are `None`; an empty string is never reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub path: String,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub pnp_id: Option<String>,
    pub location_id: Option<String>,
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
}

impl PortInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Replace empty strings with `None`.
    pub fn normalized(mut self) -> Self {
        for field in [
            &mut self.manufacturer,
            &mut self.serial_number,
            &mut self.pnp_id,
            &mut self.location_id,
            &mut self.vendor_id,
            &mut self.product_id,
        ] {
            if field.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *field = None;
            }
        }
        self
    }
}

/// What a transport can do beyond the baseline contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// Whether sessions opened with `lock: false` may share a port. When
    /// false, every session is exclusive regardless of its lock request.
    pub shared_access: bool,
}

/// Something arriving from the device side of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Data(Bytes),
    Disconnected(String),
}

/// Handle a transport uses to push inbound bytes and disconnect
/// notifications into a binding.
#[derive(Clone)]
pub struct InboundSink {
    send: Arc<dyn Fn(Inbound) -> bool + Send + Sync>,
}

impl InboundSink {
    /// Wrap a delivery function. It returns `false` once the receiving side
    /// is gone.
    pub fn new(send: impl Fn(Inbound) -> bool + Send + Sync + 'static) -> Self {
        Self {
            send: Arc::new(send),
        }
    }

    /// Queue bytes for the session. Empty chunks are ignored.
    pub fn data(&self, bytes: impl Into<Bytes>) -> bool {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return true;
        }
        (self.send)(Inbound::Data(bytes))
    }

    /// Report that the device vanished.
    pub fn disconnected(&self, reason: impl Into<String>) -> bool {
        (self.send)(Inbound::Disconnected(reason.into()))
    }
}

impl std::fmt::Debug for InboundSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundSink").finish_non_exhaustive()
    }
}

/// A family of devices addressed by path.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug + 'static {
    fn capabilities(&self) -> TransportCapabilities;

    /// Enumerate the devices this transport can open.
    async fn list(&self) -> BindingResult<Vec<PortInfo>>;

    /// Open a session on `path`. Inbound bytes for the session are delivered
    /// through `sink`, starting with any readiness preamble the device sends
    /// on connect, which must be queued before this returns.
    async fn connect(
        &self,
        path: &str,
        options: &OpenOptions,
        sink: InboundSink,
    ) -> BindingResult<Box<dyn Connection>>;
}

/// One open session on a device.
#[async_trait]
pub trait Connection: Send + std::fmt::Debug {
    /// Hand bytes to the device. Resolves on acceptance, not on physical
    /// transmission.
    async fn write(&mut self, data: Bytes) -> BindingResult<()>;

    async fn update(&mut self, baud_rate: u32) -> BindingResult<()>;

    async fn set(&mut self, flags: &SetOptions) -> BindingResult<()>;

    /// Discard unsent and unread data.
    async fn flush(&mut self) -> BindingResult<()>;

    /// Wait for accepted output to leave the device.
    async fn drain(&mut self) -> BindingResult<()>;

    /// Release the session and any lock it holds.
    async fn close(self: Box<Self>) -> BindingResult<()>;
}
