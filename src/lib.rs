//! Serial Binding Library
//!
//! A uniform asynchronous interface for opening, configuring, reading from,
//! writing to, and closing serial devices, independent of the OS driver
//! underneath.
//!
//! # Modules
//!
//! - `binding`: Session state machine and flow-controlled delivery
//! - `port`: Transport traits, the port registry, and the mock and OS transports
//! - `error`: Error taxonomy shared by every operation
//! - `config`: Configuration management with TOML support

pub mod binding;
pub mod config;
pub mod error;
pub mod port;

// Re-export commonly used types for convenience
pub use binding::{Binding, BindingBuilder, FlowController, FlowState, Pending};
pub use error::{BindingError, BindingResult, ErrorKind, Operation};
pub use port::{
    DataBits, FlowControl, MockPortOptions, MockTransport, OpenOptions, Parity, PortInfo,
    PortRegistry, SetOptions, StopBits, Transport, UpdateOptions,
};

#[cfg(feature = "system")]
pub use port::SystemTransport;

pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
