//! Transport layer beneath the binding.
//!
//! Defines the data model and the [`Transport`]/[`Connection`] traits, the
//! [`PortRegistry`] that arbitrates locks per path, and two transports: the
//! simulated echo transport and (feature `system`) the OS transport.

pub mod mock;
pub mod registry;
pub mod traits;

#[cfg(feature = "system")]
pub mod system;

pub use mock::{MockConnection, MockPortOptions, MockTransport};
pub use registry::{PortRegistry, SessionId, DEFAULT_MANUFACTURER, DEFAULT_READY_DATA};
pub use traits::*;

#[cfg(feature = "system")]
pub use system::{SystemConnection, SystemTransport};
