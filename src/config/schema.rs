//! Configuration schema definitions.
//!
//! Every section deserializes with defaults, so a config file only needs the
//! keys it changes.

use crate::port::{MockPortOptions, MockTransport, OpenOptions, PortRegistry, SetOptions};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults applied when opening ports
    pub serial: SerialConfig,
    /// Simulated devices
    pub mock: MockConfig,
    /// Hardware test configuration
    pub testing: TestingConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Serial port defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Options used by `open` unless the caller overrides them
    pub open: OpenOptions,
    /// Line-control flags applied after open
    pub flags: SetOptions,
    /// Short names for device paths
    pub port_aliases: HashMap<String, String>,
}

impl SerialConfig {
    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// Simulated transport section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Whether unlocked sessions may share a device
    pub shared_access: bool,
    pub devices: Vec<MockDeviceConfig>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            shared_access: true,
            devices: Vec::new(),
        }
    }
}

impl MockConfig {
    /// A registry holding every configured device.
    pub fn registry(&self) -> PortRegistry {
        let registry = PortRegistry::new();
        for device in &self.devices {
            registry.register(device.path.clone(), device.port_options());
        }
        registry
    }

    /// A transport over a freshly seeded registry.
    pub fn transport(&self) -> MockTransport {
        let transport = MockTransport::new(self.registry());
        if self.shared_access {
            transport
        } else {
            transport.exclusive_only()
        }
    }
}

/// One simulated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockDeviceConfig {
    pub path: String,
    /// Reflect writes back as inbound data. Defaults to `true` here, unlike
    /// [`MockPortOptions::default`]: a device listed in the config file is
    /// meant to behave like the echo firmware unless it says otherwise.
    pub echo: bool,
    /// Preamble sent on connect by echo devices
    pub ready_data: String,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        let defaults = MockPortOptions::default();
        Self {
            path: String::new(),
            echo: true,
            ready_data: String::from_utf8_lossy(&defaults.ready_data).into_owned(),
            manufacturer: defaults.manufacturer,
            serial_number: None,
            vendor_id: None,
            product_id: None,
        }
    }
}

impl MockDeviceConfig {
    pub fn port_options(&self) -> MockPortOptions {
        MockPortOptions {
            echo: self.echo,
            ready_data: Bytes::from(self.ready_data.clone().into_bytes()),
            manufacturer: self.manufacturer.clone(),
            serial_number: self.serial_number.clone(),
            vendor_id: self.vendor_id.clone(),
            product_id: self.product_id.clone(),
        }
    }
}

/// Hardware testing configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingConfig {
    /// Device running echo firmware; hardware tests are skipped when unset
    pub port: Option<String>,
    pub baud: u32,
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 9600,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    /// Multi-line output with colors
    #[default]
    Pretty,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}
