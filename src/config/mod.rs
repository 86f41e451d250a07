//! Configuration module for serial-binding.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `SERIAL_BINDING_CONFIG` environment variable (explicit path)
//! 2. `./serial-binding.toml` (current directory)
//! 3. `~/.config/serial-binding/config.toml` (XDG on Linux/macOS)
//! 4. `%APPDATA%\serial-binding\config.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is `SERIAL_BINDING_<SECTION>_<KEY>`:
//! - `SERIAL_BINDING_SERIAL_BAUD_RATE=115200`
//! - `SERIAL_BINDING_SERIAL_LOCK=false`
//! - `SERIAL_BINDING_MOCK_SHARED_ACCESS=false`
//! - `SERIAL_BINDING_TESTING_PORT=/dev/ttyACM0`
//! - `SERIAL_BINDING_LOGGING_LEVEL=debug`
//! - `SERIAL_BINDING_LOGGING_FORMAT=json`
//!
//! Legacy `TEST_PORT` and `TEST_BAUD` are also supported.
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_binding::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//!
//! println!("Default baud: {}", config.serial.open.baud_rate);
//! let transport = config.mock.transport();
//! # Ok::<(), serial_binding::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    Config, LogFormat, LoggingConfig, MockConfig, MockDeviceConfig, SerialConfig, TestingConfig,
};
