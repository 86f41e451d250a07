//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::{Config, LogFormat};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "SERIAL_BINDING";

/// Config file name inside the per-user config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config file name looked up in the current directory
const LOCAL_CONFIG_FILE_NAME: &str = "serial-binding.toml";

/// Per-user config directory name
const APP_DIR_NAME: &str = "serial-binding";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "SERIAL_BINDING_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `SERIAL_BINDING_CONFIG` environment variable (explicit path)
    /// 2. `./serial-binding.toml` (current directory)
    /// 3. `~/.config/serial-binding/config.toml` (XDG on Linux/macOS)
    /// 4. `%APPDATA%\serial-binding\config.toml` (Windows)
    /// 5. Built-in defaults (no file required)
    ///
    /// Environment variables override values from the file.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = if let Some(ref path) = config_path {
            load_from_file(path)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config)?;
        validate(&config)?;

        Ok(Self { config_path, config })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        validate(&config)?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    ///
    /// Malformed environment overrides are ignored here.
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        if let Err(err) = apply_env_overrides(&mut config) {
            tracing::warn!(error = %err, "ignoring environment override");
        }

        Self {
            config_path: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    /// Save the current configuration to the file it was loaded from.
    pub fn save(&self) -> ConfigResult<()> {
        let path = self
            .config_path
            .as_ref()
            .ok_or(ConfigError::NoPath)?;

        save_to_file(&self.config, path)
    }

    /// Save the current configuration to a specific file.
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        save_to_file(&self.config, path.as_ref())
    }

    /// Reload configuration from file (if path is set).
    pub fn reload(&mut self) -> ConfigResult<()> {
        if let Some(ref path) = self.config_path {
            let mut config = load_from_file(path)?;
            apply_env_overrides(&mut config)?;
            validate(&config)?;
            self.config = config;
        }
        Ok(())
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let cwd_config = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    if let Some(app_config) = get_default_config_path() {
        if app_config.exists() {
            return Some(app_config);
        }
    }

    None
}

/// Get the platform-specific config directory.
fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn save_to_file(config: &Config, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read `var` and parse it, reporting `expected` on failure.
fn env_value<T: FromStr>(var: &str, expected: &str) -> ConfigResult<Option<T>> {
    match std::env::var(var) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::env(var, expected)),
        Err(_) => Ok(None),
    }
}

fn env_flag(var: &str) -> ConfigResult<Option<bool>> {
    match std::env::var(var) {
        Ok(val) => match val.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::env(var, "expected a boolean")),
        },
        Err(_) => Ok(None),
    }
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern `SERIAL_BINDING_<SECTION>_<KEY>`,
/// for example `SERIAL_BINDING_SERIAL_BAUD_RATE=115200`. The legacy
/// `TEST_PORT` and `TEST_BAUD` variables are honoured for the testing section.
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    if let Some(baud) = env_value(&format!("{ENV_PREFIX}_SERIAL_BAUD_RATE"), "expected a baud rate")? {
        config.serial.open.baud_rate = baud;
    }
    if let Some(lock) = env_flag(&format!("{ENV_PREFIX}_SERIAL_LOCK"))? {
        config.serial.open.lock = lock;
    }

    if let Some(shared) = env_flag(&format!("{ENV_PREFIX}_MOCK_SHARED_ACCESS"))? {
        config.mock.shared_access = shared;
    }

    if let Ok(val) =
        std::env::var(format!("{ENV_PREFIX}_TESTING_PORT")).or_else(|_| std::env::var("TEST_PORT"))
    {
        config.testing.port = Some(val);
    }
    let baud_var = format!("{ENV_PREFIX}_TESTING_BAUD");
    let baud = match env_value(&baud_var, "expected a baud rate")? {
        Some(baud) => Some(baud),
        None => env_value("TEST_BAUD", "expected a baud rate")?,
    };
    if let Some(baud) = baud {
        config.testing.baud = baud;
    }

    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_LOGGING_LEVEL")) {
        config.logging.level = val;
    }
    if let Some(format) =
        env_value::<LogFormat>(&format!("{ENV_PREFIX}_LOGGING_FORMAT"), "expected json, pretty or compact")?
    {
        config.logging.format = format;
    }

    Ok(())
}

/// Reject configurations no binding could use.
fn validate(config: &Config) -> ConfigResult<()> {
    if config.serial.open.baud_rate == 0 {
        return Err(ConfigError::invalid(
            "serial.open.baud_rate",
            "must be greater than zero",
        ));
    }
    if config.testing.baud == 0 {
        return Err(ConfigError::invalid(
            "testing.baud",
            "must be greater than zero",
        ));
    }

    let mut seen = HashSet::new();
    for device in &config.mock.devices {
        if device.path.is_empty() {
            return Err(ConfigError::invalid(
                "mock.devices.path",
                "must not be empty",
            ));
        }
        if !seen.insert(device.path.as_str()) {
            return Err(ConfigError::invalid(
                "mock.devices.path",
                format!("duplicate device '{}'", device.path),
            ));
        }
    }
    Ok(())
}

/// Get the default config directory for creating new config files.
pub fn get_default_config_dir() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join(APP_DIR_NAME))
}

/// Get the default config file path for creating new config files.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_default_config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}
