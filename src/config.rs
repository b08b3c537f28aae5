//! Configuration using Figment
//!
//! Strongly-typed configuration for the stage controller. Values are loaded from:
//! 1. `config/stage.toml` (or any path passed to [`StageConfig::load_from`])
//! 2. Environment variables prefixed with `XY_STAGE_`, using `__` between
//!    nested keys (e.g. `XY_STAGE_HARDWARE__PORT=/dev/ttyUSB1`)
//!
//! Every field has a default, so a missing file still yields a usable config.
//!
//! # Example
//! ```no_run
//! use xy_stage::config::StageConfig;
//!
//! let config = StageConfig::load()?;
//! println!("Backend: {}", config.application.backend);
//! # Ok::<(), xy_stage::error::StageError>(())
//! ```

use crate::error::{StageError, StageResult};
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/stage.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Hardware backend settings
    #[serde(default)]
    pub hardware: HardwareConfig,
    /// Simulated backend settings
    #[serde(default)]
    pub simulated: SimulatedConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default)]
    pub log_format: OutputFormat,
    /// Also log when instrumented operations start and finish
    #[serde(default)]
    pub log_span_events: bool,
    /// Backend selector used when none is given on the command line
    #[serde(default = "default_backend")]
    pub backend: String,
}

/// Hardware (serial) backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Manual serial port override; skips USB discovery when set
    #[serde(default)]
    pub port: Option<String>,
    /// USB vendor ID of the stage's serial adapter
    #[serde(default = "default_usb_vid")]
    pub usb_vid: u16,
    /// USB product ID of the stage's serial adapter
    #[serde(default = "default_usb_pid")]
    pub usb_pid: u16,
    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Time to wait for a single reply line
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,
    /// Time to collect replies to a broadcast (device detection)
    #[serde(default = "default_detect_window")]
    pub detect_window_ms: u64,
    /// Idle polling interval while waiting for motion to finish
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Distance travelled per native microstep, in micrometres
    #[serde(default = "default_microstep_size")]
    pub microstep_size_um: f64,
}

/// Simulated backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// Simulated homing duration
    #[serde(default = "default_home_delay")]
    pub home_delay_ms: u64,
    /// Reported lower travel limit (µm)
    #[serde(default)]
    pub limit_min_um: f64,
    /// Reported upper travel limit (µm)
    #[serde(default = "default_limit_max")]
    pub limit_max_um: f64,
}

// Default value functions
fn default_name() -> String {
    "XY Stage Controller".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_backend() -> String {
    "simulated".to_string()
}

fn default_usb_vid() -> u16 {
    1027
}

fn default_usb_pid() -> u16 {
    24577
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_reply_timeout() -> u64 {
    1000
}

fn default_detect_window() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    50
}

fn default_microstep_size() -> f64 {
    0.047625
}

fn default_home_delay() -> u64 {
    1000
}

fn default_limit_max() -> f64 {
    50_000.0
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
            log_span_events: false,
            backend: default_backend(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            port: None,
            usb_vid: default_usb_vid(),
            usb_pid: default_usb_pid(),
            baud_rate: default_baud_rate(),
            reply_timeout_ms: default_reply_timeout(),
            detect_window_ms: default_detect_window(),
            poll_interval_ms: default_poll_interval(),
            microstep_size_um: default_microstep_size(),
        }
    }
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            home_delay_ms: default_home_delay(),
            limit_min_um: 0.0,
            limit_max_um: default_limit_max(),
        }
    }
}

impl StageConfig {
    /// Load configuration from `config/stage.toml` and environment variables
    pub fn load() -> StageResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> StageResult<Self> {
        let config: StageConfig = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("XY_STAGE_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> StageResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(StageError::InvalidConfig(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let hw = &self.hardware;
        if !(hw.microstep_size_um.is_finite() && hw.microstep_size_um > 0.0) {
            return Err(StageError::InvalidConfig(format!(
                "Invalid microstep_size_um {}. Must be positive",
                hw.microstep_size_um
            )));
        }
        if hw.reply_timeout_ms == 0 || hw.detect_window_ms == 0 || hw.poll_interval_ms == 0 {
            return Err(StageError::InvalidConfig(
                "reply_timeout_ms, detect_window_ms and poll_interval_ms must be non-zero"
                    .to_string(),
            ));
        }
        if hw.baud_rate == 0 {
            return Err(StageError::InvalidConfig("baud_rate must be non-zero".to_string()));
        }

        let sim = &self.simulated;
        if sim.limit_min_um.is_nan() || sim.limit_max_um.is_nan() || sim.limit_min_um >= sim.limit_max_um {
            return Err(StageError::InvalidConfig(format!(
                "Simulated limits [{}, {}] are empty",
                sim.limit_min_um, sim.limit_max_um
            )));
        }

        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = StageConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.hardware.usb_vid, 0x0403);
        assert_eq!(config.hardware.usb_pid, 0x6001);
        assert_eq!(config.simulated.limit_max_um, 50_000.0);
        assert_eq!(config.application.backend, "simulated");
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        let config = StageConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config, StageConfig::default());
    }

    #[test]
    #[serial]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
backend = "hardware"
log_format = "json"

[hardware]
port = "/dev/ttyUSB3"
poll_interval_ms = 20
"#
        )
        .unwrap();

        let config = StageConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.backend, "hardware");
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.application.log_format, OutputFormat::Json);
        assert!(!config.application.log_span_events);
        assert_eq!(config.hardware.port.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(config.hardware.poll_interval_ms, 20);
        assert_eq!(config.hardware.baud_rate, 115_200);
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("XY_STAGE_HARDWARE__PORT", "COM7");
        let result = StageConfig::load_from("does/not/exist.toml");
        std::env::remove_var("XY_STAGE_HARDWARE__PORT");

        let config = result.unwrap();
        assert_eq!(config.hardware.port.as_deref(), Some("COM7"));
    }

    #[test]
    #[serial]
    fn test_unknown_log_format_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[application]\nlog_format = \"xml\"").unwrap();
        assert!(matches!(
            StageConfig::load_from(file.path()),
            Err(StageError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = StageConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(config.validate(), Err(StageError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_microstep_and_limits() {
        let mut config = StageConfig::default();
        config.hardware.microstep_size_um = 0.0;
        assert!(config.validate().is_err());

        let mut config = StageConfig::default();
        config.simulated.limit_min_um = 10.0;
        config.simulated.limit_max_um = 10.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = StageConfig::default();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("[hardware]"));
        let parsed: StageConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
