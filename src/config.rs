//! Configuration loading and validation.
//!
//! The menorah reads a TOML file, by default
//! `$XDG_CONFIG_HOME/auto-menorah/config.toml`. Every key is optional:
//!
//! ```toml
//! off_time_policy = "fixed-offset"   # "fixed-offset" (lighting + 12h) or "hour-snap"
//! burnout = true                     # Extinguish at each night's off-time
//! idle_after_holiday = false         # Keep the process alive after the last night
//!
//! [calendar]
//! zip_code = "10001"
//! start_month = 11                   # First month searched (1-12)
//! max_month_expansions = 2           # Additional months searched
//! # year = 2025                      # Defaults to the current season
//! # first_night = "2025-12-14T16:13:00-05:00"  # Skip the lookup entirely
//!
//! [display]
//! backend = "gpio"                   # "gpio" or "log"
//! shamash_pin = 4
//! candle_pins = [17, 27, 22, 5, 6, 13, 19, 26]
//! active_low = false
//!
//! [signal]
//! enabled = true
//! tune = "MaozTzur:d=4,o=5,b=112:g,c6,g,c6,e6,2d6"
//! # mute_pin = 21                   # Physical mute switch
//! muted = false
//!
//! [setup]
//! probe_host = "www.hebcal.com"
//! attempts = 5
//! retry_delay_secs = 5
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::audio::Waveform;
use crate::calendar::HEBCAL_URL;
use crate::device::{PinConfig, SYSFS_GPIO_ROOT};
use crate::display::CANDLE_COUNT;
use crate::schedule::{OffTimePolicy, Timestamp};
use crate::scheduler::BurnoutPolicy;
use crate::setup::RetryPolicy;
use crate::tune::{Tune, MAOZ_TZUR};
use crate::{Error, Result};

/// Directory name under the user configuration directory
pub const CONFIG_DIR_NAME: &str = "auto-menorah";

/// File name of the configuration
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub off_time_policy: OffTimePolicy,
    pub burnout: bool,
    pub idle_after_holiday: bool,
    pub calendar: CalendarConfig,
    pub display: DisplayConfig,
    pub signal: SignalConfig,
    pub setup: SetupConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            off_time_policy: OffTimePolicy::default(),
            burnout: true,
            idle_after_holiday: false,
            calendar: CalendarConfig::default(),
            display: DisplayConfig::default(),
            signal: SignalConfig::default(),
            setup: SetupConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalendarConfig {
    pub zip_code: String,
    pub base_url: String,
    pub year: Option<i32>,
    pub start_month: u32,
    pub max_month_expansions: u32,
    /// Known first-night lighting instant; skips the lookup when set
    pub first_night: Option<Timestamp>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            zip_code: String::new(),
            base_url: HEBCAL_URL.to_string(),
            year: None,
            start_month: 11,
            max_month_expansions: 2,
            first_night: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayBackend {
    /// Linux sysfs GPIO lines
    #[default]
    Gpio,
    /// Log output only
    Log,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    pub backend: DisplayBackend,
    pub gpio_root: PathBuf,
    pub shamash_pin: u32,
    pub candle_pins: [u32; CANDLE_COUNT as usize],
    pub active_low: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            backend: DisplayBackend::default(),
            gpio_root: PathBuf::from(SYSFS_GPIO_ROOT),
            shamash_pin: 4,
            candle_pins: [17, 27, 22, 5, 6, 13, 19, 26],
            active_low: false,
        }
    }
}

impl DisplayConfig {
    pub fn pin_config(&self) -> PinConfig {
        PinConfig {
            root: self.gpio_root.clone(),
            shamash: self.shamash_pin,
            candles: self.candle_pins,
            active_low: self.active_low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignalConfig {
    pub enabled: bool,
    /// RTTTL text of the night tune
    pub tune: String,
    pub waveform: Waveform,
    pub output_device: Option<String>,
    /// Mute flag used when no switch is wired
    pub muted: bool,
    /// GPIO input line of the mute switch
    pub mute_pin: Option<u32>,
    pub mute_active_low: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tune: MAOZ_TZUR.to_string(),
            waveform: Waveform::default(),
            output_device: None,
            muted: false,
            mute_pin: None,
            mute_active_low: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SetupConfig {
    pub probe_host: String,
    pub probe_port: u16,
    pub probe_timeout_secs: u64,
    pub attempts: u32,
    pub retry_delay_secs: u64,
    pub loading_interval_ms: u64,
    pub distress_interval_ms: u64,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            probe_host: "www.hebcal.com".to_string(),
            probe_port: 443,
            probe_timeout_secs: 10,
            attempts: 5,
            retry_delay_secs: 5,
            loading_interval_ms: 1000,
            distress_interval_ms: 1000,
        }
    }
}

impl SetupConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts,
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }

    pub fn loading_interval(&self) -> Duration {
        Duration::from_millis(self.loading_interval_ms)
    }

    pub fn distress_interval(&self) -> Duration {
        Duration::from_millis(self.distress_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Loads the configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used if present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_from_path(&path),
                _ => {
                    info!("No configuration file found, using defaults");
                    let config = Self::default();
                    config.validate()?;
                    Ok(config)
                }
            },
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn burnout_policy(&self) -> BurnoutPolicy {
        BurnoutPolicy {
            burnout: self.burnout,
        }
    }

    /// Checks values that parse but cannot work
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::Config(message));

        if !(1..=12).contains(&self.calendar.start_month) {
            return invalid(format!(
                "calendar.start_month must be 1-12, got {}",
                self.calendar.start_month
            ));
        }
        if self.setup.attempts == 0 {
            return invalid("setup.attempts must be at least 1".to_string());
        }
        if self.setup.loading_interval_ms == 0 || self.setup.distress_interval_ms == 0 {
            return invalid("setup intervals must be positive".to_string());
        }

        let mut pins = HashSet::new();
        pins.insert(self.display.shamash_pin);
        for pin in self.display.candle_pins {
            if !pins.insert(pin) {
                return invalid(format!("GPIO {} is assigned more than once", pin));
            }
        }
        if let Some(mute_pin) = self.signal.mute_pin {
            if pins.contains(&mute_pin) {
                return invalid(format!("mute switch GPIO {} is also a candle", mute_pin));
            }
        }

        if self.signal.enabled {
            Tune::parse(&self.signal.tune)
                .map_err(|e| Error::Config(format!("signal.tune: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.setup.retry_policy(), RetryPolicy::default());
        assert_eq!(config.burnout_policy(), BurnoutPolicy::BURN_OUT);
    }

    #[test]
    fn parses_full_file() {
        let config = Config::from_toml_str(
            r#"
            off_time_policy = "hour-snap"
            burnout = false

            [calendar]
            zip_code = "02134"
            first_night = "2025-12-14T16:13:00-05:00"

            [display]
            backend = "log"
            candle_pins = [1, 2, 3, 5, 6, 7, 8, 9]

            [signal]
            waveform = "sine"
            mute_pin = 21

            [setup]
            attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.off_time_policy, OffTimePolicy::HourSnap);
        assert_eq!(config.burnout_policy(), BurnoutPolicy::STAY_LIT);
        assert_eq!(config.calendar.zip_code, "02134");
        assert_eq!(
            config.calendar.first_night.map(|t| t.to_rfc3339()),
            Some("2025-12-14T16:13:00-05:00".to_string())
        );
        assert_eq!(config.display.backend, DisplayBackend::Log);
        assert_eq!(config.signal.waveform, Waveform::Sine);
        assert_eq!(config.signal.mute_pin, Some(21));
        assert_eq!(config.setup.attempts, 3);
        assert_eq!(config.setup.retry_delay_secs, 5);
    }

    #[test]
    fn rejects_invalid_values() {
        for text in [
            "[calendar]\nstart_month = 13",
            "[setup]\nattempts = 0",
            "[display]\ncandle_pins = [1, 2, 3, 4, 5, 6, 7, 1]",
            "[display]\nshamash_pin = 17",
            "[signal]\nmute_pin = 4",
            "[signal]\ntune = \"not a tune\"",
            "unknown_key = 1",
            "[display]\ncandle_pins = [1, 2, 3]",
        ] {
            assert!(
                matches!(Config::from_toml_str(text), Err(Error::Config(_))),
                "accepted {:?}",
                text
            );
        }
    }

    #[test]
    fn disabled_signal_skips_tune_validation() {
        let config = Config::from_toml_str("[signal]\nenabled = false\ntune = \"\"").unwrap();
        assert!(!config.signal.enabled);
    }

    #[test]
    fn loads_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "burnout = false").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert!(!config.burnout);
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
