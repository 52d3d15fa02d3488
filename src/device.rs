use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

use crate::display::{DisplaySink, CANDLE_COUNT};
use crate::{Error, Result};

/// Root of the Linux sysfs GPIO interface
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Direction of a GPIO line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Driven by us
    Output,
    /// Read by us
    Input,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Output => "out",
            Direction::Input => "in",
        }
    }
}

/// Wiring configuration for the candle lines
#[derive(Debug, Clone)]
pub struct PinConfig {
    /// sysfs GPIO root, normally [`SYSFS_GPIO_ROOT`]
    pub root: PathBuf,
    /// GPIO number of the shamash
    pub shamash: u32,
    /// GPIO numbers of the candles, first night first
    pub candles: [u32; CANDLE_COUNT as usize],
    /// Whether a low level lights a candle
    pub active_low: bool,
}

/// A single exported sysfs GPIO line
#[derive(Debug)]
pub struct SysfsPin {
    number: u32,
    value_path: PathBuf,
    active_low: bool,
}

impl SysfsPin {
    /// Exports the line (if needed) and sets its direction
    ///
    /// # Arguments
    ///
    /// * `root` - sysfs GPIO root directory
    /// * `number` - GPIO number
    /// * `direction` - Line direction
    /// * `active_low` - Whether the logical "on" state is a low level
    #[instrument]
    pub fn open(root: &Path, number: u32, direction: Direction, active_low: bool) -> Result<Self> {
        let line_dir = root.join(format!("gpio{}", number));
        if !line_dir.exists() {
            debug!("Exporting GPIO {}", number);
            fs::write(root.join("export"), number.to_string())
                .map_err(|e| Error::Display(format!("failed to export GPIO {}: {}", number, e)))?;
            // udev needs a moment to fix permissions on the new line
            std::thread::sleep(Duration::from_millis(50));
        }

        fs::write(line_dir.join("direction"), direction.as_str()).map_err(|e| {
            Error::Display(format!("failed to set GPIO {} direction: {}", number, e))
        })?;

        trace!("GPIO {} ready as {:?}", number, direction);
        Ok(Self {
            number,
            value_path: line_dir.join("value"),
            active_low,
        })
    }

    /// GPIO number of this line
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Drives the line to a logical state
    pub fn write(&self, on: bool) -> Result<()> {
        let level = if on != self.active_low { "1" } else { "0" };
        fs::write(&self.value_path, level)
            .map_err(|e| Error::Display(format!("failed to write GPIO {}: {}", self.number, e)))
    }

    /// Reads the logical state of the line
    pub fn read(&self) -> Result<bool> {
        let raw = fs::read_to_string(&self.value_path)?;
        match raw.trim() {
            "1" => Ok(!self.active_low),
            "0" => Ok(self.active_low),
            other => Err(Error::Display(format!(
                "unexpected value {:?} on GPIO {}",
                other, self.number
            ))),
        }
    }
}

/// Menorah wired to nine GPIO output lines
#[derive(Debug)]
pub struct GpioMenorah {
    shamash: SysfsPin,
    candles: [SysfsPin; CANDLE_COUNT as usize],
}

impl GpioMenorah {
    /// Opens all nine lines as outputs
    #[instrument(skip(config), fields(shamash = config.shamash))]
    pub fn open(config: &PinConfig) -> Result<Self> {
        info!("Initializing menorah GPIO lines");
        let shamash = SysfsPin::open(
            &config.root,
            config.shamash,
            Direction::Output,
            config.active_low,
        )?;

        let mut candles = Vec::with_capacity(CANDLE_COUNT as usize);
        for &number in &config.candles {
            candles.push(SysfsPin::open(
                &config.root,
                number,
                Direction::Output,
                config.active_low,
            )?);
        }
        let candles: [SysfsPin; CANDLE_COUNT as usize] = candles
            .try_into()
            .map_err(|_| Error::Display("expected eight candle lines".into()))?;

        info!(
            "Menorah ready: shamash on GPIO {}, candles on GPIO {:?}",
            shamash.number(),
            config.candles
        );
        Ok(Self { shamash, candles })
    }
}

impl DisplaySink for GpioMenorah {
    fn set_lit(&mut self, count: u8, shamash: bool) -> Result<()> {
        let count = count.min(CANDLE_COUNT);
        debug!("Setting {} candles lit, shamash: {}", count, shamash);
        self.shamash.write(shamash)?;
        for (index, candle) in self.candles.iter().enumerate() {
            candle.write(index < count as usize)?;
        }
        Ok(())
    }
}

/// Source of the night-signal mute flag
#[derive(Debug)]
pub enum MuteSwitch {
    /// Fixed by configuration
    Fixed(bool),
    /// Physical switch on a GPIO input line; "on" means muted
    Gpio(SysfsPin),
}

impl MuteSwitch {
    /// Opens a physical mute switch on a GPIO input line
    pub fn gpio(root: &Path, number: u32, active_low: bool) -> Result<Self> {
        Ok(Self::Gpio(SysfsPin::open(
            root,
            number,
            Direction::Input,
            active_low,
        )?))
    }

    /// Whether the switch currently mutes the night signal.
    ///
    /// A switch that cannot be read counts as unmuted.
    pub fn is_muted(&self) -> bool {
        match self {
            MuteSwitch::Fixed(muted) => *muted,
            MuteSwitch::Gpio(pin) => match pin.read() {
                Ok(muted) => muted,
                Err(e) => {
                    warn!("Could not read mute switch on GPIO {}: {}", pin.number(), e);
                    false
                }
            },
        }
    }
}
