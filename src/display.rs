/*!
 # Candle display

 The [`DisplaySink`] trait is the only way the scheduler and the setup
 controller touch the candles. [`LogDisplay`] renders the menorah into the log
 for dry runs; the GPIO implementation lives in [`crate::device`].
*/

use tracing::info;

use crate::Result;

/// Number of candles, not counting the shamash
pub const CANDLE_COUNT: u8 = 8;

/// Output side of the menorah
pub trait DisplaySink: Send {
    /// Lights the first `count` candles (0-8) and sets the shamash.
    ///
    /// Candles past `count` are turned off. Counts above eight are clamped.
    fn set_lit(&mut self, count: u8, shamash: bool) -> Result<()>;

    /// Turns every candle and the shamash off
    fn clear(&mut self) -> Result<()> {
        self.set_lit(0, false)
    }
}

impl<D: DisplaySink + ?Sized> DisplaySink for &mut D {
    fn set_lit(&mut self, count: u8, shamash: bool) -> Result<()> {
        (**self).set_lit(count, shamash)
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }
}

/// Renders the candle state as text, e.g. `🕯🕯🕯····· | shamash: on`
pub fn render(count: u8, shamash: bool) -> String {
    let count = count.min(CANDLE_COUNT);
    let mut row = String::with_capacity(CANDLE_COUNT as usize * 4);
    for candle in 0..CANDLE_COUNT {
        row.push(if candle < count { '🕯' } else { '·' });
    }
    format!("{} | shamash: {}", row, if shamash { "on" } else { "off" })
}

/// Display that only writes to the log
#[derive(Debug, Default)]
pub struct LogDisplay {
    lit: u8,
    shamash: bool,
}

impl LogDisplay {
    /// A display with every candle dark
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of lit candles
    pub fn lit(&self) -> u8 {
        self.lit
    }

    /// Whether the shamash is lit
    pub fn shamash(&self) -> bool {
        self.shamash
    }
}

impl DisplaySink for LogDisplay {
    fn set_lit(&mut self, count: u8, shamash: bool) -> Result<()> {
        self.lit = count.min(CANDLE_COUNT);
        self.shamash = shamash;
        info!("{}", render(self.lit, self.shamash));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_shows_candles_and_shamash() {
        assert_eq!(render(3, true), "🕯🕯🕯····· | shamash: on");
        assert_eq!(render(0, false), "········ | shamash: off");
        assert_eq!(render(12, false), "🕯🕯🕯🕯🕯🕯🕯🕯 | shamash: off");
    }

    #[test]
    fn log_display_tracks_state() {
        let mut display = LogDisplay::new();
        display.set_lit(5, true).unwrap();
        assert_eq!((display.lit(), display.shamash()), (5, true));
        display.clear().unwrap();
        assert_eq!((display.lit(), display.shamash()), (0, false));
    }
}
