/*!
 # Candle-lighting schedule

 This module holds the eight lighting instants of one Chanukah, the two
 off-time policies, and the capped sleep quantum every scheduler wait is built
 from. Everything here is a pure function of timestamps.
*/

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Error, Result};

/// Absolute instant carrying the location's civil UTC offset
pub type Timestamp = DateTime<FixedOffset>;

/// Number of nights in the holiday
pub const NIGHTS: usize = 8;

/// Longest single wait the scheduler ever performs
pub const MAX_SLEEP: Duration = Duration::from_secs(60);

/// Offset used by the fixed-offset off-time policy
pub const FIXED_BURN_HOURS: i64 = 12;

/// Hour constant of the hour-snap off-time policy
pub const HOUR_SNAP_BASE: i64 = 29;

/// How long after the final lighting instant candles stay lit without burnout
pub const FINAL_CUTOFF_HOURS: i64 = 24;

/// Returns how long to wait before re-checking the clock.
///
/// The result is `min(60s, target - now)` when the target lies in the future
/// and zero otherwise.
///
/// # Arguments
///
/// * `target` - The instant being waited for
/// * `now` - The current time
pub fn cap_sleep(target: Timestamp, now: Timestamp) -> Duration {
    match (target - now).to_std() {
        Ok(remaining) => remaining.min(MAX_SLEEP),
        Err(_) => Duration::ZERO,
    }
}

/// Fixed-offset policy: candles burn for twelve hours
pub fn fixed_offset_off_time(lighting: Timestamp) -> Timestamp {
    lighting + ChronoDuration::hours(FIXED_BURN_HOURS)
}

/// Hour-snap policy: `29 - hour` hours after lighting, truncated to the hour
pub fn hour_snap_off_time(lighting: Timestamp) -> Timestamp {
    let hour_diff = HOUR_SNAP_BASE - i64::from(lighting.hour());
    let shifted = lighting + ChronoDuration::hours(hour_diff);
    shifted
        - ChronoDuration::minutes(i64::from(shifted.minute()))
        - ChronoDuration::seconds(i64::from(shifted.second()))
        - ChronoDuration::nanoseconds(i64::from(shifted.nanosecond()))
}

/// Strategy used to derive a night's off-time from its lighting instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OffTimePolicy {
    /// `lighting + 12h`, for sources that already report local civil time
    #[default]
    FixedOffset,
    /// `lighting + (29 - hour)h` with minutes and below forced to zero
    HourSnap,
}

impl OffTimePolicy {
    /// Computes the off-time for a lighting instant
    pub fn off_time(&self, lighting: Timestamp) -> Timestamp {
        match self {
            OffTimePolicy::FixedOffset => fixed_offset_off_time(lighting),
            OffTimePolicy::HourSnap => hour_snap_off_time(lighting),
        }
    }

    /// Get the policy name as string
    pub fn name(&self) -> &'static str {
        match self {
            OffTimePolicy::FixedOffset => "fixed-offset",
            OffTimePolicy::HourSnap => "hour-snap",
        }
    }
}

/// Where a point in time falls relative to the nightly windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NightPhase {
    /// Before night `i` is lit (and after night `i - 1` burned out)
    BeforeNight(usize),
    /// Inside night `i`'s window
    Lit(usize),
    /// Night `i` burned out and night `i + 1` is not due yet
    BurnedOut(usize),
    /// The final night's window has closed
    Over,
}

/// The eight candle-lighting instants of one holiday, strictly increasing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightingSchedule {
    lighting: [Timestamp; NIGHTS],
}

impl LightingSchedule {
    /// Validates and wraps eight lighting instants
    pub fn new(lighting: Vec<Timestamp>) -> Result<Self> {
        let lighting: [Timestamp; NIGHTS] = lighting.try_into().map_err(|v: Vec<Timestamp>| {
            Error::ScheduleUnavailable(format!("expected {} nights, got {}", NIGHTS, v.len()))
        })?;

        for (night, pair) in lighting.windows(2).enumerate() {
            if pair[0] >= pair[1] {
                return Err(Error::ScheduleUnavailable(format!(
                    "night {} ({}) does not follow night {} ({})",
                    night + 2,
                    pair[1],
                    night + 1,
                    pair[0]
                )));
            }
        }

        Ok(Self { lighting })
    }

    /// Builds a schedule of eight consecutive daily instants
    pub fn from_first_night(first: Timestamp) -> Self {
        let lighting = std::array::from_fn(|night| first + ChronoDuration::days(night as i64));
        Self { lighting }
    }

    /// Lighting instant for a night index (0-7)
    pub fn night(&self, index: usize) -> Option<Timestamp> {
        self.lighting.get(index).copied()
    }

    /// The final night's lighting instant
    pub fn last(&self) -> Timestamp {
        self.lighting[NIGHTS - 1]
    }

    /// All lighting instants in night order
    pub fn nights(&self) -> &[Timestamp; NIGHTS] {
        &self.lighting
    }

    /// Instant at which candles left lit without burnout are extinguished
    pub fn final_cutoff(&self) -> Timestamp {
        self.last() + ChronoDuration::hours(FINAL_CUTOFF_HOURS)
    }

    /// Evaluates which phase the display should be in at `now`
    pub fn phase_at(&self, now: Timestamp, policy: OffTimePolicy) -> NightPhase {
        for (night, &lighting) in self.lighting.iter().enumerate() {
            if now < lighting {
                return if night == 0 {
                    NightPhase::BeforeNight(0)
                } else {
                    NightPhase::BurnedOut(night - 1)
                };
            }
            if now < policy.off_time(lighting) {
                return NightPhase::Lit(night);
            }
        }
        NightPhase::Over
    }
}
