/*!
 # Automatic Menorah Controller Library

 A Rust library for driving a menorah replica through the eight nights of
 Chanukah. Candle-lighting times are fetched from the Hebcal calendar service,
 and the candles are lit and extinguished on schedule without supervision.

 ## Features

 * Candle-lighting schedule lookup by postal code
 * Night-by-night lighting state machine with capped waits
 * Fixed-offset and hour-snap extinguish policies
 * Optional burnout at each night's off-time
 * Loading animation during network setup and a distress signal on failure
 * RTTTL night tune with a hardware mute switch
 * Simulated clock for dry runs

 ## Example

 ```rust,no_run
 use auto_menorah::*;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Initialize tracing for logs
     tracing_subscriber::fmt::init();

     let first_night = chrono::DateTime::parse_from_rfc3339("2025-12-14T16:13:00-05:00")
         .expect("valid timestamp");
     let schedule = LightingSchedule::from_first_night(first_night);

     let mut scheduler = LightingScheduler::builder(SystemClock, LogDisplay::new())
         .burnout(BurnoutPolicy::BURN_OUT)
         .off_time_policy(OffTimePolicy::FixedOffset)
         .build();

     let report = scheduler.run(schedule).await?;
     println!("{} nights lit", report.nights_lit);
     Ok(())
 }
 ```
*/

use thiserror::Error;

/// Custom error types for the menorah controller library
#[derive(Error, Debug)]
pub enum Error {
    /// The calendar lookup could not produce eight lighting instants
    #[error("Candle-lighting schedule unavailable: {0}")]
    ScheduleUnavailable(String),

    /// The network could not be reached within the retry budget
    #[error("Network unavailable after {attempts} attempts")]
    NetworkUnavailable { attempts: u32 },

    /// Writing a candle output line failed
    #[error("Display error: {0}")]
    Display(String),

    /// Audio output problem
    #[error("Audio error: {0}")]
    Audio(String),

    /// Malformed RTTTL tune
    #[error("Invalid tune: {0}")]
    Tune(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from the HTTP client
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// I/O error, typically from the GPIO sysfs interface
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// Re-export modules
pub mod app;
pub mod audio;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod device;
pub mod display;
pub mod schedule;
pub mod scheduler;
pub mod setup;
pub mod tune;

// Re-export key types
pub use calendar::{FixedScheduleProvider, HebcalProvider, ScheduleProvider};
pub use clock::{Clock, SimulatedClock, SystemClock};
pub use config::Config;
pub use device::{GpioMenorah, MuteSwitch};
pub use display::{DisplaySink, LogDisplay, CANDLE_COUNT};
pub use schedule::{
    cap_sleep, fixed_offset_off_time, hour_snap_off_time, LightingSchedule, NightPhase,
    OffTimePolicy, Timestamp, MAX_SLEEP, NIGHTS,
};
pub use scheduler::{
    BurnoutPolicy, LightingScheduler, RunReport, RunState, SchedulerState, SignalSink,
};
pub use setup::{NetworkLink, RetryPolicy, TcpProbe};
pub use tune::Tune;
