//! Top-level run: clear the candles, join the network, fetch the schedule and
//! hand over to the scheduler. Fatal conditions end in the distress signal.

use chrono::Local;
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::audio::TunePlayer;
use crate::calendar::{
    default_search_year, CalendarMonth, FixedScheduleProvider, HebcalProvider, ScheduleProvider,
};
use crate::clock::Clock;
use crate::config::{Config, DisplayBackend};
use crate::device::{GpioMenorah, MuteSwitch};
use crate::display::{DisplaySink, LogDisplay};
use crate::schedule::{LightingSchedule, MAX_SLEEP};
use crate::scheduler::{LightingScheduler, RunReport, SignalSink};
use crate::setup::{run_setup, signal_distress, NetworkLink, RetryPolicy, TcpProbe};
use crate::tune::Tune;
use crate::{Error, Result};

/// Display selected by configuration
#[derive(Debug)]
pub enum MenorahDisplay {
    Gpio(GpioMenorah),
    Log(LogDisplay),
}

impl MenorahDisplay {
    /// Opens the configured display on the calling thread.
    ///
    /// Exporting GPIO lines blocks; use [`MenorahDisplay::open`] from async code.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(match config.display.backend {
            DisplayBackend::Gpio => Self::Gpio(GpioMenorah::open(&config.display.pin_config())?),
            DisplayBackend::Log => Self::Log(LogDisplay::new()),
        })
    }

    /// Opens the configured display on the blocking thread pool
    pub async fn open(config: &Config) -> Result<Self> {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Self::from_config(&config))
            .await
            .map_err(|e| Error::Display(format!("display setup task failed: {}", e)))?
    }
}

impl DisplaySink for MenorahDisplay {
    fn set_lit(&mut self, count: u8, shamash: bool) -> Result<()> {
        match self {
            MenorahDisplay::Gpio(display) => display.set_lit(count, shamash),
            MenorahDisplay::Log(display) => display.set_lit(count, shamash),
        }
    }
}

/// Schedule source selected by configuration
#[derive(Debug)]
pub enum CalendarSource {
    Hebcal(HebcalProvider),
    Fixed(FixedScheduleProvider),
}

impl CalendarSource {
    pub fn from_config(config: &Config) -> Result<Self> {
        let calendar = &config.calendar;
        if let Some(first_night) = calendar.first_night {
            return Ok(Self::Fixed(FixedScheduleProvider::daily(first_night)));
        }
        if calendar.zip_code.trim().is_empty() {
            return Err(Error::Config(
                "calendar.zip_code is required unless calendar.first_night is set".into(),
            ));
        }

        let year = calendar
            .year
            .unwrap_or_else(|| default_search_year(Local::now().date_naive()));
        Ok(Self::Hebcal(HebcalProvider::new(
            calendar.base_url.clone(),
            calendar.zip_code.trim(),
            CalendarMonth::new(year, calendar.start_month),
            calendar.max_month_expansions,
        )?))
    }

    /// Whether the schedule needs the network
    pub fn is_remote(&self) -> bool {
        matches!(self, CalendarSource::Hebcal(_))
    }
}

impl ScheduleProvider for CalendarSource {
    fn fetch_schedule(&mut self) -> impl Future<Output = Result<LightingSchedule>> + Send {
        async move {
            match self {
                CalendarSource::Hebcal(provider) => provider.fetch_schedule().await,
                CalendarSource::Fixed(provider) => provider.fetch_schedule().await,
            }
        }
    }
}

/// Builds the night signal, if enabled
pub fn signal_from_config(config: &Config) -> Result<Option<Box<dyn SignalSink>>> {
    let signal = &config.signal;
    if !signal.enabled {
        return Ok(None);
    }

    let tune = Tune::parse(&signal.tune)?;
    let mute = match signal.mute_pin {
        Some(pin) => MuteSwitch::gpio(&config.display.gpio_root, pin, signal.mute_active_low)?,
        None => MuteSwitch::Fixed(signal.muted),
    };
    let player = TunePlayer::new(tune, mute)
        .with_device(signal.output_device.clone())
        .with_waveform(signal.waveform);
    Ok(Some(Box::new(player)))
}

/// Settings of the top-level run
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub config: Config,
    pub retry: RetryPolicy,
    pub loading_interval: Duration,
    pub distress_interval: Duration,
}

impl From<Config> for RunSettings {
    fn from(config: Config) -> Self {
        Self {
            retry: config.setup.retry_policy(),
            loading_interval: config.setup.loading_interval(),
            distress_interval: config.setup.distress_interval(),
            config,
        }
    }
}

/// The menorah with all of its collaborators
pub struct Menorah<C, D, P, L> {
    clock: C,
    display: D,
    provider: P,
    link: Option<L>,
    signal: Option<Box<dyn SignalSink>>,
    settings: RunSettings,
}

impl<C, D, P, L> Menorah<C, D, P, L>
where
    C: Clock + Clone,
    D: DisplaySink,
    P: ScheduleProvider,
    L: NetworkLink,
{
    /// Assembles a menorah. Without a `link`, network setup is skipped.
    pub fn new(
        clock: C,
        display: D,
        provider: P,
        link: Option<L>,
        signal: Option<Box<dyn SignalSink>>,
        settings: RunSettings,
    ) -> Self {
        Self {
            clock,
            display,
            provider,
            link,
            signal,
            settings,
        }
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    /// Runs one holiday, returning fatal conditions to the caller
    #[instrument(skip(self))]
    pub async fn run(&mut self) -> Result<RunReport> {
        self.display.clear()?;

        if let Some(link) = self.link.as_mut() {
            info!("Connecting to the network");
            run_setup(
                &mut self.display,
                link,
                self.settings.retry,
                self.settings.loading_interval,
            )
            .await?;
        }

        let schedule = self.provider.fetch_schedule().await?;
        for (night, lighting) in schedule.nights().iter().enumerate() {
            info!(
                "Night {}: {} until {}",
                night + 1,
                lighting,
                self.settings.config.off_time_policy.off_time(*lighting)
            );
        }

        let mut scheduler = LightingScheduler::builder(self.clock.clone(), &mut self.display)
            .burnout(self.settings.config.burnout_policy())
            .off_time_policy(self.settings.config.off_time_policy)
            .maybe_signal(self.signal.take())
            .build();
        scheduler.run(schedule).await
    }

    /// Runs one holiday; on a fatal condition, signals distress forever.
    ///
    /// Only display failures end the distress signal.
    pub async fn run_or_signal_distress(&mut self) -> Result<RunReport> {
        match self.run().await {
            Err(e @ (Error::ScheduleUnavailable(_) | Error::NetworkUnavailable { .. })) => {
                error!("{}", e);
                let cadence = self.settings.distress_interval;
                match signal_distress(&mut self.display, cadence).await {
                    Ok(never) => match never {},
                    Err(display_error) => Err(display_error),
                }
            }
            other => other,
        }
    }

    /// Sleeps forever in capped steps
    pub async fn idle(&self) -> Infallible {
        info!("Holiday over, idling");
        loop {
            self.clock.sleep(MAX_SLEEP).await;
        }
    }
}

/// Network link used by [`run_from_config`]
pub fn link_from_config(config: &Config) -> TcpProbe {
    TcpProbe::new(
        config.setup.probe_host.clone(),
        config.setup.probe_port,
        config.setup.probe_timeout(),
    )
}

/// Assembles the real menorah from configuration and runs it
pub async fn run_from_config<C: Clock + Clone>(clock: C, config: Config) -> Result<RunReport> {
    let display = MenorahDisplay::open(&config).await?;
    let provider = CalendarSource::from_config(&config)?;
    let link = provider.is_remote().then(|| link_from_config(&config));
    let signal = signal_from_config(&config)?;
    let idle_after_holiday = config.idle_after_holiday;

    let mut menorah = Menorah::new(clock, display, provider, link, signal, config.into());
    let report = menorah.run_or_signal_distress().await?;
    if idle_after_holiday {
        match menorah.idle().await {}
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_log_display_off_the_runtime() {
        let mut config = Config::default();
        config.display.backend = DisplayBackend::Log;

        let display = MenorahDisplay::open(&config).await.unwrap();
        assert!(matches!(display, MenorahDisplay::Log(_)));
    }

    #[tokio::test]
    async fn gpio_open_failure_is_a_display_error() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.display.gpio_root = root.path().join("missing");

        let result = MenorahDisplay::open(&config).await;
        assert!(matches!(result, Err(Error::Display(_))));
    }

    #[test]
    fn fixed_first_night_needs_no_network() {
        let mut config = Config::default();
        config.calendar.first_night =
            Some(chrono::DateTime::parse_from_rfc3339("2025-12-14T16:13:00-05:00").unwrap());
        let source = CalendarSource::from_config(&config).unwrap();
        assert!(!source.is_remote());
    }
}
