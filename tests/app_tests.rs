use auto_menorah::app::{Menorah, RunSettings};
use auto_menorah::setup::LOADING_SEQUENCE;
use auto_menorah::*;
use chrono::{DateTime, Duration as ChronoDuration};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

type Frames = Arc<Mutex<Vec<(u8, bool)>>>;

struct SharedDisplay(Frames);

impl DisplaySink for SharedDisplay {
    fn set_lit(&mut self, count: u8, shamash: bool) -> Result<()> {
        self.0.lock().push((count, shamash));
        Ok(())
    }
}

struct ScriptedLink {
    failures: u32,
    calls: u32,
}

impl NetworkLink for ScriptedLink {
    async fn connect(&mut self) -> Result<()> {
        self.calls += 1;
        if self.calls <= self.failures {
            Err(Error::Io(std::io::ErrorKind::ConnectionRefused.into()))
        } else {
            Ok(())
        }
    }
}

struct UnreachableCalendar;

impl ScheduleProvider for UnreachableCalendar {
    fn fetch_schedule(&mut self) -> impl Future<Output = Result<LightingSchedule>> + Send {
        std::future::ready(Err(Error::ScheduleUnavailable(
            "only 5 of 8 nights found".into(),
        )))
    }
}

fn first_night() -> Timestamp {
    DateTime::parse_from_rfc3339("2025-12-14T16:13:00-05:00").unwrap()
}

fn settings() -> RunSettings {
    let mut settings = RunSettings::from(Config::default());
    settings.retry = RetryPolicy {
        attempts: 3,
        delay: Duration::from_secs(5),
    };
    settings.loading_interval = Duration::from_secs(1);
    settings.distress_interval = Duration::from_secs(1);
    settings
}

#[tokio::test(start_paused = true)]
async fn runs_setup_then_the_whole_holiday() {
    let frames = Frames::default();
    let clock = Arc::new(SimulatedClock::new(first_night() - ChronoDuration::hours(1)));
    let link = ScriptedLink {
        failures: 1,
        calls: 0,
    };

    let mut settings = settings();
    settings.retry.delay = Duration::from_millis(4500);

    let mut menorah = Menorah::new(
        clock.clone(),
        SharedDisplay(frames.clone()),
        FixedScheduleProvider::daily(first_night()),
        Some(link),
        None,
        settings,
    );
    let report = menorah.run_or_signal_distress().await.unwrap();

    assert_eq!(report.nights_lit, NIGHTS);
    let frames = frames.lock().clone();
    // Boot clear, five animation frames over the retry pause, setup clear
    assert_eq!(frames[0], (0, false));
    assert_eq!(&frames[1..6], &LOADING_SEQUENCE[..5]);
    assert_eq!(frames[5], (4, true));
    assert_eq!(frames[6], (0, false));
    assert_eq!(frames[7], (1, true));
    assert_eq!(frames.last(), Some(&(0, false)));
    assert_eq!(
        clock.now(),
        OffTimePolicy::FixedOffset.off_time(first_night() + ChronoDuration::days(7))
    );
}

#[tokio::test(start_paused = true)]
async fn skips_setup_without_a_link() {
    let frames = Frames::default();
    let clock = Arc::new(SimulatedClock::new(first_night()));

    let mut menorah = Menorah::new(
        clock,
        SharedDisplay(frames.clone()),
        FixedScheduleProvider::daily(first_night()),
        None::<ScriptedLink>,
        None,
        settings(),
    );
    menorah.run().await.unwrap();

    let frames = frames.lock().clone();
    assert_eq!(&frames[..2], &[(0, false), (1, true)]);
}

#[tokio::test(start_paused = true)]
async fn unreachable_network_is_returned_from_run() {
    let frames = Frames::default();
    let mut menorah = Menorah::new(
        SystemClock,
        SharedDisplay(frames.clone()),
        FixedScheduleProvider::daily(first_night()),
        Some(ScriptedLink {
            failures: u32::MAX,
            calls: 0,
        }),
        None,
        settings(),
    );

    let err = menorah.run().await.unwrap_err();
    assert!(matches!(err, Error::NetworkUnavailable { attempts: 3 }));
}

#[tokio::test(start_paused = true)]
async fn missing_schedule_ends_in_distress() {
    let frames = Frames::default();
    let mut menorah = Menorah::new(
        SystemClock,
        SharedDisplay(frames.clone()),
        UnreachableCalendar,
        None::<ScriptedLink>,
        None,
        settings(),
    );

    let outcome =
        tokio::time::timeout(Duration::from_millis(3500), menorah.run_or_signal_distress()).await;
    assert!(outcome.is_err(), "distress should not return");

    let frames = frames.lock().clone();
    assert_eq!(
        frames,
        vec![(0, false), (8, true), (0, false), (8, true), (0, false)]
    );
}

#[tokio::test(start_paused = true)]
async fn unreachable_network_ends_in_distress() {
    let frames = Frames::default();
    let mut menorah = Menorah::new(
        SystemClock,
        SharedDisplay(frames.clone()),
        FixedScheduleProvider::daily(first_night()),
        Some(ScriptedLink {
            failures: u32::MAX,
            calls: 0,
        }),
        None,
        settings(),
    );

    // Setup gives up at 10s, distress starts right after
    let outcome =
        tokio::time::timeout(Duration::from_millis(11500), menorah.run_or_signal_distress()).await;
    assert!(outcome.is_err());

    let frames = frames.lock().clone();
    assert_eq!(&frames[frames.len() - 2..], &[(8, true), (0, false)]);
}
