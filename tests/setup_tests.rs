use auto_menorah::setup::{
    connect_with_retry, run_setup, signal_distress, SetupStatus, LOADING_SEQUENCE,
};
use auto_menorah::*;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;

/// Display keeping every frame it was asked to show
#[derive(Default)]
struct FrameDisplay {
    frames: Vec<(u8, bool)>,
    fail_after: Option<usize>,
}

impl DisplaySink for FrameDisplay {
    fn set_lit(&mut self, count: u8, shamash: bool) -> Result<()> {
        if self.fail_after.is_some_and(|limit| self.frames.len() >= limit) {
            return Err(Error::Display("output line lost".into()));
        }
        self.frames.push((count, shamash));
        Ok(())
    }
}

/// Link that fails a fixed number of times, optionally taking a while per attempt
struct FlakyLink {
    failures: u32,
    calls: u32,
    latency: Duration,
}

impl FlakyLink {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: 0,
            latency: Duration::ZERO,
        }
    }
}

impl NetworkLink for FlakyLink {
    async fn connect(&mut self) -> Result<()> {
        self.calls += 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.calls <= self.failures {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no route",
            )))
        } else {
            Ok(())
        }
    }
}

fn policy(attempts: u32, delay_ms: u64) -> RetryPolicy {
    RetryPolicy {
        attempts,
        delay: Duration::from_millis(delay_ms),
    }
}

#[tokio::test(start_paused = true)]
async fn connects_on_a_later_attempt() {
    let mut link = FlakyLink::new(2);
    let (status_tx, status_rx) = watch::channel(SetupStatus::Connecting);
    let started = Instant::now();

    connect_with_retry(&mut link, policy(5, 5000), &status_tx)
        .await
        .unwrap();

    assert_eq!(link.calls, 3);
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert_eq!(*status_rx.borrow(), SetupStatus::Connected);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_the_retry_budget() {
    let mut link = FlakyLink::new(u32::MAX);
    let (status_tx, status_rx) = watch::channel(SetupStatus::Connecting);
    let started = Instant::now();

    let err = connect_with_retry(&mut link, policy(4, 1000), &status_tx)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NetworkUnavailable { attempts: 4 }));
    assert_eq!(link.calls, 4);
    // No pause after the last attempt
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(*status_rx.borrow(), SetupStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn loading_animation_runs_until_connected() {
    let mut display = FrameDisplay::default();
    let mut link = FlakyLink::new(0);
    link.latency = Duration::from_millis(3500);

    run_setup(
        &mut display,
        &mut link,
        policy(5, 5000),
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    assert_eq!(
        display.frames,
        vec![(1, false), (2, false), (3, false), (4, false), (0, false)]
    );
}

#[tokio::test(start_paused = true)]
async fn loading_animation_stops_when_the_network_is_unavailable() {
    let mut display = FrameDisplay::default();
    let mut link = FlakyLink::new(u32::MAX);

    // Three attempts 4.25s apart give up at 8.5s, after exactly one cycle
    let err = run_setup(
        &mut display,
        &mut link,
        policy(3, 4250),
        Duration::from_secs(1),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::NetworkUnavailable { attempts: 3 }));
    assert_eq!(display.frames, LOADING_SEQUENCE.to_vec());
    // Four candles, then the shamash joins them
    assert_eq!(display.frames[3], (4, false));
    assert_eq!(display.frames[4], (4, true));
    assert_eq!(display.frames[5], (5, true));
}

#[tokio::test(start_paused = true)]
async fn loading_animation_errors_surface_after_the_join() {
    let mut display = FrameDisplay {
        fail_after: Some(2),
        ..Default::default()
    };
    let mut link = FlakyLink::new(0);
    link.latency = Duration::from_secs(5);

    let err = run_setup(
        &mut display,
        &mut link,
        policy(1, 1000),
        Duration::from_secs(1),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Display(_)));
    assert_eq!(link.calls, 1);
}

#[tokio::test(start_paused = true)]
async fn distress_blinks_everything() {
    let mut display = FrameDisplay::default();

    let outcome = tokio::time::timeout(
        Duration::from_millis(2100),
        signal_distress(&mut display, Duration::from_millis(500)),
    )
    .await;

    assert!(outcome.is_err(), "distress never returns on its own");
    assert_eq!(
        display.frames,
        vec![(8, true), (0, false), (8, true), (0, false), (8, true)]
    );
}

#[tokio::test(start_paused = true)]
async fn distress_ends_on_display_failure() {
    let mut display = FrameDisplay {
        fail_after: Some(3),
        ..Default::default()
    };

    let err = signal_distress(&mut display, Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Display(_)));
    assert_eq!(display.frames.len(), 3);
}

#[tokio::test]
async fn tcp_probe_reaches_a_listening_port() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut probe = TcpProbe::new("127.0.0.1", port, Duration::from_secs(2));
    probe.connect().await.unwrap();
}

#[tokio::test]
async fn tcp_probe_reports_a_closed_port() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut probe = TcpProbe::new("127.0.0.1", port, Duration::from_secs(2));
    assert!(matches!(probe.connect().await, Err(Error::Io(_))));
}
