/*!
 # Connection setup

 Before the scheduler starts, the menorah joins the network while the
 candles run a loading animation. Both run concurrently on one task and the
 animation stops as soon as the join succeeds or gives up. When a fatal
 condition stops the menorah, [`signal_distress`] blinks every candle forever.
*/

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, error, info, instrument, warn};

use crate::display::{DisplaySink, CANDLE_COUNT};
use crate::{Error, Result};

/// Progress of the network join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStatus {
    Connecting,
    Connected,
    Failed,
}

/// Something that can be brought up before the schedule is fetched
pub trait NetworkLink: Send {
    /// Makes one connection attempt
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Bounded retry budget for the network join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// Checks connectivity by opening a TCP connection to a host
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    /// Probe for `host:port`, giving up on each attempt after `timeout`
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }
}

impl NetworkLink for TcpProbe {
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send {
        let address = format!("{}:{}", self.host, self.port);
        let timeout = self.timeout;
        async move {
            match time::timeout(timeout, TcpStream::connect(&address)).await {
                Ok(Ok(_stream)) => {
                    debug!("Reached {}", address);
                    Ok(())
                }
                Ok(Err(e)) => Err(Error::Io(e)),
                Err(_) => Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connecting to {} timed out", address),
                ))),
            }
        }
    }
}

/// Joins the network with retries, publishing progress on `status`
#[instrument(skip(link, status))]
pub async fn connect_with_retry<L: NetworkLink>(
    link: &mut L,
    policy: RetryPolicy,
    status: &watch::Sender<SetupStatus>,
) -> Result<()> {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match link.connect().await {
            Ok(()) => {
                info!("Network connected (attempt {}/{})", attempt, attempts);
                status.send_replace(SetupStatus::Connected);
                return Ok(());
            }
            Err(e) => {
                warn!("Could not connect (attempt {}/{}): {}", attempt, attempts, e);
                if attempt < attempts {
                    debug!("Retrying in {:?}", policy.delay);
                    time::sleep(policy.delay).await;
                }
            }
        }
    }

    error!("Network unavailable after {} attempts", attempts);
    status.send_replace(SetupStatus::Failed);
    Err(Error::NetworkUnavailable { attempts })
}

/// Loading animation frames: (candles lit, shamash lit).
///
/// The fifth frame adds the shamash to the first four candles.
pub const LOADING_SEQUENCE: [(u8, bool); 9] = [
    (1, false),
    (2, false),
    (3, false),
    (4, false),
    (4, true),
    (5, true),
    (6, true),
    (7, true),
    (8, true),
];

/// Cycles the loading animation until `status` leaves `Connecting`
pub async fn display_loading<D: DisplaySink>(
    display: &mut D,
    mut status: watch::Receiver<SetupStatus>,
    interval: Duration,
) -> Result<()> {
    loop {
        for &(count, shamash) in &LOADING_SEQUENCE {
            if *status.borrow_and_update() != SetupStatus::Connecting {
                return Ok(());
            }
            display.set_lit(count, shamash)?;

            tokio::select! {
                _ = time::sleep(interval) => {}
                // A closed channel means the join side is gone
                changed = status.changed() => if changed.is_err() {
                    return Ok(());
                },
            }
        }
    }
}

/// Joins the network while animating `display`.
///
/// Returns once both the join and the animation have finished, so the
/// display is free for the scheduler afterwards.
#[instrument(skip(display, link))]
pub async fn run_setup<D: DisplaySink, L: NetworkLink>(
    display: &mut D,
    link: &mut L,
    policy: RetryPolicy,
    loading_interval: Duration,
) -> Result<()> {
    let (status_tx, status_rx) = watch::channel(SetupStatus::Connecting);

    let animation = display_loading(display, status_rx, loading_interval);
    let join = connect_with_retry(link, policy, &status_tx);
    let (animation, join) = tokio::join!(animation, join);

    // The join outcome wins: it explains why the animation stopped
    join?;
    animation?;
    display.clear()?;
    Ok(())
}

/// Blinks all candles and the shamash forever as a visual error report
pub async fn signal_distress<D: DisplaySink>(display: &mut D, cadence: Duration) -> Result<Infallible> {
    error!("Fatal error, signalling distress");
    loop {
        display.set_lit(CANDLE_COUNT, true)?;
        time::sleep(cadence).await;
        display.clear()?;
        time::sleep(cadence).await;
    }
}
