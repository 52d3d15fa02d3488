/*!
 # Night-by-night lighting state machine

 [`LightingScheduler`] walks the eight nights of a [`LightingSchedule`] in
 order, lighting `night + 1` candles plus the shamash for each night's window.
 Every wait is a sequence of capped sleeps of at most a minute, so clock
 corrections are picked up within a minute.
*/

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::display::DisplaySink;
use crate::schedule::{cap_sleep, LightingSchedule, OffTimePolicy, Timestamp, NIGHTS};
use crate::Result;

/// Audible cue played when a night is lit
pub trait SignalSink: Send {
    /// Whether the mute switch is engaged
    fn is_muted(&self) -> bool;

    /// Starts the night signal without waiting for it to finish
    fn play_night_signal(&mut self) -> Result<()>;
}

/// Whether candles go out at each night's off-time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurnoutPolicy {
    /// `true`: extinguish at every off-time; `false`: stay lit until a day after the last lighting
    pub burnout: bool,
}

impl BurnoutPolicy {
    /// Candles burn out every night
    pub const BURN_OUT: BurnoutPolicy = BurnoutPolicy { burnout: true };
    /// Candles stay lit until the end of the holiday
    pub const STAY_LIT: BurnoutPolicy = BurnoutPolicy { burnout: false };
}

impl Default for BurnoutPolicy {
    fn default() -> Self {
        Self::BURN_OUT
    }
}

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Not started
    Idle,
    /// Counting down to night `i`'s lighting instant
    Waiting(usize),
    /// Night `i`'s candles are on
    Lit(usize),
    /// Night `i`'s window has closed
    Extinguished(usize),
    /// All nights processed, possibly waiting for the final cutoff
    PostHoliday,
    /// Terminal
    Done,
}

/// Output-side state of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState {
    /// Night whose candles are (or were last) lit
    pub current_night: Option<usize>,
    /// Candles currently lit; `current_night + 1` while lit, 0 otherwise
    pub lit_count: u8,
    /// Whether the shamash is lit
    pub shamash_lit: bool,
    /// Mute flag observed when the current night was lit
    pub muted: bool,
}

/// Summary of a completed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// The holiday was already over at start and nothing was touched
    pub already_over: bool,
    /// Nights whose candles were lit
    pub nights_lit: usize,
    /// Nights whose window had fully elapsed before they could be lit
    pub nights_missed: usize,
    /// Times the clock was observed moving backwards during a wait
    pub clock_regressions: usize,
    /// Night signals started
    pub signals_played: usize,
    /// Night signals that failed to start
    pub signal_failures: usize,
}

/// Builder for [`LightingScheduler`]
pub struct SchedulerBuilder<C, D> {
    clock: C,
    display: D,
    burnout: BurnoutPolicy,
    policy: OffTimePolicy,
    signal: Option<Box<dyn SignalSink>>,
}

impl<C: Clock, D: DisplaySink> SchedulerBuilder<C, D> {
    /// Sets the burnout policy (default: burn out every night)
    pub fn burnout(mut self, burnout: BurnoutPolicy) -> Self {
        self.burnout = burnout;
        self
    }

    /// Sets the off-time policy (default: fixed twelve-hour offset)
    pub fn off_time_policy(mut self, policy: OffTimePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Adds a night signal
    pub fn signal(mut self, signal: impl SignalSink + 'static) -> Self {
        self.signal = Some(Box::new(signal));
        self
    }

    /// Adds or removes the night signal
    pub fn maybe_signal(mut self, signal: Option<Box<dyn SignalSink>>) -> Self {
        self.signal = signal;
        self
    }

    /// Finishes the scheduler in the `Idle` state
    pub fn build(self) -> LightingScheduler<C, D> {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        LightingScheduler {
            clock: self.clock,
            display: self.display,
            burnout: self.burnout,
            policy: self.policy,
            signal: self.signal,
            state: SchedulerState::Idle,
            run_state: RunState::default(),
            state_tx,
            last_seen: None,
            report: RunReport::default(),
        }
    }
}

/// Drives the candles through one holiday
pub struct LightingScheduler<C, D> {
    clock: C,
    display: D,
    burnout: BurnoutPolicy,
    policy: OffTimePolicy,
    signal: Option<Box<dyn SignalSink>>,
    state: SchedulerState,
    run_state: RunState,
    state_tx: watch::Sender<SchedulerState>,
    /// Latest clock reading, for regression detection
    last_seen: Option<Timestamp>,
    report: RunReport,
}

impl<C: Clock, D: DisplaySink> LightingScheduler<C, D> {
    /// Starts building a scheduler around a clock and a display
    pub fn builder(clock: C, display: D) -> SchedulerBuilder<C, D> {
        SchedulerBuilder {
            clock,
            display,
            burnout: BurnoutPolicy::default(),
            policy: OffTimePolicy::default(),
            signal: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Current output-side state
    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    /// Subscribes to lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_tx.subscribe()
    }

    /// The display, e.g. for a final clear after the run
    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    /// Gives back the display
    pub fn into_display(self) -> D {
        self.display
    }

    /// Runs the holiday to completion.
    ///
    /// Returns immediately, without touching any output, if the final
    /// night's off-time has already passed. Only display failures are
    /// returned as errors.
    #[instrument(skip_all, fields(policy = self.policy.name(), burnout = self.burnout.burnout))]
    pub async fn run(&mut self, schedule: LightingSchedule) -> Result<RunReport> {
        self.report = RunReport::default();
        self.run_state = RunState::default();
        self.last_seen = None;
        self.transition(SchedulerState::Idle);

        let final_off = self.policy.off_time(schedule.last());
        if self.observe_now() >= final_off {
            info!("Final night ended at {}, nothing to do", final_off);
            self.report.already_over = true;
            self.transition(SchedulerState::Done);
            return Ok(self.report.clone());
        }

        for (night, &lighting) in schedule.nights().iter().enumerate() {
            self.run_night(night, lighting).await?;
        }

        self.transition(SchedulerState::PostHoliday);
        if !self.burnout.burnout {
            let cutoff = schedule.final_cutoff();
            info!("Candles stay lit until {}", cutoff);
            self.wait_until(cutoff).await;
            if self.run_state.lit_count > 0 || self.run_state.shamash_lit {
                self.extinguish()?;
            }
        }

        self.transition(SchedulerState::Done);
        info!(
            "Holiday complete: {} nights lit, {} missed",
            self.report.nights_lit, self.report.nights_missed
        );
        Ok(self.report.clone())
    }

    /// Handles one night: wait, light, wait, and maybe extinguish
    async fn run_night(&mut self, night: usize, lighting: Timestamp) -> Result<()> {
        let off_time = self.policy.off_time(lighting);

        if self.observe_now() >= off_time {
            debug!("Night {} ended at {}, skipping", night + 1, off_time);
            self.report.nights_missed += 1;
            return Ok(());
        }

        if self.observe_now() < lighting {
            self.transition(SchedulerState::Waiting(night));
            info!("Waiting for night {} at {}", night + 1, lighting);
            self.wait_until(lighting).await;
        }

        // The wait may have overshot the whole window after a clock jump
        if self.observe_now() >= off_time {
            warn!("Night {} window passed while waiting", night + 1);
            self.report.nights_missed += 1;
            return Ok(());
        }

        self.light(night)?;
        info!("Night {} lit until {}", night + 1, off_time);
        self.wait_until(off_time).await;

        if self.burnout.burnout {
            self.extinguish()?;
        }
        self.transition(SchedulerState::Extinguished(night));
        Ok(())
    }

    fn light(&mut self, night: usize) -> Result<()> {
        let count = (night + 1) as u8;
        self.display.set_lit(count, true)?;

        let muted = self.signal.as_ref().is_some_and(|signal| signal.is_muted());
        self.run_state = RunState {
            current_night: Some(night),
            lit_count: count,
            shamash_lit: true,
            muted,
        };
        self.report.nights_lit += 1;
        self.transition(SchedulerState::Lit(night));

        if let Some(signal) = self.signal.as_mut() {
            if muted {
                debug!("Night signal muted");
            } else {
                match signal.play_night_signal() {
                    Ok(()) => self.report.signals_played += 1,
                    Err(e) => {
                        debug!("Night signal failed: {}", e);
                        self.report.signal_failures += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn extinguish(&mut self) -> Result<()> {
        self.display.clear()?;
        self.run_state.lit_count = 0;
        self.run_state.shamash_lit = false;
        debug!("Candles extinguished");
        Ok(())
    }

    /// Sleeps in capped steps until the clock reaches `target`
    async fn wait_until(&mut self, target: Timestamp) {
        loop {
            let now = self.observe_now();
            let step = cap_sleep(target, now);
            if step.is_zero() {
                break;
            }
            self.clock.sleep(step).await;
        }
    }

    /// Reads the clock, noting any backwards jump
    fn observe_now(&mut self) -> Timestamp {
        let now = self.clock.now();
        if let Some(previous) = self.last_seen {
            if now < previous {
                warn!("Clock moved backwards from {} to {}", previous, now);
                self.report.clock_regressions += 1;
            }
        }
        self.last_seen = Some(now);
        now
    }

    fn transition(&mut self, state: SchedulerState) {
        if self.state != state {
            debug!("Scheduler state {:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.state_tx.send_replace(state);
    }
}
