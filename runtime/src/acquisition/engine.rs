//! The acquisition loop: log in, optionally wait for the release instant,
//! then poll and claim until a slot is won or the retry budget runs out.
//!
//! Only errors classified [`Disposition::Retry`] or
//! [`Disposition::Reauthenticate`] spend the retry budget. Empty polls and
//! lost claims are routine and just lead to another jittered poll, so a run
//! whose polls stay empty goes on until `max_cycles` (if configured) stops it.

use crate::acquisition::booking::{ClaimOutcome, SlotClaimer};
use crate::acquisition::schedule::SlotSource;
use crate::acquisition::session::Authenticator;
use crate::acquisition::slot::Slot;
use crate::config::policy::PollingPolicy;
use crate::error::{AcquireError, Disposition};
use chrono::Local;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

/// Floor for the inter-cycle delay.
pub const MIN_CYCLE_DELAY: Duration = Duration::from_millis(1000);
/// Jitter window around the configured base delay, in milliseconds.
pub const JITTER_MS: (i64, i64) = (-500, 1000);
/// Pause after an error before polling again.
pub const RETRY_PAUSE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Authenticating,
    Waiting,
    Polling,
    Selecting,
    Booking,
    Retrying,
    Succeeded,
    Exhausted,
}

/// How a run ended, short of a terminal error.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Succeeded { slot: Slot, confirmation: String },
    /// The retry budget was spent.
    Exhausted { retries: u32 },
    /// `max_cycles` polls went by without a successful claim.
    CyclesExhausted { cycles: u64 },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Succeeded { .. } => 0,
            RunOutcome::Exhausted { .. } | RunOutcome::CyclesExhausted { .. } => 1,
        }
    }
}

/// Counters collected over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub cycles: u64,
    pub empty_polls: u64,
    pub claims_lost: u32,
    pub retries_used: u32,
    pub reauthentications: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub stats: RunStats,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }
}

pub struct AcquisitionLoop<A, S, C> {
    auth: A,
    source: S,
    claimer: C,
    policy: PollingPolicy,
    rng: StdRng,
    state: LoopState,
    stats: RunStats,
    /// Set after a session expiry; the next cycle logs in before polling.
    needs_login: bool,
}

impl<A, S, C> AcquisitionLoop<A, S, C>
where
    A: Authenticator,
    S: SlotSource,
    C: SlotClaimer,
{
    pub fn new(auth: A, source: S, claimer: C, policy: PollingPolicy, rng: StdRng) -> Self {
        Self {
            auth,
            source,
            claimer,
            policy,
            rng,
            state: LoopState::Idle,
            stats: RunStats::default(),
            needs_login: false,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Drive the run to completion.
    ///
    /// Returns `Err` only for terminal failures (authentication, encryption,
    /// configuration); budget exhaustion is an `Ok` report with exit code 1.
    pub async fn run(&mut self) -> Result<RunReport, AcquireError> {
        self.transition(LoopState::Authenticating);
        if let Err(e) = self.auth.authenticate().await {
            tracing::error!("login failed, giving up: {e}");
            return Err(e);
        }

        self.wait_for_start().await;

        tracing::info!(
            "polling started: channel={:?} max_retries={} base_delay={}ms",
            self.policy.channel,
            self.policy.max_retries,
            self.policy.base_delay.as_millis()
        );

        loop {
            if self.stats.retries_used >= self.policy.max_retries {
                tracing::error!("retry budget of {} exhausted", self.policy.max_retries);
                return Ok(self.finish(RunOutcome::Exhausted {
                    retries: self.stats.retries_used,
                }));
            }
            if let Some(max) = self.policy.max_cycles {
                if self.stats.cycles >= max {
                    tracing::error!("no slot claimed after {max} cycles");
                    return Ok(self.finish(RunOutcome::CyclesExhausted {
                        cycles: self.stats.cycles,
                    }));
                }
            }

            self.stats.cycles += 1;
            match self.cycle().await {
                Ok(Some((slot, confirmation))) => {
                    tracing::info!("slot {} claimed: {confirmation}", slot.schedule_id);
                    return Ok(self.finish(RunOutcome::Succeeded { slot, confirmation }));
                }
                Ok(None) => {
                    let delay = jittered_delay(self.policy.base_delay, &mut self.rng);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => self.handle_error(e).await?,
            }
        }
    }

    /// One poll, and a claim if anything turned up.
    async fn cycle(&mut self) -> Result<Option<(Slot, String)>, AcquireError> {
        if self.needs_login {
            self.transition(LoopState::Authenticating);
            self.auth.authenticate().await?;
            self.needs_login = false;
            self.stats.reauthentications += 1;
            tracing::info!("logged in again");
        }

        self.transition(LoopState::Polling);
        let slots = self.source.poll(&self.policy).await?;
        if slots.is_empty() {
            self.stats.empty_polls += 1;
            tracing::info!("no open slots, polling again");
            return Ok(None);
        }

        self.transition(LoopState::Selecting);
        tracing::info!("found {} open slot(s)", slots.len());
        let Some(slot) = slots.choose(&mut self.rng).cloned() else {
            return Ok(None);
        };
        tracing::info!(
            "claiming schedule {} (doctor {}, {})",
            slot.schedule_id,
            slot.doctor_id,
            slot.day_part
        );

        self.transition(LoopState::Booking);
        match self.claimer.claim(&slot).await? {
            ClaimOutcome::Won { confirmation } => Ok(Some((slot, confirmation))),
            ClaimOutcome::Lost => {
                self.stats.claims_lost += 1;
                tracing::info!("slot {} taken by someone else, polling again", slot.schedule_id);
                Ok(None)
            }
        }
    }

    async fn handle_error(&mut self, e: AcquireError) -> Result<(), AcquireError> {
        match e.disposition() {
            Disposition::Terminal => {
                tracing::error!("aborting: {e}");
                Err(e)
            }
            Disposition::Retry => {
                self.transition(LoopState::Retrying);
                self.stats.retries_used += 1;
                tracing::warn!(
                    "cycle failed ({}/{}): {e}",
                    self.stats.retries_used,
                    self.policy.max_retries
                );
                if self.stats.retries_used < self.policy.max_retries {
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
                Ok(())
            }
            Disposition::Reauthenticate => {
                self.transition(LoopState::Retrying);
                self.stats.retries_used += 1;
                tracing::warn!(
                    "{e}; logging in again ({}/{})",
                    self.stats.retries_used,
                    self.policy.max_retries
                );
                self.needs_login = true;
                Ok(())
            }
        }
    }

    /// Sleep once until the scheduled start, if it is still ahead.
    async fn wait_for_start(&mut self) {
        let Some(at) = self.policy.scheduled_start else {
            return;
        };
        let now = Local::now().naive_local();
        let Ok(wait) = (at - now).to_std() else {
            return;
        };
        if wait.is_zero() {
            return;
        }
        self.transition(LoopState::Waiting);
        tracing::info!(
            "waiting {:.1}s until scheduled start {at}",
            wait.as_secs_f64()
        );
        tokio::time::sleep(wait).await;
        tracing::info!("scheduled start reached");
    }

    fn finish(&mut self, outcome: RunOutcome) -> RunReport {
        let terminal = match outcome {
            RunOutcome::Succeeded { .. } => LoopState::Succeeded,
            _ => LoopState::Exhausted,
        };
        self.transition(terminal);
        RunReport {
            outcome,
            stats: self.stats.clone(),
        }
    }

    fn transition(&mut self, next: LoopState) {
        tracing::debug!("state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// `base` shifted by a random offset from [`JITTER_MS`], floored at
/// [`MIN_CYCLE_DELAY`].
pub fn jittered_delay(base: Duration, rng: &mut impl Rng) -> Duration {
    let offset = rng.gen_range(JITTER_MS.0..=JITTER_MS.1);
    let base_ms = i64::try_from(base.as_millis()).unwrap_or(i64::MAX);
    let ms = base_ms
        .saturating_add(offset)
        .max(MIN_CYCLE_DELAY.as_millis() as i64);
    Duration::from_millis(ms as u64)
}
