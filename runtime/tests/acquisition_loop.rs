//! Acquisition loop integration tests
//!
//! Runs the loop against scripted authenticators, slot sources and claimers
//! on a paused tokio clock, so delays and the scheduled start cost no real
//! time.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local};
use rand::rngs::StdRng;
use rand::SeedableRng;
use slothound_runtime::acquisition::booking::{ClaimOutcome, SlotClaimer};
use slothound_runtime::acquisition::engine::{AcquisitionLoop, LoopState, RunOutcome, RETRY_PAUSE};
use slothound_runtime::acquisition::schedule::SlotSource;
use slothound_runtime::acquisition::session::Authenticator;
use slothound_runtime::acquisition::slot::Slot;
use slothound_runtime::config::policy::{Channel, DayPart, PollingPolicy, Target, WeekdayCode};
use slothound_runtime::error::AcquireError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// ── Scripted collaborators ──

#[derive(Default)]
struct FakeAuth {
    calls: Arc<AtomicU32>,
    fail: bool,
    /// Outcomes for successive logins; succeeds once exhausted.
    script: VecDeque<Result<(), AcquireError>>,
}

#[async_trait]
impl Authenticator for FakeAuth {
    async fn authenticate(&mut self) -> Result<(), AcquireError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(step) = self.script.pop_front() {
            return step;
        }
        if self.fail {
            return Err(AcquireError::Auth("bad password".into()));
        }
        Ok(())
    }
}

type PollStep = Result<Vec<Slot>, AcquireError>;

/// Plays back scripted polls, then repeats `fallback` forever.
struct ScriptedSource {
    script: VecDeque<PollStep>,
    fallback: fn() -> PollStep,
    polls: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedSource {
    fn new(script: Vec<PollStep>, fallback: fn() -> PollStep) -> Self {
        Self {
            script: script.into(),
            fallback,
            polls: Arc::default(),
        }
    }
}

#[async_trait]
impl SlotSource for ScriptedSource {
    async fn poll(&mut self, _policy: &PollingPolicy) -> Result<Vec<Slot>, AcquireError> {
        self.polls.lock().unwrap().push(Instant::now());
        self.script.pop_front().unwrap_or_else(self.fallback)
    }
}

struct ScriptedClaimer {
    script: VecDeque<Result<ClaimOutcome, AcquireError>>,
    claimed: Arc<Mutex<Vec<String>>>,
}

impl ScriptedClaimer {
    fn new(script: Vec<Result<ClaimOutcome, AcquireError>>) -> Self {
        Self {
            script: script.into(),
            claimed: Arc::default(),
        }
    }
}

#[async_trait]
impl SlotClaimer for ScriptedClaimer {
    async fn claim(&mut self, slot: &Slot) -> Result<ClaimOutcome, AcquireError> {
        self.claimed.lock().unwrap().push(slot.schedule_id.clone());
        self.script.pop_front().unwrap_or(Ok(ClaimOutcome::Lost))
    }
}

// ── Helpers ──

fn slot(schedule_id: &str) -> Slot {
    Slot {
        unit_id: "21".into(),
        dep_id: "369".into(),
        doctor_id: "1001".into(),
        schedule_id: schedule_id.into(),
        day_part: DayPart::Am,
        time_type: "1".into(),
        level_code: "3".into(),
        available: true,
    }
}

fn policy(max_retries: u32) -> PollingPolicy {
    PollingPolicy {
        target: Target {
            unit_id: "21".into(),
            dep_id: "369".into(),
            doc_id: "1001".into(),
        },
        channel: Channel::Primary,
        weeks: vec![WeekdayCode::new(1).unwrap()],
        day_parts: vec![DayPart::Am],
        base_delay: Duration::from_millis(3000),
        max_retries,
        max_cycles: None,
        start_date: None,
        scheduled_start: None,
    }
}

fn won(confirmation: &str) -> Result<ClaimOutcome, AcquireError> {
    Ok(ClaimOutcome::Won {
        confirmation: confirmation.into(),
    })
}

fn empty() -> PollStep {
    Ok(Vec::new())
}

fn one_slot() -> PollStep {
    Ok(vec![slot("s-1")])
}

fn rate_limited() -> PollStep {
    Err(AcquireError::protocol("/dep", "<html>访问过于频繁</html>"))
}

fn rng() -> StdRng {
    StdRng::seed_from_u64(7)
}

// ── Outcomes ──

#[tokio::test(start_paused = true)]
async fn test_first_slot_won_exits_zero() {
    let source = ScriptedSource::new(vec![], one_slot);
    let claimer = ScriptedClaimer::new(vec![won("/order/1.html")]);
    let mut engine = AcquisitionLoop::new(FakeAuth::default(), source, claimer, policy(1), rng());

    let report = engine.run().await.unwrap();
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        report.outcome,
        RunOutcome::Succeeded {
            slot: slot("s-1"),
            confirmation: "/order/1.html".into()
        }
    );
    assert_eq!(report.stats.cycles, 1);
    assert_eq!(engine.state(), LoopState::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failures_exhaust_budget() {
    let source = ScriptedSource::new(vec![], rate_limited);
    let polls = Arc::clone(&source.polls);
    let claimer = ScriptedClaimer::new(vec![]);
    let mut engine = AcquisitionLoop::new(FakeAuth::default(), source, claimer, policy(1), rng());

    let report = engine.run().await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Exhausted { retries: 1 });
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.stats.retries_used, 1);
    assert_eq!(polls.lock().unwrap().len(), 1);
    assert_eq!(engine.state(), LoopState::Exhausted);
}

#[tokio::test(start_paused = true)]
async fn test_budget_counts_every_failed_cycle() {
    let source = ScriptedSource::new(vec![], rate_limited);
    let polls = Arc::clone(&source.polls);
    let mut engine = AcquisitionLoop::new(
        FakeAuth::default(),
        source,
        ScriptedClaimer::new(vec![]),
        policy(3),
        rng(),
    );

    let report = engine.run().await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Exhausted { retries: 3 });

    let polls = polls.lock().unwrap();
    assert_eq!(polls.len(), 3);
    for pair in polls.windows(2) {
        assert!(pair[1] - pair[0] >= RETRY_PAUSE);
    }
}

#[tokio::test(start_paused = true)]
async fn test_empty_polls_do_not_spend_budget() {
    let mut script: Vec<PollStep> = (0..25).map(|_| empty()).collect();
    script.push(one_slot());
    let source = ScriptedSource::new(script, empty);
    let polls = Arc::clone(&source.polls);
    let claimer = ScriptedClaimer::new(vec![won("/order/9.html")]);
    let mut engine = AcquisitionLoop::new(FakeAuth::default(), source, claimer, policy(1), rng());

    let report = engine.run().await.unwrap();
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.stats.cycles, 26);
    assert_eq!(report.stats.empty_polls, 25);
    assert_eq!(report.stats.retries_used, 0);

    // Jittered delay stays inside [base - 500ms, base + 1000ms], give or take a timer tick.
    let polls = polls.lock().unwrap();
    for pair in polls.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= Duration::from_millis(2500), "{gap:?}");
        assert!(gap <= Duration::from_millis(4005), "{gap:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_lost_claims_do_not_spend_budget() {
    let source = ScriptedSource::new(vec![], one_slot);
    let claimer = ScriptedClaimer::new(vec![
        Ok(ClaimOutcome::Lost),
        Ok(ClaimOutcome::Lost),
        won("/order/3.html"),
    ]);
    let claimed = Arc::clone(&claimer.claimed);
    let mut engine = AcquisitionLoop::new(FakeAuth::default(), source, claimer, policy(1), rng());

    let report = engine.run().await.unwrap();
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.stats.claims_lost, 2);
    assert_eq!(report.stats.retries_used, 0);
    assert_eq!(claimed.lock().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_selection_picks_one_of_the_candidates() {
    let source = ScriptedSource::new(vec![Ok(vec![slot("a"), slot("b"), slot("c")])], empty);
    let claimer = ScriptedClaimer::new(vec![won("/order/x.html")]);
    let claimed = Arc::clone(&claimer.claimed);
    let mut engine = AcquisitionLoop::new(FakeAuth::default(), source, claimer, policy(1), rng());

    engine.run().await.unwrap();
    let claimed = claimed.lock().unwrap();
    assert_eq!(claimed.len(), 1);
    assert!(["a", "b", "c"].contains(&claimed[0].as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_max_cycles_bounds_a_fruitless_run() {
    let source = ScriptedSource::new(vec![], empty);
    let mut p = policy(3);
    p.max_cycles = Some(4);
    let mut engine =
        AcquisitionLoop::new(FakeAuth::default(), source, ScriptedClaimer::new(vec![]), p, rng());

    let report = engine.run().await.unwrap();
    assert_eq!(report.outcome, RunOutcome::CyclesExhausted { cycles: 4 });
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.stats.empty_polls, 4);
}

// ── Sessions ──

#[tokio::test(start_paused = true)]
async fn test_session_expiry_logs_in_again() {
    let source = ScriptedSource::new(
        vec![Err(AcquireError::SessionExpired {
            endpoint: "/doctors/ajaxgetclass.html".into(),
        })],
        one_slot,
    );
    let auth = FakeAuth::default();
    let logins = Arc::clone(&auth.calls);
    let claimer = ScriptedClaimer::new(vec![won("/order/5.html")]);
    let mut engine = AcquisitionLoop::new(auth, source, claimer, policy(3), rng());

    let report = engine.run().await.unwrap();
    assert_eq!(report.exit_code(), 0);
    assert_eq!(logins.load(Ordering::SeqCst), 2);
    assert_eq!(report.stats.reauthentications, 1);
    assert_eq!(report.stats.retries_used, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_relogin_failure_spends_budget() {
    let source = ScriptedSource::new(
        vec![Err(AcquireError::SessionExpired {
            endpoint: "/doctors/ajaxgetclass.html".into(),
        })],
        one_slot,
    );
    let polls = Arc::clone(&source.polls);
    let auth = FakeAuth {
        script: vec![
            Ok(()),
            Err(AcquireError::protocol("/login.html", "<html>502 bad gateway</html>")),
        ]
        .into(),
        ..Default::default()
    };
    let logins = Arc::clone(&auth.calls);
    let claimer = ScriptedClaimer::new(vec![won("/order/6.html")]);
    let mut engine = AcquisitionLoop::new(auth, source, claimer, policy(5), rng());

    let report = engine.run().await.unwrap();
    assert_eq!(report.exit_code(), 0);
    assert_eq!(logins.load(Ordering::SeqCst), 3);
    assert_eq!(report.stats.retries_used, 2);
    assert_eq!(report.stats.reauthentications, 1);

    // The failed re-login pauses before the next attempt.
    let polls = polls.lock().unwrap();
    assert_eq!(polls.len(), 2);
    assert!(polls[1] - polls[0] >= RETRY_PAUSE);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_relogin_is_terminal() {
    let source = ScriptedSource::new(
        vec![Err(AcquireError::SessionExpired {
            endpoint: "/doctors/ajaxgetclass.html".into(),
        })],
        one_slot,
    );
    let auth = FakeAuth {
        script: vec![Ok(()), Err(AcquireError::Auth("password changed".into()))].into(),
        ..Default::default()
    };
    let mut engine =
        AcquisitionLoop::new(auth, source, ScriptedClaimer::new(vec![]), policy(5), rng());

    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, AcquireError::Auth(_)));
    assert_eq!(engine.stats().retries_used, 1);
}

#[tokio::test(start_paused = true)]
async fn test_initial_login_failure_is_terminal() {
    let source = ScriptedSource::new(vec![], one_slot);
    let polls = Arc::clone(&source.polls);
    let auth = FakeAuth {
        fail: true,
        ..Default::default()
    };
    let mut engine =
        AcquisitionLoop::new(auth, source, ScriptedClaimer::new(vec![]), policy(3), rng());

    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, AcquireError::Auth(_)));
    assert!(polls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_terminal_error_mid_run_aborts() {
    let source = ScriptedSource::new(vec![], one_slot);
    let claimer = ScriptedClaimer::new(vec![Err(AcquireError::Crypto("bad key".into()))]);
    let mut engine = AcquisitionLoop::new(FakeAuth::default(), source, claimer, policy(3), rng());

    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, AcquireError::Crypto(_)));
    assert_eq!(engine.stats().retries_used, 0);
}

// ── Scheduled start ──

#[tokio::test(start_paused = true)]
async fn test_waits_for_scheduled_start() {
    let source = ScriptedSource::new(vec![], one_slot);
    let polls = Arc::clone(&source.polls);
    let claimer = ScriptedClaimer::new(vec![won("/order/7.html")]);
    let mut p = policy(1);
    p.scheduled_start = Some(Local::now().naive_local() + ChronoDuration::hours(1));

    let started = Instant::now();
    let mut engine = AcquisitionLoop::new(FakeAuth::default(), source, claimer, p, rng());
    engine.run().await.unwrap();

    let first_poll = polls.lock().unwrap()[0];
    assert!(first_poll - started >= Duration::from_secs(3590));
}

#[tokio::test(start_paused = true)]
async fn test_past_scheduled_start_polls_immediately() {
    let source = ScriptedSource::new(vec![], one_slot);
    let polls = Arc::clone(&source.polls);
    let claimer = ScriptedClaimer::new(vec![won("/order/8.html")]);
    let mut p = policy(1);
    p.scheduled_start = Some(Local::now().naive_local() - ChronoDuration::minutes(5));

    let started = Instant::now();
    let mut engine = AcquisitionLoop::new(FakeAuth::default(), source, claimer, p, rng());
    engine.run().await.unwrap();

    let first_poll = polls.lock().unwrap()[0];
    assert!(first_poll - started < Duration::from_secs(1));
}
