//! In-process counters for game activity.
//!
//! Counters are keyed by activity slug (`lottery`, `robbery`, `breakthrough`, ...)
//! and are cheap enough to bump on every request. The serve loop logs a snapshot
//! when stdin closes; nothing is exported over the network.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

static REQUESTS: AtomicU64 = AtomicU64::new(0);
static INFRA_FAILURES: AtomicU64 = AtomicU64::new(0);

static ACTIVITY_COUNTERS: OnceLock<Mutex<HashMap<String, ActivityCounter>>> = OnceLock::new();

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ActivityCounter {
    pub attempts: u64,
    /// Passed every gate and changed state.
    pub admitted: u64,
    /// Business-rule rejections (limits, cooldowns, funds, eligibility).
    pub rejected: u64,
    /// Admitted and came out in the player's favour.
    pub successes: u64,
}

/// Final classification of one game action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    Rejected,
    /// Admitted, but the draw went against the player.
    Admitted,
    Success,
}

fn counters() -> MutexGuard<'static, HashMap<String, ActivityCounter>> {
    let lock = ACTIVITY_COUNTERS.get_or_init(|| Mutex::new(HashMap::new()));
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub fn inc_requests() {
    REQUESTS.fetch_add(1, Ordering::Relaxed);
}

pub fn inc_infra_failures() {
    INFRA_FAILURES.fetch_add(1, Ordering::Relaxed);
}

/// Count one attempt of `slug` and how it ended.
pub fn record(slug: &str, tally: Tally) -> ActivityCounter {
    let mut guard = counters();
    let counter = guard.entry(slug.to_string()).or_default();
    counter.attempts = counter.attempts.saturating_add(1);
    match tally {
        Tally::Rejected => counter.rejected = counter.rejected.saturating_add(1),
        Tally::Admitted => counter.admitted = counter.admitted.saturating_add(1),
        Tally::Success => {
            counter.admitted = counter.admitted.saturating_add(1);
            counter.successes = counter.successes.saturating_add(1);
        }
    }
    *counter
}

pub fn activity_snapshot() -> HashMap<String, ActivityCounter> {
    counters().clone()
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub requests: u64,
    pub infra_failures: u64,
    pub activities: HashMap<String, ActivityCounter>,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        requests: REQUESTS.load(Ordering::Relaxed),
        infra_failures: INFRA_FAILURES.load(Ordering::Relaxed),
        activities: activity_snapshot(),
    }
}
