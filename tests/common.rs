//! Shared fixtures for integration tests.

use shubot::config::CultivationConfig;
use shubot::game::{
    BreakthroughOutcome, GameStore, GameStoreBuilder, LedgerReason, ScriptedResolver, UserId,
};
use tempfile::TempDir;

/// Fresh store in a temp dir. Keep the `TempDir` alive for the test's duration.
pub fn fresh_store() -> (TempDir, GameStore) {
    let dir = TempDir::new().expect("tempdir");
    let store = GameStoreBuilder::new(dir.path()).open().expect("store");
    (dir, store)
}

/// Create `user` with `points` on the books.
#[allow(dead_code)]
pub fn funded(store: &GameStore, user: UserId, points: i64) {
    store.ensure_account(user).expect("account");
    if points != 0 {
        store
            .adjust_balance(user, points, LedgerReason::Admin)
            .expect("fund");
    }
}

/// Drive `user` up to `stage` with forced successes. Costs are paid from a
/// temporary grant and the balance is restored afterwards. Starting from stage 0,
/// the pills granted for the major gates are all spent on the way.
#[allow(dead_code)]
pub fn climb(store: &GameStore, user: UserId, stage: u32, config: &CultivationConfig) {
    store.ensure_account(user).expect("account");
    let before = store.get_balance(user).expect("balance");
    store
        .adjust_balance(user, 1_000_000, LedgerReason::Admin)
        .expect("grant");
    let gates = (0..stage).filter(|s| config.is_major(*s)).count() as u32;
    store
        .add_pills(user, gates * config.major_pill_cost)
        .expect("pills");
    let resolver = ScriptedResolver::new();
    loop {
        let current = store
            .get_cultivation(user)
            .expect("read")
            .map(|c| c.stage)
            .unwrap_or(0);
        if current >= stage {
            break;
        }
        resolver.push_hits(&[true]);
        let outcome = store
            .attempt_breakthrough(user, config, &resolver)
            .expect("breakthrough");
        assert!(
            matches!(outcome, BreakthroughOutcome::Succeeded { .. }),
            "climb stalled: {:?}",
            outcome
        );
    }
    let current = store.get_balance(user).expect("balance");
    store
        .adjust_balance(user, before - current, LedgerReason::Admin)
        .expect("restore");
}
