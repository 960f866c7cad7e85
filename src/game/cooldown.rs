//! Cooldown tracker: daily limits and interval gates per user and activity.
//!
//! Both gates live on the same [`ActivityCooldown`] row. The daily counter
//! rolls over at UTC midnight; the interval gate only looks at `last_used`.
//! They are independent: an open interval gate never refills the daily
//! budget, and a new day never clears an active interval.

use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use sled::transaction::TransactionalTree;

use crate::game::errors::GameError;
use crate::game::storage::{tx_get, tx_put, GameStore, TxResult};
use crate::game::types::{Activity, ActivityCooldown, UserId};

/// Outcome of a daily admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyAdmission {
    pub admitted: bool,
    /// Uses consumed today after this call.
    pub count_after: u32,
}

/// Outcome of the combined daily + interval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum Admission {
    Admitted { count_after: u32 },
    LimitReached { count: u32 },
    Cooldown { remaining_secs: i64 },
}

fn tx_load_cooldown(
    cooldowns: &TransactionalTree,
    user_id: UserId,
    activity: Activity,
    today: NaiveDate,
) -> TxResult<ActivityCooldown> {
    let mut record = tx_get::<ActivityCooldown>(cooldowns, &GameStore::cooldown_key(user_id, activity))?
        .unwrap_or_else(|| ActivityCooldown::new(user_id, activity, today));
    record.roll_over(today);
    Ok(record)
}

/// Daily gate inside an enclosing transaction.
pub(crate) fn tx_consume_daily(
    cooldowns: &TransactionalTree,
    user_id: UserId,
    activity: Activity,
    limit: u32,
    today: NaiveDate,
) -> TxResult<DailyAdmission> {
    let mut record = tx_load_cooldown(cooldowns, user_id, activity, today)?;
    if record.count >= limit {
        return Ok(DailyAdmission {
            admitted: false,
            count_after: record.count,
        });
    }
    record.count += 1;
    tx_put(cooldowns, &GameStore::cooldown_key(user_id, activity), &record)?;
    Ok(DailyAdmission {
        admitted: true,
        count_after: record.count,
    })
}

/// Daily limit first, then the interval. Both are consumed together or not at all.
pub(crate) fn tx_admit(
    cooldowns: &TransactionalTree,
    user_id: UserId,
    activity: Activity,
    limit: u32,
    interval_secs: i64,
    now: DateTime<Utc>,
) -> TxResult<Admission> {
    let mut record = tx_load_cooldown(cooldowns, user_id, activity, now.date_naive())?;
    if record.count >= limit {
        return Ok(Admission::LimitReached {
            count: record.count,
        });
    }
    if let Some(remaining_secs) = record.cooldown_remaining(now, interval_secs) {
        return Ok(Admission::Cooldown { remaining_secs });
    }
    record.count += 1;
    record.last_used = Some(now);
    tx_put(cooldowns, &GameStore::cooldown_key(user_id, activity), &record)?;
    Ok(Admission::Admitted {
        count_after: record.count,
    })
}

impl GameStore {
    /// Consume one daily use if `count < limit`. Refusals leave the counter untouched.
    pub fn try_consume_daily(
        &self,
        user_id: UserId,
        activity: Activity,
        limit: u32,
        today: NaiveDate,
    ) -> Result<DailyAdmission, GameError> {
        let admission = self.cooldowns.transaction(|cooldowns| {
            tx_consume_daily(cooldowns, user_id, activity, limit, today)
        })?;
        if admission.admitted {
            self.flush_committed();
        } else {
            debug!(
                "{} daily limit reached for user {} ({}/{})",
                activity.slug(),
                user_id,
                admission.count_after,
                limit
            );
        }
        Ok(admission)
    }

    /// Stamp `now` as the last use if at least `interval_secs` elapsed since the previous one.
    pub fn try_consume_interval(
        &self,
        user_id: UserId,
        activity: Activity,
        interval_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, GameError> {
        let admitted = self.cooldowns.transaction(|cooldowns| -> TxResult<bool> {
            let mut record = tx_load_cooldown(cooldowns, user_id, activity, now.date_naive())?;
            if record.cooldown_remaining(now, interval_secs).is_some() {
                return Ok(false);
            }
            record.last_used = Some(now);
            tx_put(cooldowns, &GameStore::cooldown_key(user_id, activity), &record)?;
            Ok(true)
        })?;
        if admitted {
            self.flush_committed();
        }
        Ok(admitted)
    }

    /// Combined gate used by activities with both a daily limit and an interval.
    pub fn try_admit(
        &self,
        user_id: UserId,
        activity: Activity,
        limit: u32,
        interval_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Admission, GameError> {
        let admission = self.cooldowns.transaction(|cooldowns| {
            tx_admit(cooldowns, user_id, activity, limit, interval_secs, now)
        })?;
        if matches!(admission, Admission::Admitted { .. }) {
            self.flush_committed();
        }
        Ok(admission)
    }

    /// Uses consumed on `today`, for display. Read-only.
    pub fn daily_usage(
        &self,
        user_id: UserId,
        activity: Activity,
        today: NaiveDate,
    ) -> Result<u32, GameError> {
        let record: Option<ActivityCooldown> =
            Self::read(&self.cooldowns, &Self::cooldown_key(user_id, activity))?;
        Ok(record.map(|r| r.count_on(today)).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::storage::GameStoreBuilder;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn store() -> (TempDir, GameStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = GameStoreBuilder::new(dir.path()).open().expect("store");
        (dir, store)
    }

    fn noon(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn daily_limit_admits_exactly_limit_uses() {
        let (_dir, store) = store();
        let today = noon(1).date_naive();
        for expected in 1..=3 {
            let admission = store.try_consume_daily(1, Activity::Lottery, 3, today).unwrap();
            assert!(admission.admitted);
            assert_eq!(admission.count_after, expected);
        }
        let refused = store.try_consume_daily(1, Activity::Lottery, 3, today).unwrap();
        assert_eq!(
            refused,
            DailyAdmission {
                admitted: false,
                count_after: 3
            }
        );
        assert_eq!(store.daily_usage(1, Activity::Lottery, today).unwrap(), 3);
    }

    #[test]
    fn daily_counter_resets_next_day() {
        let (_dir, store) = store();
        let day1 = noon(1).date_naive();
        let day2 = noon(2).date_naive();
        store.try_consume_daily(1, Activity::Lottery, 1, day1).unwrap();
        assert!(!store.try_consume_daily(1, Activity::Lottery, 1, day1).unwrap().admitted);
        assert_eq!(store.daily_usage(1, Activity::Lottery, day2).unwrap(), 0);
        assert!(store.try_consume_daily(1, Activity::Lottery, 1, day2).unwrap().admitted);
    }

    #[test]
    fn activities_are_tracked_separately() {
        let (_dir, store) = store();
        let today = noon(1).date_naive();
        store.try_consume_daily(1, Activity::Lottery, 1, today).unwrap();
        assert!(store.try_consume_daily(1, Activity::Robbery, 1, today).unwrap().admitted);
        assert!(store.try_consume_daily(2, Activity::Lottery, 1, today).unwrap().admitted);
    }

    #[test]
    fn interval_gate_blocks_until_elapsed() {
        let (_dir, store) = store();
        let start = noon(1);
        assert!(store.try_consume_interval(1, Activity::Robbery, 60, start).unwrap());
        assert!(!store
            .try_consume_interval(1, Activity::Robbery, 60, start + Duration::seconds(59))
            .unwrap());
        assert!(store
            .try_consume_interval(1, Activity::Robbery, 60, start + Duration::seconds(60))
            .unwrap());
    }

    #[test]
    fn combined_gate_prefers_limit_over_cooldown() {
        let (_dir, store) = store();
        let start = noon(1);
        assert_eq!(
            store.try_admit(1, Activity::Robbery, 1, 60, start).unwrap(),
            Admission::Admitted { count_after: 1 }
        );
        // both gates closed: the daily limit is reported
        assert_eq!(
            store
                .try_admit(1, Activity::Robbery, 1, 60, start + Duration::seconds(5))
                .unwrap(),
            Admission::LimitReached { count: 1 }
        );
    }

    #[test]
    fn combined_gate_reports_cooldown_without_consuming() {
        let (_dir, store) = store();
        let start = noon(1);
        store.try_admit(1, Activity::Robbery, 5, 60, start).unwrap();
        assert_eq!(
            store
                .try_admit(1, Activity::Robbery, 5, 60, start + Duration::seconds(20))
                .unwrap(),
            Admission::Cooldown { remaining_secs: 40 }
        );
        assert_eq!(
            store
                .daily_usage(1, Activity::Robbery, start.date_naive())
                .unwrap(),
            1
        );
    }

    #[test]
    fn new_day_does_not_clear_active_interval() {
        let (_dir, store) = store();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 23, 59, 50).unwrap();
        store.try_admit(1, Activity::Robbery, 1, 60, late).unwrap();
        let after_midnight = late + Duration::seconds(20);
        assert_eq!(
            store
                .try_admit(1, Activity::Robbery, 1, 60, after_midnight)
                .unwrap(),
            Admission::Cooldown { remaining_secs: 40 }
        );
    }
}
