//! Ledger store: atomic balance primitives shared by every game subsystem.
//!
//! All mutations run as sled transactions over the `users` tree (plus the
//! trees they also touch) and append an audit [`LedgerEntry`](crate::game::types::LedgerEntry)
//! in the same unit of work. Balances are clamped at zero on relative
//! adjustment; a negative balance read back from storage is an invariant
//! violation, never silently repaired.

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sled::transaction::TransactionalTree;
use sled::Transactional;

use crate::game::errors::GameError;
use crate::game::storage::{tx_abort, tx_get, tx_log, tx_put, GameStore, TxResult};
use crate::game::types::{CultivationRecord, LedgerReason, UserAccount, UserId};

/// Result of [`GameStore::deduct_if_sufficient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Deduction {
    Deducted { old: i64, new: i64 },
    Insufficient { balance: i64 },
}

impl Deduction {
    pub fn is_deducted(&self) -> bool {
        matches!(self, Deduction::Deducted { .. })
    }
}

/// Load an account inside a transaction, failing if it is absent or corrupt.
pub(crate) fn tx_load_account(users: &TransactionalTree, user_id: UserId) -> TxResult<UserAccount> {
    let Some(account) = tx_get::<UserAccount>(users, &GameStore::user_key(user_id))? else {
        return tx_abort(GameError::AccountState(format!(
            "no account for user {}",
            user_id
        )));
    };
    if account.points < 0 {
        return tx_abort(GameError::Invariant(format!(
            "user {} has negative balance {}",
            user_id, account.points
        )));
    }
    Ok(account)
}

/// Load an account inside a transaction, creating it with defaults when absent.
pub(crate) fn tx_load_or_create_account(
    users: &TransactionalTree,
    user_id: UserId,
    now: DateTime<Utc>,
) -> TxResult<UserAccount> {
    match tx_get::<UserAccount>(users, &GameStore::user_key(user_id))? {
        Some(account) if account.points < 0 => tx_abort(GameError::Invariant(format!(
            "user {} has negative balance {}",
            user_id, account.points
        ))),
        Some(account) => Ok(account),
        None => Ok(UserAccount::new(user_id, now)),
    }
}

/// Write `account` with its balance moved to `new_points`, logging the change.
pub(crate) fn tx_set_points(
    users: &TransactionalTree,
    ledger: &TransactionalTree,
    mut account: UserAccount,
    new_points: i64,
    reason: LedgerReason,
    now: DateTime<Utc>,
) -> TxResult<UserAccount> {
    let delta = new_points - account.points;
    account.points = new_points;
    tx_put(users, &GameStore::user_key(account.user_id), &account)?;
    if delta != 0 {
        tx_log(ledger, account.user_id, delta, new_points, reason, now)?;
    }
    Ok(account)
}

/// Relative adjustment clamped at zero. Returns `(old, new)`.
pub(crate) fn tx_adjust(
    users: &TransactionalTree,
    ledger: &TransactionalTree,
    user_id: UserId,
    delta: i64,
    reason: LedgerReason,
    now: DateTime<Utc>,
) -> TxResult<(i64, i64)> {
    let account = tx_load_account(users, user_id)?;
    let old = account.points;
    let new = old.saturating_add(delta).max(0);
    tx_set_points(users, ledger, account, new, reason, now)?;
    Ok((old, new))
}

/// Load the cultivation row, creating a default one when absent.
pub(crate) fn tx_load_or_create_cultivation(
    cultivation: &TransactionalTree,
    user_id: UserId,
    base_cost: i64,
) -> TxResult<CultivationRecord> {
    Ok(
        tx_get::<CultivationRecord>(cultivation, &GameStore::cultivation_key(user_id))?
            .unwrap_or_else(|| CultivationRecord::new(user_id, base_cost)),
    )
}

impl GameStore {
    /// Idempotently create the account and cultivation rows for `user_id`.
    /// Returns true when anything was created.
    pub fn ensure_account(&self, user_id: UserId) -> Result<bool, GameError> {
        let now = Utc::now();
        let base_cost = self.base_cost();
        let created = self.retry_transient(|| {
            let created = (&self.users, &self.cultivation).transaction(|(users, cultivation)| -> TxResult<bool> {
                let mut created = false;
                let user_key = GameStore::user_key(user_id);
                if tx_get::<UserAccount>(users, &user_key)?.is_none() {
                    tx_put(users, &user_key, &UserAccount::new(user_id, now))?;
                    created = true;
                }
                let cult_key = GameStore::cultivation_key(user_id);
                if tx_get::<CultivationRecord>(cultivation, &cult_key)?.is_none() {
                    tx_put(cultivation, &cult_key, &CultivationRecord::new(user_id, base_cost))?;
                    created = true;
                }
                Ok(created)
            })?;
            Ok(created)
        })?;
        if created {
            self.flush_committed();
            debug!("created account for user {}", user_id);
        }
        Ok(created)
    }

    /// Current balance; 0 for unknown users. Never creates a record.
    pub fn get_balance(&self, user_id: UserId) -> Result<i64, GameError> {
        let account = self.retry_transient(|| self.get_account(user_id))?;
        match account {
            Some(account) if account.points < 0 => Err(GameError::Invariant(format!(
                "user {} has negative balance {}",
                user_id, account.points
            ))),
            Some(account) => Ok(account.points),
            None => Ok(0),
        }
    }

    /// Atomically apply `delta`, clamping the result at zero. Returns `(old, new)`.
    pub fn adjust_balance(
        &self,
        user_id: UserId,
        delta: i64,
        reason: LedgerReason,
    ) -> Result<(i64, i64), GameError> {
        let now = Utc::now();
        let (old, new) = (&self.users, &self.ledger)
            .transaction(|(users, ledger)| tx_adjust(users, ledger, user_id, delta, reason, now))?;
        self.flush_committed();
        debug!(
            "balance user={} {} -> {} ({:?})",
            user_id, old, new, reason
        );
        Ok((old, new))
    }

    /// Deduct `amount` only if the balance covers it. Two concurrent callers can never
    /// both succeed against a balance that only covers one of them.
    pub fn deduct_if_sufficient(
        &self,
        user_id: UserId,
        amount: i64,
        reason: LedgerReason,
    ) -> Result<Deduction, GameError> {
        if amount < 0 {
            return Err(GameError::Internal(format!(
                "cannot deduct negative amount {}",
                amount
            )));
        }
        let now = Utc::now();
        let outcome = (&self.users, &self.ledger).transaction(|(users, ledger)| -> TxResult<Deduction> {
            let account = tx_load_account(users, user_id)?;
            let old = account.points;
            if old < amount {
                return Ok(Deduction::Insufficient { balance: old });
            }
            let updated = tx_set_points(users, ledger, account, old - amount, reason, now)?;
            Ok(Deduction::Deducted {
                old,
                new: updated.points,
            })
        })?;
        if outcome.is_deducted() {
            self.flush_committed();
        }
        Ok(outcome)
    }

    /// Grant `reward` and stamp `today` unless the user already checked in today.
    /// Creates the account on first use. Returns whether the check-in was recorded.
    pub fn checkin(&self, user_id: UserId, reward: i64, today: NaiveDate) -> Result<bool, GameError> {
        let now = Utc::now();
        let base_cost = self.base_cost();
        let recorded = (&self.users, &self.cultivation, &self.ledger).transaction(
            |(users, cultivation, ledger)| -> TxResult<bool> {
                let mut account = tx_load_or_create_account(users, user_id, now)?;
                if account.last_checkin == Some(today) {
                    return Ok(false);
                }
                let cult_key = GameStore::cultivation_key(user_id);
                if tx_get::<CultivationRecord>(cultivation, &cult_key)?.is_none() {
                    tx_put(cultivation, &cult_key, &CultivationRecord::new(user_id, base_cost))?;
                }
                account.last_checkin = Some(today);
                let new_points = account.points.saturating_add(reward.max(0));
                tx_set_points(users, ledger, account, new_points, LedgerReason::Checkin, now)?;
                Ok(true)
            },
        )?;
        if recorded {
            self.flush_committed();
            info!("user {} checked in for {} (+{})", user_id, today, reward);
        }
        Ok(recorded)
    }

    /// Add breakthrough pills. Returns the new pill count.
    pub fn add_pills(&self, user_id: UserId, count: u32) -> Result<u32, GameError> {
        let base_cost = self.base_cost();
        let pills = self.cultivation.transaction(|cultivation| -> TxResult<u32> {
            let mut record = tx_load_or_create_cultivation(cultivation, user_id, base_cost)?;
            record.pills = record.pills.saturating_add(count);
            tx_put(cultivation, &GameStore::cultivation_key(user_id), &record)?;
            Ok(record.pills)
        })?;
        self.flush_committed();
        Ok(pills)
    }
}
