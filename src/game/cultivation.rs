//! Cultivation state machine: breakthroughs, cost scaling and pill consumption.

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sled::Transactional;

use crate::config::CultivationConfig;
use crate::game::chance::Resolver;
use crate::game::errors::GameError;
use crate::game::ledger::tx_set_points;
use crate::game::storage::{tx_abort, tx_get, tx_put, GameStore, TxResult};
use crate::game::types::{CultivationRecord, LedgerReason, UserAccount, UserId};

/// Cost factors as (numerator, denominator); results truncate toward zero.
const MAJOR_COST_MULTIPLIER: (i64, i64) = (2, 1);
const MINOR_COST_MULTIPLIER: (i64, i64) = (3, 2);
const FAILURE_PENALTY_RATIO: (i64, i64) = (3, 10);
/// Attempts before giving up when concurrent breakthroughs keep moving the stage.
const MAX_STALE_RETRIES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BreakthroughOutcome {
    AccountMissing,
    LevelTooHigh {
        stage: u32,
    },
    InsufficientPills {
        required: u32,
        pills: u32,
    },
    InsufficientPoints {
        cost: i64,
        points: i64,
    },
    Succeeded {
        from_stage: u32,
        stage: u32,
        cost: i64,
        pill_cost: u32,
        next_cost: i64,
        points: i64,
        pills: u32,
    },
    Failed {
        stage: u32,
        penalty: i64,
        points: i64,
    },
}

/// What `/my` shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub points: i64,
    pub stage: u32,
    pub stage_name: String,
    pub pills: u32,
    pub next_cost: i64,
}

enum Attempt {
    Done(BreakthroughOutcome),
    /// The stage moved after the draw was taken; draw again.
    Stale,
}

fn scaled(cost: i64, (num, den): (i64, i64)) -> i64 {
    cost.saturating_mul(num) / den
}

fn check_stage(record: &CultivationRecord, config: &CultivationConfig) -> Result<(), GameError> {
    if record.stage > config.max_stage() {
        return Err(GameError::Invariant(format!(
            "user {} is at stage {} beyond the ladder (max {})",
            record.user_id,
            record.stage,
            config.max_stage()
        )));
    }
    Ok(())
}

/// Rejection reason for `record`/`points`, or `None` if the attempt may proceed.
fn precheck(
    record: &CultivationRecord,
    points: i64,
    config: &CultivationConfig,
) -> Option<BreakthroughOutcome> {
    if record.stage >= config.max_stage() {
        return Some(BreakthroughOutcome::LevelTooHigh {
            stage: record.stage,
        });
    }
    let pill_cost = if config.is_major(record.stage) {
        config.major_pill_cost
    } else {
        0
    };
    if record.pills < pill_cost {
        return Some(BreakthroughOutcome::InsufficientPills {
            required: pill_cost,
            pills: record.pills,
        });
    }
    if points < record.next_cost {
        return Some(BreakthroughOutcome::InsufficientPoints {
            cost: record.next_cost,
            points,
        });
    }
    None
}

impl GameStore {
    /// Attempt to advance one stage.
    ///
    /// The success draw is taken from a snapshot of the stage before the transaction;
    /// the transaction re-reads the record and only applies the draw if the stage is
    /// unchanged, so balance, stage and pills move together or not at all.
    pub fn attempt_breakthrough(
        &self,
        user_id: UserId,
        config: &CultivationConfig,
        resolver: &dyn Resolver,
    ) -> Result<BreakthroughOutcome, GameError> {
        for _ in 0..MAX_STALE_RETRIES {
            let snapshot = self.get_cultivation(user_id)?;
            let points = self.get_balance(user_id)?;
            let draw = match &snapshot {
                Some(record) => {
                    check_stage(record, config)?;
                    if precheck(record, points, config).is_none() {
                        Some((record.stage, resolver.hit(config.chance_for_stage(record.stage))))
                    } else {
                        None
                    }
                }
                None => None,
            };

            let attempt = self.apply_breakthrough(user_id, config, draw)?;
            match attempt {
                Attempt::Done(outcome) => {
                    match &outcome {
                        BreakthroughOutcome::Succeeded { stage, .. } => {
                            self.flush_committed();
                            info!("user {} broke through to stage {}", user_id, stage);
                        }
                        BreakthroughOutcome::Failed { penalty, .. } => {
                            self.flush_committed();
                            info!("user {} failed a breakthrough (-{})", user_id, penalty);
                        }
                        rejected => debug!("breakthrough rejected for {}: {:?}", user_id, rejected),
                    }
                    return Ok(outcome);
                }
                Attempt::Stale => debug!("breakthrough snapshot stale for {}, redrawing", user_id),
            }
        }
        Err(GameError::Internal(format!(
            "breakthrough for user {} kept conflicting",
            user_id
        )))
    }

    fn apply_breakthrough(
        &self,
        user_id: UserId,
        config: &CultivationConfig,
        draw: Option<(u32, bool)>,
    ) -> Result<Attempt, GameError> {
        let attempt = (&self.users, &self.cultivation, &self.ledger).transaction(
            |(users, cultivation, ledger)| -> TxResult<Attempt> {
                let cult_key = GameStore::cultivation_key(user_id);
                let Some(mut record) = tx_get::<CultivationRecord>(cultivation, &cult_key)? else {
                    return Ok(Attempt::Done(BreakthroughOutcome::AccountMissing));
                };
                let Some(account) = tx_get::<UserAccount>(users, &GameStore::user_key(user_id))?
                else {
                    return Ok(Attempt::Done(BreakthroughOutcome::AccountMissing));
                };
                if account.points < 0 {
                    return tx_abort(GameError::Invariant(format!(
                        "user {} has negative balance {}",
                        user_id, account.points
                    )));
                }
                if let Err(err) = check_stage(&record, config) {
                    return tx_abort(err);
                }
                if let Some(rejection) = precheck(&record, account.points, config) {
                    return Ok(Attempt::Done(rejection));
                }
                let success = match draw {
                    Some((stage, success)) if stage == record.stage => success,
                    _ => return Ok(Attempt::Stale),
                };

                let is_major = config.is_major(record.stage);
                let cost = record.next_cost;
                if success {
                    let pill_cost = if is_major { config.major_pill_cost } else { 0 };
                    let from_stage = record.stage;
                    let new_points = account.points - cost;
                    let account = tx_set_points(
                        users,
                        ledger,
                        account,
                        new_points,
                        LedgerReason::Breakthrough,
                        Utc::now(),
                    )?;
                    record.stage += 1;
                    record.pills -= pill_cost;
                    let factor = if is_major {
                        MAJOR_COST_MULTIPLIER
                    } else {
                        MINOR_COST_MULTIPLIER
                    };
                    record.next_cost = scaled(cost, factor);
                    tx_put(cultivation, &cult_key, &record)?;
                    Ok(Attempt::Done(BreakthroughOutcome::Succeeded {
                        from_stage,
                        stage: record.stage,
                        cost,
                        pill_cost,
                        next_cost: record.next_cost,
                        points: account.points,
                        pills: record.pills,
                    }))
                } else {
                    let penalty = scaled(cost, FAILURE_PENALTY_RATIO);
                    let new_points = (account.points - penalty).max(0);
                    let account = tx_set_points(
                        users,
                        ledger,
                        account,
                        new_points,
                        LedgerReason::BreakthroughPenalty,
                        Utc::now(),
                    )?;
                    Ok(Attempt::Done(BreakthroughOutcome::Failed {
                        stage: record.stage,
                        penalty,
                        points: account.points,
                    }))
                }
            },
        )?;
        Ok(attempt)
    }

    /// Balance, stage and pills for display; `None` for users never seen.
    pub fn profile(
        &self,
        user_id: UserId,
        config: &CultivationConfig,
    ) -> Result<Option<Profile>, GameError> {
        let Some(account) = self.get_account(user_id)? else {
            return Ok(None);
        };
        let record = self
            .get_cultivation(user_id)?
            .unwrap_or_else(|| CultivationRecord::new(user_id, self.base_cost()));
        check_stage(&record, config)?;
        let stage_name = config.stage_name(record.stage).unwrap_or_default().to_string();
        Ok(Some(Profile {
            user_id,
            points: account.points,
            stage: record.stage,
            stage_name,
            pills: record.pills,
            next_cost: record.next_cost,
        }))
    }
}
