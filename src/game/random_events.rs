//! Fortune and misfortune triggered by chatting.
//!
//! The catalogue is fixed; configuration only sets each event's chance and order.
//! Events are tried in order and the first one whose chance hits and whose
//! condition holds is applied; at most one fires per message.

use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use sled::Transactional;

use crate::config::{CultivationConfig, RandomEventConfig};
use crate::game::chance::Resolver;
use crate::game::errors::GameError;
use crate::game::ledger::{tx_load_account, tx_load_or_create_cultivation, tx_set_points};
use crate::game::storage::{tx_put, GameStore, TxResult};
use crate::game::types::{CultivationRecord, LedgerReason, UserId};

const LOST_POINTS_MIN_BALANCE: i64 = 50;
const LOST_POINTS_RANGE: (i64, i64) = (10, 200);
const STAGE_DOWN_MIN_STAGE: u32 = 3;
const STAGE_DOWN_MAX_DROP: u32 = 3;
const STAGE_DOWN_COST_FLOOR: i64 = 10;
const DISCOVERY_POINTS: (i64, i64) = (50, 200);
const DISCOVERY_PILLS: (i64, i64) = (1, 2);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RandomEventKind {
    /// Lose some points; needs more than 50.
    LostPoints,
    /// Free minor stage; never crosses into a major gate.
    StageUp,
    /// Fall up to three stages, never below stage 3.
    StageDown,
    /// Points and pills from a ruin.
    Discovery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RandomEventOutcome {
    LostPoints { lost: i64, balance: i64 },
    StageUp { stage: u32 },
    StageDown { lost_stages: u32, stage: u32, next_cost: i64 },
    Discovery { points: i64, pills: u32, balance: i64 },
}

/// Parameters drawn before the transaction.
#[derive(Debug, Clone, Copy)]
enum Plan {
    LostPoints(i64),
    StageUp,
    StageDown(u32),
    Discovery(i64, u32),
}

fn eligible(kind: RandomEventKind, points: i64, record: &CultivationRecord, max_stage: u32) -> bool {
    match kind {
        RandomEventKind::LostPoints => points > LOST_POINTS_MIN_BALANCE,
        RandomEventKind::StageUp => record.stage % 3 != 2 && record.stage < max_stage,
        RandomEventKind::StageDown => record.stage > STAGE_DOWN_MIN_STAGE,
        RandomEventKind::Discovery => true,
    }
}

fn plan(
    kind: RandomEventKind,
    points: i64,
    record: &CultivationRecord,
    resolver: &dyn Resolver,
) -> Plan {
    match kind {
        RandomEventKind::LostPoints => {
            let cap = LOST_POINTS_RANGE.1.min(points / 2);
            Plan::LostPoints(resolver.roll_die(LOST_POINTS_RANGE.0, cap))
        }
        RandomEventKind::StageUp => Plan::StageUp,
        RandomEventKind::StageDown => {
            let cap = STAGE_DOWN_MAX_DROP.min(record.stage - STAGE_DOWN_MIN_STAGE);
            Plan::StageDown(resolver.roll_die(1, cap as i64) as u32)
        }
        RandomEventKind::Discovery => Plan::Discovery(
            resolver.roll_die(DISCOVERY_POINTS.0, DISCOVERY_POINTS.1),
            resolver.roll_die(DISCOVERY_PILLS.0, DISCOVERY_PILLS.1) as u32,
        ),
    }
}

impl GameStore {
    /// Roll the event catalogue for one chat message.
    pub fn roll_random_event(
        &self,
        user_id: UserId,
        events: &[RandomEventConfig],
        config: &CultivationConfig,
        resolver: &dyn Resolver,
    ) -> Result<Option<RandomEventOutcome>, GameError> {
        let Some(account) = self.get_account(user_id)? else {
            return Ok(None);
        };
        let record = self
            .get_cultivation(user_id)?
            .unwrap_or_else(|| CultivationRecord::new(user_id, self.base_cost()));
        let max_stage = config.max_stage();

        for event in events {
            if !resolver.hit(event.chance) {
                continue;
            }
            if !eligible(event.kind, account.points, &record, max_stage) {
                continue;
            }
            let planned = plan(event.kind, account.points, &record, resolver);
            let outcome = self.apply_event(user_id, event.kind, planned, max_stage)?;
            if let Some(outcome) = &outcome {
                self.flush_committed();
                info!("random event for user {}: {:?}", user_id, outcome);
            }
            return Ok(outcome);
        }
        Ok(None)
    }

    /// Apply a planned event, re-checking its condition against the locked rows.
    fn apply_event(
        &self,
        user_id: UserId,
        kind: RandomEventKind,
        planned: Plan,
        max_stage: u32,
    ) -> Result<Option<RandomEventOutcome>, GameError> {
        let base_cost = self.base_cost();
        let now = Utc::now();
        let outcome = (&self.users, &self.cultivation, &self.ledger).transaction(
            |(users, cultivation, ledger)| -> TxResult<Option<RandomEventOutcome>> {
                let account = tx_load_account(users, user_id)?;
                let mut record = tx_load_or_create_cultivation(cultivation, user_id, base_cost)?;
                if !eligible(kind, account.points, &record, max_stage) {
                    return Ok(None);
                }
                let cult_key = GameStore::cultivation_key(user_id);
                let outcome = match planned {
                    Plan::LostPoints(lost) => {
                        let lost = lost.min(account.points / 2);
                        let balance = account.points - lost;
                        tx_set_points(users, ledger, account, balance, LedgerReason::RandomEvent, now)?;
                        RandomEventOutcome::LostPoints { lost, balance }
                    }
                    Plan::StageUp => {
                        record.stage += 1;
                        tx_put(cultivation, &cult_key, &record)?;
                        RandomEventOutcome::StageUp {
                            stage: record.stage,
                        }
                    }
                    Plan::StageDown(drop) => {
                        let drop = drop.clamp(1, record.stage - STAGE_DOWN_MIN_STAGE);
                        record.stage -= drop;
                        record.next_cost = STAGE_DOWN_COST_FLOOR.max(record.next_cost / 2);
                        tx_put(cultivation, &cult_key, &record)?;
                        RandomEventOutcome::StageDown {
                            lost_stages: drop,
                            stage: record.stage,
                            next_cost: record.next_cost,
                        }
                    }
                    Plan::Discovery(points, pills) => {
                        let balance = account.points + points;
                        tx_set_points(users, ledger, account, balance, LedgerReason::RandomEvent, now)?;
                        record.pills += pills;
                        tx_put(cultivation, &cult_key, &record)?;
                        RandomEventOutcome::Discovery {
                            points,
                            pills,
                            balance,
                        }
                    }
                };
                Ok(Some(outcome))
            },
        )?;
        Ok(outcome)
    }
}
