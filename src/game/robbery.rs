//! Robbery engine.
//!
//! A robbery runs in two phases. [`RobberyEngine::attempt`] checks eligibility,
//! consumes the robber's daily/interval budget, rolls the escape and the dice and,
//! when somebody loses, parks a [`RobberyOffer`] in memory. The loser answers with
//! [`RobberyEngine::resolve`], which re-validates the offer and applies Pay or Fight
//! in its own transaction. Nothing is held locked while waiting for the answer.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sled::Transactional;
use uuid::Uuid;

use crate::config::RobConfig;
use crate::game::chance::Resolver;
use crate::game::cooldown::{tx_admit, Admission};
use crate::game::errors::GameError;
use crate::game::ledger::{tx_load_account, tx_load_or_create_cultivation, tx_set_points};
use crate::game::storage::{tx_put, GameStore, TxResult};
use crate::game::types::{Activity, CultivationRecord, LedgerReason, UserId};

/// Pending pay-or-fight decision of a duel loser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobberyOffer {
    pub id: Uuid,
    pub robber: UserId,
    pub winner: UserId,
    pub loser: UserId,
    pub winner_total: i64,
    pub loser_total: i64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RobOutcome {
    SelfTarget,
    /// Target is more than one major stage above the robber.
    TooStrong { robber_major: u32, target_major: u32 },
    /// Target is more than one major stage below the robber.
    TooWeak { robber_major: u32, target_major: u32 },
    LimitReached { count: u32 },
    Cooldown { remaining_secs: i64 },
    Escaped,
    Tie { robber_total: i64, target_total: i64 },
    Duel { offer: RobberyOffer },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoserChoice {
    Pay,
    Fight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ResolveOutcome {
    OfferExpired,
    NotYourChoice { loser: UserId },
    Paid {
        amount: i64,
        loser_points: i64,
        winner_points: i64,
    },
    NothingToSteal { loser_points: i64 },
    Annihilated {
        winner_roll: i64,
        loser_roll: i64,
        points_lost: i64,
    },
    Survived { winner_roll: i64, loser_roll: i64 },
}

/// Holds pending offers between the duel and the loser's answer.
#[derive(Default)]
pub struct RobberyEngine {
    offers: Mutex<HashMap<Uuid, RobberyOffer>>,
}

impl RobberyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn offers(&self) -> MutexGuard<'_, HashMap<Uuid, RobberyOffer>> {
        match self.offers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn pending(&self) -> usize {
        self.offers().len()
    }

    /// Drop offers past their deadline. Returns how many were dropped.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut offers = self.offers();
        let before = offers.len();
        offers.retain(|_, offer| offer.expires_at > now);
        before - offers.len()
    }

    /// Phase one: eligibility, admission, escape and dice.
    pub fn attempt(
        &self,
        store: &GameStore,
        config: &RobConfig,
        resolver: &dyn Resolver,
        robber: UserId,
        target: UserId,
        now: DateTime<Utc>,
    ) -> Result<RobOutcome, GameError> {
        if robber == target {
            return Ok(RobOutcome::SelfTarget);
        }
        store.retry_transient(|| store.ensure_account(robber))?;
        store.retry_transient(|| store.ensure_account(target))?;

        let robber_cult = cultivation_of(store, robber)?;
        let target_cult = cultivation_of(store, target)?;
        let (robber_major, target_major) = (robber_cult.major_stage(), target_cult.major_stage());
        let gap = target_major as i64 - robber_major as i64;
        if gap > 1 {
            return Ok(RobOutcome::TooStrong {
                robber_major,
                target_major,
            });
        }
        if gap < -1 {
            return Ok(RobOutcome::TooWeak {
                robber_major,
                target_major,
            });
        }

        let admission = store.retry_transient(|| {
            let admission = store.cooldowns.transaction(|cooldowns| {
                tx_admit(
                    cooldowns,
                    robber,
                    Activity::Robbery,
                    config.daily_limit,
                    config.cooldown,
                    now,
                )
            })?;
            Ok(admission)
        })?;
        match admission {
            Admission::LimitReached { count } => {
                debug!("user {} hit the robbery limit ({})", robber, count);
                return Ok(RobOutcome::LimitReached { count });
            }
            Admission::Cooldown { remaining_secs } => {
                return Ok(RobOutcome::Cooldown { remaining_secs });
            }
            Admission::Admitted { .. } => {
                store.flush_committed();
            }
        }

        if resolver.hit(config.escape_chance) {
            info!("user {} escaped a robbery by {}", target, robber);
            return Ok(RobOutcome::Escaped);
        }

        let mut robber_total = resolver.roll_die(config.dice_range.min, config.dice_range.max);
        let mut target_total = resolver.roll_die(config.dice_range.min, config.dice_range.max);
        if robber_cult.stage > target_cult.stage {
            robber_total += config.stage_bonus;
        } else if target_cult.stage > robber_cult.stage {
            target_total += config.stage_bonus;
        }
        if robber_total == target_total {
            return Ok(RobOutcome::Tie {
                robber_total,
                target_total,
            });
        }

        let (winner, loser, winner_total, loser_total) = if robber_total > target_total {
            (robber, target, robber_total, target_total)
        } else {
            (target, robber, target_total, robber_total)
        };
        let offer = RobberyOffer {
            id: Uuid::new_v4(),
            robber,
            winner,
            loser,
            winner_total,
            loser_total,
            expires_at: now + Duration::seconds(config.offer_timeout_secs),
        };
        self.offers().insert(offer.id, offer.clone());
        info!(
            "robbery duel {}: winner {} ({}) loser {} ({})",
            offer.id, winner, winner_total, loser, loser_total
        );
        Ok(RobOutcome::Duel { offer })
    }

    /// Phase two: the loser pays or fights. Each offer resolves at most once.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve(
        &self,
        store: &GameStore,
        config: &RobConfig,
        resolver: &dyn Resolver,
        offer_id: Uuid,
        responder: UserId,
        choice: LoserChoice,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome, GameError> {
        let offer = {
            let mut offers = self.offers();
            let Some(offer) = offers.get(&offer_id).cloned() else {
                return Ok(ResolveOutcome::OfferExpired);
            };
            if offer.expires_at <= now {
                offers.remove(&offer_id);
                return Ok(ResolveOutcome::OfferExpired);
            }
            if offer.loser != responder {
                return Ok(ResolveOutcome::NotYourChoice { loser: offer.loser });
            }
            offers.remove(&offer_id);
            offer
        };

        match choice {
            LoserChoice::Pay => {
                let ratio = resolver.uniform(config.penalty_ratio.min, config.penalty_ratio.max);
                store.rob_transfer(offer.loser, offer.winner, ratio)
            }
            LoserChoice::Fight => {
                let winner_roll = resolver.roll_die(config.dice_range.min, config.dice_range.max);
                let loser_roll = resolver.roll_die(config.dice_range.min, config.dice_range.max);
                if winner_roll > loser_roll {
                    let points_lost = store.annihilate(offer.loser, config.annihilation_penalty)?;
                    Ok(ResolveOutcome::Annihilated {
                        winner_roll,
                        loser_roll,
                        points_lost,
                    })
                } else {
                    info!("user {} survived the fight", offer.loser);
                    Ok(ResolveOutcome::Survived {
                        winner_roll,
                        loser_roll,
                    })
                }
            }
        }
    }
}

fn cultivation_of(store: &GameStore, user_id: UserId) -> Result<CultivationRecord, GameError> {
    Ok(store
        .get_cultivation(user_id)?
        .unwrap_or_else(|| CultivationRecord::new(user_id, store.base_cost())))
}

impl GameStore {
    /// Move `floor(loser_balance * ratio)` from loser to winner in one transaction.
    pub fn rob_transfer(
        &self,
        loser: UserId,
        winner: UserId,
        ratio: f64,
    ) -> Result<ResolveOutcome, GameError> {
        let now = Utc::now();
        let outcome = (&self.users, &self.ledger).transaction(|(users, ledger)| -> TxResult<ResolveOutcome> {
            let loser_account = tx_load_account(users, loser)?;
            let winner_account = tx_load_account(users, winner)?;
            let amount = (loser_account.points as f64 * ratio).floor() as i64;
            if loser_account.points == 0 || amount <= 0 {
                return Ok(ResolveOutcome::NothingToSteal {
                    loser_points: loser_account.points,
                });
            }
            let amount = amount.min(loser_account.points);
            let loser_points = loser_account.points - amount;
            let winner_points = winner_account.points + amount;
            tx_set_points(
                users,
                ledger,
                loser_account,
                loser_points,
                LedgerReason::RobberyTransfer,
                now,
            )?;
            tx_set_points(
                users,
                ledger,
                winner_account,
                winner_points,
                LedgerReason::RobberyTransfer,
                now,
            )?;
            Ok(ResolveOutcome::Paid {
                amount,
                loser_points,
                winner_points,
            })
        })?;
        if let ResolveOutcome::Paid { amount, .. } = &outcome {
            self.flush_committed();
            info!("robbery: {} paid {} to {}", loser, amount, winner);
        }
        Ok(outcome)
    }

    /// Reset the loser's cultivation and strip their points. Returns the points lost.
    pub fn annihilate(&self, user_id: UserId, penalty: Option<i64>) -> Result<i64, GameError> {
        let now = Utc::now();
        let base_cost = self.base_cost();
        let lost = (&self.users, &self.cultivation, &self.ledger).transaction(
            |(users, cultivation, ledger)| -> TxResult<i64> {
                let account = tx_load_account(users, user_id)?;
                let old = account.points;
                let new = match penalty {
                    Some(penalty) => (old - penalty.max(0)).max(0),
                    None => 0,
                };
                tx_set_points(users, ledger, account, new, LedgerReason::RobberyAnnihilation, now)?;
                let mut record = tx_load_or_create_cultivation(cultivation, user_id, base_cost)?;
                record.stage = 0;
                record.next_cost = base_cost;
                tx_put(cultivation, &GameStore::cultivation_key(user_id), &record)?;
                Ok(old - new)
            },
        )?;
        self.flush_committed();
        info!("user {} was annihilated (-{})", user_id, lost);
        Ok(lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::chance::ScriptedResolver;
    use crate::game::storage::GameStoreBuilder;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store() -> (TempDir, GameStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = GameStoreBuilder::new(dir.path()).open().expect("store");
        (dir, store)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn set_stage(store: &GameStore, user: UserId, stage: u32) {
        store.ensure_account(user).unwrap();
        let mut record = CultivationRecord::new(user, 10);
        record.stage = stage;
        record.pills = 2;
        store
            .cultivation
            .insert(GameStore::cultivation_key(user), GameStore::encode(&record).unwrap())
            .unwrap();
    }

    #[test]
    fn self_robbery_is_rejected_first() {
        let (_dir, store) = store();
        let engine = RobberyEngine::new();
        let outcome = engine
            .attempt(&store, &RobConfig::default(), &ScriptedResolver::new(), 1, 1, now())
            .unwrap();
        assert_eq!(outcome, RobOutcome::SelfTarget);
        assert!(store.get_account(1).unwrap().is_none());
    }

    #[test]
    fn ineligible_pairs_consume_nothing() {
        let (_dir, store) = store();
        set_stage(&store, 1, 8);
        set_stage(&store, 2, 1);
        let engine = RobberyEngine::new();
        let outcome = engine
            .attempt(&store, &RobConfig::default(), &ScriptedResolver::new(), 1, 2, now())
            .unwrap();
        assert_eq!(
            outcome,
            RobOutcome::TooWeak {
                robber_major: 2,
                target_major: 0
            }
        );
        assert_eq!(
            store
                .daily_usage(1, Activity::Robbery, now().date_naive())
                .unwrap(),
            0
        );
    }

    #[test]
    fn escape_ends_the_attempt() {
        let (_dir, store) = store();
        let engine = RobberyEngine::new();
        let resolver = ScriptedResolver::new().with_hits(&[true]);
        let outcome = engine
            .attempt(&store, &RobConfig::default(), &resolver, 1, 2, now())
            .unwrap();
        assert_eq!(outcome, RobOutcome::Escaped);
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn stage_bonus_goes_to_the_higher_stage_only() {
        let (_dir, store) = store();
        set_stage(&store, 1, 4);
        set_stage(&store, 2, 3);
        let engine = RobberyEngine::new();
        // robber rolls 2 (+3 bonus), target rolls 5: tie
        let resolver = ScriptedResolver::new().with_hits(&[false]).with_rolls(&[2, 5]);
        let outcome = engine
            .attempt(&store, &RobConfig::default(), &resolver, 1, 2, now())
            .unwrap();
        assert_eq!(
            outcome,
            RobOutcome::Tie {
                robber_total: 5,
                target_total: 5
            }
        );
    }

    #[test]
    fn pay_transfers_floor_of_ratio() {
        let (_dir, store) = store();
        store.ensure_account(1).unwrap();
        store.ensure_account(2).unwrap();
        store.adjust_balance(2, 105, LedgerReason::Admin).unwrap();
        let engine = RobberyEngine::new();
        let resolver = ScriptedResolver::new()
            .with_hits(&[false])
            .with_rolls(&[6, 1])
            .with_uniforms(&[0.2]);
        let config = RobConfig::default();
        let RobOutcome::Duel { offer } = engine.attempt(&store, &config, &resolver, 1, 2, now()).unwrap()
        else {
            panic!("expected a duel");
        };
        assert_eq!((offer.winner, offer.loser), (1, 2));

        let wrong = engine
            .resolve(&store, &config, &resolver, offer.id, 1, LoserChoice::Pay, now())
            .unwrap();
        assert_eq!(wrong, ResolveOutcome::NotYourChoice { loser: 2 });

        let paid = engine
            .resolve(&store, &config, &resolver, offer.id, 2, LoserChoice::Pay, now())
            .unwrap();
        assert_eq!(
            paid,
            ResolveOutcome::Paid {
                amount: 21,
                loser_points: 84,
                winner_points: 21
            }
        );
        // single use
        let again = engine
            .resolve(&store, &config, &resolver, offer.id, 2, LoserChoice::Pay, now())
            .unwrap();
        assert_eq!(again, ResolveOutcome::OfferExpired);
    }

    #[test]
    fn broke_loser_has_nothing_to_steal() {
        let (_dir, store) = store();
        store.ensure_account(1).unwrap();
        store.ensure_account(2).unwrap();
        assert_eq!(
            store.rob_transfer(2, 1, 0.3).unwrap(),
            ResolveOutcome::NothingToSteal { loser_points: 0 }
        );
        store.adjust_balance(2, 3, LedgerReason::Admin).unwrap();
        assert_eq!(
            store.rob_transfer(2, 1, 0.3).unwrap(),
            ResolveOutcome::NothingToSteal { loser_points: 3 }
        );
    }

    #[test]
    fn lost_fight_resets_cultivation() {
        let (_dir, store) = store();
        set_stage(&store, 1, 5);
        set_stage(&store, 2, 4);
        store.adjust_balance(2, 500, LedgerReason::Admin).unwrap();
        let engine = RobberyEngine::new();
        let config = RobConfig::default();
        let resolver = ScriptedResolver::new()
            .with_hits(&[false])
            .with_rolls(&[3, 3, 6, 2]);
        let RobOutcome::Duel { offer } = engine.attempt(&store, &config, &resolver, 1, 2, now()).unwrap()
        else {
            panic!("expected a duel");
        };
        assert_eq!(offer.winner, 1);
        let outcome = engine
            .resolve(&store, &config, &resolver, offer.id, 2, LoserChoice::Fight, now())
            .unwrap();
        assert_eq!(
            outcome,
            ResolveOutcome::Annihilated {
                winner_roll: 6,
                loser_roll: 2,
                points_lost: 500
            }
        );
        let record = store.get_cultivation(2).unwrap().unwrap();
        assert_eq!((record.stage, record.next_cost, record.pills), (0, 10, 2));
        assert_eq!(store.get_balance(2).unwrap(), 0);
    }

    #[test]
    fn expired_offers_are_swept() {
        let (_dir, store) = store();
        let engine = RobberyEngine::new();
        let config = RobConfig::default();
        let resolver = ScriptedResolver::new().with_hits(&[false]).with_rolls(&[1, 6]);
        let RobOutcome::Duel { offer } = engine.attempt(&store, &config, &resolver, 1, 2, now()).unwrap()
        else {
            panic!("expected a duel");
        };
        let late = now() + Duration::seconds(61);
        let outcome = engine
            .resolve(&store, &config, &resolver, offer.id, offer.loser, LoserChoice::Pay, late)
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::OfferExpired);

        let resolver = ScriptedResolver::new().with_hits(&[false]).with_rolls(&[1, 6]);
        let later = now() + Duration::seconds(120);
        engine.attempt(&store, &config, &resolver, 1, 2, later).unwrap();
        assert_eq!(engine.pending(), 1);
        assert_eq!(engine.sweep_expired(later + Duration::seconds(60)), 1);
        assert_eq!(engine.pending(), 0);
    }
}
