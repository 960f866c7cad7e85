//! Lottery ("scratch card") engine.

use chrono::{NaiveDate, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sled::Transactional;

use crate::config::LotteryConfig;
use crate::game::chance::{pick_one, sample, Resolver};
use crate::game::cooldown::tx_consume_daily;
use crate::game::errors::GameError;
use crate::game::ledger::{tx_load_account, tx_set_points};
use crate::game::storage::{GameStore, TxResult};
use crate::game::types::{Activity, LedgerReason, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LotteryOutcome {
    /// The stake is not in the prize table.
    UnknownStake { cost: i64 },
    DailyLimitExceeded { count: u32 },
    /// The attempt was still consumed.
    InsufficientFunds {
        cost: i64,
        balance: i64,
        remaining: u32,
    },
    Played(LotteryDraw),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryDraw {
    /// The player's numbers, ascending.
    pub numbers: Vec<i64>,
    pub winning_number: i64,
    pub won: bool,
    pub prize: i64,
    pub old_balance: i64,
    pub new_balance: i64,
    pub remaining: u32,
}

/// Player numbers and winning number, drawn before any state is touched.
fn draw_numbers(
    config: &LotteryConfig,
    resolver: &dyn Resolver,
    won: bool,
) -> Result<(Vec<i64>, i64), GameError> {
    let pool: Vec<i64> = (config.number_range.min..=config.number_range.max).collect();
    let mut numbers = sample(resolver, &pool, config.select_count);
    numbers.sort_unstable();
    let winning = if won {
        pick_one(resolver, &numbers).copied()
    } else {
        let complement: Vec<i64> = pool
            .iter()
            .copied()
            .filter(|n| numbers.binary_search(n).is_err())
            .collect();
        pick_one(resolver, &complement).copied()
    };
    let winning = winning.ok_or_else(|| {
        GameError::Config(format!(
            "lottery range {}..={} cannot fit {} numbers",
            config.number_range.min, config.number_range.max, config.select_count
        ))
    })?;
    Ok((numbers, winning))
}

impl GameStore {
    /// Admission, stake and payout in one transaction.
    pub fn play_lottery(
        &self,
        user_id: UserId,
        cost: i64,
        config: &LotteryConfig,
        resolver: &dyn Resolver,
        today: NaiveDate,
    ) -> Result<LotteryOutcome, GameError> {
        let Some(prize) = config.prize_for(cost) else {
            return Ok(LotteryOutcome::UnknownStake { cost });
        };
        self.retry_transient(|| self.ensure_account(user_id))?;

        let won = resolver.hit(config.chance);
        let (numbers, winning_number) = draw_numbers(config, resolver, won)?;
        let limit = config.daily_limit;
        let now = Utc::now();

        let outcome = (&self.cooldowns, &self.users, &self.ledger).transaction(
            |(cooldowns, users, ledger)| -> TxResult<LotteryOutcome> {
                let admission = tx_consume_daily(cooldowns, user_id, Activity::Lottery, limit, today)?;
                if !admission.admitted {
                    return Ok(LotteryOutcome::DailyLimitExceeded {
                        count: admission.count_after,
                    });
                }
                let remaining = limit.saturating_sub(admission.count_after);
                let account = tx_load_account(users, user_id)?;
                let old_balance = account.points;
                if old_balance < cost {
                    return Ok(LotteryOutcome::InsufficientFunds {
                        cost,
                        balance: old_balance,
                        remaining,
                    });
                }
                let mut account =
                    tx_set_points(users, ledger, account, old_balance - cost, LedgerReason::Lottery, now)?;
                if won {
                    let credited = account.points + prize;
                    account =
                        tx_set_points(users, ledger, account, credited, LedgerReason::LotteryPrize, now)?;
                }
                Ok(LotteryOutcome::Played(LotteryDraw {
                    numbers: numbers.clone(),
                    winning_number,
                    won,
                    prize: if won { prize } else { 0 },
                    old_balance,
                    new_balance: account.points,
                    remaining,
                }))
            },
        )?;

        match &outcome {
            LotteryOutcome::DailyLimitExceeded { .. } => {
                debug!("user {} is out of lottery attempts", user_id)
            }
            LotteryOutcome::Played(draw) => {
                self.flush_committed();
                info!(
                    "user {} played the lottery for {}: won={} balance {} -> {}",
                    user_id, cost, draw.won, draw.old_balance, draw.new_balance
                );
            }
            _ => {
                self.flush_committed();
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::chance::{RngResolver, ScriptedResolver};
    use crate::game::storage::GameStoreBuilder;
    use tempfile::TempDir;

    fn store() -> (TempDir, GameStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = GameStoreBuilder::new(dir.path()).open().expect("store");
        (dir, store)
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn winning_number_membership_follows_the_draw() {
        let config = LotteryConfig::default();
        let resolver = RngResolver::seeded(11);
        for won in [true, false] {
            for _ in 0..50 {
                let (numbers, winning) = draw_numbers(&config, &resolver, won).unwrap();
                assert_eq!(numbers.len(), config.select_count);
                assert!(numbers.windows(2).all(|w| w[0] < w[1]));
                assert!(config.number_range.contains(winning));
                assert_eq!(numbers.contains(&winning), won);
            }
        }
    }

    #[test]
    fn win_pays_the_prize_table() {
        let (_dir, store) = store();
        store.ensure_account(1).unwrap();
        store.adjust_balance(1, 10, LedgerReason::Admin).unwrap();
        let resolver = ScriptedResolver::new().with_hits(&[true]);
        let outcome = store
            .play_lottery(1, 3, &LotteryConfig::default(), &resolver, today())
            .unwrap();
        let LotteryOutcome::Played(draw) = outcome else {
            panic!("expected a draw, got {:?}", outcome);
        };
        assert!(draw.won);
        assert_eq!(draw.prize, 30);
        assert_eq!((draw.old_balance, draw.new_balance), (10, 37));
        assert_eq!(draw.remaining, 4);
        assert!(draw.numbers.contains(&draw.winning_number));
    }

    #[test]
    fn insufficient_funds_still_consumes_the_attempt() {
        let (_dir, store) = store();
        let config = LotteryConfig::default();
        let resolver = ScriptedResolver::new();
        let outcome = store.play_lottery(1, 50, &config, &resolver, today()).unwrap();
        assert_eq!(
            outcome,
            LotteryOutcome::InsufficientFunds {
                cost: 50,
                balance: 0,
                remaining: 4
            }
        );
        assert_eq!(store.daily_usage(1, Activity::Lottery, today()).unwrap(), 1);
    }

    #[test]
    fn daily_limit_stops_play() {
        let (_dir, store) = store();
        let mut config = LotteryConfig::default();
        config.daily_limit = 2;
        store.ensure_account(1).unwrap();
        store.adjust_balance(1, 100, LedgerReason::Admin).unwrap();
        let resolver = ScriptedResolver::new().with_hits(&[false, false, false]);
        for _ in 0..2 {
            assert!(matches!(
                store.play_lottery(1, 3, &config, &resolver, today()).unwrap(),
                LotteryOutcome::Played(_)
            ));
        }
        assert_eq!(
            store.play_lottery(1, 3, &config, &resolver, today()).unwrap(),
            LotteryOutcome::DailyLimitExceeded { count: 2 }
        );
        assert_eq!(store.get_balance(1).unwrap(), 94);
    }

    #[test]
    fn unknown_stake_touches_nothing() {
        let (_dir, store) = store();
        let outcome = store
            .play_lottery(1, 7, &LotteryConfig::default(), &ScriptedResolver::new(), today())
            .unwrap();
        assert_eq!(outcome, LotteryOutcome::UnknownStake { cost: 7 });
        assert!(store.get_account(1).unwrap().is_none());
    }
}
