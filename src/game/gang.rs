//! Group rankings, the daily gang leader and the leader's slave mini-game.
//!
//! Leadership is never stored as a flag: the leader is the top of the group's
//! leaderboard at the moment of asking. What is stored is the leader's streak
//! ([`GangRecord`]) and the daily [`SlaveRecord`] contracts.

use chrono::{NaiveDate, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sled::transaction::TransactionalTree;
use sled::Transactional;

use crate::config::SlaveRulesConfig;
use crate::game::errors::GameError;
use crate::game::ledger::{tx_load_account, tx_set_points};
use crate::game::storage::{tx_abort, tx_get, tx_put, GameStore, TxResult};
use crate::game::types::{
    GangRecord, GroupId, LedgerReason, SlaveRecord, UserId, GANG_SCHEMA_VERSION,
    SLAVE_SCHEMA_VERSION,
};

pub const MAX_LEADERBOARD: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub rank: usize,
    pub user_id: UserId,
    pub stage: u32,
    pub points: i64,
}

/// Result of crediting one leadership day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipDay {
    pub consecutive_days: u32,
    pub donation: i64,
    /// False when the day had already been recorded.
    pub newly_recorded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipReport {
    pub group_id: GroupId,
    pub leader: RankEntry,
    pub day: LeadershipDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignOutcome {
    Assigned,
    AlreadyAssignedToday,
    NotLeader,
    InvalidTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmOutcome {
    Confirmed { master_id: UserId },
    AlreadyConfirmed,
    WrongPhrase,
    NoContract,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Compliance {
    /// No contract today.
    Free,
    MustRecite { phrase: String },
    MissingDailyPhrase { phrase: String },
    Compliant,
}

fn tx_slave_of(
    slaves: &TransactionalTree,
    group_id: GroupId,
    slave_id: UserId,
    date: NaiveDate,
) -> TxResult<Option<SlaveRecord>> {
    let Some(raw) = slaves.get(GameStore::slave_index_key(group_id, slave_id, date))? else {
        return Ok(None);
    };
    let bytes: [u8; 8] = match raw.as_ref().try_into() {
        Ok(bytes) => bytes,
        Err(_) => {
            return tx_abort(GameError::Invariant(format!(
                "corrupt slave index for user {} in group {}",
                slave_id, group_id
            )))
        }
    };
    let master_id = i64::from_be_bytes(bytes);
    tx_get::<SlaveRecord>(slaves, &GameStore::slave_key(master_id, date))
}

impl GameStore {
    /// Group ranking by stage, then points, then user id. `top` is clamped to `1..=20`.
    pub fn leaderboard(&self, group_id: GroupId, top: usize) -> Result<Vec<RankEntry>, GameError> {
        let top = top.clamp(1, MAX_LEADERBOARD);
        let mut rows = Vec::new();
        for user_id in self.group_members(group_id)? {
            let Some(account) = self.get_account(user_id)? else {
                continue;
            };
            let stage = self.get_cultivation(user_id)?.map(|c| c.stage).unwrap_or(0);
            rows.push((stage, account.points, user_id));
        }
        rows.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));
        Ok(rows
            .into_iter()
            .take(top)
            .enumerate()
            .map(|(i, (stage, points, user_id))| RankEntry {
                rank: i + 1,
                user_id,
                stage,
                points,
            })
            .collect())
    }

    /// The current top-ranked member of the group.
    pub fn recompute_leader(&self, group_id: GroupId) -> Result<Option<RankEntry>, GameError> {
        Ok(self.leaderboard(group_id, 1)?.into_iter().next())
    }

    /// Credit `date` to the leader's streak and pay `consecutive_days * base_donation`.
    /// Recording the same day twice changes nothing.
    pub fn record_leadership_day(
        &self,
        group_id: GroupId,
        user_id: UserId,
        date: NaiveDate,
        base_donation: i64,
    ) -> Result<LeadershipDay, GameError> {
        let now = Utc::now();
        let day = (&self.gang, &self.users, &self.ledger).transaction(|(gang, users, ledger)| -> TxResult<LeadershipDay> {
            let key = GameStore::gang_key(group_id, user_id);
            let previous = tx_get::<GangRecord>(gang, &key)?;
            if let Some(record) = &previous {
                if record.last_date == date {
                    return Ok(LeadershipDay {
                        consecutive_days: record.consecutive_days,
                        donation: 0,
                        newly_recorded: false,
                    });
                }
            }
            let consecutive_days = match &previous {
                Some(record) if date.pred_opt() == Some(record.last_date) => {
                    record.consecutive_days + 1
                }
                _ => 1,
            };
            let donation = base_donation.saturating_mul(consecutive_days as i64);
            let account = tx_load_account(users, user_id)?;
            let credited = account.points.saturating_add(donation);
            tx_set_points(users, ledger, account, credited, LedgerReason::GangDonation, now)?;
            let record = GangRecord {
                schema_version: GANG_SCHEMA_VERSION,
                group_id,
                user_id,
                last_date: date,
                consecutive_days,
                total_donated: previous.map(|r| r.total_donated).unwrap_or(0) + donation,
            };
            tx_put(gang, &key, &record)?;
            Ok(LeadershipDay {
                consecutive_days,
                donation,
                newly_recorded: true,
            })
        })?;
        if day.newly_recorded {
            self.flush_committed();
            info!(
                "group {} leader {} day {} (+{})",
                group_id, user_id, day.consecutive_days, day.donation
            );
        }
        Ok(day)
    }

    pub fn gang_record(&self, group_id: GroupId, user_id: UserId) -> Result<Option<GangRecord>, GameError> {
        Self::read(&self.gang, &Self::gang_key(group_id, user_id))
    }

    /// Daily leader pass over every group with members.
    pub fn gang_tick(
        &self,
        date: NaiveDate,
        base_donation: i64,
    ) -> Result<Vec<LeadershipReport>, GameError> {
        let mut reports = Vec::new();
        for group_id in self.group_ids()? {
            let Some(leader) = self.recompute_leader(group_id)? else {
                continue;
            };
            let day = self.record_leadership_day(group_id, leader.user_id, date, base_donation)?;
            reports.push(LeadershipReport {
                group_id,
                leader,
                day,
            });
        }
        info!("gang tick for {} covered {} groups", date, reports.len());
        Ok(reports)
    }

    /// The group leader names a slave for the day.
    pub fn assign_slave(
        &self,
        master_id: UserId,
        slave_id: UserId,
        group_id: GroupId,
        date: NaiveDate,
    ) -> Result<AssignOutcome, GameError> {
        if self.slaves.contains_key(Self::slave_key(master_id, date))? {
            return Ok(AssignOutcome::AlreadyAssignedToday);
        }
        let leader = self.recompute_leader(group_id)?;
        if leader.map(|l| l.user_id) != Some(master_id) {
            debug!("user {} is not the leader of group {}", master_id, group_id);
            return Ok(AssignOutcome::NotLeader);
        }
        if slave_id == master_id {
            return Ok(AssignOutcome::InvalidTarget);
        }
        let outcome = self.slaves.transaction(|slaves| -> TxResult<AssignOutcome> {
            let key = GameStore::slave_key(master_id, date);
            if slaves.get(&key)?.is_some() {
                return Ok(AssignOutcome::AlreadyAssignedToday);
            }
            let record = SlaveRecord {
                schema_version: SLAVE_SCHEMA_VERSION,
                master_id,
                slave_id,
                group_id,
                created_date: date,
                confirmed: false,
            };
            tx_put(slaves, &key, &record)?;
            slaves.insert(
                GameStore::slave_index_key(group_id, slave_id, date),
                master_id.to_be_bytes().to_vec(),
            )?;
            Ok(AssignOutcome::Assigned)
        })?;
        if outcome == AssignOutcome::Assigned {
            self.flush_committed();
            info!("user {} enslaved {} in group {}", master_id, slave_id, group_id);
        }
        Ok(outcome)
    }

    /// Today's contract binding `slave_id` in `group_id`, if any.
    pub fn slave_contract(
        &self,
        slave_id: UserId,
        group_id: GroupId,
        date: NaiveDate,
    ) -> Result<Option<SlaveRecord>, GameError> {
        Ok(self
            .slaves
            .transaction(|slaves| tx_slave_of(slaves, group_id, slave_id, date))?)
    }

    /// Seal today's contract when the slave recites the exact initiation phrase.
    pub fn confirm_slave(
        &self,
        slave_id: UserId,
        group_id: GroupId,
        date: NaiveDate,
        text: &str,
        rules: &SlaveRulesConfig,
    ) -> Result<ConfirmOutcome, GameError> {
        let recited = text.trim() == rules.init_phrase;
        let outcome = self.slaves.transaction(|slaves| -> TxResult<ConfirmOutcome> {
            let Some(mut record) = tx_slave_of(slaves, group_id, slave_id, date)? else {
                return Ok(ConfirmOutcome::NoContract);
            };
            if record.confirmed {
                return Ok(ConfirmOutcome::AlreadyConfirmed);
            }
            if !recited {
                return Ok(ConfirmOutcome::WrongPhrase);
            }
            record.confirmed = true;
            tx_put(slaves, &GameStore::slave_key(record.master_id, date), &record)?;
            Ok(ConfirmOutcome::Confirmed {
                master_id: record.master_id,
            })
        })?;
        if let ConfirmOutcome::Confirmed { master_id } = outcome {
            self.flush_committed();
            info!("user {} confirmed the contract with {}", slave_id, master_id);
        }
        Ok(outcome)
    }

    /// Whether a message from `user_id` obeys today's contract.
    pub fn check_compliance(
        &self,
        user_id: UserId,
        group_id: GroupId,
        date: NaiveDate,
        text: &str,
        rules: &SlaveRulesConfig,
    ) -> Result<Compliance, GameError> {
        let Some(record) = self.slave_contract(user_id, group_id, date)? else {
            return Ok(Compliance::Free);
        };
        if !record.confirmed {
            if text.trim() == rules.init_phrase {
                return Ok(Compliance::Compliant);
            }
            return Ok(Compliance::MustRecite {
                phrase: rules.init_phrase.clone(),
            });
        }
        if text.contains(&rules.daily_phrase) {
            Ok(Compliance::Compliant)
        } else {
            debug!("user {} broke the contract in group {}", user_id, group_id);
            Ok(Compliance::MissingDailyPhrase {
                phrase: rules.daily_phrase.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::storage::GameStoreBuilder;
    use crate::game::types::CultivationRecord;
    use tempfile::TempDir;

    const GROUP: GroupId = -100;

    fn store() -> (TempDir, GameStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = GameStoreBuilder::new(dir.path()).open().expect("store");
        (dir, store)
    }

    fn member(store: &GameStore, user: UserId, stage: u32, points: i64) {
        store.record_membership(user, GROUP).unwrap();
        store.ensure_account(user).unwrap();
        let mut record = CultivationRecord::new(user, 10);
        record.stage = stage;
        store
            .cultivation
            .insert(GameStore::cultivation_key(user), GameStore::encode(&record).unwrap())
            .unwrap();
        if points > 0 {
            store.adjust_balance(user, points, LedgerReason::Admin).unwrap();
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn leaderboard_orders_by_stage_points_then_id() {
        let (_dir, store) = store();
        member(&store, 3, 2, 50);
        member(&store, 1, 5, 10);
        member(&store, 2, 2, 50);
        member(&store, 4, 2, 90);
        let board = store.leaderboard(GROUP, 10).unwrap();
        let order: Vec<UserId> = board.iter().map(|e| e.user_id).collect();
        assert_eq!(order, vec![1, 4, 2, 3]);
        assert_eq!(board[0].rank, 1);
        assert_eq!(store.leaderboard(GROUP, 0).unwrap().len(), 1);
        assert!(store.leaderboard(-5, 10).unwrap().is_empty());
    }

    #[test]
    fn leadership_days_accumulate_and_are_idempotent() {
        let (_dir, store) = store();
        member(&store, 1, 3, 0);
        let first = store.record_leadership_day(GROUP, 1, day(1), 100).unwrap();
        assert_eq!(
            first,
            LeadershipDay {
                consecutive_days: 1,
                donation: 100,
                newly_recorded: true
            }
        );
        let repeat = store.record_leadership_day(GROUP, 1, day(1), 100).unwrap();
        assert!(!repeat.newly_recorded);
        let second = store.record_leadership_day(GROUP, 1, day(2), 100).unwrap();
        assert_eq!((second.consecutive_days, second.donation), (2, 200));
        assert_eq!(store.get_balance(1).unwrap(), 300);

        // a gap resets the streak
        let later = store.record_leadership_day(GROUP, 1, day(5), 100).unwrap();
        assert_eq!(later.consecutive_days, 1);
        assert_eq!(store.gang_record(GROUP, 1).unwrap().unwrap().total_donated, 400);
    }

    #[test]
    fn gang_tick_pays_each_group_leader() {
        let (_dir, store) = store();
        member(&store, 1, 6, 0);
        member(&store, 2, 1, 0);
        store.record_membership(7, -200).unwrap();
        store.ensure_account(7).unwrap();
        let reports = store.gang_tick(day(1), 100).unwrap();
        assert_eq!(reports.len(), 2);
        let leaders: Vec<(GroupId, UserId)> =
            reports.iter().map(|r| (r.group_id, r.leader.user_id)).collect();
        assert_eq!(leaders, vec![(-200, 7), (GROUP, 1)]);
        assert_eq!(store.get_balance(2).unwrap(), 0);
    }

    #[test]
    fn slave_assignment_gates_in_order() {
        let (_dir, store) = store();
        member(&store, 1, 6, 0);
        member(&store, 2, 1, 0);
        assert_eq!(store.assign_slave(2, 1, GROUP, day(1)).unwrap(), AssignOutcome::NotLeader);
        assert_eq!(store.assign_slave(1, 1, GROUP, day(1)).unwrap(), AssignOutcome::InvalidTarget);
        assert_eq!(store.assign_slave(1, 2, GROUP, day(1)).unwrap(), AssignOutcome::Assigned);
        assert_eq!(
            store.assign_slave(1, 2, GROUP, day(1)).unwrap(),
            AssignOutcome::AlreadyAssignedToday
        );
        assert_eq!(store.assign_slave(1, 2, GROUP, day(2)).unwrap(), AssignOutcome::Assigned);
    }

    #[test]
    fn contract_confirmation_and_compliance() {
        let (_dir, store) = store();
        let rules = SlaveRulesConfig::default();
        member(&store, 1, 6, 0);
        member(&store, 2, 1, 0);
        assert_eq!(
            store.check_compliance(2, GROUP, day(1), "hello", &rules).unwrap(),
            Compliance::Free
        );
        store.assign_slave(1, 2, GROUP, day(1)).unwrap();
        assert!(matches!(
            store.check_compliance(2, GROUP, day(1), "hello", &rules).unwrap(),
            Compliance::MustRecite { .. }
        ));
        assert_eq!(
            store.confirm_slave(2, GROUP, day(1), "nope", &rules).unwrap(),
            ConfirmOutcome::WrongPhrase
        );
        let phrase = rules.init_phrase.clone();
        assert_eq!(
            store.confirm_slave(2, GROUP, day(1), &phrase, &rules).unwrap(),
            ConfirmOutcome::Confirmed { master_id: 1 }
        );
        assert_eq!(
            store.confirm_slave(2, GROUP, day(1), &phrase, &rules).unwrap(),
            ConfirmOutcome::AlreadyConfirmed
        );
        assert!(matches!(
            store.check_compliance(2, GROUP, day(1), "hello", &rules).unwrap(),
            Compliance::MissingDailyPhrase { .. }
        ));
        assert_eq!(
            store.check_compliance(2, GROUP, day(1), "hello 喵", &rules).unwrap(),
            Compliance::Compliant
        );
        assert_eq!(
            store.confirm_slave(2, GROUP, day(2), &phrase, &rules).unwrap(),
            ConfirmOutcome::NoContract
        );
    }
}
