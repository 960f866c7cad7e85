//! Passive chat rewards and group membership tracking.

use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use sled::Transactional;

use crate::config::ChatBoostConfig;
use crate::game::chance::Resolver;
use crate::game::errors::GameError;
use crate::game::ledger::{tx_load_account, tx_load_or_create_cultivation, tx_set_points};
use crate::game::storage::{tx_get, tx_put, GameStore, TxResult};
use crate::game::types::{
    GroupId, GroupMembership, LedgerReason, UserId, MEMBERSHIP_SCHEMA_VERSION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChatBoostOutcome {
    pub new_member: bool,
    pub points_awarded: i64,
    pub pill_awarded: bool,
}

/// CJK unified ideographs in the common block (U+4E00..=U+9FA5).
pub fn count_hanzi(text: &str) -> usize {
    text.chars()
        .filter(|c| ('\u{4e00}'..='\u{9fa5}').contains(c))
        .count()
}

impl GameStore {
    /// Remember that `user_id` posts in `group_id`. True the first time only.
    pub fn record_membership(&self, user_id: UserId, group_id: GroupId) -> Result<bool, GameError> {
        let key = Self::member_key(group_id, user_id);
        let now = Utc::now();
        let inserted = self.retry_transient(|| {
            let inserted = self.membership.transaction(|membership| -> TxResult<bool> {
                if tx_get::<GroupMembership>(membership, &key)?.is_some() {
                    return Ok(false);
                }
                let record = GroupMembership {
                    schema_version: MEMBERSHIP_SCHEMA_VERSION,
                    user_id,
                    group_id,
                    first_seen: now,
                };
                tx_put(membership, &key, &record)?;
                Ok(true)
            })?;
            Ok(inserted)
        })?;
        if inserted {
            self.flush_committed();
            debug!("user {} joined group {}", user_id, group_id);
        }
        Ok(inserted)
    }

    /// Membership, account creation and the chat reward for one group message.
    pub fn on_group_message(
        &self,
        user_id: UserId,
        group_id: GroupId,
        text: &str,
        config: &ChatBoostConfig,
        resolver: &dyn Resolver,
    ) -> Result<ChatBoostOutcome, GameError> {
        let mut outcome = ChatBoostOutcome {
            new_member: self.record_membership(user_id, group_id)?,
            ..ChatBoostOutcome::default()
        };
        self.retry_transient(|| self.ensure_account(user_id))?;
        if count_hanzi(text) < config.min_hanzi {
            return Ok(outcome);
        }

        let pill = resolver.hit(config.pill_chance);
        let base_cost = self.base_cost();
        let now = Utc::now();
        (&self.users, &self.cultivation, &self.ledger).transaction(|(users, cultivation, ledger)| -> TxResult<()> {
            let account = tx_load_account(users, user_id)?;
            let credited = account.points + 1;
            tx_set_points(users, ledger, account, credited, LedgerReason::ChatBoost, now)?;
            if pill {
                let mut record = tx_load_or_create_cultivation(cultivation, user_id, base_cost)?;
                record.pills += 1;
                tx_put(cultivation, &GameStore::cultivation_key(user_id), &record)?;
            }
            Ok(())
        })?;
        self.flush_committed();
        outcome.points_awarded = 1;
        outcome.pill_awarded = pill;
        if pill {
            debug!("user {} found a pill while chatting", user_id);
        }
        Ok(outcome)
    }
}
