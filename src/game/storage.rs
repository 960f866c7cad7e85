use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use log::warn;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
};
use uuid::Uuid;

use crate::game::errors::GameError;
use crate::game::types::{
    Activity, CultivationRecord, GroupId, GroupMembership, LedgerEntry, LedgerReason, Record,
    UserAccount, UserId, DEFAULT_BREAKTHROUGH_COST, LEDGER_SCHEMA_VERSION,
};

const TREE_USERS: &str = "users";
const TREE_CULTIVATION: &str = "user_cultivation";
const TREE_COOLDOWNS: &str = "activity_cooldown";
const TREE_MEMBERSHIP: &str = "group_membership";
const TREE_SLAVES: &str = "slave_records";
const TREE_GANG: &str = "gang_records";
const TREE_LEDGER: &str = "ledger_log";

/// Result type used inside sled transaction closures.
pub(crate) type TxResult<T> = ConflictableTransactionResult<T, GameError>;

fn timestamp_nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp_micros() * 1000)
}

fn settle_flush(result: Result<(), GameError>) -> bool {
    match result {
        Ok(()) => true,
        Err(err) => {
            warn!("flush after commit failed, data stays in the page cache: {}", err);
            false
        }
    }
}

/// Helper builder so tests can easily create throwaway stores with custom paths.
pub struct GameStoreBuilder {
    path: PathBuf,
    temporary: bool,
    base_cost: i64,
}

impl GameStoreBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: false,
            base_cost: DEFAULT_BREAKTHROUGH_COST,
        }
    }

    /// Delete the database files when the store is dropped.
    pub fn temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    /// Breakthrough cost given to new cultivation records and after a combat reset.
    pub fn base_cost(mut self, base_cost: i64) -> Self {
        self.base_cost = base_cost;
        self
    }

    pub fn open(self) -> Result<GameStore, GameError> {
        GameStore::open_with_options(self.path, self.temporary, self.base_cost)
    }
}

/// Counts reported by `shubot status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub accounts: usize,
    pub groups: usize,
    pub memberships: usize,
    pub ledger_entries: usize,
}

/// Sled-backed persistence for accounts, cultivation, cooldowns and social records.
///
/// Every read-modify-write goes through a sled transaction spanning the trees it
/// touches, so concurrent callers for the same user are serialized and a failed
/// operation never leaves partial writes behind.
pub struct GameStore {
    db: sled::Db,
    pub(crate) users: sled::Tree,
    pub(crate) cultivation: sled::Tree,
    pub(crate) cooldowns: sled::Tree,
    pub(crate) membership: sled::Tree,
    pub(crate) slaves: sled::Tree,
    pub(crate) gang: sled::Tree,
    pub(crate) ledger: sled::Tree,
    base_cost: i64,
}

impl GameStore {
    /// Open (or create) the store rooted at `path` with default settings.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GameError> {
        Self::open_with_options(path, false, DEFAULT_BREAKTHROUGH_COST)
    }

    fn open_with_options<P: AsRef<Path>>(
        path: P,
        temporary: bool,
        base_cost: i64,
    ) -> Result<Self, GameError> {
        let path_ref = path.as_ref();
        std::fs::create_dir_all(path_ref)?;
        let db = sled::Config::new()
            .path(path_ref)
            .temporary(temporary)
            .open()?;
        let store = Self {
            users: db.open_tree(TREE_USERS)?,
            cultivation: db.open_tree(TREE_CULTIVATION)?,
            cooldowns: db.open_tree(TREE_COOLDOWNS)?,
            membership: db.open_tree(TREE_MEMBERSHIP)?,
            slaves: db.open_tree(TREE_SLAVES)?,
            gang: db.open_tree(TREE_GANG)?,
            ledger: db.open_tree(TREE_LEDGER)?,
            db,
            base_cost,
        };
        Ok(store)
    }

    pub fn base_cost(&self) -> i64 {
        self.base_cost
    }

    pub(crate) fn user_key(user_id: UserId) -> Vec<u8> {
        format!("users:{}", user_id).into_bytes()
    }

    pub(crate) fn cultivation_key(user_id: UserId) -> Vec<u8> {
        format!("cultivation:{}", user_id).into_bytes()
    }

    pub(crate) fn cooldown_key(user_id: UserId, activity: Activity) -> Vec<u8> {
        format!("cooldown:{}:{}", activity.slug(), user_id).into_bytes()
    }

    pub(crate) fn member_key(group_id: GroupId, user_id: UserId) -> Vec<u8> {
        format!("members:{}:{}", group_id, user_id).into_bytes()
    }

    fn member_prefix(group_id: GroupId) -> Vec<u8> {
        format!("members:{}:", group_id).into_bytes()
    }

    pub(crate) fn slave_key(master_id: UserId, date: NaiveDate) -> Vec<u8> {
        format!("slaves:{}:{}", master_id, date).into_bytes()
    }

    pub(crate) fn slave_index_key(group_id: GroupId, slave_id: UserId, date: NaiveDate) -> Vec<u8> {
        format!("slave_of:{}:{}:{}", group_id, slave_id, date).into_bytes()
    }

    pub(crate) fn gang_key(group_id: GroupId, user_id: UserId) -> Vec<u8> {
        format!("gang:{}:{}", group_id, user_id).into_bytes()
    }

    fn ledger_key(user_id: UserId, at: DateTime<Utc>, id: Uuid) -> Vec<u8> {
        format!("ledger:{}:{:020}:{}", user_id, timestamp_nanos(at), id).into_bytes()
    }

    fn ledger_prefix(user_id: UserId) -> Vec<u8> {
        format!("ledger:{}:", user_id).into_bytes()
    }

    pub(crate) fn encode<T: Record>(value: &T) -> Result<Vec<u8>, GameError> {
        Ok(bincode::serialize(value)?)
    }

    pub(crate) fn decode<T: Record>(bytes: &[u8]) -> Result<T, GameError> {
        let record: T = bincode::deserialize(bytes)?;
        if record.schema_version() != T::SCHEMA_VERSION {
            return Err(GameError::SchemaMismatch {
                entity: T::ENTITY,
                expected: T::SCHEMA_VERSION,
                found: record.schema_version(),
            });
        }
        Ok(record)
    }

    pub(crate) fn read<T: Record>(tree: &sled::Tree, key: &[u8]) -> Result<Option<T>, GameError> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch an account without creating it.
    pub fn get_account(&self, user_id: UserId) -> Result<Option<UserAccount>, GameError> {
        Self::read(&self.users, &Self::user_key(user_id))
    }

    /// Fetch a cultivation record without creating it.
    pub fn get_cultivation(&self, user_id: UserId) -> Result<Option<CultivationRecord>, GameError> {
        Self::read(&self.cultivation, &Self::cultivation_key(user_id))
    }

    /// Users observed posting in `group_id`.
    pub fn group_members(&self, group_id: GroupId) -> Result<Vec<UserId>, GameError> {
        let mut members = Vec::new();
        for entry in self.membership.scan_prefix(Self::member_prefix(group_id)) {
            let (_, value) = entry?;
            let record: GroupMembership = Self::decode(&value)?;
            members.push(record.user_id);
        }
        Ok(members)
    }

    /// Every group with at least one recorded member, ascending.
    pub fn group_ids(&self) -> Result<Vec<GroupId>, GameError> {
        let mut groups = BTreeSet::new();
        for entry in self.membership.iter() {
            let (_, value) = entry?;
            let record: GroupMembership = Self::decode(&value)?;
            groups.insert(record.group_id);
        }
        Ok(groups.into_iter().collect())
    }

    /// Most recent ledger entries for a user, newest first.
    pub fn ledger_history(&self, user_id: UserId, limit: usize) -> Result<Vec<LedgerEntry>, GameError> {
        self.ledger
            .scan_prefix(Self::ledger_prefix(user_id))
            .rev()
            .take(limit)
            .map(|result| {
                result
                    .map_err(GameError::from)
                    .and_then(|(_key, value)| Self::decode(&value))
            })
            .collect()
    }

    pub fn stats(&self) -> Result<StoreStats, GameError> {
        Ok(StoreStats {
            accounts: self.users.len(),
            groups: self.group_ids()?.len(),
            memberships: self.membership.len(),
            ledger_entries: self.ledger.len(),
        })
    }

    pub fn flush(&self) -> Result<(), GameError> {
        self.db.flush()?;
        Ok(())
    }

    /// Flush after a committed transaction. The commit already stands, so a failed
    /// flush is logged rather than reported; returns whether the flush succeeded.
    pub fn flush_committed(&self) -> bool {
        settle_flush(self.flush())
    }

    /// Run an idempotent operation, retrying once if the first attempt hit a transient
    /// storage failure.
    pub fn retry_transient<T>(
        &self,
        mut op: impl FnMut() -> Result<T, GameError>,
    ) -> Result<T, GameError> {
        match op() {
            Err(err) if err.is_transient() => {
                warn!("transient storage error, retrying once: {}", err);
                op()
            }
            other => other,
        }
    }
}

pub(crate) fn tx_get<T: Record>(tree: &TransactionalTree, key: &[u8]) -> TxResult<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => GameStore::decode(&bytes)
            .map(Some)
            .map_err(ConflictableTransactionError::Abort),
        None => Ok(None),
    }
}

pub(crate) fn tx_put<T: Record>(tree: &TransactionalTree, key: &[u8], value: &T) -> TxResult<()> {
    let bytes = GameStore::encode(value).map_err(ConflictableTransactionError::Abort)?;
    tree.insert(key, bytes)?;
    Ok(())
}

pub(crate) fn tx_abort<T>(err: GameError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

/// Append an audit entry for a balance change.
pub(crate) fn tx_log(
    ledger: &TransactionalTree,
    user_id: UserId,
    delta: i64,
    balance_after: i64,
    reason: LedgerReason,
    at: DateTime<Utc>,
) -> TxResult<()> {
    let entry = LedgerEntry {
        schema_version: LEDGER_SCHEMA_VERSION,
        id: Uuid::new_v4(),
        user_id,
        delta,
        balance_after,
        reason,
        at,
    };
    let key = GameStore::ledger_key(user_id, at, entry.id);
    tx_put(ledger, &key, &entry)
}
