use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ACCOUNT_SCHEMA_VERSION: u8 = 1;
pub const CULTIVATION_SCHEMA_VERSION: u8 = 1;
pub const COOLDOWN_SCHEMA_VERSION: u8 = 1;
pub const MEMBERSHIP_SCHEMA_VERSION: u8 = 1;
pub const SLAVE_SCHEMA_VERSION: u8 = 1;
pub const GANG_SCHEMA_VERSION: u8 = 1;
pub const LEDGER_SCHEMA_VERSION: u8 = 1;

/// Breakthrough cost assigned to freshly created cultivation records.
pub const DEFAULT_BREAKTHROUGH_COST: i64 = 10;

/// External chat identity of a user.
pub type UserId = i64;
/// External chat identity of a group. Usually negative on chat platforms.
pub type GroupId = i64;

/// Persisted record carrying a schema version, checked on every read.
pub trait Record: Serialize + serde::de::DeserializeOwned {
    const ENTITY: &'static str;
    const SCHEMA_VERSION: u8;

    fn schema_version(&self) -> u8;
}

macro_rules! impl_record {
    ($ty:ty, $entity:literal, $version:ident) => {
        impl Record for $ty {
            const ENTITY: &'static str = $entity;
            const SCHEMA_VERSION: u8 = $version;

            fn schema_version(&self) -> u8 {
                self.schema_version
            }
        }
    };
}

/// Points balance and check-in stamp of a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAccount {
    pub schema_version: u8,
    pub user_id: UserId,
    pub points: i64,
    #[serde(default)]
    pub last_checkin: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: ACCOUNT_SCHEMA_VERSION,
            user_id,
            points: 0,
            last_checkin: None,
            created_at: now,
        }
    }
}

/// Position of a user on the cultivation ladder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CultivationRecord {
    pub schema_version: u8,
    pub user_id: UserId,
    pub stage: u32,
    pub pills: u32,
    pub next_cost: i64,
}

impl CultivationRecord {
    pub fn new(user_id: UserId, next_cost: i64) -> Self {
        Self {
            schema_version: CULTIVATION_SCHEMA_VERSION,
            user_id,
            stage: 0,
            pills: 0,
            next_cost,
        }
    }

    /// Every three stages form one major realm.
    pub fn major_stage(&self) -> u32 {
        self.stage / 3
    }
}

/// Rate-limited activities tracked by the cooldown tracker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Lottery,
    Robbery,
}

impl Activity {
    pub fn slug(&self) -> &'static str {
        match self {
            Activity::Lottery => "lottery",
            Activity::Robbery => "robbery",
        }
    }
}

/// Usage of one activity by one user.
///
/// `count` is scoped to `day` (UTC) and resets when the day changes.
/// `last_used` drives interval cooldowns and never resets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActivityCooldown {
    pub schema_version: u8,
    pub user_id: UserId,
    pub activity: Activity,
    pub day: NaiveDate,
    pub count: u32,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl ActivityCooldown {
    pub fn new(user_id: UserId, activity: Activity, day: NaiveDate) -> Self {
        Self {
            schema_version: COOLDOWN_SCHEMA_VERSION,
            user_id,
            activity,
            day,
            count: 0,
            last_used: None,
        }
    }

    /// Count for `today`, treating a stale day as zero.
    pub fn count_on(&self, today: NaiveDate) -> u32 {
        if self.day == today {
            self.count
        } else {
            0
        }
    }

    /// Start a new window when the UTC day changed.
    pub fn roll_over(&mut self, today: NaiveDate) {
        if self.day != today {
            self.day = today;
            self.count = 0;
        }
    }

    /// Seconds left before the interval gate opens again; `None` when open.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>, interval_secs: i64) -> Option<i64> {
        let last = self.last_used?;
        let elapsed = now.signed_duration_since(last).num_seconds();
        if elapsed >= interval_secs {
            None
        } else {
            Some(interval_secs - elapsed)
        }
    }
}

/// A user observed posting in a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMembership {
    pub schema_version: u8,
    pub user_id: UserId,
    pub group_id: GroupId,
    pub first_seen: DateTime<Utc>,
}

/// Daily master/slave contract created by a gang leader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlaveRecord {
    pub schema_version: u8,
    pub master_id: UserId,
    pub slave_id: UserId,
    pub group_id: GroupId,
    pub created_date: NaiveDate,
    pub confirmed: bool,
}

/// Leadership streak of a user in a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GangRecord {
    pub schema_version: u8,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub last_date: NaiveDate,
    pub consecutive_days: u32,
    pub total_donated: i64,
}

/// Why a balance moved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    Checkin,
    ChatBoost,
    Lottery,
    LotteryPrize,
    Breakthrough,
    BreakthroughPenalty,
    RobberyTransfer,
    RobberyAnnihilation,
    RandomEvent,
    GangDonation,
    Admin,
}

/// Append-only audit entry written in the same transaction as the balance change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub schema_version: u8,
    pub id: Uuid,
    pub user_id: UserId,
    pub delta: i64,
    pub balance_after: i64,
    pub reason: LedgerReason,
    pub at: DateTime<Utc>,
}

impl_record!(UserAccount, "account", ACCOUNT_SCHEMA_VERSION);
impl_record!(CultivationRecord, "cultivation", CULTIVATION_SCHEMA_VERSION);
impl_record!(ActivityCooldown, "cooldown", COOLDOWN_SCHEMA_VERSION);
impl_record!(GroupMembership, "membership", MEMBERSHIP_SCHEMA_VERSION);
impl_record!(SlaveRecord, "slave", SLAVE_SCHEMA_VERSION);
impl_record!(GangRecord, "gang", GANG_SCHEMA_VERSION);
impl_record!(LedgerEntry, "ledger", LEDGER_SCHEMA_VERSION);
