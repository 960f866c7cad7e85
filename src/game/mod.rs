//! Transactional core of the cultivation game.
//! Everything that moves points, pills or stages lives here and runs through
//! sled transactions on a shared [`GameStore`]; [`GameService`] is the
//! request/reply surface the chat gateway talks to.

pub mod chance;
pub mod chat_boost;
pub mod cooldown;
pub mod cultivation;
pub mod errors;
pub mod gang;
pub mod ledger;
pub mod lottery;
pub mod random_events;
pub mod robbery;
pub mod service;
pub mod storage;
pub mod types;

pub use chance::{pick_one, sample, Resolver, RngResolver, ScriptedResolver};
pub use chat_boost::{count_hanzi, ChatBoostOutcome};
pub use cooldown::{Admission, DailyAdmission};
pub use cultivation::{BreakthroughOutcome, Profile};
pub use errors::GameError;
pub use gang::{
    AssignOutcome, Compliance, ConfirmOutcome, LeadershipDay, LeadershipReport, RankEntry,
    MAX_LEADERBOARD,
};
pub use ledger::Deduction;
pub use lottery::{LotteryDraw, LotteryOutcome};
pub use random_events::{RandomEventKind, RandomEventOutcome};
pub use robbery::{LoserChoice, ResolveOutcome, RobOutcome, RobberyEngine, RobberyOffer};
pub use service::{CheckinOutcome, GameService, Reply, Request};
pub use storage::{GameStore, GameStoreBuilder, StoreStats};
pub use types::*;
