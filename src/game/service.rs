//! Request/reply facade used by the chat gateway.
//!
//! The gateway sends one [`Request`] per chat command and renders the [`Reply`].
//! Business rejections come back as ordinary replies; storage failures are
//! logged here and collapse into [`Reply::TryAgainLater`] so no internal detail
//! reaches the chat. Transactions never leave partial state behind, and a failed
//! flush after a commit is only logged.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::game::chance::Resolver;
use crate::game::chat_boost::ChatBoostOutcome;
use crate::game::cultivation::{BreakthroughOutcome, Profile};
use crate::game::errors::GameError;
use crate::game::gang::{AssignOutcome, Compliance, ConfirmOutcome, LeadershipReport, RankEntry};
use crate::game::lottery::LotteryOutcome;
use crate::game::random_events::RandomEventOutcome;
use crate::game::robbery::{LoserChoice, ResolveOutcome, RobOutcome, RobberyEngine};
use crate::game::storage::GameStore;
use crate::game::types::{GroupId, LedgerEntry, LedgerReason, UserId};
use crate::logutil::escape_log;
use crate::metrics::{self, Tally};

const DEFAULT_HISTORY: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Checkin {
        user_id: UserId,
    },
    Balance {
        user_id: UserId,
    },
    Profile {
        user_id: UserId,
    },
    AdminAdjust {
        user_id: UserId,
        delta: i64,
    },
    AddPills {
        user_id: UserId,
        count: u32,
    },
    Breakthrough {
        user_id: UserId,
    },
    Rob {
        robber: UserId,
        target: UserId,
    },
    RobChoice {
        offer_id: Uuid,
        user_id: UserId,
        choice: LoserChoice,
    },
    Lottery {
        user_id: UserId,
        cost: i64,
    },
    GroupMessage {
        user_id: UserId,
        group_id: GroupId,
        text: String,
    },
    Leaderboard {
        group_id: GroupId,
        #[serde(default)]
        top: Option<usize>,
    },
    AssignSlave {
        master_id: UserId,
        slave_id: UserId,
        group_id: GroupId,
    },
    ConfirmSlave {
        user_id: UserId,
        group_id: GroupId,
        text: String,
    },
    GangTick {
        #[serde(default)]
        date: Option<NaiveDate>,
    },
    History {
        user_id: UserId,
        #[serde(default)]
        limit: Option<usize>,
    },
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CheckinOutcome {
    Recorded { reward: i64, balance: i64 },
    AlreadyCheckedIn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Checkin {
        outcome: CheckinOutcome,
    },
    Balance {
        user_id: UserId,
        points: i64,
    },
    Profile {
        profile: Option<Profile>,
    },
    Adjusted {
        user_id: UserId,
        old: i64,
        new: i64,
    },
    Pills {
        user_id: UserId,
        pills: u32,
    },
    Breakthrough {
        outcome: BreakthroughOutcome,
    },
    Rob {
        outcome: RobOutcome,
    },
    RobChoice {
        outcome: ResolveOutcome,
    },
    Lottery {
        outcome: LotteryOutcome,
    },
    GroupMessage {
        boost: ChatBoostOutcome,
        compliance: Compliance,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confirmation: Option<ConfirmOutcome>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<RandomEventOutcome>,
    },
    Leaderboard {
        group_id: GroupId,
        entries: Vec<RankEntry>,
    },
    AssignSlave {
        outcome: AssignOutcome,
    },
    ConfirmSlave {
        outcome: ConfirmOutcome,
    },
    GangTick {
        date: NaiveDate,
        reports: Vec<LeadershipReport>,
    },
    History {
        user_id: UserId,
        entries: Vec<LedgerEntry>,
    },
    Status {
        accounts: usize,
        groups: usize,
        memberships: usize,
        ledger_entries: usize,
        pending_offers: usize,
    },
    /// Infrastructure failure; the step that failed left no partial writes.
    TryAgainLater {
        message: String,
    },
}

pub struct GameService {
    store: Arc<GameStore>,
    config: Arc<Config>,
    resolver: Arc<dyn Resolver>,
    robbery: RobberyEngine,
}

impl GameService {
    pub fn new(store: Arc<GameStore>, config: Arc<Config>, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            store,
            config,
            resolver,
            robbery: RobberyEngine::new(),
        }
    }

    pub fn store(&self) -> &GameStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn robbery(&self) -> &RobberyEngine {
        &self.robbery
    }

    pub fn handle(&self, request: Request) -> Reply {
        self.handle_at(request, Utc::now())
    }

    /// Handle `request` as if it arrived at `now`.
    pub fn handle_at(&self, request: Request, now: DateTime<Utc>) -> Reply {
        metrics::inc_requests();
        match self.dispatch(request, now) {
            Ok(reply) => reply,
            Err(err) => {
                metrics::inc_infra_failures();
                error!("request failed: {}", err);
                Reply::TryAgainLater {
                    message: "the cultivation records are unavailable, try again later".into(),
                }
            }
        }
    }

    /// Draw a reward from `[checkin] reward` and record today's checkin.
    pub fn daily_checkin(&self, user_id: UserId, today: NaiveDate) -> Result<CheckinOutcome, GameError> {
        let range = self.config.checkin.reward;
        let reward = self.resolver.roll_die(range.min, range.max);
        if !self.store.checkin(user_id, reward, today)? {
            return Ok(CheckinOutcome::AlreadyCheckedIn);
        }
        let balance = self.store.get_balance(user_id)?;
        Ok(CheckinOutcome::Recorded { reward, balance })
    }

    fn dispatch(&self, request: Request, now: DateTime<Utc>) -> Result<Reply, GameError> {
        let today = now.date_naive();
        let store = self.store.as_ref();
        let resolver = self.resolver.as_ref();
        let config = self.config.as_ref();

        let reply = match request {
            Request::Checkin { user_id } => {
                let outcome = self.daily_checkin(user_id, today)?;
                metrics::record(
                    "checkin",
                    match outcome {
                        CheckinOutcome::Recorded { .. } => Tally::Success,
                        CheckinOutcome::AlreadyCheckedIn => Tally::Rejected,
                    },
                );
                Reply::Checkin { outcome }
            }
            Request::Balance { user_id } => Reply::Balance {
                user_id,
                points: store.retry_transient(|| store.get_balance(user_id))?,
            },
            Request::Profile { user_id } => Reply::Profile {
                profile: store.profile(user_id, &config.cultivation)?,
            },
            Request::AdminAdjust { user_id, delta } => {
                store.retry_transient(|| store.ensure_account(user_id))?;
                let (old, new) = store.adjust_balance(user_id, delta, LedgerReason::Admin)?;
                info!("admin adjusted user {} by {}: {} -> {}", user_id, delta, old, new);
                Reply::Adjusted { user_id, old, new }
            }
            Request::AddPills { user_id, count } => Reply::Pills {
                user_id,
                pills: store.add_pills(user_id, count)?,
            },
            Request::Breakthrough { user_id } => {
                let outcome = store.attempt_breakthrough(user_id, &config.cultivation, resolver)?;
                metrics::record(
                    "breakthrough",
                    match outcome {
                        BreakthroughOutcome::Succeeded { .. } => Tally::Success,
                        BreakthroughOutcome::Failed { .. } => Tally::Admitted,
                        _ => Tally::Rejected,
                    },
                );
                Reply::Breakthrough { outcome }
            }
            Request::Rob { robber, target } => {
                let swept = self.robbery.sweep_expired(now);
                if swept > 0 {
                    debug!("dropped {} expired robbery offers", swept);
                }
                let outcome = self
                    .robbery
                    .attempt(store, &config.rob, resolver, robber, target, now)?;
                let tally = match &outcome {
                    RobOutcome::Duel { offer } if offer.winner == robber => Tally::Success,
                    RobOutcome::Duel { .. } | RobOutcome::Escaped | RobOutcome::Tie { .. } => {
                        Tally::Admitted
                    }
                    _ => Tally::Rejected,
                };
                metrics::record("robbery", tally);
                Reply::Rob { outcome }
            }
            Request::RobChoice {
                offer_id,
                user_id,
                choice,
            } => {
                let outcome = self
                    .robbery
                    .resolve(store, &config.rob, resolver, offer_id, user_id, choice, now)?;
                metrics::record(
                    "robbery_choice",
                    match outcome {
                        ResolveOutcome::OfferExpired | ResolveOutcome::NotYourChoice { .. } => {
                            Tally::Rejected
                        }
                        ResolveOutcome::Paid { .. } | ResolveOutcome::Annihilated { .. } => {
                            Tally::Success
                        }
                        _ => Tally::Admitted,
                    },
                );
                Reply::RobChoice { outcome }
            }
            Request::Lottery { user_id, cost } => {
                let outcome = store.play_lottery(user_id, cost, &config.lottery, resolver, today)?;
                metrics::record(
                    "lottery",
                    match &outcome {
                        LotteryOutcome::Played(draw) if draw.won => Tally::Success,
                        LotteryOutcome::Played(_) => Tally::Admitted,
                        _ => Tally::Rejected,
                    },
                );
                Reply::Lottery { outcome }
            }
            Request::GroupMessage {
                user_id,
                group_id,
                text,
            } => self.group_message(user_id, group_id, &text, today)?,
            Request::Leaderboard { group_id, top } => Reply::Leaderboard {
                group_id,
                entries: store.leaderboard(group_id, top.unwrap_or(config.leaderboard.top_count))?,
            },
            Request::AssignSlave {
                master_id,
                slave_id,
                group_id,
            } => Reply::AssignSlave {
                outcome: store.assign_slave(master_id, slave_id, group_id, today)?,
            },
            Request::ConfirmSlave {
                user_id,
                group_id,
                text,
            } => Reply::ConfirmSlave {
                outcome: store.confirm_slave(user_id, group_id, today, &text, &config.slave_rules)?,
            },
            Request::GangTick { date } => {
                let date = date.unwrap_or(today);
                Reply::GangTick {
                    date,
                    reports: store.gang_tick(date, config.gang.base_donation)?,
                }
            }
            Request::History { user_id, limit } => Reply::History {
                user_id,
                entries: store.ledger_history(user_id, limit.unwrap_or(DEFAULT_HISTORY))?,
            },
            Request::Status => {
                let stats = store.stats()?;
                Reply::Status {
                    accounts: stats.accounts,
                    groups: stats.groups,
                    memberships: stats.memberships,
                    ledger_entries: stats.ledger_entries,
                    pending_offers: self.robbery.pending(),
                }
            }
        };
        Ok(reply)
    }

    /// Chat reward, contract handling and random events for one group message.
    fn group_message(
        &self,
        user_id: UserId,
        group_id: GroupId,
        text: &str,
        today: NaiveDate,
    ) -> Result<Reply, GameError> {
        let store = self.store.as_ref();
        let config = self.config.as_ref();
        debug!(
            "group {} message from {}: {}",
            group_id,
            user_id,
            escape_log(text)
        );

        let boost = store.on_group_message(
            user_id,
            group_id,
            text,
            &config.chat_boost,
            self.resolver.as_ref(),
        )?;
        let confirmation = if text.trim() == config.slave_rules.init_phrase {
            match store.confirm_slave(user_id, group_id, today, text, &config.slave_rules)? {
                ConfirmOutcome::NoContract => None,
                other => Some(other),
            }
        } else {
            None
        };
        let compliance = store.check_compliance(user_id, group_id, today, text, &config.slave_rules)?;
        let event = store.roll_random_event(
            user_id,
            &config.random_events,
            &config.cultivation,
            self.resolver.as_ref(),
        )?;
        if event.is_some() {
            metrics::record("random_event", Tally::Success);
        }
        Ok(Reply::GroupMessage {
            boost,
            compliance,
            confirmation,
            event,
        })
    }
}
