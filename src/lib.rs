//! # Shubot - cultivation points game for group chats
//!
//! Shubot keeps the state behind a chat cultivation game: point balances, daily
//! checkins, a ladder of cultivation stages, robberies between players, a
//! scratch-card lottery and group leaderboards. Chat gateways translate commands
//! into [`game::Request`]s and render the [`game::Reply`]s.
//!
//! ## Features
//!
//! - **Ledger**: every balance change runs in a sled transaction and leaves an audit entry.
//! - **Cultivation**: stage breakthroughs with per-stage odds, pill gates and penalties.
//! - **Robbery**: two-phase duels with daily limits, cooldowns and a pay-or-fight choice.
//! - **Lottery**: stake tables, daily limits and consistent winning numbers.
//! - **Groups**: membership tracking, leaderboards, daily gang leaders and the slave mini-game.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shubot::config::Config;
//! use shubot::game::{GameService, GameStoreBuilder, Request, RngResolver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let store = GameStoreBuilder::new(&config.storage.data_dir)
//!         .base_cost(config.cultivation.base_cost)
//!         .open()?;
//!     let service = GameService::new(
//!         Arc::new(store),
//!         Arc::new(config),
//!         Arc::new(RngResolver::from_entropy()),
//!     );
//!     let reply = service.handle(Request::Checkin { user_id: 42 });
//!     println!("{}", serde_json::to_string(&reply)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`game`] - storage, transactions and the game engines
//! - [`config`] - TOML configuration and validation
//! - [`metrics`] - in-process activity counters
//! - [`logutil`] - log sanitising for chat text

pub mod config;
pub mod game;
pub mod logutil;
pub mod metrics;
