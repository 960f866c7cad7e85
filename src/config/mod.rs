//! # Configuration Management Module
//!
//! TOML configuration for the game core. Every section has defaults matching the
//! reference deployment, so an empty file (or a file with only `[storage]`) is a
//! valid configuration.
//!
//! ## Configuration Structure
//!
//! - [`StorageConfig`] - where the sled database lives
//! - [`LoggingConfig`] - log level and optional log file
//! - [`CheckinConfig`] - daily check-in reward range
//! - [`CultivationConfig`] - stage ladder, pill cost and major breakthrough chances
//! - [`LotteryConfig`] - stake/prize table, win chance and number draw
//! - [`RobConfig`] - robbery limits, dice and penalties
//! - [`GangConfig`], [`LeaderboardConfig`], [`SlaveRulesConfig`]
//! - [`ChatBoostConfig`] and the `[[random_events]]` catalogue
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shubot::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("shubot.toml").await?;
//!     let config = Config::load("shubot.toml").await?;
//!     println!("Stages: {}", config.cultivation.names.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [storage]
//! data_dir = "./data"
//!
//! [lottery]
//! chance = 0.1
//! daily_limit = 5
//! number_range = { min = 1, max = 20 }
//! select_count = 5
//! prizes = [{ cost = 3, prize = 30 }, { cost = 10, prize = 100 }]
//!
//! [rob]
//! daily_limit = 5
//! cooldown = 60
//! ```
//!
//! [`Config::load`] runs [`Config::validate`]; a configuration that fails validation
//! never reaches the game engines.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::fs;

use crate::game::errors::GameError;
use crate::game::random_events::RandomEventKind;
use crate::game::types::DEFAULT_BREAKTHROUGH_COST;

/// Inclusive integer range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntRange {
    pub min: i64,
    pub max: i64,
}

impl IntRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn len(&self) -> usize {
        if self.max < self.min {
            0
        } else {
            (self.max - self.min + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Inclusive float range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FloatRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("shubot.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckinConfig {
    /// Points granted by a daily check-in, drawn uniformly.
    pub reward: IntRange,
}

impl Default for CheckinConfig {
    fn default() -> Self {
        Self {
            reward: IntRange::new(1, 10),
        }
    }
}

/// Success chance of the major breakthrough attempted from `level`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BreakthroughChance {
    pub level: u32,
    pub chance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CultivationConfig {
    /// Stage ladder; the last index is the terminal stage.
    pub names: Vec<String>,
    /// Pills consumed by a successful major breakthrough.
    pub major_pill_cost: u32,
    pub major_chances: Vec<BreakthroughChance>,
    /// Cost of the first breakthrough and after a combat reset.
    pub base_cost: i64,
}

fn default_stage_names() -> Vec<String> {
    const REALMS: [&str; 11] = [
        "Postnatal",
        "Innate",
        "Qi Refining",
        "Foundation",
        "Golden Core",
        "Nascent Soul",
        "Spirit Severing",
        "Void Refining",
        "Body Integration",
        "Mahayana",
        "Tribulation",
    ];
    let mut names = vec!["Mortal".to_string()];
    for realm in REALMS {
        for phase in ["Early", "Middle", "Late"] {
            names.push(format!("{} {}", realm, phase));
        }
    }
    names
}

/// Levels 3, 6, ..., 30 with chances 1.0 down to 0.1.
fn default_major_chances() -> Vec<BreakthroughChance> {
    (3..=30)
        .step_by(3)
        .map(|level| BreakthroughChance {
            level,
            chance: ((1.1 - level as f64 / 30.0) * 100_000.0).round() / 100_000.0,
        })
        .collect()
}

impl Default for CultivationConfig {
    fn default() -> Self {
        Self {
            names: default_stage_names(),
            major_pill_cost: 1,
            major_chances: default_major_chances(),
            base_cost: DEFAULT_BREAKTHROUGH_COST,
        }
    }
}

impl CultivationConfig {
    /// Highest reachable stage index.
    pub fn max_stage(&self) -> u32 {
        self.names.len().saturating_sub(1) as u32
    }

    pub fn stage_name(&self, stage: u32) -> Option<&str> {
        self.names.get(stage as usize).map(String::as_str)
    }

    /// A stage is a major gate when `major_chances` lists it.
    pub fn is_major(&self, stage: u32) -> bool {
        self.major_chances.iter().any(|c| c.level == stage)
    }

    /// Chance of the breakthrough attempted from `stage`; 1.0 for minor stages.
    pub fn chance_for_stage(&self, stage: u32) -> f64 {
        self.major_chances
            .iter()
            .find(|c| c.level == stage)
            .map(|c| c.chance)
            .unwrap_or(1.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LotteryPrize {
    pub cost: i64,
    pub prize: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LotteryConfig {
    pub chance: f64,
    pub daily_limit: u32,
    pub number_range: IntRange,
    pub select_count: usize,
    pub prizes: Vec<LotteryPrize>,
}

impl Default for LotteryConfig {
    fn default() -> Self {
        Self {
            chance: 0.1,
            daily_limit: 5,
            number_range: IntRange::new(1, 20),
            select_count: 5,
            prizes: [3, 10, 50]
                .into_iter()
                .map(|cost| LotteryPrize {
                    cost,
                    prize: cost * 10,
                })
                .collect(),
        }
    }
}

impl LotteryConfig {
    pub fn prize_for(&self, cost: i64) -> Option<i64> {
        self.prizes.iter().find(|p| p.cost == cost).map(|p| p.prize)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobConfig {
    pub daily_limit: u32,
    pub escape_chance: f64,
    /// Added to the die of the side with the strictly higher stage.
    pub stage_bonus: i64,
    /// Share of the loser's balance taken on "pay".
    pub penalty_ratio: FloatRange,
    /// Seconds between two robberies by the same user.
    pub cooldown: i64,
    pub dice_range: IntRange,
    /// How long the loser has to choose pay or fight.
    pub offer_timeout_secs: i64,
    /// Points taken from a user annihilated in a fight. Unset means the balance is zeroed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annihilation_penalty: Option<i64>,
}

impl Default for RobConfig {
    fn default() -> Self {
        Self {
            daily_limit: 5,
            escape_chance: 0.2,
            stage_bonus: 3,
            penalty_ratio: FloatRange { min: 0.1, max: 0.3 },
            cooldown: 60,
            dice_range: IntRange::new(1, 6),
            offer_timeout_secs: 60,
            annihilation_penalty: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GangConfig {
    /// Points per consecutive leadership day.
    pub base_donation: i64,
    /// Local time the external scheduler should run `gang-tick`.
    pub reset_hour: u32,
    pub reset_minute: u32,
}

impl Default for GangConfig {
    fn default() -> Self {
        Self {
            base_donation: 100,
            reset_hour: 21,
            reset_minute: 33,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardConfig {
    /// Entries shown; clamped to 1..=20.
    pub top_count: usize,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self { top_count: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveRulesConfig {
    pub init_phrase: String,
    pub daily_phrase: String,
}

impl Default for SlaveRulesConfig {
    fn default() -> Self {
        Self {
            init_phrase: "见过主人，喵~".to_string(),
            daily_phrase: "喵".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatBoostConfig {
    /// CJK ideographs a message needs to earn the chat point.
    pub min_hanzi: usize,
    pub pill_chance: f64,
}

impl Default for ChatBoostConfig {
    fn default() -> Self {
        Self {
            min_hanzi: 3,
            pill_chance: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RandomEventConfig {
    pub kind: RandomEventKind,
    pub chance: f64,
}

fn default_random_events() -> Vec<RandomEventConfig> {
    vec![
        RandomEventConfig {
            kind: RandomEventKind::LostPoints,
            chance: 0.005,
        },
        RandomEventConfig {
            kind: RandomEventKind::StageUp,
            chance: 0.002,
        },
        RandomEventConfig {
            kind: RandomEventKind::StageDown,
            chance: 0.003,
        },
        RandomEventConfig {
            kind: RandomEventKind::Discovery,
            chance: 0.002,
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub checkin: CheckinConfig,
    #[serde(default)]
    pub cultivation: CultivationConfig,
    #[serde(default)]
    pub lottery: LotteryConfig,
    #[serde(default)]
    pub rob: RobConfig,
    #[serde(default)]
    pub gang: GangConfig,
    #[serde(default)]
    pub leaderboard: LeaderboardConfig,
    #[serde(default)]
    pub slave_rules: SlaveRulesConfig,
    #[serde(default)]
    pub chat_boost: ChatBoostConfig,
    #[serde(default = "default_random_events")]
    pub random_events: Vec<RandomEventConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            checkin: CheckinConfig::default(),
            cultivation: CultivationConfig::default(),
            lottery: LotteryConfig::default(),
            rob: RobConfig::default(),
            gang: GangConfig::default(),
            leaderboard: LeaderboardConfig::default(),
            slave_rules: SlaveRulesConfig::default(),
            chat_boost: ChatBoostConfig::default(),
            random_events: default_random_events(),
        }
    }
}

fn check_chance(name: &str, value: f64) -> Result<(), GameError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(GameError::Config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )))
    }
}

fn check_range(name: &str, range: IntRange) -> Result<(), GameError> {
    if range.min > range.max {
        return Err(GameError::Config(format!(
            "{} is inverted: {}..={}",
            name, range.min, range.max
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a file and validate it
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config
            .validate()
            .map_err(|e| anyhow!("Config file {} rejected: {}", path, e))?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject configurations the engines cannot run with.
    pub fn validate(&self) -> Result<(), GameError> {
        let cult = &self.cultivation;
        if cult.names.is_empty() {
            return Err(GameError::Config("cultivation.names is empty".into()));
        }
        if cult.base_cost <= 0 {
            return Err(GameError::Config("cultivation.base_cost must be positive".into()));
        }
        for entry in &cult.major_chances {
            check_chance("cultivation.major_chances.chance", entry.chance)?;
            if entry.level == 0 || entry.level % 3 != 0 || entry.level > cult.max_stage() {
                return Err(GameError::Config(format!(
                    "major breakthrough level {} is not a major stage of the ladder",
                    entry.level
                )));
            }
        }

        check_range("checkin.reward", self.checkin.reward)?;
        if self.checkin.reward.min < 0 {
            return Err(GameError::Config("checkin.reward must not be negative".into()));
        }

        let lottery = &self.lottery;
        check_chance("lottery.chance", lottery.chance)?;
        check_range("lottery.number_range", lottery.number_range)?;
        if lottery.select_count == 0 || lottery.select_count >= lottery.number_range.len() {
            return Err(GameError::Config(format!(
                "lottery.select_count {} must be between 1 and the range size {} (exclusive)",
                lottery.select_count,
                lottery.number_range.len()
            )));
        }
        let mut costs = HashSet::new();
        for prize in &lottery.prizes {
            if prize.cost <= 0 || prize.prize < 0 {
                return Err(GameError::Config(format!(
                    "invalid lottery prize {{ cost = {}, prize = {} }}",
                    prize.cost, prize.prize
                )));
            }
            if !costs.insert(prize.cost) {
                return Err(GameError::Config(format!(
                    "duplicate lottery cost {}",
                    prize.cost
                )));
            }
        }

        let rob = &self.rob;
        check_chance("rob.escape_chance", rob.escape_chance)?;
        check_range("rob.dice_range", rob.dice_range)?;
        let ratio = rob.penalty_ratio;
        if ratio.min > ratio.max || ratio.min < 0.0 || ratio.max > 1.0 {
            return Err(GameError::Config(format!(
                "rob.penalty_ratio must be an ordered range within [0, 1], got {}..={}",
                ratio.min, ratio.max
            )));
        }
        if rob.cooldown < 0 || rob.offer_timeout_secs <= 0 || rob.stage_bonus < 0 {
            return Err(GameError::Config(
                "rob.cooldown, rob.stage_bonus and rob.offer_timeout_secs must not be negative"
                    .into(),
            ));
        }

        if self.gang.reset_hour > 23 || self.gang.reset_minute > 59 {
            return Err(GameError::Config("gang reset time is not a valid time of day".into()));
        }

        check_chance("chat_boost.pill_chance", self.chat_boost.pill_chance)?;
        for event in &self.random_events {
            check_chance("random_events.chance", event.chance)?;
        }
        Ok(())
    }
}
