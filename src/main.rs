//! Binary entrypoint for the shubot CLI.
//!
//! Commands:
//! - `init` - write a starter `config.toml` and create the data directory
//! - `status` - print store counts and the configured gang reset time
//! - `leaderboard --group <id> [--top <n>]` - print a group ranking
//! - `gang-tick [--date <YYYY-MM-DD>]` - credit today's gang leaders
//! - `serve` - answer newline-delimited JSON requests on stdin
//!
//! See the library crate docs for module-level details: `shubot::`.
use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use shubot::config::Config;
use shubot::game::{GameService, GameStore, GameStoreBuilder, Reply, Request, RngResolver};
use shubot::logutil::escape_log;
use shubot::metrics;

#[derive(Parser)]
#[command(name = "shubot")]
#[command(about = "Game-state core for a chat cultivation bot")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the data directory
    Init,
    /// Show store statistics
    Status,
    /// Print the ranking of one group
    Leaderboard {
        /// Group id
        #[arg(short, long, allow_hyphen_values = true)]
        group: i64,
        /// Entries to show (1-20); defaults to `[leaderboard] top_count`
        #[arg(short, long)]
        top: Option<usize>,
    },
    /// Record today's gang leaders and pay their donations
    GangTick {
        /// Day to record (UTC date); defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Serve JSON requests from stdin, one per line
    Serve,
}

/// One request line; `id` is echoed back untouched.
#[derive(Deserialize)]
struct Inbound {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(flatten)]
    request: Request,
}

#[derive(Serialize)]
struct Outbound {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<serde_json::Value>,
    #[serde(flatten)]
    reply: Reply,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        Config::create_default(&cli.config).await?;
        let config = Config::load(&cli.config).await?;
        tokio::fs::create_dir_all(&config.storage.data_dir).await?;
        info!(
            "Configuration file created at {}, data directory {}",
            cli.config, config.storage.data_dir
        );
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);
    let store = open_store(&config)?;

    match cli.command {
        Commands::Init => {}
        Commands::Status => {
            let stats = store.stats()?;
            println!("shubot v{}", env!("CARGO_PKG_VERSION"));
            println!("data directory: {}", config.storage.data_dir);
            println!("accounts:       {}", stats.accounts);
            println!("groups:         {}", stats.groups);
            println!("memberships:    {}", stats.memberships);
            println!("ledger entries: {}", stats.ledger_entries);
            println!(
                "gang reset:     {:02}:{:02}",
                config.gang.reset_hour, config.gang.reset_minute
            );
        }
        Commands::Leaderboard { group, top } => {
            let top = top.unwrap_or(config.leaderboard.top_count);
            let entries = store.leaderboard(group, top)?;
            if entries.is_empty() {
                println!("group {} has no ranked members", group);
            }
            for entry in entries {
                let stage = config.cultivation.stage_name(entry.stage).unwrap_or("?");
                println!(
                    "{:>2}. {:<14} {:<18} {:>8}",
                    entry.rank, entry.user_id, stage, entry.points
                );
            }
        }
        Commands::GangTick { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let reports = store.gang_tick(date, config.gang.base_donation)?;
            for report in &reports {
                println!(
                    "group {}: leader {} day {} donation {}",
                    report.group_id,
                    report.leader.user_id,
                    report.day.consecutive_days,
                    report.day.donation
                );
            }
            info!("gang tick for {} done ({} groups)", date, reports.len());
        }
        Commands::Serve => {
            let service = Arc::new(GameService::new(
                Arc::new(store),
                Arc::new(config),
                Arc::new(RngResolver::from_entropy()),
            ));
            serve(service).await?;
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<GameStore> {
    let store = GameStoreBuilder::new(&config.storage.data_dir)
        .base_cost(config.cultivation.base_cost)
        .open()?;
    Ok(store)
}

/// Read requests until stdin closes. Each request runs on the blocking pool so
/// slow transactions for one user never hold up another; replies are written in
/// completion order and carry the caller's `id`.
async fn serve(service: Arc<GameService>) -> Result<()> {
    info!("Starting shubot v{} (serve)", env!("CARGO_PKG_VERSION"));
    let (tx, mut rx) = mpsc::channel::<String>(256);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                warn!("stdout closed, dropping replies");
                break;
            }
        }
    });

    let sweep_every = service.config().rob.offer_timeout_secs.max(1) as u64;
    let sweeper = {
        let service = service.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(sweep_every));
            loop {
                ticker.tick().await;
                let dropped = service.robbery().sweep_expired(Utc::now());
                if dropped > 0 {
                    info!("expired {} robbery offers", dropped);
                }
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let inbound: Inbound = match serde_json::from_str(&line) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("unparseable request {}: {}", escape_log(&line), e);
                let error = serde_json::json!({ "reply": "invalid_request", "error": e.to_string() });
                let _ = tx.send(error.to_string()).await;
                continue;
            }
        };
        let service = service.clone();
        let tx = tx.clone();
        in_flight.push(tokio::spawn(async move {
            let Inbound { id, request } = inbound;
            let reply = match tokio::task::spawn_blocking(move || service.handle(request)).await {
                Ok(reply) => reply,
                Err(e) => {
                    log::error!("request handler panicked: {}", e);
                    metrics::inc_infra_failures();
                    Reply::TryAgainLater {
                        message: "internal error, try again later".into(),
                    }
                }
            };
            match serde_json::to_string(&Outbound { id, reply }) {
                Ok(json) => {
                    let _ = tx.send(json).await;
                }
                Err(e) => log::error!("failed to encode reply: {}", e),
            }
        }));
        in_flight.retain(|handle| !handle.is_finished());
    }

    for handle in in_flight {
        let _ = handle.await;
    }
    drop(tx);
    let _ = writer.await;
    sweeper.abort();
    service.store().flush()?;

    let snapshot = metrics::snapshot();
    info!(
        "stdin closed after {} requests ({} infrastructure failures)",
        snapshot.requests, snapshot.infra_failures
    );
    let mut activities: Vec<_> = snapshot.activities.into_iter().collect();
    activities.sort_by(|a, b| a.0.cmp(&b.0));
    for (slug, counter) in activities {
        info!(
            "{}: attempts={} admitted={} rejected={} successes={}",
            slug, counter.attempts, counter.admitted, counter.rejected, counter.successes
        );
    }
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|cfg| cfg.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // sled logs its own internals at debug; keep them out unless tracing
    if verbosity < 2 {
        builder.filter_module("sled", log::LevelFilter::Warn);
    }
    // stdout carries replies in serve mode, so console logs go to stderr
    builder.target(env_logger::Target::Stderr);

    let log_file = config.as_ref().and_then(|cfg| cfg.logging.file.as_ref()).and_then(|file| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .ok()
    });

    match log_file {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Interactive runs also echo to the console
            let is_tty = atty::is(atty::Stream::Stderr);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
