//! NameSync CLI
//!
//! Thin wrapper around namesync-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Generate a room code and share link
//! namesync code new
//!
//! # Validate a code or share link
//! namesync code check "https://namesync.app/?room=k3v9qa"
//!
//! # Run two partners against an in-process relay
//! namesync simulate --a Emma,Noah,Liam --b Liam,Olivia,Emma
//!
//! # Same, over a lossy relay, with JSONL logs
//! namesync -vv --log-dir ./logs simulate --a Emma,Noah --b Noah --drop-rate 0.3 --reorder-rate 0.2
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use namesync_core::logging::LoggingBuilder;
use namesync_core::{
    DisconnectPolicy, FaultConfig, LocalStore, MemoryRelay, MemoryStore, RedbStore, RoomCode,
    SessionConfig, SessionManager, DEFAULT_SHARE_BASE_URL, DEFAULT_TOPIC_PREFIX,
};
use tracing::info;

/// NameSync - find the names you both like
#[derive(Parser)]
#[command(name = "namesync")]
#[command(version)]
#[command(about = "NameSync - find the names you both like")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write JSONL logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Persist simulated partners in redb files under this directory
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Room code utilities
    Code {
        #[command(subcommand)]
        action: CodeAction,
    },

    /// Run two partners on one in-process relay and print their matches
    Simulate(SimulateArgs),
}

#[derive(Subcommand)]
enum CodeAction {
    /// Generate a fresh room code
    New,

    /// Validate a room code or share link
    Check {
        /// Room code or share link
        input: String,
    },
}

#[derive(clap::Args)]
struct SimulateArgs {
    /// Items partner A likes, comma separated
    #[arg(long, value_delimiter = ',')]
    a: Vec<String>,

    /// Items partner B likes, comma separated
    #[arg(long, value_delimiter = ',')]
    b: Vec<String>,

    /// Probability that the relay drops a frame
    #[arg(long, default_value_t = 0.0, value_parser = parse_probability)]
    drop_rate: f64,

    /// Probability that the relay delivers a frame twice
    #[arg(long, default_value_t = 0.0, value_parser = parse_probability)]
    duplicate_rate: f64,

    /// Probability that the relay holds a frame back so later ones overtake it
    #[arg(long, default_value_t = 0.0, value_parser = parse_probability)]
    reorder_rate: f64,

    /// How long to let the partners exchange messages
    #[arg(long, default_value_t = 1500)]
    settle_ms: u64,

    /// Seed for the relay's fault decisions
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_dir.as_ref())?;

    match cli.command {
        Commands::Code { action } => match action {
            CodeAction::New => {
                let room = RoomCode::generate();
                println!("Room code: {}", room);
                println!("  Share: {}", room.share_link(DEFAULT_SHARE_BASE_URL));
            }

            CodeAction::Check { input } => {
                let room = RoomCode::from_share_link(&input)
                    .with_context(|| format!("'{}' is not a valid room code", input.trim()))?;
                println!("Valid room code: {}", room);
                println!("  Topic: {}", room.topic(DEFAULT_TOPIC_PREFIX));
                println!("  Share: {}", room.share_link(DEFAULT_SHARE_BASE_URL));
            }
        },

        Commands::Simulate(args) => {
            let relay = match args.seed {
                Some(seed) => MemoryRelay::with_seed(seed),
                None => MemoryRelay::new(),
            };

            match &cli.data_dir {
                Some(dir) => {
                    let a = RedbStore::open(dir.join("a.redb"))
                        .with_context(|| format!("opening store in {}", dir.display()))?;
                    let b = RedbStore::open(dir.join("b.redb"))
                        .with_context(|| format!("opening store in {}", dir.display()))?;
                    simulate(relay, a, b, &args).await?;
                }
                None => simulate(relay, MemoryStore::new(), MemoryStore::new(), &args).await?,
            }
        }
    }

    Ok(())
}

/// Pair two partners in one room, replay their likes and report matches
async fn simulate<S: LocalStore>(
    relay: MemoryRelay,
    store_a: S,
    store_b: S,
    args: &SimulateArgs,
) -> Result<()> {
    let config = SessionConfig::default();
    let a = SessionManager::new(relay.clone(), store_a, config.clone())?;
    let b = SessionManager::new(relay.clone(), store_b, config)?;

    let room = a
        .initialize_and_reconnect(DisconnectPolicy::NewRoom)
        .await?
        .context("partner A has no room")?;
    b.initialize_and_reconnect(DisconnectPolicy::Stay).await?;
    if b.room().as_ref() != Some(&room) {
        b.join_room(room.as_str()).await?;
    }

    println!("Room: {}", room);
    if let Some(link) = a.share_link() {
        println!("  Share: {}", link);
    }

    info!(
        %room,
        drop_rate = args.drop_rate,
        duplicate_rate = args.duplicate_rate,
        reorder_rate = args.reorder_rate,
        "Partners paired"
    );
    relay.set_faults(FaultConfig {
        drop_rate: args.drop_rate,
        duplicate_rate: args.duplicate_rate,
        reorder_rate: args.reorder_rate,
        reorder_delay: Duration::from_millis(150),
        ..FaultConfig::default()
    });

    for item in &args.a {
        a.notify_like(item);
    }
    for item in &args.b {
        b.notify_like(item);
    }

    tokio::time::sleep(Duration::from_millis(args.settle_ms)).await;

    for (label, session) in [("A", &a), ("B", &b)] {
        let matches = session.matches();
        println!();
        println!("Partner {} ({})", label, session.instance_id());
        println!("  Status: {}", session.status());
        println!("  Likes: {}", session.local_likes().len());
        if matches.is_empty() {
            println!("  Matches: (none)");
        } else {
            println!("  Matches: {}", matches.join(", "));
        }
    }

    Ok(())
}

fn parse_probability(s: &str) -> Result<f64, String> {
    let p: f64 = s.parse().map_err(|_| format!("'{}' is not a number", s))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("{} is outside 0..=1", p))
    }
}

fn setup_logging(verbosity: u8, log_dir: Option<&PathBuf>) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let mut builder = LoggingBuilder::new("namesync").with_filter(filter);
    if let Some(dir) = log_dir {
        builder = builder.with_log_dir(dir);
    }
    builder.init().context("installing log subscriber")?;
    Ok(())
}
