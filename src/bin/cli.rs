//! delq CLI
//!
//! Command-line interface for a delete queue on disk: record deletions,
//! list the keys deleted in a time range, and summarize the queue.

use clap::{Parser, Subcommand};
use delqueue::{Config, Engine, ReplTimestamp};
use tracing_subscriber::{fmt, EnvFilter};

/// delq CLI
#[derive(Parser, Debug)]
#[command(name = "delq")]
#[command(about = "Inspect and feed a replication delete queue")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./delqueue_data")]
    data_dir: String,

    /// Block size in bytes (must match an existing image)
    #[arg(short, long, default_value = "4096")]
    block_size: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record deleted keys
    Enqueue {
        /// Deletion timestamp
        #[arg(short, long)]
        timestamp: u32,

        /// Keys that were deleted
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// List keys deleted in [begin, end)
    Range {
        /// Inclusive lower bound
        #[arg(long, default_value = "0")]
        begin: u32,

        /// Exclusive upper bound
        #[arg(long, default_value_t = u32::MAX)]
        end: u32,

        /// Print keys as hex instead of lossy UTF-8
        #[arg(long)]
        hex: bool,
    },

    /// Summarize the queue
    Inspect,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,delqueue=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> delqueue::Result<()> {
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .block_size(args.block_size)
        .build();
    let engine = Engine::open(config)?;

    match args.command {
        Commands::Enqueue { timestamp, keys } => {
            let timestamp = ReplTimestamp::new(timestamp);
            for key in &keys {
                engine.record_deletion(timestamp, key.as_bytes())?;
            }
            println!("recorded {} deletion(s) at t={}", keys.len(), timestamp);
        }
        Commands::Range { begin, end, hex } => {
            let keys = engine.collect_deletions(ReplTimestamp::new(begin), ReplTimestamp::new(end))?;
            for key in &keys {
                if hex {
                    println!("{}", to_hex(key));
                } else {
                    println!("{}", String::from_utf8_lossy(key));
                }
            }
        }
        Commands::Inspect => {
            let stats = engine.stats()?;
            let format_ts = |ts: Option<ReplTimestamp>| {
                ts.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string())
            };
            println!("primal offset:   {}", stats.primal_offset);
            println!("index entries:   {}", stats.index_entries);
            println!("key log bytes:   {}", stats.key_log_bytes);
            println!("first timestamp: {}", format_ts(stats.first_timestamp));
            println!("last timestamp:  {}", format_ts(stats.last_timestamp));
            println!("blocks in use:   {}", engine.store().block_count() - engine.store().free_block_count());
        }
    }

    engine.close()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
