//! workq CLI: run a worker pool over a JSONL work feed.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use workq::config::Config;
use workq::engine::{Pool, PoolConfig};
use workq::feed::{JsonlFeed, live_items};
use workq::hook::CommandHook;
use workq::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "workq", about = "Crash-aware worker pool for a growing backlog")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a pool until the feed is confirmed exhausted
    Run {
        /// JSONL file of {"result_id", "owner_id"} records; may keep growing
        #[arg(long)]
        feed: PathBuf,
        /// Executable run once per work item
        #[arg(long)]
        command: PathBuf,
        /// Extra arguments passed to the command
        #[arg(last = true)]
        args: Vec<String>,
        /// TOML config file (defaults come from the environment)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Number of workers
        #[arg(long)]
        processes: Option<usize>,
        /// Feed polling cadence in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,
        /// Confirmation polls before stopping
        #[arg(long)]
        bonus_rounds: Option<usize>,
        /// Retries allowed per work item
        #[arg(long)]
        max_retry: Option<u32>,
    },
    /// Show the items a run over the feed would deliver, without running
    Check {
        #[arg(long)]
        feed: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            feed,
            command,
            args,
            config,
            processes,
            poll_interval_ms,
            bonus_rounds,
            max_retry,
        } => {
            let mut config = match config {
                Some(path) => Config::from_file(&path)?,
                None => Config::from_env()?,
            };
            if let Some(n) = processes {
                config.pool.processes = n;
            }
            if let Some(ms) = poll_interval_ms {
                config.pool.poll_interval_ms = ms;
            }
            if let Some(n) = bonus_rounds {
                config.pool.bonus_rounds = n;
            }
            if let Some(n) = max_retry {
                config.pool.max_retry = n;
            }
            config.pool.validate()?;

            cmd_run(config, feed, command, args).await
        }
        Command::Check { feed } => cmd_check(feed).await,
    }
}

async fn cmd_run(
    config: Config,
    feed: PathBuf,
    command: PathBuf,
    args: Vec<String>,
) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from_config(&config, "workq"))?;

    let mut feed = JsonlFeed::new(feed);
    let initial = feed.initial().await?;
    let hook = Arc::new(CommandHook::new(&command, args)?);

    let pool = Pool::new(
        PoolConfig::from(config.pool),
        move |ctx| hook.handle(ctx),
        initial,
    )?;
    let queue = Arc::clone(pool.queue());

    pool.start(feed).await?;

    let stats = queue.stats();
    println!(
        "Done: {} delivered, {} retried, {} superseded, {} dropped after retries",
        stats.delivered, stats.retried, stats.superseded, stats.retries_exhausted
    );
    Ok(())
}

async fn cmd_check(feed: PathBuf) -> anyhow::Result<()> {
    let mut feed = JsonlFeed::new(feed);
    let items = feed.initial().await?;
    let live = live_items(&items);

    if live.is_empty() {
        println!("No live work items in {}.", feed.path().display());
        return Ok(());
    }

    println!("{:<12}  {:<12}", "RESULT_ID", "OWNER_ID");
    println!("{}", "-".repeat(26));
    for work in &live {
        println!("{:<12}  {:<12}", work.result_id, work.owner_id);
    }

    println!(
        "\n{} live of {} record(s), {} superseded or duplicate",
        live.len(),
        items.len(),
        items.len() - live.len()
    );
    Ok(())
}
