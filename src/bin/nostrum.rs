use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use nostrum_cache::sync::JsonFileFetcher;
use nostrum_cache::{telemetry, CacheConfig, Store, SyncOrchestrator};

#[derive(Parser)]
#[command(author, version, about = "Inspect and feed the local community event cache", long_about = None)]
struct Cli {
    /// Config file (defaults to NOSTRUM_CONFIG, then the platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overriding the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Community scope, overriding the config
    #[arg(short, long, global = true)]
    scope: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync events from a JSON file of raw events
    Import {
        file: PathBuf,
        /// Source name the cursors are tracked under
        #[arg(long, default_value = "file")]
        source: String,
    },
    /// List thread heads
    Threads {
        #[arg(short, long)]
        forum: Option<String>,
    },
    /// Show one thread with its replies, reactions and labels
    Thread { root_id: String },
    /// List moderation labels, newest first
    Labels,
    /// List pending writes
    Pending,
    /// Show sync cursors
    Cursors,
    /// Forget every cursor of the scope
    ResetCursors,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CacheConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    if let Some(scope) = cli.scope {
        config.sync.scope = scope;
    }
    telemetry::init_tracing(&config.logging)?;

    let scope = config.sync.scope.clone();
    if scope.is_empty() {
        bail!("no scope configured; pass --scope or set [sync] scope");
    }

    let store = Arc::new(
        Store::open(&config.database.path)
            .with_context(|| format!("failed to open {}", config.database.path.display()))?,
    );

    match cli.command {
        Commands::Import { file, source } => {
            let fetcher = JsonFileFetcher::new(&file).with_stream_kinds(config.sync.stream_kinds.clone());
            let mut options = config.sync_options();
            options.sources = vec![source];
            match SyncOrchestrator::new(store.clone()).sync(&fetcher, &options).await {
                Ok(stats) => print_json(&stats)?,
                Err(e) => {
                    print_json(&e.stats)?;
                    return Err(e.into());
                }
            }
        }
        Commands::Threads { forum } => {
            let forum = forum.map(|f| nostrum_cache::event::normalize_slug_input(Some(&f)));
            print_json(&store.thread_list(&scope, forum.as_deref())?)?;
        }
        Commands::Thread { root_id } => print_json(&store.thread_detail(&scope, &root_id)?)?,
        Commands::Labels => print_json(&store.moderation_labels(&scope)?)?,
        Commands::Pending => print_json(&store.pending_writes(&scope)?)?,
        Commands::Cursors => print_json(&store.sync_state(&scope)?)?,
        Commands::ResetCursors => {
            let removed = store.reset_cursors(&scope)?;
            println!("removed {removed} cursor(s) for {scope}");
        }
    }

    store.close()?;
    Ok(())
}
