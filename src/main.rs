mod background;
mod config;
mod data_dir;
mod dom;
mod error;
mod extractor;
mod messages;
mod page;
mod popup;
mod presenter;
mod runtime;
mod serve;
mod signals;
mod store;
mod watcher;

use clap::{Parser, Subcommand};
use config::TrackerConfig;
use data_dir::DataDir;
use page::SnapshotFile;
use popup::NoticeKind;
use runtime::Runtime;
use std::path::PathBuf;
use std::sync::Arc;
use store::UsageStore;

/// Tracks a messages quota scraped from a usage page and reflects it as a
/// badge and a summary.
#[derive(Parser, Debug)]
#[command(name = "quotawatch", version, about)]
pub struct Cli {
    /// Config file path (default: <data-dir>/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (default: .quotawatch)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Page snapshot to read (default: <data-dir>/page.json)
    #[arg(long, global = true)]
    page: Option<PathBuf>,

    /// Extra logging (watcher polls, extraction decisions)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the data directory and default config
    Init,
    /// Run the extractor over a snapshot or text file and print the result
    Extract {
        /// Snapshot JSON or plain-text page
        file: PathBuf,
    },
    /// Print the stored usage summary
    Status,
    /// Store usage entered by hand
    Set {
        /// Messages used (>= 0)
        #[arg(allow_hyphen_values = true)]
        used: String,
        /// Messages limit (> 0)
        #[arg(allow_hyphen_values = true)]
        limit: String,
    },
    /// Fetch usage from the current page once and store it
    Fetch,
    /// Watch the page for navigation and keep the store up to date
    Watch,
    /// Watch the page and serve the popup API over HTTP
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "quotawatch=debug"
    } else if cli.quiet {
        "quotawatch=warn"
    } else {
        "quotawatch=info"
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let (config, data_dir) = resolve_config(&cli);
    let page_path = cli.page.clone().unwrap_or_else(|| data_dir.page());

    let result = match &cli.command {
        Commands::Init => handle_init(&config, &data_dir),
        Commands::Extract { file } => handle_extract(&config, file),
        Commands::Status => handle_status(&data_dir).await,
        Commands::Set { used, limit } => {
            handle_set(config, &data_dir, page_path, used, limit).await
        }
        Commands::Fetch => handle_fetch(config, &data_dir, page_path).await,
        Commands::Watch => handle_watch(config, &data_dir, page_path, false).await,
        Commands::Serve => handle_watch(config, &data_dir, page_path, true).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Load config and settle on the data directory.
///
/// `--data-dir` wins; otherwise an explicit `--config` may name one.
fn resolve_config(cli: &Cli) -> (TrackerConfig, DataDir) {
    let default_root = config::StorageConfig::default().data_dir;
    let config_path = cli.config.clone().unwrap_or_else(|| {
        DataDir::new(cli.data_dir.clone().unwrap_or_else(|| default_root.clone())).config()
    });
    let mut config = config::load_config(&config_path);

    let root = match (&cli.data_dir, &cli.config) {
        (Some(dir), _) => dir.clone(),
        (None, Some(_)) => config.storage.data_dir.clone(),
        (None, None) => default_root,
    };
    config.storage.data_dir = root.clone();
    (config, DataDir::new(root))
}

/// Create the data directory; the first time, point at the usage page.
fn ensure_initialized(config: &TrackerConfig, data_dir: &DataDir) -> Result<bool, String> {
    let created = data_dir
        .init()
        .map_err(|e| format!("Failed to initialize {}: {e}", data_dir.root().display()))?;
    if created {
        tracing::info!(
            url = %config.site.usage_page_url,
            "quotawatch installed; open the usage page to start tracking"
        );
    }
    Ok(created)
}

fn handle_init(config: &TrackerConfig, data_dir: &DataDir) -> Result<(), String> {
    if ensure_initialized(config, data_dir)? {
        println!("Initialized {}", data_dir.root().display());
        println!("Open {} to start tracking.", config.site.usage_page_url);
    } else {
        println!("{} already initialized.", data_dir.root().display());
    }
    Ok(())
}

fn handle_extract(config: &TrackerConfig, file: &std::path::Path) -> Result<(), String> {
    let snapshot = dom::PageSnapshot::load(file).map_err(|e| e.to_string())?;
    match extractor::extract(&snapshot.page_text(), &snapshot.root) {
        Some(result) => {
            let derived = presenter::derive(result.used, Some(result.limit));
            println!(
                "{} of {} messages ({})",
                result.used,
                result.limit,
                presenter::badge_text(derived.percentage)
            );
            Ok(())
        }
        None => Err(error::TrackerError::NotFound {
            usage_page_url: config.site.usage_page_url.clone(),
        }
        .user_message()),
    }
}

async fn handle_status(data_dir: &DataDir) -> Result<(), String> {
    let store = UsageStore::open(data_dir);
    tracing::debug!(path = %store.path().display(), "reading usage store");
    match store.get().await.map_err(|e| e.to_string())? {
        Some(record) => {
            let summary = presenter::Summary::new(
                record.used,
                record.limit,
                record.last_updated,
                chrono::Utc::now(),
            );
            println!("{}", summary.render());
        }
        None => println!("No usage data yet. Run `quotawatch fetch` or `quotawatch set`."),
    }
    Ok(())
}

async fn start_runtime(
    config: TrackerConfig,
    data_dir: &DataDir,
    page_path: PathBuf,
) -> Result<Runtime, String> {
    ensure_initialized(&config, data_dir)?;
    Ok(Runtime::start(config, data_dir, Arc::new(SnapshotFile::new(page_path))).await)
}

fn report(view: &popup::PopupView) -> Result<(), String> {
    let failed = view
        .notice
        .as_ref()
        .is_some_and(|n| n.kind == NoticeKind::Error);
    if failed {
        if let Some(summary) = &view.summary {
            println!("{}", summary.render());
        }
        return Err(view
            .notice
            .as_ref()
            .map(|n| n.message.clone())
            .unwrap_or_default());
    }
    println!("{}", view.render());
    Ok(())
}

async fn handle_set(
    config: TrackerConfig,
    data_dir: &DataDir,
    page_path: PathBuf,
    used: &str,
    limit: &str,
) -> Result<(), String> {
    let rt = start_runtime(config, data_dir, page_path).await?;
    let view = rt.popup().save_manual(used, limit).await;
    rt.shutdown();
    report(&view)
}

async fn handle_fetch(
    config: TrackerConfig,
    data_dir: &DataDir,
    page_path: PathBuf,
) -> Result<(), String> {
    let rt = start_runtime(config, data_dir, page_path).await?;
    let view = rt.popup().auto_fetch().await;
    rt.shutdown();
    report(&view)
}

async fn handle_watch(
    config: TrackerConfig,
    data_dir: &DataDir,
    page_path: PathBuf,
    with_server: bool,
) -> Result<(), String> {
    let serve_config = config.serve.clone();
    let mut rt = start_runtime(config, data_dir, page_path).await?;
    let shutdown = signals::install();
    rt.spawn_watcher(shutdown.clone());

    let result = if with_server {
        serve::run(&rt, &serve_config, shutdown)
            .await
            .map_err(|e| format!("Server error: {e}"))
    } else {
        signals::wait(shutdown).await;
        Ok(())
    };

    rt.shutdown();
    result
}
