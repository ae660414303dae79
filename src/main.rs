use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt as _, BufReader};

mod config;
mod console;
mod dashboard;
mod error;
mod extractor;
mod fetcher;
mod messages;
mod reconciler;
mod scheduler;
mod selection;
mod store;

use crate::console::Input;
use crate::dashboard::{Dashboard, DashboardView};
use crate::extractor::EventExtractor;
use crate::fetcher::StatusClient;
use crate::scheduler::PollScheduler;
use crate::store::{CounterPersistence, FileStore, KeyValueStore, MemoryStore};

/// Poll a device status server and keep durable activation counters.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override `poll.interval_ms` from the config file.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Keep counters in memory only.
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::formatted_timed_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let mut config = config::AppConfig::load(&cli.config)?;
    if let Some(interval_ms) = cli.interval_ms {
        config.poll.get_or_insert_with(Default::default).interval_ms = Some(interval_ms);
    }

    info!("Watching {}", config.server.base_url);

    let client = Arc::new(StatusClient::new(&config.server).context("building status client")?);

    if cli.ephemeral {
        run_session(&config, client, MemoryStore::new()).await
    } else {
        let path = config.storage_path();
        info!("Persisting counters to {}", path.display());
        run_session(&config, client, FileStore::new(path)).await
    }
}

async fn run_session<K: KeyValueStore + 'static>(
    config: &config::AppConfig,
    client: Arc<StatusClient>,
    store: K,
) -> anyhow::Result<()> {
    let persistence = CounterPersistence::new(store, &config.storage_scope());
    let extractor = EventExtractor::new(config.markers());
    info!("Counting {:?} under {}", extractor.markers(), persistence.key());
    let dashboard = Dashboard::new(extractor, persistence);

    let mut handle = PollScheduler::new(
        client,
        dashboard,
        config.poll_interval(),
        config.fetch_timeout(),
    )
    .start();
    let mut status = handle.status();

    println!("{}", console::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut shown = DashboardView::default();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match console::parse(&line) {
                    Some(Input::Command(command)) => handle.send(command),
                    Some(Input::List) => println!("{}", console::render(&shown)),
                    Some(Input::Logout) => break,
                    Some(Input::Unknown(line)) => {
                        println!("unknown command: {}", line);
                        println!("{}", console::HELP);
                    }
                    None => {}
                },
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!("Failed to read console input: {}", err);
                    stdin_open = false;
                }
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = status.borrow_and_update().view.clone();
                if view != shown {
                    println!("{}\n", console::render(&view));
                    shown = view;
                }
            }
        }
    }

    if let Some(dashboard) = handle.stop().await {
        info!(
            "Session ended with {} devices and {} counters",
            dashboard.roster().len(),
            dashboard.tallies().counts.len()
        );
    }
    Ok(())
}
