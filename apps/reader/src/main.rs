mod artifact;
mod channel;
mod config;
mod db;
mod errors;
mod listing;
mod llm_client;
mod models;
mod pipeline;
mod responder;
mod state;
mod store;
mod summary;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Local, Utc};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::channel::{DisabledNotifier, Notifier, ZulipClient};
use crate::config::Config;
use crate::db::create_pool;
use crate::listing::file::load_listing_file;
use crate::llm_client::LlmClient;
use crate::models::paper::PaperStatus;
use crate::pipeline::scheduler::Scheduler;
use crate::state::AppState;
use crate::store::PaperStore;

/// Reads the daily papers feed, summarizes new papers and answers questions about them.
#[derive(Debug, Parser)]
#[command(name = "reader", version, about)]
struct Cli {
    /// Do not post to or listen on Zulip.
    #[arg(long)]
    no_zulip: bool,

    /// Process a saved listing (HTML page, listing JSON, or array of
    /// `{title, pdf_link}`) once instead of fetching the live page.
    #[arg(long, value_name = "PATH")]
    listing_file: Option<PathBuf>,

    /// Run a single fetch-and-process cycle, then exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting paper reader v{}", env!("CARGO_PKG_VERSION"));

    // Open the paper store (schema is brought up to date here)
    let store = PaperStore::new(create_pool(&config.database_url).await?);
    info!(
        "Paper store ready at {} ({} completed, {} failed)",
        config.database_url,
        store.list_by_status(PaperStatus::Completed).await?.len(),
        store.list_by_status(PaperStatus::Failed).await?.len()
    );

    let llm = LlmClient::new(config.anthropic_api_key.clone());
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let zulip = match (&config.zulip, cli.no_zulip) {
        (_, true) => {
            info!("Zulip disabled by --no-zulip");
            None
        }
        (None, false) => {
            warn!("Zulip credentials not set, running without the chat channel");
            None
        }
        (Some(credentials), false) => {
            info!("Zulip client initialized for stream {}", config.zulip_stream);
            Some(Arc::new(ZulipClient::new(
                credentials.clone(),
                config.zulip_stream.clone(),
                config.http_timeout,
            )))
        }
    };
    let notifier: Arc<dyn Notifier> = match &zulip {
        Some(client) => client.clone() as Arc<dyn Notifier>,
        None => Arc::new(DisabledNotifier),
    };

    let state = AppState {
        store,
        llm,
        config: config.clone(),
        notifier,
        zulip,
    };

    if let Some(path) = cli.listing_file {
        let listing = load_listing_file(&path, Local::now().date_naive()).await?;
        let report = state.pipeline().process_listing(&listing).await;
        info!("Listing file processed: {report:?}");
        return Ok(());
    }

    if let Some(zulip) = state.zulip.clone() {
        let responder = Arc::new(state.responder(Utc::now().timestamp()));
        tokio::spawn(async move {
            zulip
                .call_on_each_message(move |message| {
                    let responder = responder.clone();
                    async move {
                        responder.handle(&message).await;
                    }
                })
                .await;
        });
        info!("Question responder listening as {}", config.zulip_bot_name);
    }

    let scheduler = Scheduler::new(
        state.fetcher(),
        state.pipeline(),
        config.sleep_min_secs,
        config.sleep_max_secs,
    );
    if cli.once {
        if let Some(report) = scheduler.run_cycle().await {
            info!("Cycle finished: {report:?}");
        }
    } else {
        scheduler.run_forever().await;
    }

    Ok(())
}
