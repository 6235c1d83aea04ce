//! # Brain Box CLI (`brainbox`)
//!
//! The `brainbox` binary is the channel adapter for Brain Box: it turns
//! command-line invocations into inbound items, runs them through the
//! pipeline, and prints the single response message a messaging frontend
//! would deliver back to the sender.
//!
//! ## Usage
//!
//! ```bash
//! brainbox --config ./config/brainbox.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `brainbox init` | Create the storage tree, SQLite database, and schema |
//! | `brainbox ingest` | Ingest a note, link, document, or image |
//! | `brainbox list <type>` | List stored items of one content type |
//! | `brainbox search <keyword>` | Keyword search over names, tags, summaries, topics |
//! | `brainbox date <YYYY-MM-DD>` | List items ingested on a given day |
//! | `brainbox decisions` | Show recent routing decisions |
//! | `brainbox publish last` | Publish the newest unpublished item |
//! | `brainbox publish pending` | Retry all failed publishes |
//! | `brainbox reconcile` | Replay interrupted runs |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize storage and database
//! brainbox init --config ./config/brainbox.toml
//!
//! # Store a plain note
//! brainbox ingest --text "call the dentist tomorrow"
//!
//! # Store a link and publish it to the knowledge repo
//! brainbox ingest --text "worth keeping https://example.com/post #github"
//!
//! # Store a PDF with a caption
//! brainbox ingest --file ./paper.pdf --caption "transformer survey"
//!
//! # Browse and search
//! brainbox list documents
//! brainbox search transformer
//! brainbox date 2026-08-27
//! ```

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use brainbox::config::{self, Config};
use brainbox::enrich;
use brainbox::models::{ContentItem, ContentType, InboundItem};
use brainbox::pipeline::Pipeline;
use brainbox::publish::Publisher;
use brainbox::repo::{GithubRepoClient, RepoClient, UnavailableRepo};
use brainbox::storage::RawStore;
use brainbox::store::MetadataStore;
use brainbox::{db, decision, migrate, reconcile};

/// Brain Box — a personal knowledge ingestion pipeline with a decision
/// layer.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/brainbox.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "brainbox",
    about = "Brain Box — ingest, enrich, and selectively publish personal knowledge",
    version,
    long_about = "Brain Box classifies inbound content (notes, links, documents, images), \
    stores raw bytes durably, enriches text via an AI provider, records auditable routing \
    decisions, and conditionally publishes to a GitHub-backed knowledge repository."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/brainbox.toml`. Storage, database, channel,
    /// enrichment, and publish settings are read from this file.
    #[arg(long, global = true, default_value = "./config/brainbox.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the storage tree and database schema.
    ///
    /// Creates the per-type storage folders, the SQLite database file, and
    /// all required tables (content_items, decisions, publish_records).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Ingest one item through the full pipeline.
    ///
    /// Provide either `--text` (note or link) or `--file` (document or
    /// image, with an optional `--caption`). The item is classified,
    /// stored, enriched, decided on, and — when the publish marker is
    /// present in the text — published.
    Ingest {
        /// Message text, or the caption-free body of a note or link.
        #[arg(long)]
        text: Option<String>,

        /// Path to a file to ingest (document or image).
        #[arg(long)]
        file: Option<PathBuf>,

        /// Caption accompanying a file. Used for analysis and trigger
        /// detection.
        #[arg(long)]
        caption: Option<String>,

        /// Override the stored original filename.
        #[arg(long)]
        name: Option<String>,

        /// MIME type hint for classification (e.g. `application/pdf`).
        #[arg(long)]
        mime: Option<String>,

        /// Sender identity. Defaults to the configured authorized sender;
        /// any other value is rejected.
        #[arg(long)]
        sender: Option<i64>,

        /// Source message identifier. Defaults to the current unix time.
        #[arg(long)]
        message_id: Option<i64>,
    },

    /// List stored items of one content type.
    ///
    /// Accepts `document`, `image`, `link`, or `note` (plural forms work
    /// too).
    List {
        /// Content type to list.
        content_type: String,

        /// Maximum number of items to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Keyword search across names, tags, summaries, and topics.
    Search {
        /// The search keyword.
        keyword: String,

        /// Maximum number of items to show.
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// List items ingested on a given day.
    Date {
        /// Day to filter by, `YYYY-MM-DD`.
        date: String,

        /// Maximum number of items to show.
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Show routing decisions.
    ///
    /// Without `--item`, shows the most recent decisions across all items.
    Decisions {
        /// Show the full decision history of one item.
        #[arg(long)]
        item: Option<String>,
    },

    /// Publish stored content to the knowledge repository.
    Publish {
        #[command(subcommand)]
        target: PublishTarget,
    },

    /// Replay interrupted runs and retry pending publishes.
    ///
    /// Items stored without a decision are resumed from enrichment onward;
    /// items whose publish failed are re-attempted. Already-published
    /// items are never re-sent.
    Reconcile,
}

/// Publish subcommands.
#[derive(Subcommand)]
enum PublishTarget {
    /// Publish the newest item that has not been published yet.
    Last,
    /// Retry every item with a failed publish and no successful one.
    Pending,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("brainbox=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let raw = RawStore::new(cfg.storage.root.clone());
            raw.init()?;
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Storage and database initialized successfully.");
        }
        Commands::Ingest {
            text,
            file,
            caption,
            name,
            mime,
            sender,
            message_id,
        } => {
            let inbound = build_inbound(&cfg, text, file, caption, name, mime, sender, message_id)?;
            let (pipeline, _store) = build_pipeline(&cfg).await?;
            let outcome = pipeline.process(inbound).await?;
            println!("{}", outcome.response);
        }
        Commands::List {
            content_type,
            limit,
        } => {
            let content_type = ContentType::parse(&content_type)
                .with_context(|| format!("unknown content type: {}", content_type))?;
            let store = open_store(&cfg).await?;
            let items = store.list_by_type(content_type, limit).await?;
            print_items(&items);
        }
        Commands::Search { keyword, limit } => {
            let store = open_store(&cfg).await?;
            let items = store.search_keyword(&keyword, limit).await?;
            print_items(&items);
        }
        Commands::Date { date, limit } => {
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .with_context(|| format!("invalid date (expected YYYY-MM-DD): {}", date))?;
            let store = open_store(&cfg).await?;
            let items = store.filter_by_date(date, limit).await?;
            print_items(&items);
        }
        Commands::Decisions { item } => {
            let store = open_store(&cfg).await?;
            let decisions = match item {
                Some(id) => store.decisions_for_item(&id).await?,
                None => store.recent_decisions(20).await?,
            };
            if decisions.is_empty() {
                println!("No decisions recorded.");
            }
            for d in decisions {
                println!(
                    "{}  {}#{}  {}  (confidence {:.1})",
                    d.created_at.format("%Y-%m-%d %H:%M"),
                    d.content_item_id,
                    d.seq,
                    d.recommendation.as_str(),
                    d.confidence
                );
                println!("    {}", d.rationale);
            }
        }
        Commands::Publish { target } => {
            let (pipeline, store) = build_pipeline(&cfg).await?;
            match target {
                PublishTarget::Last => {
                    match store.latest_unpublished().await? {
                        Some(item) => {
                            let outcome = pipeline
                                .publish_existing(item, decision::command_trigger("publish last"))
                                .await?;
                            println!("{}", outcome.response);
                        }
                        None => println!("Nothing to publish."),
                    }
                }
                PublishTarget::Pending => {
                    let candidates = store.publish_retry_candidates().await?;
                    if candidates.is_empty() {
                        println!("No pending publishes.");
                    }
                    for item in candidates {
                        let outcome = pipeline
                            .publish_existing(item, decision::command_trigger("publish pending"))
                            .await?;
                        println!("{}", outcome.response);
                    }
                }
            }
        }
        Commands::Reconcile => {
            let (pipeline, store) = build_pipeline(&cfg).await?;
            let report = reconcile::run(&pipeline, &store).await?;
            println!(
                "Reconcile complete: {} resumed, {} publish retries ({} succeeded).",
                report.resumed, report.retried, report.published
            );
        }
    }

    Ok(())
}

/// Assemble an inbound item from CLI flags, mirroring what a messaging
/// frontend would hand over.
#[allow(clippy::too_many_arguments)]
fn build_inbound(
    cfg: &Config,
    text: Option<String>,
    file: Option<PathBuf>,
    caption: Option<String>,
    name: Option<String>,
    mime: Option<String>,
    sender: Option<i64>,
    message_id: Option<i64>,
) -> Result<InboundItem> {
    let sender_id = sender.unwrap_or(cfg.channel.allowed_sender_id);
    let message_id = message_id.unwrap_or_else(|| Utc::now().timestamp());

    let (payload, original_name, text) = match (file, text) {
        (Some(path), None) => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read file: {}", path.display()))?;
            let file_name = name.or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            });
            (Some(bytes), file_name, caption)
        }
        (None, Some(text)) => (None, name, Some(text)),
        (Some(_), Some(_)) => bail!("pass either --text or --file, not both"),
        (None, None) => bail!("one of --text or --file is required"),
    };

    Ok(InboundItem {
        sender_id,
        message_id,
        payload,
        original_name,
        mime_hint: mime,
        text,
    })
}

async fn open_store(cfg: &Config) -> Result<MetadataStore> {
    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;
    Ok(MetadataStore::new(pool))
}

/// Wire up the full pipeline from configuration. Publishing credentials
/// are optional: without `GITHUB_TOKEN`, publish attempts are recorded as
/// failed and can be retried once a token is available.
async fn build_pipeline(cfg: &Config) -> Result<(Pipeline, MetadataStore)> {
    let store = open_store(cfg).await?;
    let raw = RawStore::new(cfg.storage.root.clone());
    raw.init()?;

    let enricher: Arc<dyn enrich::Enricher> = Arc::from(enrich::create_enricher(&cfg.enrichment)?);

    let repo: Arc<dyn RepoClient> = match GithubRepoClient::new(&cfg.publish) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            warn!(error = %e, "publishing disabled for this run");
            Arc::new(UnavailableRepo::new(e.to_string()))
        }
    };
    let publisher = Publisher::new(store.clone(), repo, cfg.publish.max_retries);

    let pipeline = Pipeline::new(
        &cfg.channel,
        cfg.enrichment.clone(),
        raw,
        store.clone(),
        enricher,
        publisher,
    );
    Ok((pipeline, store))
}

fn print_items(items: &[ContentItem]) {
    if items.is_empty() {
        println!("No items found.");
        return;
    }
    for item in items {
        println!(
            "{}  {:<8}  {}",
            item.created_at.format("%Y-%m-%d %H:%M"),
            item.content_type.as_str(),
            item.original_name
        );
        println!("    id: {}", item.id);
        if let Some(topic) = &item.topic {
            println!("    topic: {}  tags: {}", topic, item.tags.join(", "));
        }
        if let Some(summary) = &item.summary {
            println!("    {}", summary);
        }
    }
}
