use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

use pagecheck::cancel::CancelToken;
use pagecheck::check::Checker;
use pagecheck::config::Config;
use pagecheck::embed;
use pagecheck::ingest::{IngestMode, Ingestor};
use pagecheck::loader;
use pagecheck::report;
use pagecheck::store::sqlite::SqliteIndex;

#[derive(Parser)]
#[command(name = "pagecheck", version, about = "Page-level semantic overlap checks against a document corpus")]
struct Cli {
    /// Directory holding the .pagecheck config and default index
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init,
    /// Add every page of a document to the corpus
    Ingest {
        /// PDF or text file (form feeds separate text pages)
        file: PathBuf,
        /// Keep the pages that index successfully instead of rolling back
        #[arg(long)]
        best_effort: bool,
        /// Stop indexing after this many seconds (atomic ingests roll back)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Compare each page of a document against the corpus
    Check {
        file: PathBuf,
        /// Neighbours fetched per page
        #[arg(long)]
        top_k: Option<usize>,
        /// Scores at or below this are dropped as noise
        #[arg(long)]
        noise_threshold: Option<f32>,
        /// Scores above this are flagged as potential plagiarism
        #[arg(long)]
        similarity_threshold: Option<f32>,
        /// Stop starting new pages after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show corpus statistics
    Status {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.root)?;
    config.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Init => {
            let path = config.save(&cli.root)?;
            println!("Wrote {}", path.display());
        }
        Commands::Ingest {
            file,
            best_effort,
            timeout_secs,
        } => {
            let pages = loader::load_path(&file)
                .with_context(|| format!("loading {}", file.display()))?;
            let document_id = pages
                .first()
                .map(|p| p.source_id.clone())
                .unwrap_or_else(|| file.display().to_string());

            let index = open_index(&cli.root, &config)?;
            let mode = if best_effort {
                IngestMode::BestEffort
            } else {
                IngestMode::Atomic
            };
            let mut ingestor = Ingestor::new(&index).with_mode(mode);
            if let Some(secs) = timeout_secs {
                ingestor = ingestor.with_cancel(CancelToken::with_timeout(Duration::from_secs(secs)));
            }
            let outcome = ingestor.ingest(&document_id, &pages)?;
            index.close()?;
            println!("{}", report::format_ingest(&outcome));
        }
        Commands::Check {
            file,
            top_k,
            noise_threshold,
            similarity_threshold,
            timeout_secs,
            json,
        } => {
            let pages = loader::load_path(&file)
                .with_context(|| format!("loading {}", file.display()))?;
            let policy = config
                .policy
                .with_overrides(similarity_threshold, noise_threshold, top_k);

            let index = open_index(&cli.root, &config)?;
            let mut checker = Checker::new(&index, policy)
                .context("invalid threshold override")?
                .with_display(config.display.clone())
                .with_concurrency(config.embed.max_concurrent);
            if let Some(secs) = timeout_secs {
                checker = checker.with_cancel(CancelToken::with_timeout(Duration::from_secs(secs)));
            }

            let outcome = checker.check(&pages);
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print!("{}", report::format_check(&outcome));
            }
        }
        Commands::Status { json } => {
            let storage_dir = config.storage_dir(&cli.root);
            let stats = SqliteIndex::read_stats(&storage_dir, &config.storage.collection)
                .with_context(|| format!("reading index at {}", storage_dir.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print!("{}", report::format_stats(&stats));
            }
        }
    }

    Ok(())
}

fn open_index(root: &Path, config: &Config) -> Result<SqliteIndex> {
    let embedder = embed::from_backend(&config.embed.backend).context("starting embedder")?;
    let storage_dir = config.storage_dir(root);
    SqliteIndex::open(&storage_dir, &config.storage.collection, embedder)
        .with_context(|| format!("opening index at {}", storage_dir.display()))
}
