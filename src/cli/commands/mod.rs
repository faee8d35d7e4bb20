//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod crawl;
mod extract;
mod history;
mod init;
mod source;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "bulletin")]
#[command(about = "Crawl, extract and diff regulatory bulletins")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and database schema
    Init,

    /// Manage the source catalogue
    Sources {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// Run one crawl pass over active sources and seed URLs
    Crawl {
        /// Only crawl the source with this name or STATE/name label
        #[arg(short, long)]
        source: Option<String>,
        /// Seed URL file (defaults to SEED_FILE or urls.txt)
        #[arg(long)]
        seeds: Option<PathBuf>,
        /// Skip seed URLs entirely
        #[arg(long)]
        no_seeds: bool,
        /// Maximum URLs processed at once
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
        /// Stop starting new URLs after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Print change records as JSON lines instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Extract normalized text and fields from a local file
    Extract {
        /// File to extract
        file: PathBuf,
        /// MIME type (detected from content and extension if omitted)
        #[arg(long)]
        mime: Option<String>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the snapshot lineage of a URL
    History {
        /// Document URL
        url: String,
        /// Include diff text for each change
        #[arg(long)]
        diffs: bool,
    },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// Load sources from a YAML catalogue
    Load {
        /// Catalogue file (defaults to SOURCES_FILE or sources.yaml)
        file: Option<PathBuf>,
    },
    /// List known sources
    List,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (settings, _config) = load_settings_with_options(LoadOptions {
        config_path: cli.config.clone(),
    })
    .await;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Sources { command } => match command {
            SourceCommands::Load { file } => source::cmd_source_load(&settings, file).await,
            SourceCommands::List => source::cmd_source_list(&settings).await,
        },
        Commands::Crawl {
            source,
            seeds,
            no_seeds,
            concurrency,
            timeout,
            json,
        } => {
            crawl::cmd_crawl(
                &settings,
                crawl::CrawlArgs {
                    source,
                    seeds,
                    no_seeds,
                    concurrency,
                    timeout,
                    json,
                },
            )
            .await
        }
        Commands::Extract { file, mime, json } => {
            extract::cmd_extract(&settings, &file, mime.as_deref(), json).await
        }
        Commands::History { url, diffs } => history::cmd_history(&settings, &url, diffs).await,
    }
}
