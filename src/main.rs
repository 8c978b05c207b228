//! # threadloom CLI (`loom`)
//!
//! Index local files into an embedding cache, search them by similarity,
//! and ask a chat model questions grounded in the results.
//!
//! ## Usage
//!
//! ```bash
//! loom --config ./config/loom.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `loom init` | Create the SQLite database and its tables |
//! | `loom index` | Split, embed and store the configured files |
//! | `loom search "<query>"` | Top-K similarity search over stored fragments |
//! | `loom ask "<prompt>"` | Retrieval-augmented chat completion |
//! | `loom stale` | List indexed files modified since they were embedded |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use threadloom::{ask, config, index, logging, migrate, search};

/// threadloom: node-tree conversation workflows grounded in embedded
/// local files.
#[derive(Parser)]
#[command(
    name = "loom",
    about = "threadloom — conversation workflows grounded in locally-embedded files",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/loom.toml`.
    #[arg(long, global = true, default_value = "./config/loom.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database.
    ///
    /// Creates the SQLite file and the embedding-cache, file-timestamp and
    /// vector tables. Safe to run repeatedly. Falls back to default
    /// settings when the config file does not exist.
    Init,

    /// Embed the files under `[index] root` and store their fragments.
    ///
    /// Fragments already in the embedding cache are not sent to the
    /// provider again.
    Index {
        /// Embed without asking for confirmation.
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Search stored fragments by similarity to a query.
    Search {
        /// The search query string.
        query: String,

        /// Results to keep after filtering.
        #[arg(long)]
        k: Option<usize>,

        /// Candidates to fetch before filtering.
        #[arg(long)]
        n: Option<usize>,

        /// Drop results from this file (repeatable).
        #[arg(long = "exclude")]
        exclude: Vec<String>,
    },

    /// Ask the chat model, with relevant fragments injected.
    Ask {
        /// The prompt to send.
        prompt: String,

        #[arg(long)]
        k: Option<usize>,

        #[arg(long)]
        n: Option<usize>,

        /// Include this file whole and keep it out of search results
        /// (repeatable).
        #[arg(long = "file")]
        files: Vec<String>,

        /// Drop search results from this file (repeatable).
        #[arg(long = "exclude")]
        exclude: Vec<String>,

        /// Word budget for the thread sent to the model; 0 for no limit.
        #[arg(long, allow_negative_numbers = true)]
        max_words: Option<i64>,

        /// Continue a previously saved thread.
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Save the finished thread as JSON.
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// List indexed files that changed since they were embedded.
    Stale,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    // Init works without a config file
    if let Commands::Init = cli.command {
        let cfg = if cli.config.exists() {
            config::load_config(&cli.config)?
        } else {
            eprintln!(
                "Warning: {} not found, using default settings",
                cli.config.display()
            );
            config::Config::minimal()
        };
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Index { yes } => {
            index::run_index(&cfg, yes).await?;
        }
        Commands::Search {
            query,
            k,
            n,
            exclude,
        } => {
            search::run_search(&cfg, &query, k, n, exclude).await?;
        }
        Commands::Ask {
            prompt,
            k,
            n,
            files,
            exclude,
            max_words,
            resume,
            save,
        } => {
            ask::run_ask(
                &cfg,
                ask::AskOptions {
                    prompt,
                    k,
                    n,
                    files,
                    exclude,
                    max_words,
                    resume,
                    save,
                },
            )
            .await?;
        }
        Commands::Stale => {
            index::run_stale(&cfg).await?;
        }
    }

    Ok(())
}
