//! repograph CLI
//!
//! One-shot commands over a Python code knowledge graph.
//!
//! # Commands
//!
//! - `index <dir>`: extract, embed and link a repository into the store
//! - `query <text>`: retrieve the elements most relevant to a question
//! - `similar <element>`: list stored similarity edges for one element
//! - `ask <question>`: answer a question with the configured LLM
//! - `config show|path|init`: inspect or write the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "repograph")]
#[command(version)]
#[command(about = "Index a Python repository into a code knowledge graph and query it")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (default: user config dir, if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path, overrides `[store].path`
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every Python file under a directory
    Index(commands::IndexArgs),
    /// Retrieve the elements most relevant to a question
    Query(commands::QueryArgs),
    /// Show the elements most similar to one element
    Similar(commands::SimilarArgs),
    /// Answer a question from retrieved code context
    Ask(commands::AskArgs),
    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: commands::ConfigCommands,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repograph=info")),
        1 => EnvFilter::new("repograph=debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut config = repograph_core::RepographConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.store.path = Some(db);
    }

    match cli.command {
        Commands::Index(args) => commands::index(config, args).await,
        Commands::Query(args) => commands::query(config, args).await,
        Commands::Similar(args) => commands::similar(config, args).await,
        Commands::Ask(args) => commands::ask(config, args).await,
        Commands::Config { action } => commands::config(&config, cli.config.as_deref(), action),
    }
}
