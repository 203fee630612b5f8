use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;

#[derive(Parser)]
#[command(name = "lounge")]
#[command(about = "Chat and AI Q&A lounge for any public repository")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Relay channel endpoint
    #[arg(long, global = true, default_value = "ws://127.0.0.1:3001/ws")]
    server: String,

    /// Display name used in the lounge
    #[arg(long, global = true, default_value = "You")]
    name: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a repository's lounge and chat interactively
    Chat(cli::ChatArgs),
    /// Fetch and print a repository summary
    Repo(cli::RepoArgs),
    /// Ask the AI one question about a repository
    Ask(cli::AskArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "lounge_client=debug,repo_intel=debug,info"
    } else {
        // Interactive output owns stdout; keep the log quiet by default.
        "lounge_client=warn,warn"
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .init();

    match cli.command {
        Commands::Chat(args) => cli::chat(&cli.server, &cli.name, args).await,
        Commands::Repo(args) => cli::repo(args).await,
        Commands::Ask(args) => cli::ask(&cli.name, args).await,
    }
}
