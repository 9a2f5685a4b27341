//! ecofed command-line entry point.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ecofed::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;

/// ecofed: natural-language queries over federated environmental data
#[derive(Parser, Debug)]
#[command(name = "ecofed")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API (default)
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Emit logs as JSON
        #[arg(long)]
        json_logs: bool,
    },
    /// Answer a natural-language question
    Query {
        /// The question, e.g. "average temperature in Amazon Basin"
        text: String,
        /// Role to ask as (researcher, data_provider, administrator)
        #[arg(short, long)]
        role: Option<String>,
    },
    /// Show how a question is interpreted without querying any store
    Interpret {
        text: String,
        #[arg(short, long)]
        role: Option<String>,
    },
    /// Check connectivity of every configured store
    Status,
    /// List catalog entities and fields
    Catalog,
}

fn init_logging(serve: bool, json_logs: bool) {
    if !serve {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(std::io::stderr)
            .init();
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Serve {
        port: None,
        json_logs: false,
    });
    match &command {
        Command::Serve { json_logs, .. } => init_logging(true, *json_logs),
        _ => init_logging(false, false),
    }

    let config = Config::load_from(args.config.as_deref())?;

    match command {
        Command::Serve { port, .. } => {
            tracing::info!("Starting ecofed v{}", env!("CARGO_PKG_VERSION"));
            cli::run_serve(config, port).await
        }
        Command::Query { text, role } => cli::run_query(config, text, role, args.json).await,
        Command::Interpret { text, role } => {
            cli::run_interpret(config, text, role, args.json).await
        }
        Command::Status => cli::run_status(config, args.json).await,
        Command::Catalog => cli::run_catalog(config, args.json).await,
    }
}
