mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use mnemos::config::MnemosConfig;
use mnemos::memory::audit::{AuditFilter, AuditOperation};
use mnemos::memory::types::Tier;

#[derive(Parser)]
#[command(name = "mnemos", version, about = "Tiered memory MCP server for AI agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server
    Serve {
        /// Overrides `server.transport` from the config
        #[arg(long, value_enum)]
        transport: Option<Transport>,
    },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Show memory statistics
    Stats {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long = "tier", value_parser = parse_tier)]
        tiers: Vec<Tier>,
    },
    /// Delete expired short- and medium-term memories now
    Sweep {
        /// Count what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Search memories
    Search {
        query: String,
        #[arg(long)]
        top_k: Option<i64>,
        #[arg(long = "tier", value_parser = parse_tier)]
        tiers: Vec<Tier>,
    },
    /// Show the audit log, newest first
    Audit {
        #[arg(long)]
        record: Option<String>,
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, value_parser = parse_operation)]
        operation: Option<AuditOperation>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Check database health
    Doctor,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.mnemos/models/
    Download,
}

fn parse_tier(s: &str) -> Result<Tier, String> {
    s.parse()
}

fn parse_operation(s: &str) -> Result<AuditOperation, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let config = MnemosConfig::load()?;

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { transport } => {
            let transport = match transport {
                Some(t) => t,
                None => match config.server.transport.as_str() {
                    "stdio" => Transport::Stdio,
                    "http" | "sse" => Transport::Http,
                    other => anyhow::bail!("unknown server.transport: {other}"),
                },
            };
            match transport {
                Transport::Stdio => mnemos::server::serve_stdio(config).await?,
                Transport::Http => mnemos::server::serve_http(config).await?,
            }
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
        Command::Stats { owner, tiers } => {
            cli::stats::stats(&config, owner, tiers).await?;
        }
        Command::Sweep { dry_run } => {
            cli::sweep::sweep(&config, dry_run).await?;
        }
        Command::Search { query, top_k, tiers } => {
            cli::search::search(&config, &query, top_k, tiers).await?;
        }
        Command::Audit {
            record,
            owner,
            operation,
            limit,
        } => {
            let filter = AuditFilter {
                record_id: record,
                owner_id: owner,
                operation,
                limit: Some(limit),
            };
            cli::audit::audit(&config, filter).await?;
        }
        Command::Doctor => {
            cli::doctor::doctor(&config)?;
        }
    }

    Ok(())
}
