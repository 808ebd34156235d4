//! mcp-toolbox: MCP server that opens groups of downstream servers on demand
//!
//! Speaks MCP over stdio. Clients see two tools, `open_toolbox` and `use_tool`;
//! everything else lives in the downstream servers named by the configuration.

mod handler;
mod listing;
mod protocol;
mod server;

#[cfg(test)]
mod test_support;

use anyhow::Result;
use clap::{Parser, Subcommand};
use handler::ToolboxHandler;
use std::path::PathBuf;
use std::sync::Arc;
use toolbox_core::{ConnectionPool, ToolboxesConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "mcp-toolbox")]
#[command(about = "Serve groups of MCP servers as on-demand toolboxes", version)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (default: <config dir>/mcp-toolbox/config.json)
    #[arg(short, long, global = true, env = "MCP_TOOLBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve MCP over stdin/stdout (default)
    Serve,

    /// Print the configured toolboxes
    List,

    /// Validate the configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries the protocol, so logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let path = match cli.config {
        Some(path) => path,
        None => ToolboxesConfig::default_path()?,
    };
    let config = ToolboxesConfig::load(&path)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!("loaded {} toolbox(es) from {}", config.toolboxes().len(), path.display());
            let code = match serve(config).await {
                Ok(()) => 0,
                Err(e) => {
                    error!("{:#}", e);
                    1
                }
            };
            // A blocking stdin read would otherwise hold up runtime teardown
            std::process::exit(code);
        }
        Commands::List => {
            print!("{}", listing::render_instructions(&config.summaries()));
            Ok(())
        }
        Commands::Check => {
            let servers: usize = config.toolboxes().iter().map(|t| t.servers.len()).sum();
            println!(
                "{}: {} toolbox(es), {} server(s)",
                path.display(),
                config.toolboxes().len(),
                servers
            );
            Ok(())
        }
    }
}

async fn serve(config: ToolboxesConfig) -> Result<()> {
    let pool = Arc::new(ConnectionPool::new(Arc::new(config)));
    let handler = Arc::new(ToolboxHandler::new(Arc::clone(&pool)));

    let result = tokio::select! {
        result = server::serve(handler, tokio::io::stdin(), tokio::io::stdout()) => {
            info!("stdin closed");
            result
        }
        signal = shutdown_signal() => {
            info!("received {}, shutting down", signal);
            Ok(())
        }
    };

    pool.shutdown().await;
    info!("shutdown complete");
    result
}

async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = term.recv() => "SIGTERM",
            },
            Err(e) => {
                warn!("cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl-C"
    }
}
