//! Gavel CLI - run, simulate and inspect replicated auctions.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{replay, run, simulate};
use output::OutputFormat;

/// Gavel - Replicated Auction Engine CLI
#[derive(Parser)]
#[command(
    name = "gavel",
    author = "Aezi <aezi.zhu@icloud.com>",
    version = "0.1.0",
    about = "Gavel - Replicated Auction Engine",
    long_about = "CLI tool for running auction replicas, simulating replicated auctions and replaying replica logs.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one replica from configuration
    Run(run::RunArgs),

    /// Simulate an auction across in-memory replicas
    Simulate(simulate::SimulateArgs),

    /// Rebuild a replica's state from a file journal directory
    Replay(replay::ReplayArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let format = cli.output;

    let result = match cli.command {
        Commands::Run(args) => run::execute(args, format).await,
        Commands::Simulate(args) => simulate::execute(args, format).await,
        Commands::Replay(args) => replay::execute(args, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
