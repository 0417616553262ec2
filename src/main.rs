mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run(args) => commands::run(&args.usernames).await,
        Commands::Scan(args) => commands::scan(&args.usernames).await,
        Commands::Status(args) => commands::status(&args.endpoint).await,
    };

    ExitCode::from(code as u8)
}
