use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "autopost")]
#[command(about = "Automated media analysis and posting", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run continuous monitoring and posting
    Run(RunArgs),
    /// Run a single scan-and-drain pass, then exit
    Scan(ScanArgs),
    /// Show the status of a running instance
    Status(StatusArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Usernames to manage (each corresponds to a folder under the input root)
    #[arg(required = true)]
    pub usernames: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct ScanArgs {
    /// Usernames to scan
    #[arg(required = true)]
    pub usernames: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct StatusArgs {
    /// Base URL of the health endpoint
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub endpoint: String,
}
