mod cli;
mod config;
mod monitoring;
mod notification;
mod output;
mod scheduler;

use std::process::ExitCode;

use clap::Parser;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    ExitCode::from(cli::run(cli).await)
}
