use std::process::ExitCode;

use clap::Parser;
use deskchat::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    // Stdout carries chat output only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    match cli::run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "deskchat failed");
            ExitCode::FAILURE
        }
    }
}
