mod cli;
mod commands;
mod error;
mod logging;
mod output;

use clap::Parser;
use std::process::ExitCode;

use tickval_core::{CancelToken, DeploymentEnv};

use crate::cli::Cli;
use crate::error::CliError;

const EXIT_FAILED_TICKERS: u8 = 3;
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(error = %error, exit_code = error.exit_code(), "command failed");
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();
    logging::init(DeploymentEnv::from_env()?);

    let cancel = CancelToken::new();
    cancel_on_interrupt(cancel.clone());

    let result = commands::run(&cli, &cancel).await?;
    output::render(&result.data, cli.pretty)?;

    if result.cancelled {
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }
    if result.failed {
        return Ok(ExitCode::from(EXIT_FAILED_TICKERS));
    }
    Ok(ExitCode::SUCCESS)
}

fn cancel_on_interrupt(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            cancel.cancel();
        }
    });
}
