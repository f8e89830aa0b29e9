mod completed;
mod run;
mod show;

use serde_json::Value;
use tickval_core::CancelToken;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// What a command printed and how the process should exit.
pub struct CommandResult {
    pub data: Value,
    pub failed: bool,
    pub cancelled: bool,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            failed: false,
            cancelled: false,
        }
    }
}

pub async fn run(cli: &Cli, cancel: &CancelToken) -> Result<CommandResult, CliError> {
    match &cli.command {
        Command::Run(args) => run::run(args, cancel).await,
        Command::Completed(args) => completed::run(args).await,
        Command::Show(args) => show::run(args).await,
    }
}
