use serde::Serialize;

use tickval_core::{BatchConfig, Exchange, ResilientStore, RetryError};

use crate::cli::CompletedArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct CompletedResponseData {
    exchange: String,
    count: usize,
    tickers: Vec<String>,
}

pub async fn run(args: &CompletedArgs) -> Result<CommandResult, CliError> {
    let exchange = Exchange::parse(&args.exchange)?;
    let store = ResilientStore::from_env(BatchConfig::from_env()?.store_retry)?;

    let completed = store
        .list_completed(&exchange)
        .await
        .map_err(RetryError::into_inner)?;
    let tickers: Vec<String> = completed.iter().map(ToString::to_string).collect();

    let data = serde_json::to_value(CompletedResponseData {
        exchange: exchange.to_string(),
        count: tickers.len(),
        tickers,
    })?;
    Ok(CommandResult::ok(data))
}
