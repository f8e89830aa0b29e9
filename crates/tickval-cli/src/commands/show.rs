use serde::Serialize;

use tickval_core::{
    AnalysisResult, BatchConfig, Exchange, ResilientStore, ResultKey, RetryError, Ticker,
};

use crate::cli::ShowArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct ShowResponseData {
    exchange: String,
    ticker: String,
    found: bool,
    result: Option<AnalysisResult>,
}

pub async fn run(args: &ShowArgs) -> Result<CommandResult, CliError> {
    let key = ResultKey::new(Exchange::parse(&args.exchange)?, Ticker::parse(&args.ticker)?);
    let store = ResilientStore::from_env(BatchConfig::from_env()?.store_retry)?;

    let result = store.get(&key).await.map_err(RetryError::into_inner)?;
    let data = serde_json::to_value(ShowResponseData {
        exchange: key.exchange.to_string(),
        ticker: key.ticker.to_string(),
        found: result.is_some(),
        result,
    })?;
    Ok(CommandResult::ok(data))
}
