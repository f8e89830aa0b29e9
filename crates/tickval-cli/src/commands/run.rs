use std::path::Path;
use std::sync::Arc;

use tickval_core::{
    BatchConfig, BatchOrchestrator, CancelToken, HttpAnalyzer, ObserverError, ProgressUpdate,
    ResilientStore,
};

use crate::cli::RunArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &RunArgs, cancel: &CancelToken) -> Result<CommandResult, CliError> {
    let mut tickers = args.tickers.clone();
    if let Some(path) = &args.tickers_file {
        tickers.extend(read_ticker_file(path)?);
    }
    if tickers.is_empty() {
        return Err(CliError::Usage(String::from(
            "no tickers given; pass symbols or --tickers-file",
        )));
    }

    let mut config = BatchConfig::from_env()?;
    if let Some(max_concurrent) = args.max_concurrent {
        config = config.with_max_concurrent(max_concurrent);
    }
    if let Some(requests_per_minute) = args.requests_per_minute {
        config = config.with_requests_per_minute(requests_per_minute);
    }

    let store = ResilientStore::from_env(config.store_retry.clone())?;
    let analyzer = Arc::new(HttpAnalyzer::from_env()?);
    tracing::info!(
        backend = %store.kind(),
        tickers = tickers.len(),
        max_concurrent = config.max_concurrent,
        requests_per_minute = config.requests_per_minute,
        "starting batch"
    );

    let orchestrator =
        BatchOrchestrator::new(config, store, analyzer)?.with_observer(Arc::new(log_progress));
    let summary = orchestrator
        .run_with_cancel(&tickers, &args.exchange, args.resume, cancel)
        .await?;

    Ok(CommandResult {
        data: serde_json::to_value(&summary)?,
        failed: summary.has_failures(),
        cancelled: summary.cancelled,
    })
}

fn log_progress(update: &ProgressUpdate) -> Result<(), ObserverError> {
    tracing::debug!(
        ticker = update.ticker.as_deref().unwrap_or("-"),
        step = update.step,
        total = update.total,
        task = %update.task,
        "progress"
    );
    Ok(())
}

fn read_ticker_file(path: &Path) -> Result<Vec<String>, CliError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(parse_ticker_list(&contents))
}

fn parse_ticker_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(|line| line.split_once('#').map_or(line, |(symbols, _)| symbols))
        .flat_map(|line| line.split(|ch: char| ch == ',' || ch.is_whitespace()))
        .filter(|symbol| !symbol.is_empty())
        .map(String::from)
        .collect()
}
