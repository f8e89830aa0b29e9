//! CLI argument definitions for tickval.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `run` | Analyze a batch of tickers for one exchange |
//! | `completed` | List tickers with a stored successful result |
//! | `show` | Print the stored result for one ticker |
//!
//! # Examples
//!
//! ```bash
//! # Analyze three tickers, skipping any already completed
//! tickval run AAPL MSFT KO --exchange NYSE --resume
//!
//! # Read the universe from a file, one symbol per line
//! tickval run --tickers-file nyse.txt --exchange NYSE --max-concurrent 8 --pretty
//!
//! # Inspect stored results
//! tickval completed --exchange NYSE
//! tickval show KO --exchange NYSE --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Rate-limited, resumable batch stock valuation.
#[derive(Debug, Parser)]
#[command(
    name = "tickval",
    author,
    version,
    about = "Rate-limited, resumable batch stock valuation",
    long_about = "tickval runs a per-ticker valuation for every symbol of an exchange against \
a rate-limited analysis service and persists each result.\n\
\n\
  • Bounded worker pool with a shared request budget\n\
  • Resume from previously stored successes\n\
  • Local DuckDB results in development, cloud table in production\n\
\n\
Environment: TICKVAL_ENV, TICKVAL_ANALYZER_URL, TICKVAL_STORE_BACKEND, TICKVAL_HOME."
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Analyze a batch of tickers and print the run summary.
    ///
    /// Exits 3 when any ticker failed and 130 when interrupted.
    ///
    /// # Examples
    ///
    ///   tickval run AAPL MSFT --exchange NASDAQ
    ///   tickval run --tickers-file universe.txt --exchange NYSE --resume
    Run(RunArgs),

    /// List tickers whose latest stored result succeeded.
    Completed(CompletedArgs),

    /// Print the stored result for a single ticker.
    Show(ShowArgs),
}

/// Arguments for the `run` command.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Ticker symbols to analyze.
    #[arg(num_args = 0..)]
    pub tickers: Vec<String>,

    /// File with additional tickers, separated by newlines, commas or whitespace.
    ///
    /// Text after `#` on a line is ignored.
    #[arg(long)]
    pub tickers_file: Option<PathBuf>,

    /// Exchange the tickers belong to.
    #[arg(long, short = 'e')]
    pub exchange: String,

    /// Skip tickers that already have a successful stored result.
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    /// Worker pool size (overrides TICKVAL_MAX_CONCURRENT).
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Request budget per minute (overrides TICKVAL_REQUESTS_PER_MINUTE).
    #[arg(long)]
    pub requests_per_minute: Option<u32>,
}

/// Arguments for the `completed` command.
#[derive(Debug, Args)]
pub struct CompletedArgs {
    /// Exchange to list.
    #[arg(long, short = 'e')]
    pub exchange: String,
}

/// Arguments for the `show` command.
#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Ticker symbol.
    pub ticker: String,

    /// Exchange the ticker belongs to.
    #[arg(long, short = 'e')]
    pub exchange: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "tickval",
            "run",
            "AAPL",
            "MSFT",
            "--exchange",
            "NASDAQ",
            "--resume",
            "--max-concurrent",
            "8",
            "--pretty",
        ])
        .expect("valid arguments");

        assert!(cli.pretty);
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.tickers, vec!["AAPL", "MSFT"]);
        assert_eq!(args.exchange, "NASDAQ");
        assert!(args.resume);
        assert_eq!(args.max_concurrent, Some(8));
        assert_eq!(args.requests_per_minute, None);
    }

    #[test]
    fn run_requires_an_exchange() {
        assert!(Cli::try_parse_from(["tickval", "run", "AAPL"]).is_err());
    }

    #[test]
    fn show_takes_ticker_positionally() {
        let cli = Cli::try_parse_from(["tickval", "show", "KO", "-e", "NYSE"]).expect("valid");
        let Command::Show(args) = cli.command else {
            panic!("expected show command");
        };
        assert_eq!(args.ticker, "KO");
        assert_eq!(args.exchange, "NYSE");
    }
}
