//! # Domain Models
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Ticker`] | Validated, uppercase ticker symbol |
//! | [`Exchange`] | Validated exchange identifier |
//! | [`ResultKey`] | `(exchange, ticker)` storage key |
//! | [`AnalysisResult`] | Persisted outcome of one analysis |

mod result;
mod ticker;

pub use result::{now_rfc3339, AnalysisResult, ResultKey};
pub use ticker::{dedupe_tickers, Exchange, RequestedTicker, Ticker};
