//! Pluggable fetch contracts. The HTTP adapter that actually talks to
//! stooq (or any other data source) lives outside this crate; these traits
//! are the seam it plugs into.

use psm_core::Bar;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("fetch failed for {symbol}: {message}")]
    Fetch { symbol: String, message: String },
}

/// Fetches up to `n_days` of daily history for one symbol.
pub trait BarFetcher {
    fn fetch(&self, symbol: &str, n_days: u32) -> Result<Vec<Bar>, FeedError>;
}

/// Fetches the latest quote for a batch of symbols in as few round trips
/// as `batch_size` allows. Returns bars keyed by lower-cased symbol plus
/// the list of symbols that failed outright.
pub trait QuoteFetcher {
    fn fetch_latest(
        &self,
        symbols: &[String],
        batch_size: usize,
    ) -> (std::collections::HashMap<String, Bar>, Vec<String>);
}
