pub mod merge;
pub mod stooq;
pub mod symbols;
pub mod traits;

pub use merge::{detect_corp_action_suspected, merge_bars};
pub use stooq::{parse_history_csv, parse_quotes_csv, Quote};
pub use symbols::{build_stooq_symbol_candidates, default_stooq_symbol};
pub use traits::{BarFetcher, FeedError, QuoteFetcher};
