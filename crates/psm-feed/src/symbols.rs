//! Exchange-to-stooq-suffix resolution and symbol candidate building.

/// Exchange code (uppercased) to candidate stooq TLD suffixes, in preference order.
fn exchange_suffixes(exchange: &str) -> &'static [&'static str] {
    match exchange {
        "NYSE" | "NASDAQ" | "AMEX" | "US" => &["us"],
        "LSE" => &["uk", "l"],
        "ETR" | "XETRA" | "XETR" | "FRA" => &["de"],
        "EPA" | "PA" => &["fr"],
        "BIT" | "MI" => &["it"],
        "AMS" => &["nl"],
        "SW" => &["sw"],
        "OSL" | "OSE" => &["ol"],
        "ASX" => &["au"],
        "NSE" => &["in"],
        "TSE" | "TYO" | "JP" => &["jp"],
        "TSX" => &["ca"],
        "HEL" => &["fi"],
        "CPH" => &["dk"],
        "SZ" | "SHE" | "SHA" => &["cn"],
        "SGX" => &["sg"],
        "KRX" => &["kr"],
        "ADX" => &["ae"],
        "EGX" => &["eg"],
        "LAG" => &["ng"],
        "GSE" => &["gh"],
        "KW" => &["kw"],
        _ => &[],
    }
}

fn normalize_symbol(value: &str) -> String {
    value.trim().to_lowercase()
}

fn normalize_exchange(value: &str) -> String {
    value.trim().to_uppercase()
}

/// The stooq symbol a position would use by default: `ticker.suffix`,
/// falling back to `.us` when the exchange has no mapped suffix, or the
/// ticker as-is when it already carries a dot-suffix.
pub fn default_stooq_symbol(ticker: &str, exchange: &str) -> Option<String> {
    let normalized_ticker = normalize_symbol(ticker);
    if normalized_ticker.is_empty() {
        return None;
    }
    if normalized_ticker.contains('.') {
        return Some(normalized_ticker);
    }
    let suffixes = exchange_suffixes(&normalize_exchange(exchange));
    match suffixes.first() {
        Some(suffix) => Some(format!("{normalized_ticker}.{suffix}")),
        None => Some(format!("{normalized_ticker}.us")),
    }
}

/// Ordered, deduplicated list of stooq symbols worth trying for a position:
/// the current symbol first, then the default mapping, then every other
/// suffix for the exchange, then `.us`, then the bare ticker.
pub fn build_stooq_symbol_candidates(ticker: &str, exchange: &str, current_symbol: Option<&str>) -> Vec<String> {
    let normalized_ticker = normalize_symbol(ticker);
    let normalized_exchange = normalize_exchange(exchange);
    let mut candidates: Vec<String> = Vec::new();

    let mut append = |symbol: Option<String>, candidates: &mut Vec<String>| {
        let Some(symbol) = symbol else { return };
        let normalized = normalize_symbol(&symbol);
        if normalized.is_empty() || candidates.contains(&normalized) {
            return;
        }
        candidates.push(normalized);
    };

    append(current_symbol.map(str::to_string), &mut candidates);
    append(default_stooq_symbol(&normalized_ticker, &normalized_exchange), &mut candidates);

    if normalized_ticker.is_empty() {
        return candidates;
    }
    if normalized_ticker.contains('.') {
        append(Some(normalized_ticker), &mut candidates);
        return candidates;
    }

    for suffix in exchange_suffixes(&normalized_exchange) {
        append(Some(format!("{normalized_ticker}.{suffix}")), &mut candidates);
    }
    append(Some(format!("{normalized_ticker}.us")), &mut candidates);
    append(Some(normalized_ticker), &mut candidates);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_symbol_uses_first_mapped_suffix() {
        assert_eq!(default_stooq_symbol("VOD", "LSE").as_deref(), Some("vod.uk"));
        assert_eq!(default_stooq_symbol("AAPL", "NASDAQ").as_deref(), Some("aapl.us"));
        assert_eq!(default_stooq_symbol("XYZ", "UNKNOWN").as_deref(), Some("xyz.us"));
    }

    #[test]
    fn candidates_put_current_symbol_first_and_dedupe() {
        let candidates = build_stooq_symbol_candidates("VOD", "LSE", Some("vod.uk"));
        assert_eq!(candidates[0], "vod.uk");
        assert_eq!(candidates.iter().filter(|c| c.as_str() == "vod.uk").count(), 1);
        assert!(candidates.contains(&"vod.l".to_string()));
        assert!(candidates.contains(&"vod".to_string()));
    }

    #[test]
    fn dotted_ticker_is_used_as_is() {
        let candidates = build_stooq_symbol_candidates("abb.sw", "SW", None);
        assert!(candidates.contains(&"abb.sw".to_string()));
    }
}
