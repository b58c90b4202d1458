//! Stooq-style CSV parsing. Parsing the response body is the only part of
//! this contract owned here — issuing the HTTP request is an adapter's job.

use psm_core::Bar;

const MISSING_MARKERS: [&str; 3] = ["", "N/D", "-"];

fn value_present(raw: &str) -> bool {
    !MISSING_MARKERS.contains(&raw.trim().to_uppercase().as_str())
}

fn parse_date(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("n/d") {
        return None;
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"] {
        if let Ok(d) = chrono::NaiveDate::parse_from_str(value, fmt) {
            return Some(d.format("%Y-%m-%d").to_string());
        }
    }
    if value.contains('T') {
        let cleaned = value.replace('Z', "+00:00");
        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(&cleaned) {
            return Some(dt.format("%Y-%m-%d").to_string());
        }
    }
    if value.contains(' ') {
        for fmt in ["%Y-%m-%d %H:%M:%S", "%m/%d/%Y %H:%M:%S"] {
            if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(value, fmt) {
                return Some(dt.format("%Y-%m-%d").to_string());
            }
        }
    }
    None
}

fn to_float(raw: &str) -> Option<f64> {
    let value = raw.trim();
    if !value_present(value) {
        return Some(0.0);
    }
    value.parse::<f64>().ok()
}

/// Parses a stooq daily-history CSV (`Date,Open,High,Low,Close,Volume`),
/// ascending by date. Rows with a missing date or close are dropped.
pub fn parse_history_csv(csv_text: &str) -> Vec<Bar> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(csv_text.as_bytes());
    let headers = match reader.headers() {
        Ok(h) => h.clone(),
        Err(_) => return Vec::new(),
    };
    let idx = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let (Some(date_i), Some(open_i), Some(high_i), Some(low_i), Some(close_i)) =
        (idx("date"), idx("open"), idx("high"), idx("low"), idx("close"))
    else {
        return Vec::new();
    };
    let volume_i = idx("volume");

    let mut bars = Vec::new();
    for record in reader.records().flatten() {
        let Some(raw_date) = record.get(date_i) else { continue };
        let Some(raw_close) = record.get(close_i) else { continue };
        if !value_present(raw_date) || !value_present(raw_close) {
            continue;
        }
        let Some(date) = parse_date(raw_date) else { continue };
        let (Some(open), Some(high), Some(low), Some(close)) = (
            record.get(open_i).and_then(to_float),
            record.get(high_i).and_then(to_float),
            record.get(low_i).and_then(to_float),
            to_float(raw_close),
        ) else {
            continue;
        };
        let volume = volume_i
            .and_then(|i| record.get(i))
            .and_then(to_float)
            .unwrap_or(0.0);
        bars.push(Bar { date, open, high, low, close, volume });
    }
    bars.sort_by(|a, b| a.date.cmp(&b.date));
    bars
}

/// A quote row: a bar plus the lower-cased symbol it belongs to.
#[derive(Debug, Clone)]
pub struct Quote {
    pub symbol: String,
    pub bar: Bar,
}

/// Parses a batched stooq quotes CSV (`Symbol,Date,Open,High,Low,Close,Volume`).
/// Symbols are lower-cased; if a symbol appears more than once, the latest
/// date wins.
pub fn parse_quotes_csv(csv_text: &str) -> Vec<Quote> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(csv_text.as_bytes());
    let headers = match reader.headers() {
        Ok(h) => h.clone(),
        Err(_) => return Vec::new(),
    };
    let idx = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let (Some(symbol_i), Some(date_i), Some(open_i), Some(high_i), Some(low_i), Some(close_i)) = (
        idx("symbol"),
        idx("date"),
        idx("open"),
        idx("high"),
        idx("low"),
        idx("close"),
    ) else {
        return Vec::new();
    };
    let volume_i = idx("volume");

    let mut latest: std::collections::BTreeMap<String, Quote> = std::collections::BTreeMap::new();
    for record in reader.records().flatten() {
        let (Some(raw_symbol), Some(raw_date), Some(raw_close)) =
            (record.get(symbol_i), record.get(date_i), record.get(close_i))
        else {
            continue;
        };
        if !value_present(raw_symbol) || !value_present(raw_date) || !value_present(raw_close) {
            continue;
        }
        let Some(date) = parse_date(raw_date) else { continue };
        let (Some(open), Some(high), Some(low), Some(close)) = (
            record.get(open_i).and_then(to_float),
            record.get(high_i).and_then(to_float),
            record.get(low_i).and_then(to_float),
            to_float(raw_close),
        ) else {
            continue;
        };
        let volume = volume_i
            .and_then(|i| record.get(i))
            .and_then(to_float)
            .unwrap_or(0.0);
        let symbol = raw_symbol.trim().to_lowercase();
        let bar = Bar { date, open, high, low, close, volume };
        match latest.get(&symbol) {
            Some(existing) if existing.bar.date >= bar.date => {}
            _ => {
                latest.insert(symbol.clone(), Quote { symbol, bar });
            }
        }
    }
    latest.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_history_csv_skipping_missing_rows() {
        let csv_text = "Date,Open,High,Low,Close,Volume\n2024-01-02,10,11,9,10.5,1000\n2024-01-03,N/D,N/D,N/D,N/D,0\n";
        let bars = parse_history_csv(csv_text);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].date, "2024-01-02");
    }

    #[test]
    fn parses_us_date_format() {
        let csv_text = "Date,Open,High,Low,Close,Volume\n01/02/2024,10,11,9,10.5,1000\n";
        let bars = parse_history_csv(csv_text);
        assert_eq!(bars[0].date, "2024-01-02");
    }

    #[test]
    fn quotes_csv_keeps_latest_per_symbol() {
        let csv_text = "Symbol,Date,Open,High,Low,Close,Volume\nAAPL,2024-01-02,10,11,9,10.5,1000\naapl,2024-01-03,11,12,10,11.5,1200\n";
        let quotes = parse_quotes_csv(csv_text);
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].bar.date, "2024-01-03");
    }
}
