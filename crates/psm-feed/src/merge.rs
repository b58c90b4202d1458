//! Bar buffer merge, truncation, and corporate-action suspicion.

use psm_core::Bar;
use std::collections::BTreeMap;

/// Merges `incoming` bars into `existing` by date (incoming wins on
/// conflict), truncates to the most recent `max_bars`, and reports which
/// dates actually changed value (present in the truncated result).
pub fn merge_bars(existing: &[Bar], incoming: &[Bar], max_bars: usize) -> (Vec<Bar>, Vec<String>) {
    let mut by_date: BTreeMap<String, Bar> = existing.iter().cloned().map(|b| (b.date.clone(), b)).collect();
    let mut changed_dates = Vec::new();

    for bar in incoming {
        let differs = match by_date.get(&bar.date) {
            Some(current) => current != bar,
            None => true,
        };
        if differs {
            changed_dates.push(bar.date.clone());
        }
        by_date.insert(bar.date.clone(), bar.clone());
    }

    let mut merged: Vec<Bar> = by_date.into_values().collect();
    merged.sort_by(|a, b| a.date.cmp(&b.date));
    if merged.len() > max_bars {
        merged = merged.split_off(merged.len() - max_bars);
    }

    let date_set: std::collections::HashSet<&str> = merged.iter().map(|b| b.date.as_str()).collect();
    let mut changed: Vec<String> = changed_dates
        .into_iter()
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .filter(|d| date_set.contains(d.as_str()))
        .collect();
    changed.sort();
    (merged, changed)
}

/// A crude corporate-action heuristic: the last close moved by more than 2x
/// or less than 0.5x versus the previous close, which a plain price move
/// almost never does but an unadjusted split/reverse-split always does.
pub fn detect_corp_action_suspected(bars: &[Bar]) -> bool {
    if bars.len() < 2 {
        return false;
    }
    let prev_close = bars[bars.len() - 2].close;
    let last_close = bars[bars.len() - 1].close;
    if prev_close <= 0.0 {
        return false;
    }
    let ratio = last_close / prev_close;
    !(0.5..=1.5).contains(&ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(date: &str, close: f64) -> Bar {
        Bar { date: date.to_string(), open: close, high: close, low: close, close, volume: 100.0 }
    }

    #[test]
    fn merge_reports_only_changed_dates() {
        let existing = vec![bar("2024-01-01", 10.0), bar("2024-01-02", 11.0)];
        let incoming = vec![bar("2024-01-02", 11.0), bar("2024-01-03", 12.0)];
        let (merged, changed) = merge_bars(&existing, &incoming, 260);
        assert_eq!(merged.len(), 3);
        assert_eq!(changed, vec!["2024-01-03".to_string()]);
    }

    #[test]
    fn merge_truncates_to_max_bars() {
        let existing: Vec<Bar> = (1..=10).map(|i| bar(&format!("2024-01-{:02}", i), i as f64)).collect();
        let (merged, _) = merge_bars(&existing, &[], 5);
        assert_eq!(merged.len(), 5);
        assert_eq!(merged[0].date, "2024-01-06");
    }

    #[test]
    fn detects_suspected_split() {
        let bars = vec![bar("2024-01-01", 100.0), bar("2024-01-02", 48.0)];
        assert!(detect_corp_action_suspected(&bars));
        let bars = vec![bar("2024-01-01", 100.0), bar("2024-01-02", 95.0)];
        assert!(!detect_corp_action_suspected(&bars));
    }
}
