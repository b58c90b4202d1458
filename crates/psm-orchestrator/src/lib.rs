//! Daily run wiring: for each position, resolve a feed symbol, fetch and
//! merge bars, then drive indicators → levels → anomaly → state machine
//! over every new bar date.

use psm_core::{
    AnomalyEvent, AnomalySeverity, Bar, DailyRunResult, DecisionOfDay, Position, ReasonCode,
    Settings, Store,
};
use psm_feed::{BarFetcher, QuoteFetcher};

/// One symbol's fetch outcome before merging: either fresh bars, or the
/// reason nothing could be fetched.
enum FetchOutcome {
    Bars(Vec<Bar>),
    Failed,
}

fn resolve_symbol_and_fetch(
    candidates: &[String],
    quote_fetcher: &dyn QuoteFetcher,
    bar_fetcher: &dyn BarFetcher,
    n_days: u32,
) -> (Option<String>, FetchOutcome) {
    let (bars_by_symbol, _failed) = quote_fetcher.fetch_latest(candidates, 1);
    for candidate in candidates {
        if let Some(bar) = bars_by_symbol.get(candidate) {
            return (Some(candidate.clone()), FetchOutcome::Bars(vec![bar.clone()]));
        }
    }
    for candidate in candidates {
        if let Ok(bars) = bar_fetcher.fetch(candidate, n_days) {
            if !bars.is_empty() {
                return (Some(candidate.clone()), FetchOutcome::Bars(bars));
            }
        }
    }
    (None, FetchOutcome::Failed)
}

fn no_op_decision(position: &Position, key: &str, code: ReasonCode, text: &str) -> DecisionOfDay {
    use psm_core::{ActionPayload, ActionType, ReasonPayload, Transitions, Trigger};
    let action_type = if position.mode == psm_core::Mode::Owned {
        ActionType::Hold
    } else {
        ActionType::Wait
    };
    DecisionOfDay {
        schema: DecisionOfDay::SCHEMA.to_string(),
        bar_date: position
            .runtime
            .last_processed_bar_date
            .clone()
            .unwrap_or_else(|| "".to_string()),
        key: key.to_string(),
        symbol: position.identity.ticker.clone(),
        mode: position.mode,
        state_before: position.state,
        state_after: position.state,
        action: ActionPayload::simple(action_type),
        reason: ReasonPayload { code, text: text.to_string() },
        levels: position.computed.clone(),
        targets: serde_json::to_value(&position.targets).unwrap_or(serde_json::Value::Null),
        kpi: position.thesis_kpis.clone(),
        transitions: Transitions { triggered: false, trigger: Trigger::None },
    }
}

/// Advances one position through every new bar date found after merging,
/// returning that position's final decision and the last anomaly event (if
/// any anomaly fired on any of the new dates).
fn advance_position(
    position: &mut Position,
    key: &str,
    incoming: Vec<Bar>,
    bar_fetcher: &dyn BarFetcher,
    vix_close: Option<f64>,
    settings: &Settings,
) -> (DecisionOfDay, Option<AnomalyEvent>) {
    let (merged, changed_dates) = psm_feed::merge_bars(&position.buffers.ohlc, &incoming, settings.bars_buffer_max);
    let last_processed = position.runtime.last_processed_bar_date.clone();
    let was_suspected = psm_feed::detect_corp_action_suspected(&merged);

    let (buffer, mut new_dates) = if was_suspected {
        let symbol = position
            .identity
            .stooq_symbol
            .clone()
            .unwrap_or_else(|| position.identity.ticker.clone());
        tracing::warn!(symbol = %symbol, "corporate action suspected, rebuilding buffer from full history");

        let rebuilt = bar_fetcher
            .fetch(&symbol, settings.stooq_fallback_days)
            .ok()
            .filter(|bars| !bars.is_empty())
            .map(|fresh| psm_feed::merge_bars(&[], &fresh, settings.bars_buffer_max).0);

        match rebuilt {
            Some(rebuilt_bars) => {
                let rebuilt_dates: Vec<String> = rebuilt_bars
                    .iter()
                    .map(|b| b.date.clone())
                    .filter(|d| last_processed.as_deref().map(|lp| d.as_str() > lp).unwrap_or(true))
                    .collect();
                (rebuilt_bars, rebuilt_dates)
            }
            None => (merged, Vec::new()),
        }
    } else {
        let new_dates: Vec<String> = changed_dates
            .into_iter()
            .filter(|d| last_processed.as_deref().map(|lp| d.as_str() > lp).unwrap_or(true))
            .collect();
        (merged, new_dates)
    };
    new_dates.sort();
    position.buffers.ohlc = buffer;

    if new_dates.is_empty() {
        let (code, text) = if was_suspected {
            (ReasonCode::DataSuspected, "Corporate action suspected and rebuild yielded no new bar date.")
        } else {
            (ReasonCode::NoNewBar, "No new bar for this symbol.")
        };
        return (no_op_decision(position, key, code, text), None);
    }

    let mut last_decision = None;
    let mut last_anomaly = None;

    for date in &new_dates {
        let Some(cutoff) = position.buffers.ohlc.iter().position(|b| &b.date == date) else { continue };
        let bars_up_to_date = &position.buffers.ohlc[..=cutoff];

        let indicators = psm_indicators::compute_indicator_snapshot(bars_up_to_date, settings);
        let levels = psm_levels::compute_levels(
            position.mode,
            position.state,
            &position.targets,
            position.execution.entry_price,
            position.runtime.hwm_close,
            position.runtime.hwm_at_exit,
            position.runtime.warn_count,
            &indicators,
            vix_close,
            settings,
        );

        let metrics = psm_anomaly::build_metrics(bars_up_to_date, &indicators, settings);
        if let Some((code, severity, text)) = psm_anomaly::classify(&metrics, settings) {
            last_anomaly = Some(AnomalyEvent {
                schema: AnomalyEvent::SCHEMA.to_string(),
                bar_date: date.clone(),
                key: key.to_string(),
                symbol: position.identity.ticker.clone(),
                code,
                severity,
                metrics: serde_json::to_value(&metrics).unwrap_or(serde_json::Value::Null),
                text: text.to_string(),
            });
        }

        let decision = psm_state_machine::advance(position, key, bars_up_to_date, date, &indicators, &levels, settings);
        last_decision = Some(decision);
    }

    (last_decision.expect("new_dates non-empty implies at least one decision"), last_anomaly)
}

/// Runs every tracked position once: resolves its feed symbol, fetches and
/// merges bars, and advances its state machine over every new bar date.
/// Per-symbol failures never abort the run; they become a
/// `DATA_FETCH_ERROR` decision for that symbol.
pub fn run_daily(
    store: &mut Store,
    quote_fetcher: &dyn QuoteFetcher,
    bar_fetcher: &dyn BarFetcher,
    vix_close: Option<f64>,
    now_utc_iso: &str,
) -> DailyRunResult {
    let settings = store.global.clone();
    let mut decisions = Vec::new();
    let mut anomaly_events = Vec::new();
    let mut asof_bar_date: Option<String> = None;

    let keys: Vec<String> = store.positions.keys().cloned().collect();
    for key in keys {
        let position = store.positions.get_mut(&key).expect("key came from this store's keys");
        let candidates = psm_feed::build_stooq_symbol_candidates(
            &position.identity.ticker,
            &position.identity.exchange,
            position.identity.stooq_symbol.as_deref(),
        );

        let fetch_days = if position.buffers.ohlc.is_empty() {
            settings.stooq_seed_days
        } else {
            settings.stooq_fetch_days
        };

        let (resolved_symbol, outcome) = resolve_symbol_and_fetch(&candidates, quote_fetcher, bar_fetcher, fetch_days);
        if let Some(symbol) = resolved_symbol {
            position.identity.stooq_symbol = Some(symbol);
        }

        let decision = match outcome {
            FetchOutcome::Failed => no_op_decision(position, &key, ReasonCode::DataFetchError, "All candidate symbols failed to fetch."),
            FetchOutcome::Bars(incoming) => {
                let (decision, anomaly) = advance_position(position, &key, incoming, bar_fetcher, vix_close, &settings);
                if let Some(event) = anomaly {
                    anomaly_events.push(event);
                }
                decision
            }
        };

        if !decision.bar_date.is_empty() {
            asof_bar_date = Some(match asof_bar_date {
                Some(current) if current >= decision.bar_date => current,
                _ => decision.bar_date.clone(),
            });
        }
        decisions.push(decision);
    }

    let asof = asof_bar_date.unwrap_or_default();
    store.touch_meta(&asof, now_utc_iso);

    psm_notify::build_report_payload(&asof, decisions, anomaly_events)
}

/// Ad-hoc single-ticker run: ensures the position exists, then runs the
/// same fetch/merge/advance pipeline for just that symbol.
pub fn run_for_ticker(
    store: &mut Store,
    ticker: &str,
    exchange: &str,
    quote_fetcher: &dyn QuoteFetcher,
    bar_fetcher: &dyn BarFetcher,
    vix_close: Option<f64>,
    now_utc_iso: &str,
) -> DecisionOfDay {
    let settings = store.global.clone();
    let key = psm_core::make_key(ticker, exchange);
    store.ensure_position(&key, ticker, exchange);
    let position = store.positions.get_mut(&key).expect("just ensured");

    let candidates = psm_feed::build_stooq_symbol_candidates(
        &position.identity.ticker,
        &position.identity.exchange,
        position.identity.stooq_symbol.as_deref(),
    );
    let fetch_days = if position.buffers.ohlc.is_empty() {
        settings.stooq_seed_days
    } else {
        settings.stooq_fetch_days
    };
    let (resolved_symbol, outcome) = resolve_symbol_and_fetch(&candidates, quote_fetcher, bar_fetcher, fetch_days);
    if let Some(symbol) = resolved_symbol {
        position.identity.stooq_symbol = Some(symbol);
    }

    let decision = match outcome {
        FetchOutcome::Failed => no_op_decision(position, &key, ReasonCode::DataFetchError, "All candidate symbols failed to fetch."),
        FetchOutcome::Bars(incoming) => advance_position(position, &key, incoming, bar_fetcher, vix_close, &settings).0,
    };

    if !decision.bar_date.is_empty() {
        store.touch_meta(&decision.bar_date, now_utc_iso);
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StubQuotes;
    impl QuoteFetcher for StubQuotes {
        fn fetch_latest(&self, _symbols: &[String], _batch_size: usize) -> (HashMap<String, Bar>, Vec<String>) {
            (HashMap::new(), Vec::new())
        }
    }

    struct StubBars {
        bars: Vec<Bar>,
    }
    impl BarFetcher for StubBars {
        fn fetch(&self, _symbol: &str, _n_days: u32) -> Result<Vec<Bar>, psm_feed::FeedError> {
            Ok(self.bars.clone())
        }
    }

    fn bar(date: &str, close: f64) -> Bar {
        Bar { date: date.to_string(), open: close, high: close + 1.0, low: close - 1.0, close, volume: 1000.0 }
    }

    #[test]
    fn new_position_gets_first_decision_from_seeded_history() {
        let mut store = Store::empty();
        let bars: Vec<Bar> = (1..=30).map(|i| bar(&format!("2024-01-{:02}", i), 100.0 + i as f64)).collect();
        let quotes = StubQuotes;
        let fetcher = StubBars { bars };
        let decision = run_for_ticker(&mut store, "ACME", "US", &quotes, &fetcher, None, "2024-02-01T00:00:00Z");
        assert_eq!(decision.symbol, "ACME");
        assert!(!decision.bar_date.is_empty());
    }
}
