//! Legacy-shape migration and post-load invariant enforcement.

use psm_core::{make_key, Bar, Mode, Position, Settings, State, Store};
use serde_json::Value;

enum Shape {
    Current,
    LegacyMap,
    LegacyList,
}

fn detect_shape(raw: &Value) -> Shape {
    if raw.get("positions").is_some() && raw.get("meta").is_some() {
        Shape::Current
    } else if raw.is_array() {
        Shape::LegacyList
    } else {
        Shape::LegacyMap
    }
}

fn legacy_state(raw: &str) -> State {
    match raw {
        "ACTIVE" => State::NormalRun,
        "SPIKE_LOCK" | "SPIKE" => State::SpikeLock,
        "REENTRY_WINDOW" | "REENTRY" => State::ReentryWindow,
        _ => State::ExitedCooldown,
    }
}

fn legacy_bars(raw: &Value) -> Vec<Bar> {
    let Some(buffers) = raw.get("buffers") else { return Vec::new() };
    let as_strs = |key: &str| -> Vec<String> {
        buffers
            .get(key)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };
    let as_floats = |key: &str| -> Vec<f64> {
        buffers
            .get(key)
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default()
    };
    let dates = as_strs("date");
    let opens = as_floats("open");
    let highs = as_floats("high");
    let lows = as_floats("low");
    let closes = as_floats("close");
    let volumes = as_floats("volume");

    (0..dates.len())
        .filter_map(|i| {
            Some(Bar {
                date: dates.get(i)?.clone(),
                open: *opens.get(i)?,
                high: *highs.get(i)?,
                low: *lows.get(i)?,
                close: *closes.get(i)?,
                volume: volumes.get(i).copied().unwrap_or(0.0),
            })
        })
        .collect()
}

fn legacy_position(ticker: &str, exchange: &str, raw: &Value) -> Position {
    let mut position = Position::new(ticker, exchange);
    let state = raw.get("state").and_then(Value::as_str).map(legacy_state);
    let entry = raw.get("entry").and_then(Value::as_f64);
    let hwm = raw.get("hwm").and_then(Value::as_f64);

    position.mode = if entry.is_some() { Mode::Owned } else { Mode::Watch };
    position.state = state.unwrap_or(State::ExitedCooldown);
    position.execution.entry_price = entry;
    position.runtime.hwm_close = hwm;
    position.buffers.ohlc = legacy_bars(raw);
    position
}

fn migrate_legacy_map(raw: &serde_json::Map<String, Value>) -> Store {
    let mut store = Store::empty();
    for (ticker, position_raw) in raw {
        let exchange = position_raw
            .get("exchange")
            .and_then(Value::as_str)
            .unwrap_or("US");
        let key = make_key(ticker, exchange);
        store.positions.insert(key, legacy_position(ticker, exchange, position_raw));
    }
    store
}

fn migrate_legacy_list(raw: &[Value]) -> Store {
    let mut store = Store::empty();
    for position_raw in raw {
        let Some(ticker) = position_raw.get("ticker").and_then(Value::as_str) else { continue };
        let exchange = position_raw.get("exchange").and_then(Value::as_str).unwrap_or("US");
        let key = make_key(ticker, exchange);
        store.positions.insert(key, legacy_position(ticker, exchange, position_raw));
    }
    store
}

fn migrate_current(raw: Value) -> Store {
    let mut store: Store = serde_json::from_value(raw.clone()).unwrap_or_else(|_| Store::empty());
    if let Some(global_raw) = raw.get("global") {
        store.global = Settings::merged_over_defaults(global_raw);
    }
    store
}

/// Dedup by date, sort ascending, and right-truncate a position's buffer.
fn normalize_buffer(bars: &mut Vec<Bar>, max_bars: usize) {
    use std::collections::BTreeMap;
    let by_date: BTreeMap<String, Bar> = bars.drain(..).map(|b| (b.date.clone(), b)).collect();
    *bars = by_date.into_values().collect();
    if bars.len() > max_bars {
        let drop = bars.len() - max_bars;
        bars.drain(0..drop);
    }
}

/// Re-establishes the `# 3` invariants after migration: mode/state coercion,
/// buffer dedup/sort/truncate, and the `psm_v4` schema tag.
pub fn reestablish_invariants(store: &mut Store) {
    let max_bars = store.global.bars_buffer_max;
    for position in store.positions.values_mut() {
        if position.mode == Mode::Owned {
            if !matches!(position.state, State::NormalRun | State::SpikeLock) {
                position.state = State::NormalRun;
            }
            if position.execution.entry_price.is_none() {
                position.mode = Mode::Watch;
                position.state = State::ExitedCooldown;
            }
        }
        if position.mode == Mode::Watch && !matches!(position.state, State::ExitedCooldown | State::ReentryWindow) {
            position.state = State::ExitedCooldown;
        }
        normalize_buffer(&mut position.buffers.ohlc, max_bars);
    }
    store.meta.schema_version = psm_core::SCHEMA_VERSION.to_string();
}

/// Parses a raw JSON document of any recognized shape into a canonical,
/// invariant-satisfying `Store`.
pub fn migrate(raw: Value) -> Store {
    let mut store = match detect_shape(&raw) {
        Shape::Current => migrate_current(raw),
        Shape::LegacyMap => migrate_legacy_map(raw.as_object().expect("checked by detect_shape")),
        Shape::LegacyList => migrate_legacy_list(raw.as_array().expect("checked by detect_shape")),
    };
    reestablish_invariants(&mut store);
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn migrates_legacy_flat_map_with_active_state() {
        let raw = json!({
            "ACME": {
                "exchange": "US",
                "state": "ACTIVE",
                "entry": 100.0,
                "hwm": 110.0,
                "buffers": {
                    "date": ["2024-01-01", "2024-01-02"],
                    "open": [10.0, 11.0],
                    "high": [11.0, 12.0],
                    "low": [9.0, 10.0],
                    "close": [10.5, 11.5],
                    "volume": [1000.0, 1200.0]
                }
            }
        });
        let store = migrate(raw);
        let position = store.positions.get("ACME:US").unwrap();
        assert_eq!(position.mode, Mode::Owned);
        assert_eq!(position.state, State::NormalRun);
        assert_eq!(position.buffers.ohlc.len(), 2);
    }

    #[test]
    fn owned_without_entry_price_is_demoted_to_watch() {
        let raw = json!({
            "ACME": {
                "exchange": "US",
                "state": "ACTIVE"
            }
        });
        let store = migrate(raw);
        let position = store.positions.get("ACME:US").unwrap();
        assert_eq!(position.mode, Mode::Watch);
        assert_eq!(position.state, State::ExitedCooldown);
    }
}
