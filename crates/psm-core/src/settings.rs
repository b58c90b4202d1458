use serde::{Deserialize, Serialize};

/// Every tunable the core reads, deep-merged over these defaults whenever a
/// store is loaded so unknown keys in older blobs survive and missing keys
/// are filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Indicators
    pub atr_period: u32,
    pub atr_daily_to_weekly: f64,
    pub sma50_period: u32,
    pub sma200_period: u32,
    pub sma200_slope_lookback: u32,
    pub entry_atr_min_period: u32,
    pub entry_z20_window: u32,
    pub entry_z20_min_window: u32,
    pub entry_z20_threshold: f64,
    pub entry_overheat_upstreak: u32,
    pub entry_overheat_r3_pct: f64,

    // Spike / regime
    pub spike_mult: f64,
    pub spike_lock_sessions: u32,
    pub spike_sell_pct_first: f64,
    pub spike_sell_pct_low: f64,
    pub spike_sell_pct_mid: f64,
    pub spike_sell_pct_high: f64,
    pub spike_sell_pnl_mid_pct: f64,
    pub spike_sell_pnl_high_pct: f64,
    pub vix_symbol: String,
    pub vix_mid_threshold: f64,
    pub vix_high_threshold: f64,
    pub vix_mid_regime_mult: f64,
    pub vix_high_regime_mult: f64,

    // Exit / cooldown
    pub cooldown_sessions: u32,
    pub trend_break_buffer_pct: f64,
    pub catastrophe_floor_pct: f64,
    pub bear_total_floor_pct: f64,
    pub profit_at_base_pct: f64,
    pub profit_at_bull_pct: f64,
    pub warn_sell_pct: f64,

    // Re-entry
    pub reentry_window_sessions: u32,
    pub reentry_pullback_min_atrw: f64,
    pub reentry_pullback_max_atrw: f64,
    pub reentry_position_pct: f64,

    // Entry MVP
    pub entry_mvp_enabled: bool,
    pub entry_mode_default: String,
    pub entry_setup_metric: String,
    pub entry_min_price: f64,
    pub entry_time_stop_days: u32,
    pub entry_sizing_atr_mult: f64,
    pub entry_cat_stop_atr_mult: f64,
    pub entry_risk_per_trade_pct: f64,
    pub entry_capital_base: Option<f64>,

    // Anomaly detector
    pub anomaly_fixed_daily_drop_threshold_pct: f64,
    pub anomaly_multiday_drop_focus_enabled: bool,
    pub anomaly_multiday_min_down_days: u32,
    pub anomaly_multiday_min_3d_pct: f64,
    pub anomaly_multiday_min_5d_pct: f64,
    pub anomaly_multiday_min_ratio: f64,
    pub anomaly_extreme_drawdown_atr_threshold: f64,
    pub anomaly_extreme_multiday_ratio: f64,
    pub anomaly_abnormal_drawdown_atr_threshold: f64,
    pub anomaly_abnormal_multiday_ratio: f64,
    pub anomaly_sma_fallback_min_window: u32,
    pub anomaly_momentum_short_roc_threshold: f64,
    pub anomaly_momentum_long_roc_threshold: f64,
    pub anomaly_trend_slope_threshold: f64,
    pub anomaly_trend_drawdown_min_atr: f64,
    pub anomaly_recent_trend_sigma_threshold: f64,
    pub anomaly_recent_trend_consistent_days: u32,
    pub anomaly_std_pullback_sigma_threshold: f64,
    pub anomaly_std_window: u32,
    pub anomaly_std_min_window: u32,
    pub anomaly_drawdown_lookback: u32,
    pub anomaly_drawdown_min_lookback: u32,
    pub anomaly_multiday_avg_window: u32,
    pub anomaly_roc_short_period: u32,
    pub anomaly_roc_long_period: u32,

    // Buffers / feed
    pub bars_buffer_max: usize,
    pub stooq_fetch_days: u32,
    pub stooq_seed_days: u32,
    pub stooq_fallback_days: u32,
    pub stooq_quotes_batch_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            atr_period: 14,
            atr_daily_to_weekly: 2.2,
            sma50_period: 50,
            sma200_period: 200,
            sma200_slope_lookback: 20,
            entry_atr_min_period: 5,
            entry_z20_window: 20,
            entry_z20_min_window: 10,
            entry_z20_threshold: -1.5,
            entry_overheat_upstreak: 5,
            entry_overheat_r3_pct: 12.0,

            spike_mult: 2.5,
            spike_lock_sessions: 10,
            spike_sell_pct_first: 0.25,
            spike_sell_pct_low: 0.20,
            spike_sell_pct_mid: 0.25,
            spike_sell_pct_high: 0.30,
            spike_sell_pnl_mid_pct: 20.0,
            spike_sell_pnl_high_pct: 40.0,
            vix_symbol: "^vix".to_string(),
            vix_mid_threshold: 25.0,
            vix_high_threshold: 30.0,
            vix_mid_regime_mult: 1.15,
            vix_high_regime_mult: 1.30,

            cooldown_sessions: 5,
            trend_break_buffer_pct: 0.005,
            catastrophe_floor_pct: 0.70,
            bear_total_floor_pct: 0.90,
            profit_at_base_pct: 0.25,
            profit_at_bull_pct: 0.25,
            warn_sell_pct: 0.30,

            reentry_window_sessions: 40,
            reentry_pullback_min_atrw: 1.5,
            reentry_pullback_max_atrw: 4.0,
            reentry_position_pct: 0.50,

            entry_mvp_enabled: true,
            entry_mode_default: "PULLBACK".to_string(),
            entry_setup_metric: "z20".to_string(),
            entry_min_price: 5.0,
            entry_time_stop_days: 7,
            entry_sizing_atr_mult: 2.0,
            entry_cat_stop_atr_mult: 3.0,
            entry_risk_per_trade_pct: 1.0,
            entry_capital_base: None,

            anomaly_fixed_daily_drop_threshold_pct: 8.0,
            anomaly_multiday_drop_focus_enabled: true,
            anomaly_multiday_min_down_days: 3,
            anomaly_multiday_min_3d_pct: 8.0,
            anomaly_multiday_min_5d_pct: 12.0,
            anomaly_multiday_min_ratio: 1.5,
            anomaly_extreme_drawdown_atr_threshold: 6.0,
            anomaly_extreme_multiday_ratio: 2.0,
            anomaly_abnormal_drawdown_atr_threshold: 4.0,
            anomaly_abnormal_multiday_ratio: 1.5,
            anomaly_sma_fallback_min_window: 20,
            anomaly_momentum_short_roc_threshold: -1.0,
            anomaly_momentum_long_roc_threshold: -1.5,
            anomaly_trend_slope_threshold: 0.0,
            anomaly_trend_drawdown_min_atr: 2.0,
            anomaly_recent_trend_sigma_threshold: 2.0,
            anomaly_recent_trend_consistent_days: 3,
            anomaly_std_pullback_sigma_threshold: -1.5,
            anomaly_std_window: 20,
            anomaly_std_min_window: 10,
            anomaly_drawdown_lookback: 60,
            anomaly_drawdown_min_lookback: 20,
            anomaly_multiday_avg_window: 10,
            anomaly_roc_short_period: 5,
            anomaly_roc_long_period: 20,

            bars_buffer_max: 260,
            stooq_fetch_days: 10,
            stooq_seed_days: 400,
            stooq_fallback_days: 400,
            stooq_quotes_batch_size: 8,
        }
    }
}

impl Settings {
    /// Deep-merge a raw JSON overlay (e.g. the `global` block of an older
    /// store blob) over these defaults. Unknown keys in `raw` are dropped
    /// silently (they belonged to a setting this build no longer reads);
    /// missing keys keep the default. Mirrors the `_deep_merge` behavior of
    /// the legacy Python store: known leaf keys in `raw` always win.
    pub fn merged_over_defaults(raw: &serde_json::Value) -> Self {
        let defaults = serde_json::to_value(Settings::default()).expect("settings serialize");
        let merged = deep_merge(defaults, raw.clone());
        serde_json::from_value(merged).unwrap_or_default()
    }
}

fn deep_merge(base: serde_json::Value, overlay: serde_json::Value) -> serde_json::Value {
    match (base, overlay) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}
