//! Statistical anomaly detection: a metrics bag plus a strict, first-match
//! priority classification into at most one of eight codes.

use psm_core::{AnomalyCode, AnomalySeverity, Bar, Settings};
use psm_indicators::IndicatorSnapshot;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn mean_abs(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().map(|v| v.abs()).sum::<f64>() / values.len() as f64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnomalyMetrics {
    pub close: Option<f64>,
    pub atr_pct: Option<f64>,
    pub roc_5_norm: Option<f64>,
    pub roc_20_norm: Option<f64>,
    pub one_day_return_pct: Option<f64>,
    pub sigma_log_20: Option<f64>,
    pub one_day_return_in_sigma: Option<f64>,
    pub drop_3d_pct: Option<f64>,
    pub drop_5d_pct: Option<f64>,
    pub return_3d_in_sigma: Option<f64>,
    pub return_5d_in_sigma: Option<f64>,
    pub recent_trend_sigma_abs: Option<f64>,
    pub recent_trend_direction: String,
    pub up_days_5d: u32,
    pub down_days_5d: u32,
    pub avg_abs_daily_change: Option<f64>,
    pub multiday_drop_ratio: Option<f64>,
    pub rolling_high: Option<f64>,
    pub drawdown_pct: Option<f64>,
    pub drawdown_in_atr: Option<f64>,
    pub sma50: Option<f64>,
    pub sma50_slope_10d: Option<f64>,
}

/// The master metrics function: builds every scalar the classifier reads
/// from a contiguous closes series, the indicator snapshot, and settings.
pub fn build_metrics(bars: &[Bar], indicators: &IndicatorSnapshot, settings: &Settings) -> AnomalyMetrics {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let n = closes.len();
    let mut m = AnomalyMetrics {
        recent_trend_direction: "FLAT".to_string(),
        ..Default::default()
    };

    let close = closes.last().copied();
    m.close = close;

    m.atr_pct = match (indicators.atr_d, close) {
        (Some(atr), Some(c)) if c != 0.0 => Some(atr / c * 100.0),
        _ => None,
    };

    let roc = |period: u32| -> Option<f64> {
        let period = period as usize;
        if n > period && closes[n - 1 - period] != 0.0 {
            Some((closes[n - 1] - closes[n - 1 - period]) / closes[n - 1 - period] * 100.0)
        } else {
            None
        }
    };
    let roc_5 = roc(settings.anomaly_roc_short_period);
    let roc_20 = roc(settings.anomaly_roc_long_period);
    m.roc_5_norm = match (roc_5, m.atr_pct) {
        (Some(r), Some(a)) if a > 0.0 => Some(r / a),
        _ => None,
    };
    m.roc_20_norm = match (roc_20, m.atr_pct) {
        (Some(r), Some(a)) if a > 0.0 => Some(r / a),
        _ => None,
    };

    m.one_day_return_pct = if n >= 2 && closes[n - 2] != 0.0 {
        Some((closes[n - 1] - closes[n - 2]) / closes[n - 2] * 100.0)
    } else {
        None
    };

    let log_returns: Vec<f64> = (1..n)
        .filter_map(|i| {
            if closes[i - 1] > 0.0 && closes[i] > 0.0 {
                Some((closes[i] / closes[i - 1]).ln())
            } else {
                None
            }
        })
        .collect();

    let std_window = (settings.anomaly_std_window as usize).min(log_returns.len());
    if std_window >= settings.anomaly_std_min_window as usize && std_window >= 2 {
        let window = log_returns[log_returns.len() - std_window..].to_vec();
        let sigma = window.clone().std_dev();
        if sigma > 0.0 {
            m.sigma_log_20 = Some(sigma);
        }
    }

    m.one_day_return_in_sigma = match (log_returns.last(), m.sigma_log_20) {
        (Some(last), Some(sigma)) if sigma > 0.0 => Some(last / sigma),
        _ => None,
    };

    let drop_pct = |k: usize| -> Option<f64> {
        if n > k && closes[n - 1 - k] != 0.0 {
            Some((closes[n - 1] - closes[n - 1 - k]) / closes[n - 1 - k] * 100.0)
        } else {
            None
        }
    };
    m.drop_3d_pct = drop_pct(3);
    m.drop_5d_pct = drop_pct(5);

    let return_in_sigma = |k: usize| -> Option<f64> {
        if log_returns.len() < k || k == 0 {
            return None;
        }
        let sigma = m.sigma_log_20?;
        if sigma <= 0.0 {
            return None;
        }
        let sum_log: f64 = log_returns[log_returns.len() - k..].iter().sum();
        Some(sum_log / (sigma * (k as f64).sqrt()))
    };
    m.return_3d_in_sigma = return_in_sigma(3);
    m.return_5d_in_sigma = return_in_sigma(5);

    let (trend_sigma, trend_dir) = pick_recent_trend(m.return_3d_in_sigma, m.return_5d_in_sigma);
    m.recent_trend_sigma_abs = trend_sigma;
    m.recent_trend_direction = trend_dir;

    let daily_change_pct: Vec<f64> = (1..n)
        .filter_map(|i| {
            if closes[i - 1] != 0.0 {
                Some((closes[i] - closes[i - 1]) / closes[i - 1] * 100.0)
            } else {
                None
            }
        })
        .collect();
    let last5 = &daily_change_pct[daily_change_pct.len().saturating_sub(5)..];
    m.up_days_5d = last5.iter().filter(|v| **v > 0.0).count() as u32;
    m.down_days_5d = last5.iter().filter(|v| **v < 0.0).count() as u32;

    let avg_window = settings.anomaly_multiday_avg_window as usize;
    let avg_slice = &daily_change_pct[daily_change_pct.len().saturating_sub(avg_window)..];
    if !avg_slice.is_empty() {
        m.avg_abs_daily_change = Some(mean_abs(avg_slice));
    }

    let drop_ratio = |drop: Option<f64>, k: f64| -> Option<f64> {
        match (drop, m.avg_abs_daily_change) {
            (Some(d), Some(avg)) if d < 0.0 && avg > 0.0 => Some(d.abs() / (avg * k)),
            _ => None,
        }
    };
    let ratio_3d = drop_ratio(m.drop_3d_pct, 3.0);
    let ratio_5d = drop_ratio(m.drop_5d_pct, 5.0);
    m.multiday_drop_ratio = [ratio_3d, ratio_5d]
        .into_iter()
        .flatten()
        .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))));

    let lookback = settings.anomaly_drawdown_lookback as usize;
    let min_lookback = settings.anomaly_drawdown_min_lookback as usize;
    if n >= min_lookback {
        let window = &closes[closes.len().saturating_sub(lookback)..];
        let rolling_high = window.iter().cloned().fold(f64::MIN, f64::max);
        m.rolling_high = Some(rolling_high);
        if let Some(c) = close {
            if rolling_high != 0.0 {
                m.drawdown_pct = Some((c - rolling_high) / rolling_high * 100.0);
            }
        }
    }
    m.drawdown_in_atr = match (m.drawdown_pct, m.atr_pct) {
        (Some(dd), Some(a)) if a > 0.0 => Some(dd.abs() / a),
        _ => None,
    };

    let sma50 = indicators.sma50.or_else(|| {
        let window = n.min(50);
        if window >= settings.anomaly_sma_fallback_min_window as usize {
            Some(mean(&closes[n - window..]))
        } else {
            None
        }
    });
    m.sma50 = sma50;
    if n > 60 {
        let sma50_10d_ago = mean(&closes[n - 60..n - 10]);
        if sma50_10d_ago != 0.0 {
            if let Some(s) = sma50 {
                m.sma50_slope_10d = Some((s - sma50_10d_ago) / sma50_10d_ago);
            }
        }
    }

    m
}

fn pick_recent_trend(r3: Option<f64>, r5: Option<f64>) -> (Option<f64>, String) {
    let candidates: Vec<f64> = [r3, r5].into_iter().flatten().collect();
    if candidates.is_empty() {
        return (None, "FLAT".to_string());
    }
    let chosen = candidates
        .into_iter()
        .fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
    let direction = if chosen > 0.0 {
        "UP"
    } else if chosen < 0.0 {
        "DOWN"
    } else {
        "FLAT"
    };
    (Some(chosen.abs()), direction.to_string())
}

fn event_text(code: AnomalyCode) -> &'static str {
    match code {
        AnomalyCode::FixedDailyDrop => "Fixed one-day drop exceeded the configured threshold.",
        AnomalyCode::MultidayDrop => "Sustained multi-day decline with a high drop ratio.",
        AnomalyCode::ExtremeDrawdown => "Drawdown is extreme relative to recent volatility.",
        AnomalyCode::AbnormalDrawdown => "Drawdown below the 50-day average is abnormal for this symbol.",
        AnomalyCode::MomentumWarn => "Short and long-term momentum are both deteriorating.",
        AnomalyCode::TrendDeterioration => "Price is below its 50-day average and the average is sloping down.",
        AnomalyCode::RecentAbnormalTrend => "Recent multi-day move is an outlier versus typical volatility.",
        AnomalyCode::StdPullback => "One-day return is a statistically unusual pullback.",
    }
}

fn severity_for(code: AnomalyCode) -> AnomalySeverity {
    match code {
        AnomalyCode::ExtremeDrawdown
        | AnomalyCode::AbnormalDrawdown
        | AnomalyCode::FixedDailyDrop
        | AnomalyCode::MultidayDrop
        | AnomalyCode::RecentAbnormalTrend => AnomalySeverity::High,
        _ => AnomalySeverity::Info,
    }
}

/// First-match-wins classification over the eight anomaly codes, or `None` if
/// nothing fired. Returns the code, its severity, and the fixed description text.
pub fn classify(metrics: &AnomalyMetrics, settings: &Settings) -> Option<(AnomalyCode, AnomalySeverity, &'static str)> {
    let fixed_daily_drop = metrics
        .one_day_return_pct
        .map(|v| v <= -settings.anomaly_fixed_daily_drop_threshold_pct)
        .unwrap_or(false);
    if fixed_daily_drop {
        let code = AnomalyCode::FixedDailyDrop;
        return Some((code, severity_for(code), event_text(code)));
    }

    let multiday_drop = settings.anomaly_multiday_drop_focus_enabled
        && metrics.down_days_5d >= settings.anomaly_multiday_min_down_days
        && (metrics.drop_3d_pct.map(|v| v <= -settings.anomaly_multiday_min_3d_pct).unwrap_or(false)
            || metrics.drop_5d_pct.map(|v| v <= -settings.anomaly_multiday_min_5d_pct).unwrap_or(false))
        && metrics
            .multiday_drop_ratio
            .map(|v| v >= settings.anomaly_multiday_min_ratio)
            .unwrap_or(false);
    if multiday_drop {
        let code = AnomalyCode::MultidayDrop;
        return Some((code, severity_for(code), event_text(code)));
    }

    let extreme_drawdown = metrics
        .drawdown_in_atr
        .map(|v| v >= settings.anomaly_extreme_drawdown_atr_threshold)
        .unwrap_or(false)
        || metrics
            .multiday_drop_ratio
            .map(|v| v >= settings.anomaly_extreme_multiday_ratio)
            .unwrap_or(false);
    if extreme_drawdown {
        let code = AnomalyCode::ExtremeDrawdown;
        return Some((code, severity_for(code), event_text(code)));
    }

    let below_sma50 = match (metrics.close, metrics.sma50) {
        (Some(c), Some(sma)) => c < sma,
        _ => false,
    };
    let abnormal_drawdown = below_sma50
        && (metrics
            .drawdown_in_atr
            .map(|v| v >= settings.anomaly_abnormal_drawdown_atr_threshold)
            .unwrap_or(false)
            || metrics
                .multiday_drop_ratio
                .map(|v| v >= settings.anomaly_abnormal_multiday_ratio)
                .unwrap_or(false));
    if abnormal_drawdown {
        let code = AnomalyCode::AbnormalDrawdown;
        return Some((code, severity_for(code), event_text(code)));
    }

    let momentum_warn = metrics
        .roc_5_norm
        .map(|v| v < settings.anomaly_momentum_short_roc_threshold)
        .unwrap_or(false)
        && metrics
            .roc_20_norm
            .map(|v| v < settings.anomaly_momentum_long_roc_threshold)
            .unwrap_or(false);
    if momentum_warn {
        let code = AnomalyCode::MomentumWarn;
        return Some((code, severity_for(code), event_text(code)));
    }

    let trend_deterioration = below_sma50
        && metrics
            .sma50_slope_10d
            .map(|v| v < settings.anomaly_trend_slope_threshold)
            .unwrap_or(false)
        && metrics
            .drawdown_in_atr
            .map(|v| v >= settings.anomaly_trend_drawdown_min_atr)
            .unwrap_or(false);
    if trend_deterioration {
        let code = AnomalyCode::TrendDeterioration;
        return Some((code, severity_for(code), event_text(code)));
    }

    let recent_abnormal_trend = metrics.atr_pct.map(|a| a > 0.0).unwrap_or(false)
        && metrics
            .recent_trend_sigma_abs
            .map(|v| v >= settings.anomaly_recent_trend_sigma_threshold)
            .unwrap_or(false)
        && metrics.recent_trend_direction != "FLAT"
        && (metrics.up_days_5d >= settings.anomaly_recent_trend_consistent_days
            || metrics.down_days_5d >= settings.anomaly_recent_trend_consistent_days);
    if recent_abnormal_trend {
        let code = AnomalyCode::RecentAbnormalTrend;
        return Some((code, severity_for(code), event_text(code)));
    }

    let std_pullback = metrics.atr_pct.map(|a| a > 0.0).unwrap_or(false)
        && metrics
            .one_day_return_in_sigma
            .map(|v| v <= settings.anomaly_std_pullback_sigma_threshold)
            .unwrap_or(false)
        && metrics.one_day_return_pct.map(|v| v < 0.0).unwrap_or(false);
    if std_pullback {
        let code = AnomalyCode::StdPullback;
        return Some((code, severity_for(code), event_text(code)));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                date: format!("2024-{:02}-{:02}", 1 + i / 28, 1 + i % 28),
                open: c,
                high: c + 0.3,
                low: c - 0.3,
                close: c,
                volume: 1_000.0,
            })
            .collect()
    }

    #[test]
    fn fixed_daily_drop_wins_regardless_of_other_thresholds() {
        let mut closes = vec![100.0; 80];
        *closes.last_mut().unwrap() = 91.0; // 9% one-day drop
        let bars = bars_from_closes(&closes);
        let settings = Settings::default();
        let indicators = psm_indicators::compute_indicator_snapshot(&bars, &settings);
        let metrics = build_metrics(&bars, &indicators, &settings);
        let (code, _, _) = classify(&metrics, &settings).expect("expected an anomaly");
        assert_eq!(code, AnomalyCode::FixedDailyDrop);
    }

    #[test]
    fn extreme_drawdown_beats_abnormal_drawdown() {
        let mut closes: Vec<f64> = vec![100.0; 70];
        for (i, c) in closes.iter_mut().rev().take(10).enumerate() {
            *c = 100.0 - (i as f64 + 1.0) * 1.0;
        }
        let bars = bars_from_closes(&closes);
        let settings = Settings::default();
        let indicators = psm_indicators::compute_indicator_snapshot(&bars, &settings);
        let metrics = build_metrics(&bars, &indicators, &settings);
        // with a shallow drawdown this should not trip extreme threshold
        let result = classify(&metrics, &settings);
        if let Some((code, _, _)) = result {
            assert_ne!(code, AnomalyCode::ExtremeDrawdown, "shallow move should not be extreme");
        }
    }

    #[test]
    fn flat_series_emits_no_anomaly() {
        let closes = vec![100.0; 80];
        let bars = bars_from_closes(&closes);
        let settings = Settings::default();
        let indicators = psm_indicators::compute_indicator_snapshot(&bars, &settings);
        let metrics = build_metrics(&bars, &indicators, &settings);
        assert!(classify(&metrics, &settings).is_none());
    }
}
