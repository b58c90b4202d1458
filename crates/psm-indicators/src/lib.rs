//! Pure indicator math over a symbol's bar history. No I/O; every function
//! takes plain slices/settings and returns plain values.

use psm_core::{Bar, Settings};
use serde::{Deserialize, Serialize};

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn stdev_population(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    if variance <= 0.0 {
        0.0
    } else {
        variance.sqrt()
    }
}

pub fn extract_closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// True range at `index`; `index` must be > 0 (needs a previous close).
pub fn true_range_at(bars: &[Bar], index: usize) -> f64 {
    let cur = &bars[index];
    let prev_close = bars[index - 1].close;
    let a = cur.high - cur.low;
    let b = (cur.high - prev_close).abs();
    let c = (cur.low - prev_close).abs();
    a.max(b).max(c)
}

pub fn compute_true_range_series(bars: &[Bar]) -> Vec<f64> {
    if bars.len() < 2 {
        return Vec::new();
    }
    (1..bars.len()).map(|i| true_range_at(bars, i)).collect()
}

/// Wilder-style ATR: seed = mean of the first `effective_period` true ranges,
/// then EMA-smoothed with `alpha = 1/effective_period`. Returns `None` when
/// there are fewer true ranges than `required_min = max(2, min_period)`.
pub fn compute_atr_ema(true_ranges: &[f64], period: u32, min_period: u32) -> Option<f64> {
    if true_ranges.is_empty() {
        return None;
    }
    let effective_period = (period.max(1) as usize).min(true_ranges.len());
    let required_min = (min_period as usize).max(2);
    if true_ranges.len() < required_min {
        return None;
    }
    let seed = mean(&true_ranges[0..effective_period]);
    let alpha = 1.0 / effective_period as f64;
    let mut atr = seed;
    for tr in &true_ranges[effective_period..] {
        atr = alpha * tr + (1.0 - alpha) * atr;
    }
    Some(atr)
}

pub fn compute_sma(closes: &[f64], window: usize) -> Option<f64> {
    if window == 0 || closes.len() < window {
        return None;
    }
    Some(mean(&closes[closes.len() - window..]))
}

pub fn compute_5d_move(closes: &[f64]) -> Option<f64> {
    if closes.len() < 6 {
        return None;
    }
    Some(closes[closes.len() - 1] - closes[closes.len() - 6])
}

pub fn compute_r3_pct(closes: &[f64]) -> Option<f64> {
    if closes.len() < 4 {
        return None;
    }
    let base = closes[closes.len() - 4];
    if base == 0.0 {
        return None;
    }
    Some(closes[closes.len() - 1] / base - 1.0)
}

pub fn compute_up_streak(closes: &[f64]) -> u32 {
    let mut streak = 0u32;
    for window in closes.windows(2).rev() {
        if window[1] > window[0] {
            streak += 1;
        } else {
            break;
        }
    }
    streak
}

pub fn compute_sma200_slope(closes: &[f64], sma_window: u32, lookback: u32) -> Option<&'static str> {
    let sma_window = sma_window as usize;
    let lookback = lookback as usize;
    if closes.len() < sma_window + lookback {
        return None;
    }
    let today = mean(&closes[closes.len() - sma_window..]);
    let past_end = closes.len() - lookback;
    let past = mean(&closes[past_end - sma_window..past_end]);
    Some(if today > past { "rising" } else { "flat_or_falling" })
}

pub fn compute_zscore(closes: &[f64], window: u32, min_window: u32) -> Option<f64> {
    let effective_window = (window.max(2) as usize).min(closes.len());
    let required_min = (min_window as usize).max(2);
    if effective_window < required_min {
        return None;
    }
    let slice = &closes[closes.len() - effective_window..];
    let m = mean(slice);
    let sd = stdev_population(slice);
    if sd <= 0.0 {
        return None;
    }
    Some((closes[closes.len() - 1] - m) / sd)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub price_close: Option<f64>,
    pub atr_d: Option<f64>,
    pub atr_w: Option<f64>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    pub sma200_slope: Option<String>,
    pub five_d_move: Option<f64>,
    pub z20: Option<f64>,
    pub up_streak: u32,
    pub r3_pct: Option<f64>,
    pub overheated: bool,
    pub setup_oversold: bool,
    pub reversal: bool,
    pub prev_close: Option<f64>,
    pub prev_high: Option<f64>,
    pub prev_sma50: Option<f64>,
    pub trend_up: bool,
}

/// The master indicator function: computes every scalar `# 4.3` names from a
/// contiguous, ascending-by-date slice of bars ending at the bar being
/// evaluated.
pub fn compute_indicator_snapshot(bars: &[Bar], settings: &Settings) -> IndicatorSnapshot {
    let closes = extract_closes(bars);
    let trs = compute_true_range_series(bars);

    let atr_d = compute_atr_ema(&trs, settings.atr_period, settings.entry_atr_min_period);
    let atr_w = atr_d.map(|a| a * settings.atr_daily_to_weekly);

    let sma50 = compute_sma(&closes, settings.sma50_period as usize);
    let sma200 = compute_sma(&closes, settings.sma200_period as usize);
    let sma200_slope =
        compute_sma200_slope(&closes, settings.sma200_period, settings.sma200_slope_lookback)
            .map(|s| s.to_string());

    let five_d_move = compute_5d_move(&closes);
    let z20 = compute_zscore(&closes, settings.entry_z20_window, settings.entry_z20_min_window);
    let up_streak = compute_up_streak(&closes);
    let r3_pct = compute_r3_pct(&closes);

    let overheated = up_streak >= settings.entry_overheat_upstreak
        || r3_pct
            .map(|r| r >= settings.entry_overheat_r3_pct / 100.0)
            .unwrap_or(false);
    let setup_oversold = z20.map(|z| z <= settings.entry_z20_threshold).unwrap_or(false);

    let prev_close = if closes.len() >= 2 {
        Some(closes[closes.len() - 2])
    } else {
        None
    };
    let prev_high = if bars.len() >= 2 {
        Some(bars[bars.len() - 2].high)
    } else {
        None
    };
    let prev_sma50 = if closes.len() > settings.sma50_period as usize {
        compute_sma(&closes[..closes.len() - 1], settings.sma50_period as usize)
    } else {
        None
    };

    let close = closes.last().copied();
    let signal_prev_high = match (close, prev_high) {
        (Some(c), Some(ph)) => c > ph,
        _ => false,
    };
    let signal_sma_reclaim = match (prev_close, prev_sma50, close, sma50) {
        (Some(pc), Some(psma), Some(c), Some(s)) => pc < psma && c > s,
        _ => false,
    };
    let reversal = signal_prev_high || signal_sma_reclaim;

    let trend_up = match (sma200.as_ref(), sma200_slope.as_deref(), close) {
        (Some(s200), Some("rising"), Some(c)) => c > *s200,
        _ => false,
    };

    IndicatorSnapshot {
        price_close: close,
        atr_d,
        atr_w,
        sma50,
        sma200,
        sma200_slope,
        five_d_move,
        z20,
        up_streak,
        r3_pct,
        overheated,
        setup_oversold,
        reversal,
        prev_close,
        prev_high,
        prev_sma50,
        trend_up,
    }
}

#[cfg(test)]
mod indicators_tests {
    use super::*;

    fn sample_bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                date: format!("2024-01-{:02}", i + 1),
                open: c,
                high: c + 0.5,
                low: c - 0.5,
                close: c,
                volume: 1_000.0,
            })
            .collect()
    }

    #[test]
    fn test_sma_basic() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = compute_sma(&closes, 5).unwrap();
        assert!((result - 3.0).abs() < 0.001);
        assert!(compute_sma(&closes, 6).is_none());
    }

    #[test]
    fn test_atr_constant_true_range_converges_to_value() {
        let mut bars = Vec::new();
        let mut close = 100.0;
        for i in 0..30 {
            bars.push(Bar {
                date: format!("2024-02-{:02}", i + 1),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000.0,
            });
            close += 0.0;
        }
        let trs = compute_true_range_series(&bars);
        let atr = compute_atr_ema(&trs, 14, 5).unwrap();
        assert!((atr - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_up_streak() {
        let closes = vec![5.0, 4.0, 4.5, 5.0, 6.0, 7.0];
        assert_eq!(compute_up_streak(&closes), 4);
    }

    #[test]
    fn test_sma200_slope_rising_on_strict_uptrend() {
        let closes: Vec<f64> = (0..260).map(|i| 100.0 + i as f64).collect();
        let slope = compute_sma200_slope(&closes, 200, 20).unwrap();
        assert_eq!(slope, "rising");
    }

    #[test]
    fn test_zscore_needs_min_window() {
        let closes = vec![1.0, 2.0];
        assert!(compute_zscore(&closes, 20, 10).is_none());
    }

    #[test]
    fn test_reversal_sma_reclaim_path() {
        let mut closes = vec![10.0; 60];
        closes[58] = 8.0; // prev_close below prev_sma50
        closes[59] = 11.0; // close above sma50
        let bars = sample_bars(&closes);
        let snap = compute_indicator_snapshot(&bars, &Settings::default());
        assert!(snap.reversal);
    }
}
