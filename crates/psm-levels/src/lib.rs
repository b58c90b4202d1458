//! Stop, target, and sizing level math, pure over a position snapshot,
//! indicator snapshot, and settings.

use psm_core::{Mode, Settings, State, Targets};
use psm_indicators::IndicatorSnapshot;
use serde::{Deserialize, Serialize};

/// Chandelier multiplier `K`: state/target/warn-count dependent, floored at 1.5.
pub fn compute_chandelier_k(
    state: State,
    close: f64,
    base_total: Option<f64>,
    bull_total: Option<f64>,
    warn_count: u32,
) -> f64 {
    let mut k = match state {
        State::SpikeLock => 2.0,
        State::NormalRun => {
            if bull_total.map(|b| close >= b).unwrap_or(false) {
                2.5
            } else if base_total.map(|b| close >= b).unwrap_or(false) {
                3.0
            } else {
                3.5
            }
        }
        _ => 3.0,
    };
    if warn_count >= 1 {
        k -= 0.5;
    }
    k.max(1.5)
}

pub fn resolve_regime_multiplier(
    vix_close: Option<f64>,
    mid_threshold: f64,
    high_threshold: f64,
    mid_mult: f64,
    high_mult: f64,
) -> f64 {
    match vix_close {
        None => 1.0,
        Some(v) if v > high_threshold => high_mult,
        Some(v) if v > mid_threshold => mid_mult,
        _ => 1.0,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelsSnapshot {
    pub regime_mult: f64,
    pub spike_threshold: Option<f64>,
    pub is_spike: bool,

    pub chandelier_k: Option<f64>,
    pub chandelier_stop: Option<f64>,
    pub giveback_lock: Option<f64>,
    pub catastrophe_floor: Option<f64>,
    pub effective_stop: Option<f64>,

    pub pullback_min: Option<f64>,
    pub pullback_max: Option<f64>,
    pub in_band: bool,

    pub unrealized_pnl_pct: Option<f64>,
    pub return_from_hwm_pct: Option<f64>,
    pub priced_in_pct: Option<f64>,
    pub gap_to_base_pct: Option<f64>,
    pub gap_to_bull_pct: Option<f64>,
    pub day_change_pct: Option<f64>,

    pub stop_loss_price: Option<f64>,
    pub stop_distance_for_size: Option<f64>,
    pub shares_hint: Option<f64>,
}

/// Everything the state machine needs about stops, targets, and sizing for
/// one bar of one position. Mirrors `compute_levels` in the original engine.
#[allow(clippy::too_many_arguments)]
pub fn compute_levels(
    mode: Mode,
    state: State,
    targets: &Targets,
    entry_price: Option<f64>,
    hwm_close: Option<f64>,
    hwm_at_exit: Option<f64>,
    warn_count: u32,
    indicators: &IndicatorSnapshot,
    vix_close: Option<f64>,
    settings: &Settings,
) -> LevelsSnapshot {
    let mut snap = LevelsSnapshot::default();

    let regime_mult = resolve_regime_multiplier(
        vix_close,
        settings.vix_mid_threshold,
        settings.vix_high_threshold,
        settings.vix_mid_regime_mult,
        settings.vix_high_regime_mult,
    );
    snap.regime_mult = regime_mult;

    let spike_threshold = indicators.atr_w.map(|atr_w| settings.spike_mult * atr_w * regime_mult);
    snap.spike_threshold = spike_threshold;
    snap.is_spike = match (indicators.five_d_move, spike_threshold) {
        (Some(move_5d), Some(threshold)) => move_5d > 0.0 && move_5d > threshold,
        _ => false,
    };

    let close = indicators.price_close;

    if mode == Mode::Owned {
        if let (Some(c), Some(hwm), Some(atr_w)) = (close, hwm_close, indicators.atr_w) {
            let k = compute_chandelier_k(state, c, targets.base_total, targets.bull_total, warn_count);
            snap.chandelier_k = Some(k);
            let chandelier_stop = hwm - k * atr_w;
            snap.chandelier_stop = Some(chandelier_stop);

            let mut effective_stop = chandelier_stop;

            if let Some(entry) = entry_price {
                if hwm > entry {
                    let max_giveback = if state == State::SpikeLock { 0.20 } else { 0.35 };
                    let giveback_lock = entry + (1.0 - max_giveback) * (hwm - entry);
                    snap.giveback_lock = Some(giveback_lock);
                    effective_stop = effective_stop.max(giveback_lock);
                }

                let mut floor_candidates = vec![entry * settings.catastrophe_floor_pct];
                if let Some(bear_total) = targets.bear_total {
                    floor_candidates.push(bear_total * settings.bear_total_floor_pct);
                }
                let catastrophe_floor =
                    floor_candidates.into_iter().fold(f64::MIN, f64::max);
                snap.catastrophe_floor = Some(catastrophe_floor);
                effective_stop = effective_stop.max(catastrophe_floor);
            }

            snap.effective_stop = Some(effective_stop);
        }
    }

    if let (Some(hwm_exit), Some(atr_w)) = (hwm_at_exit, indicators.atr_w) {
        let pullback_min = hwm_exit - settings.reentry_pullback_min_atrw * atr_w;
        let pullback_max = hwm_exit - settings.reentry_pullback_max_atrw * atr_w;
        snap.pullback_min = Some(pullback_min);
        snap.pullback_max = Some(pullback_max);
        if let Some(c) = close {
            snap.in_band = c >= pullback_max && c <= pullback_min;
        }
    }

    if let (Some(c), Some(entry)) = (close, entry_price) {
        if entry != 0.0 {
            snap.unrealized_pnl_pct = Some((c - entry) / entry * 100.0);
        }
    }
    if let (Some(c), Some(hwm)) = (close, hwm_close) {
        if hwm != 0.0 {
            snap.return_from_hwm_pct = Some((c - hwm) / hwm * 100.0);
        }
    }
    if let (Some(c), Some(bear), Some(bull)) = (close, targets.bear_total, targets.bull_total) {
        if bull != bear {
            snap.priced_in_pct = Some((c - bear) / (bull - bear) * 100.0);
        }
    }
    if let (Some(c), Some(base)) = (close, targets.base_total) {
        if c != 0.0 {
            snap.gap_to_base_pct = Some((base - c) / c * 100.0);
        }
    }
    if let (Some(c), Some(bull)) = (close, targets.bull_total) {
        if c != 0.0 {
            snap.gap_to_bull_pct = Some((bull - c) / c * 100.0);
        }
    }
    if let (Some(c), Some(prev)) = (close, indicators.prev_close) {
        if prev != 0.0 {
            snap.day_change_pct = Some((c - prev) / prev * 100.0);
        }
    }

    if mode == Mode::Watch {
        if let (Some(c), Some(atr_d)) = (close, indicators.atr_d) {
            let stop_loss_price = c - settings.entry_cat_stop_atr_mult * atr_d;
            let stop_distance = settings.entry_sizing_atr_mult * atr_d;
            snap.stop_loss_price = Some(stop_loss_price);
            snap.stop_distance_for_size = Some(stop_distance);
            if let Some(capital) = settings.entry_capital_base {
                if capital > 0.0 && stop_distance > 0.0 {
                    snap.shares_hint =
                        Some(capital * settings.entry_risk_per_trade_pct / 100.0 / stop_distance);
                }
            }
        }
    }

    snap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chandelier_k_tightens_in_spike_lock() {
        let k = compute_chandelier_k(State::SpikeLock, 100.0, None, None, 0);
        assert!((k - 2.0).abs() < 1e-9);
    }

    #[test]
    fn chandelier_k_floors_at_one_point_five() {
        let k = compute_chandelier_k(State::SpikeLock, 100.0, None, None, 3);
        assert!((k - 1.5).abs() < 1e-9);
    }

    #[test]
    fn regime_multiplier_scales_with_vix() {
        assert!((resolve_regime_multiplier(None, 25.0, 30.0, 1.15, 1.30) - 1.0).abs() < 1e-9);
        assert!((resolve_regime_multiplier(Some(35.0), 25.0, 30.0, 1.15, 1.30) - 1.30).abs() < 1e-9);
        assert!((resolve_regime_multiplier(Some(27.0), 25.0, 30.0, 1.15, 1.30) - 1.15).abs() < 1e-9);
    }

    #[test]
    fn effective_stop_takes_max_of_three() {
        let settings = Settings::default();
        let targets = Targets {
            bear_total: Some(60.0),
            base_total: Some(90.0),
            bull_total: Some(120.0),
        };
        let indicators = IndicatorSnapshot {
            price_close: Some(100.0),
            atr_w: Some(5.0),
            five_d_move: Some(1.0),
            prev_close: Some(99.0),
            ..Default::default()
        };
        let snap = compute_levels(
            Mode::Owned,
            State::NormalRun,
            &targets,
            Some(70.0),
            Some(110.0),
            None,
            0,
            &indicators,
            None,
            &settings,
        );
        assert!(snap.effective_stop.unwrap() >= snap.chandelier_stop.unwrap());
        assert!(snap.effective_stop.unwrap() >= snap.catastrophe_floor.unwrap());
    }
}
