//! Per-symbol finite state machine advance: a strict priority ladder that
//! mutates a `Position`'s runtime fields and emits one `DecisionOfDay` per
//! bar.

use psm_core::{
    is_actionable as core_is_actionable, ActionPayload, ActionType, Bar, DecisionOfDay, Mode,
    Position, ReasonCode, ReasonPayload, Settings, State, Transitions, Trigger,
};
use psm_indicators::IndicatorSnapshot;
use psm_levels::LevelsSnapshot;

fn trading_days_since(bars: &[Bar], start_date: &str) -> u32 {
    bars.iter().filter(|b| b.date.as_str() > start_date).count() as u32
}

fn can_execute_action(position: &Position, bar_date: &str) -> bool {
    position.runtime.last_action_bar_date.as_deref() != Some(bar_date)
}

fn register_action(position: &mut Position, bar_date: &str) {
    position.runtime.last_action_bar_date = Some(bar_date.to_string());
}

/// Moves a position to `WATCH / EXITED_COOLDOWN`, clearing execution and
/// spike/reentry bookkeeping. `permanent_exit` is passed explicitly by the
/// caller: `true` for a falsifier exit, otherwise the position's existing
/// flag is carried through unchanged.
fn set_exit_state(position: &mut Position, bar_date: &str, settings: &Settings, permanent_exit: bool) {
    if position.mode == Mode::Owned {
        position.runtime.hwm_at_exit = position.runtime.hwm_close;
    }
    position.mode = Mode::Watch;
    position.state = State::ExitedCooldown;
    position.execution.entry_price = None;
    position.execution.entry_bar_date = None;
    position.execution.current_weight_pct = None;
    position.runtime.cooldown_start_bar_date = Some(bar_date.to_string());
    position.runtime.cooldown_bars_left = settings.cooldown_sessions;
    position.runtime.reentry_window_start_bar_date = None;
    position.runtime.reentry_bars_left = 0;
    position.runtime.spike_lock_start_bar_date = None;
    position.runtime.last_spike_bar_date = None;
    position.runtime.base_sold = false;
    position.runtime.bull_sold = false;
    position.runtime.consecutive_closes_below_sma200 = 0;
    position.runtime.permanent_exit = permanent_exit;
}

fn update_runtime_counters(position: &mut Position, bar_date: &str, indicators: &IndicatorSnapshot, settings: &Settings) {
    let advancing_to_new_date = position.runtime.last_processed_bar_date.as_deref() != Some(bar_date);
    if advancing_to_new_date {
        if position.state == State::ExitedCooldown && position.runtime.cooldown_bars_left > 0 {
            position.runtime.cooldown_bars_left -= 1;
        }
        if position.state == State::ReentryWindow && position.runtime.reentry_bars_left > 0 {
            position.runtime.reentry_bars_left -= 1;
        }
    }

    if position.mode == Mode::Owned {
        match (indicators.price_close, indicators.sma200) {
            (Some(close), Some(sma200)) => {
                let threshold = sma200 * (1.0 - settings.trend_break_buffer_pct);
                if close < threshold {
                    position.runtime.consecutive_closes_below_sma200 += 1;
                } else {
                    position.runtime.consecutive_closes_below_sma200 = 0;
                }
            }
            _ => position.runtime.consecutive_closes_below_sma200 = 0,
        }

        if matches!(position.state, State::NormalRun | State::SpikeLock) {
            if let Some(close) = indicators.price_close {
                let above_hwm = position.runtime.hwm_close.map(|h| close > h).unwrap_or(true);
                if above_hwm {
                    position.runtime.hwm_close = Some(close);
                    position.runtime.hwm_bar_date = Some(bar_date.to_string());
                }
            }
        }
    }
}

fn resolve_spike_sell_pct(position: &Position, close: f64, settings: &Settings) -> f64 {
    let pct = match position.execution.entry_price {
        Some(entry) if entry > 0.0 => {
            let pnl_pct = (close - entry) / entry * 100.0;
            if pnl_pct > settings.spike_sell_pnl_high_pct {
                settings.spike_sell_pct_high
            } else if pnl_pct > settings.spike_sell_pnl_mid_pct {
                settings.spike_sell_pct_mid
            } else {
                settings.spike_sell_pct_low
            }
        }
        _ => settings.spike_sell_pct_first,
    };
    pct.clamp(0.0, 1.0)
}

struct EntryMvpOutcome {
    action: ActionPayload,
    reason: ReasonPayload,
}

fn evaluate_watch_entry_mvp(
    position: &mut Position,
    bar_date: &str,
    indicators: &IndicatorSnapshot,
    settings: &Settings,
) -> EntryMvpOutcome {
    let data_ready = indicators.price_close.is_some()
        && indicators.atr_d.is_some()
        && indicators.sma200.is_some()
        && indicators.z20.is_some()
        && indicators.prev_high.is_some();
    if !data_ready {
        return EntryMvpOutcome {
            action: ActionPayload::simple(ActionType::Wait),
            reason: reason(ReasonCode::EntryWaitData, "Waiting for enough indicator history."),
        };
    }
    let close = indicators.price_close.unwrap();
    if close <= settings.entry_min_price {
        return EntryMvpOutcome {
            action: ActionPayload::simple(ActionType::Wait),
            reason: reason(ReasonCode::EntryWatch, "Price below the minimum entry threshold."),
        };
    }
    if !indicators.trend_up {
        return EntryMvpOutcome {
            action: ActionPayload::simple(ActionType::Wait),
            reason: reason(ReasonCode::EntryNoBuyTrend, "SMA200 trend is not rising."),
        };
    }
    if indicators.overheated {
        return EntryMvpOutcome {
            action: ActionPayload::simple(ActionType::Wait),
            reason: reason(ReasonCode::EntryNoBuyOverheat, "Price is overheated on up-streak or 3-day return."),
        };
    }
    if !indicators.setup_oversold {
        return EntryMvpOutcome {
            action: ActionPayload::simple(ActionType::Wait),
            reason: reason(ReasonCode::EntryWatch, "Waiting for an oversold setup."),
        };
    }
    if !indicators.reversal {
        return EntryMvpOutcome {
            action: ActionPayload::simple(ActionType::Wait),
            reason: reason(ReasonCode::EntrySetup, "Oversold but no reversal confirmation yet."),
        };
    }
    if can_execute_action(position, bar_date) {
        register_action(position, bar_date);
        EntryMvpOutcome {
            action: ActionPayload {
                action_type: ActionType::BuyAlert,
                sell_pct: None,
                buy_pct_of_target: None,
                price_hint: Some(close),
            },
            reason: reason(ReasonCode::BuyTrigger, "Oversold reversal confirmed with a rising trend."),
        }
    } else {
        EntryMvpOutcome {
            action: ActionPayload::simple(ActionType::Wait),
            reason: reason(ReasonCode::DuplicateActionBlocked, "Action already taken for this bar."),
        }
    }
}

fn reason(code: ReasonCode, text: &str) -> ReasonPayload {
    ReasonPayload {
        code,
        text: text.to_string(),
    }
}

/// Advances one position by one new bar, mutating its runtime fields in
/// place and returning the decision record for that bar. `bars_up_to_date`
/// must be the buffer sliced to bars `<= bar_date`, ascending.
pub fn advance(
    position: &mut Position,
    key: &str,
    bars_up_to_date: &[Bar],
    bar_date: &str,
    indicators: &IndicatorSnapshot,
    levels: &LevelsSnapshot,
    settings: &Settings,
) -> DecisionOfDay {
    let state_before = position.state;
    let mode_before = position.mode;

    update_runtime_counters(position, bar_date, indicators, settings);

    let trigger = position.fundamental_triggers.pending_trigger;
    if trigger != Trigger::None {
        position.fundamental_triggers.last_trigger_bar_date = Some(bar_date.to_string());
        position.fundamental_triggers.pending_trigger = Trigger::None;
    }

    let close = indicators.price_close;

    let mut action = ActionPayload::simple(ActionType::Hold);
    let mut reason_payload = reason(ReasonCode::NoTrigger, "No trigger fired.");
    let mut trigger_fired = Trigger::None;

    if trigger == Trigger::Falsifier {
        if can_execute_action(position, bar_date) {
            register_action(position, bar_date);
            set_exit_state(position, bar_date, settings, true);
            action = ActionPayload::simple(ActionType::SellAll);
            reason_payload = reason(ReasonCode::Falsifier, "Falsifier trigger forced a full exit.");
            trigger_fired = Trigger::Falsifier;
        } else {
            action = ActionPayload::simple(ActionType::Wait);
            reason_payload = reason(ReasonCode::DuplicateActionBlocked, "Action already taken for this bar.");
        }
    } else if position.mode == Mode::Owned && position.execution.entry_price.is_some() {
        let stop_hit = close.zip(levels.effective_stop).map(|(c, s)| c < s).unwrap_or(false);
        let trend_break = position.runtime.consecutive_closes_below_sma200 >= 2;

        if stop_hit {
            if can_execute_action(position, bar_date) {
                register_action(position, bar_date);
                let keep_permanent_exit = position.runtime.permanent_exit;
                set_exit_state(position, bar_date, settings, keep_permanent_exit);
                action = ActionPayload::simple(ActionType::SellAll);
                reason_payload = reason(ReasonCode::StopHit, "Close fell below the effective stop.");
            } else {
                action = ActionPayload::simple(ActionType::Wait);
                reason_payload = reason(ReasonCode::DuplicateActionBlocked, "Action already taken for this bar.");
            }
        } else if trend_break {
            if can_execute_action(position, bar_date) {
                register_action(position, bar_date);
                let keep_permanent_exit = position.runtime.permanent_exit;
                set_exit_state(position, bar_date, settings, keep_permanent_exit);
                action = ActionPayload::simple(ActionType::SellAll);
                reason_payload = reason(ReasonCode::TrendBreak, "Two consecutive closes below SMA200.");
            } else {
                action = ActionPayload::simple(ActionType::Wait);
                reason_payload = reason(ReasonCode::DuplicateActionBlocked, "Action already taken for this bar.");
            }
        } else if position.state == State::NormalRun && levels.is_spike {
            if can_execute_action(position, bar_date) {
                register_action(position, bar_date);
                let sell_pct = close.map(|c| resolve_spike_sell_pct(position, c, settings)).unwrap_or(settings.spike_sell_pct_first);
                position.state = State::SpikeLock;
                position.runtime.spike_lock_start_bar_date = Some(bar_date.to_string());
                position.runtime.last_spike_bar_date = Some(bar_date.to_string());
                action = ActionPayload {
                    action_type: ActionType::SellPartial,
                    sell_pct: Some(sell_pct),
                    buy_pct_of_target: None,
                    price_hint: None,
                };
                reason_payload = reason(ReasonCode::SpikeDetected, "5-day move exceeded the VIX-scaled spike threshold.");
            } else {
                action = ActionPayload::simple(ActionType::Wait);
                reason_payload = reason(ReasonCode::DuplicateActionBlocked, "Action already taken for this bar.");
            }
        } else if trigger == Trigger::Warn {
            if can_execute_action(position, bar_date) {
                register_action(position, bar_date);
                if position.runtime.warn_count == 0 {
                    position.runtime.warn_count = 1;
                    action = ActionPayload {
                        action_type: ActionType::SellPartial,
                        sell_pct: Some(settings.warn_sell_pct),
                        buy_pct_of_target: None,
                        price_hint: None,
                    };
                } else {
                    let keep_permanent_exit = position.runtime.permanent_exit;
                    set_exit_state(position, bar_date, settings, keep_permanent_exit);
                    position.runtime.warn_count = 2;
                    action = ActionPayload::simple(ActionType::SellAll);
                }
                reason_payload = reason(ReasonCode::Warn, "Fundamental warn trigger consumed.");
                trigger_fired = Trigger::Warn;
            } else {
                action = ActionPayload::simple(ActionType::Wait);
                reason_payload = reason(ReasonCode::DuplicateActionBlocked, "Action already taken for this bar.");
            }
        } else if position.state == State::NormalRun
            && !position.runtime.base_sold
            && close.zip(position.targets.base_total).map(|(c, b)| c >= b).unwrap_or(false)
        {
            if can_execute_action(position, bar_date) {
                register_action(position, bar_date);
                position.runtime.base_sold = true;
                action = ActionPayload {
                    action_type: ActionType::SellPartial,
                    sell_pct: Some(settings.profit_at_base_pct),
                    buy_pct_of_target: None,
                    price_hint: None,
                };
                reason_payload = reason(ReasonCode::BaseHit, "Close reached the base target.");
            } else {
                action = ActionPayload::simple(ActionType::Wait);
                reason_payload = reason(ReasonCode::DuplicateActionBlocked, "Action already taken for this bar.");
            }
        } else if position.state == State::NormalRun
            && !position.runtime.bull_sold
            && close.zip(position.targets.bull_total).map(|(c, b)| c >= b).unwrap_or(false)
        {
            if can_execute_action(position, bar_date) {
                register_action(position, bar_date);
                position.runtime.bull_sold = true;
                action = ActionPayload {
                    action_type: ActionType::SellPartial,
                    sell_pct: Some(settings.profit_at_bull_pct),
                    buy_pct_of_target: None,
                    price_hint: None,
                };
                reason_payload = reason(ReasonCode::BullHit, "Close reached the bull target.");
            } else {
                action = ActionPayload::simple(ActionType::Wait);
                reason_payload = reason(ReasonCode::DuplicateActionBlocked, "Action already taken for this bar.");
            }
        }
    }

    if reason_payload.code == ReasonCode::NoTrigger {
        match position.state {
            State::SpikeLock => {
                let absorbed = indicators.five_d_move.map(|m| m > 0.0).unwrap_or(false)
                    && levels
                        .spike_threshold
                        .zip(indicators.five_d_move)
                        .map(|(t, m)| m < t)
                        .unwrap_or(false)
                    && indicators.trend_up;
                if absorbed {
                    position.state = State::NormalRun;
                    reason_payload = reason(ReasonCode::SpikeAbsorbed, "5-day move fell back below the spike threshold.");
                } else if position
                    .runtime
                    .spike_lock_start_bar_date
                    .as_deref()
                    .map(|start| trading_days_since(bars_up_to_date, start) >= settings.spike_lock_sessions)
                    .unwrap_or(false)
                {
                    position.state = State::NormalRun;
                    reason_payload = reason(ReasonCode::SpikeLockTimeout, "Spike lock duration elapsed.");
                }
            }
            State::ExitedCooldown => {
                if position.runtime.permanent_exit {
                    action = ActionPayload::simple(ActionType::Wait);
                    reason_payload = reason(ReasonCode::PermanentExit, "Position is permanently exited.");
                } else if position.runtime.cooldown_bars_left > 0 {
                    action = ActionPayload::simple(ActionType::Wait);
                    reason_payload = reason(ReasonCode::CooldownActive, "Cooldown still active.");
                } else if indicators.trend_up {
                    position.state = State::ReentryWindow;
                    position.runtime.reentry_window_start_bar_date = Some(bar_date.to_string());
                    position.runtime.reentry_bars_left = settings.reentry_window_sessions;
                    action = ActionPayload::simple(ActionType::Wait);
                    reason_payload = reason(ReasonCode::OpenReentryWindow, "Trend turned up; re-entry window opened.");

                    if settings.entry_mvp_enabled {
                        let outcome = evaluate_watch_entry_mvp(position, bar_date, indicators, settings);
                        if outcome.action.action_type == ActionType::BuyAlert {
                            action = outcome.action;
                            reason_payload = outcome.reason;
                        }
                    }
                } else {
                    action = ActionPayload::simple(ActionType::Wait);
                    reason_payload = reason(ReasonCode::CooldownActive, "Cooldown cleared but trend is not rising.");
                }
            }
            State::ReentryWindow => {
                let reentry_trigger = levels.in_band
                    && indicators.reversal
                    && indicators.trend_up
                    && !position.runtime.permanent_exit;
                if reentry_trigger {
                    if can_execute_action(position, bar_date) {
                        register_action(position, bar_date);
                        let c = close.unwrap_or(0.0);
                        position.mode = Mode::Owned;
                        position.state = State::NormalRun;
                        position.execution.entry_price = Some(c);
                        position.execution.entry_bar_date = Some(bar_date.to_string());
                        position.execution.current_weight_pct = position
                            .execution
                            .target_weight_pct
                            .map(|t| t * settings.reentry_position_pct);
                        position.runtime.hwm_close = Some(c);
                        position.runtime.hwm_bar_date = Some(bar_date.to_string());
                        position.runtime.cooldown_start_bar_date = None;
                        position.runtime.cooldown_bars_left = 0;
                        position.runtime.reentry_window_start_bar_date = None;
                        position.runtime.reentry_bars_left = 0;
                        position.runtime.consecutive_closes_below_sma200 = 0;
                        action = ActionPayload {
                            action_type: ActionType::BuyReenter,
                            sell_pct: None,
                            buy_pct_of_target: Some(settings.reentry_position_pct),
                            price_hint: Some(c),
                        };
                        reason_payload = reason(ReasonCode::ReentryTriggered, "Re-entry band, reversal, and trend all confirmed.");
                    } else {
                        action = ActionPayload::simple(ActionType::Wait);
                        reason_payload = reason(ReasonCode::DuplicateActionBlocked, "Action already taken for this bar.");
                    }
                } else if levels.pullback_max.zip(close).map(|(pm, c)| c < pm).unwrap_or(false) || !indicators.trend_up {
                    position.state = State::ExitedCooldown;
                    position.runtime.cooldown_start_bar_date = Some(bar_date.to_string());
                    position.runtime.cooldown_bars_left = settings.cooldown_sessions;
                    position.runtime.reentry_window_start_bar_date = None;
                    position.runtime.reentry_bars_left = 0;
                    action = ActionPayload::simple(ActionType::Wait);
                    reason_payload = reason(ReasonCode::CooldownActive, "Re-entry window invalidated; cooldown restarted.");
                } else if position.runtime.reentry_bars_left == 0 {
                    position.state = State::ExitedCooldown;
                    position.runtime.cooldown_start_bar_date = Some(bar_date.to_string());
                    position.runtime.cooldown_bars_left = settings.cooldown_sessions;
                    position.runtime.reentry_window_start_bar_date = None;
                    action = ActionPayload::simple(ActionType::Wait);
                    reason_payload = reason(ReasonCode::ReentryExpired, "Re-entry window expired without a trigger.");
                }
            }
            State::NormalRun => {}
        }
    }

    position.runtime.last_processed_bar_date = Some(bar_date.to_string());

    let levels_json = serde_json::to_value(levels).unwrap_or(serde_json::Value::Null);
    let mut computed = serde_json::to_value(indicators).unwrap_or(serde_json::Value::Null);
    if let (serde_json::Value::Object(computed_map), serde_json::Value::Object(levels_map)) =
        (&mut computed, &levels_json)
    {
        for (k, v) in levels_map {
            computed_map.insert(k.clone(), v.clone());
        }
    }
    position.computed = computed.clone();

    let triggered = mode_before != position.mode
        || state_before != position.state
        || trigger_fired != Trigger::None
        || matches!(
            action.action_type,
            ActionType::SellPartial | ActionType::SellAll | ActionType::BuyReenter | ActionType::BuyAlert
        );

    DecisionOfDay {
        schema: DecisionOfDay::SCHEMA.to_string(),
        bar_date: bar_date.to_string(),
        key: key.to_string(),
        symbol: position.identity.ticker.clone(),
        mode: position.mode,
        state_before,
        state_after: position.state,
        action,
        reason: reason_payload,
        levels: levels_json,
        targets: serde_json::to_value(&position.targets).unwrap_or(serde_json::Value::Null),
        kpi: position.thesis_kpis.clone(),
        transitions: Transitions {
            triggered,
            trigger: trigger_fired,
        },
    }
}

pub fn is_actionable(decision: &DecisionOfDay) -> bool {
    core_is_actionable(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use psm_core::{Execution, Identity, Runtime, Targets};

    fn bar(date: &str, close: f64) -> Bar {
        Bar {
            date: date.to_string(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000.0,
        }
    }

    fn owned_position(entry: f64) -> Position {
        Position {
            identity: Identity {
                ticker: "ACME".into(),
                exchange: "US".into(),
                stooq_symbol: None,
                currency: None,
            },
            mode: Mode::Owned,
            state: State::NormalRun,
            targets: Targets::default(),
            execution: Execution {
                entry_price: Some(entry),
                entry_bar_date: Some("2024-01-01".into()),
                target_weight_pct: Some(1.0),
                current_weight_pct: Some(1.0),
            },
            fundamental_triggers: Default::default(),
            runtime: Runtime {
                hwm_close: Some(entry),
                ..Default::default()
            },
            buffers: Default::default(),
            computed: serde_json::Value::Null,
            entry_profile: Default::default(),
            thesis_kpis: serde_json::Value::Null,
        }
    }

    #[test]
    fn stop_hit_triggers_full_exit() {
        let mut position = owned_position(100.0);
        let bars = vec![bar("2024-02-01", 40.0)];
        let settings = Settings::default();
        let indicators = psm_indicators::compute_indicator_snapshot(&bars, &settings);
        let levels = psm_levels::LevelsSnapshot {
            effective_stop: Some(90.0),
            ..Default::default()
        };
        let decision = advance(&mut position, "ACME:US", &bars, "2024-02-01", &indicators, &levels, &settings);
        assert_eq!(decision.action.action_type, ActionType::SellAll);
        assert_eq!(decision.reason.code, ReasonCode::StopHit);
        assert_eq!(position.mode, Mode::Watch);
        assert_eq!(position.state, State::ExitedCooldown);
        assert_eq!(position.runtime.cooldown_bars_left, settings.cooldown_sessions);
    }

    #[test]
    fn falsifier_sets_permanent_exit() {
        let mut position = owned_position(100.0);
        position.fundamental_triggers.pending_trigger = Trigger::Falsifier;
        let bars = vec![bar("2024-02-01", 105.0)];
        let settings = Settings::default();
        let indicators = psm_indicators::compute_indicator_snapshot(&bars, &settings);
        let levels = psm_levels::LevelsSnapshot::default();
        let decision = advance(&mut position, "ACME:US", &bars, "2024-02-01", &indicators, &levels, &settings);
        assert_eq!(decision.action.action_type, ActionType::SellAll);
        assert!(position.runtime.permanent_exit);
    }

    #[test]
    fn duplicate_action_blocked_on_second_call_same_bar() {
        let mut position = owned_position(100.0);
        let bars = vec![bar("2024-02-01", 40.0)];
        let settings = Settings::default();
        let indicators = psm_indicators::compute_indicator_snapshot(&bars, &settings);
        let levels = psm_levels::LevelsSnapshot {
            effective_stop: Some(90.0),
            ..Default::default()
        };
        let _first = advance(&mut position, "ACME:US", &bars, "2024-02-01", &indicators, &levels, &settings);
        // position is now WATCH/EXITED_COOLDOWN; re-running the same bar date must not re-trigger a sell.
        let second_indicators = psm_indicators::compute_indicator_snapshot(&bars, &settings);
        let decision = advance(&mut position, "ACME:US", &bars, "2024-02-01", &second_indicators, &levels, &settings);
        assert_ne!(decision.action.action_type, ActionType::SellAll);
    }
}
