//! Notification sink contract and daily run-report assembly: the emitted
//! run-result and last-run payload shapes external consumers read.

use async_trait::async_trait;
use psm_core::{is_actionable, AnomalyCode, AnomalyEvent, AnomalySeverity, DailyRunResult, DecisionOfDay, Mode, State};
use serde_json::{json, Value};
use thiserror::Error;

pub const RUN_REPORT_SCHEMA: &str = "psm_v4.run_report.v1";
pub const LAST_RUN_SCHEMA: &str = "psm_v4.last_run.v1";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("telegram delivery failed: {0}")]
    Delivery(String),
}

/// A destination for the run's human-readable messages. The core only
/// depends on this trait; Telegram/email/webhook transports live outside
/// the crate that owns state-machine semantics.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), NotifyError>;
}

/// Drops every message; used when no transport is configured.
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        tracing::debug!(%message, "no notification sink configured, dropping message");
        Ok(())
    }
}

/// One human-readable line for a single decision, used to build the
/// Telegram-style digest. Only called for actionable decisions.
pub fn format_decision_line(decision: &DecisionOfDay) -> String {
    format!(
        "{symbol}: {mode:?} {before:?}->{after:?} {action:?} — {reason}",
        symbol = decision.symbol,
        mode = decision.mode,
        before = decision.state_before,
        after = decision.state_after,
        action = decision.action.action_type,
        reason = decision.reason.text,
    )
}

/// The per-decision lines that would actually be pushed to an operator,
/// filtered down to actionable outcomes (`is_actionable`).
pub fn build_telegram_messages(decisions: &[DecisionOfDay]) -> Vec<String> {
    decisions
        .iter()
        .filter(|d| is_actionable(d))
        .map(format_decision_line)
        .collect()
}

fn joined_telegram_message(messages: &[String]) -> String {
    if messages.is_empty() {
        "No actionable changes today.".to_string()
    } else {
        messages.join("\n")
    }
}

/// Aggregate counts for the run's `summary` block: positions by mode/state,
/// actionable decision count, and anomaly counts by severity/code.
pub fn summarize(decisions: &[DecisionOfDay], anomaly_events: &[AnomalyEvent]) -> Value {
    let mut owned = 0u64;
    let mut watch = 0u64;
    let mut normal_run = 0u64;
    let mut spike_lock = 0u64;
    let mut exited_cooldown = 0u64;
    let mut reentry_window = 0u64;
    let mut unrealized_pnl_sum = 0f64;
    let mut unrealized_pnl_count = 0u64;

    for d in decisions {
        match d.mode {
            Mode::Owned => owned += 1,
            Mode::Watch => watch += 1,
        }
        match d.state_after {
            State::NormalRun => normal_run += 1,
            State::SpikeLock => spike_lock += 1,
            State::ExitedCooldown => exited_cooldown += 1,
            State::ReentryWindow => reentry_window += 1,
        }
        if let Some(pnl) = d.levels.get("unrealized_pnl_pct").and_then(Value::as_f64) {
            unrealized_pnl_sum += pnl;
            unrealized_pnl_count += 1;
        }
    }

    let actionable_count = decisions.iter().filter(|d| is_actionable(d)).count();

    let mut anomaly_count_total = 0u64;
    let mut anomaly_count_high = 0u64;
    let mut anomaly_count_info = 0u64;
    let mut anomaly_count_multiday_drop = 0u64;
    let mut anomaly_count_std_pullback = 0u64;
    for e in anomaly_events {
        anomaly_count_total += 1;
        match e.severity {
            AnomalySeverity::High => anomaly_count_high += 1,
            AnomalySeverity::Info => anomaly_count_info += 1,
        }
        match e.code {
            AnomalyCode::MultidayDrop => anomaly_count_multiday_drop += 1,
            AnomalyCode::StdPullback => anomaly_count_std_pullback += 1,
            _ => {}
        }
    }

    json!({
        "modes": { "OWNED": owned, "WATCH": watch },
        "states": {
            "NORMAL_RUN": normal_run,
            "SPIKE_LOCK": spike_lock,
            "EXITED_COOLDOWN": exited_cooldown,
            "REENTRY_WINDOW": reentry_window,
        },
        "valuation": {
            "avg_unrealized_pnl_pct": if unrealized_pnl_count > 0 {
                Value::from(unrealized_pnl_sum / unrealized_pnl_count as f64)
            } else {
                Value::Null
            },
            "owned_with_pnl_count": unrealized_pnl_count,
        },
        "actionable_count": actionable_count,
        "anomaly_count_total": anomaly_count_total,
        "anomaly_count_high": anomaly_count_high,
        "anomaly_count_info": anomaly_count_info,
        "anomaly_count_multiday_drop": anomaly_count_multiday_drop,
        "anomaly_count_std_pullback": anomaly_count_std_pullback,
        "telegram_message_count": decisions.iter().filter(|d| is_actionable(d)).count(),
    })
}

/// Assembles the full daily run result the orchestrator returns: decisions,
/// the human digest, the aggregate summary, and anomaly events.
pub fn build_report_payload(
    bar_date: &str,
    decisions: Vec<DecisionOfDay>,
    anomaly_events: Vec<AnomalyEvent>,
) -> DailyRunResult {
    let telegram_messages = build_telegram_messages(&decisions);
    let telegram_message = joined_telegram_message(&telegram_messages);
    let summary = summarize(&decisions, &anomaly_events);

    DailyRunResult {
        bar_date: bar_date.to_string(),
        decisions,
        telegram_message,
        summary,
        telegram_messages,
        anomaly_events,
    }
}

/// The small last-run marker written alongside the main report, so an
/// external watchdog can check freshness without parsing the full report.
pub fn build_last_run_payload(bar_date: &str, now_utc_iso: &str) -> Value {
    json!({
        "schema": LAST_RUN_SCHEMA,
        "bar_date": bar_date,
        "last_run_utc": now_utc_iso,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use psm_core::{ActionPayload, ActionType, ReasonCode, ReasonPayload, Transitions, Trigger};

    fn hold_decision(symbol: &str) -> DecisionOfDay {
        DecisionOfDay {
            schema: DecisionOfDay::SCHEMA.to_string(),
            bar_date: "2024-05-01".to_string(),
            key: format!("{symbol}:US"),
            symbol: symbol.to_string(),
            mode: Mode::Owned,
            state_before: State::NormalRun,
            state_after: State::NormalRun,
            action: ActionPayload::simple(ActionType::Hold),
            reason: ReasonPayload {
                code: ReasonCode::NoTrigger,
                text: "no trigger fired".into(),
            },
            levels: json!({"unrealized_pnl_pct": 12.5}),
            targets: Value::Null,
            kpi: Value::Null,
            transitions: Transitions {
                triggered: false,
                trigger: Trigger::None,
            },
        }
    }

    #[test]
    fn summary_counts_positions_by_mode_and_state() {
        let decisions = vec![hold_decision("AAA"), hold_decision("BBB")];
        let summary = summarize(&decisions, &[]);
        assert_eq!(summary["modes"]["OWNED"], json!(2));
        assert_eq!(summary["actionable_count"], json!(0));
    }

    #[test]
    fn telegram_digest_falls_back_to_placeholder_when_nothing_actionable() {
        let decisions = vec![hold_decision("AAA")];
        let messages = build_telegram_messages(&decisions);
        assert!(messages.is_empty());
        assert_eq!(joined_telegram_message(&messages), "No actionable changes today.");
    }
}
