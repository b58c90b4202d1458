use serde::{Deserialize, Serialize};

/// A single daily OHLCV bar, keyed by an ISO `YYYY-MM-DD` date string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Owned,
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    NormalRun,
    SpikeLock,
    ExitedCooldown,
    ReentryWindow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Hold,
    SellPartial,
    SellAll,
    Wait,
    BuyReenter,
    BuyAlert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    None,
    Warn,
    Falsifier,
    Confirm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    NoNewBar,
    NoTrigger,
    EntryWaitData,
    EntryWatch,
    EntrySetup,
    EntryNoBuyTrend,
    EntryNoBuyOverheat,
    BuyTrigger,
    Falsifier,
    Warn,
    StopHit,
    TrendBreak,
    SpikeDetected,
    SpikeAbsorbed,
    SpikeLockTimeout,
    BaseHit,
    BullHit,
    CooldownActive,
    OpenReentryWindow,
    ReentryTriggered,
    ReentryExpired,
    PermanentExit,
    DataFetchError,
    DataSuspected,
    DuplicateActionBlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyCode {
    MomentumWarn,
    TrendDeterioration,
    AbnormalDrawdown,
    ExtremeDrawdown,
    FixedDailyDrop,
    MultidayDrop,
    RecentAbnormalTrend,
    StdPullback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalySeverity {
    Info,
    High,
}

/// The resolved action for a bar-date: a type tag plus the optional sizing hints
/// the state machine attaches depending on which trigger fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPayload {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sell_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buy_pct_of_target: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_hint: Option<f64>,
}

impl ActionPayload {
    pub fn simple(action_type: ActionType) -> Self {
        Self {
            action_type,
            sell_pct: None,
            buy_pct_of_target: None,
            price_hint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonPayload {
    pub code: ReasonCode,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transitions {
    pub triggered: bool,
    pub trigger: Trigger,
}

/// A single day's decision for a single symbol. Mirrors the `psm_v4.decision.v1`
/// schema: bar identity, mode/state before and after, the action taken, the
/// reason it fired, and the computed levels/targets/kpi snapshots at that bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOfDay {
    pub schema: String,
    pub bar_date: String,
    pub key: String,
    pub symbol: String,
    pub mode: Mode,
    pub state_before: State,
    pub state_after: State,
    pub action: ActionPayload,
    pub reason: ReasonPayload,
    pub levels: serde_json::Value,
    pub targets: serde_json::Value,
    pub kpi: serde_json::Value,
    pub transitions: Transitions,
}

impl DecisionOfDay {
    pub const SCHEMA: &'static str = "psm_v4.decision.v1";
}

/// A single anomaly classification for a symbol at a bar date. Mirrors the
/// `psm_v4.anomaly.v1` schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub schema: String,
    pub bar_date: String,
    pub key: String,
    pub symbol: String,
    pub code: AnomalyCode,
    pub severity: AnomalySeverity,
    pub metrics: serde_json::Value,
    pub text: String,
}

impl AnomalyEvent {
    pub const SCHEMA: &'static str = "psm_v4.anomaly.v1";
}

/// The outcome of one full daily run across the whole watchlist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyRunResult {
    pub bar_date: String,
    pub decisions: Vec<DecisionOfDay>,
    pub telegram_message: String,
    pub summary: serde_json::Value,
    #[serde(default)]
    pub telegram_messages: Vec<String>,
    #[serde(default)]
    pub anomaly_events: Vec<AnomalyEvent>,
}

/// `HOLD`/`WAIT` are never "actionable"; everything else, a state transition,
/// or one of a fixed set of reason codes is.
pub fn is_actionable(decision: &DecisionOfDay) -> bool {
    if !matches!(
        decision.action.action_type,
        ActionType::Hold | ActionType::Wait
    ) {
        return true;
    }
    if decision.state_before != decision.state_after {
        return true;
    }
    matches!(
        decision.reason.code,
        ReasonCode::SpikeDetected
            | ReasonCode::SpikeAbsorbed
            | ReasonCode::SpikeLockTimeout
            | ReasonCode::StopHit
            | ReasonCode::TrendBreak
            | ReasonCode::BaseHit
            | ReasonCode::BullHit
            | ReasonCode::ReentryTriggered
    )
}
