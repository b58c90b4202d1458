use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::settings::Settings;
use crate::types::{Bar, Mode, State, Trigger};

pub const SCHEMA_VERSION: &str = "psm_v4";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default = "schema_version")]
    pub schema_version: String,
    #[serde(default)]
    pub asof_bar_date: Option<String>,
    #[serde(default)]
    pub last_run_utc: Option<String>,
}

fn schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Identity {
    pub ticker: String,
    pub exchange: String,
    #[serde(default)]
    pub stooq_symbol: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Targets {
    #[serde(default)]
    pub bear_total: Option<f64>,
    #[serde(default)]
    pub base_total: Option<f64>,
    #[serde(default)]
    pub bull_total: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Execution {
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub entry_bar_date: Option<String>,
    #[serde(default)]
    pub target_weight_pct: Option<f64>,
    #[serde(default)]
    pub current_weight_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundamentalTriggers {
    #[serde(default)]
    pub pending_trigger: Trigger,
    #[serde(default)]
    pub last_trigger_bar_date: Option<String>,
}

impl Default for FundamentalTriggers {
    fn default() -> Self {
        Self {
            pending_trigger: Trigger::None,
            last_trigger_bar_date: None,
        }
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger::None
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Runtime {
    #[serde(default)]
    pub hwm_close: Option<f64>,
    #[serde(default)]
    pub hwm_bar_date: Option<String>,
    #[serde(default)]
    pub hwm_at_exit: Option<f64>,
    #[serde(default)]
    pub cooldown_start_bar_date: Option<String>,
    #[serde(default)]
    pub cooldown_bars_left: u32,
    #[serde(default)]
    pub spike_lock_start_bar_date: Option<String>,
    #[serde(default)]
    pub last_spike_bar_date: Option<String>,
    #[serde(default)]
    pub reentry_window_start_bar_date: Option<String>,
    #[serde(default)]
    pub reentry_bars_left: u32,
    #[serde(default)]
    pub base_sold: bool,
    #[serde(default)]
    pub bull_sold: bool,
    #[serde(default)]
    pub warn_count: u32,
    #[serde(default)]
    pub permanent_exit: bool,
    #[serde(default)]
    pub consecutive_closes_below_sma200: u32,
    #[serde(default)]
    pub last_processed_bar_date: Option<String>,
    #[serde(default)]
    pub last_action_bar_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Buffers {
    #[serde(default)]
    pub ohlc: Vec<Bar>,
}

/// Opaque, importer-populated sizing/thesis bookkeeping. The core
/// round-trips these verbatim; `thesis_kpis` is surfaced on `DecisionOfDay.kpi`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryProfile {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub identity: Identity,
    pub mode: Mode,
    pub state: State,
    #[serde(default)]
    pub targets: Targets,
    #[serde(default)]
    pub execution: Execution,
    #[serde(default)]
    pub fundamental_triggers: FundamentalTriggers,
    #[serde(default)]
    pub runtime: Runtime,
    #[serde(default)]
    pub buffers: Buffers,
    #[serde(default)]
    pub computed: serde_json::Value,
    #[serde(default)]
    pub entry_profile: EntryProfile,
    #[serde(default)]
    pub thesis_kpis: serde_json::Value,
}

impl Position {
    /// A freshly-created position: always starts in `WATCH / EXITED_COOLDOWN`
    /// with no entry price, matching `_find_or_create_key`'s baseline reset.
    pub fn new(ticker: &str, exchange: &str) -> Self {
        Self {
            identity: Identity {
                ticker: ticker.to_string(),
                exchange: exchange.to_string(),
                stooq_symbol: None,
                currency: None,
            },
            mode: Mode::Watch,
            state: State::ExitedCooldown,
            targets: Targets::default(),
            execution: Execution::default(),
            fundamental_triggers: FundamentalTriggers::default(),
            runtime: Runtime::default(),
            buffers: Buffers::default(),
            computed: serde_json::Value::Object(Default::default()),
            entry_profile: EntryProfile::default(),
            thesis_kpis: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn key(&self) -> String {
        make_key(&self.identity.ticker, &self.identity.exchange)
    }
}

pub fn make_key(ticker: &str, exchange: &str) -> String {
    format!("{}:{}", ticker.trim().to_uppercase(), exchange.trim().to_uppercase())
}

pub fn split_key(key: &str) -> (String, String) {
    match key.split_once(':') {
        Some((ticker, exchange)) => (ticker.to_string(), exchange.to_string()),
        None => (key.to_string(), String::new()),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Store {
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub global: Settings,
    #[serde(default)]
    pub positions: BTreeMap<String, Position>,
    #[serde(default)]
    pub research_rows: Vec<serde_json::Value>,
    #[serde(default)]
    pub research_import_meta: serde_json::Value,
}

impl Store {
    pub fn empty() -> Self {
        Self {
            meta: Meta {
                schema_version: schema_version(),
                asof_bar_date: None,
                last_run_utc: None,
            },
            global: Settings::default(),
            positions: BTreeMap::new(),
            research_rows: Vec::new(),
            research_import_meta: serde_json::Value::Object(Default::default()),
        }
    }

    /// Iterates positions in sorted-key order, since `positions` is a
    /// `BTreeMap` — callers that fan out per symbol get a deterministic run
    /// order for free.
    pub fn iter_positions(&self) -> impl Iterator<Item = (&String, &Position)> {
        self.positions.iter()
    }

    pub fn ensure_position(&mut self, key: &str, ticker: &str, exchange: &str) -> &mut Position {
        self.positions
            .entry(key.to_string())
            .or_insert_with(|| Position::new(ticker, exchange))
    }

    pub fn touch_meta(&mut self, asof_bar_date: &str, now_utc_iso: &str) {
        self.meta.asof_bar_date = Some(asof_bar_date.to_string());
        self.meta.last_run_utc = Some(now_utc_iso.to_string());
        self.meta.schema_version = schema_version();
    }
}
