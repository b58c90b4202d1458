pub mod error;
pub mod position;
pub mod settings;
pub mod types;

pub use error::PsmError;
pub use position::{make_key, split_key, Buffers, EntryProfile, Execution, FundamentalTriggers,
    Identity, Meta, Position, Runtime, Store, Targets, SCHEMA_VERSION};
pub use settings::Settings;
pub use types::{
    is_actionable, ActionPayload, ActionType, AnomalyCode, AnomalyEvent, AnomalySeverity, Bar,
    DailyRunResult, DecisionOfDay, Mode, ReasonCode, ReasonPayload, State, Transitions, Trigger,
};
