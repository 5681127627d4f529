pub mod button;
pub mod channel;
pub mod coalesce;
pub mod command;
pub mod config;
pub mod curve;
pub mod engine;
pub mod link;
pub mod ports;
pub mod power;
pub mod topics;
pub mod types;

pub use button::ButtonDebouncer;
pub use channel::{persist_key, ChannelId};
pub use coalesce::{DirtyMark, QUIET_PERIOD_MS};
pub use command::{parse_form, Command, CommandError};
pub use config::{ConfigError, EngineConfig, HardwareConfig, HardwareVariant, RuntimeConfig};
pub use curve::DutyCurve;
pub use engine::{DutyEngine, EngineAction, RestoredState};
pub use link::{LinkAction, LinkSupervisor};
pub use ports::{apply_actions, DutyOutput, MemoryStore, SettingsStore};
pub use power::POWER_KEY;
pub use topics::*;
pub use types::{ChannelStatus, DimmerStatePayload, DimmerStatus};
