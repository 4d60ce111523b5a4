pub mod clock;
pub mod config;
pub mod config_loader;
pub mod keys;
pub mod market;
pub mod outcome;
pub mod signal;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AppConfig, CalibrationConfig, ConfidenceSettings, EngineConfig, ExchangesConfig, MarketConfig,
    SchedulerConfig, StoreConfig, VolMultipliers,
};
pub use config_loader::ConfigLoader;
pub use market::{finite, last_bar_delta_pct, Candle, DeltaSet, Horizon, PerHorizon, Timeframe};
pub use outcome::{OutcomeRecord, OutcomeStatus};
pub use signal::{
    Direction, Regime, RegimeInfo, Signal, StructureSnapshot, TimeframeStructure, TradeLevels, VoteSet,
};
pub use traits::KeyValueStore;
