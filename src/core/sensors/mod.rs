//! Sensor collection and aggregation.

pub mod aggregate;
pub mod csv;
pub mod engine;
pub mod history;
pub mod model;
pub mod providers;
pub mod runtime;
pub mod status;
pub mod units;

pub use aggregate::{build_groups, merge_samples, parse_sensor_data};
pub use csv::{build_history_csv, HistorySeries};
pub use engine::{EngineConfig, EngineHandle, EngineSnapshot, SensorEngine};
pub use history::{HistoryBuffer, HistoryStore, DEFAULT_HISTORY_SIZE};
pub use model::{
    Reading, SampleWithProvider, SensorCategory, SensorChipGroup, SensorData, SensorKind,
    SensorSample,
};
pub use providers::{ErrorCode, ProviderError, ProviderRegistry, SensorProvider, Subscription};
pub use runtime::SensorRuntime;
pub use status::Status;
pub use units::{Severity, TemperatureUnit};
