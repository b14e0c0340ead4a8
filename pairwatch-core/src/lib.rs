//! Pairwatch core - resampling and pairs analytics engine
//!
//! Turns a live trade-tick stream into time-bucketed OHLCV bars and
//! incrementally-maintained pairwise statistical-arbitrage analytics
//! (hedge ratio, spread, rolling z-score, rolling correlation, ADF
//! stationarity test), and evaluates edge-triggered alert rules against
//! each new analytics snapshot.
//!
//! The pipeline is event-driven: ticks are resampled on the producer side,
//! completed bars flow over an ordered channel to a single analytics worker,
//! and every published artifact (bar, snapshot, alert) is immutable. Missing
//! history is never fabricated: empty buckets emit no bar, and windows below
//! their minimum sample count surface `InsufficientData` rather than a
//! default value.

pub mod alert;
pub mod analytics;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod persist;
pub mod resample;
pub mod window;

// Re-export commonly used types for convenience
pub use alert::{AlertEvent, AlertField, AlertOp, AlertRuleSpec};
pub use analytics::{AnalyticsSnapshot, SnapshotStatus};
pub use config::EngineConfig;
pub use engine::{EngineHandle, PairsEngine};
pub use error::{AlertError, ConfigError, IngestionError};
pub use event::{Bar, PairId, PairSpec, Tick, Timeframe};
pub use persist::{ChannelPersist, NullPersist, PersistEvent, PersistLog};
pub use resample::{IngestOutcome, IngestReport, Resampler};
