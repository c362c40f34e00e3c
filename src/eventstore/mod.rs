//! AI-Agentic Debug Event Store & Query Engine: spec §4.6/§4.7. One SQLite
//! database per backtest run, written in batches during the run and
//! queried read-only afterward through [`query::QueryEngine`].

pub mod models;
pub mod query;
pub mod schema;
pub mod writer;

pub use models::{BacktestRun, EntityType, Event, EventCategory, EventType, Severity};
pub use query::QueryEngine;
pub use writer::EventStoreWriter;
