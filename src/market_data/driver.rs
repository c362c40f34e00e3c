//! The historical market-data driver: spec §6. Binary and text formats are
//! both supported; the core never parses them — it delegates decoding to
//! this trait, exactly as the teacher's `DataStore` trait delegates parquet
//! decoding to `ParquetStore`.

use chrono::NaiveDate;

/// A single decoded market-data message (tick, bar, quote — opaque payload
/// the core never interprets beyond its date).
#[derive(Debug, Clone)]
pub struct MarketMessage {
    pub date: NaiveDate,
    pub payload: Vec<u8>,
}

/// Opaque market-data storage/decoding driver (spec §6). The core treats
/// this as an external collaborator: it does not know or care whether the
/// backing format is binary or text.
pub trait MarketDataDriver: Send + Sync {
    fn get_dates(&self, security: &str, data_type: &str) -> anyhow::Result<Vec<NaiveDate>>;
    fn get_meta(&self, security: &str, data_type: &str, date: NaiveDate) -> anyhow::Result<serde_json::Value>;
    fn load(&self, security: &str, data_type: &str, date: NaiveDate) -> anyhow::Result<Vec<MarketMessage>>;
    fn save(&self, security: &str, data_type: &str, msgs: &[MarketMessage]) -> anyhow::Result<()>;
    fn delete(&self, security: &str, data_type: &str, date: NaiveDate) -> anyhow::Result<()>;
}
