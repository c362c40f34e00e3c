//! Event Store Query Engine: spec §4.7. Typed queries over events, all
//! scoped to a single `runId`, all filters bound as parameters, all
//! property paths validated before use.

pub mod aggregate;
pub mod events_by_entity;
pub mod events_by_type;
pub mod sequence;
pub mod snapshot;
pub mod validation_errors;

use crate::errors::CoreError;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{Connection, OpenFlags};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};

/// Hard per-query timeout (spec §4.7/§5).
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

pub const MIN_PAGE_SIZE: u32 = 1;
pub const MAX_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Hard cap on rows a query is allowed to pull into memory before it can
/// page, filter, or group them in Rust — `event_sequence` and
/// `validation_errors` both need the full per-run row set before SQL's
/// `LIMIT`/`OFFSET` can apply. A run past this size returns
/// `CoreError::ResultTooLarge` instead of buffering it all (spec §7
/// "result-too-large").
pub const MAX_RESULT_ROWS: usize = 50_000;

/// `^\$\.[A-Za-z0-9_.]+$` — the only shape a JSON property path may take
/// (spec §4.7 "Aggregate metrics").
pub static PROPERTY_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\.[A-Za-z0-9_.]+$").unwrap());

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
pub struct PageParams {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub page_index: u32,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl PageParams {
    /// Clamps `page_size` into `[1, 1000]`, per spec §4.7.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            page_size: self.page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE),
            page_index: self.page_index,
        }
    }

    #[must_use]
    pub fn offset(&self) -> i64 {
        i64::from(self.page_index) * i64::from(self.page_size)
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct PagedResponse<T: Serialize + JsonSchema> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub returned_count: usize,
    pub page_index: u32,
    pub page_size: u32,
    pub has_more: bool,
    pub query_time_ms: f64,
    pub truncated: bool,
    pub truncated_reason: Option<String>,
}

/// A read-only handle onto one run's SQLite event database.
pub struct QueryEngine {
    path: std::path::PathBuf,
}

impl QueryEngine {
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Err(CoreError::Database(format!(
                "event database not found: {}",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn connect(&self) -> Result<Connection, CoreError> {
        Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(CoreError::from)
    }

    /// `run-not-found` if `run_id` has no row in `BacktestRuns`.
    fn ensure_run_exists(conn: &Connection, run_id: &uuid::Uuid) -> Result<(), CoreError> {
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM BacktestRuns WHERE id = ?1)",
                [run_id.to_string()],
                |r| r.get(0),
            )
            .map_err(CoreError::from)?;
        if exists {
            Ok(())
        } else {
            Err(CoreError::RunNotFound(run_id.to_string()))
        }
    }
}

/// Runs a blocking SQLite closure under the 10s hard timeout (spec §4.7,
/// §5). Cancellation is best-effort: an in-flight statement runs to
/// completion of the current row batch rather than being forcibly killed
/// mid-statement, matching spec §5's cancellation discipline.
pub async fn with_timeout<T, F>(f: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Result<T, CoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(QUERY_TIMEOUT, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(inner)) => inner,
        Ok(Err(join_err)) => Err(CoreError::Database(join_err.to_string())),
        Err(_elapsed) => Err(CoreError::QueryTimeout(QUERY_TIMEOUT.as_secs())),
    }
}

pub struct Timer(Instant);

impl Timer {
    #[must_use]
    pub fn start() -> Self {
        Self(Instant::now())
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.0.elapsed().as_secs_f64() * 1000.0
    }
}

pub(super) fn validate_property_path(path: &str) -> Result<(), CoreError> {
    if PROPERTY_PATH_RE.is_match(path) {
        Ok(())
    } else {
        Err(CoreError::InvalidJsonPath(path.to_string()))
    }
}

use super::models::{Event, EventCategory, EventType, Severity};
use chrono::{DateTime, Utc};
use rusqlite::Row;

/// Deserializes one `Events` row. Column order must match every `SELECT`
/// below (`eventId, runId, timestamp, eventType, severity, category,
/// properties, parentEventId, validationErrors`).
pub(super) fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let event_id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let timestamp: String = row.get(2)?;
    let event_type: String = row.get(3)?;
    let severity: String = row.get(4)?;
    let category: String = row.get(5)?;
    let properties: String = row.get(6)?;
    let parent_event_id: Option<String> = row.get(7)?;
    let validation_errors: Option<String> = row.get(8)?;

    Ok(Event {
        event_id: event_id.parse().unwrap_or_default(),
        run_id: run_id.parse().unwrap_or_default(),
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        event_type: EventType::parse(&event_type).unwrap_or(EventType::StateChange),
        severity: Severity::parse(&severity).unwrap_or(Severity::Info),
        category: EventCategory::parse(&category).unwrap_or(EventCategory::Performance),
        properties: serde_json::from_str(&properties).unwrap_or(serde_json::Value::Null),
        parent_event_id: parent_event_id.and_then(|s| s.parse().ok()),
        validation_errors: validation_errors.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

pub(super) fn validate_time_range(
    start: Option<chrono::DateTime<chrono::Utc>>,
    end: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<(), CoreError> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(CoreError::InvalidTimeRange {
                start: s.to_rfc3339(),
                end: e.to_rfc3339(),
            });
        }
    }
    Ok(())
}
