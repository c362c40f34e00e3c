//! Event Store Writer: spec §4.6. Durable append of backtest events to a
//! per-run SQLite database; fresh file per run; batched writes.

use super::models::{format_timestamp, BacktestRun, Event};
use super::schema;
use crate::errors::CoreError;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

struct Shared {
    conn: Mutex<Connection>,
    buffer: Mutex<Vec<Event>>,
    batch_size: usize,
}

impl Shared {
    /// Flushes the buffer to disk in a single transaction. Write failures
    /// are logged and dropped (spec §7: "the event-store writer never
    /// raises during strategy execution") — the caller of `write_event`
    /// never observes a SQLite error from batching.
    fn flush(&self) {
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.is_empty() {
            return;
        }
        let events = std::mem::take(&mut *buffer);
        drop(buffer);

        let conn = self.conn.lock().unwrap();
        if let Err(e) = write_batch(&conn, &events) {
            tracing::error!(error = %e, count = events.len(), "failed to flush event batch; events dropped");
        }
    }
}

fn write_batch(conn: &Connection, events: &[Event]) -> Result<(), CoreError> {
    let stmt_conn = conn.unchecked_transaction()?;
    {
        let mut stmt = stmt_conn.prepare_cached(
            "INSERT INTO Events (eventId, runId, timestamp, eventType, severity, category, properties, parentEventId, validationErrors)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for e in events {
            stmt.execute(params![
                e.event_id.to_string(),
                e.run_id.to_string(),
                format_timestamp(&e.timestamp),
                e.event_type.as_str(),
                e.severity.as_str(),
                e.category.as_str(),
                e.properties.to_string(),
                e.parent_event_id.map(|id| id.to_string()),
                e.validation_errors.as_ref().map(|v| serde_json::Value::from(v.clone()).to_string()),
            ])?;
        }
    }
    stmt_conn.commit()?;
    Ok(())
}

/// Per-run writer. The database file is recreated fresh at construction
/// (spec §4.6/§9: unlink-then-create, never dropping tables, so stale
/// autoincrement counters and schema-version metadata never leak across
/// runs — spec invariant §8.5).
pub struct EventStoreWriter {
    shared: Arc<Shared>,
    flush_interval: Duration,
    background: Option<JoinHandle<()>>,
    shutdown: Arc<Notify>,
}

impl EventStoreWriter {
    /// Deletes any existing file at `path`, creates parent directories if
    /// absent, applies the schema, and inserts the single `BacktestRun` row
    /// this database will ever hold.
    pub fn create(path: &Path, run: &BacktestRun) -> Result<Self, CoreError> {
        Self::create_with_batching(path, run, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL)
    }

    pub fn create_with_batching(
        path: &Path,
        run: &BacktestRun,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::Database(format!("failed to create event db directory: {e}")))?;
        }
        if path.exists() {
            std::fs::remove_file(path)
                .map_err(|e| CoreError::Database(format!("failed to remove stale event db: {e}")))?;
        }

        let mut conn = Connection::open(path)?;
        schema::migrate(&mut conn)?;
        conn.execute(
            "INSERT INTO BacktestRuns (id, startTime, endTime, strategyConfigHash, createdAt)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run.id.to_string(),
                format_timestamp(&run.start_time),
                format_timestamp(&run.end_time),
                run.strategy_config_hash,
                format_timestamp(&run.created_at),
            ],
        )?;

        let shared = Arc::new(Shared {
            conn: Mutex::new(conn),
            buffer: Mutex::new(Vec::with_capacity(batch_size)),
            batch_size,
        });

        let shutdown = Arc::new(Notify::new());
        let background = {
            let shared = Arc::clone(&shared);
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(flush_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => shared.flush(),
                        () = shutdown.notified() => {
                            shared.flush();
                            break;
                        }
                    }
                }
            })
        };

        Ok(Self {
            shared,
            flush_interval,
            background: Some(background),
            shutdown,
        })
    }

    /// Inserts one event into the pending batch; flushes immediately once
    /// the batch reaches `batch_size`.
    pub fn write_event(&self, event: Event) {
        let should_flush = {
            let mut buffer = self.shared.buffer.lock().unwrap();
            buffer.push(event);
            buffer.len() >= self.shared.batch_size
        };
        if should_flush {
            self.shared.flush();
        }
    }

    pub fn flush(&self) {
        self.shared.flush();
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// Flushes any remaining buffered events and stops the background
    /// flusher. Called at end-of-run to guarantee durability to disk (spec
    /// §4.6: "each run's database is flushed to disk at end-of-run").
    pub async fn finish(mut self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.background.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for EventStoreWriter {
    fn drop(&mut self) {
        if let Some(handle) = self.background.take() {
            handle.abort();
        }
        // Batch loss on hard drop/crash is acceptable (spec §4.6) — this is
        // a debug subsystem, not a ledger. Still attempt a best-effort sync
        // flush so the common "writer goes out of scope at end of run"
        // path doesn't silently drop buffered events.
        self.shared.flush();
    }
}

#[must_use]
pub fn default_event_db_path(base_dir: &Path, run_id: uuid::Uuid) -> PathBuf {
    base_dir.join(format!("{run_id}.events.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstore::models::{EventCategory, EventType, Severity};
    use chrono::Utc;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn sample_run() -> BacktestRun {
        BacktestRun {
            id: Uuid::new_v4(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            strategy_config_hash: "abc".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fresh_database_replaces_stale_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.db");

        let run_a = sample_run();
        let writer_a = EventStoreWriter::create(&path, &run_a).unwrap();
        writer_a.write_event(Event {
            event_id: Uuid::new_v4(),
            run_id: run_a.id,
            timestamp: Utc::now(),
            event_type: EventType::TradeExecution,
            severity: Severity::Info,
            category: EventCategory::Execution,
            properties: serde_json::json!({}),
            parent_event_id: None,
            validation_errors: None,
        });
        writer_a.flush();
        writer_a.finish().await;

        let run_b = sample_run();
        let writer_b = EventStoreWriter::create(&path, &run_b).unwrap();
        writer_b.finish().await;

        let conn = Connection::open(&path).unwrap();
        let run_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM BacktestRuns", [], |r| r.get(0))
            .unwrap();
        assert_eq!(run_count, 1);
        let event_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM Events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(event_count, 0);
    }

    #[tokio::test]
    async fn batch_flushes_at_configured_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.db");
        let run = sample_run();
        let writer =
            EventStoreWriter::create_with_batching(&path, &run, 3, Duration::from_secs(3600)).unwrap();

        for _ in 0..3 {
            writer.write_event(Event {
                event_id: Uuid::new_v4(),
                run_id: run.id,
                timestamp: Utc::now(),
                event_type: EventType::TradeExecution,
                severity: Severity::Info,
                category: EventCategory::Execution,
                properties: serde_json::json!({}),
                parent_event_id: None,
                validation_errors: None,
            });
        }

        // Batch size reached, so the events should already be on disk
        // without needing the flush-interval tick.
        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM Events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 3);
        writer.finish().await;
    }
}
