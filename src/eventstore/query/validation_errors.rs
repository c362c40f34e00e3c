//! "Validation errors": spec §4.7. Surfaces events carrying a non-null
//! `validationErrors` payload, filterable by minimum severity.

use super::{row_to_event, with_timeout, PageParams, PagedResponse, QueryEngine, Timer, MAX_RESULT_ROWS};
use crate::errors::CoreError;
use crate::eventstore::models::{Event, Severity};
use rusqlite::params_from_iter;
use uuid::Uuid;

pub struct ValidationErrorsQuery {
    pub run_id: Uuid,
    pub min_severity: Option<Severity>,
    pub page: PageParams,
}

impl QueryEngine {
    pub async fn validation_errors(
        &self,
        q: ValidationErrorsQuery,
    ) -> Result<PagedResponse<Event>, CoreError> {
        let page = q.page.clamped();
        let path = self.path.clone();
        let timer = Timer::start();

        let (all, total_count) = with_timeout(move || -> Result<(Vec<Event>, i64), CoreError> {
            let conn = rusqlite::Connection::open_with_flags(
                &path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            )?;
            QueryEngine::ensure_run_exists(&conn, &q.run_id)?;

            let where_clauses = vec![
                "runId = ?1".to_string(),
                "validationErrors IS NOT NULL".to_string(),
            ];
            let bind: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(q.run_id.to_string())];
            let where_sql = where_clauses.join(" AND ");

            let total_count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM Events WHERE {where_sql}"),
                params_from_iter(bind.iter().map(std::convert::AsRef::as_ref)),
                |r| r.get(0),
            )?;
            if total_count as usize > MAX_RESULT_ROWS {
                return Err(CoreError::ResultTooLarge(format!(
                    "run {} has {total_count} validation-error events, exceeding the {MAX_RESULT_ROWS} cap",
                    q.run_id
                )));
            }

            let sql = format!(
                "SELECT eventId, runId, timestamp, eventType, severity, category, properties, parentEventId, validationErrors
                 FROM Events WHERE {where_sql} ORDER BY timestamp ASC, eventId ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bind.iter().map(std::convert::AsRef::as_ref)), row_to_event)?;
            let items: Vec<Event> = rows.collect::<rusqlite::Result<_>>()?;
            Ok((items, total_count))
        })
        .await?;

        // Severity filtering happens in Rust, not SQL: `Severity` orders
        // Debug < Info < Warning < Error, and that ordering isn't something
        // a plain column comparison on the stored string would respect.
        let filtered: Vec<Event> = all
            .into_iter()
            .filter(|e| q.min_severity.is_none_or(|min| e.severity >= min))
            .collect();
        let start = page.offset() as usize;
        let items: Vec<Event> = filtered
            .iter()
            .skip(start)
            .take(page.page_size as usize)
            .cloned()
            .collect();
        let filtered_total = filtered.len() as i64;
        let returned_count = items.len();
        let has_more = page.offset() + returned_count as i64 < filtered_total;

        Ok(PagedResponse {
            items,
            total_count: if q.min_severity.is_some() { filtered_total } else { total_count },
            returned_count,
            page_index: page.page_index,
            page_size: page.page_size,
            has_more,
            query_time_ms: timer.elapsed_ms(),
            truncated: false,
            truncated_reason: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstore::models::{BacktestRun, EventCategory, EventType};
    use crate::eventstore::writer::EventStoreWriter;
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn returns_only_events_with_validation_errors_above_severity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.db");
        let run_id = Uuid::new_v4();
        let run = BacktestRun {
            id: run_id,
            start_time: Utc::now(),
            end_time: Utc::now(),
            strategy_config_hash: "h".into(),
            created_at: Utc::now(),
        };
        let writer = EventStoreWriter::create(&path, &run).unwrap();
        writer.write_event(Event {
            event_id: Uuid::new_v4(),
            run_id,
            timestamp: Utc::now(),
            event_type: EventType::OrderRejection,
            severity: Severity::Warning,
            category: EventCategory::Execution,
            properties: serde_json::json!({}),
            parent_event_id: None,
            validation_errors: Some(vec!["quantity must be positive".to_string()]),
        });
        writer.write_event(Event {
            event_id: Uuid::new_v4(),
            run_id,
            timestamp: Utc::now(),
            event_type: EventType::TradeExecution,
            severity: Severity::Info,
            category: EventCategory::Execution,
            properties: serde_json::json!({}),
            parent_event_id: None,
            validation_errors: None,
        });
        writer.finish().await;

        let engine = QueryEngine::open(&path).unwrap();
        let result = engine
            .validation_errors(ValidationErrorsQuery {
                run_id,
                min_severity: Some(Severity::Warning),
                page: PageParams { page_size: 10, page_index: 0 },
            })
            .await
            .unwrap();
        assert_eq!(result.items.len(), 1);
        assert!(result.items[0].validation_errors.is_some());
    }
}
