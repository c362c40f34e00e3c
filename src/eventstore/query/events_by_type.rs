//! "Events by type": spec §4.7.

use super::{
    row_to_event, validate_time_range, with_timeout, PageParams, PagedResponse, QueryEngine,
    Timer,
};
use crate::errors::CoreError;
use crate::eventstore::models::{Event, EventType, Severity};
use chrono::{DateTime, Utc};
use rusqlite::params_from_iter;
use uuid::Uuid;

pub struct EventsByTypeQuery {
    pub run_id: Uuid,
    pub event_type: EventType,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub severity: Option<Severity>,
    pub page: PageParams,
}

impl QueryEngine {
    /// Returns events of a given type, ascending by `(timestamp, eventId)`,
    /// paginated. Spec invariants §8.6: every returned event respects the
    /// time bounds; ordering is strictly ascending.
    pub async fn events_by_type(
        &self,
        q: EventsByTypeQuery,
    ) -> Result<PagedResponse<Event>, CoreError> {
        validate_time_range(q.start_time, q.end_time)?;
        let page = q.page.clamped();
        let path = self.path.clone();
        let timer = Timer::start();

        let (items, total_count) = with_timeout(move || -> Result<(Vec<Event>, i64), CoreError> {
            let conn = rusqlite::Connection::open_with_flags(
                &path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            )?;
            QueryEngine::ensure_run_exists(&conn, &q.run_id)?;

            let mut where_clauses = vec!["runId = ?1".to_string(), "eventType = ?2".to_string()];
            let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![
                Box::new(q.run_id.to_string()),
                Box::new(q.event_type.as_str().to_string()),
            ];
            if let Some(start) = q.start_time {
                where_clauses.push(format!("timestamp >= ?{}", bind.len() + 1));
                bind.push(Box::new(crate::eventstore::models::format_timestamp(&start)));
            }
            if let Some(end) = q.end_time {
                where_clauses.push(format!("timestamp <= ?{}", bind.len() + 1));
                bind.push(Box::new(crate::eventstore::models::format_timestamp(&end)));
            }
            if let Some(sev) = q.severity {
                where_clauses.push(format!("severity = ?{}", bind.len() + 1));
                bind.push(Box::new(sev.as_str().to_string()));
            }
            let where_sql = where_clauses.join(" AND ");

            let total_count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM Events WHERE {where_sql}"),
                params_from_iter(bind.iter().map(std::convert::AsRef::as_ref)),
                |r| r.get(0),
            )?;

            let sql = format!(
                "SELECT eventId, runId, timestamp, eventType, severity, category, properties, parentEventId, validationErrors
                 FROM Events WHERE {where_sql} ORDER BY timestamp ASC, eventId ASC LIMIT ?{} OFFSET ?{}",
                bind.len() + 1,
                bind.len() + 2
            );
            bind.push(Box::new(i64::from(page.page_size)));
            bind.push(Box::new(page.offset()));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(bind.iter().map(std::convert::AsRef::as_ref)), row_to_event)?;
            let items: Vec<Event> = rows.collect::<rusqlite::Result<_>>()?;
            Ok((items, total_count))
        })
        .await?;

        let returned_count = items.len();
        let has_more = page.offset() + returned_count as i64 < total_count;
        Ok(PagedResponse {
            items,
            total_count,
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
