//! "Events by entity": spec §4.7. Matches events whose `properties` JSON
//! contains the entity field with an equal value (case-insensitive for
//! strings).

use super::{row_to_event, with_timeout, PageParams, PagedResponse, QueryEngine, Timer};
use crate::errors::CoreError;
use crate::eventstore::models::{EntityType, Event, EventType};
use rusqlite::params_from_iter;
use uuid::Uuid;

pub struct EventsByEntityQuery {
    pub run_id: Uuid,
    pub entity_type: EntityType,
    pub entity_value: String,
    pub event_types: Option<Vec<EventType>>,
    pub page: PageParams,
}

impl QueryEngine {
    pub async fn events_by_entity(
        &self,
        q: EventsByEntityQuery,
    ) -> Result<PagedResponse<Event>, CoreError> {
        let page = q.page.clamped();
        let path = self.path.clone();
        let timer = Timer::start();
        let field = q.entity_type.property_field();

        let (items, total_count) = with_timeout(move || -> Result<(Vec<Event>, i64), CoreError> {
            let conn = rusqlite::Connection::open_with_flags(
                &path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            )?;
            QueryEngine::ensure_run_exists(&conn, &q.run_id)?;

            let json_path = format!("$.{field}");
            let mut where_clauses = vec![
                "runId = ?1".to_string(),
                format!("LOWER(json_extract(properties, '{json_path}')) = LOWER(?2)"),
            ];
            let mut bind: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(q.run_id.to_string()), Box::new(q.entity_value.clone())];

            if let Some(types) = &q.event_types {
                if !types.is_empty() {
                    let placeholders: Vec<String> = types
                        .iter()
                        .map(|t| {
                            bind.push(Box::new(t.as_str().to_string()));
                            format!("?{}", bind.len())
                        })
                        .collect();
                    where_clauses.push(format!("eventType IN ({})", placeholders.join(",")));
                }
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
