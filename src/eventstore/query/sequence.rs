//! "Event sequence": spec §4.7. Walks parent/child event chains
//! (`parentEventId -> eventId`), either rooted at a given event or matched
//! against an ordered event-type pattern.

use super::{row_to_event, with_timeout, PageParams, PagedResponse, QueryEngine, Timer, MAX_RESULT_ROWS};
use crate::errors::CoreError;
use crate::eventstore::models::{Event, EventType};
use std::collections::HashMap;
use uuid::Uuid;

pub const MIN_MAX_DEPTH: u32 = 1;
pub const MAX_MAX_DEPTH: u32 = 100;
pub const DEFAULT_MAX_DEPTH: u32 = 10;

pub struct SequenceQuery {
    pub run_id: Uuid,
    pub root_event_id: Option<Uuid>,
    pub ordered_sequence_pattern: Option<Vec<EventType>>,
    pub find_incomplete: bool,
    pub max_depth: u32,
    pub page: PageParams,
}

#[derive(Debug, Clone, serde::Serialize, schemars::JsonSchema)]
pub struct EventChain {
    pub events: Vec<Event>,
    pub complete: bool,
}

impl QueryEngine {
    pub async fn event_sequence(
        &self,
        q: SequenceQuery,
    ) -> Result<PagedResponse<EventChain>, CoreError> {
        let page = q.page.clamped();
        let max_depth = q.max_depth.clamp(MIN_MAX_DEPTH, MAX_MAX_DEPTH) as usize;
        let path = self.path.clone();
        let timer = Timer::start();

        let all_events = with_timeout(move || -> Result<Vec<Event>, CoreError> {
            let conn = rusqlite::Connection::open_with_flags(
                &path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            )?;
            QueryEngine::ensure_run_exists(&conn, &q.run_id)?;

            let row_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM Events WHERE runId = ?1",
                [q.run_id.to_string()],
                |r| r.get(0),
            )?;
            if row_count as usize > MAX_RESULT_ROWS {
                return Err(CoreError::ResultTooLarge(format!(
                    "run {} has {row_count} events, exceeding the {MAX_RESULT_ROWS} event-sequence cap",
                    q.run_id
                )));
            }

            let sql = "SELECT eventId, runId, timestamp, eventType, severity, category, properties, parentEventId, validationErrors
                       FROM Events WHERE runId = ?1 ORDER BY timestamp ASC, eventId ASC";
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map([q.run_id.to_string()], row_to_event)?;
            Ok(rows.collect::<rusqlite::Result<_>>()?)
        })
        .await?;

        let by_id: HashMap<Uuid, &Event> = all_events.iter().map(|e| (e.event_id, e)).collect();
        let mut children: HashMap<Uuid, Vec<&Event>> = HashMap::new();
        for e in &all_events {
            if let Some(parent) = e.parent_event_id {
                children.entry(parent).or_default().push(e);
            }
        }

        let chains: Vec<EventChain> = if let Some(root_id) = q.root_event_id {
            by_id
                .get(&root_id)
                .map(|root| vec![build_chain(root, &children, max_depth)])
                .unwrap_or_default()
        } else if let Some(pattern) = &q.ordered_sequence_pattern {
            let roots = all_events
                .iter()
                .filter(|e| e.parent_event_id.is_none());
            roots
                .filter_map(|root| {
                    let chain = build_chain(root, &children, max_depth);
                    match_pattern(&chain, pattern, q.find_incomplete)
                })
                .collect()
        } else {
            all_events
                .iter()
                .filter(|e| e.parent_event_id.is_none())
                .map(|root| build_chain(root, &children, max_depth))
                .collect()
        };

        let total_count = chains.len() as i64;
        let start = page.offset() as usize;
        let items: Vec<EventChain> = chains.into_iter().skip(start).take(page.page_size as usize).collect();
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

/// Depth-first, always following the earliest-timestamped child first
/// (children are pre-sorted by the query's `ORDER BY`). Truncates at
/// `max_depth` without marking the chain incomplete — depth truncation and
/// pattern incompleteness are distinct (spec §4.7).
fn build_chain(root: &Event, children: &HashMap<Uuid, Vec<&Event>>, max_depth: usize) -> EventChain {
    let mut events = vec![root.clone()];
    let mut frontier = vec![root.event_id];
    let mut depth = 1;
    while depth < max_depth && !frontier.is_empty() {
        let mut next = Vec::new();
        for id in frontier {
            if let Some(kids) = children.get(&id) {
                for k in kids {
                    events.push((*k).clone());
                    next.push(k.event_id);
                }
            }
        }
        frontier = next;
        depth += 1;
    }
    EventChain {
        events,
        complete: true,
    }
}

/// Matches a chain's event-type sequence against an ordered pattern. A
/// chain matching a strict prefix of the pattern is returned (marked
/// incomplete) only when `find_incomplete` is set; otherwise only exact
/// matches pass.
fn match_pattern(chain: &EventChain, pattern: &[EventType], find_incomplete: bool) -> Option<EventChain> {
    let types: Vec<EventType> = chain.events.iter().map(|e| e.event_type).collect();
    if types == pattern {
        return Some(EventChain {
            events: chain.events.clone(),
            complete: true,
        });
    }
    if find_incomplete && types.len() < pattern.len() && pattern.starts_with(&types) {
        return Some(EventChain {
            events: chain.events.clone(),
            complete: false,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstore::models::{BacktestRun, EventCategory, Severity};
    use crate::eventstore::writer::EventStoreWriter;
    use chrono::Utc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn follows_parent_child_chain_rooted_at_event() {
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
        let root_id = Uuid::new_v4();
        let child_id = Uuid::new_v4();
        let base = Utc::now();
        writer.write_event(Event {
            event_id: root_id,
            run_id,
            timestamp: base,
            event_type: EventType::TradeExecution,
            severity: Severity::Info,
            category: EventCategory::Execution,
            properties: serde_json::json!({}),
            parent_event_id: None,
            validation_errors: None,
        });
        writer.write_event(Event {
            event_id: child_id,
            run_id,
            timestamp: base + chrono::Duration::seconds(1),
            event_type: EventType::PositionUpdate,
            severity: Severity::Info,
            category: EventCategory::Execution,
            properties: serde_json::json!({}),
            parent_event_id: Some(root_id),
            validation_errors: None,
        });
        writer.finish().await;

        let engine = QueryEngine::open(&path).unwrap();
        let result = engine
            .event_sequence(SequenceQuery {
                run_id,
                root_event_id: Some(root_id),
                ordered_sequence_pattern: None,
                find_incomplete: false,
                max_depth: DEFAULT_MAX_DEPTH,
                page: PageParams { page_size: 10, page_index: 0 },
            })
            .await
            .unwrap();

        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].events.len(), 2);
        assert_eq!(result.items[0].events[1].event_id, child_id);
    }

    #[tokio::test]
    async fn incomplete_prefix_flagged_when_requested() {
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
            .event_sequence(SequenceQuery {
                run_id,
                root_event_id: None,
                ordered_sequence_pattern: Some(vec![EventType::TradeExecution, EventType::PositionUpdate]),
                find_incomplete: true,
                max_depth: DEFAULT_MAX_DEPTH,
                page: PageParams { page_size: 10, page_index: 0 },
            })
            .await
            .unwrap();

        assert_eq!(result.items.len(), 1);
        assert!(!result.items[0].complete);
    }
}
