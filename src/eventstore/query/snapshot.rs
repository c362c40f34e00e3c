//! "State snapshot": spec §4.7. Reconstructs the run's state as of a point
//! in time by reducing over events rather than maintaining live state —
//! the event store has no separate mutable-state table.

use super::{row_to_event, with_timeout, QueryEngine};
use crate::errors::CoreError;
use crate::eventstore::models::{format_timestamp, Event, EventType};
use chrono::{DateTime, Utc};
use rusqlite::params_from_iter;
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

pub struct SnapshotQuery {
    pub run_id: Uuid,
    pub as_of: DateTime<Utc>,
    pub security: Option<String>,
    pub include_indicators: bool,
    pub include_active_orders: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct PositionSnapshot {
    pub security: String,
    pub quantity: f64,
    pub avg_price: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct IndicatorSnapshot {
    pub indicator_name: String,
    pub security: Option<String>,
    pub value: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ActiveOrderSnapshot {
    pub order_id: String,
    pub security: Option<String>,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct PnlSnapshot {
    pub realized: f64,
    pub unrealized: f64,
    pub total: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct StateSnapshotResult {
    pub positions: Vec<PositionSnapshot>,
    pub indicators: Vec<IndicatorSnapshot>,
    pub active_orders: Vec<ActiveOrderSnapshot>,
    pub pnl: Option<PnlSnapshot>,
    pub query_time_ms: f64,
}

impl QueryEngine {
    pub async fn state_snapshot(
        &self,
        q: SnapshotQuery,
    ) -> Result<StateSnapshotResult, CoreError> {
        let path = self.path.clone();
        let timer = super::Timer::start();

        let result = with_timeout(move || -> Result<StateSnapshotResult, CoreError> {
            let conn = rusqlite::Connection::open_with_flags(
                &path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            )?;
            QueryEngine::ensure_run_exists(&conn, &q.run_id)?;

            let events = fetch_prior(&conn, &q, &[EventType::PositionUpdate])?;
            let positions = latest_positions(&events, q.security.as_deref());

            let indicators = if q.include_indicators {
                let events = fetch_prior(&conn, &q, &[EventType::IndicatorCalculation])?;
                latest_indicators(&events, q.security.as_deref())
            } else {
                Vec::new()
            };

            let active_orders = if q.include_active_orders {
                let events = fetch_prior(&conn, &q, &[EventType::TradeExecution, EventType::OrderRejection])?;
                resolve_active_orders(&events)
            } else {
                Vec::new()
            };

            let state_changes = fetch_prior(&conn, &q, &[EventType::StateChange])?;
            let pnl = state_changes
                .last()
                .and_then(|e| {
                    let realized = e.properties.get("realizedAfter")?.as_f64()?;
                    let unrealized = e.properties.get("unrealizedAfter")?.as_f64()?;
                    Some(PnlSnapshot {
                        realized,
                        unrealized,
                        total: realized + unrealized,
                        as_of: e.timestamp,
                    })
                });

            Ok(StateSnapshotResult {
                positions,
                indicators,
                active_orders,
                pnl,
                query_time_ms: 0.0,
            })
        })
        .await?;

        Ok(StateSnapshotResult {
            query_time_ms: timer.elapsed_ms(),
            ..result
        })
    }
}

fn fetch_prior(
    conn: &rusqlite::Connection,
    q: &SnapshotQuery,
    types: &[EventType],
) -> Result<Vec<Event>, CoreError> {
    let mut where_clauses = vec!["runId = ?1".to_string(), "timestamp <= ?2".to_string()];
    let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(q.run_id.to_string()),
        Box::new(format_timestamp(&q.as_of)),
    ];
    let placeholders: Vec<String> = types
        .iter()
        .map(|t| {
            bind.push(Box::new(t.as_str().to_string()));
            format!("?{}", bind.len())
        })
        .collect();
    where_clauses.push(format!("eventType IN ({})", placeholders.join(",")));
    let where_sql = where_clauses.join(" AND ");

    let sql = format!(
        "SELECT eventId, runId, timestamp, eventType, severity, category, properties, parentEventId, validationErrors
         FROM Events WHERE {where_sql} ORDER BY timestamp ASC, eventId ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(bind.iter().map(std::convert::AsRef::as_ref)), row_to_event)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

fn latest_positions(events: &[Event], security_filter: Option<&str>) -> Vec<PositionSnapshot> {
    let mut latest: HashMap<String, PositionSnapshot> = HashMap::new();
    for e in events {
        let Some(security) = e.properties.get("security").and_then(|v| v.as_str()) else {
            continue;
        };
        if let Some(filter) = security_filter {
            if !security.eq_ignore_ascii_case(filter) {
                continue;
            }
        }
        let (Some(qty), Some(avg_price)) = (
            e.properties.get("quantity").and_then(serde_json::Value::as_f64),
            e.properties.get("avgPrice").and_then(serde_json::Value::as_f64),
        ) else {
            continue;
        };
        latest.insert(
            security.to_string(),
            PositionSnapshot {
                security: security.to_string(),
                quantity: qty,
                avg_price,
                as_of: e.timestamp,
            },
        );
    }
    let mut out: Vec<_> = latest.into_values().collect();
    out.sort_by(|a, b| a.security.cmp(&b.security));
    out
}

fn latest_indicators(events: &[Event], security_filter: Option<&str>) -> Vec<IndicatorSnapshot> {
    let mut latest: HashMap<(String, Option<String>), IndicatorSnapshot> = HashMap::new();
    for e in events {
        let Some(name) = e.properties.get("indicatorName").and_then(|v| v.as_str()) else {
            continue;
        };
        let security = e
            .properties
            .get("security")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        if let (Some(filter), Some(sec)) = (security_filter, &security) {
            if !sec.eq_ignore_ascii_case(filter) {
                continue;
            }
        }
        let Some(value) = e.properties.get("value").and_then(serde_json::Value::as_f64) else {
            continue;
        };
        latest.insert(
            (name.to_string(), security.clone()),
            IndicatorSnapshot {
                indicator_name: name.to_string(),
                security,
                value,
                as_of: e.timestamp,
            },
        );
    }
    let mut out: Vec<_> = latest.into_values().collect();
    out.sort_by(|a, b| a.indicator_name.cmp(&b.indicator_name));
    out
}

/// An order is active if its most recent status among its own events is
/// `"Placed"` — any later `"Filled"`/`"Cancelled"` removes it.
fn resolve_active_orders(events: &[Event]) -> Vec<ActiveOrderSnapshot> {
    let mut status: HashMap<String, ActiveOrderSnapshot> = HashMap::new();
    let mut closed: std::collections::HashSet<String> = std::collections::HashSet::new();
    for e in events {
        let Some(order_id) = e.properties.get("orderId").and_then(|v| v.as_str()) else {
            continue;
        };
        let state = e
            .properties
            .get("orderStatus")
            .and_then(|v| v.as_str())
            .unwrap_or("Placed");
        match state {
            "Placed" => {
                status.insert(
                    order_id.to_string(),
                    ActiveOrderSnapshot {
                        order_id: order_id.to_string(),
                        security: e
                            .properties
                            .get("security")
                            .and_then(|v| v.as_str())
                            .map(str::to_string),
                        placed_at: e.timestamp,
                    },
                );
            }
            "Filled" | "Cancelled" => {
                closed.insert(order_id.to_string());
            }
            _ => {}
        }
    }
    let mut out: Vec<_> = status
        .into_iter()
        .filter(|(id, _)| !closed.contains(id))
        .map(|(_, v)| v)
        .collect();
    out.sort_by(|a, b| a.order_id.cmp(&b.order_id));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstore::models::{BacktestRun, Event, EventCategory, Severity};
    use crate::eventstore::writer::EventStoreWriter;
    use chrono::TimeZone;
    use tempfile::tempdir;

    // S6 — State snapshot reconstruction.
    #[tokio::test]
    async fn s6_snapshot_reconstruction() {
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
        let noon = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

        writer.write_event(Event {
            event_id: Uuid::new_v4(),
            run_id,
            timestamp: noon,
            event_type: EventType::PositionUpdate,
            severity: Severity::Info,
            category: EventCategory::Execution,
            properties: serde_json::json!({"security": "AAPL", "quantity": 100.0, "avgPrice": 175.50}),
            parent_event_id: None,
            validation_errors: None,
        });
        writer.write_event(Event {
            event_id: Uuid::new_v4(),
            run_id,
            timestamp: noon,
            event_type: EventType::IndicatorCalculation,
            severity: Severity::Info,
            category: EventCategory::Indicators,
            properties: serde_json::json!({"indicatorName": "SMA_10", "security": "AAPL", "value": 176.00}),
            parent_event_id: None,
            validation_errors: None,
        });
        writer.write_event(Event {
            event_id: Uuid::new_v4(),
            run_id,
            timestamp: noon,
            event_type: EventType::StateChange,
            severity: Severity::Info,
            category: EventCategory::Performance,
            properties: serde_json::json!({"unrealizedAfter": 100.0, "realizedAfter": 250.0}),
            parent_event_id: None,
            validation_errors: None,
        });
        writer.finish().await;

        let engine = QueryEngine::open(&path).unwrap();
        let snapshot = engine
            .state_snapshot(SnapshotQuery {
                run_id,
                as_of: Utc.with_ymd_and_hms(2026, 1, 1, 13, 0, 0).unwrap(),
                security: None,
                include_indicators: true,
                include_active_orders: true,
            })
            .await
            .unwrap();

        assert_eq!(snapshot.positions.len(), 1);
        assert_eq!(snapshot.positions[0].quantity, 100.0);
        assert_eq!(snapshot.indicators.len(), 1);
        assert_eq!(snapshot.active_orders.len(), 0);
        let pnl = snapshot.pnl.unwrap();
        assert_eq!(pnl.total, 350.0);
    }
}
