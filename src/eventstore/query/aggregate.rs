//! "Aggregate metrics": spec §4.7. Numeric aggregations over a JSON
//! property path, computed in Rust (not delegated to SQLite's own
//! aggregates) so `stddev` — SQLite has no built-in — is uniform with the
//! rest.

use super::{validate_property_path, validate_time_range, with_timeout, QueryEngine};
use crate::errors::CoreError;
use crate::eventstore::models::{format_timestamp, EventType};
use chrono::{DateTime, Utc};
use rusqlite::params_from_iter;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Stddev,
}

pub struct AggregateQuery {
    pub run_id: Uuid,
    pub event_type: EventType,
    pub property_path: String,
    pub aggregations: Vec<Aggregation>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct AggregateResult {
    pub count: u64,
    pub sum: Option<f64>,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub stddev: Option<f64>,
    pub query_time_ms: f64,
}

impl QueryEngine {
    /// Rejects a malformed property path with `invalid-json-path` before
    /// executing any query (spec §4.7).
    pub async fn aggregate_metrics(&self, q: AggregateQuery) -> Result<AggregateResult, CoreError> {
        validate_property_path(&q.property_path)?;
        validate_time_range(q.start_time, q.end_time)?;
        let path = self.path.clone();
        let timer = super::Timer::start();

        let (values, _) = with_timeout(move || -> Result<(Vec<f64>, ()), CoreError> {
            let conn = rusqlite::Connection::open_with_flags(
                &path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            )?;
            QueryEngine::ensure_run_exists(&conn, &q.run_id)?;

            let mut where_clauses =
                vec!["runId = ?1".to_string(), "eventType = ?2".to_string()];
            let mut bind: Vec<Box<dyn rusqlite::ToSql>> = vec![
                Box::new(q.run_id.to_string()),
                Box::new(q.event_type.as_str().to_string()),
            ];
            if let Some(start) = q.start_time {
                where_clauses.push(format!("timestamp >= ?{}", bind.len() + 1));
                bind.push(Box::new(format_timestamp(&start)));
            }
            if let Some(end) = q.end_time {
                where_clauses.push(format!("timestamp <= ?{}", bind.len() + 1));
                bind.push(Box::new(format_timestamp(&end)));
            }
            let where_sql = where_clauses.join(" AND ");

            let sql = format!(
                "SELECT json_extract(properties, ?{}) FROM Events WHERE {where_sql}",
                bind.len() + 1
            );
            bind.push(Box::new(q.property_path.clone()));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(bind.iter().map(std::convert::AsRef::as_ref)),
                |r| r.get::<_, Option<f64>>(0),
            )?;
            let values: Vec<f64> = rows
                .collect::<rusqlite::Result<Vec<_>>>()?
                .into_iter()
                .flatten()
                .collect();
            Ok((values, ()))
        })
        .await?;

        let count = values.len() as u64;
        let sum: f64 = values.iter().sum();
        let avg = if count > 0 { Some(sum / count as f64) } else { None };
        let min = values.iter().cloned().fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.min(v)))
        });
        let max = values.iter().cloned().fold(None, |acc: Option<f64>, v| {
            Some(acc.map_or(v, |a| a.max(v)))
        });
        // Sample standard deviation, null with fewer than 2 samples (spec §4.7).
        let stddev = if count >= 2 {
            let mean = avg.unwrap_or(0.0);
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            Some(variance.sqrt())
        } else {
            None
        };

        Ok(AggregateResult {
            count,
            sum: q.aggregations.contains(&Aggregation::Sum).then_some(sum),
            avg: q.aggregations.contains(&Aggregation::Avg).then_some(avg).flatten(),
            min: q.aggregations.contains(&Aggregation::Min).then_some(min).flatten(),
            max: q.aggregations.contains(&Aggregation::Max).then_some(max).flatten(),
            stddev: q.aggregations.contains(&Aggregation::Stddev).then_some(stddev).flatten(),
            query_time_ms: timer.elapsed_ms(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstore::models::{BacktestRun, Event, EventCategory, Severity};
    use crate::eventstore::writer::EventStoreWriter;
    use tempfile::tempdir;

    // S7 — Aggregation correctness.
    #[tokio::test]
    async fn s7_aggregation_correctness() {
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
        for price in [100.0, 110.0, 120.0, 130.0, 140.0] {
            writer.write_event(Event {
                event_id: Uuid::new_v4(),
                run_id,
                timestamp: Utc::now(),
                event_type: EventType::TradeExecution,
                severity: Severity::Info,
                category: EventCategory::Execution,
                properties: serde_json::json!({"Price": price}),
                parent_event_id: None,
                validation_errors: None,
            });
        }
        writer.finish().await;

        let engine = QueryEngine::open(&path).unwrap();
        let result = engine
            .aggregate_metrics(AggregateQuery {
                run_id,
                event_type: EventType::TradeExecution,
                property_path: "$.Price".to_string(),
                aggregations: vec![
                    Aggregation::Count,
                    Aggregation::Sum,
                    Aggregation::Avg,
                    Aggregation::Min,
                    Aggregation::Max,
                    Aggregation::Stddev,
                ],
                start_time: None,
                end_time: None,
            })
            .await
            .unwrap();

        assert_eq!(result.count, 5);
        assert!((result.sum.unwrap() - 600.0).abs() < 1e-9);
        assert!((result.avg.unwrap() - 120.0).abs() < 1e-9);
        assert!((result.min.unwrap() - 100.0).abs() < 1e-9);
        assert!((result.max.unwrap() - 140.0).abs() < 1e-9);
        assert!(result.stddev.unwrap() > 0.0);
        assert!(result.min.unwrap() <= result.avg.unwrap() && result.avg.unwrap() <= result.max.unwrap());
    }

    #[tokio::test]
    async fn rejects_malformed_property_path_without_querying() {
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
        EventStoreWriter::create(&path, &run).unwrap().finish().await;

        let engine = QueryEngine::open(&path).unwrap();
        let result = engine
            .aggregate_metrics(AggregateQuery {
                run_id,
                event_type: EventType::TradeExecution,
                property_path: "Price".to_string(), // missing "$."
                aggregations: vec![Aggregation::Count],
                start_time: None,
                end_time: None,
            })
            .await;
        assert!(matches!(result, Err(CoreError::InvalidJsonPath(_))));
    }
}
