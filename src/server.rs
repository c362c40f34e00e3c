//! Agent Tool Layer: spec §4.8. Exposes the six query-engine operations as
//! discoverable MCP tools with garde-validated parameters and a uniform
//! `{code, message, details}` error envelope.

use garde::Validate;
use rmcp::{
    handler::server::{
        router::tool::ToolRouter,
        wrapper::{Json, Parameters},
    },
    model::{Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ServerHandler,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::path::PathBuf;

use crate::errors::ToolError;
use crate::eventstore::models::{EntityType, EventType, Severity};
use crate::eventstore::query::aggregate::{AggregateQuery, AggregateResult, Aggregation};
use crate::eventstore::query::events_by_entity::EventsByEntityQuery;
use crate::eventstore::query::events_by_type::EventsByTypeQuery;
use crate::eventstore::query::sequence::{EventChain, SequenceQuery, DEFAULT_MAX_DEPTH};
use crate::eventstore::query::snapshot::{SnapshotQuery, StateSnapshotResult};
use crate::eventstore::query::validation_errors::ValidationErrorsQuery;
use crate::eventstore::query::{PageParams, PagedResponse};
use crate::eventstore::{Event, QueryEngine};

#[derive(Clone)]
pub struct EventStoreServer {
    events_dir: PathBuf,
    tool_router: ToolRouter<Self>,
}

fn parse_run_id(run_id: &str) -> Result<uuid::Uuid, ToolError> {
    run_id
        .parse()
        .map_err(|_| ToolError::from(crate::errors::CoreError::InvalidArgument(format!("not a UUID: {run_id}"))))
}

fn parse_timestamp(s: &str) -> Result<chrono::DateTime<chrono::Utc>, ToolError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|_| ToolError::from(crate::errors::CoreError::InvalidArgument(format!("not ISO-8601: {s}"))))
}

fn parse_event_type(s: &str) -> Result<EventType, ToolError> {
    EventType::parse(s).ok_or_else(|| ToolError::from(crate::errors::CoreError::InvalidArgument(format!("unknown eventType: {s}"))))
}

fn parse_severity(s: &str) -> Result<Severity, ToolError> {
    Severity::parse(s).ok_or_else(|| ToolError::from(crate::errors::CoreError::InvalidArgument(format!("unknown severity: {s}"))))
}

fn parse_entity_type(s: &str) -> Result<EntityType, ToolError> {
    Ok(match s {
        "OrderId" => EntityType::OrderId,
        "SecuritySymbol" => EntityType::SecuritySymbol,
        "PositionId" => EntityType::PositionId,
        "IndicatorName" => EntityType::IndicatorName,
        _ => return Err(ToolError::from(crate::errors::CoreError::InvalidArgument(format!("unknown entityType: {s}")))),
    })
}

impl EventStoreServer {
    #[must_use]
    pub fn new(events_dir: PathBuf) -> Self {
        Self {
            events_dir,
            tool_router: Self::tool_router(),
        }
    }

    fn open(&self, run_id: uuid::Uuid) -> Result<QueryEngine, ToolError> {
        let path = crate::eventstore::writer::default_event_db_path(&self.events_dir, run_id);
        QueryEngine::open(&path).map_err(ToolError::from)
    }
}

/// Builds the HTTP surface: the MCP transport nested at `/mcp`, plus a
/// plain `/health` route for platform liveness probes.
#[must_use]
pub fn http_router(events_dir: PathBuf) -> axum::Router {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
    };

    let service = StreamableHttpService::new(
        move || Ok(EventStoreServer::new(events_dir.clone())),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default(),
    );

    axum::Router::new()
        .nest_service("/mcp", service)
        .route("/health", axum::routing::get(|| async { "ok" }))
}

fn default_page_size() -> u32 {
    100
}
fn default_page_index() -> u32 {
    0
}
fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct EventsByTypeParams {
    #[garde(length(min = 36, max = 36))]
    pub run_id: String,
    #[garde(skip)]
    pub event_type: String,
    #[garde(skip)]
    pub start_time: Option<String>,
    #[garde(skip)]
    pub end_time: Option<String>,
    #[garde(skip)]
    pub severity: Option<String>,
    #[serde(default = "default_page_size")]
    #[garde(range(min = 1, max = 1000))]
    pub page_size: u32,
    #[serde(default = "default_page_index")]
    #[garde(skip)]
    pub page_index: u32,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct EventsByEntityParams {
    #[garde(length(min = 36, max = 36))]
    pub run_id: String,
    #[garde(skip)]
    pub entity_type: String,
    #[garde(length(min = 1))]
    pub entity_value: String,
    #[garde(skip)]
    pub event_types: Option<Vec<String>>,
    #[serde(default = "default_page_size")]
    #[garde(range(min = 1, max = 1000))]
    pub page_size: u32,
    #[serde(default = "default_page_index")]
    #[garde(skip)]
    pub page_index: u32,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct AggregateMetricsParams {
    #[garde(length(min = 36, max = 36))]
    pub run_id: String,
    #[garde(skip)]
    pub event_type: String,
    #[garde(skip)]
    pub property_path: String,
    #[garde(length(min = 1))]
    pub aggregations: Vec<String>,
    #[garde(skip)]
    pub start_time: Option<String>,
    #[garde(skip)]
    pub end_time: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct StateSnapshotParams {
    #[garde(length(min = 36, max = 36))]
    pub run_id: String,
    #[garde(skip)]
    pub timestamp: String,
    #[garde(skip)]
    pub security: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub include_indicators: bool,
    #[serde(default)]
    #[garde(skip)]
    pub include_active_orders: bool,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct EventSequenceParams {
    #[garde(length(min = 36, max = 36))]
    pub run_id: String,
    #[garde(skip)]
    pub root_event_id: Option<String>,
    #[garde(skip)]
    pub ordered_sequence_pattern: Option<Vec<String>>,
    #[serde(default)]
    #[garde(skip)]
    pub find_incomplete: bool,
    #[serde(default = "default_max_depth")]
    #[garde(range(min = 1, max = 100))]
    pub max_depth: u32,
    #[serde(default = "default_page_size")]
    #[garde(range(min = 1, max = 1000))]
    pub page_size: u32,
    #[serde(default = "default_page_index")]
    #[garde(skip)]
    pub page_index: u32,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
pub struct ValidationErrorsParams {
    #[garde(length(min = 36, max = 36))]
    pub run_id: String,
    #[garde(skip)]
    pub min_severity: Option<String>,
    #[serde(default = "default_page_size")]
    #[garde(range(min = 1, max = 1000))]
    pub page_size: u32,
    #[serde(default = "default_page_index")]
    #[garde(skip)]
    pub page_index: u32,
}

type ToolResult<T> = Result<Json<T>, String>;

#[tool_router]
impl EventStoreServer {
    /// Returns events of one type for a run, ordered ascending by
    /// `(timestamp, eventId)`, paginated.
    #[tool(name = "events_by_type", annotations(read_only_hint = true))]
    async fn events_by_type(
        &self,
        Parameters(params): Parameters<EventsByTypeParams>,
    ) -> ToolResult<PagedResponse<Event>> {
        params.validate().map_err(|e| {
            ToolError {
                code: "invalid-argument".to_string(),
                message: e.to_string(),
                details: None,
            }
            .to_wire()
        })?;
        self.events_by_type_impl(params)
            .await
            .map(Json)
            .map_err(|e: ToolError| e.to_wire())
    }

    /// Finds events whose `properties` reference a given entity (order,
    /// security, position, or indicator) by value, case-insensitive.
    #[tool(name = "events_by_entity", annotations(read_only_hint = true))]
    async fn events_by_entity(
        &self,
        Parameters(params): Parameters<EventsByEntityParams>,
    ) -> ToolResult<PagedResponse<Event>> {
        params.validate().map_err(|e| {
            ToolError {
                code: "invalid-argument".to_string(),
                message: e.to_string(),
                details: None,
            }
            .to_wire()
        })?;
        self.events_by_entity_impl(params)
            .await
            .map(Json)
            .map_err(|e: ToolError| e.to_wire())
    }

    /// Computes count/sum/avg/min/max/stddev over a numeric JSON property
    /// across matching events. Rejects malformed property paths before
    /// touching the database.
    #[tool(name = "aggregate_metrics", annotations(read_only_hint = true))]
    async fn aggregate_metrics(
        &self,
        Parameters(params): Parameters<AggregateMetricsParams>,
    ) -> ToolResult<AggregateResult> {
        params.validate().map_err(|e| {
            ToolError {
                code: "invalid-argument".to_string(),
                message: e.to_string(),
                details: None,
            }
            .to_wire()
        })?;
        self.aggregate_metrics_impl(params)
            .await
            .map(Json)
            .map_err(|e: ToolError| e.to_wire())
    }

    /// Reconstructs positions, indicators, active orders, and PnL as of a
    /// timestamp by replaying prior events.
    #[tool(name = "state_snapshot", annotations(read_only_hint = true))]
    async fn state_snapshot(
        &self,
        Parameters(params): Parameters<StateSnapshotParams>,
    ) -> ToolResult<StateSnapshotResult> {
        params.validate().map_err(|e| {
            ToolError {
                code: "invalid-argument".to_string(),
                message: e.to_string(),
                details: None,
            }
            .to_wire()
        })?;
        self.state_snapshot_impl(params)
            .await
            .map(Json)
            .map_err(|e: ToolError| e.to_wire())
    }

    /// Follows parent/child event chains, optionally rooted at an event or
    /// matched against an ordered event-type pattern.
    #[tool(name = "event_sequence", annotations(read_only_hint = true))]
    async fn event_sequence(
        &self,
        Parameters(params): Parameters<EventSequenceParams>,
    ) -> ToolResult<PagedResponse<EventChain>> {
        params.validate().map_err(|e| {
            ToolError {
                code: "invalid-argument".to_string(),
                message: e.to_string(),
                details: None,
            }
            .to_wire()
        })?;
        self.event_sequence_impl(params)
            .await
            .map(Json)
            .map_err(|e: ToolError| e.to_wire())
    }

    /// Returns events carrying non-null `validationErrors`, filterable by
    /// minimum severity.
    #[tool(name = "validation_errors", annotations(read_only_hint = true))]
    async fn validation_errors(
        &self,
        Parameters(params): Parameters<ValidationErrorsParams>,
    ) -> ToolResult<PagedResponse<Event>> {
        params.validate().map_err(|e| {
            ToolError {
                code: "invalid-argument".to_string(),
                message: e.to_string(),
                details: None,
            }
            .to_wire()
        })?;
        self.validation_errors_impl(params)
            .await
            .map(Json)
            .map_err(|e: ToolError| e.to_wire())
    }
}

impl EventStoreServer {
    async fn events_by_type_impl(
        &self,
        params: EventsByTypeParams,
    ) -> Result<PagedResponse<Event>, ToolError> {
        let run_id = parse_run_id(&params.run_id)?;
        let engine = self.open(run_id)?;
        let q = EventsByTypeQuery {
            run_id,
            event_type: parse_event_type(&params.event_type)?,
            start_time: params.start_time.as_deref().map(parse_timestamp).transpose()?,
            end_time: params.end_time.as_deref().map(parse_timestamp).transpose()?,
            severity: params.severity.as_deref().map(parse_severity).transpose()?,
            page: PageParams {
                page_size: params.page_size,
                page_index: params.page_index,
            },
        };
        engine.events_by_type(q).await.map_err(ToolError::from)
    }

    async fn events_by_entity_impl(
        &self,
        params: EventsByEntityParams,
    ) -> Result<PagedResponse<Event>, ToolError> {
        let run_id = parse_run_id(&params.run_id)?;
        let engine = self.open(run_id)?;
        let event_types = params
            .event_types
            .as_ref()
            .map(|types| types.iter().map(|s| parse_event_type(s)).collect::<Result<Vec<_>, _>>())
            .transpose()?;
        let q = EventsByEntityQuery {
            run_id,
            entity_type: parse_entity_type(&params.entity_type)?,
            entity_value: params.entity_value,
            event_types,
            page: PageParams {
                page_size: params.page_size,
                page_index: params.page_index,
            },
        };
        engine.events_by_entity(q).await.map_err(ToolError::from)
    }

    async fn aggregate_metrics_impl(
        &self,
        params: AggregateMetricsParams,
    ) -> Result<AggregateResult, ToolError> {
        let run_id = parse_run_id(&params.run_id)?;
        let engine = self.open(run_id)?;
        let aggregations = params
            .aggregations
            .iter()
            .map(|s| parse_aggregation(s))
            .collect::<Result<Vec<_>, _>>()?;
        let q = AggregateQuery {
            run_id,
            event_type: parse_event_type(&params.event_type)?,
            property_path: params.property_path,
            aggregations,
            start_time: params.start_time.as_deref().map(parse_timestamp).transpose()?,
            end_time: params.end_time.as_deref().map(parse_timestamp).transpose()?,
        };
        engine.aggregate_metrics(q).await.map_err(ToolError::from)
    }

    async fn state_snapshot_impl(
        &self,
        params: StateSnapshotParams,
    ) -> Result<StateSnapshotResult, ToolError> {
        let run_id = parse_run_id(&params.run_id)?;
        let engine = self.open(run_id)?;
        let q = SnapshotQuery {
            run_id,
            as_of: parse_timestamp(&params.timestamp)?,
            security: params.security,
            include_indicators: params.include_indicators,
            include_active_orders: params.include_active_orders,
        };
        engine.state_snapshot(q).await.map_err(ToolError::from)
    }

    async fn event_sequence_impl(
        &self,
        params: EventSequenceParams,
    ) -> Result<PagedResponse<EventChain>, ToolError> {
        let run_id = parse_run_id(&params.run_id)?;
        let engine = self.open(run_id)?;
        let pattern = params
            .ordered_sequence_pattern
            .as_ref()
            .map(|types| types.iter().map(|s| parse_event_type(s)).collect::<Result<Vec<_>, _>>())
            .transpose()?;
        let q = SequenceQuery {
            run_id,
            root_event_id: params.root_event_id.as_deref().map(parse_run_id).transpose()?,
            ordered_sequence_pattern: pattern,
            find_incomplete: params.find_incomplete,
            max_depth: params.max_depth,
            page: PageParams {
                page_size: params.page_size,
                page_index: params.page_index,
            },
        };
        engine.event_sequence(q).await.map_err(ToolError::from)
    }

    async fn validation_errors_impl(
        &self,
        params: ValidationErrorsParams,
    ) -> Result<PagedResponse<Event>, ToolError> {
        let run_id = parse_run_id(&params.run_id)?;
        let engine = self.open(run_id)?;
        let q = ValidationErrorsQuery {
            run_id,
            min_severity: params.min_severity.as_deref().map(parse_severity).transpose()?,
            page: PageParams {
                page_size: params.page_size,
                page_index: params.page_index,
            },
        };
        engine.validation_errors(q).await.map_err(ToolError::from)
    }
}

fn parse_aggregation(s: &str) -> Result<Aggregation, ToolError> {
    Ok(match s {
        "count" => Aggregation::Count,
        "sum" => Aggregation::Sum,
        "avg" => Aggregation::Avg,
        "min" => Aggregation::Min,
        "max" => Aggregation::Max,
        "stddev" => Aggregation::Stddev,
        _ => return Err(ToolError::from(crate::errors::CoreError::InvalidArgument(format!("unknown aggregation: {s}")))),
    })
}

#[tool_handler]
impl ServerHandler for EventStoreServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "backtest-optimizer-mcp".into(),
                title: Some("Backtest Parameter Optimizer & Debug Event Store".into()),
                version: env!("CARGO_PKG_VERSION").into(),
                description: Some(
                    "Query engine over per-run backtest debug events: typed, paginated, \
                     scoped to a single run, with aggregation and state-reconstruction tools."
                        .into(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Every tool takes a runId (the UUID of a completed backtest run) and is \
                 scoped to that run's event database. Start with events_by_type or \
                 events_by_entity to locate events of interest, use aggregate_metrics for \
                 numeric summaries, state_snapshot to reconstruct state at a point in time, \
                 and event_sequence to follow a causal chain from a root event."
                    .into(),
            ),
        }
    }
}
