//! Event-store data model: spec §3.

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum EventType {
    TradeExecution,
    OrderRejection,
    IndicatorCalculation,
    PositionUpdate,
    StateChange,
    MarketDataEvent,
    RiskEvent,
}

impl EventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TradeExecution => "TradeExecution",
            EventType::OrderRejection => "OrderRejection",
            EventType::IndicatorCalculation => "IndicatorCalculation",
            EventType::PositionUpdate => "PositionUpdate",
            EventType::StateChange => "StateChange",
            EventType::MarketDataEvent => "MarketDataEvent",
            EventType::RiskEvent => "RiskEvent",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "TradeExecution" => EventType::TradeExecution,
            "OrderRejection" => EventType::OrderRejection,
            "IndicatorCalculation" => EventType::IndicatorCalculation,
            "PositionUpdate" => EventType::PositionUpdate,
            "StateChange" => EventType::StateChange,
            "MarketDataEvent" => EventType::MarketDataEvent,
            "RiskEvent" => EventType::RiskEvent,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "Debug",
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "Debug" => Severity::Debug,
            "Info" => Severity::Info,
            "Warning" => Severity::Warning,
            "Error" => Severity::Error,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum EventCategory {
    Execution,
    MarketData,
    Indicators,
    Risk,
    Performance,
}

impl EventCategory {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Execution => "Execution",
            EventCategory::MarketData => "MarketData",
            EventCategory::Indicators => "Indicators",
            EventCategory::Risk => "Risk",
            EventCategory::Performance => "Performance",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "Execution" => EventCategory::Execution,
            "MarketData" => EventCategory::MarketData,
            "Indicators" => EventCategory::Indicators,
            "Risk" => EventCategory::Risk,
            "Performance" => EventCategory::Performance,
            _ => return None,
        })
    }
}

/// Entity kinds matched against an event's `properties` JSON (spec §4.7
/// "Events by entity").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum EntityType {
    OrderId,
    SecuritySymbol,
    PositionId,
    IndicatorName,
}

impl EntityType {
    /// The conventional `properties` JSON field name carrying this entity.
    #[must_use]
    pub fn property_field(&self) -> &'static str {
        match self {
            EntityType::OrderId => "orderId",
            EntityType::SecuritySymbol => "securitySymbol",
            EntityType::PositionId => "positionId",
            EntityType::IndicatorName => "indicatorName",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BacktestRun {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub strategy_config_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    pub event_id: Uuid,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub severity: Severity,
    pub category: EventCategory,
    pub properties: serde_json::Value,
    pub parent_event_id: Option<Uuid>,
    pub validation_errors: Option<Vec<String>>,
}

/// Millisecond ISO-8601 round-trip format required by spec §3/§6 ("o").
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
