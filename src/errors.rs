//! Error taxonomy shared by every component, and its translation into the
//! MCP tool envelope (`{code, message, details}`).

use serde::Serialize;
use thiserror::Error;

/// The core error taxonomy. Every fallible operation in the crate returns
/// (or converts into) one of these variants so callers can branch on
/// `.code()` without parsing strings.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("parameter definitions must not be empty")]
    EmptyDefinitions,

    #[error("index {index} out of range [0, {total})")]
    IndexOutOfRange { index: i64, total: i64 },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("invalid JSON path: {0}")]
    InvalidJsonPath(String),

    #[error("invalid time range: start {start} is after end {end}")]
    InvalidTimeRange { start: String, end: String },

    #[error("query exceeded the {0} second timeout")]
    QueryTimeout(u64),

    #[error("result too large: {0}")]
    ResultTooLarge(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("operation cancelled")]
    OperationCancelled,

    #[error("worker failure: {0}")]
    WorkerFailure(String),
}

impl CoreError {
    /// Stable kebab-case code, usable by callers for branching.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidArgument(_) => "invalid-argument",
            CoreError::EmptyDefinitions => "empty-definitions",
            CoreError::IndexOutOfRange { .. } => "index-out-of-range",
            CoreError::RunNotFound(_) => "run-not-found",
            CoreError::InvalidJsonPath(_) => "invalid-json-path",
            CoreError::InvalidTimeRange { .. } => "invalid-time-range",
            CoreError::QueryTimeout(_) => "query-timeout",
            CoreError::ResultTooLarge(_) => "result-too-large",
            CoreError::Database(_) => "database-error",
            CoreError::OperationCancelled => "operation-cancelled",
            CoreError::WorkerFailure(_) => "worker-failure",
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Database(e.to_string())
    }
}

impl From<refinery::Error> for CoreError {
    fn from(e: refinery::Error) -> Self {
        CoreError::Database(e.to_string())
    }
}

/// Uniform error envelope returned by every MCP tool on failure (spec §4.8).
#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl From<&CoreError> for ToolError {
    fn from(e: &CoreError) -> Self {
        ToolError {
            code: e.code().to_string(),
            message: e.to_string(),
            details: None,
        }
    }
}

impl From<CoreError> for ToolError {
    fn from(e: CoreError) -> Self {
        ToolError::from(&e)
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl ToolError {
    /// Serializes the full `{code, message, details}` envelope as JSON, so a
    /// caller parsing the tool's error content gets the structured fields
    /// back rather than the human-readable `Display` summary, which drops
    /// `details` entirely.
    #[must_use]
    pub fn to_wire(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string())
    }
}
