//! Error types for the response parser

use serde::Serialize;

/// Response parsing errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Malformed response at {path}: {reason}")]
    MalformedResponse { path: String, reason: String },

    #[error("Unresolved pipeline variable {variable} ({reference}) in metric {metric_id}")]
    UnresolvedPipelineVariable {
        metric_id: String,
        variable: String,
        reference: String,
    },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Backend error ({status}): {reason}")]
    Backend { status: u16, reason: String },

    #[error("No response for query {0}")]
    MissingResponse(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Parse task failed: {0}")]
    Task(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedResponse { .. } => "malformed_response",
            Self::UnresolvedPipelineVariable { .. } => "unresolved_pipeline_variable",
            Self::InvalidQuery(_) => "invalid_query",
            Self::Backend { .. } => "backend_error",
            Self::MissingResponse(_) => "missing_response",
            Self::Script(_) => "script_error",
            Self::Task(_) => "task_error",
            Self::Json(_) => "parse_exception",
        }
    }

    /// Whether the condition only degrades a value instead of failing a query
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedPipelineVariable { .. } | Self::Script(_)
        )
    }

    /// Serializable summary used when reporting per-refID failures
    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            error_type: self.kind().to_string(),
            reason: self.to_string(),
        }
    }
}

/// Error summary attached to a failed refID
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    #[serde(rename = "type")]
    pub error_type: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display() {
        let err = Error::malformed("aggregations.2", "expected object");
        assert_eq!(
            err.to_string(),
            "Malformed response at aggregations.2: expected object"
        );
        assert_eq!(err.kind(), "malformed_response");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_pipeline_variable_is_recoverable() {
        let err = Error::UnresolvedPipelineVariable {
            metric_id: "4".to_string(),
            variable: "var1".to_string(),
            reference: "9".to_string(),
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("var1"));
    }

    #[test]
    fn test_report_serializes_type() {
        let report = Error::Backend {
            status: 400,
            reason: "shard failure".to_string(),
        }
        .to_report();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"type\":\"backend_error\""));
        assert!(json.contains("shard failure"));
    }
}
