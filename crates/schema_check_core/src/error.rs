use thiserror::Error;

// ── Stable error / finding codes ──────────────────────────────

pub const CODE_SCHEMA_INVALID: &str = "SCHEMA:INVALID";
pub const CODE_COMPOSE_DUPLICATE_SUBGRAPH: &str = "COMPOSE:DUPLICATE_SUBGRAPH";
pub const CODE_COMPOSE_INVALID_SUBGRAPH: &str = "COMPOSE:INVALID_SUBGRAPH";
pub const CODE_COMPOSE_CONFLICT: &str = "COMPOSE:CONFLICT";
pub const CODE_COMPOSE_UNRESOLVED_FIELD: &str = "COMPOSE:UNRESOLVED_FIELD";
pub const CODE_COMPOSE_CONTRACT: &str = "COMPOSE:CONTRACT";
pub const CODE_LINT_ERROR: &str = "LINT:ERROR";
pub const CODE_PRUNING_ERROR: &str = "PRUNING:ERROR";
pub const CODE_PROPOSAL_MISMATCH: &str = "PROPOSAL:MISMATCH";
pub const CODE_EXTENSION_FAIL: &str = "EXTENSION:FAIL";
pub const CODE_EXTENSION_UNREACHABLE: &str = "EXTENSION:UNREACHABLE";
pub const CODE_TRAFFIC_CLIENT_USAGE: &str = "TRAFFIC:CLIENT_USAGE";
pub const CODE_BREAKING_UNVERIFIED: &str = "TRAFFIC:BREAKING_UNVERIFIED";

/// A single SDL parse or validation problem.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SchemaError {
    pub message: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl SchemaError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "{} ({}:{})", self.message, line, column),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// SDL failed to parse or validate. Lists every problem found, not just the first.
#[derive(Debug, Clone, Error)]
#[error("invalid schema: {} error(s)", .errors.len())]
pub struct InvalidSchemaError {
    pub errors: Vec<SchemaError>,
}

#[derive(Debug, Error)]
pub enum SchemaCheckError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    InvalidSchema(#[from] InvalidSchemaError),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Another operation moved state this one was evaluated against.
    #[error("concurrent update: {0}")]
    ConcurrentUpdate(String),

    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    #[error("operation timed out after {0}s")]
    Timeout(u64),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SchemaCheckError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidInput(_) => 400,
            Self::InvalidSchema(_) => 422,
            Self::Conflict(_) | Self::ConcurrentUpdate(_) => 409,
            Self::Infrastructure(_) => 503,
            Self::Timeout(_) => 504,
            Self::Internal(_) => 500,
        }
    }

    /// Whether a caller may safely resubmit the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentUpdate(_)
                | Self::Infrastructure(_)
                | Self::Timeout(_)
                | Self::Internal(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SchemaCheckError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ── http_status: exhaustive variant coverage ──────────────────

    #[test]
    fn http_status_not_found() {
        assert_eq!(SchemaCheckError::NotFound("x".into()).http_status(), 404);
    }

    #[test]
    fn http_status_invalid_input() {
        assert_eq!(SchemaCheckError::InvalidInput("x".into()).http_status(), 400);
    }

    #[test]
    fn http_status_invalid_schema() {
        let e = SchemaCheckError::from(InvalidSchemaError { errors: vec![] });
        assert_eq!(e.http_status(), 422);
    }

    #[test]
    fn http_status_conflict() {
        assert_eq!(SchemaCheckError::Conflict("x".into()).http_status(), 409);
    }

    #[test]
    fn http_status_concurrent_update() {
        let e = SchemaCheckError::ConcurrentUpdate("pointer moved".into());
        assert_eq!(e.http_status(), 409);
        assert!(e.is_retryable());
    }

    #[test]
    fn http_status_infrastructure() {
        assert_eq!(
            SchemaCheckError::Infrastructure("db down".into()).http_status(),
            503
        );
    }

    #[test]
    fn http_status_timeout() {
        assert_eq!(SchemaCheckError::Timeout(60).http_status(), 504);
    }

    #[test]
    fn http_status_internal() {
        let err = SchemaCheckError::Internal(anyhow::anyhow!("boom"));
        assert_eq!(err.http_status(), 500);
    }

    // ── Display ──────────────────────────────────────────────────

    #[test]
    fn display_invalid_schema_counts_errors() {
        let e = SchemaCheckError::from(InvalidSchemaError {
            errors: vec![SchemaError::new("a"), SchemaError::new("b")],
        });
        assert_eq!(e.to_string(), "invalid schema: 2 error(s)");
    }

    #[test]
    fn display_timeout() {
        assert_eq!(
            SchemaCheckError::Timeout(30).to_string(),
            "operation timed out after 30s"
        );
    }

    #[test]
    fn schema_error_display_with_position() {
        let e = SchemaError::at("Unknown type \"Foo\"", 3, 7);
        assert_eq!(e.to_string(), "Unknown type \"Foo\" (3:7)");
    }

    #[test]
    fn schema_error_display_without_position() {
        assert_eq!(SchemaError::new("bad").to_string(), "bad");
    }

    #[test]
    fn retryable_only_for_infrastructure_classes() {
        assert!(SchemaCheckError::Infrastructure("x".into()).is_retryable());
        assert!(SchemaCheckError::Timeout(1).is_retryable());
        assert!(!SchemaCheckError::Conflict("x".into()).is_retryable());
        assert!(!SchemaCheckError::NotFound("x".into()).is_retryable());
    }

    #[test]
    fn codes_follow_prefix_format() {
        for code in [
            CODE_SCHEMA_INVALID,
            CODE_COMPOSE_CONFLICT,
            CODE_LINT_ERROR,
            CODE_PROPOSAL_MISMATCH,
            CODE_EXTENSION_FAIL,
            CODE_EXTENSION_UNREACHABLE,
            CODE_TRAFFIC_CLIENT_USAGE,
        ] {
            let (prefix, rest) = code.split_once(':').unwrap();
            assert!(prefix.chars().all(|c| c.is_ascii_uppercase()), "{code}");
            assert!(!rest.is_empty(), "{code}");
        }
    }
}
