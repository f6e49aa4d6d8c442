use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Structured error response returned by every Parley endpoint.
/// Carries enough context for a client (or the CLI) to explain what failed.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "adapter_timeout")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const ADAPTER_TIMEOUT: &str = "adapter_timeout";
    pub const ADAPTER_UNAVAILABLE: &str = "adapter_unavailable";
    pub const ENRICHMENT_EXHAUSTED: &str = "enrichment_exhausted";
    pub const INTERNAL_ERROR: &str = "internal_error";
}
