//! Error types for the job API client.

use thiserror::Error;

/// Additional context from API errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the server.
    pub http_status: Option<u16>,
    /// Server-side error code (e.g. "job_not_found").
    pub server_code: Option<String>,
    /// Request ID from the server (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.server_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when calling the job API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request - permanent error, don't retry.
    #[error("invalid request: {message}")]
    InvalidRequest {
        message: String,
        context: Option<ErrorContext>,
    },

    /// The referenced job/category/query does not exist.
    #[error("not found: {message}")]
    NotFound {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Server-side error - may be retryable.
    #[error("server error: {message}")]
    Server {
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    /// The server returned a body this client could not decode.
    #[error("malformed response: {message}")]
    MalformedResponse {
        message: String,
        context: Option<ErrorContext>,
    },

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error (missing base URL, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl ApiError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            context: None,
        }
    }

    pub fn not_found(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::NotFound {
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn server(message: impl Into<String>, retryable: bool) -> Self {
        Self::Server {
            message: message.into(),
            retryable,
            context: None,
        }
    }

    pub fn server_with_context(
        message: impl Into<String>,
        retryable: bool,
        context: ErrorContext,
    ) -> Self {
        Self::Server {
            message: message.into(),
            retryable,
            context: Some(context),
        }
    }

    pub fn malformed(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::MalformedResponse {
            message: message.into(),
            context: Some(context),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidRequest { .. } => false,
            Self::NotFound { .. } => false,
            Self::Server { retryable, .. } => *retryable,
            Self::MalformedResponse { .. } => false,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Config(_) => false,
        }
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::NotFound { .. } => "not_found",
            Self::Server { .. } => "server_error",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::InvalidRequest { context, .. } => context.as_ref(),
            Self::NotFound { context, .. } => context.as_ref(),
            Self::Server { context, .. } => context.as_ref(),
            Self::MalformedResponse { context, .. } => context.as_ref(),
            Self::Http(_) => None,
            Self::Config(_) => None,
        }
    }

    /// Get the request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}
