use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Failure of a single chat call, from argument validation through the
/// upstream exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("upstream status {status}: {body}")]
    UpstreamHttp { status: u16, body: String },
    #[error("request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("request cancelled")]
    Cancelled,
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid upstream response: {0}")]
    Decode(String),
    #[error("request id already registered: {0}")]
    DuplicateId(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::UpstreamHttp { .. } => "upstream_http_error",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Network(_) => "network_error",
            Self::Decode(_) => "decode_error",
            Self::DuplicateId(_) => "duplicate_id",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Timeouts and explicit cancellation both abort the call mid-flight.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled)
    }

    fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidArguments(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamHttp { .. } | Self::Network(_) | Self::Decode(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled => StatusCode::CONFLICT,
            Self::DuplicateId(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub error_type: String,
    pub request_id: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            error_type: "invalid_request_error".to_string(),
            request_id: None,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        let error_type = match err {
            ChatError::InvalidArguments(_) => "invalid_request_error",
            ChatError::Timeout { .. } | ChatError::Cancelled => "aborted_error",
            ChatError::DuplicateId(_) | ChatError::Internal(_) => "server_error",
            _ => "upstream_error",
        };
        AppError::new(err.http_status(), err.code(), err.to_string()).with_type(error_type)
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: ErrorBody {
                message: self.message,
                error_type: self.error_type,
                code: self.code,
                request_id: self.request_id,
            },
        };
        (self.status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
