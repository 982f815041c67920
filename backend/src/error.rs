//! Service error taxonomy and its HTTP mapping.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

/// Errors surfaced by the order/payment service to its callers.
///
/// An unknown order on a status update is deliberately *not* represented
/// here: it is an expected outcome and is reported as `false`.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The caller lacks the role required for `operation`.
    #[error("unauthorized: {operation} requires admin")]
    Unauthorized { operation: &'static str },

    /// The caller is anonymous but the operation needs an identity.
    #[error("unauthorized: {operation} requires an authenticated caller")]
    Anonymous { operation: &'static str },

    /// No payment processor secret key has been stored yet.
    #[error("Stripe is not configured")]
    NotConfigured,

    /// A caller-supplied argument was rejected.
    #[error("invalid {field}: {message}")]
    InvalidArgument { field: &'static str, message: String },

    /// The outbound call to the payment processor failed.
    #[error("payment processor call failed: {0}")]
    ExternalCallFailed(String),
}

impl ServiceError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } | Self::Anonymous { .. } => "UNAUTHORIZED",
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::ExternalCallFailed(_) => "EXTERNAL_CALL_FAILED",
        }
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized { .. } | Self::Anonymous { .. } => StatusCode::FORBIDDEN,
            Self::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            Self::ExternalCallFailed(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "code": self.code(),
            "error": self.to_string(),
        }))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
