//! HTTP error mapping: every failure leaves as `{error, code, details?}`.

use axum::Json;
use axum::extract::rejection::{FormRejection, JsonRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::error::{DatabaseError, DispatchError, FieldError, IngestError, MergeError, ValidationError};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<FieldError>>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<Vec<FieldError>>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    /// 400 with field-level detail.
    pub fn validation(message: impl Into<String>, err: ValidationError) -> Self {
        Self {
            details: Some(err.0),
            ..Self::new(StatusCode::BAD_REQUEST, "validation_failed", message)
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    /// 500 with a fixed public message; the cause is only logged.
    pub fn internal(message: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        let message = message.into();
        error!(error = %cause, "{message}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.code,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        ApiError::internal("Internal server error", e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::validation("Invalid request", e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::validation("Invalid request", ValidationError::single("body", e.body_text()))
    }
}

impl From<FormRejection> for ApiError {
    fn from(e: FormRejection) -> Self {
        ApiError::validation(
            "Invalid webhook payload",
            ValidationError::single("body", e.body_text()),
        )
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Validation(v) => ApiError::validation("Invalid webhook payload", v),
            IngestError::Database(db) => ApiError::internal("Failed to process webhook", db),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Validation(v) => ApiError::validation("Invalid request", v),
            DispatchError::ContactNotFound(_) => ApiError::not_found("Contact not found"),
            DispatchError::MissingDestination { .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, "missing_destination", e.to_string())
            }
            DispatchError::InvalidPayload { .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, "invalid_payload", e.to_string())
            }
            DispatchError::Transport { ref reason, .. } => {
                ApiError::new(StatusCode::BAD_GATEWAY, "transport_failed", reason.clone())
            }
            DispatchError::Config(ref c) => {
                error!(error = %c, "Channel not configured");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "channel_not_configured", e.to_string())
            }
            DispatchError::SentNotRecorded { .. } => {
                ApiError::internal("Message sent but could not be recorded", e)
            }
            DispatchError::Database(db) => ApiError::internal("Failed to send message", db),
        }
    }
}

impl From<MergeError> for ApiError {
    fn from(e: MergeError) -> Self {
        match e {
            MergeError::Validation(v) => ApiError::validation("Invalid request", v),
            MergeError::ContactNotFound(_) => ApiError::not_found(e.to_string()),
            MergeError::Database(db) => ApiError::internal("Failed to merge contacts", db),
        }
    }
}
