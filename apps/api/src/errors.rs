use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::extraction::ExtractionError;
use crate::llm_client::ServiceFault;
use crate::rate_limit::{QuotaRejection, QuotaWindow};

/// Closed set of caller-facing failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    QuotaExceeded,
    ExtractionFailed,
    EmptyDocument,
    AuthenticationFault,
    QuotaFault,
    ModelUnavailable,
    ConnectionFault,
    UnclassifiedServiceFault,
    ExportFault,
}

/// Every way an analysis or export can fail. Returned as a value, never
/// allowed to take down other in-flight requests.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{}", .0.message())]
    QuotaExceeded(QuotaRejection),

    #[error("Could not extract text from the document: {0}")]
    ExtractionFailed(#[from] ExtractionError),

    #[error("The document contains no extractable text")]
    EmptyDocument,

    #[error("API authentication error: the service key is invalid or expired")]
    AuthenticationFault,

    #[error("Rate limited: the model service quota is exceeded. Wait a moment and try again")]
    QuotaFault,

    #[error("Model not available: '{model}' was not found. Choose a different model")]
    ModelUnavailable { model: String },

    #[error("Connection error: cannot reach the model service ({0})")]
    ConnectionFault(String),

    #[error("API error: {0}")]
    UnclassifiedServiceFault(String),

    #[error("Export failed: {0}")]
    ExportFault(String),
}

impl AnalysisError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AnalysisError::QuotaExceeded(_) => FailureKind::QuotaExceeded,
            AnalysisError::ExtractionFailed(_) => FailureKind::ExtractionFailed,
            AnalysisError::EmptyDocument => FailureKind::EmptyDocument,
            AnalysisError::AuthenticationFault => FailureKind::AuthenticationFault,
            AnalysisError::QuotaFault => FailureKind::QuotaFault,
            AnalysisError::ModelUnavailable { .. } => FailureKind::ModelUnavailable,
            AnalysisError::ConnectionFault(_) => FailureKind::ConnectionFault,
            AnalysisError::UnclassifiedServiceFault(_) => FailureKind::UnclassifiedServiceFault,
            AnalysisError::ExportFault(_) => FailureKind::ExportFault,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AnalysisError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AnalysisError::ExtractionFailed(_)
            | AnalysisError::EmptyDocument
            | AnalysisError::ModelUnavailable { .. } => StatusCode::BAD_REQUEST,
            AnalysisError::AuthenticationFault | AnalysisError::UnclassifiedServiceFault(_) => {
                StatusCode::BAD_GATEWAY
            }
            AnalysisError::QuotaFault => StatusCode::SERVICE_UNAVAILABLE,
            AnalysisError::ConnectionFault(_) => StatusCode::GATEWAY_TIMEOUT,
            AnalysisError::ExportFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceFault> for AnalysisError {
    fn from(fault: ServiceFault) -> Self {
        match fault {
            ServiceFault::Authentication => AnalysisError::AuthenticationFault,
            ServiceFault::Quota => AnalysisError::QuotaFault,
            ServiceFault::ModelUnavailable { model } => AnalysisError::ModelUnavailable { model },
            ServiceFault::Connection(detail) => AnalysisError::ConnectionFault(detail),
            ServiceFault::Unclassified(detail) => AnalysisError::UnclassifiedServiceFault(detail),
        }
    }
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    /// Lenient export sentinel: rendering failed and the fault was swallowed.
    #[error("No document artifact available")]
    ExportUnavailable,

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Analysis(e) => {
                let kind = e.kind();
                match kind {
                    FailureKind::QuotaExceeded
                    | FailureKind::ExtractionFailed
                    | FailureKind::EmptyDocument
                    | FailureKind::ModelUnavailable => {}
                    _ => tracing::error!("Analysis error ({kind:?}): {e}"),
                }
                let code = match kind {
                    FailureKind::QuotaExceeded => "QUOTA_EXCEEDED",
                    FailureKind::ExtractionFailed => "EXTRACTION_FAILED",
                    FailureKind::EmptyDocument => "EMPTY_DOCUMENT",
                    FailureKind::AuthenticationFault => "AUTHENTICATION_FAULT",
                    FailureKind::QuotaFault => "QUOTA_FAULT",
                    FailureKind::ModelUnavailable => "MODEL_UNAVAILABLE",
                    FailureKind::ConnectionFault => "CONNECTION_FAULT",
                    FailureKind::UnclassifiedServiceFault => "UNCLASSIFIED_SERVICE_FAULT",
                    FailureKind::ExportFault => "EXPORT_FAULT",
                };
                (e.status_code(), code, e.to_string())
            }
            AppError::ExportUnavailable => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXPORT_UNAVAILABLE",
                "No document artifact available".to_string(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let mut body = json!({
            "success": false,
            "error": message,
            "code": code,
        });

        let mut retry_after = None;
        if let AppError::Analysis(AnalysisError::QuotaExceeded(rejection)) = &self {
            body["window"] = json!(match rejection.window {
                QuotaWindow::Hour => "hour",
                QuotaWindow::Day => "day",
            });
            body["usage"] = json!(rejection.status);
            if let Some(wait) = rejection.retry_after {
                let secs = wait.num_seconds().max(1);
                body["retry_after_secs"] = json!(secs);
                retry_after = HeaderValue::from_str(&secs.to_string()).ok();
            }
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}
