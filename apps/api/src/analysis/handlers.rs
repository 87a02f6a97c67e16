use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Multipart, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::analysis::prompt_builder::PromptTemplate;
use crate::errors::{AnalysisError, AppError};
use crate::llm_client::TokenUsage;
use crate::models::AnalysisRequest;
use crate::rate_limit::UsageStatus;
use crate::state::AppState;

#[derive(Serialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    pub analysis_id: Uuid,
    pub analysis: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub usage: UsageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

#[derive(Serialize)]
pub struct UsageResponse {
    pub success: bool,
    pub usage: UsageStatus,
    pub summary: String,
}

/// Quota key for a request: the peer IP, or the first `X-Forwarded-For`
/// hop when the service sits behind a trusted proxy.
pub fn caller_id(headers: &HeaderMap, addr: SocketAddr, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(hop) = forwarded {
            return hop.to_string();
        }
    }
    addr.ip().to_string()
}

/// POST /api/analyze
pub async fn handle_analyze(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let caller = caller_id(&headers, addr, state.config.trust_forwarded_for);

    // Rate-limited callers get 429 before the form is read or validated.
    // The pipeline still takes the binding reservation.
    if let Some(rejection) = state.pipeline.governor().admit(&caller).rejection {
        return Err(AnalysisError::QuotaExceeded(rejection).into());
    }

    let mut document: Option<Bytes> = None;
    let mut job_description: Option<String> = None;
    let mut model: Option<String> = None;
    let mut template = PromptTemplate::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed form data: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let read_err = |e: axum::extract::multipart::MultipartError| {
            AppError::Validation(format!("Could not read field '{name}': {e}"))
        };
        match name.as_str() {
            "resume" => document = Some(field.bytes().await.map_err(read_err)?),
            "job_description" => job_description = Some(field.text().await.map_err(read_err)?),
            "model" => model = Some(field.text().await.map_err(read_err)?),
            "template" => {
                let raw = field.text().await.map_err(read_err)?;
                if !raw.trim().is_empty() {
                    template = raw.parse().map_err(AppError::Validation)?;
                }
            }
            _ => {}
        }
    }

    let document =
        document.ok_or_else(|| AppError::Validation("Resume file not provided".to_string()))?;
    let job_description = job_description
        .ok_or_else(|| AppError::Validation("Job description not provided".to_string()))?;
    let job_description = job_description.trim().to_string();
    if job_description.is_empty() {
        return Err(AppError::Validation(
            "Job description cannot be empty".to_string(),
        ));
    }
    let model = model
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| state.config.default_model.clone());

    let report = state
        .pipeline
        .run(
            &caller,
            AnalysisRequest {
                document,
                job_description,
                model,
                template,
            },
        )
        .await?;

    Ok(Json(AnalyzeResponse {
        success: true,
        analysis_id: report.analysis_id,
        analysis: report.analysis,
        model: report.model,
        timestamp: report.completed_at,
        usage: report.usage,
        token_usage: report.token_usage,
    }))
}

/// GET /api/usage
pub async fn handle_usage(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Json<UsageResponse> {
    let caller = caller_id(&headers, addr, state.config.trust_forwarded_for);
    let usage = state.pipeline.governor().status(&caller);
    Json(UsageResponse {
        success: true,
        summary: usage.summary(),
        usage,
    })
}
