use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::analysis::prompt_builder::PromptTemplate;
use crate::llm_client::TokenUsage;
use crate::rate_limit::UsageStatus;

/// One submitted analysis. Transient, dropped after the pipeline returns.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub document: Bytes,
    pub job_description: String,
    pub model: String,
    pub template: PromptTemplate,
}

/// A completed analysis. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub analysis_id: Uuid,
    /// Markdown produced by the model.
    pub analysis: String,
    /// The model selector the caller asked for.
    pub model: String,
    pub completed_at: DateTime<Utc>,
    /// Caller usage including this analysis.
    pub usage: UsageStatus,
    pub token_usage: Option<TokenUsage>,
}
