use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::errors::AppError;
use crate::export::{ExportFormat, ReportMeta};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub analysis: String,
    #[serde(default = "default_format")]
    pub format: String,
    pub model: Option<String>,
    pub summary: Option<String>,
}

fn default_format() -> String {
    "txt".to_string()
}

/// POST /api/download
pub async fn handle_download(
    State(state): State<AppState>,
    Json(req): Json<DownloadRequest>,
) -> Result<Response, AppError> {
    let format: ExportFormat = req
        .format
        .parse()
        .map_err(|_| AppError::Validation("Invalid format".to_string()))?;
    let meta = ReportMeta {
        model: req.model,
        summary: req.summary,
        generated_at: Utc::now(),
    };

    let exporter = state.exporter;
    let analysis = req.analysis;
    let artifact = tokio::task::spawn_blocking(move || exporter.export(&analysis, format, &meta))
        .await
        .map_err(|e| anyhow::anyhow!("export task failed: {e}"))??
        .ok_or(AppError::ExportUnavailable)?;

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        artifact.filename
    ))
    .map_err(|e| anyhow::anyhow!("invalid filename header: {e}"))?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(artifact.format.content_type()),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.bytes,
    )
        .into_response())
}
