//! Report Exporter: turns a finished analysis into a downloadable artifact.
//!
//! `txt` and `md` are the analysis bytes unchanged. `pdf` goes through the
//! renderer in `document`. In lenient mode a rendering fault is logged and
//! the caller gets "no artifact"; in strict mode it surfaces as `ExportFault`.

pub mod document;
pub mod font_metrics;
pub mod handlers;

use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::errors::AnalysisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Txt,
    Md,
    Pdf,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Txt => "txt",
            ExportFormat::Md => "md",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Txt => "text/plain; charset=utf-8",
            ExportFormat::Md => "text/markdown; charset=utf-8",
            ExportFormat::Pdf => "application/pdf",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "txt" | "text" | "plain" => Ok(ExportFormat::Txt),
            "md" | "markdown" => Ok(ExportFormat::Md),
            "pdf" | "document" => Ok(ExportFormat::Pdf),
            other => Err(format!("Invalid format '{other}'")),
        }
    }
}

/// Optional header context for the PDF rendition.
#[derive(Debug, Clone)]
pub struct ReportMeta {
    pub model: Option<String>,
    pub summary: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl Default for ReportMeta {
    fn default() -> Self {
        Self {
            model: None,
            summary: None,
            generated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub bytes: Bytes,
    pub format: ExportFormat,
    pub filename: String,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("PDF rendering failed: {0}")]
    Render(String),

    #[error("document too large ({pages} pages)")]
    TooLarge { pages: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportMode {
    /// Rendering faults yield no artifact.
    #[default]
    Lenient,
    /// Rendering faults are returned as `ExportFault`.
    Strict,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReportExporter {
    mode: ExportMode,
}

impl ReportExporter {
    pub fn new(mode: ExportMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ExportMode {
        self.mode
    }

    /// Renders `analysis` as `format`. `Ok(None)` means a lenient-mode
    /// rendering fault; plain formats never fail.
    pub fn export(
        &self,
        analysis: &str,
        format: ExportFormat,
        meta: &ReportMeta,
    ) -> Result<Option<ExportArtifact>, AnalysisError> {
        let rendered = match format {
            ExportFormat::Txt | ExportFormat::Md => Ok(Bytes::copy_from_slice(analysis.as_bytes())),
            ExportFormat::Pdf => document::render_pdf(analysis, meta).map(Bytes::from),
        };

        match rendered {
            Ok(bytes) => {
                info!(format = format.extension(), bytes = bytes.len(), "Exported analysis");
                Ok(Some(ExportArtifact {
                    bytes,
                    format,
                    filename: export_filename(meta.generated_at, format),
                }))
            }
            Err(e) => match self.mode {
                ExportMode::Lenient => {
                    warn!("Export to {} failed, no artifact: {e}", format.extension());
                    Ok(None)
                }
                ExportMode::Strict => Err(AnalysisError::ExportFault(e.to_string())),
            },
        }
    }
}

/// `analysis_YYYYMMDD_HHMMSS.<ext>`, UTC.
pub fn export_filename(at: DateTime<Utc>, format: ExportFormat) -> String {
    format!("analysis_{}.{}", at.format("%Y%m%d_%H%M%S"), format.extension())
}
