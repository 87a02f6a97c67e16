//! Analysis Pipeline: one linear pass per request.
//!
//! Flow: reserve quota → extract text (spawn_blocking) → build prompt →
//!       model call → commit usage → return report.
//!
//! Stages: Idle → QuotaChecked → Extracted → PromptBuilt → Called → Completed,
//! with absorbing RejectedByQuota / Failed(kind). No stage is re-entered and
//! there is no retry loop. Usage is charged only after a successful call
//! (or, with `charge_failed_calls`, after a fault the service answered).

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::analysis::prompt_builder::PromptBuilder;
use crate::errors::{AnalysisError, FailureKind};
use crate::extraction::{ExtractionError, TextExtractor};
use crate::llm_client::{AnalysisClient, CompletionParams};
use crate::models::{AnalysisReport, AnalysisRequest};
use crate::rate_limit::RateGovernor;

// ────────────────────────────────────────────────────────────────────────────
// Stage tracking
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    QuotaChecked,
    Extracted,
    PromptBuilt,
    Called,
    Completed,
    RejectedByQuota,
    Failed(FailureKind),
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Stage::Completed | Stage::RejectedByQuota | Stage::Failed(_)
        )
    }
}

#[derive(Debug)]
struct StageTracker {
    stage: Stage,
}

impl StageTracker {
    fn new() -> Self {
        Self { stage: Stage::Idle }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            !self.stage.is_terminal(),
            "transition out of terminal stage {:?}",
            self.stage
        );
        debug!(from = ?self.stage, to = ?next, "Pipeline transition");
        self.stage = next;
    }

    fn fail(&mut self, err: AnalysisError) -> AnalysisError {
        let next = match err.kind() {
            FailureKind::QuotaExceeded => Stage::RejectedByQuota,
            kind => Stage::Failed(kind),
        };
        self.advance(next);
        err
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Also charge quota for classified faults the service answered.
    pub charge_failed_calls: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_output_tokens: 3000,
            temperature: 0.7,
            charge_failed_calls: false,
        }
    }
}

/// Composes governor, extractor, prompt builder, and model client.
/// Cheap to clone; clones share the governor's ledger.
#[derive(Clone)]
pub struct AnalysisPipeline {
    governor: RateGovernor,
    extractor: Arc<dyn TextExtractor>,
    client: Arc<dyn AnalysisClient>,
    prompts: PromptBuilder,
    settings: PipelineSettings,
}

impl AnalysisPipeline {
    pub fn new(
        governor: RateGovernor,
        extractor: Arc<dyn TextExtractor>,
        client: Arc<dyn AnalysisClient>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            governor,
            extractor,
            client,
            prompts: PromptBuilder::default(),
            settings,
        }
    }

    pub fn governor(&self) -> &RateGovernor {
        &self.governor
    }

    /// Runs one analysis for `caller`. Every failure comes back as a value.
    pub async fn run(
        &self,
        caller: &str,
        request: AnalysisRequest,
    ) -> Result<AnalysisReport, AnalysisError> {
        let analysis_id = Uuid::new_v4();
        let span = info_span!("analysis", %analysis_id, caller);
        self.run_stages(caller, request, analysis_id)
            .instrument(span)
            .await
    }

    async fn run_stages(
        &self,
        caller: &str,
        request: AnalysisRequest,
        analysis_id: Uuid,
    ) -> Result<AnalysisReport, AnalysisError> {
        let mut tracker = StageTracker::new();

        // Step 1: quota, before any cost is incurred
        let reservation = match self.governor.reserve(caller) {
            Ok(reservation) => reservation,
            Err(rejection) => {
                info!(window = ?rejection.window, "Rejected by quota");
                return Err(tracker.fail(AnalysisError::QuotaExceeded(rejection)));
            }
        };
        tracker.advance(Stage::QuotaChecked);
        info!("Admitted. {}", reservation.status().summary());

        // Step 2: extraction (CPU-bound)
        let extractor = Arc::clone(&self.extractor);
        let document = request.document.clone();
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&document))
            .await
            .map_err(|e| ExtractionError::Aborted(e.to_string()))
            .and_then(|result| result);
        let resume_text = extracted.map_err(|e| tracker.fail(e.into()))?;

        if resume_text.trim().is_empty() {
            return Err(tracker.fail(AnalysisError::EmptyDocument));
        }
        tracker.advance(Stage::Extracted);
        debug!(chars = resume_text.chars().count(), "Extracted document text");

        // Step 3: prompt
        let prompt = self
            .prompts
            .build(&resume_text, &request.job_description, request.template);
        tracker.advance(Stage::PromptBuilt);

        // Step 4: model call, single attempt
        let result = self
            .client
            .complete(CompletionParams {
                prompt: &prompt,
                model: &request.model,
                max_output_tokens: self.settings.max_output_tokens,
                temperature: self.settings.temperature,
            })
            .await;
        tracker.advance(Stage::Called);

        match result {
            Ok(completion) => {
                let usage = reservation.status();
                reservation.commit();
                tracker.advance(Stage::Completed);
                info!(reported_model = %completion.model, "Analysis completed");
                Ok(AnalysisReport {
                    analysis_id,
                    analysis: completion.text,
                    model: request.model,
                    completed_at: Utc::now(),
                    usage,
                    token_usage: completion.usage,
                })
            }
            Err(fault) => {
                if self.settings.charge_failed_calls && fault.service_responded() {
                    reservation.commit();
                } else {
                    drop(reservation);
                }
                warn!("Model call failed: {fault}");
                Err(tracker.fail(fault.into()))
            }
        }
    }
}
