use crate::analysis::AnalysisPipeline;
use crate::config::Config;
use crate::export::ReportExporter;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Owns the per-caller quota ledger; clones share it.
    pub pipeline: AnalysisPipeline,
    pub exporter: ReportExporter,
    pub config: Config,
}

#[cfg(test)]
pub mod testing {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::AppState;
    use crate::analysis::AnalysisPipeline;
    use crate::config::Config;
    use crate::export::ReportExporter;
    use crate::extraction::DocumentExtractor;
    use crate::llm_client::{AnalysisClient, Completion, CompletionParams, ServiceFault};
    use crate::rate_limit::RateGovernor;

    /// Returns the same outcome for every call.
    pub struct CannedClient(pub Result<String, ServiceFault>);

    #[async_trait]
    impl AnalysisClient for CannedClient {
        async fn complete(&self, params: CompletionParams<'_>) -> Result<Completion, ServiceFault> {
            self.0.clone().map(|text| Completion {
                text,
                model: params.model.to_string(),
                usage: None,
            })
        }
    }

    pub fn state_with(outcome: Result<String, ServiceFault>, config: Config) -> AppState {
        let pipeline = AnalysisPipeline::new(
            RateGovernor::new(config.quota_limits()),
            Arc::new(DocumentExtractor),
            Arc::new(CannedClient(outcome)),
            config.pipeline_settings(),
        );
        AppState {
            pipeline,
            exporter: ReportExporter::new(config.export_mode()),
            config,
        }
    }

    pub fn state() -> AppState {
        state_with(Ok("## Executive Summary\nGood fit.".to_string()), Config::for_tests())
    }
}
