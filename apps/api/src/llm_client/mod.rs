/// LLM Client: the single point of entry for calls to the chat-completions service.
///
/// ARCHITECTURAL RULE: no other module talks to the model service directly.
/// The pipeline depends on the `AnalysisClient` trait so tests can swap in fakes.
///
/// One attempt per call. Every failure is mapped onto the closed `ServiceFault`
/// set by `classify_response` / `classify_transport`.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

use prompts::ANALYST_SYSTEM;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Longest diagnostic excerpt kept from an unclassified fault.
pub const MAX_DIAGNOSTIC_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceFault {
    #[error("API authentication failed: the key is invalid or expired")]
    Authentication,

    #[error("the model service rate-limited this request")]
    Quota,

    #[error("model '{model}' is not available")]
    ModelUnavailable { model: String },

    #[error("cannot reach the model service: {0}")]
    Connection(String),

    #[error("model service error: {0}")]
    Unclassified(String),
}

impl ServiceFault {
    /// True when the service answered (as opposed to never being reached).
    pub fn service_responded(&self) -> bool {
        !matches!(self, ServiceFault::Connection(_))
    }
}

/// Inputs of one completion call.
#[derive(Debug, Clone, Copy)]
pub struct CompletionParams<'a> {
    pub prompt: &'a str,
    pub model: &'a str,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// Model name as reported by the service.
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Sends a built prompt to the model service.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn complete(&self, params: CompletionParams<'_>) -> Result<Completion, ServiceFault>;
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// HTTP client
// ────────────────────────────────────────────────────────────────────────────

/// reqwest-backed chat-completions client.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl LlmClient {
    /// `timeout` bounds the whole round trip; hitting it is a connection fault.
    pub fn new(api_key: String, base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl AnalysisClient for LlmClient {
    async fn complete(&self, params: CompletionParams<'_>) -> Result<Completion, ServiceFault> {
        let body = ChatRequest {
            model: params.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: ANALYST_SYSTEM,
                },
                ChatMessage {
                    role: "user",
                    content: params.prompt,
                },
            ],
            max_tokens: params.max_output_tokens,
            temperature: params.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let fault = classify_response(status.as_u16(), &text, params.model);
            warn!(status = status.as_u16(), "Model service call failed: {fault}");
            return Err(fault);
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| classify_transport(&e))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ServiceFault::Unclassified("service returned an empty completion".into()))?;

        if let Some(usage) = parsed.usage {
            debug!(
                "Model call succeeded: prompt_tokens={}, completion_tokens={}",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        Ok(Completion {
            text,
            model: parsed.model.unwrap_or_else(|| params.model.to_string()),
            usage: parsed.usage,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fault classification
// ────────────────────────────────────────────────────────────────────────────

/// Maps a non-success HTTP answer onto the fault taxonomy.
pub fn classify_response(status: u16, body: &str, model: &str) -> ServiceFault {
    let (message, code) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.message, envelope.error.code),
        Err(_) => (body.to_string(), None),
    };
    let lowered = message.to_lowercase();
    let code = code.as_deref().unwrap_or_default();

    let mentions_missing_model = lowered.contains("model")
        && (lowered.contains("does not exist") || lowered.contains("not found"));

    match status {
        401 | 403 => ServiceFault::Authentication,
        429 => ServiceFault::Quota,
        408 | 504 => ServiceFault::Connection(format!("service timed out (status {status})")),
        _ if code == "invalid_api_key" => ServiceFault::Authentication,
        _ if code == "model_not_found" || mentions_missing_model => {
            ServiceFault::ModelUnavailable {
                model: model.to_string(),
            }
        }
        _ => ServiceFault::Unclassified(excerpt(&format!("status {status}: {message}"))),
    }
}

/// Maps a transport-level reqwest failure onto the fault taxonomy.
pub fn classify_transport(err: &reqwest::Error) -> ServiceFault {
    if err.is_timeout() {
        ServiceFault::Connection("request timed out".to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        ServiceFault::Connection(excerpt(&err.to_string()))
    } else {
        ServiceFault::Unclassified(excerpt(&err.to_string()))
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(MAX_DIAGNOSTIC_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params<'a>(model: &'a str) -> CompletionParams<'a> {
        CompletionParams {
            prompt: "Analyze this resume",
            model,
            max_output_tokens: 3000,
            temperature: 0.7,
        }
    }

    fn client_for(server: &MockServer, timeout: Duration) -> LlmClient {
        LlmClient::new("sk-test".to_string(), &server.uri(), timeout).unwrap()
    }

    #[test]
    fn test_classify_429_is_upstream_quota() {
        let body = r#"{"error":{"message":"You exceeded your current quota","code":"insufficient_quota"}}"#;
        assert_eq!(classify_response(429, body, "gpt-4"), ServiceFault::Quota);
    }

    #[test]
    fn test_classify_unknown_model() {
        let body = r#"{"error":{"message":"The model `gpt-9` does not exist","code":"model_not_found"}}"#;
        assert_eq!(
            classify_response(404, body, "gpt-9"),
            ServiceFault::ModelUnavailable {
                model: "gpt-9".to_string()
            }
        );
        // Same mapping when only the message says so.
        assert!(matches!(
            classify_response(400, "model not found", "x"),
            ServiceFault::ModelUnavailable { .. }
        ));
    }

    #[test]
    fn test_classify_auth() {
        assert_eq!(classify_response(401, "", "m"), ServiceFault::Authentication);
        assert_eq!(classify_response(403, "forbidden", "m"), ServiceFault::Authentication);
        let body = r#"{"error":{"message":"Incorrect API key provided","code":"invalid_api_key"}}"#;
        assert_eq!(classify_response(400, body, "m"), ServiceFault::Authentication);
    }

    #[test]
    fn test_classify_gateway_timeout_is_connection() {
        assert!(matches!(
            classify_response(504, "upstream timeout", "m"),
            ServiceFault::Connection(_)
        ));
    }

    #[test]
    fn test_unclassified_excerpt_is_bounded() {
        let body = "x".repeat(5_000);
        match classify_response(500, &body, "m") {
            ServiceFault::Unclassified(detail) => {
                assert_eq!(detail.chars().count(), MAX_DIAGNOSTIC_CHARS);
                assert!(detail.starts_with("status 500: "));
            }
            other => panic!("expected Unclassified, got {other:?}"),
        }
    }

    #[test]
    fn test_only_connection_faults_are_unanswered() {
        assert!(!ServiceFault::Connection("x".into()).service_responded());
        assert!(ServiceFault::Quota.service_responded());
        assert!(ServiceFault::Authentication.service_responded());
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4", "max_tokens": 3000})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "model": "gpt-4-0613",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "## Summary\nStrong fit"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 120, "completion_tokens": 8, "total_tokens": 128}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let completion = client_for(&server, Duration::from_secs(5))
            .complete(params("gpt-4"))
            .await
            .unwrap();

        assert_eq!(completion.text, "## Summary\nStrong fit");
        assert_eq!(completion.model, "gpt-4-0613");
        assert_eq!(completion.usage.unwrap().completion_tokens, 8);
    }

    #[tokio::test]
    async fn test_http_429_maps_to_quota_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Rate limit reached", "code": "rate_limit_exceeded"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fault = client_for(&server, Duration::from_secs(5))
            .complete(params("gpt-4"))
            .await
            .unwrap_err();
        assert_eq!(fault, ServiceFault::Quota);
    }

    #[tokio::test]
    async fn test_unknown_model_maps_to_model_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {
                    "message": "The model `gpt-9` does not exist or you do not have access to it.",
                    "type": "invalid_request_error",
                    "code": "model_not_found"
                }
            })))
            .mount(&server)
            .await;

        let fault = client_for(&server, Duration::from_secs(5))
            .complete(params("gpt-9"))
            .await
            .unwrap_err();
        assert_eq!(
            fault,
            ServiceFault::ModelUnavailable {
                model: "gpt-9".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_maps_to_connection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let fault = client_for(&server, Duration::from_millis(200))
            .complete(params("gpt-4"))
            .await
            .unwrap_err();
        assert!(matches!(fault, ServiceFault::Connection(_)), "got {fault:?}");
    }

    #[tokio::test]
    async fn test_unreachable_host_maps_to_connection() {
        let client =
            LlmClient::new("sk-test".to_string(), "http://127.0.0.1:1", Duration::from_secs(2))
                .unwrap();
        let fault = client.complete(params("gpt-4")).await.unwrap_err();
        assert!(matches!(fault, ServiceFault::Connection(_)), "got {fault:?}");
    }

    #[tokio::test]
    async fn test_empty_completion_is_unclassified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": ""}}]
            })))
            .mount(&server)
            .await;

        let fault = client_for(&server, Duration::from_secs(5))
            .complete(params("gpt-4"))
            .await
            .unwrap_err();
        assert!(matches!(fault, ServiceFault::Unclassified(_)));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let client =
            LlmClient::new("sk-x".to_string(), "http://localhost:9/v1/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.endpoint, "http://localhost:9/v1/chat/completions");
    }
}
