//! Gemini `generateContent` client

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::ZonecastError;
use crate::config::GenerationConfig;

/// Single structured-output generation call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub prompt: String,
    pub temperature: f32,
    /// JSON schema the response must follow
    pub response_schema: Value,
}

/// Generation provider errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("rate limited by the generation API")]
    RateLimited,

    #[error("generation API unavailable (HTTP {status})")]
    Unavailable { status: u16 },

    #[error("generation stopped early: {finish_reason}")]
    Incomplete { finish_reason: String },

    #[error("generation rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("malformed generation response: {message}")]
    Malformed { message: String },
}

impl GenerationError {
    /// Rate limits, overload and truncated output are worth another attempt
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited
                | GenerationError::Unavailable { .. }
                | GenerationError::Incomplete { .. }
        )
    }
}

/// Text generation backend
pub trait TextGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig<'a> {
    response_mime_type: &'a str,
    response_schema: &'a Value,
    temperature: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: RequestContent<'a>,
    contents: Vec<RequestContent<'a>>,
    generation_config: WireGenerationConfig<'a>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Gemini REST client
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &GenerationConfig) -> Result<Self, ZonecastError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ZonecastError::config("GEMINI_API_KEY is not set"))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ZonecastError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn classify_status(status: StatusCode, body: &str) -> GenerationError {
        match status {
            StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited,
            StatusCode::SERVICE_UNAVAILABLE => GenerationError::Unavailable {
                status: status.as_u16(),
            },
            _ => {
                let message = serde_json::from_str::<ApiErrorBody>(body)
                    .map(|b| b.error.message)
                    .unwrap_or_else(|_| body.chars().take(200).collect());
                GenerationError::Rejected {
                    status: status.as_u16(),
                    message,
                }
            }
        }
    }

    fn extract_text(response: GenerateContentResponse) -> Result<String, GenerationError> {
        let Some(candidate) = response.candidates.into_iter().next() else {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates".to_string());
            return Err(GenerationError::Rejected {
                status: 200,
                message: reason,
            });
        };

        match candidate.finish_reason.as_deref() {
            None | Some("STOP") => {}
            Some(other) => {
                return Err(GenerationError::Incomplete {
                    finish_reason: other.to_string(),
                });
            }
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(GenerationError::Malformed {
                message: "candidate has no text".to_string(),
            });
        }
        Ok(text)
    }
}

impl TextGenerator for GeminiClient {
    #[tracing::instrument(skip(self, request), fields(model = %self.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = GenerateContentRequest {
            system_instruction: RequestContent {
                role: None,
                parts: vec![TextPart {
                    text: &request.system_instruction,
                }],
            },
            contents: vec![RequestContent {
                role: Some("user"),
                parts: vec![TextPart {
                    text: &request.prompt,
                }],
            }],
            generation_config: WireGenerationConfig {
                response_mime_type: "application/json",
                response_schema: &request.response_schema,
                temperature: request.temperature,
            },
        };

        debug!(prompt_chars = request.prompt.len(), "Sending generation request");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport {
                message: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| GenerationError::Malformed {
                message: e.to_string(),
            })?;
        Self::extract_text(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> GenerationRequest {
        GenerationRequest {
            system_instruction: "You are a weather journalist.".to_string(),
            prompt: "ZONE=eastern".to_string(),
            temperature: 0.6,
            response_schema: json!({"type": "OBJECT"}),
        }
    }

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new(&GenerationConfig {
            api_key: Some("test-key".to_string()),
            base_url: server.uri(),
            ..GenerationConfig::default()
        })
        .unwrap()
    }

    #[rstest]
    #[case(GenerationError::RateLimited, true)]
    #[case(GenerationError::Unavailable { status: 503 }, true)]
    #[case(GenerationError::Incomplete { finish_reason: "MAX_TOKENS".into() }, true)]
    #[case(GenerationError::Rejected { status: 400, message: "bad".into() }, false)]
    #[case(GenerationError::Transport { message: "reset".into() }, false)]
    #[case(GenerationError::Malformed { message: "eof".into() }, false)]
    fn test_retryable_classification(#[case] error: GenerationError, #[case] retryable: bool) {
        assert_eq!(error.is_retryable(), retryable);
    }

    #[test]
    fn test_api_key_is_required() {
        let err = GeminiClient::new(&GenerationConfig::default()).err().unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_generate_sends_structured_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "contents": [{"role": "user", "parts": [{"text": "ZONE=eastern"}]}],
                "generationConfig": {"responseMimeType": "application/json"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"parts": [{"text": "{\"title\":"}, {"text": "\"x\"}"}]},
                    "finishReason": "STOP"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server).generate(&request()).await.unwrap();
        assert_eq!(text, "{\"title\":\"x\"}");
    }

    #[rstest]
    #[case(429, GenerationError::RateLimited)]
    #[case(503, GenerationError::Unavailable { status: 503 })]
    #[tokio::test]
    async fn test_transient_statuses(#[case] status: u16, #[case] expected: GenerationError) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let err = client_for(&server).generate(&request()).await.unwrap_err();
        assert_eq!(err, expected);
    }

    #[tokio::test]
    async fn test_client_error_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "API key not valid"}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).generate(&request()).await.unwrap_err();
        assert_eq!(
            err,
            GenerationError::Rejected {
                status: 400,
                message: "API key not valid".to_string()
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_truncated_output_is_incomplete() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"parts": [{"text": "{\"title\": \"cut"}]},
                    "finishReason": "MAX_TOKENS"
                }]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).generate(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Incomplete { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server).generate(&request()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Rejected { ref message, .. } if message == "SAFETY"));
    }
}
