//! Chat-completion client for planner and implementer turns
//!
//! Each call is a single non-streaming request. Transport errors, non-2xx
//! statuses, timeouts and malformed bodies all surface as
//! `DuetError::ModelInvocationFailed`; nothing is retried here.

use crate::auth;
use crate::types::{ChatMessage, ChatRequest, ChatResponse, ModelReply};
use async_trait::async_trait;
use chrono::Utc;
use duet_core::{DuetError, ModelConfig, Result};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Longest slice of an error body carried into a diagnostic
const MAX_ERROR_BODY: usize = 2000;

/// Trait for invoking a model (allows mocking in tests)
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Run one completion and return the full response text
    async fn invoke(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: usize,
    ) -> Result<ModelReply>;
}

/// HTTP client for a chat-completion endpoint
#[derive(Debug, Clone)]
pub struct ModelClient {
    http: reqwest::Client,
    endpoint: String,
    api_key_env: String,
    timeout: Duration,
}

impl ModelClient {
    /// Create a client for the given endpoint
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DuetError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key_env: "DUET_API_KEY".to_string(),
            timeout,
        })
    }

    /// Create a client from the `[models]` config section
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        Ok(Self::new(&config.endpoint, Duration::from_secs(config.timeout_secs))?
            .with_api_key_env(&config.api_key_env))
    }

    /// Set the environment variable the bearer credential is read from
    pub fn with_api_key_env(mut self, name: impl Into<String>) -> Self {
        self.api_key_env = name.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn describe_send_error(&self, e: &reqwest::Error) -> String {
        if e.is_timeout() {
            format!("request timed out after {}s", self.timeout.as_secs())
        } else {
            format!("failed to send request: {}", e)
        }
    }
}

#[async_trait]
impl ModelBackend for ModelClient {
    #[instrument(skip(self, messages), fields(endpoint = %self.endpoint, turns = messages.len()))]
    async fn invoke(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: usize,
    ) -> Result<ModelReply> {
        let request = ChatRequest {
            model,
            messages,
            stream: false,
            max_tokens,
        };

        debug!("Sending completion request");

        let mut builder = self.http.post(&self.endpoint).json(&request);
        if let Some(token) = auth::get_auth_token(&self.api_key_env) {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DuetError::ModelInvocationFailed(self.describe_send_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            let mut error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());
            if error_text.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| error_text.is_char_boundary(*i))
                    .unwrap_or(0);
                error_text.truncate(cut);
            }
            warn!("Backend returned {}", status);
            return Err(DuetError::ModelInvocationFailed(format!(
                "backend error {}: {}",
                status, error_text
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DuetError::ModelInvocationFailed(self.describe_send_error(&e)))?;
        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            DuetError::ModelInvocationFailed(format!("failed to parse response: {}", e))
        })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                DuetError::ModelInvocationFailed("no message content in response".to_string())
            })?;

        info!("Completion from {} ({} chars)", model, text.len());

        Ok(ModelReply {
            model: model.to_string(),
            text,
            timestamp: Utc::now(),
            usage: parsed.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::system("sys"), ChatMessage::user("hello")]
    }

    #[tokio::test]
    async fn test_invoke_returns_first_choice() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["stream"], false);
                assert_eq!(body["max_tokens"], 128);
                Json(serde_json::json!({
                    "choices": [
                        {"message": {"role": "assistant", "content": format!("echo {}", body["model"].as_str().unwrap())}},
                        {"message": {"role": "assistant", "content": "second"}}
                    ],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 3}
                }))
            }),
        );
        let endpoint = serve(app).await;

        let client = ModelClient::new(endpoint, Duration::from_secs(5)).unwrap();
        let reply = client.invoke("test-model", &messages(), 128).await.unwrap();
        assert_eq!(reply.text, "echo test-model");
        assert_eq!(reply.model, "test-model");
        assert_eq!(reply.usage.unwrap().completion_tokens, 3);
    }

    #[tokio::test]
    async fn test_malformed_body_is_invocation_failure() {
        let app = Router::new().route("/v1/chat/completions", post(|| async { "not json" }));
        let endpoint = serve(app).await;

        let client = ModelClient::new(endpoint, Duration::from_secs(5)).unwrap();
        let err = client.invoke("m", &messages(), 16).await.unwrap_err();
        match err {
            DuetError::ModelInvocationFailed(msg) => assert!(msg.contains("parse")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_choices_is_invocation_failure() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(serde_json::json!({"choices": []})) }),
        );
        let endpoint = serve(app).await;

        let client = ModelClient::new(endpoint, Duration::from_secs(5)).unwrap();
        let err = client.invoke("m", &messages(), 16).await.unwrap_err();
        assert!(matches!(err, DuetError::ModelInvocationFailed(_)));
    }

    #[tokio::test]
    async fn test_error_status_is_invocation_failure() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let endpoint = serve(app).await;

        let client = ModelClient::new(endpoint, Duration::from_secs(5)).unwrap();
        let err = client.invoke("m", &messages(), 16).await.unwrap_err();
        match err {
            DuetError::ModelInvocationFailed(msg) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("overloaded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_invocation_failure() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let endpoint = serve(app).await;

        let client = ModelClient::new(endpoint, Duration::from_millis(200)).unwrap();
        let err = client.invoke("m", &messages(), 16).await.unwrap_err();
        match err {
            DuetError::ModelInvocationFailed(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_config() {
        let config = ModelConfig::default();
        let client = ModelClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint(), config.endpoint);
        assert_eq!(client.timeout, Duration::from_secs(120));
    }
}
