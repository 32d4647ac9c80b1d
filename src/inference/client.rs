//! OpenAI-compatible chat model client.
//!
//! Sends chat completion requests to the configured endpoint, retries
//! transient failures with exponential backoff, and streams tokens back.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::Client as HttpClient;
use uuid::Uuid;

use crate::runnable::{ChainError, ChainStream, PromptValue, Runnable};

use super::config::ModelSettings;
use super::errors::InferenceError;
use super::streaming::{parse_completion_response, parse_sse_stream};
use super::types::{ChatCompletionRequest, ChatMessage, ChatResponse, StreamChunk};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Endpoint used when no base URL is configured at all.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total request timeout for streaming calls.
///
/// Long generations keep the connection open well past the non-streaming
/// timeout, so streaming gets its own generous budget.
const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// ─── ChatModel ───────────────────────────────────────────────────────────────

/// Client for one chat-completion endpoint.
///
/// Construction never touches the network; a bad endpoint or credential
/// surfaces on the first request.
#[derive(Debug, Clone)]
pub struct ChatModel {
    /// HTTP client for non-streaming requests.
    http: HttpClient,
    /// HTTP client for streaming requests (longer timeout).
    http_stream: HttpClient,
    settings: ModelSettings,
}

impl ChatModel {
    pub fn new(settings: ModelSettings) -> Result<Self, InferenceError> {
        let endpoint = display_base_url(&settings);

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: endpoint.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let http_stream = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(STREAM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint,
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            http_stream,
            settings,
        })
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// The model identifier sent with each request, if any.
    pub fn model_name(&self) -> Option<&str> {
        self.settings.model.as_deref()
    }

    /// Resolve the `chat/completions` URL for the configured base URL.
    ///
    /// An unset base URL means the OpenAI default. A blank or non-HTTP one
    /// is rejected without a network round-trip.
    pub fn completions_url(&self) -> Result<String, InferenceError> {
        Ok(format!("{}/chat/completions", self.base_url()?))
    }

    fn base_url(&self) -> Result<&str, InferenceError> {
        let base = self
            .settings
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim();

        if base.is_empty() {
            return Err(InferenceError::InvalidEndpoint {
                base_url: base.to_string(),
                reason: "base URL is blank".into(),
            });
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(InferenceError::InvalidEndpoint {
                base_url: base.to_string(),
                reason: "base URL must start with http:// or https://".into(),
            });
        }
        Ok(base.trim_end_matches('/'))
    }

    fn build_request(&self, messages: Vec<ChatMessage>, stream: bool) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            stream,
        }
    }

    // ─── Chat Completion (non-streaming) ─────────────────────────────────

    /// Send a non-streaming chat completion, retrying transient failures.
    pub async fn generate(&self, messages: Vec<ChatMessage>) -> Result<ChatResponse, InferenceError> {
        let url = self.completions_url()?;
        let body = self.build_request(messages, false);
        let run_id = Uuid::new_v4();

        tracing::info!(
            %run_id,
            url = %url,
            model = body.model.as_deref().unwrap_or("<unset>"),
            message_count = body.messages.len(),
            max_retries = self.settings.max_retries,
            "chat completion request"
        );

        let started = Instant::now();
        let response = self
            .with_retries(run_id, || async {
                let response = self
                    .authorized(self.http.post(&url))
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| self.map_send_error(&url, e))?;
                let response = check_status(response).await?;
                let text = response.text().await.map_err(|e| InferenceError::StreamError {
                    reason: format!("failed to read response body: {e}"),
                })?;
                parse_completion_response(&text)
            })
            .await?;

        tracing::info!(
            %run_id,
            latency_ms = started.elapsed().as_millis() as u64,
            finish_reason = response.finish_reason.as_deref().unwrap_or("-"),
            completion_tokens = response.usage.map(|u| u.completion_tokens).unwrap_or(0),
            "chat completion finished"
        );
        Ok(response)
    }

    // ─── Chat Completion (streaming) ─────────────────────────────────────

    /// Send a streaming chat completion.
    ///
    /// Only the initial request is retried; once bytes flow, a failure ends
    /// the stream with an error item.
    pub async fn stream_tokens(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<impl Stream<Item = Result<StreamChunk, InferenceError>>, InferenceError> {
        let url = self.completions_url()?;
        let body = self.build_request(messages, true);
        let run_id = Uuid::new_v4();

        tracing::info!(
            %run_id,
            url = %url,
            model = body.model.as_deref().unwrap_or("<unset>"),
            message_count = body.messages.len(),
            "streaming chat completion request"
        );

        let response = self
            .with_retries(run_id, || async {
                let response = self
                    .authorized(self.http_stream.post(&url))
                    .json(&body)
                    .header("Accept", "text/event-stream")
                    .send()
                    .await
                    .map_err(|e| self.map_send_error(&url, e))?;
                check_status(response).await
            })
            .await?;

        Ok(parse_sse_stream(response))
    }

    // ─── Health Check ────────────────────────────────────────────────────

    /// Check if the endpoint is reachable. Does not consume tokens.
    pub async fn health_check(&self) -> bool {
        let Ok(base) = self.base_url() else {
            return false;
        };
        let url = format!("{base}/models");

        match self
            .authorized(self.http.get(&url))
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    // ─── Retry ───────────────────────────────────────────────────────────

    /// Run `attempt` up to `1 + max_retries` times while errors are retriable.
    async fn with_retries<T, F, Fut>(&self, run_id: Uuid, attempt: F) -> Result<T, InferenceError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, InferenceError>>,
    {
        let max_retries = self.settings.max_retries;
        let mut tries = 0u32;

        loop {
            tries += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && tries <= max_retries => {
                    let delay = backoff_delay(self.settings.retry_backoff, tries);
                    tracing::warn!(
                        %run_id,
                        attempt = tries,
                        max_attempts = max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retriable inference error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if tries > 1 => {
                    tracing::warn!(%run_id, attempts = tries, error = %e, "retries exhausted");
                    return Err(InferenceError::RetriesExhausted {
                        attempts: tries,
                        source: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.settings.api_key.as_deref() {
            Some(key) if !key.is_empty() => builder.bearer_auth(key),
            _ => builder,
        }
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: self.settings.request_timeout.as_secs(),
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

// ─── Runnable ────────────────────────────────────────────────────────────────

#[async_trait]
impl Runnable for ChatModel {
    type Input = PromptValue;
    type Output = ChatMessage;

    async fn invoke(&self, input: PromptValue) -> Result<ChatMessage, ChainError> {
        let response = self.generate(input.into_messages()).await?;
        Ok(response.message)
    }

    /// One assistant message chunk per streamed token.
    fn stream<'a>(&'a self, input: PromptValue) -> ChainStream<'a, ChatMessage> {
        stream::once(self.stream_tokens(input.into_messages()))
            .map_ok(|tokens| tokens.map_err(ChainError::from))
            .map_err(ChainError::from)
            .try_flatten()
            .try_filter_map(|chunk| {
                future::ready(Ok::<_, ChainError>(chunk.token.map(ChatMessage::assistant)))
            })
            .boxed()
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(InferenceError::HttpError {
        status: status.as_u16(),
        body,
    })
}

/// `base * 2^(attempt-1)`, capped at [`MAX_BACKOFF`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

fn display_base_url(settings: &ModelSettings) -> String {
    settings
        .base_url
        .clone()
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
