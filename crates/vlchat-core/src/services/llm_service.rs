use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Deserialize;
use tracing::{debug, warn};

use super::sse::SseDecoder;
use super::transcript_builder::ChatMessage;
use crate::settings::AppConfig;

/// One incremental piece of a streamed completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionChunk {
    pub reasoning_delta: Option<String>,
    pub answer_delta: Option<String>,
}

impl CompletionChunk {
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning_delta: Some(text.into()),
            answer_delta: None,
        }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            reasoning_delta: None,
            answer_delta: Some(text.into()),
        }
    }
}

/// Type alias for chunk streams. Dropping the stream abandons the request.
pub type ChunkStream = BoxStream<'static, Result<CompletionChunk>>;

/// Streaming chat-completion collaborator.
///
/// Timeouts and retries are the implementation's business; callers only
/// iterate (or drop) the returned stream.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn stream_chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChunkStream>;
}

#[derive(Deserialize)]
struct StreamPayload {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<StreamErrorBody>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    /// OpenRouter's name for the reasoning trace
    reasoning: Option<String>,
}

#[derive(Deserialize)]
struct StreamErrorBody {
    message: String,
}

impl StreamPayload {
    fn into_chunk(self) -> Result<CompletionChunk> {
        if let Some(error) = self.error {
            return Err(anyhow!("provider error: {}", error.message));
        }
        let Some(choice) = self.choices.into_iter().next() else {
            return Ok(CompletionChunk::default());
        };
        let delta = choice.delta;
        Ok(CompletionChunk {
            reasoning_delta: delta.reasoning_content.or(delta.reasoning),
            answer_delta: delta.content,
        })
    }
}

/// Outcome of probing the completion endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityCheck {
    pub endpoint: String,
    pub outcome: Result<u16, String>,
}

impl ConnectivityCheck {
    pub fn is_healthy(&self) -> bool {
        matches!(self.outcome, Ok(status) if (200..300).contains(&status))
    }
}

/// Client for OpenAI-compatible `/chat/completions` endpoints (OpenRouter, vLLM, DashScope).
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    referer: String,
    title: String,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &AppConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            referer: config.referer.clone(),
            title: config.app_title.clone(),
        })
    }

    /// Build a client when an API key is configured.
    ///
    /// A missing key or a client that fails to build leaves the session
    /// unconfigured rather than failing startup.
    pub fn from_config(config: &AppConfig) -> Option<Arc<dyn CompletionClient>> {
        let Some(key) = config.api_key.clone() else {
            warn!("API_KEY not set; completions will report a configuration error");
            return None;
        };
        match Self::new(config, key) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!(error = ?e, "Failed to initialize completion client");
                None
            }
        }
    }

    /// Probe `{base_url}/models`.
    pub async fn check_connectivity(&self) -> ConnectivityCheck {
        let endpoint = format!("{}/models", self.base_url);
        let outcome = match self.http.get(&endpoint).bearer_auth(&self.api_key).send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) => Err(e.to_string()),
        };
        ConnectivityCheck { endpoint, outcome }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatibleClient {
    async fn stream_chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<ChunkStream> {
        let body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
        });

        debug!(model = %model, message_count = messages.len(), "Opening completion stream");
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(&body)
            .send()
            .await
            .context("Completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("completion endpoint returned {status}: {text}"));
        }

        let mut bytes = response.bytes_stream();
        Ok(Box::pin(async_stream::stream! {
            let mut decoder = SseDecoder::new();
            while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(anyhow!("stream read failed: {e}"));
                        return;
                    }
                };
                let frames = match decoder.push(&chunk) {
                    Ok(frames) => frames,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                for frame in frames {
                    if frame.is_done() {
                        return;
                    }
                    match frame.parse::<StreamPayload>().and_then(StreamPayload::into_chunk) {
                        Ok(chunk) => yield Ok(chunk),
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            let tail = match decoder.finish() {
                Ok(frames) => frames,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            for frame in tail {
                if frame.is_done() {
                    return;
                }
                match frame.parse::<StreamPayload>().and_then(StreamPayload::into_chunk) {
                    Ok(chunk) => yield Ok(chunk),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }))
    }
}
