// src/chat/provider.rs
//! Chat completion providers: the upstream abstraction, the real OpenAI
//! token-streaming client, a disabled stand-in, and a scripted mock for
//! tests (`CHAT_TEST_MODE=mock`).

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_stream::stream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// No upstream configured (missing API key). Configuration errors are
    /// never retried.
    #[error("chat upstream is not configured")]
    NotConfigured,
    /// Upstream rejected our credentials; retrying cannot help.
    #[error("chat upstream rejected credentials")]
    Auth,
    /// Upstream's own rate limit; the caller must back off, we do not retry.
    #[error("chat upstream rate limit hit")]
    RateLimited,
    /// Network/transport/5xx trouble; retryable up to the bound.
    #[error("chat upstream error: {0}")]
    Upstream(String),
}

impl ChatError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Upstream(_))
    }

    /// Stable machine-readable code for error frames and envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::NotConfigured => "not_configured",
            ChatError::Auth => "upstream_auth",
            ChatError::RateLimited => "upstream_rate_limited",
            ChatError::Upstream(_) => "upstream_error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub history: Vec<ChatTurn>,
    pub message: String,
}

/// Incremental text tokens from the upstream. The stream ends after the
/// final token; a mid-stream `Err` is terminal.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    /// Open a streaming completion. Errors here cover the connection
    /// attempt; once a stream is returned, failures arrive in-band.
    async fn stream_completion(&self, req: &CompletionRequest) -> Result<TokenStream, ChatError>;
    fn name(&self) -> &'static str;
}

// ------------------------------------------------------------
// OpenAI
// ------------------------------------------------------------

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("slimy-codes-service/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_key,
            model: model.into(),
        }
    }

    fn messages(req: &CompletionRequest) -> Vec<ChatTurn> {
        let mut msgs = Vec::with_capacity(req.history.len() + 2);
        msgs.push(ChatTurn {
            role: "system".into(),
            content: req.system_prompt.clone(),
        });
        msgs.extend(req.history.iter().cloned());
        msgs.push(ChatTurn {
            role: "user".into(),
            content: req.message.clone(),
        });
        msgs
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn>,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait::async_trait]
impl ChatProvider for OpenAiProvider {
    async fn stream_completion(&self, req: &CompletionRequest) -> Result<TokenStream, ChatError> {
        if self.api_key.is_empty() {
            return Err(ChatError::NotConfigured);
        }

        let body = OpenAiRequest {
            model: &self.model,
            messages: Self::messages(req),
            temperature: 0.7,
            stream: true,
        };
        let resp = self
            .http
            .post(OPENAI_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Upstream(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ChatError::Auth);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ChatError::RateLimited);
        }
        if !status.is_success() {
            return Err(ChatError::Upstream(format!("status {status}")));
        }

        // Server-sent events: `data: {json}` lines, terminated by `[DONE]`.
        let mut bytes = resp.bytes_stream();
        let tokens = stream! {
            let mut buf: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(ChatError::Upstream(e.to_string()));
                        return;
                    }
                };
                buf.extend_from_slice(&chunk);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let Some(data) = line.trim().strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        return;
                    }
                    let Ok(parsed) = serde_json::from_str::<StreamChunk>(data) else {
                        continue;
                    };
                    if let Some(text) = parsed
                        .choices
                        .first()
                        .and_then(|c| c.delta.content.as_deref())
                    {
                        if !text.is_empty() {
                            yield Ok(text.to_string());
                        }
                    }
                }
            }
        };
        Ok(Box::pin(tokens))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Disabled / mock providers
// ------------------------------------------------------------

/// Always fails with `NotConfigured`; used when no API key is present.
pub struct UnconfiguredProvider;

#[async_trait::async_trait]
impl ChatProvider for UnconfiguredProvider {
    async fn stream_completion(&self, _req: &CompletionRequest) -> Result<TokenStream, ChatError> {
        Err(ChatError::NotConfigured)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// One scripted provider behavior per connection attempt.
pub enum MockOutcome {
    Chunks(Vec<String>),
    /// Stream some tokens, then fail in-band.
    ChunksThenFail(Vec<String>, ChatError),
    Fail(ChatError),
}

/// Scripted provider for tests and `CHAT_TEST_MODE=mock` local runs. Each
/// attempt pops the next outcome; an exhausted script echoes the request.
pub struct MockChatProvider {
    script: Mutex<VecDeque<MockOutcome>>,
    attempts: AtomicU32,
}

impl MockChatProvider {
    pub fn scripted(outcomes: Vec<MockOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn echo() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChatProvider for MockChatProvider {
    async fn stream_completion(&self, req: &CompletionRequest) -> Result<TokenStream, ChatError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .expect("mock script mutex poisoned")
            .pop_front();
        let items: Vec<Result<String, ChatError>> = match next {
            Some(MockOutcome::Fail(e)) => return Err(e),
            Some(MockOutcome::Chunks(chunks)) => chunks.into_iter().map(Ok).collect(),
            Some(MockOutcome::ChunksThenFail(chunks, e)) => chunks
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(e)))
                .collect(),
            None => vec![Ok(format!("(mock) you said: {}", req.message))],
        };
        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
