// src/chat/mod.rs
//! Streaming chat completion proxy: provider abstraction, bounded retry,
//! NDJSON framing, and the in-memory history fallback.

pub mod history;
pub mod provider;
pub mod retry;
pub mod stream;

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};

use metrics::describe_counter;
use once_cell::sync::OnceCell;

use history::ChatHistory;
use provider::{ChatProvider, CompletionRequest};
use retry::RetryPolicy;
use stream::{ChatMessage, Frame};

/// Cap on history turns forwarded upstream, whichever side supplies them.
pub const MAX_HISTORY_TURNS: usize = 20;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("chat_retries_total", "Upstream chat connection retries.");
        describe_counter!(
            "chat_rate_limited_total",
            "Chat requests rejected by the per-caller rate limit."
        );
    });
}

/// System prompt for the requested personality mode. Unknown modes fall
/// back to the default voice rather than erroring.
pub fn system_prompt(mode: Option<&str>) -> &'static str {
    match mode.unwrap_or("default") {
        "hype" => {
            "You are Slimy, an over-the-top hype snail for the Slimy.ai Discord \
             community. Celebrate everything, keep answers short and energetic."
        }
        "helper" => {
            "You are Slimy, a patient helper snail for the Slimy.ai Discord \
             community. Give precise, step-by-step answers about the game and bot."
        }
        _ => {
            "You are Slimy, the friendly snail mascot of the Slimy.ai Discord \
             community. Be warm, concise, and a little playful."
        }
    }
}

/// Run one proxied exchange and emit the NDJSON frame sequence.
///
/// The returned stream is the whole response body: chunk frames while the
/// upstream produces tokens, then exactly one terminal frame. Dropping the
/// stream (client disconnect) drops the upstream stream with it, so no
/// upstream consumption outlives the response.
pub fn exchange_frames(
    provider: Arc<dyn ChatProvider>,
    policy: RetryPolicy,
    req: CompletionRequest,
    chat_history: Arc<ChatHistory>,
    caller: String,
) -> impl Stream<Item = Bytes> + Send {
    ensure_metrics_described();
    async_stream::stream! {
        let mut tokens = match retry::open_with_retry(provider.as_ref(), &req, &policy).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(error = %e, "chat exchange failed before streaming");
                yield Frame::Error {
                    code: e.code().to_string(),
                    error: e.to_string(),
                }
                .encode();
                return;
            }
        };

        let id = uuid::Uuid::new_v4().to_string();
        let mut assembled = String::new();
        while let Some(item) = tokens.next().await {
            match item {
                Ok(text) => {
                    assembled.push_str(&text);
                    yield Frame::Chunk {
                        content: text,
                        id: id.clone(),
                    }
                    .encode();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "chat upstream failed mid-stream");
                    yield Frame::Error {
                        code: e.code().to_string(),
                        error: e.to_string(),
                    }
                    .encode();
                    return;
                }
            }
        }

        chat_history.push(&caller, &req.message, &assembled);
        yield Frame::Complete {
            message: ChatMessage {
                id,
                role: "assistant".to_string(),
                content: assembled,
                timestamp: Utc::now(),
            },
        }
        .encode();
    }
}
