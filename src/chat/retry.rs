// src/chat/retry.rs
//! Bounded exponential backoff for opening the upstream chat stream.

use std::time::Duration;

use metrics::counter;

use super::provider::{ChatError, ChatProvider, CompletionRequest, TokenStream};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, doubling per attempt already made.
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Try to open the stream, retrying retryable failures up to the bound.
/// Auth and upstream-rate-limit failures fail fast on the first attempt.
pub async fn open_with_retry(
    provider: &dyn ChatProvider,
    req: &CompletionRequest,
    policy: &RetryPolicy,
) -> Result<TokenStream, ChatError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match provider.stream_completion(req).await {
            Ok(stream) => return Ok(stream),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                counter!("chat_retries_total").increment(1);
                tracing::warn!(
                    error = %e,
                    attempt,
                    provider = provider.name(),
                    "chat upstream failed; backing off"
                );
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
