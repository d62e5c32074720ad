//! 🔁 The Resilient Request Executor.
//!
//! 🎬 *[a request leaves. a 503 returns. the executor sighs, waits two seconds, and tries again.]*
//!
//! One chunk in, one [`RequestOutcome`] out. Always. Whatever happens in between
//! (timeouts, resets, a gateway that answers in HTML) stays in here and comes
//! out as a `Failure` with a description, never as a panic or an `Err`.
//!
//! Retry policy: every [`TransportError`] is retried the same way, on purpose.
//! Inference servers under cold start fail in creative ways and none of them are
//! worth special-casing. The error kind is logged so humans can still tell.
//!
//! Local problems (too many items, unreadable bytes) never reach the network and
//! are never retried. Retrying a missing file is just reading `ENOENT` with extra steps.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::common::{Chunk, OutcomeStatus, RequestOutcome};
use crate::encoder::{EncodedItem, encode};
use crate::endpoints::{InferenceEndpoint, InferenceRequest};
use crate::error::{DispatchError, EncodingError, TransportError};

/// 🔧 How hard to try before giving up on a chunk.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// 🔢 Total attempts, first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// ⏱️ First backoff delay. Doubles from here.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// ⏱️ Backoff ceiling.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_min_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// 📈 Exponential, factor 2, no jitter, `max_attempts - 1` retries.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_factor(2.0)
            // -- zero attempts never gets this far, validate() turns it away first
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// 🔒 Zero attempts means never sending. A floor above the ceiling means the
    /// delays shrink as they go, which is not what "backoff" means.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.max_attempts == 0 {
            return Err(DispatchError::InvalidConfig("retry.max_attempts must be at least 1".to_string()));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(DispatchError::InvalidConfig(format!(
                "retry.min_delay_ms ({}) must not exceed retry.max_delay_ms ({})",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// 📨 The parts of a request that never change within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTemplate {
    pub model: String,
    pub instruction: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl RequestTemplate {
    pub fn build(&self, images: Vec<EncodedItem>) -> InferenceRequest {
        InferenceRequest::new(&self.model, images, &self.instruction, self.temperature, self.max_tokens)
    }
}

/// 🚫 Reasons a chunk is turned away before it ever reaches the wire.
#[derive(Debug, Error)]
pub enum ChunkRejected {
    #[error("capacity exceeded: chunk has {len} items but at most {capacity} fit in one request")]
    CapacityExceeded { len: usize, capacity: usize },
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// 🏋️ Sends chunks. Retries. Never throws.
#[derive(Debug)]
pub struct RequestExecutor<'a, E: InferenceEndpoint> {
    endpoint: &'a E,
    template: &'a RequestTemplate,
    capacity: NonZeroUsize,
    retry: &'a RetryConfig,
}

impl<'a, E: InferenceEndpoint> RequestExecutor<'a, E> {
    pub fn new(endpoint: &'a E, template: &'a RequestTemplate, capacity: NonZeroUsize, retry: &'a RetryConfig) -> Self {
        Self {
            endpoint,
            template,
            capacity,
            retry,
        }
    }

    /// 🚀 One chunk, one verdict.
    pub async fn execute(&self, chunk: &Chunk) -> RequestOutcome {
        let started = Instant::now();

        let request = match self.prepare(chunk).await {
            Ok(request) => request,
            Err(rejected) => {
                warn!(chunk = chunk.index(), error = %rejected, "🚫 chunk rejected locally, not sending");
                let status = OutcomeStatus::Failure { error: rejected.to_string() };
                return RequestOutcome::for_chunk(chunk, status, 0, started.elapsed());
            }
        };

        let attempts = AtomicU32::new(0);
        let result = self.send_with_backoff(&request, chunk.index(), &attempts).await;
        let attempts = attempts.into_inner();

        let status = match result {
            Ok(text) => OutcomeStatus::Success { text },
            Err(err) => OutcomeStatus::Failure {
                error: format!("gave up after {attempts} attempt(s): {err}"),
            },
        };
        RequestOutcome::for_chunk(chunk, status, attempts, started.elapsed())
    }

    async fn prepare(&self, chunk: &Chunk) -> Result<InferenceRequest, ChunkRejected> {
        // -- 🚪 the server's limit_mm_per_prompt is a wall, not a suggestion. Six images, one 400.
        if chunk.len() > self.capacity.get() {
            return Err(ChunkRejected::CapacityExceeded {
                len: chunk.len(),
                capacity: self.capacity.get(),
            });
        }
        let mut images = Vec::with_capacity(chunk.len());
        // -- 🐢 one at a time, in order. The image order IS the page order, and the model reads it that way.
        for item in chunk.items() {
            images.push(encode(item).await?);
        }
        Ok(self.template.build(images))
    }

    async fn send_with_backoff(
        &self,
        request: &InferenceRequest,
        chunk_index: usize,
        attempts: &AtomicU32,
    ) -> Result<String, TransportError> {
        // -- 📌 copied out of self so the closure captures a plain reference, not all of self
        let endpoint = self.endpoint;
        // -- 🔁 backon calls this once per attempt; the counter rides along by reference
        let attempt = || async move {
            let n = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(chunk = chunk_index, attempt = n, "📡 sending chunk");
            endpoint.complete(request).await
        };

        attempt
            .retry(self.retry.backoff())
            .sleep(tokio::time::sleep)
            .notify(|err: &TransportError, delay: Duration| {
                warn!(
                    chunk = chunk_index,
                    attempt = attempts.load(Ordering::Relaxed),
                    kind = err.kind(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "🔁 chunk request failed, retrying"
                );
            })
            .await
    }
}
