use crate::common::{TransferConfig, TransferError};
use std::future::Future;
use std::time::Duration;

/// Identity of the chunk an operation belongs to, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkId {
    pub file_index: u32,
    pub chunk_index: u32,
}

impl ChunkId {
    pub fn new(file_index: u32, chunk_index: u32) -> Self {
        Self {
            file_index,
            chunk_index,
        }
    }
}

/// Bounded retries with exponential backoff for transient failures only
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound for a single attempt, an elapsed attempt counts as transient
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base_delay(),
            attempt_timeout: config.request_timeout(),
        }
    }

    /// Sleep after failed attempt `attempt` (0-indexed): `base_delay * 2^attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(31)))
    }

    pub async fn attempt<O, F, Fut>(&self, chunk: ChunkId, mut op: F) -> Result<O, TransferError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<O, TransferError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let result = match self.attempt_timeout {
                Some(limit) => with_timeout(limit, op()).await,
                None => op().await,
            };

            let err = match result {
                Ok(output) => return Ok(output),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= max_attempts {
                tracing::error!(
                    file_index = chunk.file_index,
                    chunk_index = chunk.chunk_index,
                    attempts = attempt,
                    error = %err,
                    "chunk retries exhausted"
                );
                return Err(TransferError::RetriesExhausted {
                    file_index: chunk.file_index,
                    chunk_index: chunk.chunk_index,
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt - 1);
            tracing::warn!(
                file_index = chunk.file_index,
                chunk_index = chunk.chunk_index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient chunk failure, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, TransferError>>,
{
    tokio::time::timeout(duration, future).await?
}
