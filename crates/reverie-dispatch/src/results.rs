//! Result store access and the fail-soft completion poller.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use reverie_core::defaults::{RESULT_FIELD, RESULT_KEY_PREFIX};
use reverie_core::{CompletionPayload, Error, Result};

/// Shared store the queue worker writes completion payloads into.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Fetch the completion payload for a handle, if the job has finished.
    /// Missing key or missing result field both mean "pending".
    async fn fetch(&self, queue: &str, handle: &str) -> Result<Option<CompletionPayload>>;
}

/// Redis-backed result store reading the queue's job hashes directly.
#[derive(Clone)]
pub struct RedisResultStore {
    connection: ConnectionManager,
}

impl RedisResultStore {
    /// Connect to the result store.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::ResultStore(format!("invalid redis URL: {}", e)))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::ResultStore(format!("failed to connect: {}", e)))?;
        Ok(Self { connection })
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn fetch(&self, queue: &str, handle: &str) -> Result<Option<CompletionPayload>> {
        let key = format!("{}:{}:{}", RESULT_KEY_PREFIX, queue, handle);

        let raw: Option<String> = self
            .connection
            .clone()
            .hget(&key, RESULT_FIELD)
            .await
            .map_err(|e| Error::ResultStore(format!("hget {}: {}", key, e)))?;

        Ok(raw.as_deref().and_then(CompletionPayload::from_field))
    }
}

/// One poll of a handle: `Some` only when a ready payload (one that yields
/// an artifact reference) is present.
///
/// Fails soft: store errors are swallowed and treated as pending — the loop
/// retries on the next interval.
pub async fn poll(store: &dyn ResultStore, queue: &str, handle: &str) -> Option<CompletionPayload> {
    match store.fetch(queue, handle).await {
        Ok(Some(payload)) if payload.artifact_url().is_some() => Some(payload),
        Ok(_) => None,
        Err(e) => {
            warn!(queue, handle, error = %e, "result store read failed, treating as pending");
            None
        }
    }
}
