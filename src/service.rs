//! Completion Service
//!
//! Cached, retrying access to the completion API. Identical requests are
//! answered from the cache; overloaded responses are retried with
//! exponential backoff; everything else gives up with no answer.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cache::{ReadThroughCache, TimedCacheStore};
use crate::client::CompletionClient;
use crate::config::Config;
use crate::error::{CacheError, CallError, UpstreamError};
use crate::fingerprint::fingerprint;
use crate::models::ChatCompletionRequest;
use crate::notify::{notify_detached, Notifier};

// == Retry Policy ==
/// Bounded exponential backoff for overloaded upstream responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait after the first overloaded attempt; doubles each time
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Wait after a failed `attempt` (1-based): `base_delay * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

// == Completion Service ==
/// Fingerprints requests, serves them through the read-through cache and
/// retries the upstream call while it reports overload.
pub struct CompletionService<S, C> {
    cache: ReadThroughCache<S>,
    client: C,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    ttl: Duration,
}

impl<S, C> CompletionService<S, C>
where
    S: TimedCacheStore,
    C: CompletionClient,
{
    /// Creates a service caching completions for `ttl`.
    pub fn new(
        cache: ReadThroughCache<S>,
        client: C,
        notifier: Arc<dyn Notifier>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            client,
            notifier,
            retry: RetryPolicy::default(),
            ttl,
        }
    }

    /// Creates a service using the TTL chosen by the configured mode.
    pub fn from_config(
        config: &Config,
        store: Arc<S>,
        client: C,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::new(
            ReadThroughCache::new(store),
            client,
            notifier,
            config.completion_ttl(),
        )
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &ReadThroughCache<S> {
        &self.cache
    }

    /// Returns the completion text for `request`.
    ///
    /// `Ok(None)` means no answer is available: the upstream failed
    /// terminally or stayed overloaded through every attempt. Store failures
    /// are returned as errors.
    pub async fn chat(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<Option<String>, CacheError> {
        let max_attempts = self.retry.max_attempts;

        for attempt in 1..=max_attempts {
            // Each attempt re-enters the cache, so a value written by another
            // caller during the backoff is returned as a hit.
            let key = fingerprint(request)?;
            let outcome: Result<String, CallError> = self
                .cache
                .fetch(
                    &key,
                    move || async move {
                        self.call_upstream(request).await.map_err(CallError::from)
                    },
                    self.ttl,
                )
                .await;

            let err = match outcome {
                Ok(text) => {
                    debug!(key = %key, attempt, "Completion served");
                    return Ok(Some(text));
                }
                Err(CallError::Cache(err)) => return Err(err),
                Err(CallError::Upstream(err)) => err,
            };

            warn!(attempt, max_attempts, error = %err, "Completion attempt failed");

            if !err.is_overloaded() {
                error!(status = ?err.status(), model = %request.model, "Giving up on completion");
                self.report(format!(
                    "Completion for model {} failed without retry: {}",
                    request.model, err
                ));
                return Ok(None);
            }

            let delay = self.retry.delay_for(attempt);
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Upstream overloaded, backing off"
            );
            tokio::time::sleep(delay).await;
        }

        error!(
            max_attempts,
            model = %request.model,
            "Giving up on completion: upstream still overloaded"
        );
        self.report(format!(
            "Completion for model {} gave up after {} overloaded attempts",
            request.model, max_attempts
        ));
        Ok(None)
    }

    async fn call_upstream(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<String, UpstreamError> {
        let response = self.client.complete(request).await?;
        Ok(response.first_text())
    }

    fn report(&self, message: String) {
        notify_detached(&self.notifier, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Expiry, MemoryStore};
    use crate::error::NotifyError;
    use crate::models::{ChatCompletionResponse, ChatMessage};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    type Reply = Result<ChatCompletionResponse, UpstreamError>;

    /// Replays scripted replies and records when each call happened.
    struct ScriptedClient {
        replies: Mutex<VecDeque<Reply>>,
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Reply>) -> (Self, Arc<Mutex<Vec<Instant>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let client = Self {
                replies: Mutex::new(replies.into()),
                calls: Arc::clone(&calls),
            };
            (client, calls)
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn complete(&self, _request: &ChatCompletionRequest) -> Reply {
            self.calls.lock().unwrap().push(Instant::now());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(UpstreamError::Decode("script exhausted".to_string())))
        }
    }

    /// Another writer fills the cache while this caller sees an overload.
    struct RacingClient {
        store: Arc<MemoryStore>,
        key: String,
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl CompletionClient for RacingClient {
        async fn complete(&self, _request: &ChatCompletionRequest) -> Reply {
            self.calls.lock().unwrap().push(Instant::now());
            self.store
                .upsert(&self.key, Value::from("written elsewhere"), None)
                .await
                .unwrap();
            Err(overloaded())
        }
    }

    struct RecordingNotifier(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, message: &str) -> Result<(), NotifyError> {
            self.0.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl TimedCacheStore for FailingStore {
        async fn upsert(
            &self,
            _key: &str,
            _value: Value,
            _expires_at: Option<DateTime<Utc>>,
        ) -> crate::error::Result<crate::cache::CacheEntry> {
            Err(CacheError::Storage("write refused".to_string()))
        }

        async fn find_live(
            &self,
            _key: &str,
        ) -> crate::error::Result<Option<crate::cache::CacheEntry>> {
            Err(CacheError::Storage("connection lost".to_string()))
        }

        async fn purge_expired(&self) -> crate::error::Result<usize> {
            Ok(0)
        }
    }

    fn overloaded() -> UpstreamError {
        UpstreamError::Status {
            status: 503,
            body: "overloaded".to_string(),
        }
    }

    fn request() -> ChatCompletionRequest {
        ChatCompletionRequest::new("openai/gpt-4o-mini", vec![ChatMessage::user("Summarize this")])
            .with_option("temperature", 0.0)
    }

    fn service<C: CompletionClient>(
        store: Arc<MemoryStore>,
        client: C,
    ) -> (CompletionService<MemoryStore, C>, Arc<Mutex<Vec<String>>>) {
        let notes = Arc::new(Mutex::new(Vec::new()));
        let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier(Arc::clone(&notes)));
        let service = CompletionService::new(
            ReadThroughCache::new(store),
            client,
            notifier,
            Duration::from_secs(60 * 60 * 24),
        );
        (service, notes)
    }

    #[test]
    fn test_retry_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_overload_then_succeeds() {
        let store = Arc::new(MemoryStore::new());
        let (client, calls) = ScriptedClient::new(vec![
            Err(overloaded()),
            Err(overloaded()),
            Ok(ChatCompletionResponse::with_content("third time lucky")),
        ]);
        let (service, notes) = service(Arc::clone(&store), client);

        let result = service.chat(&request()).await.unwrap();

        assert_eq!(result.as_deref(), Some("third time lucky"));
        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1] - calls[0], Duration::from_millis(1000));
        assert_eq!(calls[2] - calls[1], Duration::from_millis(2000));
        assert_eq!(store.stats().await.writes, 1);
        assert!(notes.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_returns_none_without_retry() {
        let store = Arc::new(MemoryStore::new());
        let (client, calls) = ScriptedClient::new(vec![Err(UpstreamError::Status {
            status: 400,
            body: "bad request".to_string(),
        })]);
        let (service, notes) = service(Arc::clone(&store), client);
        let started = Instant::now();

        let result = service.chat(&request()).await.unwrap();

        assert!(result.is_none());
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(store.stats().await.writes, 0);

        // Let the detached notification run
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(notes.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let store = Arc::new(MemoryStore::new());
        let (client, calls) =
            ScriptedClient::new(vec![Err(overloaded()), Err(overloaded()), Err(overloaded())]);
        let (service, notes) = service(Arc::clone(&store), client);
        let started = Instant::now();

        let result = service.chat(&request()).await.unwrap();

        assert!(result.is_none());
        assert_eq!(calls.lock().unwrap().len(), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(1000 + 2000 + 4000));
        assert_eq!(store.stats().await.writes, 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let notes = notes.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("3 overloaded attempts"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_upstream() {
        let store = Arc::new(MemoryStore::new());
        let (client, calls) = ScriptedClient::new(vec![Ok(ChatCompletionResponse::with_content(
            "cached answer",
        ))]);
        let (service, _) = service(store, client);

        let first = service.chat(&request()).await.unwrap();
        let second = service.chat(&request()).await.unwrap();

        assert_eq!(first.as_deref(), Some("cached answer"));
        assert_eq!(second.as_deref(), Some("cached answer"));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_equivalent_requests_share_an_entry() {
        let store = Arc::new(MemoryStore::new());
        let (client, calls) =
            ScriptedClient::new(vec![Ok(ChatCompletionResponse::with_content("shared"))]);
        let (service, _) = service(Arc::clone(&store), client);

        let a = request().with_option("top_p", 1.0).with_option("seed", 7);
        let b = request().with_option("seed", 7).with_option("top_p", 1.0);

        service.chat(&a).await.unwrap();
        let second = service.chat(&b).await.unwrap();

        assert_eq!(second.as_deref(), Some("shared"));
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_content_caches_empty_text() {
        let store = Arc::new(MemoryStore::new());
        let (client, _) = ScriptedClient::new(vec![Ok(ChatCompletionResponse::default())]);
        let (service, _) = service(Arc::clone(&store), client);

        let result = service.chat(&request()).await.unwrap();

        assert_eq!(result.as_deref(), Some(""));
        assert_eq!(store.stats().await.writes, 1);
    }

    #[tokio::test]
    async fn test_entry_uses_service_ttl() {
        let store = Arc::new(MemoryStore::new());
        let (client, _) = ScriptedClient::new(vec![Ok(ChatCompletionResponse::with_content("x"))]);
        let (service, _) = service(Arc::clone(&store), client);

        service.chat(&request()).await.unwrap();

        let key = fingerprint(&request()).unwrap();
        let entry = store.find_live(&key).await.unwrap().unwrap();
        let remaining = entry.expires_at.unwrap() - Utc::now();
        assert!(remaining <= chrono::Duration::days(1));
        assert!(remaining > chrono::Duration::hours(23));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_observes_concurrent_write() {
        let store = Arc::new(MemoryStore::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let client = RacingClient {
            store: Arc::clone(&store),
            key: fingerprint(&request()).unwrap(),
            calls: Arc::clone(&calls),
        };
        let (service, _) = service(store, client);

        let result = service.chat(&request()).await.unwrap();

        assert_eq!(result.as_deref(), Some("written elsewhere"));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let (client, calls) =
            ScriptedClient::new(vec![Ok(ChatCompletionResponse::with_content("x"))]);
        let notifier: Arc<dyn Notifier> =
            Arc::new(RecordingNotifier(Arc::new(Mutex::new(Vec::new()))));
        let service = CompletionService::new(
            ReadThroughCache::new(Arc::new(FailingStore)),
            client,
            notifier,
            Duration::from_secs(60),
        );

        let result = service.chat(&request()).await;

        assert!(matches!(result, Err(CacheError::Storage(_))));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prepopulated_cache_is_served() {
        let store = Arc::new(MemoryStore::new());
        let (client, calls) = ScriptedClient::new(vec![]);
        let (service, _) = service(store, client);

        let key = fingerprint(&request()).unwrap();
        service
            .cache()
            .write(&key, "warmed", Expiry::Never)
            .await
            .unwrap();

        let result = service.chat(&request()).await.unwrap();
        assert_eq!(result.as_deref(), Some("warmed"));
        assert!(calls.lock().unwrap().is_empty());
    }
}
