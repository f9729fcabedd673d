#![deny(missing_docs)]
//! Embedding provider abstraction with an optional token-bucket rate
//! limiter and an optional TTL cache (spec §4.3).
//!
//! [`EmbeddingService`] wraps an [`EmbeddingProvider`] and is the only
//! thing `fluxbase-ingest`'s output passes through before becoming
//! `Chunk.embedding` rows. Rate-limit and cache failures never reach the
//! provider — they're surfaced as their own error variants before a
//! request is even attempted.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from [`EmbeddingService`] operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// `embed` was called with an empty `texts` list.
    #[error("embed requires at least one input text")]
    EmptyInput,

    /// The token-bucket rate limiter had no capacity left.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The underlying provider failed.
    #[error("provider error: {0}")]
    Provider(String),
}

impl EmbeddingError {
    /// Whether retrying this call might succeed. Mirrors the workspace's
    /// provider error taxonomy: only the rate-limit and provider-surfaced
    /// failures are ever worth a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbeddingError::RateLimited | EmbeddingError::Provider(_))
    }
}

/// Token usage reported alongside an embedding response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbeddingUsage {
    /// Tokens charged for the input texts.
    pub prompt_tokens: usize,
    /// Total tokens charged (equals `prompt_tokens` for embeddings).
    pub total_tokens: usize,
}

/// A batch embedding response.
#[derive(Debug, Clone)]
pub struct EmbedResponse {
    /// One vector per input text, same order as the request.
    pub vectors: Vec<Vec<f32>>,
    /// Dimensionality of each vector.
    pub dimensions: usize,
    /// Usage accounting, summed across cache misses only.
    pub usage: EmbeddingUsage,
    /// The model that actually produced these vectors.
    pub model: String,
}

/// What an [`EmbeddingProvider`] returns for a batch of inputs it actually
/// computed (i.e. before any cache splicing).
#[derive(Debug, Clone)]
pub struct ProviderEmbedResponse {
    /// One vector per input text, in request order.
    pub vectors: Vec<Vec<f32>>,
    /// Dimensionality of each vector.
    pub dimensions: usize,
    /// Usage for this call only.
    pub usage: EmbeddingUsage,
    /// The model that produced these vectors (resolved provider default if
    /// the request didn't pin one).
    pub model: String,
}

/// An embedding backend (OpenAI, a local model server, ...).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts` under `model`, or the provider's own default if `None`.
    async fn embed(
        &self,
        texts: &[String],
        model: Option<&str>,
    ) -> Result<ProviderEmbedResponse, EmbeddingError>;
}

/// A token-bucket rate limiter: `capacity` tokens refill every `window`.
struct TokenBucket {
    capacity: usize,
    window: Duration,
    remaining: usize,
    last_reset: Instant,
}

impl TokenBucket {
    fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            remaining: capacity,
            last_reset: Instant::now(),
        }
    }

    /// Atomically resets if the window has elapsed, then tries to spend
    /// `cost` tokens. Returns whether the spend succeeded.
    fn allow(&mut self, cost: usize) -> bool {
        if self.last_reset.elapsed() >= self.window {
            self.remaining = self.capacity;
            self.last_reset = Instant::now();
        }
        if cost > self.remaining {
            return false;
        }
        self.remaining -= cost;
        true
    }
}

struct CacheEntry {
    vector: Vec<f32>,
    expires_at: Instant,
}

/// TTL cache keyed by `hash(model ‖ text)`.
struct EmbeddingCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl EmbeddingCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(model: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(b"\0");
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn get(&self, model: &str, text: &str) -> Option<Vec<f32>> {
        let key = Self::key(model, text);
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(&key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.vector.clone())
    }

    fn put(&self, model: &str, text: &str, vector: Vec<f32>) {
        let key = Self::key(model, text);
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            CacheEntry {
                vector,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

/// Default cache TTL when caching is enabled without an explicit value.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Bound on provider-call attempts for transient failures (spec §5:
/// "retried with exponential backoff up to a small bound (e.g. 3 attempts)").
const MAX_PROVIDER_ATTEMPTS: u32 = 3;

/// Base delay for the exponential backoff between retries, doubling each
/// attempt (100ms, 200ms, ...).
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Builds an [`EmbeddingService`].
pub struct EmbeddingServiceBuilder<P: EmbeddingProvider> {
    provider: P,
    default_model: Option<String>,
    rate_limit: Option<(usize, Duration)>,
    cache_ttl: Option<Duration>,
}

impl<P: EmbeddingProvider> EmbeddingServiceBuilder<P> {
    /// Start building around `provider`.
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            default_model: None,
            rate_limit: None,
            cache_ttl: None,
        }
    }

    /// Set the service-level default model, used when a request doesn't
    /// pin one.
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Enable a token-bucket rate limiter of `capacity` tokens per `window`.
    pub fn rate_limit(mut self, capacity: usize, window: Duration) -> Self {
        self.rate_limit = Some((capacity, window));
        self
    }

    /// Enable caching with an explicit TTL ([`DEFAULT_CACHE_TTL`] if omitted).
    pub fn cache(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = Some(ttl.unwrap_or(DEFAULT_CACHE_TTL));
        self
    }

    /// Build the service.
    pub fn build(self) -> EmbeddingService<P> {
        EmbeddingService {
            provider: self.provider,
            default_model: self.default_model,
            rate_limiter: self.rate_limit.map(|(cap, win)| Mutex::new(TokenBucket::new(cap, win))),
            cache: self.cache_ttl.map(EmbeddingCache::new),
        }
    }
}

/// Embeds text through a provider, with optional rate limiting and caching.
pub struct EmbeddingService<P: EmbeddingProvider> {
    provider: P,
    default_model: Option<String>,
    rate_limiter: Option<Mutex<TokenBucket>>,
    cache: Option<EmbeddingCache>,
}

fn estimate_cost(texts: &[String]) -> usize {
    texts.iter().map(|t| t.chars().count().div_ceil(4)).sum()
}

/// Calls `provider.embed` with bounded exponential backoff: transient
/// (`is_retryable`) failures are retried up to [`MAX_PROVIDER_ATTEMPTS`]
/// times total, waiting `RETRY_BASE_DELAY * 2^n` between attempts. Any
/// other failure, or exhausting the attempt budget, is surfaced
/// immediately — validation/quota-shaped errors are never retried because
/// nothing upstream of this call can produce one of those.
async fn embed_with_retry<P: EmbeddingProvider>(
    provider: &P,
    texts: &[String],
    model: Option<&str>,
) -> Result<ProviderEmbedResponse, EmbeddingError> {
    let mut attempt = 0u32;
    loop {
        match provider.embed(texts, model).await {
            Ok(response) => return Ok(response),
            Err(e) if e.is_retryable() && attempt + 1 < MAX_PROVIDER_ATTEMPTS => {
                tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(EmbeddingError::Provider(e.to_string())),
        }
    }
}

impl<P: EmbeddingProvider> EmbeddingService<P> {
    /// Embed a batch of texts. `model` overrides the service default for
    /// this call only; if both are absent the provider's own default is
    /// used (and reported back in the response).
    pub async fn embed(&self, texts: &[String], model: Option<&str>) -> Result<EmbedResponse, EmbeddingError> {
        if texts.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        if let Some(limiter) = &self.rate_limiter {
            let cost = estimate_cost(texts);
            if !limiter.lock().unwrap().allow(cost) {
                return Err(EmbeddingError::RateLimited);
            }
        }

        let resolved_model = model.map(str::to_string).or_else(|| self.default_model.clone());

        let Some(cache) = &self.cache else {
            let response = embed_with_retry(&self.provider, texts, resolved_model.as_deref()).await?;
            return Ok(EmbedResponse {
                vectors: response.vectors,
                dimensions: response.dimensions,
                usage: response.usage,
                model: response.model,
            });
        };

        // Cache keys need a concrete model name; fall back to a sentinel
        // when neither the request nor the service pins one, since the
        // provider's own default may vary between calls.
        let cache_model = resolved_model.as_deref().unwrap_or("__provider_default__");

        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut miss_indices = Vec::new();
        let mut miss_texts = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            match cache.get(cache_model, text) {
                Some(vector) => vectors.push(Some(vector)),
                None => {
                    vectors.push(None);
                    miss_indices.push(i);
                    miss_texts.push(text.clone());
                }
            }
        }

        let mut dimensions = 0;
        let mut usage = EmbeddingUsage::default();
        let mut model_name = resolved_model.clone().unwrap_or_default();

        if !miss_texts.is_empty() {
            let response = embed_with_retry(&self.provider, &miss_texts, resolved_model.as_deref()).await?;
            dimensions = response.dimensions;
            usage = response.usage;
            model_name = response.model.clone();

            for (slot, vector) in miss_indices.iter().zip(response.vectors.into_iter()) {
                cache.put(cache_model, &texts[*slot], vector.clone());
                vectors[*slot] = Some(vector);
            }
        }

        if dimensions == 0 {
            dimensions = vectors
                .iter()
                .flatten()
                .next()
                .map(|v| v.len())
                .unwrap_or_default();
        }

        let vectors = vectors
            .into_iter()
            .map(|v| v.expect("every index is filled from cache hit or provider miss"))
            .collect();

        Ok(EmbedResponse {
            vectors,
            dimensions,
            usage,
            model: model_name,
        })
    }

    /// Embed a single text, returning just its vector.
    pub async fn embed_single(&self, text: &str, model: Option<&str>) -> Result<Vec<f32>, EmbeddingError> {
        let response = self.embed(&[text.to_string()], model).await?;
        Ok(response.vectors.into_iter().next().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingProvider {
        calls: Arc<AtomicUsize>,
        dim: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(
            &self,
            texts: &[String],
            model: Option<&str>,
        ) -> Result<ProviderEmbedResponse, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderEmbedResponse {
                vectors: texts.iter().map(|t| vec![t.len() as f32; self.dim]).collect(),
                dimensions: self.dim,
                usage: EmbeddingUsage {
                    prompt_tokens: texts.len(),
                    total_tokens: texts.len(),
                },
                model: model.unwrap_or("provider-default").to_string(),
            })
        }
    }

    #[tokio::test]
    async fn empty_input_fails_fast() {
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = EmbeddingServiceBuilder::new(CountingProvider { calls: calls.clone(), dim: 3 }).build();
        let err = svc.embed(&[], None).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::EmptyInput));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rate_limit_blocks_before_reaching_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = EmbeddingServiceBuilder::new(CountingProvider { calls: calls.clone(), dim: 3 })
            .rate_limit(1, Duration::from_secs(60))
            .build();

        // First call costs more than the bucket's single token.
        let err = svc.embed(&["a long string of text".to_string()], None).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_splices_hits_and_misses_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = EmbeddingServiceBuilder::new(CountingProvider { calls: calls.clone(), dim: 2 })
            .cache(None)
            .build();

        let texts = vec!["alpha".to_string(), "bravo".to_string()];
        let first = svc.embed(&texts, Some("m1")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let texts2 = vec!["alpha".to_string(), "charlie".to_string()];
        let second = svc.embed(&texts2, Some("m1")).await.unwrap();
        // "alpha" was cached, only "charlie" should reach the provider.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.vectors[0], first.vectors[0]);
    }

    #[tokio::test]
    async fn embed_single_returns_one_vector() {
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = EmbeddingServiceBuilder::new(CountingProvider { calls, dim: 4 }).build();
        let vector = svc.embed_single("hello", None).await.unwrap();
        assert_eq!(vector.len(), 4);
    }

    #[test]
    fn provider_errors_are_retryable_rate_limit_errors_are_too() {
        assert!(EmbeddingError::RateLimited.is_retryable());
        assert!(EmbeddingError::Provider("timeout".into()).is_retryable());
        assert!(!EmbeddingError::EmptyInput.is_retryable());
    }

    struct FlakyProvider {
        calls: Arc<AtomicUsize>,
        fail_until: usize,
        dim: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed(
            &self,
            texts: &[String],
            model: Option<&str>,
        ) -> Result<ProviderEmbedResponse, EmbeddingError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_until {
                return Err(EmbeddingError::Provider("transient timeout".into()));
            }
            Ok(ProviderEmbedResponse {
                vectors: texts.iter().map(|t| vec![t.len() as f32; self.dim]).collect(),
                dimensions: self.dim,
                usage: EmbeddingUsage {
                    prompt_tokens: texts.len(),
                    total_tokens: texts.len(),
                },
                model: model.unwrap_or("provider-default").to_string(),
            })
        }
    }

    #[tokio::test]
    async fn transient_provider_failure_is_retried_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = EmbeddingServiceBuilder::new(FlakyProvider { calls: calls.clone(), fail_until: 2, dim: 3 }).build();

        let result = svc.embed(&["retry me".to_string()], None).await.unwrap();
        assert_eq!(result.dimensions, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded_and_surface_the_final_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = EmbeddingServiceBuilder::new(FlakyProvider { calls: calls.clone(), fail_until: 10, dim: 3 }).build();

        let err = svc.embed(&["never recovers".to_string()], None).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Provider(_)));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_PROVIDER_ATTEMPTS as usize);
    }
}
