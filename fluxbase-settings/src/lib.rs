#![deny(missing_docs)]
//! `{{ [prefix:] key }}` template substitution with a cached, pluggable
//! settings backend (spec §4.7).
//!
//! [`SettingsResolver`] extracts and replaces every `{{user:key}}` /
//! `{{system:key}}` / `{{key}}` occurrence in a text. Lookups go through a
//! [`SettingsBackend`] — one implementation ([`InMemoryBackend`]) serves
//! plain per-scope key-value pairs, another ([`SecretBackedBackend`])
//! composes `fluxbase-secrets::NamespaceSecrets` so a template key can
//! transparently resolve to a decrypted secret, held in cleartext only for
//! the cache TTL (via `zeroize`), mirroring `neuron-secret`'s `SecretValue`
//! discipline.

use async_trait::async_trait;
use fluxbase_secrets::{NamespaceSecrets, SecretsError};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::{LazyLock, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use zeroize::Zeroizing;

/// Reserved template keys that `extract_setting_keys` never reports, since
/// they're populated by the caller rather than looked up in a backend.
const RESERVED_KEYS: &[&str] = &["user_id"];

/// Default cache TTL for resolved values. Not pinned by spec §4.7; chosen
/// short enough that a rotated secret or changed setting is picked up
/// promptly without defeating the point of caching.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

static TEMPLATE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(?:(user|system):)?\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").expect("valid regex")
});

/// Errors from settings resolution.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The underlying `SettingsBackend` failed to produce a value.
    #[error("backend error: {0}")]
    Backend(String),

    /// A secret-backed lookup failed.
    #[error("secrets error: {0}")]
    Secrets(#[from] SecretsError),
}

/// Which scope a template key resolves against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Process-global settings.
    System,
    /// Per-caller settings, identified by caller id.
    User(String),
}

impl Scope {
    /// The cache-tier key this scope maps to (`"system"` or `"user-<id>"`).
    fn cache_key(&self) -> String {
        match self {
            Scope::System => "system".to_string(),
            Scope::User(id) => format!("user-{id}"),
        }
    }
}

/// A pluggable settings source. Implementations decide what a `(scope,
/// key)` pair actually means — a plain KV table, a secrets store, an
/// external config service.
#[async_trait]
pub trait SettingsBackend: Send + Sync {
    /// Resolve one key within a scope. `Ok(None)` means "no value", not an
    /// error — callers decide whether that's fatal.
    async fn get(&self, scope: &Scope, key: &str) -> Result<Option<Zeroizing<String>>, SettingsError>;
}

/// A plain in-memory per-scope key-value backend, for settings that carry
/// no secrecy requirement.
#[derive(Default)]
pub struct InMemoryBackend {
    values: Mutex<HashMap<(String, String), String>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value for `(scope, key)`, overwriting any existing one.
    pub fn set(&self, scope: Scope, key: impl Into<String>, value: impl Into<String>) {
        let mut values = self.values.lock().expect("lock poisoned");
        values.insert((scope.cache_key(), key.into()), value.into());
    }
}

#[async_trait]
impl SettingsBackend for InMemoryBackend {
    async fn get(&self, scope: &Scope, key: &str) -> Result<Option<Zeroizing<String>>, SettingsError> {
        let values = self.values.lock().expect("lock poisoned");
        Ok(values
            .get(&(scope.cache_key(), key.to_string()))
            .cloned()
            .map(Zeroizing::new))
    }
}

/// A settings backend whose values are secrets: `Scope::User(id)` resolves
/// as the secrets namespace `id`, `Scope::System` resolves as the global
/// scope only. Delegates through [`NamespaceSecrets::resolve`], which
/// already overlays namespace secrets over global ones on name collision.
pub struct SecretBackedBackend<S: NamespaceSecrets> {
    secrets: S,
}

impl<S: NamespaceSecrets> SecretBackedBackend<S> {
    /// Wrap a secrets resolver.
    pub fn new(secrets: S) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl<S: NamespaceSecrets> SettingsBackend for SecretBackedBackend<S> {
    async fn get(&self, scope: &Scope, key: &str) -> Result<Option<Zeroizing<String>>, SettingsError> {
        let namespace = match scope {
            Scope::System => fluxbase_secrets::GLOBAL_NAMESPACE,
            Scope::User(id) => id.as_str(),
        };
        match self.secrets.resolve(namespace, key).await {
            Ok(value) => Ok(Some(value)),
            Err(SecretsError::NotFound(_)) => Ok(None),
            Err(other) => Err(other.into()),
        }
    }
}

struct CacheEntry {
    value: Zeroizing<String>,
    expires_at: Instant,
}

/// Two-tier cache: outer map keyed by [`Scope::cache_key`], inner map keyed
/// by template key.
#[derive(Default)]
struct Cache {
    tiers: Mutex<HashMap<String, HashMap<String, CacheEntry>>>,
}

impl Cache {
    fn get(&self, scope: &Scope, key: &str) -> Option<Zeroizing<String>> {
        let tiers = self.tiers.lock().expect("lock poisoned");
        let entry = tiers.get(&scope.cache_key())?.get(key)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    fn put(&self, scope: &Scope, key: &str, value: Zeroizing<String>, ttl: Duration) {
        let mut tiers = self.tiers.lock().expect("lock poisoned");
        tiers.entry(scope.cache_key()).or_default().insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Clear every tier. Rebuilt lazily on the next miss.
    fn invalidate(&self) {
        self.tiers.lock().expect("lock poisoned").clear();
    }
}

/// Extracts and resolves `{{ [prefix:] key }}` template keys, caching
/// resolved values per (scope, key) with a TTL.
pub struct SettingsResolver<B: SettingsBackend> {
    backend: B,
    cache: Cache,
    ttl: Duration,
}

impl<B: SettingsBackend> SettingsResolver<B> {
    /// Build a resolver over `backend`, caching resolved values for
    /// [`DEFAULT_CACHE_TTL`].
    pub fn new(backend: B) -> Self {
        Self::with_ttl(backend, DEFAULT_CACHE_TTL)
    }

    /// Build a resolver with an explicit cache TTL.
    pub fn with_ttl(backend: B, ttl: Duration) -> Self {
        Self {
            backend,
            cache: Cache::default(),
            ttl,
        }
    }

    /// The de-duplicated, reserved-excluded, prefix-stripped list of
    /// template keys present in `text`, in first-occurrence order.
    pub fn extract_setting_keys(text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for caps in TEMPLATE_KEY.captures_iter(text) {
            let key = &caps[2];
            if RESERVED_KEYS.contains(&key) {
                continue;
            }
            if seen.insert(key.to_string()) {
                keys.push(key.to_string());
            }
        }
        keys
    }

    /// Resolve one `(prefix, key)` pair. `prefix` is `None` for a bare
    /// `{{key}}`, in which case `user:` is tried first (when `caller_id` is
    /// present) and `system:` is the fallback.
    pub async fn resolve_key(
        &self,
        prefix: Option<&str>,
        key: &str,
        caller_id: Option<&str>,
    ) -> Result<Option<Zeroizing<String>>, SettingsError> {
        let scopes: Vec<Scope> = match prefix {
            Some("user") => caller_id.map(|id| vec![Scope::User(id.to_string())]).unwrap_or_default(),
            Some("system") => vec![Scope::System],
            _ => {
                let mut scopes = Vec::new();
                if let Some(id) = caller_id {
                    scopes.push(Scope::User(id.to_string()));
                }
                scopes.push(Scope::System);
                scopes
            }
        };

        for scope in scopes {
            if let Some(cached) = self.cache.get(&scope, key) {
                return Ok(Some(cached));
            }
            if let Some(value) = self.backend.get(&scope, key).await? {
                self.cache.put(&scope, key, value.clone(), self.ttl);
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Replace every `{{ [prefix:] key }}` occurrence in `text` with its
    /// resolved value. Unresolvable keys are left as the literal
    /// `{{...}}` text they came in as, so a missing setting degrades to a
    /// visible placeholder rather than a hard failure.
    pub async fn resolve_template(&self, text: &str, caller_id: Option<&str>) -> Result<String, SettingsError> {
        let mut result = String::with_capacity(text.len());
        let mut last_end = 0;

        for caps in TEMPLATE_KEY.captures_iter(text) {
            let whole = caps.get(0).expect("group 0 always matches");
            let prefix = caps.get(1).map(|m| m.as_str());
            let key = &caps[2];

            result.push_str(&text[last_end..whole.start()]);
            match self.resolve_key(prefix, key, caller_id).await? {
                Some(value) => result.push_str(&value),
                None => result.push_str(whole.as_str()),
            }
            last_end = whole.end();
        }
        result.push_str(&text[last_end..]);
        Ok(result)
    }

    /// Clear every cache tier. The cache is rebuilt lazily as subsequent
    /// resolutions miss.
    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }
}
