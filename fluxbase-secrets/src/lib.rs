#![deny(missing_docs)]
//! Versioned, envelope-encrypted secrets store (spec §4.9, §6 persistence
//! layout `functions.secrets` / `functions.secret_versions`).
//!
//! Cleartext never touches the database — every row holds the output of
//! [`fluxbase_crypto::CryptoBox::seal`]. Version history is append-only:
//! `update` with a new value bumps `version` and inserts a trailing
//! `secret_versions` row; `rollback_to_version` re-applies a historical
//! plaintext as a *new* trailing version rather than rewriting history.
//!
//! Global secrets collide on `(name, scope, namespace)` under ordinary SQL
//! NULL semantics (two `NULL` namespaces are never equal, so a uniqueness
//! constraint silently stops enforcing itself). fluxbase sidesteps this by
//! storing global secrets under the sentinel namespace [`GLOBAL_NAMESPACE`]
//! instead of `NULL`, so the `(name, scope, namespace)` unique index behaves
//! like an ordinary three-column key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxbase_crypto::{CryptoBox, CryptoBoxError, MasterKeySource};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Row};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Sentinel namespace used for `scope = Global` rows instead of SQL `NULL`,
/// resolving spec's Open Question about NULL-namespace collisions.
pub const GLOBAL_NAMESPACE: &str = "__global__";

/// Errors from secrets-store operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SecretsError {
    /// No secret matched the given id/name/scope.
    #[error("secret not found: {0}")]
    NotFound(String),

    /// A secret with the same `(name, scope, namespace)` already exists.
    #[error("secret already exists: {0}")]
    Conflict(String),

    /// The version requested for rollback does not exist.
    #[error("secret version not found: {0}")]
    VersionNotFound(i32),

    /// Encryption/decryption failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoBoxError),

    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Scope of a secret: global to the deployment, or namespace-owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretScope {
    /// Visible across all namespaces.
    Global,
    /// Visible only within one namespace.
    Namespace,
}

impl SecretScope {
    fn as_db_str(self) -> &'static str {
        match self {
            SecretScope::Global => "global",
            SecretScope::Namespace => "namespace",
        }
    }

    fn from_db_str(s: &str) -> Self {
        match s {
            "namespace" => SecretScope::Namespace,
            _ => SecretScope::Global,
        }
    }

    /// The namespace column value to store for this scope: the caller's
    /// namespace for `Namespace`, the sentinel for `Global`.
    fn storage_namespace(self, namespace: Option<&str>) -> String {
        match self {
            SecretScope::Global => GLOBAL_NAMESPACE.to_string(),
            SecretScope::Namespace => namespace.unwrap_or_default().to_string(),
        }
    }
}

/// Metadata-only view of a secret (never carries the plaintext).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMeta {
    /// Primary key.
    pub id: Uuid,
    /// Secret name, unique within `(scope, namespace)`.
    pub name: String,
    /// Scope.
    pub scope: SecretScope,
    /// Namespace; `None` is only possible for display — storage always uses
    /// [`GLOBAL_NAMESPACE`] for global secrets.
    pub namespace: Option<String>,
    /// Human description.
    pub description: Option<String>,
    /// Current version number, starting at 1.
    pub version: i32,
    /// Optional expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Creator identity.
    pub created_by: Option<String>,
    /// Last updater identity.
    pub updated_by: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl SecretMeta {
    /// Whether this secret has expired relative to `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// A single historical version of a secret. Never exposes plaintext outside
/// `SecretsStore` — callers decrypt explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretVersionMeta {
    /// Version number, 1-based, strictly increasing per secret.
    pub version: i32,
    /// When this version was created.
    pub created_at: DateTime<Utc>,
    /// Who created it.
    pub created_by: Option<String>,
}

/// Aggregate counts for observability / capacity planning.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsStats {
    /// Total live secrets.
    pub total_secrets: i64,
    /// Total secrets with `scope = Global`.
    pub global_secrets: i64,
    /// Total secrets with `scope = Namespace`.
    pub namespace_secrets: i64,
    /// Total version rows across all secrets.
    pub total_versions: i64,
    /// Secrets whose `expires_at` is in the past.
    pub expired_secrets: i64,
}

/// Input for creating a secret.
pub struct NewSecret {
    /// Name.
    pub name: String,
    /// Scope.
    pub scope: SecretScope,
    /// Namespace (ignored for `Global`).
    pub namespace: Option<String>,
    /// Plaintext value. Encrypted before it ever reaches the database.
    pub value: String,
    /// Optional description.
    pub description: Option<String>,
    /// Optional expiry.
    pub expires_at: Option<DateTime<Utc>>,
    /// Creator identity, stored as `created_by` and `updated_by`.
    pub actor: Option<String>,
}

/// Patch applied by `update`. `None` fields are left unchanged.
#[derive(Default)]
pub struct SecretUpdate {
    /// New plaintext value, if changing. Bumps `version`.
    pub value: Option<String>,
    /// New description, if changing. Does not bump `version`.
    pub description: Option<String>,
    /// New expiry, if changing. Does not bump `version`.
    pub expires_at: Option<Option<DateTime<Utc>>>,
    /// Identity performing the update.
    pub actor: Option<String>,
}

#[derive(FromRow)]
struct SecretRow {
    id: Uuid,
    name: String,
    scope: String,
    namespace: String,
    description: Option<String>,
    encrypted_value: String,
    version: i32,
    expires_at: Option<DateTime<Utc>>,
    created_by: Option<String>,
    updated_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SecretRow {
    fn into_meta(self) -> SecretMeta {
        let scope = SecretScope::from_db_str(&self.scope);
        SecretMeta {
            id: self.id,
            name: self.name,
            namespace: if scope == SecretScope::Global {
                None
            } else {
                Some(self.namespace)
            },
            scope,
            description: self.description,
            version: self.version,
            expires_at: self.expires_at,
            created_by: self.created_by,
            updated_by: self.updated_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Versioned, encrypted secrets store backed by Postgres.
///
/// Generic over the key source so callers choose a static key, an
/// env-sourced key, or (via `fluxbase-crypto`'s `envelope` feature) a
/// KMS-unwrapped one — the store itself never branches on that choice.
pub struct SecretsStore<K: MasterKeySource> {
    pool: PgPool,
    crypto: CryptoBox<K>,
}

impl<K: MasterKeySource> SecretsStore<K> {
    /// Build a store over `pool`, encrypting/decrypting with `crypto`.
    pub fn new(pool: PgPool, crypto: CryptoBox<K>) -> Self {
        Self { pool, crypto }
    }

    /// Create a new secret. Fails with `Conflict` if `(name, scope, namespace)`
    /// already exists.
    pub async fn create(&self, new: NewSecret) -> Result<SecretMeta, SecretsError> {
        let storage_ns = new.scope.storage_namespace(new.namespace.as_deref());
        let existing = self
            .get_by_name(&new.name, new.scope, new.namespace.as_deref())
            .await;
        if existing.is_ok() {
            return Err(SecretsError::Conflict(new.name));
        }

        let encrypted = self.crypto.seal_str(&new.value)?;
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, SecretRow>(
            r#"
            INSERT INTO functions.secrets
                (id, name, scope, namespace, description, encrypted_value, version,
                 expires_at, created_by, updated_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $8, $8, now(), now())
            RETURNING id, name, scope, namespace, description, encrypted_value, version,
                      expires_at, created_by, updated_by, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&new.name)
        .bind(new.scope.as_db_str())
        .bind(&storage_ns)
        .bind(&new.description)
        .bind(&encrypted)
        .bind(new.expires_at)
        .bind(&new.actor)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO functions.secret_versions (id, secret_id, version, encrypted_value, created_at, created_by)
            VALUES ($1, $2, 1, $3, now(), $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(id)
        .bind(&encrypted)
        .bind(&new.actor)
        .execute(&self.pool)
        .await?;

        Ok(row.into_meta())
    }

    /// Fetch metadata by id. Never returns plaintext.
    pub async fn get(&self, id: Uuid) -> Result<SecretMeta, SecretsError> {
        let row = sqlx::query_as::<_, SecretRow>(
            "SELECT id, name, scope, namespace, description, encrypted_value, version, \
             expires_at, created_by, updated_by, created_at, updated_at \
             FROM functions.secrets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SecretsError::NotFound(id.to_string()))?;
        Ok(row.into_meta())
    }

    /// Fetch metadata by `(name, scope, namespace)`.
    pub async fn get_by_name(
        &self,
        name: &str,
        scope: SecretScope,
        namespace: Option<&str>,
    ) -> Result<SecretMeta, SecretsError> {
        let storage_ns = scope.storage_namespace(namespace);
        let row = sqlx::query_as::<_, SecretRow>(
            "SELECT id, name, scope, namespace, description, encrypted_value, version, \
             expires_at, created_by, updated_by, created_at, updated_at \
             FROM functions.secrets WHERE name = $1 AND scope = $2 AND namespace = $3",
        )
        .bind(name)
        .bind(scope.as_db_str())
        .bind(&storage_ns)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SecretsError::NotFound(name.to_string()))?;
        Ok(row.into_meta())
    }

    /// Decrypt and return a secret's current plaintext.
    pub async fn reveal(&self, id: Uuid) -> Result<Zeroizing<String>, SecretsError> {
        let encrypted: String =
            sqlx::query_scalar("SELECT encrypted_value FROM functions.secrets WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| SecretsError::NotFound(id.to_string()))?;
        Ok(self.crypto.open_str(&encrypted)?)
    }

    /// List secrets, optionally filtered by scope and/or namespace.
    pub async fn list(
        &self,
        scope: Option<SecretScope>,
        namespace: Option<&str>,
    ) -> Result<Vec<SecretMeta>, SecretsError> {
        let rows = sqlx::query_as::<_, SecretRow>(
            "SELECT id, name, scope, namespace, description, encrypted_value, version, \
             expires_at, created_by, updated_by, created_at, updated_at \
             FROM functions.secrets \
             WHERE ($1::text IS NULL OR scope = $1) \
               AND ($2::text IS NULL OR namespace = $2) \
             ORDER BY name",
        )
        .bind(scope.map(|s| s.as_db_str()))
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SecretRow::into_meta).collect())
    }

    /// Apply a patch. A changed `value` bumps `version` and appends a
    /// `secret_versions` row; description/expiry-only changes do not.
    pub async fn update(&self, id: Uuid, patch: SecretUpdate) -> Result<SecretMeta, SecretsError> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_as::<_, SecretRow>(
            "SELECT id, name, scope, namespace, description, encrypted_value, version, \
             expires_at, created_by, updated_by, created_at, updated_at \
             FROM functions.secrets WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| SecretsError::NotFound(id.to_string()))?;

        let bumps_version = patch.value.is_some();
        let new_version = if bumps_version {
            current.version + 1
        } else {
            current.version
        };
        let new_encrypted = match &patch.value {
            Some(plaintext) => self.crypto.seal_str(plaintext)?,
            None => current.encrypted_value.clone(),
        };
        let new_description = patch.description.or(current.description.clone());
        let new_expires = patch.expires_at.unwrap_or(current.expires_at);

        let row = sqlx::query_as::<_, SecretRow>(
            r#"
            UPDATE functions.secrets
            SET encrypted_value = $2, version = $3, description = $4, expires_at = $5,
                updated_by = $6, updated_at = now()
            WHERE id = $1
            RETURNING id, name, scope, namespace, description, encrypted_value, version,
                      expires_at, created_by, updated_by, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&new_encrypted)
        .bind(new_version)
        .bind(&new_description)
        .bind(new_expires)
        .bind(&patch.actor)
        .fetch_one(&mut *tx)
        .await?;

        if bumps_version {
            sqlx::query(
                "INSERT INTO functions.secret_versions (id, secret_id, version, encrypted_value, created_at, created_by) \
                 VALUES ($1, $2, $3, $4, now(), $5)",
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(new_version)
            .bind(&new_encrypted)
            .bind(&patch.actor)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(row.into_meta())
    }

    /// Permanently remove a secret and its version history.
    pub async fn delete(&self, id: Uuid) -> Result<(), SecretsError> {
        let result = sqlx::query("DELETE FROM functions.secrets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SecretsError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// List version metadata, newest first.
    pub async fn versions(&self, id: Uuid) -> Result<Vec<SecretVersionMeta>, SecretsError> {
        let rows = sqlx::query(
            "SELECT version, created_at, created_by FROM functions.secret_versions \
             WHERE secret_id = $1 ORDER BY version DESC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| SecretVersionMeta {
                version: r.get("version"),
                created_at: r.get("created_at"),
                created_by: r.get("created_by"),
            })
            .collect())
    }

    /// Re-apply a historical version's plaintext as a new trailing version.
    /// History is never rewritten — the returned `SecretMeta.version` is
    /// `max(existing versions) + 1`.
    pub async fn rollback_to_version(
        &self,
        id: Uuid,
        version: i32,
        actor: Option<String>,
    ) -> Result<SecretMeta, SecretsError> {
        let encrypted: String = sqlx::query_scalar(
            "SELECT encrypted_value FROM functions.secret_versions WHERE secret_id = $1 AND version = $2",
        )
        .bind(id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(SecretsError::VersionNotFound(version))?;

        let plaintext = self.crypto.open_str(&encrypted)?;
        self.update(
            id,
            SecretUpdate {
                value: Some(plaintext.to_string()),
                actor,
                ..Default::default()
            },
        )
        .await
    }

    /// Merge global + namespace secrets into one plaintext map, namespace
    /// overriding global on name collision, excluding expired entries.
    pub async fn get_secrets_for_namespace(
        &self,
        namespace: &str,
    ) -> Result<HashMap<String, Zeroizing<String>>, SecretsError> {
        let now = Utc::now();
        let mut merged = HashMap::new();

        for meta in self.list(Some(SecretScope::Global), None).await? {
            if meta.is_expired_at(now) {
                continue;
            }
            let value = self.reveal(meta.id).await?;
            merged.insert(meta.name, value);
        }
        for meta in self.list(Some(SecretScope::Namespace), Some(namespace)).await? {
            if meta.is_expired_at(now) {
                continue;
            }
            let value = self.reveal(meta.id).await?;
            merged.insert(meta.name, value);
        }
        Ok(merged)
    }

    /// Aggregate counts across all secrets.
    pub async fn get_stats(&self) -> Result<SecretsStats, SecretsError> {
        let row = sqlx::query(
            r#"
            SELECT
                count(*) AS total_secrets,
                count(*) FILTER (WHERE scope = 'global') AS global_secrets,
                count(*) FILTER (WHERE scope = 'namespace') AS namespace_secrets,
                count(*) FILTER (WHERE expires_at IS NOT NULL AND expires_at <= now()) AS expired_secrets
            FROM functions.secrets
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let total_versions: i64 = sqlx::query_scalar("SELECT count(*) FROM functions.secret_versions")
            .fetch_one(&self.pool)
            .await?;

        Ok(SecretsStats {
            total_secrets: row.get("total_secrets"),
            global_secrets: row.get("global_secrets"),
            namespace_secrets: row.get("namespace_secrets"),
            total_versions,
            expired_secrets: row.get("expired_secrets"),
        })
    }
}

/// Bridges [`SecretsStore`] into `neuron_secret`'s resolver abstraction so
/// `fluxbase-settings` can treat first-party and external-backend secrets
/// uniformly through one trait object.
#[async_trait]
pub trait NamespaceSecrets: Send + Sync {
    /// Resolve one secret's plaintext by name within a namespace, falling
    /// back to the global scope.
    async fn resolve(&self, namespace: &str, name: &str) -> Result<Zeroizing<String>, SecretsError>;
}

#[async_trait]
impl<K: MasterKeySource + Send + Sync> NamespaceSecrets for SecretsStore<K> {
    async fn resolve(&self, namespace: &str, name: &str) -> Result<Zeroizing<String>, SecretsError> {
        if let Ok(meta) = self
            .get_by_name(name, SecretScope::Namespace, Some(namespace))
            .await
        {
            return self.reveal(meta.id).await;
        }
        let meta = self.get_by_name(name, SecretScope::Global, None).await?;
        self.reveal(meta.id).await
    }
}
