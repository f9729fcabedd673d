//! `QuotaService` — pre-flight quota enforcement (spec §3 "Quota", §5
//! "Rate limiters, quotas, daily budgets are consulted before expensive
//! work").
//!
//! Every check here is read-then-compare against the KB's configured
//! ceilings; it never mutates anything. Callers are expected to call
//! [`QuotaService::check_documents`] / [`QuotaService::check_chunks`]
//! before running a chunker or an embedding batch, not after, so rejected
//! work never reaches the provider.

use crate::errors::KBError;
use crate::types::Quota;
use sqlx::PgPool;
use uuid::Uuid;

/// Pre-flight checks against a knowledge base's document/chunk/storage
/// ceilings.
pub struct QuotaService {
    pool: PgPool,
}

impl QuotaService {
    /// Build a quota service over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Current usage and configured ceilings for one knowledge base.
    pub async fn current(&self, knowledge_base_id: Uuid) -> Result<Quota, KBError> {
        let row: Option<Quota> = sqlx::query_as(
            r#"
            SELECT
                document_count AS documents_used,
                quota_max_documents AS documents_max,
                total_chunks AS chunks_used,
                quota_max_chunks AS chunks_max,
                0::bigint AS storage_bytes_used,
                NULL::bigint AS storage_bytes_max
            FROM knowledge_bases WHERE id = $1
            "#,
        )
        .bind(knowledge_base_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(KBError::NotFound {
            what: "knowledge base",
            id: knowledge_base_id,
        })
    }

    /// Verify that adding `additional` documents would not exceed the KB's
    /// `quota_max_documents`, if any is configured.
    pub async fn check_documents(&self, knowledge_base_id: Uuid, additional: i64) -> Result<(), KBError> {
        let quota = self.current(knowledge_base_id).await?;
        if let Some(max) = quota.documents_max {
            let projected = quota.documents_used + additional;
            if projected > max {
                return Err(KBError::QuotaExceeded {
                    resource: "documents",
                    used: projected,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Verify that adding `additional` chunks would not exceed the KB's
    /// `quota_max_chunks`, if any is configured. Called before an embedding
    /// batch is submitted, not after.
    pub async fn check_chunks(&self, knowledge_base_id: Uuid, additional: i64) -> Result<(), KBError> {
        let quota = self.current(knowledge_base_id).await?;
        if let Some(max) = quota.chunks_max {
            let projected = quota.chunks_used + additional;
            if projected > max {
                return Err(KBError::QuotaExceeded {
                    resource: "chunks",
                    used: projected,
                    max,
                });
            }
        }
        Ok(())
    }
}
