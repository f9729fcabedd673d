//! `KBStore` — CRUD over `KnowledgeBase`, `Document`, and `Chunk` rows, with
//! the denormalized counters spec §3 requires (`document_count`,
//! `total_chunks`, `chunks_count`).

use crate::errors::KBError;
use crate::types::{Chunk, ChunkStrategyColumn, Document, KnowledgeBase, UserPermission, Visibility};
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

/// Raw row shape for `knowledge_bases`; `chunk_strategy` is stored as text
/// and only fallibly converts to [`ChunkStrategyColumn`].
#[derive(sqlx::FromRow)]
pub(crate) struct KnowledgeBaseRow {
    id: Uuid,
    name: String,
    namespace: String,
    description: Option<String>,
    embedding_model: String,
    embedding_dimensions: i32,
    chunk_size: i32,
    chunk_overlap: i32,
    chunk_strategy: String,
    visibility: Visibility,
    owner_id: Option<String>,
    default_user_permission: UserPermission,
    enabled: bool,
    document_count: i64,
    total_chunks: i64,
    quota_max_documents: Option<i64>,
    quota_max_chunks: Option<i64>,
}

impl TryFrom<KnowledgeBaseRow> for KnowledgeBase {
    type Error = KBError;

    fn try_from(row: KnowledgeBaseRow) -> Result<Self, Self::Error> {
        let chunk_strategy = ChunkStrategyColumn::try_from(row.chunk_strategy)
            .map_err(|_| KBError::InvalidKnowledgeBase("unrecognized chunk_strategy"))?;
        Ok(KnowledgeBase {
            id: row.id,
            name: row.name,
            namespace: row.namespace,
            description: row.description,
            embedding_model: row.embedding_model,
            embedding_dimensions: row.embedding_dimensions,
            chunk_size: row.chunk_size,
            chunk_overlap: row.chunk_overlap,
            chunk_strategy,
            visibility: row.visibility,
            owner_id: row.owner_id,
            default_user_permission: row.default_user_permission,
            enabled: row.enabled,
            document_count: row.document_count,
            total_chunks: row.total_chunks,
            quota_max_documents: row.quota_max_documents,
            quota_max_chunks: row.quota_max_chunks,
        })
    }
}

/// Fields required to create a new [`KnowledgeBase`].
pub struct NewKnowledgeBase {
    /// Display name.
    pub name: String,
    /// Tenant namespace.
    pub namespace: String,
    /// Optional human description.
    pub description: Option<String>,
    /// Embedding model identifier.
    pub embedding_model: String,
    /// Embedding vector dimensionality. Must be > 0.
    pub embedding_dimensions: i32,
    /// Target chunk size, in estimated tokens.
    pub chunk_size: i32,
    /// Overlap between consecutive chunks. Must be `< chunk_size`.
    pub chunk_overlap: i32,
    /// Chunking strategy for documents in this KB.
    pub chunk_strategy: fluxbase_ingest::ChunkStrategy,
    /// Visibility to other namespaces.
    pub visibility: Visibility,
    /// Owning user, when not globally scoped.
    pub owner_id: Option<String>,
    /// Permission granted to non-owners on shared/public KBs.
    pub default_user_permission: UserPermission,
    /// Quota ceiling on document count, if any.
    pub quota_max_documents: Option<i64>,
    /// Quota ceiling on chunk count, if any.
    pub quota_max_chunks: Option<i64>,
}

fn chunk_strategy_text(strategy: fluxbase_ingest::ChunkStrategy) -> &'static str {
    match strategy {
        fluxbase_ingest::ChunkStrategy::Fixed => "fixed",
        fluxbase_ingest::ChunkStrategy::Sentence => "sentence",
        fluxbase_ingest::ChunkStrategy::Paragraph => "paragraph",
        fluxbase_ingest::ChunkStrategy::Recursive => "recursive",
    }
}

/// Fields required to create a new [`Document`].
pub struct NewDocument {
    /// Owning KB.
    pub knowledge_base_id: Uuid,
    /// Display title.
    pub title: String,
    /// Origin URL, if ingested from one.
    pub source_url: Option<String>,
    /// Free-form origin descriptor.
    pub source_type: String,
    /// MIME type of the original bytes.
    pub mime_type: String,
    /// Extracted plain text content.
    pub content: String,
    /// Hash of `content`.
    pub content_hash: String,
    /// Free-form metadata.
    pub metadata: serde_json::Value,
    /// Free-text tags.
    pub tags: Vec<String>,
    /// Owning user, if namespace-scoped.
    pub owner_id: Option<String>,
    /// Caller that created this document.
    pub created_by: Option<String>,
}

/// One chunk awaiting insertion, produced by `fluxbase-ingest` + embedding.
pub struct NewChunk {
    /// 0-based, contiguous within the document.
    pub chunk_index: i32,
    /// Chunk text.
    pub content: String,
    /// Char offset into the document's normalized content, if known.
    pub start_offset: Option<i32>,
    /// Char offset into the document's normalized content, if known.
    pub end_offset: Option<i32>,
    /// Estimated token count.
    pub token_count: Option<i32>,
    /// Embedding vector; must match the owning KB's configured dimensions.
    pub embedding: Vec<f32>,
    /// Metadata inherited from the owning document.
    pub metadata: serde_json::Value,
}

/// CRUD access to knowledge bases, documents, and chunks.
pub struct KBStore {
    pool: PgPool,
}

impl KBStore {
    /// Build a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Borrow the underlying pool, for modules (search, graph, quota) that
    /// need to issue their own queries against the same connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create a knowledge base.
    pub async fn create_knowledge_base(&self, new_kb: NewKnowledgeBase) -> Result<KnowledgeBase, KBError> {
        if new_kb.embedding_dimensions <= 0 {
            return Err(KBError::InvalidKnowledgeBase("embedding_dimensions must be > 0"));
        }
        if new_kb.chunk_overlap >= new_kb.chunk_size {
            return Err(KBError::InvalidKnowledgeBase("chunk_overlap must be less than chunk_size"));
        }

        let row: KnowledgeBaseRow = sqlx::query_as(
            r#"
            INSERT INTO knowledge_bases (
                id, name, namespace, description, embedding_model, embedding_dimensions,
                chunk_size, chunk_overlap, chunk_strategy, visibility, owner_id,
                default_user_permission, enabled, document_count, total_chunks,
                quota_max_documents, quota_max_chunks
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, true, 0, 0, $13, $14)
            RETURNING id, name, namespace, description, embedding_model, embedding_dimensions,
                chunk_size, chunk_overlap, chunk_strategy, visibility, owner_id,
                default_user_permission, enabled, document_count, total_chunks,
                quota_max_documents, quota_max_chunks
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&new_kb.name)
        .bind(&new_kb.namespace)
        .bind(&new_kb.description)
        .bind(&new_kb.embedding_model)
        .bind(new_kb.embedding_dimensions)
        .bind(new_kb.chunk_size)
        .bind(new_kb.chunk_overlap)
        .bind(chunk_strategy_text(new_kb.chunk_strategy))
        .bind(new_kb.visibility)
        .bind(&new_kb.owner_id)
        .bind(new_kb.default_user_permission)
        .bind(new_kb.quota_max_documents)
        .bind(new_kb.quota_max_chunks)
        .fetch_one(&self.pool)
        .await?;

        KnowledgeBase::try_from(row)
    }

    /// Fetch a knowledge base by id.
    pub async fn get_knowledge_base(&self, id: Uuid) -> Result<KnowledgeBase, KBError> {
        let row: Option<KnowledgeBaseRow> = sqlx::query_as(
            r#"
            SELECT id, name, namespace, description, embedding_model, embedding_dimensions,
                chunk_size, chunk_overlap, chunk_strategy, visibility, owner_id,
                default_user_permission, enabled, document_count, total_chunks,
                quota_max_documents, quota_max_chunks
            FROM knowledge_bases WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(KBError::NotFound {
            what: "knowledge base",
            id,
        })?;
        KnowledgeBase::try_from(row)
    }

    /// Fetch a knowledge base by its `(namespace, name)` pair — the lookup
    /// `fluxbase-retriever` uses to resolve a bot's `knowledge_bases[]`
    /// names into ids before fanning out searches.
    pub async fn get_knowledge_base_by_name(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<KnowledgeBase, KBError> {
        let row: Option<KnowledgeBaseRow> = sqlx::query_as(
            r#"
            SELECT id, name, namespace, description, embedding_model, embedding_dimensions,
                chunk_size, chunk_overlap, chunk_strategy, visibility, owner_id,
                default_user_permission, enabled, document_count, total_chunks,
                quota_max_documents, quota_max_chunks
            FROM knowledge_bases WHERE namespace = $1 AND name = $2
            "#,
        )
        .bind(namespace)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or_else(|| KBError::NotFoundByName {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;
        KnowledgeBase::try_from(row)
    }

    /// Create a document in `pending` status.
    pub async fn create_document(&self, new_doc: NewDocument) -> Result<Document, KBError> {
        let document: Document = sqlx::query_as(
            r#"
            INSERT INTO documents (
                id, knowledge_base_id, title, source_url, source_type, mime_type, content,
                content_hash, status, error_message, chunks_count, metadata, tags, owner_id,
                created_by, created_at, updated_at, indexed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', NULL, 0, $9, $10, $11, $12, $13, $13, NULL)
            RETURNING id, knowledge_base_id, title, source_url, source_type, mime_type, content,
                content_hash, status, error_message, chunks_count, metadata, tags, owner_id,
                created_by, created_at, updated_at, indexed_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_doc.knowledge_base_id)
        .bind(&new_doc.title)
        .bind(&new_doc.source_url)
        .bind(&new_doc.source_type)
        .bind(&new_doc.mime_type)
        .bind(&new_doc.content)
        .bind(&new_doc.content_hash)
        .bind(&new_doc.metadata)
        .bind(&new_doc.tags)
        .bind(&new_doc.owner_id)
        .bind(&new_doc.created_by)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        // A fresh document contributes to the KB's document_count immediately
        // (chunk counters only move once chunks are actually inserted).
        sqlx::query("UPDATE knowledge_bases SET document_count = document_count + 1 WHERE id = $1")
            .bind(new_doc.knowledge_base_id)
            .execute(&self.pool)
            .await?;

        Ok(document)
    }

    /// Transition a document to `processing`.
    pub async fn mark_document_processing(&self, id: Uuid) -> Result<(), KBError> {
        sqlx::query("UPDATE documents SET status = 'processing', updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Transition a document to `failed`, recording `error_message`.
    pub async fn mark_document_failed(&self, id: Uuid, error_message: &str) -> Result<(), KBError> {
        sqlx::query(
            "UPDATE documents SET status = 'failed', error_message = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(error_message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert chunks for a document, bumping the document's `chunks_count`
    /// and the owning KB's `total_chunks`, then transition the document to
    /// `indexed`. All in one transaction.
    pub async fn insert_chunks(
        &self,
        document_id: Uuid,
        knowledge_base_id: Uuid,
        chunks: Vec<NewChunk>,
    ) -> Result<Vec<Chunk>, KBError> {
        let kb = self.get_knowledge_base(knowledge_base_id).await?;

        for chunk in &chunks {
            if chunk.embedding.len() != kb.embedding_dimensions as usize {
                return Err(KBError::DimensionMismatch {
                    actual: chunk.embedding.len(),
                    expected: kb.embedding_dimensions as usize,
                });
            }
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let row: Chunk = sqlx::query_as(
                r#"
                INSERT INTO chunks (
                    id, document_id, knowledge_base_id, content, chunk_index, start_offset,
                    end_offset, token_count, embedding, metadata
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING id, document_id, knowledge_base_id, content, chunk_index, start_offset,
                    end_offset, token_count, embedding, metadata
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(document_id)
            .bind(knowledge_base_id)
            .bind(&chunk.content)
            .bind(chunk.chunk_index)
            .bind(chunk.start_offset)
            .bind(chunk.end_offset)
            .bind(chunk.token_count)
            .bind(pgvector::Vector::from(chunk.embedding))
            .bind(&chunk.metadata)
            .fetch_one(&mut *tx)
            .await?;
            inserted.push(row);
        }

        let count = inserted.len() as i64;
        sqlx::query("UPDATE documents SET chunks_count = chunks_count + $2, status = 'indexed', indexed_at = $3, updated_at = $3 WHERE id = $1")
            .bind(document_id)
            .bind(count)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE knowledge_bases SET total_chunks = total_chunks + $2 WHERE id = $1")
            .bind(knowledge_base_id)
            .bind(count)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    /// Fetch all chunks of a document, ordered by `chunk_index`.
    pub async fn get_chunks_by_document(&self, document_id: Uuid) -> Result<Vec<Chunk>, KBError> {
        let rows: Vec<Chunk> = sqlx::query_as(
            r#"
            SELECT id, document_id, knowledge_base_id, content, chunk_index, start_offset,
                end_offset, token_count, embedding, metadata
            FROM chunks WHERE document_id = $1 ORDER BY chunk_index ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Fetch a document by id.
    pub async fn get_document(&self, id: Uuid) -> Result<Document, KBError> {
        let row: Option<Document> = sqlx::query_as(
            r#"
            SELECT id, knowledge_base_id, title, source_url, source_type, mime_type, content,
                content_hash, status, error_message, chunks_count, metadata, tags, owner_id,
                created_by, created_at, updated_at, indexed_at
            FROM documents WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(KBError::NotFound { what: "document", id })
    }
}
