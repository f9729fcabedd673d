//! Data Model entities (spec §3): `KnowledgeBase`, `Document`, `Chunk`, the
//! entity graph, and `Quota`.

use chrono::{DateTime, Utc};
use fluxbase_ingest::ChunkStrategy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who may see a knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Only the owner.
    Private,
    /// The owner's namespace.
    Shared,
    /// Any caller.
    Public,
}

/// Default permission granted to other users of a shared/public KB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserPermission {
    /// Read-only.
    Viewer,
    /// Read/write.
    Editor,
    /// Full control, including deletion.
    Owner,
}

/// `KnowledgeBase` — spec §3.
///
/// Built from [`crate::store::KnowledgeBaseRow`] rather than deriving
/// `sqlx::FromRow` directly, since `chunk_strategy` needs a fallible text
/// conversion into [`ChunkStrategyColumn`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    /// Primary key.
    pub id: Uuid,
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
    /// Which [`ChunkStrategy`] documents in this KB are split with.
    pub chunk_strategy: ChunkStrategyColumn,
    /// Visibility to other namespaces.
    pub visibility: Visibility,
    /// Owning user, when not a globally-scoped KB.
    pub owner_id: Option<String>,
    /// Permission granted to non-owners on shared/public KBs.
    pub default_user_permission: UserPermission,
    /// Whether the KB currently accepts searches/ingestion.
    pub enabled: bool,
    /// Denormalized counter, maintained by the store.
    pub document_count: i64,
    /// Denormalized counter, maintained by the store.
    pub total_chunks: i64,
    /// Quota ceiling on `document_count`, if any.
    pub quota_max_documents: Option<i64>,
    /// Quota ceiling on `total_chunks`, if any.
    pub quota_max_chunks: Option<i64>,
}

impl KnowledgeBase {
    /// Validate the invariants spec §3 assigns to `KnowledgeBase`.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.embedding_dimensions <= 0 {
            return Err("embedding_dimensions must be > 0");
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err("chunk_overlap must be less than chunk_size");
        }
        Ok(())
    }
}

/// Newtype so `ChunkStrategy` (defined in `fluxbase-ingest`, which has no
/// `sqlx` dependency) can round-trip through a `TEXT` column here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStrategyColumn(pub ChunkStrategy);

impl TryFrom<String> for ChunkStrategyColumn {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let strategy = match value.as_str() {
            "fixed" => ChunkStrategy::Fixed,
            "sentence" => ChunkStrategy::Sentence,
            "paragraph" => ChunkStrategy::Paragraph,
            "recursive" => ChunkStrategy::Recursive,
            other => return Err(format!("unknown chunk strategy {other:?}")),
        };
        Ok(ChunkStrategyColumn(strategy))
    }
}

/// Lifecycle status of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Created, not yet chunked.
    Pending,
    /// Chunking/embedding in progress.
    Processing,
    /// Fully embedded and searchable.
    Indexed,
    /// Terminal failure; see `error_message`.
    Failed,
}

/// `Document` — spec §3.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    /// Primary key.
    pub id: Uuid,
    /// Owning KB.
    pub knowledge_base_id: Uuid,
    /// Display title.
    pub title: String,
    /// Origin URL, if ingested from one.
    pub source_url: Option<String>,
    /// Free-form origin descriptor (e.g. `"upload"`, `"url"`, `"api"`).
    pub source_type: String,
    /// MIME type of the original bytes.
    pub mime_type: String,
    /// Extracted plain text content.
    pub content: String,
    /// Hash of `content`, used to detect duplicate ingestion.
    pub content_hash: String,
    /// Current lifecycle status.
    pub status: DocumentStatus,
    /// Populated when `status == Failed`.
    pub error_message: Option<String>,
    /// Denormalized chunk count, maintained by the store.
    pub chunks_count: i64,
    /// Free-form metadata, also consulted by the filter compiler.
    pub metadata: serde_json::Value,
    /// Free-text tags.
    pub tags: Vec<String>,
    /// Owning user, if namespace-scoped.
    pub owner_id: Option<String>,
    /// Caller that created this document.
    pub created_by: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
    /// When indexing completed, if it has.
    pub indexed_at: Option<DateTime<Utc>>,
}

/// `Chunk` — spec §3.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Chunk {
    /// Primary key.
    pub id: Uuid,
    /// Owning document.
    pub document_id: Uuid,
    /// Owning KB (denormalized from the document for query convenience).
    pub knowledge_base_id: Uuid,
    /// Chunk text.
    pub content: String,
    /// 0-based, contiguous within the document.
    pub chunk_index: i32,
    /// Char offset into the document's (normalized) content, if known.
    pub start_offset: Option<i32>,
    /// Char offset into the document's (normalized) content, if known.
    pub end_offset: Option<i32>,
    /// Estimated token count at chunking time.
    pub token_count: Option<i32>,
    /// Embedding vector; dimension matches the owning KB.
    pub embedding: pgvector::Vector,
    /// Metadata inherited from the owning document at chunk-write time.
    pub metadata: serde_json::Value,
}

/// `Entity` — a node in a KB-scoped property graph.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Entity {
    /// Primary key.
    pub id: Uuid,
    /// Owning KB.
    pub knowledge_base_id: Uuid,
    /// Entity category (e.g. `"person"`, `"organization"`).
    pub entity_type: String,
    /// Canonical, deduplication-key name.
    pub canonical_name: String,
    /// Free-form attributes.
    pub metadata: serde_json::Value,
}

/// `Relationship` — a directed edge between two [`Entity`] rows.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Relationship {
    /// Primary key.
    pub id: Uuid,
    /// Owning KB.
    pub knowledge_base_id: Uuid,
    /// Edge source.
    pub source_entity_id: Uuid,
    /// Edge target.
    pub target_entity_id: Uuid,
    /// Edge label (e.g. `"works_for"`).
    pub relationship_type: String,
    /// Free-form attributes.
    pub metadata: serde_json::Value,
}

/// `DocumentEntity` — ties an [`Entity`] mention to a [`Document`], weighted
/// by how central that entity is to the document.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentEntity {
    /// Primary key.
    pub id: Uuid,
    /// The mentioning document.
    pub document_id: Uuid,
    /// The mentioned entity.
    pub entity_id: Uuid,
    /// How central this entity is to the document, in `[0, 1]`.
    pub salience: f64,
}

/// `Quota` — per-user `{used, max}` triples (spec §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::FromRow)]
pub struct Quota {
    /// Documents currently owned.
    pub documents_used: i64,
    /// Document ceiling, if any.
    pub documents_max: Option<i64>,
    /// Chunks currently owned.
    pub chunks_used: i64,
    /// Chunk ceiling, if any.
    pub chunks_max: Option<i64>,
    /// Storage bytes currently used.
    pub storage_bytes_used: i64,
    /// Storage byte ceiling, if any.
    pub storage_bytes_max: Option<i64>,
}
