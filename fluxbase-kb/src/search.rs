//! Low-level chunk search primitives shared by `fluxbase-retriever`:
//! semantic (vector), keyword (full-text), and hybrid (blended) search
//! (spec §4.4). Graph-boosted search composes [`search_semantic`] with
//! [`crate::graph::KnowledgeGraph`] salience lookups in `fluxbase-retriever`
//! rather than living here.

use crate::errors::KBError;
use fluxbase_filter::Group;
use sqlx::PgPool;
use uuid::Uuid;

/// Default semantic-weight in [`search_hybrid`]'s blended score.
pub const DEFAULT_SEMANTIC_WEIGHT: f64 = 0.5;
/// Default bonus added when a chunk also matches the keyword side.
pub const DEFAULT_KEYWORD_BOOST: f64 = 0.3;

/// One scored chunk returned by a search primitive.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The chunk's id.
    pub chunk_id: Uuid,
    /// Owning document.
    pub document_id: Uuid,
    /// Owning KB.
    pub knowledge_base_id: Uuid,
    /// Chunk text.
    pub content: String,
    /// 0-based index within the document.
    pub chunk_index: i32,
    /// Chunk metadata.
    pub metadata: serde_json::Value,
    /// Final similarity/score for this search, always in `[0, 1]`.
    pub similarity: f64,
}

#[derive(sqlx::FromRow)]
struct SearchHitRow {
    id: Uuid,
    document_id: Uuid,
    knowledge_base_id: Uuid,
    content: String,
    chunk_index: i32,
    metadata: serde_json::Value,
    similarity: f64,
}

impl From<SearchHitRow> for SearchHit {
    fn from(row: SearchHitRow) -> Self {
        SearchHit {
            chunk_id: row.id,
            document_id: row.document_id,
            knowledge_base_id: row.knowledge_base_id,
            content: row.content,
            chunk_index: row.chunk_index,
            metadata: row.metadata,
            similarity: row.similarity,
        }
    }
}

/// Compile the isolation + metadata-filter predicates shared by every
/// search primitive, starting from `starting_index`. Returns the combined
/// `AND`-joined fragment (always non-empty, since `knowledge_base_id = $1`
/// is the caller's own first predicate and isn't included here), its bind
/// args, and the next free parameter index.
fn compile_predicates(
    starting_index: usize,
    user_id: Option<&str>,
    filter: Option<&Group>,
) -> Result<(String, Vec<String>, usize), KBError> {
    let mut fragments = Vec::new();
    let mut args = Vec::new();
    let mut next_index = starting_index;

    if let Some(uid) = user_id {
        let (fragment, isolation_args, next) = fluxbase_filter::user_isolation_predicate(uid, "", next_index);
        fragments.push(fragment);
        args.extend(isolation_args);
        next_index = next;
    }

    if let Some(group) = filter {
        let (fragment, filter_args, next) = fluxbase_filter::compile(group, next_index, "")?;
        if let Some(fragment) = fragment {
            fragments.push(fragment);
            args.extend(filter_args);
            next_index = next;
        }
    }

    let joined = if fragments.is_empty() {
        String::new()
    } else {
        format!(" AND {}", fragments.join(" AND "))
    };
    Ok((joined, args, next_index))
}

/// **SearchChunks (semantic)**: cosine similarity via the `embedding`
/// column, thresholded at `tau`, ordered by ascending distance, limited to
/// `k`. Similarity is `1 - distance`.
pub async fn search_semantic(
    pool: &PgPool,
    knowledge_base_id: Uuid,
    query_vector: Vec<f32>,
    tau: f64,
    k: i64,
    user_id: Option<&str>,
    filter: Option<&Group>,
) -> Result<Vec<SearchHit>, KBError> {
    let (predicate_tail, args, _next) = compile_predicates(5, user_id, filter)?;

    let sql = format!(
        "SELECT id, document_id, knowledge_base_id, content, chunk_index, metadata, \
         (1 - (embedding <=> $2)) AS similarity \
         FROM chunks \
         WHERE knowledge_base_id = $1 AND (1 - (embedding <=> $2)) >= $3{predicate_tail} \
         ORDER BY embedding <=> $2 ASC \
         LIMIT $4"
    );

    let mut query = sqlx::query_as::<_, SearchHitRow>(&sql)
        .bind(knowledge_base_id)
        .bind(pgvector::Vector::from(query_vector))
        .bind(tau)
        .bind(k);
    for arg in args {
        query = query.bind(arg);
    }

    let rows = query.fetch_all(pool).await?;
    Ok(rows.into_iter().map(SearchHit::from).collect())
}

/// **SearchChunksHybrid, `mode = "keyword"`**: `ts_rank_cd` of a full-text
/// tokenization, unioned with a substring `ILIKE` fallback; similarity is
/// clamped to `[0, 1]`.
pub async fn search_keyword(
    pool: &PgPool,
    knowledge_base_id: Uuid,
    query_text: &str,
    k: i64,
    user_id: Option<&str>,
    filter: Option<&Group>,
) -> Result<Vec<SearchHit>, KBError> {
    let (predicate_tail, args, _next) = compile_predicates(5, user_id, filter)?;
    let ilike_pattern = format!("%{query_text}%");

    let sql = format!(
        "SELECT id, document_id, knowledge_base_id, content, chunk_index, metadata, \
         LEAST(1.0, GREATEST( \
             ts_rank_cd(to_tsvector('english', content), plainto_tsquery('english', $2)), \
             CASE WHEN content ILIKE $3 THEN 0.3 ELSE 0.0 END \
         )) AS similarity \
         FROM chunks \
         WHERE knowledge_base_id = $1 \
           AND (to_tsvector('english', content) @@ plainto_tsquery('english', $2) OR content ILIKE $3){predicate_tail} \
         ORDER BY similarity DESC \
         LIMIT $4"
    );

    let mut query = sqlx::query_as::<_, SearchHitRow>(&sql)
        .bind(knowledge_base_id)
        .bind(query_text)
        .bind(ilike_pattern)
        .bind(k);
    for arg in args {
        query = query.bind(arg);
    }

    let rows = query.fetch_all(pool).await?;
    Ok(rows.into_iter().map(SearchHit::from).collect())
}

/// **SearchChunksHybrid, `mode = "hybrid"`**: a vector CTE and a text CTE,
/// blended as `w_s * vectorSim + w_k * textRank + (matched ? keywordBoost : 0)`,
/// filtered by `final >= tau`, ordered by `final` desc, limited to `k`.
#[allow(clippy::too_many_arguments)]
pub async fn search_hybrid(
    pool: &PgPool,
    knowledge_base_id: Uuid,
    query_vector: Vec<f32>,
    query_text: &str,
    tau: f64,
    k: i64,
    semantic_weight: f64,
    keyword_boost: f64,
    user_id: Option<&str>,
    filter: Option<&Group>,
) -> Result<Vec<SearchHit>, KBError> {
    let keyword_weight = 1.0 - semantic_weight;
    let (predicate_tail, args, _next) = compile_predicates(10, user_id, filter)?;
    let ilike_pattern = format!("%{query_text}%");

    let sql = format!(
        "WITH vector_cte AS ( \
            SELECT id, document_id, knowledge_base_id, content, chunk_index, metadata, \
                   (1 - (embedding <=> $2)) AS vector_sim \
            FROM chunks WHERE knowledge_base_id = $1{predicate_tail} \
         ), \
         text_cte AS ( \
            SELECT id, \
                   LEAST(1.0, GREATEST(ts_rank_cd(to_tsvector('english', content), plainto_tsquery('english', $3)), 0.0)) AS text_rank, \
                   (content ILIKE $4) AS matched \
            FROM chunks WHERE knowledge_base_id = $1{predicate_tail} \
         ) \
         SELECT v.id, v.document_id, v.knowledge_base_id, v.content, v.chunk_index, v.metadata, \
                ($5 * v.vector_sim + $6 * COALESCE(t.text_rank, 0) + \
                 CASE WHEN COALESCE(t.matched, false) THEN $7 ELSE 0 END) AS similarity \
         FROM vector_cte v LEFT JOIN text_cte t ON v.id = t.id \
         WHERE ($5 * v.vector_sim + $6 * COALESCE(t.text_rank, 0) + \
                CASE WHEN COALESCE(t.matched, false) THEN $7 ELSE 0 END) >= $8 \
         ORDER BY similarity DESC \
         LIMIT $9"
    );

    let mut query = sqlx::query_as::<_, SearchHitRow>(&sql)
        .bind(knowledge_base_id)
        .bind(pgvector::Vector::from(query_vector))
        .bind(query_text)
        .bind(ilike_pattern)
        .bind(semantic_weight)
        .bind(keyword_weight)
        .bind(keyword_boost)
        .bind(tau)
        .bind(k);
    for arg in args {
        query = query.bind(arg);
    }

    let rows = query.fetch_all(pool).await?;
    Ok(rows.into_iter().map(SearchHit::from).collect())
}
