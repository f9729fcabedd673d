#![deny(missing_docs)]
//! Hybrid semantic/keyword/graph-boosted retrieval orchestration (spec
//! §4.4 "Retriever").
//!
//! `fluxbase-kb::search` owns the raw SQL primitives (`search_semantic`,
//! `search_keyword`, `search_hybrid`); this crate is the orchestration
//! layer on top: it turns a query string into a query vector via
//! `fluxbase-embedding`, picks and blends primitives per the documented
//! mode switch and score formulas, applies the graph-boost rescoring
//! pass, and fans a search out across a bot's linked knowledge bases.

mod entity;
mod graph_boost;

pub use entity::{EntityExtractor, NaiveEntityExtractor};

use fluxbase_embedding::{EmbeddingError, EmbeddingProvider, EmbeddingService};
use fluxbase_filter::Group;
use fluxbase_kb::{KBError, KBStore, KnowledgeGraph, SearchHit};
use thiserror::Error;
use uuid::Uuid;

/// Errors from retrieval orchestration.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RetrieverError {
    /// The embedding provider failed to vectorize the query text.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    /// A KB store/search/graph operation failed.
    #[error("knowledge base error: {0}")]
    KnowledgeBase(#[from] KBError),
}

/// `SearchChunksHybrid`'s three-way mode switch (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Vector cosine similarity only.
    Semantic,
    /// `ts_rank_cd` full-text rank, unioned with an `ILIKE` fallback.
    Keyword,
    /// Blended vector + text score with an additional keyword-match boost.
    Hybrid,
}

/// Tuning knobs for [`SearchMode::Hybrid`], defaulting per spec §4.4.
#[derive(Debug, Clone, Copy)]
pub struct HybridWeights {
    /// Weight on the vector similarity term. `keyword_weight = 1 - semantic_weight`.
    pub semantic_weight: f64,
    /// Additive bonus when a chunk also matches the keyword side.
    pub keyword_boost: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            semantic_weight: fluxbase_kb::DEFAULT_SEMANTIC_WEIGHT,
            keyword_boost: fluxbase_kb::DEFAULT_KEYWORD_BOOST,
        }
    }
}

/// One search result, tagged with the originating KB when it was produced
/// by a multi-KB fan-out (spec §4.4 "SearchChatbotKnowledge ... tag
/// results with KB name").
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    /// The underlying hit.
    pub hit: SearchHit,
    /// Name of the knowledge base this hit came from, when known.
    pub knowledge_base_name: Option<String>,
}

/// Orchestrates `fluxbase-kb`'s search primitives behind the public
/// entry points spec §4.4 names.
pub struct Retriever<P: EmbeddingProvider> {
    kb: KBStore,
    graph: KnowledgeGraph,
    embeddings: EmbeddingService<P>,
}

impl<P: EmbeddingProvider> Retriever<P> {
    /// Build a retriever over a shared KB store, graph accessor, and
    /// embedding service.
    pub fn new(kb: KBStore, graph: KnowledgeGraph, embeddings: EmbeddingService<P>) -> Self {
        Self { kb, graph, embeddings }
    }

    async fn embed_query(&self, query: &str, model: Option<&str>) -> Result<Vec<f32>, RetrieverError> {
        Ok(self.embeddings.embed_single(query, model).await?)
    }

    /// **SearchChunks (semantic)** — spec §4.4.
    pub async fn search_chunks(
        &self,
        knowledge_base_id: Uuid,
        query: &str,
        tau: f64,
        k: i64,
        user_id: Option<&str>,
        filter: Option<&Group>,
        model: Option<&str>,
    ) -> Result<Vec<SearchHit>, RetrieverError> {
        let vector = self.embed_query(query, model).await?;
        Ok(fluxbase_kb::search::search_semantic(
            self.kb.pool(),
            knowledge_base_id,
            vector,
            tau,
            k,
            user_id,
            filter,
        )
        .await?)
    }

    /// **SearchChunksHybrid** — spec §4.4's mode switch. `semantic` and
    /// `keyword` delegate to their single-signal primitive; `hybrid` blends
    /// both per [`HybridWeights`].
    pub async fn search_chunks_hybrid(
        &self,
        knowledge_base_id: Uuid,
        query: &str,
        mode: SearchMode,
        tau: f64,
        k: i64,
        weights: HybridWeights,
        user_id: Option<&str>,
        filter: Option<&Group>,
        model: Option<&str>,
    ) -> Result<Vec<SearchHit>, RetrieverError> {
        match mode {
            SearchMode::Semantic => {
                self.search_chunks(knowledge_base_id, query, tau, k, user_id, filter, model)
                    .await
            }
            SearchMode::Keyword => Ok(fluxbase_kb::search::search_keyword(
                self.kb.pool(),
                knowledge_base_id,
                query,
                k,
                user_id,
                filter,
            )
            .await?),
            SearchMode::Hybrid => {
                let vector = self.embed_query(query, model).await?;
                Ok(fluxbase_kb::search::search_hybrid(
                    self.kb.pool(),
                    knowledge_base_id,
                    vector,
                    query,
                    tau,
                    k,
                    weights.semantic_weight,
                    weights.keyword_boost,
                    user_id,
                    filter,
                )
                .await?)
            }
        }
    }

    /// **SearchChunksWithGraphBoost** — spec §4.4. Runs semantic search with
    /// `k' = clamp(3k, 10, 100)`, extracts entities from `query` via
    /// `extractor`, accumulates per-document salience for KB entities whose
    /// canonical name matches an extracted one, and rescores as
    /// `(1 - beta) * vector_sim + beta * normalized_salience`. Degrades to
    /// the semantic top-`k` when `beta == 0.0` or no entities are
    /// extractable.
    pub async fn search_chunks_with_graph_boost(
        &self,
        knowledge_base_id: Uuid,
        query: &str,
        tau: f64,
        k: i64,
        beta: f64,
        extractor: &dyn EntityExtractor,
        user_id: Option<&str>,
        filter: Option<&Group>,
        model: Option<&str>,
    ) -> Result<Vec<SearchHit>, RetrieverError> {
        let expanded_k = (3 * k).clamp(10, 100);
        let mut hits = self
            .search_chunks(knowledge_base_id, query, tau, expanded_k, user_id, filter, model)
            .await?;

        let entity_names = extractor.extract(query);
        if beta <= 0.0 || entity_names.is_empty() {
            hits.truncate(k.max(0) as usize);
            return Ok(hits);
        }

        let salience = graph_boost::accumulate_salience(&self.graph, knowledge_base_id, &entity_names).await?;
        graph_boost::rescore(&mut hits, &salience, beta);
        hits.truncate(k.max(0) as usize);
        Ok(hits)
    }

    /// **SearchChatbotKnowledge** — spec §4.4. Enumerates `links` (already
    /// filtered to enabled ones by the caller), resolving each KB by
    /// `(namespace, name)`, applying per-link `max_chunks`/
    /// `similarity_threshold` overrides, and tagging each hit with the
    /// KB's name.
    pub async fn search_chatbot_knowledge(
        &self,
        namespace: &str,
        links: &[KnowledgeBaseLink],
        query: &str,
        mode: SearchMode,
        weights: HybridWeights,
        user_id: Option<&str>,
        filter: Option<&Group>,
        model: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>, RetrieverError> {
        let mut combined = Vec::new();
        for link in links {
            if !link.enabled {
                continue;
            }
            let kb = self.kb.get_knowledge_base_by_name(namespace, &link.name).await?;
            let k = link.max_chunks.unwrap_or(DEFAULT_CHATBOT_MAX_CHUNKS) as i64;
            let tau = link.similarity_threshold.unwrap_or(DEFAULT_CHATBOT_SIMILARITY_THRESHOLD);

            let hits = self
                .search_chunks_hybrid(kb.id, query, mode, tau, k, weights, user_id, filter, model)
                .await?;

            combined.extend(hits.into_iter().map(|hit| RetrievedChunk {
                hit,
                knowledge_base_name: Some(kb.name.clone()),
            }));
        }
        Ok(combined)
    }
}

/// Default per-link chunk cap when a bot's KB link doesn't override it
/// (spec §4.4 "SearchChatbotKnowledge").
pub const DEFAULT_CHATBOT_MAX_CHUNKS: u32 = 5;
/// Default per-link similarity floor when a bot's KB link doesn't override
/// it.
pub const DEFAULT_CHATBOT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// One bot-to-KB link, with the per-link overrides spec §4.4 describes.
/// `fluxbase-botconfig::ChatbotConfig` only carries flat KB names plus one
/// global `RagParams`; callers that want genuinely per-KB overrides build
/// a `Vec<KnowledgeBaseLink>` explicitly (e.g. from a `chatbot_knowledge_bases`
/// join row) rather than from the config type alone.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseLink {
    /// The KB's display name, resolved against the caller's namespace.
    pub name: String,
    /// Whether this link is currently active.
    pub enabled: bool,
    /// Overrides spec §4.4's default of 5.
    pub max_chunks: Option<u32>,
    /// Overrides spec §4.4's default of 0.7.
    pub similarity_threshold: Option<f64>,
}

impl KnowledgeBaseLink {
    /// Build an enabled link with no per-link overrides — the shape
    /// produced from a bare `ChatbotConfig.knowledge_bases` name list.
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            max_chunks: None,
            similarity_threshold: None,
        }
    }

    /// Build the link list for a bot's flat KB name list, applying its
    /// (bot-wide, not per-link) `RagParams` overrides uniformly.
    pub fn from_bot_config(
        knowledge_bases: &[String],
        max_chunks: Option<u32>,
        similarity_threshold: Option<f64>,
    ) -> Vec<Self> {
        knowledge_bases
            .iter()
            .map(|name| Self {
                name: name.clone(),
                enabled: true,
                max_chunks,
                similarity_threshold,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_from_bot_config_apply_overrides_uniformly() {
        let links = KnowledgeBaseLink::from_bot_config(
            &["docs".to_string(), "faq".to_string()],
            Some(3),
            Some(0.8),
        );
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.enabled));
        assert!(links.iter().all(|l| l.max_chunks == Some(3)));
        assert!(links.iter().all(|l| l.similarity_threshold == Some(0.8)));
    }

    #[test]
    fn default_constants_match_spec() {
        assert_eq!(DEFAULT_CHATBOT_MAX_CHUNKS, 5);
        assert_eq!(DEFAULT_CHATBOT_SIMILARITY_THRESHOLD, 0.7);
    }
}
