//! Adapts `fluxbase-retriever::Retriever` into `fluxbase-executor`'s
//! [`RetrievalSource`] seam, so a bot's `knowledge_bases` list drives
//! `SearchChatbotKnowledge` (spec §4.4) without the executor depending on
//! Postgres or the retriever crate directly.

use async_trait::async_trait;
use fluxbase_botconfig::ChatbotConfig;
use fluxbase_embedding::EmbeddingProvider;
use fluxbase_executor::retrieval::{RetrievalSource, RetrievedContext};
use fluxbase_executor::ExecutorError;
use fluxbase_retriever::{HybridWeights, KnowledgeBaseLink, Retriever, SearchMode};

/// A [`RetrievalSource`] backed by a live [`Retriever`], searching in
/// `mode` (hybrid by default, per spec §4.8 step 4) across whichever KBs
/// `ChatbotConfig.knowledge_bases` names.
pub struct ChatbotKnowledgeRetrieval<P: EmbeddingProvider> {
    retriever: Retriever<P>,
    mode: SearchMode,
}

impl<P: EmbeddingProvider> ChatbotKnowledgeRetrieval<P> {
    /// Wrap a retriever for hybrid search.
    pub fn new(retriever: Retriever<P>) -> Self {
        Self { retriever, mode: SearchMode::Hybrid }
    }

    /// Use a non-default search mode (e.g. semantic-only).
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }
}

#[async_trait]
impl<P: EmbeddingProvider> RetrievalSource for ChatbotKnowledgeRetrieval<P> {
    async fn retrieve(
        &self,
        config: &ChatbotConfig,
        query: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<RetrievedContext>, ExecutorError> {
        if config.knowledge_bases.is_empty() {
            return Ok(Vec::new());
        }

        let links: Vec<KnowledgeBaseLink> = KnowledgeBaseLink::from_bot_config(
            &config.knowledge_bases,
            config.rag_params.max_chunks,
            config.rag_params.similarity_threshold,
        );

        let hits = self
            .retriever
            .search_chatbot_knowledge(
                &config.namespace,
                &links,
                query,
                self.mode,
                HybridWeights::default(),
                user_id,
                None,
                None,
            )
            .await
            .map_err(|e| ExecutorError::Retrieval(e.to_string()))?;

        Ok(hits
            .into_iter()
            .map(|chunk| RetrievedContext {
                knowledge_base_name: chunk.knowledge_base_name,
                content: chunk.hit.content,
                similarity: chunk.hit.similarity,
            })
            .collect())
    }
}
