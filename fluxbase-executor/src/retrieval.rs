//! The retrieval capability seam (spec §4.8 step 4: "If the bot has
//! linked KBs, invoke Retriever ... and prepend retrieval context").
//!
//! The Executor doesn't depend on `fluxbase-retriever`/Postgres directly —
//! per spec §9's polymorphism note, it holds retrieval as a typed
//! capability value. A caller wires a `fluxbase-retriever::Retriever`
//! (or a mock, in tests) behind this trait.

use async_trait::async_trait;
use fluxbase_botconfig::ChatbotConfig;

/// One piece of retrieved context, ready to prepend to the message list.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    /// Name of the knowledge base this came from, when known.
    pub knowledge_base_name: Option<String>,
    /// The chunk's text.
    pub content: String,
    /// The chunk's final similarity/score for this search.
    pub similarity: f64,
}

/// A source of grounded context for a chat turn.
#[async_trait]
pub trait RetrievalSource: Send + Sync {
    /// Run whatever search the bot is configured for (hybrid by default,
    /// graph-boosted if configured) and return ranked context chunks.
    async fn retrieve(
        &self,
        config: &ChatbotConfig,
        query: &str,
        user_id: Option<&str>,
    ) -> Result<Vec<RetrievedContext>, crate::ExecutorError>;
}

/// A retrieval source with nothing linked — always returns no context.
/// The default for bots with an empty `knowledge_bases` list.
pub struct NoRetrieval;

#[async_trait]
impl RetrievalSource for NoRetrieval {
    async fn retrieve(
        &self,
        _config: &ChatbotConfig,
        _query: &str,
        _user_id: Option<&str>,
    ) -> Result<Vec<RetrievedContext>, crate::ExecutorError> {
        Ok(Vec::new())
    }
}

/// Render retrieved chunks into the single system message the Executor
/// prepends ahead of conversation history (spec §4.8 step 4).
pub fn render_context_message(chunks: &[RetrievedContext]) -> String {
    if chunks.is_empty() {
        return String::new();
    }
    let mut out = String::from("Relevant context:\n");
    for (i, chunk) in chunks.iter().enumerate() {
        let source = chunk.knowledge_base_name.as_deref().unwrap_or("knowledge base");
        out.push_str(&format!("[{}] ({source}, similarity {:.2}): {}\n", i + 1, chunk.similarity, chunk.content));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_chunks_render_empty_message() {
        assert_eq!(render_context_message(&[]), "");
    }

    #[test]
    fn renders_numbered_context_with_source_tag() {
        let chunks = vec![RetrievedContext {
            knowledge_base_name: Some("docs".to_string()),
            content: "Italian cuisine uses olive oil.".to_string(),
            similarity: 0.87,
        }];
        let rendered = render_context_message(&chunks);
        assert!(rendered.contains("[1] (docs, similarity 0.87)"));
        assert!(rendered.contains("Italian cuisine"));
    }
}
