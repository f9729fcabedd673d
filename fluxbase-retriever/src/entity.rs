//! Entity extraction capability (spec §9 "Design Notes — Polymorphism":
//! entity extractors are capability interfaces, not a class hierarchy).
//!
//! Graph-boosted search needs *some* way to turn free-text query into
//! candidate canonical entity names; the spec leaves the extraction
//! strategy unspecified beyond "extracts entities from query text". A real
//! deployment would plug in an NLP/NER service here; [`NaiveEntityExtractor`]
//! is the dependency-free default so graph boost is exercisable without one.

/// Recovers candidate entity names from free-text query content.
pub trait EntityExtractor: Send + Sync {
    /// Candidate canonical names mentioned in `query`. Order and
    /// duplication are not significant to callers — [`crate::graph_boost`]
    /// deduplicates before querying.
    fn extract(&self, query: &str) -> Vec<String>;
}

/// Treats capitalized, non-sentence-initial words as candidate proper
/// nouns — a deterministic stand-in for a real named-entity recognizer.
pub struct NaiveEntityExtractor;

impl EntityExtractor for NaiveEntityExtractor {
    fn extract(&self, query: &str) -> Vec<String> {
        let mut candidates = Vec::new();
        let mut at_sentence_start = true;

        for word in query.split_whitespace() {
            let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
            if trimmed.is_empty() {
                continue;
            }
            let starts_upper = trimmed.chars().next().is_some_and(char::is_uppercase);
            if starts_upper && !at_sentence_start && !candidates.contains(&trimmed.to_string()) {
                candidates.push(trimmed.to_string());
            }
            at_sentence_start = word.ends_with(['.', '?', '!']);
        }

        candidates
    }
}
