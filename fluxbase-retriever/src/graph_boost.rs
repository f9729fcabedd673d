//! Salience accumulation and rescoring for
//! [`crate::Retriever::search_chunks_with_graph_boost`] (spec §4.4).

use crate::RetrieverError;
use fluxbase_kb::{KnowledgeGraph, SearchHit};
use std::collections::HashMap;
use uuid::Uuid;

/// For each extracted entity name, find KB entities with a matching
/// canonical name and sum their per-document salience (spec §4.4: "for
/// each query entity finds KB entities by canonical-name match and
/// accumulates salience per document").
pub(crate) async fn accumulate_salience(
    graph: &KnowledgeGraph,
    knowledge_base_id: Uuid,
    entity_names: &[String],
) -> Result<HashMap<Uuid, f64>, RetrieverError> {
    let mut entity_ids = Vec::new();
    for name in entity_names {
        let entities = graph.find_by_canonical_name(knowledge_base_id, name).await?;
        entity_ids.extend(entities.into_iter().map(|e| e.id));
    }
    Ok(graph.document_salience(&entity_ids).await?)
}

/// Rescore `hits` as `(1 - beta) * vector_sim + beta * normalized_salience`
/// and re-sort descending. Salience is normalized by the maximum
/// accumulated salience across `hits`' documents so it sits in `[0, 1]`
/// before blending, per spec §4.4's "normalizedSalience".
pub(crate) fn rescore(hits: &mut [SearchHit], salience: &HashMap<Uuid, f64>, beta: f64) {
    let max_salience = hits
        .iter()
        .filter_map(|h| salience.get(&h.document_id))
        .cloned()
        .fold(0.0_f64, f64::max);

    for hit in hits.iter_mut() {
        let raw = salience.get(&hit.document_id).copied().unwrap_or(0.0);
        let normalized = if max_salience > 0.0 { raw / max_salience } else { 0.0 };
        hit.similarity = (1.0 - beta) * hit.similarity + beta * normalized;
    }

    hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
}
