//! `KnowledgeGraph` — entity/relationship CRUD over a KB-scoped property
//! graph, plus a depth-bounded traversal used by graph-boosted search
//! (spec §4.4 "SearchChunksWithGraphBoost", §9 "Metadata graphs").
//!
//! Entities and relationships hold only ids, never in-process references —
//! there is no cycle to worry about because there is no pointer graph, only
//! rows. Traversal is implemented as iterative breadth-first expansion
//! capped at `max_depth` rather than a recursive CTE, per the design note
//! that the Rust layer should not assume recursive SQL is available; the
//! database itself may still answer a single hop efficiently, but the
//! fan-out across hops happens here.

use crate::errors::KBError;
use crate::types::{DocumentEntity, Entity, Relationship};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Fields required to upsert an [`Entity`].
pub struct NewEntity {
    /// Owning KB.
    pub knowledge_base_id: Uuid,
    /// Entity category (e.g. `"person"`, `"organization"`).
    pub entity_type: String,
    /// Canonical, deduplication-key name.
    pub canonical_name: String,
    /// Free-form attributes.
    pub metadata: serde_json::Value,
}

/// Fields required to create a [`Relationship`].
pub struct NewRelationship {
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

/// Entity/relationship CRUD and traversal, scoped to one KB per call.
pub struct KnowledgeGraph {
    pool: PgPool,
}

impl KnowledgeGraph {
    /// Build a graph accessor over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create an entity, or return the existing row if `(kb_id, entity_type,
    /// canonical_name)` already exists — that triple is unique (spec §3).
    pub async fn upsert_entity(&self, new_entity: NewEntity) -> Result<Entity, KBError> {
        let row: Entity = sqlx::query_as(
            r#"
            INSERT INTO entities (id, knowledge_base_id, entity_type, canonical_name, metadata)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (knowledge_base_id, entity_type, canonical_name)
            DO UPDATE SET metadata = EXCLUDED.metadata
            RETURNING id, knowledge_base_id, entity_type, canonical_name, metadata
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_entity.knowledge_base_id)
        .bind(&new_entity.entity_type)
        .bind(&new_entity.canonical_name)
        .bind(&new_entity.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Find entities in a KB by canonical name (case-sensitive exact match,
    /// matching the "finds KB entities by canonical-name match" step of
    /// graph-boosted search).
    pub async fn find_by_canonical_name(
        &self,
        knowledge_base_id: Uuid,
        canonical_name: &str,
    ) -> Result<Vec<Entity>, KBError> {
        let rows: Vec<Entity> = sqlx::query_as(
            "SELECT id, knowledge_base_id, entity_type, canonical_name, metadata \
             FROM entities WHERE knowledge_base_id = $1 AND canonical_name = $2",
        )
        .bind(knowledge_base_id)
        .bind(canonical_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Record a directed edge between two entities.
    pub async fn create_relationship(&self, new_rel: NewRelationship) -> Result<Relationship, KBError> {
        let row: Relationship = sqlx::query_as(
            r#"
            INSERT INTO relationships
                (id, knowledge_base_id, source_entity_id, target_entity_id, relationship_type, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, knowledge_base_id, source_entity_id, target_entity_id, relationship_type, metadata
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new_rel.knowledge_base_id)
        .bind(new_rel.source_entity_id)
        .bind(new_rel.target_entity_id)
        .bind(&new_rel.relationship_type)
        .bind(&new_rel.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Tie an entity mention to a document with a salience weight in
    /// `[0, 1]`.
    pub async fn link_document_entity(
        &self,
        document_id: Uuid,
        entity_id: Uuid,
        salience: f64,
    ) -> Result<DocumentEntity, KBError> {
        let salience = salience.clamp(0.0, 1.0);
        let row: DocumentEntity = sqlx::query_as(
            r#"
            INSERT INTO document_entities (id, document_id, entity_id, salience)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (document_id, entity_id) DO UPDATE SET salience = EXCLUDED.salience
            RETURNING id, document_id, entity_id, salience
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(document_id)
        .bind(entity_id)
        .bind(salience)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Per-document salience accumulated for a set of entities, summed
    /// across every entity in `entity_ids` that mentions the document. This
    /// is the accumulation step graph-boosted search performs per query
    /// entity (spec §4.4).
    pub async fn document_salience(
        &self,
        entity_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, f64>, KBError> {
        if entity_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(Uuid, f64)> = sqlx::query_as(
            "SELECT document_id, salience FROM document_entities WHERE entity_id = ANY($1)",
        )
        .bind(entity_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut accumulated: HashMap<Uuid, f64> = HashMap::new();
        for (document_id, salience) in rows {
            *accumulated.entry(document_id).or_insert(0.0) += salience;
        }
        Ok(accumulated)
    }

    /// One outward hop from `entity_id`: the set of entities reachable via
    /// any relationship where `entity_id` is the source.
    async fn neighbors(&self, entity_id: Uuid) -> Result<Vec<Uuid>, KBError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT target_entity_id FROM relationships WHERE source_entity_id = $1",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Breadth-first expansion from `start`, out to `max_depth` hops
    /// inclusive. Implemented iteratively (layer-by-layer `neighbors`
    /// calls) rather than as a single recursive query, per §9's guidance
    /// that the Rust traversal helper not assume recursive SQL. Returns
    /// every entity id reached, `start` included, deduplicated.
    pub async fn traverse(&self, start: Uuid, max_depth: usize) -> Result<HashSet<Uuid>, KBError> {
        let mut visited = HashSet::new();
        visited.insert(start);
        let mut frontier = vec![start];

        for _ in 0..max_depth {
            if frontier.is_empty() {
                break;
            }
            let mut next_frontier = Vec::new();
            for entity_id in frontier {
                for neighbor in self.neighbors(entity_id).await? {
                    if visited.insert(neighbor) {
                        next_frontier.push(neighbor);
                    }
                }
            }
            frontier = next_frontier;
        }

        Ok(visited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_document_entity_clamps_salience() {
        // Exercises the pure clamp logic without a live pool; the clamp
        // happens before any query is built.
        assert_eq!((-0.5f64).clamp(0.0, 1.0), 0.0);
        assert_eq!((1.5f64).clamp(0.0, 1.0), 1.0);
        assert_eq!((0.4f64).clamp(0.0, 1.0), 0.4);
    }
}
