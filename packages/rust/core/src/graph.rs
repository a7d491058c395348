//! Relationship graph and id resolution.
//!
//! The graph is undirected: enrichment never cares which side of a
//! relationship an object was on. It is built once per run from the full
//! relationship set and is read-only afterwards.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, instrument};

use stixfeed_shared::{ObjectKind, ObjectsByKind, RawObject, Result};

// ---------------------------------------------------------------------------
// ObjectGraph
// ---------------------------------------------------------------------------

/// Adjacency mapping: object id → ids one relationship edge away.
///
/// Symmetric: if `b` is a neighbour of `a`, `a` is a neighbour of `b`.
/// Neighbour sets are ordered so that enrichment output is deterministic.
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    adjacency: HashMap<String, BTreeSet<String>>,
}

impl ObjectGraph {
    /// Build the graph from relationship records.
    ///
    /// Records missing `source_ref` or `target_ref` are skipped.
    #[instrument(skip_all, fields(relationships = relationships.len()))]
    pub fn build(relationships: &[RawObject]) -> Self {
        let mut graph = Self::default();
        let mut skipped = 0usize;

        for relationship in relationships {
            match (&relationship.source_ref, &relationship.target_ref) {
                (Some(source), Some(target)) => graph.insert_edge(source, target),
                _ => {
                    debug!(id = %relationship.id, "relationship without both endpoints, skipping");
                    skipped += 1;
                }
            }
        }

        debug!(nodes = graph.adjacency.len(), skipped, "relationship graph built");
        graph
    }

    fn insert_edge(&mut self, source: &str, target: &str) {
        self.adjacency
            .entry(source.to_string())
            .or_default()
            .insert(target.to_string());
        self.adjacency
            .entry(target.to_string())
            .or_default()
            .insert(source.to_string());
    }

    /// Ids related to `id` by exactly one edge. Empty for unknown ids.
    pub fn neighbors<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a str> + use<'a> {
        self.adjacency
            .get(id)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Whether an edge joins `a` and `b`, in either direction.
    pub fn is_related(&self, a: &str, b: &str) -> bool {
        self.adjacency.get(a).is_some_and(|set| set.contains(b))
    }

    /// Number of objects with at least one edge.
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ObjectIndex
// ---------------------------------------------------------------------------

/// Resolves object ids to records across every non-relationship kind.
#[derive(Debug, Default)]
pub struct ObjectIndex<'a> {
    by_id: HashMap<&'a str, &'a RawObject>,
}

impl<'a> ObjectIndex<'a> {
    /// Index reports, indicators, malware, campaigns and attack patterns.
    pub fn build(objects: &'a ObjectsByKind) -> Result<Self> {
        let mut by_id = HashMap::new();
        for kind in ObjectKind::ALL {
            if kind == ObjectKind::Relationship {
                continue;
            }
            for object in objects.get(kind)? {
                by_id.insert(object.id.as_str(), object);
            }
        }
        Ok(Self { by_id })
    }

    /// The record behind `id`, or `None` for a dangling reference.
    pub fn get(&self, id: &str) -> Option<&'a RawObject> {
        self.by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn relationship(id: &str, source: &str, target: &str) -> RawObject {
        RawObject::try_from(json!({
            "type": "relationship",
            "id": id,
            "source_ref": source,
            "target_ref": target,
        }))
        .unwrap()
    }

    #[test]
    fn edges_are_symmetric() {
        let rels = vec![
            relationship("relationship--1", "indicator--x", "malware--y"),
            relationship("relationship--2", "malware--y", "campaign--z"),
            relationship("relationship--3", "indicator--x", "attack-pattern--t"),
        ];
        let graph = ObjectGraph::build(&rels);

        for rel in &rels {
            let source = rel.source_ref.as_deref().unwrap();
            let target = rel.target_ref.as_deref().unwrap();
            assert!(graph.is_related(source, target));
            assert!(graph.is_related(target, source));
        }

        let around_y: Vec<&str> = graph.neighbors("malware--y").collect();
        assert_eq!(around_y, vec!["campaign--z", "indicator--x"]);
        assert_eq!(graph.node_count(), 4);
    }

    #[test]
    fn duplicate_edges_collapse() {
        let rels = vec![
            relationship("relationship--1", "indicator--x", "malware--y"),
            relationship("relationship--2", "malware--y", "indicator--x"),
        ];
        let graph = ObjectGraph::build(&rels);
        assert_eq!(graph.neighbors("indicator--x").count(), 1);
    }

    #[test]
    fn incomplete_relationship_is_skipped() {
        let rel = RawObject::try_from(json!({
            "type": "relationship",
            "id": "relationship--half",
            "source_ref": "indicator--x",
        }))
        .unwrap();
        let graph = ObjectGraph::build(&[rel]);
        assert!(graph.is_empty());
    }

    #[test]
    fn unknown_id_has_no_neighbors() {
        let graph = ObjectGraph::build(&[]);
        assert_eq!(graph.neighbors("indicator--nobody").count(), 0);
    }

    #[test]
    fn index_excludes_relationships() {
        let objects = ObjectsByKind::from_objects(vec![
            relationship("relationship--1", "indicator--x", "malware--y"),
            RawObject::try_from(json!({ "type": "malware", "id": "malware--y", "name": "Y" }))
                .unwrap(),
        ]);
        let index = ObjectIndex::build(&objects).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("malware--y").and_then(|o| o.name.as_deref()), Some("Y"));
        assert!(index.get("relationship--1").is_none());
    }
}
