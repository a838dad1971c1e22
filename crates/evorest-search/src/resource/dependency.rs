//! Relations between resources, learned during the search.
//!
//! Nodes are resource keys (their path). An edge `a -> b` reads "a depends
//! on b". Mutual relations (two resources sharing a table) are stored in
//! both directions; a self relation is a loop.

use std::collections::{BTreeSet, HashMap};

use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationKind {
    /// Both resources touch the same tables.
    Mutual { tables: BTreeSet<String> },
    /// Observed through structural mutations; lists the mutation kinds.
    DependsOn { mutations: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub probability: f64,
}

/// One row of the exported edge list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub kind: String,
    pub probability: f64,
    /// Tables for mutual relations, `;`-joined mutation kinds otherwise.
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: StableGraph<String, Relation, Directed, u32>,
    nodes: HashMap<String, NodeIndex<u32>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, key: &str) -> NodeIndex<u32> {
        if let Some(idx) = self.nodes.get(key) {
            return *idx;
        }
        let idx = self.graph.add_node(key.to_string());
        self.nodes.insert(key.to_string(), idx);
        idx
    }

    fn find_edge(&self, from: &str, to: &str, mutual: bool) -> Option<petgraph::graph::EdgeIndex<u32>> {
        let (a, b) = (*self.nodes.get(from)?, *self.nodes.get(to)?);
        self.graph
            .edges_connecting(a, b)
            .find(|e| matches!(e.weight().kind, RelationKind::Mutual { .. }) == mutual)
            .map(|e| e.id())
    }

    /// Records that `a` and `b` share `table`.
    pub fn add_mutual(&mut self, a: &str, b: &str, table: &str, probability: f64) {
        if a == b {
            return;
        }
        for (from, to) in [(a, b), (b, a)] {
            if let Some(e) = self.find_edge(from, to, true) {
                if let Some(rel) = self.graph.edge_weight_mut(e) {
                    if let RelationKind::Mutual { tables } = &mut rel.kind {
                        tables.insert(table.to_string());
                    }
                    rel.probability = rel.probability.max(probability);
                }
                continue;
            }
            let (x, y) = (self.node(from), self.node(to));
            self.graph.add_edge(
                x,
                y,
                Relation {
                    kind: RelationKind::Mutual {
                        tables: [table.to_string()].into(),
                    },
                    probability,
                },
            );
        }
    }

    /// Records that `dependent` depends on `dependency`, as shown by a
    /// `mutation`. An existing relation takes the new probability and
    /// remembers the mutation kind.
    pub fn record_dependency_edge(
        &mut self,
        dependent: &str,
        dependency: &str,
        mutation: &str,
        probability: f64,
    ) {
        if let Some(e) = self.find_edge(dependent, dependency, false) {
            if let Some(rel) = self.graph.edge_weight_mut(e) {
                rel.probability = probability;
                if let RelationKind::DependsOn { mutations } = &mut rel.kind {
                    mutations.push(mutation.to_string());
                }
            }
            return;
        }
        let (x, y) = (self.node(dependent), self.node(dependency));
        self.graph.add_edge(
            x,
            y,
            Relation {
                kind: RelationKind::DependsOn {
                    mutations: vec![mutation.to_string()],
                },
                probability,
            },
        );
        tracing::debug!(dependent, dependency, mutation, "new resource dependency");
    }

    /// Resources `key` depends on or shares tables with, with the relation
    /// probability. Self relations included.
    pub fn related(&self, key: &str) -> Vec<(String, f64)> {
        let Some(idx) = self.nodes.get(key) else {
            return Vec::new();
        };
        let mut out: Vec<(String, f64)> = Vec::new();
        for e in self.graph.edges_directed(*idx, Direction::Outgoing) {
            let other = self.graph[e.target()].clone();
            match out.iter_mut().find(|(k, _)| *k == other) {
                Some(existing) => existing.1 = existing.1.max(e.weight().probability),
                None => out.push((other, e.weight().probability)),
            }
        }
        out
    }

    pub fn has_relations(&self, key: &str) -> bool {
        self.nodes
            .get(key)
            .is_some_and(|idx| self.graph.edges_directed(*idx, Direction::Outgoing).next().is_some())
    }

    pub fn relation(&self, from: &str, to: &str) -> Option<&Relation> {
        let e = self
            .find_edge(from, to, false)
            .or_else(|| self.find_edge(from, to, true))?;
        self.graph.edge_weight(e)
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Weighted edge list, sorted for stable output.
    pub fn export(&self) -> Vec<DependencyEdge> {
        let mut out: Vec<DependencyEdge> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = self.graph.edge_endpoints(e)?;
                let rel = self.graph.edge_weight(e)?;
                let (from, to) = (self.graph[a].clone(), self.graph[b].clone());
                let (kind, detail) = match &rel.kind {
                    RelationKind::Mutual { tables } => (
                        "mutual",
                        tables.iter().cloned().collect::<Vec<_>>().join(";"),
                    ),
                    RelationKind::DependsOn { mutations } if from == to => {
                        ("self", mutations.join(";"))
                    }
                    RelationKind::DependsOn { mutations } => ("depends_on", mutations.join(";")),
                };
                Some(DependencyEdge {
                    from,
                    to,
                    kind: kind.to_string(),
                    probability: rel.probability,
                    detail,
                })
            })
            .collect();
        out.sort_by(|x, y| (&x.from, &x.to, &x.kind).cmp(&(&y.from, &y.to, &y.kind)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutual_relation_is_symmetric_and_accumulates_tables() {
        let mut g = DependencyGraph::new();
        g.add_mutual("/orders", "/items", "ORDERS", 0.7);
        g.add_mutual("/items", "/orders", "ITEMS", 0.9);
        assert_eq!(g.edge_count(), 2);
        let rel = g.relation("/orders", "/items").unwrap();
        assert_eq!(rel.probability, 0.9);
        assert_eq!(
            rel.kind,
            RelationKind::Mutual {
                tables: ["ITEMS".to_string(), "ORDERS".to_string()].into()
            }
        );
        g.add_mutual("/orders", "/orders", "ORDERS", 1.0);
        assert_eq!(g.edge_count(), 2);
    }

    #[test]
    fn test_dependency_edge_update_appends_mutation() {
        let mut g = DependencyGraph::new();
        g.record_dependency_edge("/orders/{id}", "/orders", "ADD", 1.0);
        g.record_dependency_edge("/orders/{id}", "/orders", "DELETE", 0.5);
        assert_eq!(g.edge_count(), 1);
        let exported = g.export();
        assert_eq!(exported[0].kind, "depends_on");
        assert_eq!(exported[0].detail, "ADD;DELETE");
        assert_eq!(exported[0].probability, 0.5);
        assert!(g.has_relations("/orders/{id}"));
        assert!(!g.has_relations("/orders"));
    }

    #[test]
    fn test_self_relation() {
        let mut g = DependencyGraph::new();
        g.record_dependency_edge("/a", "/a", "MODIFY", 0.2);
        assert_eq!(g.related("/a"), vec![("/a".to_string(), 0.2)]);
        assert_eq!(g.export()[0].kind, "self");
    }
}
