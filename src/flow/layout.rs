//! Node/edge synthesis and layered placement
//!
//! Every query contributes edges from the relations it reads, through its join
//! nodes, into the node standing for its result (a CTE, a derived table or the
//! relations it writes). Layers are longest-path depths over the graph with
//! cycle-closing edges removed.

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use log::debug;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{depth_first_search, DfsEvent};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::classify::{
    profile_tables, ClassificationOptions, Classifier, CteScopes, RelationKey, TableProfile,
};
use super::{node_id, FlowEdge, FlowGraph, FlowNode, NodeRole, Position};
use crate::sql_engine::model::{ParsedSql, Query, TableReference};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("edge {from} -> {to} references an unknown node")]
    DanglingEdge { from: String, to: String },

    #[error("cycle through {0} survived back-edge removal")]
    Cycle(String),
}

/// Placement settings, loaded from the `layout` config section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutOptions {
    /// Horizontal distance between layers
    pub layer_spacing: f64,
    /// Vertical distance between nodes of one layer
    pub node_spacing: f64,
    /// Give statement queries that write nothing an `OUTPUT` node labelled `result`
    pub result_node: bool,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            layer_spacing: 250.0,
            node_spacing: 100.0,
            result_node: false,
        }
    }
}

/// Lays out `parsed` with the default rules and spacing
pub fn build_flow_graph(parsed: &ParsedSql) -> Result<FlowGraph, LayoutError> {
    FlowLayout::default().layout(parsed)
}

#[derive(Debug, Default)]
pub struct FlowLayout {
    classifier: Classifier,
    options: LayoutOptions,
}

#[derive(Debug, Clone)]
struct NodeDraft {
    label: String,
    role: NodeRole,
    query_id: Option<String>,
}

/// Nodes and edges in first-appearance order
#[derive(Debug, Default)]
struct GraphDraft {
    nodes: IndexMap<String, NodeDraft>,
    edges: IndexSet<(String, String)>,
}

impl GraphDraft {
    fn add_node(&mut self, role: NodeRole, name: &str, label: &str, query_id: Option<&str>) -> String {
        let id = node_id(role, name);
        self.nodes.entry(id.clone()).or_insert_with(|| NodeDraft {
            label: label.to_string(),
            role,
            query_id: query_id.map(str::to_string),
        });
        id
    }

    fn add_edge(&mut self, from: &str, to: &str) {
        if from != to {
            self.edges.insert((from.to_string(), to.to_string()));
        }
    }
}

impl FlowLayout {
    pub fn new(classifier: Classifier, options: LayoutOptions) -> Self {
        Self {
            classifier,
            options,
        }
    }

    pub fn from_options(classification: &ClassificationOptions, options: LayoutOptions) -> Self {
        Self::new(Classifier::new(classification), options)
    }

    pub fn classifier_mut(&mut self) -> &mut Classifier {
        &mut self.classifier
    }

    pub fn layout(&self, parsed: &ParsedSql) -> Result<FlowGraph, LayoutError> {
        let scopes = CteScopes::new(parsed);
        let profiles = profile_tables(parsed, &scopes);
        let roles = profiles
            .iter()
            .map(|(key, profile)| (key.clone(), self.classifier.classify(profile)))
            .collect();
        let relations = Relations {
            scopes,
            profiles,
            roles,
        };

        let mut draft = GraphDraft::default();
        for (index, query) in parsed.all_queries.iter().enumerate() {
            self.add_query(&mut draft, index, query, &relations);
        }
        link_written_relations(&mut draft, parsed, &relations);

        place(draft, &self.options)
    }

    /// Nodes standing for what `query` produces
    fn target_nodes(
        &self,
        draft: &mut GraphDraft,
        index: usize,
        query: &Query,
        relations: &Relations,
    ) -> Vec<String> {
        let query_id = Some(query.id.as_str());
        if query.is_cte {
            let name = relations.scopes.declaration(index, query);
            return vec![draft.add_node(NodeRole::Cte, &name, &query.name, query_id)];
        }
        if query.is_sub_query {
            return vec![draft.add_node(NodeRole::TempTable, &query.id, &query.name, query_id)];
        }
        if !query.outputs.is_empty() {
            return query
                .outputs
                .iter()
                .map(|output| draft.add_node(NodeRole::Output, output, output, query_id))
                .collect();
        }
        if self.options.result_node {
            return vec![draft.add_node(NodeRole::Output, &query.id, "result", query_id)];
        }
        Vec::new()
    }

    fn add_query(
        &self,
        draft: &mut GraphDraft,
        index: usize,
        query: &Query,
        relations: &Relations,
    ) {
        let tables: IndexMap<RelationKey, String> = query
            .tables
            .iter()
            .map(|table| {
                let key = relations.scopes.key_for(index, table);
                let node = relations.node(draft, &key, table);
                (key, node)
            })
            .collect();

        let joined: HashSet<RelationKey> = query
            .joins
            .iter()
            .flat_map(|join| {
                [
                    relations.scopes.key_for(index, &join.left),
                    relations.scopes.key_for(index, &join.right),
                ]
            })
            .collect();

        let join_ids: Vec<String> = query
            .joins
            .iter()
            .enumerate()
            .map(|(position, join)| {
                draft.add_node(
                    NodeRole::Join,
                    &format!("{}#{}", query.id, position),
                    &format!("{} JOIN", join.kind),
                    Some(&query.id),
                )
            })
            .collect();

        let targets = self.target_nodes(draft, index, query, relations);

        for (position, join) in query.joins.iter().enumerate() {
            let continues_chain =
                position > 0 && query.joins[position - 1].left.same_relation(&join.left);
            if continues_chain {
                draft.add_edge(&join_ids[position - 1], &join_ids[position]);
            } else {
                let key = relations.scopes.key_for(index, &join.left);
                let left = relations.node(draft, &key, &join.left);
                draft.add_edge(&left, &join_ids[position]);
            }

            let key = relations.scopes.key_for(index, &join.right);
            let right = relations.node(draft, &key, &join.right);
            draft.add_edge(&right, &join_ids[position]);

            let ends_chain = query
                .joins
                .get(position + 1)
                .map_or(true, |next| !next.left.same_relation(&join.left));
            if ends_chain {
                for target in &targets {
                    draft.add_edge(&join_ids[position], target);
                }
            }
        }

        for (key, node) in &tables {
            if joined.contains(key) {
                continue;
            }
            for target in &targets {
                draft.add_edge(node, target);
            }
        }
    }
}

/// Profiled and classified relations of one script
struct Relations {
    scopes: CteScopes,
    profiles: IndexMap<RelationKey, TableProfile>,
    roles: IndexMap<RelationKey, NodeRole>,
}

impl Relations {
    fn role(&self, key: &RelationKey) -> NodeRole {
        self.roles.get(key).copied().unwrap_or(NodeRole::SourceTable)
    }

    fn node(&self, draft: &mut GraphDraft, key: &RelationKey, table: &TableReference) -> String {
        let label = self
            .profiles
            .get(key)
            .map(|profile| profile.label.as_str())
            .unwrap_or(table.name.as_str());
        draft.add_node(self.role(key), key.name(), label, None)
    }
}

/// A relation written by one query and read by another keeps both nodes
fn link_written_relations(draft: &mut GraphDraft, parsed: &ParsedSql, relations: &Relations) {
    let outputs: IndexSet<String> = parsed
        .all_queries
        .iter()
        .flat_map(|query| query.outputs.iter().map(|output| output.to_lowercase()))
        .collect();

    for output in outputs {
        let key = RelationKey::Table(output);
        if !relations.profiles.contains_key(&key) {
            continue;
        }
        let written = node_id(NodeRole::Output, key.name());
        let read = node_id(relations.role(&key), key.name());
        if draft.nodes.contains_key(&written) && draft.nodes.contains_key(&read) {
            draft.add_edge(&written, &read);
        }
    }
}

/// Tags edges that close a cycle, visiting nodes in first-appearance order
fn back_edges(graph: &DiGraph<usize, ()>) -> HashSet<(NodeIndex, NodeIndex)> {
    let mut back = HashSet::new();
    depth_first_search(graph, graph.node_indices(), |event| {
        if let DfsEvent::BackEdge(from, to) = event {
            back.insert((from, to));
        }
    });
    back
}

fn place(draft: GraphDraft, options: &LayoutOptions) -> Result<FlowGraph, LayoutError> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let indices: Vec<NodeIndex> = (0..draft.nodes.len()).map(|i| graph.add_node(i)).collect();

    let mut edge_pairs = Vec::with_capacity(draft.edges.len());
    for (from, to) in &draft.edges {
        let (Some(from_index), Some(to_index)) =
            (draft.nodes.get_index_of(from), draft.nodes.get_index_of(to))
        else {
            return Err(LayoutError::DanglingEdge {
                from: from.clone(),
                to: to.clone(),
            });
        };
        graph.add_edge(indices[from_index], indices[to_index], ());
        edge_pairs.push((indices[from_index], indices[to_index]));
    }

    let back = back_edges(&graph);
    if !back.is_empty() {
        debug!("Ignoring {} back edge(s) for layering", back.len());
    }

    let mut acyclic: DiGraph<usize, ()> = DiGraph::new();
    for index in &indices {
        acyclic.add_node(graph[*index]);
    }
    for (from, to) in &edge_pairs {
        if !back.contains(&(*from, *to)) {
            acyclic.add_edge(*from, *to, ());
        }
    }

    let order = toposort(&acyclic, None).map_err(|cycle| {
        let id = draft
            .nodes
            .get_index(acyclic[cycle.node_id()])
            .map(|(id, _)| id.clone())
            .unwrap_or_default();
        LayoutError::Cycle(id)
    })?;

    let mut layers = vec![0usize; indices.len()];
    for node in order {
        let layer = acyclic
            .neighbors_directed(node, Direction::Incoming)
            .map(|pred| layers[pred.index()] + 1)
            .max()
            .unwrap_or(0);
        layers[node.index()] = layer;
    }

    let mut placement: Vec<usize> = (0..indices.len()).collect();
    placement.sort_by_key(|&i| (layers[i], i));

    let mut nodes = Vec::with_capacity(placement.len());
    let mut current_layer = None;
    let mut order_in_layer = 0;
    for i in placement {
        let Some((id, node)) = draft.nodes.get_index(i) else {
            continue;
        };
        if current_layer != Some(layers[i]) {
            current_layer = Some(layers[i]);
            order_in_layer = 0;
        }
        nodes.push(FlowNode {
            id: id.clone(),
            label: node.label.clone(),
            role: node.role,
            layer: layers[i],
            order: order_in_layer,
            position: Position {
                x: layers[i] as f64 * options.layer_spacing,
                y: order_in_layer as f64 * options.node_spacing,
            },
            query_id: node.query_id.clone(),
        });
        order_in_layer += 1;
    }

    let edges: Vec<FlowEdge> = draft
        .edges
        .iter()
        .zip(&edge_pairs)
        .map(|((from, to), pair)| FlowEdge {
            id: format!("{}->{}", from, to),
            from: from.clone(),
            to: to.clone(),
            back_edge: back.contains(pair),
        })
        .collect();

    let fingerprint = fingerprint(&nodes, &edges);
    Ok(FlowGraph {
        nodes,
        edges,
        fingerprint,
    })
}

fn fingerprint(nodes: &[FlowNode], edges: &[FlowEdge]) -> String {
    let mut hasher = Sha256::new();
    for node in nodes {
        hasher.update(node.id.as_bytes());
        hasher.update(b"\n");
    }
    hasher.update(b"--\n");
    for edge in edges {
        hasher.update(edge.id.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_engine::model::{Cte, JoinClause};
    use crate::sql_engine::parser::parse_sql;
    use pretty_assertions::assert_eq;

    fn layout(sql: &str) -> FlowGraph {
        build_flow_graph(&parse_sql(sql)).unwrap()
    }

    fn layer(graph: &FlowGraph, id: &str) -> usize {
        graph.node(id).unwrap().layer
    }

    #[test]
    fn test_join_chain_shares_primary() {
        let graph = layout(
            "INSERT INTO report SELECT * FROM orders o \
             JOIN customers c ON o.customer_id = c.id \
             JOIN products p ON o.product_id = p.id",
        );

        let first = "join:stmt_0#0";
        let second = "join:stmt_0#1";
        assert!(graph.has_edge("fact:orders", first));
        assert!(!graph.has_edge("fact:orders", second));
        assert!(graph.has_edge("dimension:customers", first));
        assert!(graph.has_edge("dimension:products", second));
        assert!(graph.has_edge(first, second));
        assert!(graph.has_edge(second, "output:report"));
        assert!(!graph.has_edge(first, "output:report"));

        assert_eq!(layer(&graph, "fact:orders"), 0);
        assert_eq!(layer(&graph, first), 1);
        assert_eq!(layer(&graph, second), 2);
        assert_eq!(layer(&graph, "output:report"), 3);
        assert_eq!(graph.node(first).unwrap().label, "INNER JOIN");
    }

    #[test]
    fn test_comma_tables_feed_target_directly() {
        let graph = layout("CREATE TABLE tmp_pairs AS SELECT * FROM a, b");
        assert!(graph.has_edge("source:a", "output:tmp_pairs"));
        assert!(graph.has_edge("source:b", "output:tmp_pairs"));
    }

    #[test]
    fn test_written_then_read_relation_keeps_both_nodes() {
        let graph = layout(
            "INSERT INTO staging SELECT * FROM raw; \
             INSERT INTO report SELECT * FROM staging",
        );
        assert!(graph.has_edge("source:raw", "output:staging"));
        assert!(graph.has_edge("output:staging", "temp:staging"));
        assert!(graph.has_edge("temp:staging", "output:report"));
        assert_eq!(layer(&graph, "output:report"), 3);
    }

    #[test]
    fn test_derived_table_node() {
        let graph = layout(
            "INSERT INTO out_t SELECT * FROM (SELECT * FROM raw_events) ev \
             JOIN users u ON ev.user_id = u.id",
        );
        let derived = graph.node("temp:sub_0_0").unwrap();
        assert_eq!(derived.label, "ev");
        assert_eq!(derived.role, NodeRole::TempTable);
        assert_eq!(derived.query_id.as_deref(), Some("sub_0_0"));
        assert!(graph.has_edge("source:raw_events", "temp:sub_0_0"));
        assert!(graph.has_edge("temp:sub_0_0", "join:stmt_0#0"));
    }

    #[test]
    fn test_result_node_option() {
        let parsed = parse_sql("SELECT * FROM orders");
        let plain = build_flow_graph(&parsed).unwrap();
        assert!(plain.edges.is_empty());
        assert_eq!(plain.nodes.len(), 1);

        let layout = FlowLayout::new(
            Classifier::default(),
            LayoutOptions {
                result_node: true,
                ..Default::default()
            },
        );
        let graph = layout.layout(&parsed).unwrap();
        let result = graph.node("output:stmt_0").unwrap();
        assert_eq!(result.label, "result");
        assert!(graph.has_edge("source:orders", "output:stmt_0"));
    }

    #[test]
    fn test_mutual_cte_cycle_is_broken() {
        // Hand-built: two CTEs reading each other
        let mut a = Query::new("cte_0_a", "a");
        a.is_cte = true;
        a.push_table(TableReference::new("b").as_cte(true));
        let mut b = Query::new("cte_0_b", "b");
        b.is_cte = true;
        b.push_table(TableReference::new("a").as_cte(true));
        let mut main = Query::new("stmt_0", "final query");
        main.outputs.push("out".to_string());
        main.push_table(TableReference::new("b").as_cte(true));

        let parsed = ParsedSql {
            ctes: vec![
                Cte {
                    name: "a".to_string(),
                    definition_query: a.clone(),
                },
                Cte {
                    name: "b".to_string(),
                    definition_query: b.clone(),
                },
            ],
            all_queries: vec![a, b, main],
        };

        let graph = build_flow_graph(&parsed).unwrap();
        let back: Vec<&FlowEdge> = graph.edges.iter().filter(|e| e.back_edge).collect();
        assert_eq!(back.len(), 1);
        for edge in graph.edges.iter().filter(|e| !e.back_edge) {
            assert!(layer(&graph, &edge.from) < layer(&graph, &edge.to));
        }
    }

    #[test]
    fn test_recursive_cte_does_not_loop() {
        let graph = layout(
            "WITH RECURSIVE walk AS (SELECT id, parent_id FROM nodes \
             UNION ALL SELECT n.id, n.parent_id FROM nodes n JOIN walk w ON n.parent_id = w.id) \
             INSERT INTO tree SELECT * FROM walk",
        );
        assert!(graph.edges.iter().any(|e| e.back_edge));
        assert!(graph.edges.iter().all(|e| e.from != e.to));
        assert!(graph.has_edge("cte:walk", "output:tree"));
    }

    #[test]
    fn test_cte_does_not_capture_a_later_table_of_the_same_name() {
        let graph = layout(
            "WITH a AS (SELECT * FROM x) SELECT * FROM a; \
             INSERT INTO out_t SELECT * FROM a",
        );
        assert!(graph.has_edge("source:x", "cte:a"));
        assert!(graph.has_edge("source:a", "output:out_t"));
        assert!(!graph.has_edge("cte:a", "output:out_t"));
    }

    #[test]
    fn test_forward_cte_reference_is_not_linked_to_the_cte() {
        let graph = layout(
            "WITH a AS (SELECT * FROM b), b AS (SELECT * FROM raw) \
             INSERT INTO out_t SELECT * FROM a",
        );
        assert!(graph.has_edge("source:b", "cte:a"));
        assert!(graph.has_edge("source:raw", "cte:b"));
        assert!(!graph.has_edge("cte:b", "cte:a"));
        assert!(graph.has_edge("cte:a", "output:out_t"));
    }

    #[test]
    fn test_redeclared_cte_is_a_separate_node() {
        let graph = layout(
            "WITH a AS (SELECT * FROM x) INSERT INTO o1 SELECT * FROM a; \
             WITH a AS (SELECT * FROM y) INSERT INTO o2 SELECT * FROM a",
        );
        assert!(graph.has_edge("source:x", "cte:a"));
        assert!(graph.has_edge("cte:a", "output:o1"));
        assert!(graph.has_edge("source:y", "cte:cte_1_a"));
        assert!(graph.has_edge("cte:cte_1_a", "output:o2"));
        assert!(!graph.has_edge("cte:a", "output:o2"));
        assert!(!graph.has_edge("source:y", "cte:a"));
        assert_eq!(graph.node("cte:cte_1_a").unwrap().label, "a");
    }

    #[test]
    fn test_join_chain_folds_unicode_case() {
        let mut query = Query::new("stmt_0", "final query");
        query.outputs.push("out".to_string());
        for name in ["ÉTÉ", "b", "c"] {
            query.push_table(TableReference::new(name));
        }
        for (left, right) in [("ÉTÉ", "b"), ("été", "c")] {
            query.joins.push(JoinClause {
                left: TableReference::new(left),
                right: TableReference::new(right),
                ..Default::default()
            });
        }
        let parsed = ParsedSql {
            ctes: vec![],
            all_queries: vec![query],
        };

        let graph = build_flow_graph(&parsed).unwrap();
        assert!(graph.has_edge("join:stmt_0#0", "join:stmt_0#1"));
        assert!(!graph.has_edge("join:stmt_0#0", "output:out"));
        let primary = graph.nodes.iter().find(|n| n.label == "ÉTÉ").unwrap();
        assert_eq!(graph.edges.iter().filter(|e| e.from == primary.id).count(), 1);
    }

    #[test]
    fn test_dangling_edge_is_reported() {
        let mut draft = GraphDraft::default();
        draft.add_node(NodeRole::SourceTable, "a", "a", None);
        draft.edges.insert(("source:a".to_string(), "source:missing".to_string()));
        let err = place(draft, &LayoutOptions::default()).unwrap_err();
        assert_eq!(
            err,
            LayoutError::DanglingEdge {
                from: "source:a".to_string(),
                to: "source:missing".to_string()
            }
        );
    }

    #[test]
    fn test_positions_follow_layer_and_order() {
        let graph = layout("SELECT * FROM a JOIN b ON a.x = b.y JOIN c ON b.y = c.z");
        for node in &graph.nodes {
            assert_eq!(node.position.x, node.layer as f64 * 250.0);
            assert_eq!(node.position.y, node.order as f64 * 100.0);
        }
        let layer_zero: Vec<&str> = graph
            .nodes
            .iter()
            .filter(|n| n.layer == 0)
            .map(|n| n.label.as_str())
            .collect();
        assert_eq!(layer_zero, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_joins_hanging_off_different_primaries_do_not_chain() {
        let mut query = Query::new("stmt_0", "final query");
        query.outputs.push("out".to_string());
        for name in ["a", "b", "c"] {
            query.push_table(TableReference::new(name));
        }
        query.joins.push(JoinClause {
            left: TableReference::new("a"),
            right: TableReference::new("b"),
            ..Default::default()
        });
        query.joins.push(JoinClause {
            left: TableReference::new("c"),
            right: TableReference::new("b"),
            ..Default::default()
        });
        let parsed = ParsedSql {
            ctes: vec![],
            all_queries: vec![query],
        };

        let graph = build_flow_graph(&parsed).unwrap();
        assert!(!graph.has_edge("join:stmt_0#0", "join:stmt_0#1"));
        assert!(graph.has_edge("join:stmt_0#0", "output:out"));
        assert!(graph.has_edge("join:stmt_0#1", "output:out"));
    }
}
