//! ETL flow graph built from a parsed SQL script

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod classify;
pub mod export;
pub mod layout;

pub use classify::{
    ClassificationOptions, Classifier, CteScopes, RelationKey, RoleRule, TableProfile,
};
pub use layout::{build_flow_graph, FlowLayout, LayoutError, LayoutOptions};

/// Visual role of a node in the flow diagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeRole {
    SourceTable,
    FactTable,
    DimensionTable,
    Cte,
    TempTable,
    Join,
    Output,
}

impl NodeRole {
    pub const ALL: [NodeRole; 7] = [
        NodeRole::SourceTable,
        NodeRole::FactTable,
        NodeRole::DimensionTable,
        NodeRole::Cte,
        NodeRole::TempTable,
        NodeRole::Join,
        NodeRole::Output,
    ];

    /// Prefix of node ids with this role
    pub fn slug(self) -> &'static str {
        match self {
            NodeRole::SourceTable => "source",
            NodeRole::FactTable => "fact",
            NodeRole::DimensionTable => "dimension",
            NodeRole::Cte => "cte",
            NodeRole::TempTable => "temp",
            NodeRole::Join => "join",
            NodeRole::Output => "output",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            NodeRole::SourceTable => "source table",
            NodeRole::FactTable => "fact table",
            NodeRole::DimensionTable => "dimension table",
            NodeRole::Cte => "CTE",
            NodeRole::TempTable => "temp table",
            NodeRole::Join => "join",
            NodeRole::Output => "output",
        }
    }

    /// Fill color of the legend entry
    pub fn color(self) -> &'static str {
        match self {
            NodeRole::SourceTable => "#94a3b8",
            NodeRole::FactTable => "#60a5fa",
            NodeRole::DimensionTable => "#4ade80",
            NodeRole::Cte => "#c084fc",
            NodeRole::TempTable => "#f472b6",
            NodeRole::Join => "#fbbf24",
            NodeRole::Output => "#34d399",
        }
    }

    /// Graphviz shape of the legend entry
    pub fn shape(self) -> &'static str {
        match self {
            NodeRole::Join => "diamond",
            NodeRole::Output => "doubleoctagon",
            NodeRole::Cte => "note",
            _ => "box",
        }
    }

    pub fn is_table(self) -> bool {
        matches!(
            self,
            NodeRole::SourceTable
                | NodeRole::FactTable
                | NodeRole::DimensionTable
                | NodeRole::TempTable
        )
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::SourceTable => "SOURCE_TABLE",
            NodeRole::FactTable => "FACT_TABLE",
            NodeRole::DimensionTable => "DIMENSION_TABLE",
            NodeRole::Cte => "CTE",
            NodeRole::TempTable => "TEMP_TABLE",
            NodeRole::Join => "JOIN",
            NodeRole::Output => "OUTPUT",
        };
        write!(f, "{}", name)
    }
}

/// Stable node id derived from role and case-folded name
pub fn node_id(role: NodeRole, name: &str) -> String {
    format!("{}:{}", role.slug(), name.to_lowercase())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: String,
    pub label: String,
    pub role: NodeRole,
    pub layer: usize,
    /// Index inside the layer
    pub order: usize,
    pub position: Position,
    /// Query that synthesized this node (joins and query targets)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    /// Closes a cycle; ignored when assigning layers
    pub back_edge: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowGraph {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    /// SHA-256 over node and edge ids
    pub fingerprint: String,
}

impl FlowGraph {
    pub fn node(&self, id: &str) -> Option<&FlowNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edges.iter().any(|edge| edge.from == from && edge.to == to)
    }

    pub fn nodes_with_role(&self, role: NodeRole) -> impl Iterator<Item = &FlowNode> {
        self.nodes.iter().filter(move |node| node.role == role)
    }

    pub fn layer_count(&self) -> usize {
        self.nodes.iter().map(|node| node.layer + 1).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_is_case_folded() {
        assert_eq!(node_id(NodeRole::SourceTable, "Sales.Orders"), "source:sales.orders");
        assert_eq!(node_id(NodeRole::Join, "stmt_0#1"), "join:stmt_0#1");
    }

    #[test]
    fn test_role_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&NodeRole::DimensionTable).unwrap();
        assert_eq!(json, "\"DIMENSION_TABLE\"");
        assert_eq!(NodeRole::TempTable.to_string(), "TEMP_TABLE");
    }

    #[test]
    fn test_legend_entries_are_distinct() {
        let colors: std::collections::HashSet<_> = NodeRole::ALL.iter().map(|r| r.color()).collect();
        let slugs: std::collections::HashSet<_> = NodeRole::ALL.iter().map(|r| r.slug()).collect();
        assert_eq!(colors.len(), 7);
        assert_eq!(slugs.len(), 7);
    }
}
