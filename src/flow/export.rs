//! Renderings of a flow graph: terminal text, JSON and Graphviz DOT

use std::fmt::Write as _;

use colored::{ColoredString, Colorize};

use super::{FlowGraph, NodeRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Dot,
}

fn role_rgb(role: NodeRole) -> (u8, u8, u8) {
    let hex = role.color().trim_start_matches('#');
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).unwrap_or(0xff);
    (channel(0), channel(2), channel(4))
}

fn paint(text: &str, role: NodeRole) -> ColoredString {
    let (r, g, b) = role_rgb(role);
    text.truecolor(r, g, b)
}

pub fn render(graph: &FlowGraph, format: OutputFormat) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Text => Ok(to_text(graph)),
        OutputFormat::Json => to_json(graph),
        OutputFormat::Dot => Ok(to_dot(graph)),
    }
}

pub fn to_json(graph: &FlowGraph) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(graph)
}

/// Layer-by-layer listing followed by the edge list
pub fn to_text(graph: &FlowGraph) -> String {
    let mut out = String::new();

    for layer in 0..graph.layer_count() {
        let _ = writeln!(out, "{}", format!("Layer {}", layer).bold());
        for node in graph.nodes.iter().filter(|node| node.layer == layer) {
            let _ = writeln!(
                out,
                "  {} {}",
                paint(&format!("[{}]", node.role), node.role),
                node.label
            );
        }
    }

    if !graph.edges.is_empty() {
        let _ = writeln!(out, "{}", "Edges".bold());
        for edge in &graph.edges {
            let marker = if edge.back_edge { " (cycle)" } else { "" };
            let _ = writeln!(out, "  {} -> {}{}", edge.from, edge.to, marker.yellow());
        }
    }

    out
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Graphviz rendering, one `rank=same` subgraph per layer
pub fn to_dot(graph: &FlowGraph) -> String {
    let mut result = String::from("digraph flow {\n");
    result.push_str("  rankdir=LR;\n");
    result.push_str("  node [style=filled, fontname=\"Helvetica\"];\n");

    for node in &graph.nodes {
        let _ = writeln!(
            result,
            "  \"{}\" [label=\"{}\", shape={}, fillcolor=\"{}\"];",
            escape(&node.id),
            escape(&node.label),
            node.role.shape(),
            node.role.color()
        );
    }

    for edge in &graph.edges {
        let style = if edge.back_edge { " [style=dashed]" } else { "" };
        let _ = writeln!(
            result,
            "  \"{}\" -> \"{}\"{};",
            escape(&edge.from),
            escape(&edge.to),
            style
        );
    }

    for layer in 0..graph.layer_count() {
        let _ = writeln!(result, "  subgraph layer_{} {{", layer);
        result.push_str("    rank=same;\n");
        for node in graph.nodes.iter().filter(|node| node.layer == layer) {
            let _ = writeln!(result, "    \"{}\";", escape(&node.id));
        }
        result.push_str("  }\n");
    }

    result.push_str("}\n");
    result
}

/// The fixed role legend
pub fn legend() -> String {
    let mut out = String::new();
    for role in NodeRole::ALL {
        let _ = writeln!(
            out,
            "  {} {:<16} {} ({})",
            paint("■", role),
            role.to_string(),
            role.description(),
            role.shape()
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::build_flow_graph;
    use crate::sql_engine::parser::parse_sql;

    fn sample() -> FlowGraph {
        build_flow_graph(&parse_sql(
            "INSERT INTO report SELECT * FROM orders o JOIN customers c ON o.cust_id = c.id",
        ))
        .unwrap()
    }

    #[test]
    fn test_dot_has_rank_groups_and_edges() {
        let dot = to_dot(&sample());
        assert!(dot.starts_with("digraph flow {"));
        assert!(dot.contains("\"source:orders\" -> \"join:stmt_0#0\";"));
        assert!(dot.contains("shape=diamond"));
        assert!(dot.contains("subgraph layer_2 {"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn test_json_shape() {
        let json = to_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["nodes"][0]["role"], "SOURCE_TABLE");
        assert!(value["edges"][0]["backEdge"].is_boolean());
        assert_eq!(value["fingerprint"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_text_lists_every_layer() {
        colored::control::set_override(false);
        let text = to_text(&sample());
        assert!(text.contains("Layer 0"));
        assert!(text.contains("[JOIN] INNER JOIN"));
        assert!(text.contains("[OUTPUT] report"));
        assert!(text.contains("source:orders -> join:stmt_0#0"));
    }

    #[test]
    fn test_legend_names_all_roles() {
        colored::control::set_override(false);
        let legend = legend();
        for role in NodeRole::ALL {
            assert!(legend.contains(role.description()));
        }
    }

    #[test]
    fn test_escape_quotes() {
        assert_eq!(escape("a\"b"), "a\\\"b");
    }
}
