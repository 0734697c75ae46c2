//! sql_flow turns SQL scripts into ETL lineage flow graphs.
//!
//! ```
//! use sql_flow::flow::build_flow_graph;
//! use sql_flow::sql_engine::parser::parse_sql;
//!
//! let parsed = parse_sql("SELECT * FROM orders o JOIN customers c ON o.cust_id = c.id");
//! let graph = build_flow_graph(&parsed).unwrap();
//! assert_eq!(graph.nodes.len(), 3);
//! ```

pub mod commands;
pub mod config;
pub mod display;
pub mod flow;
pub mod session;
pub mod sql_engine;
