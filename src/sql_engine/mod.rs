//! SQL Engine module: from script text to the lineage model

pub mod extractors;
pub mod model;
pub mod parser;
pub mod remote;
pub mod statement;
pub mod tokenizer;

pub use model::ParsedSql;
pub use parser::{parse_sql, LineageParser};
