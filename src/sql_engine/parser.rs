//! Script-level parsing: split, classify, parse each statement, merge

use log::{debug, warn};
use sqlparser::dialect::{dialect_from_str, Dialect, GenericDialect};
use sqlparser::parser::Parser;

use super::extractors::{statement_query, QueryCollector};
use super::model::{ParsedSql, ParsedSqlBuilder, Query, StatementParse};
use super::statement::{classify, scan_relations, StatementKind};
use super::tokenizer::{split_statements_with, QuoteEscapes, StatementSpan};

/// Turns SQL scripts into `ParsedSql`. Never fails: statements it cannot make
/// sense of are dropped and an empty result means nothing was recognized.
#[derive(Debug, Clone)]
pub struct LineageParser {
    dialect: String,
}

impl Default for LineageParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineageParser {
    pub fn new() -> Self {
        Self {
            dialect: "generic".to_string(),
        }
    }

    /// Use a named sqlparser dialect (`postgres`, `mysql`, `snowflake`, ...)
    pub fn with_dialect(dialect: impl Into<String>) -> Self {
        Self {
            dialect: dialect.into(),
        }
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    fn build_dialect(&self) -> Box<dyn Dialect> {
        dialect_from_str(&self.dialect).unwrap_or_else(|| {
            warn!("Unknown SQL dialect '{}', using generic", self.dialect);
            Box::new(GenericDialect {})
        })
    }

    pub fn parse(&self, sql: &str) -> ParsedSql {
        let dialect = self.build_dialect();
        let escapes = if dialect.supports_string_literal_backslash_escape() {
            QuoteEscapes::Backslash
        } else {
            QuoteEscapes::Doubled
        };
        let mut builder = ParsedSqlBuilder::new();

        for span in split_statements_with(sql, escapes) {
            match parse_statement(dialect.as_ref(), &span) {
                Some(statement) => builder.push_statement(statement),
                None => debug!("Dropping statement {}: not a lineage statement", span.index),
            }
        }

        builder.build()
    }
}

/// Parse a script with the generic dialect
pub fn parse_sql(sql: &str) -> ParsedSql {
    LineageParser::new().parse(sql)
}

fn parse_statement(dialect: &dyn Dialect, span: &StatementSpan) -> Option<StatementParse> {
    let kind = classify(span)?;
    let mut root = root_query(span.index, &kind);

    let normalized = span.normalized_sql();
    let parsed = match Parser::parse_sql(dialect, &normalized) {
        Ok(statements) => statements,
        Err(e) => {
            debug!("Statement {} did not parse ({}), scanning tokens", span.index, e);
            Vec::new()
        }
    };

    match parsed.first().and_then(statement_query) {
        Some(body) => Some(QueryCollector::new(span.index).collect_statement(body, root)),
        None => {
            scan_relations(span).apply_to(&mut root);
            if root.tables.is_empty() && root.outputs.is_empty() {
                return None;
            }
            Some(StatementParse {
                ctes: Vec::new(),
                queries: vec![root],
            })
        }
    }
}

fn root_query(index: usize, kind: &StatementKind) -> Query {
    let id = format!("stmt_{}", index);
    match kind.output_target() {
        Some(target) => {
            let mut query = Query::new(id, target);
            query.outputs.push(target.to_string());
            query.is_temp_table = kind.is_temp_table();
            query
        }
        None => Query::new(id, "final query"),
    }
}
