//! Structured model of a parsed SQL script
//!
//! These are the values handed from the parser to the flow layout engine and
//! the JSON shape exchanged with the remote parse service. Keys are camelCase
//! and every field is defaulted so a partial document still deserializes.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A relation mentioned in a `FROM` or `JOIN` clause
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableReference {
    /// Name as written, qualifiers included (`sales.orders`)
    pub name: String,
    /// Qualifier before the last dot, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(rename = "isCTE")]
    pub is_cte: bool,
}

impl TableReference {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let schema = name.rsplit_once('.').map(|(schema, _)| schema.to_string());
        Self {
            name,
            schema,
            alias: None,
            is_cte: false,
        }
    }

    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias;
        self
    }

    pub fn as_cte(mut self, is_cte: bool) -> Self {
        self.is_cte = is_cte;
        self
    }

    /// Case-insensitive identity of the relation
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    /// True when `other` names the same relation
    pub fn same_relation(&self, other: &TableReference) -> bool {
        self.key() == other.key()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
            JoinKind::Full => "FULL",
            JoinKind::Cross => "CROSS",
        };
        write!(f, "{}", kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinClause {
    /// Primary relation of the `FROM` item the join hangs off
    pub left: TableReference,
    pub right: TableReference,
    pub kind: JoinKind,
    /// `ON` expression or `USING (...)` text
    pub condition: Option<String>,
}

/// How a projected column is derived
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Transformation {
    #[default]
    Direct,
    Aggregation,
    Window,
    Conditional,
    Concatenation,
    Expression,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldInfo {
    pub expression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub transformation: Transformation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterInfo {
    /// `WHERE` or `HAVING`
    pub clause: String,
    pub condition: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnionInfo {
    /// Set operator as written, e.g. `UNION ALL`
    #[serde(rename = "type")]
    pub kind: String,
    /// Relations feeding the branches, first appearance order
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Query {
    pub id: String,
    pub name: String,
    pub tables: Vec<TableReference>,
    pub joins: Vec<JoinClause>,
    /// Relations this query writes (`INSERT INTO`, `CREATE TABLE ... AS`)
    pub outputs: Vec<String>,
    pub is_main: bool,
    #[serde(rename = "isCTE")]
    pub is_cte: bool,
    pub is_sub_query: bool,
    pub is_temp_table: bool,
    pub fields: Vec<FieldInfo>,
    pub filters: Vec<FilterInfo>,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    /// CTE names and subquery ids this query reads
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub union_info: Option<UnionInfo>,
}

impl Query {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Statement-level queries are neither CTE bodies nor nested subqueries
    pub fn is_statement_level(&self) -> bool {
        !self.is_cte && !self.is_sub_query
    }

    pub(crate) fn push_table(&mut self, table: TableReference) {
        if table.is_cte {
            self.add_dependency(table.key());
        }
        self.tables.push(table);
    }

    pub(crate) fn add_dependency(&mut self, name: String) {
        if !self.depends_on.contains(&name) {
            self.depends_on.push(name);
        }
    }
}

/// A common table expression and the query defining it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Cte {
    pub name: String,
    pub definition_query: Query,
}

/// Result of parsing a whole script. An empty `all_queries` means nothing
/// could be recognized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParsedSql {
    pub ctes: Vec<Cte>,
    pub all_queries: Vec<Query>,
}

impl ParsedSql {
    pub fn is_empty(&self) -> bool {
        self.all_queries.is_empty()
    }

    /// Distinct CTE names, case-insensitive
    pub fn cte_count(&self) -> usize {
        self.ctes
            .iter()
            .map(|cte| cte.name.to_lowercase())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Distinct relation names referenced by any query, case-insensitive
    pub fn table_count(&self) -> usize {
        self.all_queries
            .iter()
            .flat_map(|query| query.tables.iter().map(TableReference::key))
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn main_query(&self) -> Option<&Query> {
        self.all_queries.iter().find(|query| query.is_main)
    }
}

/// What a single statement contributed to the script
#[derive(Debug, Clone, Default)]
pub struct StatementParse {
    pub ctes: Vec<Cte>,
    /// Producers before consumers; the statement's own query is last
    pub queries: Vec<Query>,
}

/// Merges per-statement results into one `ParsedSql`
#[derive(Debug, Default)]
pub struct ParsedSqlBuilder {
    ctes: Vec<Cte>,
    queries: Vec<Query>,
}

impl ParsedSqlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_statement(&mut self, statement: StatementParse) {
        self.ctes.extend(statement.ctes);
        self.queries.extend(statement.queries);
    }

    pub fn build(mut self) -> ParsedSql {
        for query in &mut self.queries {
            query.is_main = false;
        }
        if let Some(main) = self
            .queries
            .iter_mut()
            .rev()
            .find(|query| query.is_statement_level())
        {
            main.is_main = true;
        }

        ParsedSql {
            ctes: self.ctes,
            all_queries: self.queries,
        }
    }
}
