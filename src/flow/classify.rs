//! Heuristic role classification of the relations a script reads
//!
//! SQL text alone says nothing about whether a table holds facts or dimensions,
//! so roles come from an ordered list of rules over structural signals: CTE
//! membership, naming conventions and join fan-out. The first rule that
//! answers wins; a relation no rule claims is a plain source table.

use std::collections::{HashMap, HashSet};
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use super::NodeRole;
use crate::sql_engine::model::{JoinClause, JoinKind, ParsedSql, Query, TableReference};

/// Tunables for the built-in rules, loaded from the `classification` config section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationOptions {
    /// Joins a table must drive before it counts as a fact table
    pub fact_min_joins: usize,
    /// Key joins a table must sit on the right side of to count as a dimension
    pub dimension_min_joins: usize,
    pub temp_prefixes: Vec<String>,
    pub temp_suffixes: Vec<String>,
    pub fact_prefixes: Vec<String>,
    pub fact_suffixes: Vec<String>,
    pub dimension_prefixes: Vec<String>,
    pub dimension_suffixes: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

impl Default for ClassificationOptions {
    fn default() -> Self {
        Self {
            fact_min_joins: 2,
            dimension_min_joins: 1,
            temp_prefixes: strings(&["tmp_", "temp_", "#"]),
            temp_suffixes: strings(&["_tmp", "_temp"]),
            fact_prefixes: strings(&["fact_", "fct_", "dwd_", "dws_"]),
            fact_suffixes: strings(&["_fact"]),
            dimension_prefixes: strings(&["dim_"]),
            dimension_suffixes: strings(&["_dim"]),
        }
    }
}

/// Identity of a relation read by the script. A CTE reference stands for the
/// declaration in its own statement; any other relation is its case-folded name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelationKey {
    Table(String),
    Cte(String),
}

impl RelationKey {
    /// Name of the node standing for the relation
    pub fn name(&self) -> &str {
        match self {
            RelationKey::Table(name) | RelationKey::Cte(name) => name,
        }
    }
}

/// Resolves CTE references to the statement that declares them
#[derive(Debug, Default)]
pub struct CteScopes {
    /// Statement of every query, by position in `all_queries`
    statements: Vec<usize>,
    /// Node name per (statement, case-folded CTE name)
    declared: HashMap<(usize, String), String>,
}

impl CteScopes {
    pub fn new(parsed: &ParsedSql) -> Self {
        let mut scopes = Self::default();
        let mut claimed: HashSet<String> = HashSet::new();
        let mut statement = 0;

        // A statement's CTEs and subqueries precede its own query
        for query in &parsed.all_queries {
            scopes.statements.push(statement);
            if query.is_cte {
                let name = query.name.to_lowercase();
                let node_name = if claimed.insert(name.clone()) {
                    name.clone()
                } else if query.id.is_empty() {
                    format!("{}@{}", name, statement)
                } else {
                    query.id.to_lowercase()
                };
                scopes.declared.entry((statement, name)).or_insert(node_name);
            }
            if query.is_statement_level() {
                statement += 1;
            }
        }
        scopes
    }

    fn statement_of(&self, index: usize) -> usize {
        self.statements.get(index).copied().unwrap_or(0)
    }

    /// Key of `table` as read by the query at `index` of `all_queries`
    pub fn key_for(&self, index: usize, table: &TableReference) -> RelationKey {
        let name = table.key();
        if !table.is_cte {
            return RelationKey::Table(name);
        }
        // Remote answers may flag a reference to a CTE of an earlier statement
        let declared = (0..=self.statement_of(index))
            .rev()
            .find_map(|statement| self.declared.get(&(statement, name.clone())));
        RelationKey::Cte(declared.cloned().unwrap_or(name))
    }

    /// Node name of the CTE defined by the query at `index`
    pub fn declaration(&self, index: usize, query: &Query) -> String {
        let name = query.name.to_lowercase();
        self.declared
            .get(&(self.statement_of(index), name.clone()))
            .cloned()
            .unwrap_or(name)
    }
}

/// Everything the rules know about one relation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableProfile {
    /// Name as first written
    pub name: String,
    /// Display label; the alias for derived tables
    pub label: String,
    pub is_cte: bool,
    /// Stands for a nested subquery of the script
    pub is_derived: bool,
    /// Some query of the script writes it
    pub is_written: bool,
    /// Joins where this relation is the primary (left) side
    pub primary_joins: usize,
    /// Equality joins on a key-looking column of this relation, right side
    pub keyed_joins: usize,
    /// Distinct relations joined with this one
    pub partners: IndexSet<RelationKey>,
}

impl TableProfile {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            label: name.to_string(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Lower-cased name without schema qualifiers
    pub fn base_name(&self) -> String {
        let key = self.key();
        match key.rsplit_once('.') {
            Some((_, base)) => base.to_string(),
            None => key,
        }
    }
}

/// Profiles every relation read by the script, in first appearance order
pub fn profile_tables(
    parsed: &ParsedSql,
    scopes: &CteScopes,
) -> IndexMap<RelationKey, TableProfile> {
    let mut profiles: IndexMap<RelationKey, TableProfile> = IndexMap::new();

    for (index, query) in parsed.all_queries.iter().enumerate() {
        for table in &query.tables {
            let key = scopes.key_for(index, table);
            let is_cte = matches!(key, RelationKey::Cte(_));
            profiles
                .entry(key)
                .or_insert_with(|| TableProfile::new(&table.name))
                .is_cte |= is_cte;
        }
    }

    for (key, profile) in profiles.iter_mut() {
        let RelationKey::Table(name) = key else {
            continue;
        };

        if let Some(sub) = parsed
            .all_queries
            .iter()
            .find(|query| query.is_sub_query && query.id.to_lowercase() == *name)
        {
            profile.is_derived = true;
            profile.label = sub.name.clone();
        }

        profile.is_written = parsed
            .all_queries
            .iter()
            .flat_map(|query| query.outputs.iter())
            .any(|output| output.to_lowercase() == *name);
    }

    for (index, query) in parsed.all_queries.iter().enumerate() {
        for join in &query.joins {
            let left = scopes.key_for(index, &join.left);
            let right = scopes.key_for(index, &join.right);
            if left == right {
                continue;
            }

            if let Some(profile) = profiles.get_mut(&left) {
                profile.primary_joins += 1;
                profile.partners.insert(right.clone());
            }
            if let Some(profile) = profiles.get_mut(&right) {
                if is_keyed_join(join) {
                    profile.keyed_joins += 1;
                }
                profile.partners.insert(left);
            }
        }
    }

    profiles
}

fn is_key_column(column: &str) -> bool {
    let column = column.trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']');
    let column = column.to_lowercase();
    column == "id"
        || ["_id", "_key", "_code", "_sk"]
            .iter()
            .any(|suffix| column.ends_with(suffix))
}

/// Whether `side` of an equality refers to `table` (by alias, name or no qualifier)
fn refers_to(side: &str, table: &TableReference) -> Option<String> {
    let side = side.trim();
    match side.rsplit_once('.') {
        Some((qualifier, column)) => {
            let qualifier = qualifier.to_lowercase();
            let matches = table
                .alias
                .as_ref()
                .is_some_and(|alias| alias.to_lowercase() == qualifier)
                || table.key() == qualifier
                || table
                    .key()
                    .rsplit_once('.')
                    .is_some_and(|(_, base)| base == qualifier);
            matches.then(|| column.to_string())
        }
        None => Some(side.to_string()),
    }
}

/// An equality join on a key-looking column of the right-hand relation
fn is_keyed_join(join: &JoinClause) -> bool {
    if join.kind == JoinKind::Cross {
        return false;
    }
    let Some(condition) = join.condition.as_deref() else {
        return false;
    };

    if let Some(columns) = condition
        .strip_prefix("USING (")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        return columns.split(',').any(|column| is_key_column(column.trim()));
    }

    condition
        .split(" AND ")
        .flat_map(|conjunct| conjunct.split(" and "))
        .filter_map(|conjunct| {
            let (lhs, rhs) = conjunct.split_once('=')?;
            // Skip <=, >=, != and <=>
            if lhs.ends_with(['<', '>', '!']) || rhs.starts_with('>') {
                return None;
            }
            Some((lhs.trim_start_matches('('), rhs.trim_end_matches(')')))
        })
        .any(|(lhs, rhs)| {
            [lhs, rhs].iter().any(|side| {
                refers_to(side, &join.right).is_some_and(|column| is_key_column(&column))
            })
        })
}

/// One classification heuristic
pub trait RoleRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// A role when the rule applies, `None` to defer to the next rule
    fn classify(&self, profile: &TableProfile) -> Option<NodeRole>;
}

struct CteRule;

impl RoleRule for CteRule {
    fn name(&self) -> &'static str {
        "cte"
    }

    fn classify(&self, profile: &TableProfile) -> Option<NodeRole> {
        profile.is_cte.then_some(NodeRole::Cte)
    }
}

struct DerivedTableRule;

impl RoleRule for DerivedTableRule {
    fn name(&self) -> &'static str {
        "derived-table"
    }

    fn classify(&self, profile: &TableProfile) -> Option<NodeRole> {
        profile.is_derived.then_some(NodeRole::TempTable)
    }
}

/// Matches names against prefix and suffix lists
struct NamingRule {
    name: &'static str,
    role: NodeRole,
    prefixes: Vec<String>,
    suffixes: Vec<String>,
}

impl NamingRule {
    fn new(name: &'static str, role: NodeRole, prefixes: &[String], suffixes: &[String]) -> Self {
        Self {
            name,
            role,
            prefixes: prefixes.iter().map(|p| p.to_lowercase()).collect(),
            suffixes: suffixes.iter().map(|s| s.to_lowercase()).collect(),
        }
    }
}

impl RoleRule for NamingRule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn classify(&self, profile: &TableProfile) -> Option<NodeRole> {
        let base = profile.base_name();
        let matches = self.prefixes.iter().any(|prefix| base.starts_with(prefix.as_str()))
            || self.suffixes.iter().any(|suffix| base.ends_with(suffix.as_str()));
        matches.then_some(self.role)
    }
}

struct WrittenRelationRule;

impl RoleRule for WrittenRelationRule {
    fn name(&self) -> &'static str {
        "written-relation"
    }

    fn classify(&self, profile: &TableProfile) -> Option<NodeRole> {
        profile.is_written.then_some(NodeRole::TempTable)
    }
}

struct JoinFanOutRule {
    fact_min_joins: usize,
    dimension_min_joins: usize,
}

impl RoleRule for JoinFanOutRule {
    fn name(&self) -> &'static str {
        "join-fan-out"
    }

    fn classify(&self, profile: &TableProfile) -> Option<NodeRole> {
        let fact_min = self.fact_min_joins.max(1);
        let dimension_min = self.dimension_min_joins.max(1);

        if profile.primary_joins >= fact_min
            && profile.partners.len() >= fact_min
            && profile.primary_joins > profile.keyed_joins
        {
            return Some(NodeRole::FactTable);
        }
        if profile.keyed_joins >= dimension_min && profile.keyed_joins >= profile.primary_joins {
            return Some(NodeRole::DimensionTable);
        }
        None
    }
}

/// Ordered rule list; first match wins, unmatched relations are sources
pub struct Classifier {
    rules: Vec<Box<dyn RoleRule>>,
}

impl Classifier {
    pub fn new(options: &ClassificationOptions) -> Self {
        let rules: Vec<Box<dyn RoleRule>> = vec![
            Box::new(CteRule),
            Box::new(DerivedTableRule),
            Box::new(NamingRule::new(
                "temp-naming",
                NodeRole::TempTable,
                &options.temp_prefixes,
                &options.temp_suffixes,
            )),
            Box::new(WrittenRelationRule),
            Box::new(NamingRule::new(
                "dimension-naming",
                NodeRole::DimensionTable,
                &options.dimension_prefixes,
                &options.dimension_suffixes,
            )),
            Box::new(NamingRule::new(
                "fact-naming",
                NodeRole::FactTable,
                &options.fact_prefixes,
                &options.fact_suffixes,
            )),
            Box::new(JoinFanOutRule {
                fact_min_joins: options.fact_min_joins,
                dimension_min_joins: options.dimension_min_joins,
            }),
        ];
        Self { rules }
    }

    /// Appends a rule after the built-in ones
    pub fn push_rule(&mut self, rule: Box<dyn RoleRule>) {
        self.rules.push(rule);
    }

    /// Inserts a rule ahead of every other rule
    pub fn prepend_rule(&mut self, rule: Box<dyn RoleRule>) {
        self.rules.insert(0, rule);
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|rule| rule.name()).collect()
    }

    pub fn classify(&self, profile: &TableProfile) -> NodeRole {
        self.rules
            .iter()
            .find_map(|rule| rule.classify(profile))
            .unwrap_or(NodeRole::SourceTable)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&ClassificationOptions::default())
    }
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("rules", &self.rule_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_engine::parser::parse_sql;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn profiles(sql: &str) -> IndexMap<RelationKey, TableProfile> {
        let parsed = parse_sql(sql);
        profile_tables(&parsed, &CteScopes::new(&parsed))
    }

    fn table(name: &str) -> RelationKey {
        RelationKey::Table(name.to_string())
    }

    fn roles(sql: &str) -> Vec<(String, NodeRole)> {
        let classifier = Classifier::default();
        profiles(sql)
            .into_iter()
            .map(|(key, profile)| (key.name().to_string(), classifier.classify(&profile)))
            .collect()
    }

    fn role_of(sql: &str, table: &str) -> NodeRole {
        roles(sql)
            .into_iter()
            .find(|(key, _)| key == table)
            .map(|(_, role)| role)
            .unwrap()
    }

    #[test_case("tmp_orders", NodeRole::TempTable; "tmp prefix")]
    #[test_case("orders_temp", NodeRole::TempTable; "temp suffix")]
    #[test_case("#staging", NodeRole::TempTable; "hash prefix")]
    #[test_case("dim_customer", NodeRole::DimensionTable; "dim prefix")]
    #[test_case("customer_dim", NodeRole::DimensionTable; "dim suffix")]
    #[test_case("fct_sales", NodeRole::FactTable; "fct prefix")]
    #[test_case("dw.fact_orders", NodeRole::FactTable; "qualified fact")]
    #[test_case("raw_events", NodeRole::SourceTable; "plain")]
    fn test_naming_conventions(table: &str, expected: NodeRole) {
        let sql = format!("SELECT * FROM {}", table);
        assert_eq!(role_of(&sql, &table.to_lowercase()), expected);
    }

    #[test]
    fn test_cte_wins_over_naming() {
        let sql = "WITH dim_x AS (SELECT * FROM raw) SELECT * FROM dim_x";
        assert_eq!(role_of(sql, "dim_x"), NodeRole::Cte);
        assert_eq!(role_of(sql, "raw"), NodeRole::SourceTable);
    }

    #[test]
    fn test_cte_name_stays_in_its_statement() {
        let profiles = profiles("WITH a AS (SELECT * FROM x) SELECT * FROM a; SELECT * FROM a");
        let keys: Vec<&RelationKey> = profiles.keys().collect();
        assert_eq!(keys, vec![&table("x"), &RelationKey::Cte("a".to_string()), &table("a")]);
        assert!(profiles[&RelationKey::Cte("a".to_string())].is_cte);
        assert!(!profiles[&table("a")].is_cte);
    }

    #[test]
    fn test_forward_cte_reference_is_a_table() {
        let profiles =
            profiles("WITH a AS (SELECT * FROM b), b AS (SELECT * FROM raw) SELECT * FROM a");
        assert!(!profiles[&table("b")].is_cte);
        assert!(!profiles.contains_key(&RelationKey::Cte("b".to_string())));
    }

    #[test]
    fn test_redeclared_cte_gets_its_own_key() {
        let parsed = parse_sql(
            "WITH a AS (SELECT * FROM x) SELECT * FROM a; WITH a AS (SELECT * FROM y) SELECT * FROM a",
        );
        let scopes = CteScopes::new(&parsed);
        let ids: Vec<&str> = parsed.all_queries.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["cte_0_a", "stmt_0", "cte_1_a", "stmt_1"]);

        assert_eq!(scopes.declaration(0, &parsed.all_queries[0]), "a");
        assert_eq!(scopes.declaration(2, &parsed.all_queries[2]), "cte_1_a");
        assert_eq!(
            scopes.key_for(3, &parsed.all_queries[3].tables[0]),
            RelationKey::Cte("cte_1_a".to_string())
        );
    }

    #[test]
    fn test_written_relation_is_temp() {
        let sql = "INSERT INTO staging SELECT * FROM raw; SELECT * FROM staging";
        assert_eq!(role_of(sql, "staging"), NodeRole::TempTable);
    }

    #[test]
    fn test_derived_table_is_temp_with_alias_label() {
        let profiles = profiles("SELECT * FROM (SELECT * FROM raw) r");
        let sub = &profiles[&table("sub_0_0")];
        assert!(sub.is_derived);
        assert_eq!(sub.label, "r");
        assert_eq!(Classifier::default().classify(sub), NodeRole::TempTable);
    }

    #[test]
    fn test_star_schema_fan_out() {
        let sql = "SELECT * FROM orders o \
                   JOIN customers c ON o.customer_id = c.id \
                   JOIN products p ON o.product_key = p.product_key \
                   LEFT JOIN notes n ON o.note = n.body";
        assert_eq!(role_of(sql, "orders"), NodeRole::FactTable);
        assert_eq!(role_of(sql, "customers"), NodeRole::DimensionTable);
        assert_eq!(role_of(sql, "products"), NodeRole::DimensionTable);
        assert_eq!(role_of(sql, "notes"), NodeRole::SourceTable);
    }

    #[test]
    fn test_single_join_is_not_a_fact() {
        let sql = "SELECT * FROM orders o JOIN customers c ON o.cust_id = c.id";
        assert_eq!(role_of(sql, "orders"), NodeRole::SourceTable);
        assert_eq!(role_of(sql, "customers"), NodeRole::DimensionTable);
    }

    #[test]
    fn test_using_clause_counts_as_keyed() {
        let sql = "SELECT * FROM sales JOIN regions USING (region_id)";
        assert_eq!(role_of(sql, "regions"), NodeRole::DimensionTable);
    }

    #[test]
    fn test_range_join_is_not_keyed() {
        let sql = "SELECT * FROM a JOIN b ON a.ts >= b.start_id";
        assert_eq!(role_of(sql, "b"), NodeRole::SourceTable);
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let options = ClassificationOptions {
            fact_min_joins: 1,
            ..Default::default()
        };
        let classifier = Classifier::new(&options);
        let profiles = profiles("SELECT * FROM orders o JOIN notes n ON o.note = n.body");
        assert_eq!(classifier.classify(&profiles[&table("orders")]), NodeRole::FactTable);
    }

    struct EverythingIsOutput;

    impl RoleRule for EverythingIsOutput {
        fn name(&self) -> &'static str {
            "everything"
        }

        fn classify(&self, _profile: &TableProfile) -> Option<NodeRole> {
            Some(NodeRole::Output)
        }
    }

    #[test]
    fn test_custom_rules_are_ordered() {
        let mut classifier = Classifier::default();
        classifier.push_rule(Box::new(EverythingIsOutput));
        let profile = TableProfile::new("tmp_x");
        assert_eq!(classifier.classify(&profile), NodeRole::TempTable);
        assert_eq!(classifier.classify(&TableProfile::new("plain")), NodeRole::Output);

        classifier.prepend_rule(Box::new(EverythingIsOutput));
        assert_eq!(classifier.classify(&profile), NodeRole::Output);
        assert_eq!(classifier.rule_names()[0], "everything");
    }
}
