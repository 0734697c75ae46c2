//! Lineage extraction from sqlparser ASTs
//!
//! Walks one parsed statement and produces the CTE definitions, nested
//! subqueries and the statement's own query, in producer-before-consumer order.

use std::ops::ControlFlow;

use sqlparser::ast::{
    self, BinaryOperator, Expr, GroupByExpr, JoinConstraint, JoinOperator, ObjectName, SelectItem,
    SetExpr, SetQuantifier, Statement, TableFactor, TableWithJoins, Visit, Visitor,
};

use super::model::{
    Cte, FieldInfo, FilterInfo, JoinClause, JoinKind, Query, StatementParse, TableReference,
    Transformation, UnionInfo,
};

const AGGREGATE_FUNCTIONS: &[&str] = &[
    "array_agg",
    "avg",
    "count",
    "group_concat",
    "listagg",
    "max",
    "min",
    "string_agg",
    "sum",
];

/// Returns the query a lineage-bearing statement reads from
pub fn statement_query(statement: &Statement) -> Option<&ast::Query> {
    match statement {
        Statement::Query(query) => Some(&**query),
        Statement::Insert(insert) => insert.source.as_deref(),
        Statement::CreateTable(create) => create.query.as_deref(),
        Statement::CreateView { query, .. } => Some(&**query),
        _ => None,
    }
}

/// Collects the queries of a single statement
pub struct QueryCollector {
    statement_index: usize,
    /// Lower-cased CTE names visible at the current point of the walk
    scope: Vec<String>,
    ctes: Vec<Cte>,
    queries: Vec<Query>,
    subquery_count: usize,
}

impl QueryCollector {
    pub fn new(statement_index: usize) -> Self {
        Self {
            statement_index,
            scope: Vec::new(),
            ctes: Vec::new(),
            queries: Vec::new(),
            subquery_count: 0,
        }
    }

    /// Walks `body` into `root` and returns everything the statement declared
    pub fn collect_statement(mut self, body: &ast::Query, mut root: Query) -> StatementParse {
        self.collect_query(body, &mut root);
        self.queries.push(root);
        StatementParse {
            ctes: self.ctes,
            queries: self.queries,
        }
    }

    fn collect_query(&mut self, query: &ast::Query, out: &mut Query) {
        let scope_len = self.scope.len();

        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let name = cte.alias.name.value.clone();
                let key = name.to_lowercase();

                // A recursive CTE may read itself
                if with.recursive {
                    self.scope.push(key.clone());
                }

                let mut definition =
                    Query::new(format!("cte_{}_{}", self.statement_index, key), name.clone());
                definition.is_cte = true;
                self.collect_query(&cte.query, &mut definition);

                if !with.recursive {
                    self.scope.push(key);
                }

                self.queries.push(definition.clone());
                self.ctes.push(Cte {
                    name,
                    definition_query: definition,
                });
            }
        }

        self.collect_set_expr(&query.body, out);

        if let Some(order_by) = &query.order_by {
            out.order_by
                .extend(order_by.exprs.iter().map(ToString::to_string));
        }

        self.scope.truncate(scope_len);
    }

    fn collect_set_expr(&mut self, body: &SetExpr, out: &mut Query) {
        match body {
            SetExpr::Select(select) => self.collect_select(select, out),
            SetExpr::Query(query) => self.collect_query(query, out),
            SetExpr::SetOperation {
                op,
                set_quantifier,
                left,
                right,
            } => {
                let before = out.tables.len();
                self.collect_set_expr(left, out);
                self.collect_set_expr(right, out);

                let kind = match set_quantifier {
                    SetQuantifier::None => op.to_string(),
                    quantifier => format!("{} {}", op, quantifier),
                };
                let info = out.union_info.get_or_insert_with(|| UnionInfo {
                    kind,
                    sources: Vec::new(),
                });
                for table in &out.tables[before..] {
                    if !info.sources.contains(&table.name) {
                        info.sources.push(table.name.clone());
                    }
                }
            }
            SetExpr::Insert(statement) => {
                if let Some(source) = statement_query(statement) {
                    self.collect_query(source, out);
                }
            }
            // VALUES and friends read no relations
            _ => {}
        }
    }

    fn collect_select(&mut self, select: &ast::Select, out: &mut Query) {
        for table_with_joins in &select.from {
            self.collect_table_with_joins(table_with_joins, out);
        }

        for item in &select.projection {
            let field = match item {
                SelectItem::UnnamedExpr(expr) => {
                    self.collect_expr_subqueries(expr, out);
                    FieldInfo {
                        expression: expr.to_string(),
                        alias: implicit_column_name(expr),
                        transformation: classify_transformation(expr),
                    }
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    self.collect_expr_subqueries(expr, out);
                    FieldInfo {
                        expression: expr.to_string(),
                        alias: Some(alias.value.clone()),
                        transformation: classify_transformation(expr),
                    }
                }
                wildcard => FieldInfo {
                    expression: wildcard.to_string(),
                    alias: None,
                    transformation: Transformation::Direct,
                },
            };
            out.fields.push(field);
        }

        if let Some(selection) = &select.selection {
            self.collect_expr_subqueries(selection, out);
            out.filters.push(FilterInfo {
                clause: "WHERE".to_string(),
                condition: selection.to_string(),
            });
        }

        if let GroupByExpr::Expressions(exprs, ..) = &select.group_by {
            out.group_by.extend(exprs.iter().map(ToString::to_string));
        }

        if let Some(having) = &select.having {
            self.collect_expr_subqueries(having, out);
            out.filters.push(FilterInfo {
                clause: "HAVING".to_string(),
                condition: having.to_string(),
            });
        }
    }

    /// Records the relations of one `FROM` item and its joins. Returns the
    /// primary relation the joins hang off.
    fn collect_table_with_joins(
        &mut self,
        table_with_joins: &TableWithJoins,
        out: &mut Query,
    ) -> Option<TableReference> {
        let primary = self.collect_relation(&table_with_joins.relation, out);

        for join in &table_with_joins.joins {
            let right = self.collect_relation(&join.relation, out);
            let (kind, constraint) = join_kind(&join.join_operator);
            if let Some(JoinConstraint::On(expr)) = constraint {
                self.collect_expr_subqueries(expr, out);
            }
            if let (Some(left), Some(right)) = (primary.as_ref(), right) {
                out.joins.push(JoinClause {
                    left: left.clone(),
                    right,
                    kind,
                    condition: constraint.and_then(describe_constraint),
                });
            }
        }

        primary
    }

    fn collect_relation(&mut self, relation: &TableFactor, out: &mut Query) -> Option<TableReference> {
        let reference = match relation {
            TableFactor::Table { name, alias, .. } => {
                let name = object_name(name);
                let is_cte = self.scope.contains(&name.to_lowercase());
                TableReference::new(name)
                    .with_alias(alias.as_ref().map(|alias| alias.name.value.clone()))
                    .as_cte(is_cte)
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let alias = alias.as_ref().map(|alias| alias.name.value.clone());
                self.collect_subquery(subquery, alias, out)
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => return self.collect_table_with_joins(table_with_joins, out),
            // Table functions, UNNEST and the like name no relation
            _ => return None,
        };

        out.push_table(reference.clone());
        Some(reference)
    }

    /// Walks a nested query into its own `Query` and returns the reference the
    /// parent uses for it
    fn collect_subquery(
        &mut self,
        subquery: &ast::Query,
        alias: Option<String>,
        out: &mut Query,
    ) -> TableReference {
        let id = format!("sub_{}_{}", self.statement_index, self.subquery_count);
        self.subquery_count += 1;

        let name = alias.clone().unwrap_or_else(|| "subquery".to_string());
        let mut nested = Query::new(id.clone(), name);
        nested.is_sub_query = true;
        self.collect_query(subquery, &mut nested);
        self.queries.push(nested);

        out.add_dependency(id.clone());
        TableReference::new(id).with_alias(alias)
    }

    fn link_expr_subquery(&mut self, subquery: &ast::Query, out: &mut Query) {
        let reference = self.collect_subquery(subquery, None, out);
        out.push_table(reference);
    }

    /// Links every subquery of `expr` (`IN (SELECT ...)`, `EXISTS`, scalar,
    /// function arguments, `ANY`/`ALL` ...) as a nested query of `out`
    fn collect_expr_subqueries(&mut self, expr: &Expr, out: &mut Query) {
        let mut finder = SubqueryFinder::default();
        let _ = expr.visit(&mut finder);
        for subquery in &finder.found {
            self.link_expr_subquery(subquery, out);
        }
    }
}

/// Collects the outermost queries nested in an expression. Queries inside
/// those belong to the nested query and are found when it is walked.
#[derive(Default)]
struct SubqueryFinder {
    depth: usize,
    found: Vec<ast::Query>,
}

impl Visitor for SubqueryFinder {
    type Break = ();

    fn pre_visit_query(&mut self, query: &ast::Query) -> ControlFlow<Self::Break> {
        if self.depth == 0 {
            self.found.push(query.clone());
        }
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &ast::Query) -> ControlFlow<Self::Break> {
        self.depth -= 1;
        ControlFlow::Continue(())
    }
}

/// Joins the parts of a possibly qualified name without their quotes
fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

fn join_kind(operator: &JoinOperator) -> (JoinKind, Option<&JoinConstraint>) {
    match operator {
        JoinOperator::Inner(constraint) => (JoinKind::Inner, Some(constraint)),
        JoinOperator::LeftOuter(constraint) => (JoinKind::Left, Some(constraint)),
        JoinOperator::RightOuter(constraint) => (JoinKind::Right, Some(constraint)),
        JoinOperator::FullOuter(constraint) => (JoinKind::Full, Some(constraint)),
        JoinOperator::CrossJoin => (JoinKind::Cross, None),
        _ => (JoinKind::Inner, None),
    }
}

fn describe_constraint(constraint: &JoinConstraint) -> Option<String> {
    match constraint {
        JoinConstraint::On(expr) => Some(expr.to_string()),
        JoinConstraint::Using(columns) => Some(format!(
            "USING ({})",
            columns
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        )),
        _ => None,
    }
}

fn implicit_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(idents) => idents.last().map(|ident| ident.value.clone()),
        _ => None,
    }
}

/// Determine how a projected expression derives its value
pub fn classify_transformation(expr: &Expr) -> Transformation {
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => Transformation::Direct,
        Expr::Nested(inner) => classify_transformation(inner),
        Expr::Function(func) => {
            let name = func.name.to_string().to_lowercase();
            if func.over.is_some() {
                Transformation::Window
            } else if AGGREGATE_FUNCTIONS.contains(&name.as_str()) {
                Transformation::Aggregation
            } else if name == "concat" || name == "concat_ws" {
                Transformation::Concatenation
            } else {
                Transformation::Expression
            }
        }
        Expr::Case { .. } => Transformation::Conditional,
        Expr::BinaryOp {
            op: BinaryOperator::StringConcat,
            ..
        } => Transformation::Concatenation,
        _ => Transformation::Expression,
    }
}
