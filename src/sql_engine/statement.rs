//! Token-level view of a statement: what kind of statement it is, which
//! relation it writes, and a best-effort relation scan for statements the
//! full parser rejects.

use super::model::{JoinClause, JoinKind, Query, TableReference};
use super::tokenizer::{render_tokens, StatementSpan, Token};

/// Statement shapes that carry lineage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    With,
    Insert { target: String },
    CreateTableAs { target: String, temporary: bool },
    CreateViewAs { target: String },
}

impl StatementKind {
    /// Relation written by the statement, if any
    pub fn output_target(&self) -> Option<&str> {
        match self {
            StatementKind::Select | StatementKind::With => None,
            StatementKind::Insert { target }
            | StatementKind::CreateTableAs { target, .. }
            | StatementKind::CreateViewAs { target } => Some(target),
        }
    }

    /// `CREATE TABLE ... AS SELECT` materializes an intermediate table
    pub fn is_temp_table(&self) -> bool {
        matches!(self, StatementKind::CreateTableAs { .. })
    }
}

/// Forward-only cursor over the significant tokens of a statement
struct TokenCursor<'a> {
    tokens: Vec<&'a Token>,
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    fn new(span: &'a StatementSpan) -> Self {
        Self {
            tokens: span.significant_tokens().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.peek()?;
        self.pos += 1;
        Some(token)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|token| token.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.peek().is_some_and(|token| token.text.eq_ignore_ascii_case(word)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.peek().is_some_and(|token| token.is_punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Reads `name(.name)*`, unquoting each part
    fn read_object_name(&mut self) -> Option<String> {
        let mut parts = Vec::new();
        loop {
            let token = self.peek().filter(|token| token.is_name())?;
            parts.push(token.unquoted());
            self.pos += 1;
            let dotted = self.peek().is_some_and(|t| t.is_punct("."))
                && self.peek_at(1).is_some_and(|t| t.is_name());
            if !dotted {
                break;
            }
            self.pos += 1;
        }
        Some(parts.join("."))
    }

    /// Moves past the next `keyword` outside parentheses
    fn skip_past_top_level(&mut self, keyword: &str) -> bool {
        let mut depth = 0usize;
        for (offset, token) in self.tokens[self.pos..].iter().enumerate() {
            if token.is_punct("(") {
                depth += 1;
            } else if token.is_punct(")") {
                depth = depth.saturating_sub(1);
            } else if depth == 0 && token.is_keyword(keyword) {
                self.pos += offset + 1;
                return true;
            }
        }
        false
    }

    fn rest_contains_keyword(&self, keyword: &str) -> bool {
        self.tokens[self.pos..]
            .iter()
            .any(|token| token.is_keyword(keyword))
    }
}

/// Classifies a statement from its leading tokens. `None` means the statement
/// carries no lineage we understand and should be dropped.
pub fn classify(span: &StatementSpan) -> Option<StatementKind> {
    let mut cursor = TokenCursor::new(span);
    while cursor.eat_punct("(") {}

    let first = cursor.advance()?;
    if first.is_keyword("SELECT") {
        return Some(StatementKind::Select);
    }
    if first.is_keyword("WITH") {
        // `WITH ... INSERT INTO t SELECT ...`
        if cursor.skip_past_top_level("INSERT") {
            return classify_insert(&mut cursor);
        }
        return cursor
            .rest_contains_keyword("SELECT")
            .then_some(StatementKind::With);
    }
    if first.is_keyword("INSERT") {
        return classify_insert(&mut cursor);
    }
    if first.is_keyword("CREATE") {
        return classify_create(&mut cursor);
    }
    None
}

fn classify_insert(cursor: &mut TokenCursor<'_>) -> Option<StatementKind> {
    if cursor.eat_keyword("INTO") || cursor.eat_keyword("OVERWRITE") {
        cursor.eat_keyword("TABLE");
    }
    let target = cursor.read_object_name()?;
    cursor
        .rest_contains_keyword("SELECT")
        .then_some(StatementKind::Insert { target })
}

fn classify_create(cursor: &mut TokenCursor<'_>) -> Option<StatementKind> {
    if cursor.eat_keyword("OR") && !cursor.eat_keyword("REPLACE") {
        return None;
    }

    let mut temporary = false;
    loop {
        if cursor.eat_keyword("TEMP") || cursor.eat_keyword("TEMPORARY") {
            temporary = true;
        } else if !(cursor.eat_keyword("GLOBAL")
            || cursor.eat_keyword("LOCAL")
            || cursor.eat_word("VOLATILE")
            || cursor.eat_word("TRANSIENT")
            || cursor.eat_keyword("MATERIALIZED"))
        {
            break;
        }
    }

    let is_table = if cursor.eat_keyword("TABLE") {
        true
    } else if cursor.eat_keyword("VIEW") {
        false
    } else {
        return None;
    };

    if cursor.eat_keyword("IF") {
        cursor.eat_keyword("NOT");
        cursor.eat_keyword("EXISTS");
    }
    let target = cursor.read_object_name()?;

    // Pure DDL (column list, no AS SELECT) has no lineage
    if !(cursor.rest_contains_keyword("AS") && cursor.rest_contains_keyword("SELECT")) {
        return None;
    }

    Some(if is_table {
        StatementKind::CreateTableAs {
            target,
            temporary,
        }
    } else {
        StatementKind::CreateViewAs { target }
    })
}

/// Keywords that end a join condition or a `FROM` list
const CLAUSE_BOUNDARY: &[&str] = &[
    "CROSS", "EXCEPT", "FULL", "GROUP", "HAVING", "INNER", "INTERSECT", "JOIN", "LEFT", "LIMIT",
    "NATURAL", "ORDER", "QUALIFY", "RIGHT", "UNION", "WHERE", "WINDOW",
];

/// Relations found by scanning tokens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationScan {
    pub cte_names: Vec<String>,
    pub tables: Vec<TableReference>,
    pub joins: Vec<JoinClause>,
}

impl RelationScan {
    /// Folds the scanned relations into a statement-level query
    pub fn apply_to(self, query: &mut Query) {
        for table in self.tables {
            query.push_table(table);
        }
        query.joins.extend(self.joins);
    }
}

/// Best-effort recovery: walks the tokens looking for `FROM`/`JOIN` relations,
/// CTE names and join conditions. Nested scopes are tracked by parenthesis
/// depth so a join inside a subquery hangs off that subquery's primary table.
pub fn scan_relations(span: &StatementSpan) -> RelationScan {
    let tokens: Vec<&Token> = span.significant_tokens().collect();
    let mut scan = RelationScan::default();
    let mut primaries: Vec<Option<TableReference>> = vec![None];
    let mut depth = 0usize;
    let mut i = 0;

    while i < tokens.len() {
        let token = tokens[i];

        if token.is_punct("(") {
            depth += 1;
            primaries.push(None);
            i += 1;
            continue;
        }
        if token.is_punct(")") {
            if depth > 0 {
                depth -= 1;
                primaries.pop();
            }
            i += 1;
            continue;
        }

        // `name AS (` introduces a CTE
        if token.is_name()
            && tokens.get(i + 1).is_some_and(|t| t.is_keyword("AS"))
            && tokens.get(i + 2).is_some_and(|t| t.is_punct("("))
            && i > 0
            && (tokens[i - 1].is_any_keyword(&["WITH", "RECURSIVE"]) || tokens[i - 1].is_punct(","))
        {
            scan.cte_names.push(token.unquoted().to_lowercase());
            i += 1;
            continue;
        }

        if token.is_keyword("FROM") {
            let mut next = i + 1;
            while let Some((table, after)) = read_relation(&tokens, next, &scan.cte_names) {
                if primaries[depth].is_none() {
                    primaries[depth] = Some(table.clone());
                }
                scan.tables.push(table);
                next = after;
                if tokens.get(next).is_some_and(|t| t.is_punct(",")) {
                    next += 1;
                } else {
                    break;
                }
            }
            i = next.max(i + 1);
            continue;
        }

        if token.is_keyword("JOIN") {
            let kind = join_kind_before(&tokens, i);
            match read_relation(&tokens, i + 1, &scan.cte_names) {
                Some((right, after)) => {
                    let (condition, end) = read_join_condition(&tokens, after);
                    if let Some(left) = primaries[depth].clone() {
                        scan.joins.push(JoinClause {
                            left,
                            right: right.clone(),
                            kind,
                            condition,
                        });
                    } else {
                        primaries[depth] = Some(right.clone());
                    }
                    scan.tables.push(right);
                    i = end;
                }
                None => i += 1,
            }
            continue;
        }

        i += 1;
    }

    scan
}

fn join_kind_before(tokens: &[&Token], join_index: usize) -> JoinKind {
    let mut i = join_index;
    while i > 0 {
        i -= 1;
        let token = tokens[i];
        if token.is_any_keyword(&["OUTER", "NATURAL"]) {
            continue;
        }
        return if token.is_keyword("LEFT") {
            JoinKind::Left
        } else if token.is_keyword("RIGHT") {
            JoinKind::Right
        } else if token.is_keyword("FULL") {
            JoinKind::Full
        } else if token.is_keyword("CROSS") {
            JoinKind::Cross
        } else {
            JoinKind::Inner
        };
    }
    JoinKind::Inner
}

/// Reads `name [AS] [alias]` at `start`, returning the reference and the index
/// after it
fn read_relation(
    tokens: &[&Token],
    start: usize,
    cte_names: &[String],
) -> Option<(TableReference, usize)> {
    let mut i = start;
    let mut parts = Vec::new();
    loop {
        let token = tokens.get(i).filter(|token| token.is_name())?;
        parts.push(token.unquoted());
        i += 1;
        let dotted = tokens.get(i).is_some_and(|t| t.is_punct("."))
            && tokens.get(i + 1).is_some_and(|t| t.is_name());
        if !dotted {
            break;
        }
        i += 1;
    }

    let name = parts.join(".");
    if tokens.get(i).is_some_and(|t| t.is_keyword("AS")) {
        i += 1;
    }
    let alias = match tokens.get(i) {
        Some(token) if token.is_name() => {
            i += 1;
            Some(token.unquoted())
        }
        _ => None,
    };

    let is_cte = cte_names.contains(&name.to_lowercase());
    Some((TableReference::new(name).with_alias(alias).as_cte(is_cte), i))
}

fn read_join_condition(tokens: &[&Token], start: usize) -> (Option<String>, usize) {
    let Some(first) = tokens.get(start) else {
        return (None, start);
    };
    if !first.is_any_keyword(&["ON", "USING"]) {
        return (None, start);
    }

    let body_start = if first.is_keyword("ON") { start + 1 } else { start };
    let mut depth = 0usize;
    let mut end = body_start;
    while let Some(token) = tokens.get(end) {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            if depth == 0 {
                break;
            }
            depth -= 1;
        } else if depth == 0 && (token.is_any_keyword(CLAUSE_BOUNDARY) || token.is_punct(",")) {
            break;
        }
        end += 1;
    }

    let text = render_tokens(tokens[body_start..end].iter().copied());
    ((!text.is_empty()).then_some(text), end)
}
