//! Lexer and statement splitter for SQL scripts
//!
//! The lexer never fails: characters it does not understand come out as
//! `Opaque` tokens and unterminated strings or comments run to the end of the
//! input. Comments are kept as tokens so offsets stay exact, but they never end
//! a statement and are left out of the normalized statement text.

/// Lexical class of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Keyword,
    Identifier,
    QuotedIdentifier,
    StringLiteral,
    NumberLiteral,
    Punctuation,
    Operator,
    LineComment,
    BlockComment,
    Opaque,
}

/// A lexeme and its byte offset in the input script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub offset: usize,
}

impl Token {
    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_any_keyword(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|keyword| self.is_keyword(keyword))
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punctuation && self.text == punct
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.kind, TokenKind::LineComment | TokenKind::BlockComment)
    }

    /// Identifiers, quoted or not
    pub fn is_name(&self) -> bool {
        matches!(self.kind, TokenKind::Identifier | TokenKind::QuotedIdentifier)
    }

    /// Identifier text with its quoting removed
    pub fn unquoted(&self) -> String {
        if self.kind != TokenKind::QuotedIdentifier || self.text.len() < 2 {
            return self.text.clone();
        }
        let quote = &self.text[..1];
        let inner = self.text[1..]
            .strip_suffix(quote)
            .unwrap_or(&self.text[1..]);
        inner.replace(&format!("{}{}", quote, quote), quote)
    }
}

// Structural words only. Anything else lexes as an identifier so that tables
// named `date` or `user` still resolve as relations.
const KEYWORDS: &[&str] = &[
    "ALL", "AND", "AS", "BY", "CREATE", "CROSS", "DISTINCT", "EXCEPT", "EXISTS", "FROM", "FULL",
    "GLOBAL", "GROUP", "HAVING", "IF", "IN", "INNER", "INSERT", "INTERSECT", "INTO", "JOIN",
    "LATERAL", "LEFT", "LIMIT", "LOCAL", "MATERIALIZED", "NATURAL", "NOT", "OFFSET", "ON", "OR",
    "ORDER", "OUTER", "OVERWRITE", "QUALIFY", "RECURSIVE", "REPLACE", "RIGHT", "SELECT", "TABLE",
    "TEMP", "TEMPORARY", "UNION", "USING", "VALUES", "VIEW", "WHERE", "WINDOW", "WITH",
];

fn lookup_ident(ident: &str) -> TokenKind {
    let upper = ident.to_ascii_uppercase();
    if KEYWORDS.binary_search(&upper.as_str()).is_ok() {
        TokenKind::Keyword
    } else {
        TokenKind::Identifier
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '#' || ch == '@'
}

fn is_ident_part(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$' || ch == '#' || ch == '@'
}

fn is_operator_run(ch: char) -> bool {
    matches!(ch, '<' | '>' | '=' | '!' | '|' | '&' | ':')
}

/// How a quote is escaped inside string literals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QuoteEscapes {
    /// `'it''s'` only
    #[default]
    Doubled,
    /// MySQL-style `'it\'s'`, doubled quotes still accepted
    Backslash,
}

/// Iterates over the tokens of a script
pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    read_position: usize,
    current_char: Option<char>,
    escapes: QuoteEscapes,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::with_escapes(input, QuoteEscapes::Doubled)
    }

    pub fn with_escapes(input: &'a str, escapes: QuoteEscapes) -> Self {
        let mut lexer = Lexer {
            input,
            position: 0,
            read_position: 0,
            current_char: None,
            escapes,
        };
        lexer.read_char();
        lexer
    }

    fn read_char(&mut self) {
        self.position = self.read_position;
        self.current_char = self.input[self.read_position..].chars().next();
        if let Some(ch) = self.current_char {
            self.read_position += ch.len_utf8();
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.read_position..].chars().next()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.current_char, Some(ch) if ch.is_whitespace()) {
            self.read_char();
        }
    }

    fn read_while(&mut self, predicate: impl Fn(char) -> bool) {
        while matches!(self.current_char, Some(ch) if predicate(ch)) {
            self.read_char();
        }
    }

    fn read_line_comment(&mut self) {
        self.read_while(|ch| ch != '\n');
    }

    fn read_block_comment(&mut self) {
        // Skip the opening "/*"
        self.read_char();
        self.read_char();
        while let Some(ch) = self.current_char {
            self.read_char();
            if ch == '*' && self.current_char == Some('/') {
                self.read_char();
                return;
            }
        }
    }

    /// Reads a quoted run where a doubled quote escapes itself. With
    /// `backslash` set, `\` also escapes the character after it.
    fn read_quoted(&mut self, quote: char, backslash: bool) {
        self.read_char();
        while let Some(ch) = self.current_char {
            self.read_char();
            if ch == '\\' && backslash {
                self.read_char();
                continue;
            }
            if ch == quote {
                if self.current_char == Some(quote) {
                    self.read_char();
                    continue;
                }
                return;
            }
        }
    }

    fn read_number(&mut self) {
        self.read_while(|ch| ch.is_ascii_digit() || ch == '.');
        if matches!(self.current_char, Some('e' | 'E'))
            && matches!(self.peek_char(), Some(ch) if ch.is_ascii_digit() || ch == '-' || ch == '+')
        {
            self.read_char();
            self.read_char();
            self.read_while(|ch| ch.is_ascii_digit());
        }
    }

    pub fn next_token(&mut self) -> Option<Token> {
        self.skip_whitespace();
        let start = self.position;
        let ch = self.current_char?;

        let kind = match ch {
            '-' if self.peek_char() == Some('-') => {
                self.read_line_comment();
                TokenKind::LineComment
            }
            '/' if self.peek_char() == Some('*') => {
                self.read_block_comment();
                TokenKind::BlockComment
            }
            '\'' => {
                self.read_quoted('\'', self.escapes == QuoteEscapes::Backslash);
                TokenKind::StringLiteral
            }
            '"' => {
                // MySQL reads double quotes as a string by default
                self.read_quoted('"', self.escapes == QuoteEscapes::Backslash);
                TokenKind::QuotedIdentifier
            }
            '`' => {
                self.read_quoted('`', false);
                TokenKind::QuotedIdentifier
            }
            c if c.is_ascii_digit() => {
                self.read_number();
                TokenKind::NumberLiteral
            }
            c if is_ident_start(c) => {
                self.read_char();
                self.read_while(is_ident_part);
                lookup_ident(&self.input[start..self.position])
            }
            '(' | ')' | ',' | ';' | '.' | '[' | ']' => {
                self.read_char();
                TokenKind::Punctuation
            }
            c if is_operator_run(c) => {
                self.read_while(is_operator_run);
                TokenKind::Operator
            }
            '+' | '-' | '*' | '/' | '%' | '^' | '~' => {
                self.read_char();
                TokenKind::Operator
            }
            _ => {
                self.read_char();
                TokenKind::Opaque
            }
        };

        Some(Token {
            kind,
            text: self.input[start..self.position].to_string(),
            offset: start,
        })
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

/// Lexes a whole script
pub fn tokenize(sql: &str) -> Vec<Token> {
    Lexer::new(sql).collect()
}

/// Renders tokens back to text, one space wherever the source had a gap
pub fn render_tokens<'t>(tokens: impl IntoIterator<Item = &'t Token>) -> String {
    let mut out = String::new();
    let mut last_end: Option<usize> = None;
    for token in tokens {
        if let Some(end) = last_end {
            if token.offset > end {
                out.push(' ');
            }
        }
        out.push_str(&token.text);
        last_end = Some(token.end());
    }
    out
}

/// One `;`-terminated statement of a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementSpan {
    /// Position among the non-blank statements of the script
    pub index: usize,
    /// Byte range in the input script, terminator excluded
    pub start: usize,
    pub end: usize,
    /// Every token of the statement, comments included
    pub tokens: Vec<Token>,
}

impl StatementSpan {
    /// Tokens that carry meaning (no comments)
    pub fn significant_tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(|token| !token.is_comment())
    }

    /// Statement text with comments removed and whitespace collapsed
    pub fn normalized_sql(&self) -> String {
        render_tokens(self.significant_tokens())
    }

    pub fn contains_keyword(&self, keyword: &str) -> bool {
        self.significant_tokens().any(|token| token.is_keyword(keyword))
    }
}

/// Splits a script into statements. Blank or comment-only statements are
/// skipped and do not consume an index.
pub fn split_statements(sql: &str) -> Vec<StatementSpan> {
    split_statements_with(sql, QuoteEscapes::Doubled)
}

pub fn split_statements_with(sql: &str, escapes: QuoteEscapes) -> Vec<StatementSpan> {
    let mut statements = Vec::new();
    let mut current: Vec<Token> = Vec::new();

    let mut flush = |tokens: &mut Vec<Token>, end: usize| {
        if tokens.iter().any(|token| !token.is_comment()) {
            statements.push(StatementSpan {
                index: statements.len(),
                start: tokens[0].offset,
                end,
                tokens: std::mem::take(tokens),
            });
        } else {
            tokens.clear();
        }
    };

    for token in Lexer::with_escapes(sql, escapes) {
        if token.is_punct(";") {
            flush(&mut current, token.offset);
        } else {
            current.push(token);
        }
    }
    flush(&mut current, sql.len());

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(sql: &str) -> Vec<(TokenKind, String)> {
        tokenize(sql)
            .into_iter()
            .map(|token| (token.kind, token.text))
            .collect()
    }

    #[test]
    fn test_keywords_are_sorted_for_lookup() {
        let mut sorted = KEYWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, KEYWORDS.to_vec());
    }

    #[test]
    fn test_basic_select() {
        let tokens = kinds("SELECT a.id, 'x' FROM t1 WHERE n >= 10");
        assert_eq!(
            tokens,
            vec![
                (TokenKind::Keyword, "SELECT".to_string()),
                (TokenKind::Identifier, "a".to_string()),
                (TokenKind::Punctuation, ".".to_string()),
                (TokenKind::Identifier, "id".to_string()),
                (TokenKind::Punctuation, ",".to_string()),
                (TokenKind::StringLiteral, "'x'".to_string()),
                (TokenKind::Keyword, "FROM".to_string()),
                (TokenKind::Identifier, "t1".to_string()),
                (TokenKind::Keyword, "WHERE".to_string()),
                (TokenKind::Identifier, "n".to_string()),
                (TokenKind::Operator, ">=".to_string()),
                (TokenKind::NumberLiteral, "10".to_string()),
            ]
        );
    }

    #[test]
    fn test_offsets_point_into_source() {
        let sql = "select  x\nfrom  é_table";
        for token in tokenize(sql) {
            assert_eq!(&sql[token.offset..token.end()], token.text);
        }
    }

    #[test]
    fn test_comments_are_tokens() {
        let tokens = kinds("SELECT 1 -- trailing; not a break\n/* block ; */ FROM t");
        assert_eq!(tokens[2].0, TokenKind::LineComment);
        assert_eq!(tokens[2].1, "-- trailing; not a break");
        assert_eq!(tokens[3].0, TokenKind::BlockComment);
        assert_eq!(tokens[3].1, "/* block ; */");
    }

    #[test]
    fn test_string_with_semicolon_and_escaped_quote() {
        let tokens = kinds("SELECT 'a;b''c' FROM t");
        assert_eq!(tokens[1], (TokenKind::StringLiteral, "'a;b''c'".to_string()));
    }

    #[test]
    fn test_backslash_escaped_quote() {
        let sql = r"SELECT 'it\'s; x' FROM t; SELECT 1";
        let tokens: Vec<Token> = Lexer::with_escapes(sql, QuoteEscapes::Backslash).collect();
        assert_eq!(tokens[1].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[1].text, r"'it\'s; x'");

        let statements = split_statements_with(sql, QuoteEscapes::Backslash);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].normalized_sql(), r"SELECT 'it\'s; x' FROM t");
        assert_eq!(statements[1].normalized_sql(), "SELECT 1");

        // Without backslash escapes the literal closes at the escaped quote
        assert_eq!(split_statements(sql)[0].normalized_sql(), r"SELECT 'it\'s");
    }

    #[test]
    fn test_backslash_mode_keeps_doubled_quotes() {
        let tokens: Vec<Token> =
            Lexer::with_escapes("SELECT 'a''b', 'c\\\\' FROM t", QuoteEscapes::Backslash).collect();
        assert_eq!(tokens[1].text, "'a''b'");
        assert_eq!(tokens[3].text, "'c\\\\'");
        assert_eq!(tokens[5].text, "t");
    }

    #[test]
    fn test_quoted_identifier_unquoted() {
        let tokens = tokenize(r#"SELECT * FROM "My ""Table""""#);
        let last = tokens.last().unwrap();
        assert_eq!(last.kind, TokenKind::QuotedIdentifier);
        assert_eq!(last.unquoted(), r#"My "Table""#);
    }

    #[test]
    fn test_unterminated_constructs_do_not_panic() {
        assert_eq!(kinds("SELECT 'oops").last().unwrap().0, TokenKind::StringLiteral);
        assert_eq!(kinds("SELECT /* never closed").last().unwrap().0, TokenKind::BlockComment);
        assert_eq!(kinds("SELECT \"open").last().unwrap().0, TokenKind::QuotedIdentifier);
    }

    #[test]
    fn test_unknown_characters_are_opaque() {
        let tokens = kinds("SELECT ¤ FROM t ?");
        assert_eq!(tokens[1], (TokenKind::Opaque, "¤".to_string()));
        assert_eq!(tokens[4], (TokenKind::Opaque, "?".to_string()));
    }

    #[test]
    fn test_temp_table_names_lex_as_identifiers() {
        let tokens = kinds("SELECT * FROM #staging");
        assert_eq!(tokens[3], (TokenKind::Identifier, "#staging".to_string()));
    }

    #[test]
    fn test_split_statements() {
        let sql = "SELECT 1 FROM a; -- only a comment\n;\n SELECT ';' FROM b;  ";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].index, 0);
        assert_eq!(statements[0].normalized_sql(), "SELECT 1 FROM a");
        assert_eq!(statements[1].index, 1);
        assert_eq!(statements[1].normalized_sql(), "SELECT ';' FROM b");
        assert_eq!(&sql[statements[1].start..statements[1].end], "SELECT ';' FROM b");
    }

    #[test]
    fn test_normalized_sql_drops_comments_and_collapses_whitespace() {
        let statements = split_statements("SELECT a,\n\n   b /* cols */ FROM\tt -- end");
        assert_eq!(statements[0].normalized_sql(), "SELECT a, b FROM t");
    }

    #[test]
    fn test_blank_input_has_no_statements() {
        assert!(split_statements("").is_empty());
        assert!(split_statements("  \n\t ").is_empty());
        assert!(split_statements(";;").is_empty());
    }
}
