//! Optional remote parse service with local fallback

use std::fmt;
use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use thiserror::Error;

use super::model::ParsedSql;
use super::parser::LineageParser;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote parse request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("remote parser answered with status {0}")]
    Status(u16),

    #[error("remote parser returned malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("remote parser recognized no queries")]
    Empty,

    #[error("remote answer is incomplete: {0}")]
    Incomplete(String),
}

/// Client for a service that accepts raw SQL and answers with `ParsedSql` JSON
#[derive(Debug, Clone)]
pub struct RemoteParser {
    endpoint: String,
    client: Client,
}

impl RemoteParser {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn parse(&self, sql: &str) -> Result<ParsedSql, RemoteError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "text/plain")
            .body(sql.to_string())
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        let body = response.text()?;
        let parsed: ParsedSql = serde_json::from_str(&body)?;
        if parsed.is_empty() {
            return Err(RemoteError::Empty);
        }
        check_complete(&parsed)?;
        Ok(parsed)
    }
}

/// Every field of the model is defaulted, so a document of another shape
/// still decodes. Unnamed relations mean it was not a lineage answer.
fn check_complete(parsed: &ParsedSql) -> Result<(), RemoteError> {
    if let Some(cte) = parsed.ctes.iter().find(|cte| cte.name.trim().is_empty()) {
        return Err(RemoteError::Incomplete(format!(
            "CTE defined by query '{}' has no name",
            cte.definition_query.id
        )));
    }

    for query in &parsed.all_queries {
        if query.tables.iter().any(|table| table.name.trim().is_empty()) {
            return Err(RemoteError::Incomplete(format!(
                "query '{}' reads an unnamed table",
                query.id
            )));
        }
        if query
            .joins
            .iter()
            .any(|join| join.left.name.trim().is_empty() || join.right.name.trim().is_empty())
        {
            return Err(RemoteError::Incomplete(format!(
                "query '{}' has a join without both sides",
                query.id
            )));
        }
        if query.outputs.iter().any(|output| output.trim().is_empty()) {
            return Err(RemoteError::Incomplete(format!(
                "query '{}' writes an unnamed relation",
                query.id
            )));
        }
    }
    Ok(())
}

/// Which tier produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseSource {
    Remote,
    Local,
}

impl fmt::Display for ParseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseSource::Remote => write!(f, "remote"),
            ParseSource::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub parsed: ParsedSql,
    pub source: ParseSource,
}

/// Two-tier resolution: the remote service when configured, the local parser
/// whenever that fails or is absent.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    local: LineageParser,
    remote: Option<RemoteParser>,
}

impl Resolver {
    pub fn new(local: LineageParser, remote: Option<RemoteParser>) -> Self {
        Self { local, remote }
    }

    pub fn local_only(local: LineageParser) -> Self {
        Self::new(local, None)
    }

    pub fn resolve(&self, sql: &str) -> Resolution {
        let remote = match &self.remote {
            Some(remote) => remote.parse(sql),
            None => {
                return self.resolve_locally(sql);
            }
        };

        match remote {
            Ok(parsed) => Resolution {
                parsed,
                source: ParseSource::Remote,
            },
            Err(e) => {
                debug!("Remote parse unavailable, falling back to local parser: {}", e);
                self.resolve_locally(sql)
            }
        }
    }

    fn resolve_locally(&self, sql: &str) -> Resolution {
        Resolution {
            parsed: self.local.parse(sql),
            source: ParseSource::Local,
        }
    }
}
