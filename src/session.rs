//! Outermost boundary between a SQL editor and the flow pipeline
//!
//! A session turns submitted SQL into a graph plus a one-line notification.
//! It never fails: unparsable input and internal layout faults both become
//! failure notifications, and the last good graph stays available.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use log::{debug, warn};

use crate::config::SqlFlowConfig;
use crate::flow::{FlowGraph, FlowLayout};
use crate::sql_engine::parser::LineageParser;
use crate::sql_engine::remote::{ParseSource, RemoteError, RemoteParser, Resolution, Resolver};

pub const UNPARSABLE_MESSAGE: &str = "Unable to parse the SQL statement, please check the syntax";
pub const INTERNAL_FAULT_MESSAGE: &str =
    "SQL parsing failed, please check that the statement is complete";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Success(String),
    Failure(String),
}

impl Notification {
    pub fn is_success(&self) -> bool {
        matches!(self, Notification::Success(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Notification::Success(message) | Notification::Failure(message) => message,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowOutcome {
    /// `None` when nothing should be redrawn
    pub graph: Option<FlowGraph>,
    pub notification: Notification,
    pub source: ParseSource,
    pub cte_count: usize,
    pub table_count: usize,
}

/// Lays out a resolved parse and builds the matching notification
pub fn process(resolution: Resolution, layout: &FlowLayout) -> FlowOutcome {
    let Resolution { parsed, source } = resolution;
    let cte_count = parsed.cte_count();
    let table_count = parsed.table_count();

    let failure = |message: &str| FlowOutcome {
        graph: None,
        notification: Notification::Failure(message.to_string()),
        source,
        cte_count,
        table_count,
    };

    if parsed.is_empty() {
        return failure(UNPARSABLE_MESSAGE);
    }

    match layout.layout(&parsed) {
        Ok(graph) => FlowOutcome {
            graph: Some(graph),
            notification: Notification::Success(format!(
                "Parsed successfully: found {} CTE(s) and {} table(s), ETL flow generated",
                cte_count, table_count
            )),
            source,
            cte_count,
            table_count,
        },
        Err(e) => {
            warn!("Flow layout failed: {}", e);
            failure(INTERNAL_FAULT_MESSAGE)
        }
    }
}

/// Resolves and lays out submissions; only the newest submission may publish
#[derive(Debug)]
pub struct FlowSession {
    resolver: Resolver,
    layout: FlowLayout,
    generation: AtomicU64,
    latest: Mutex<Option<FlowGraph>>,
}

impl FlowSession {
    pub fn new(resolver: Resolver, layout: FlowLayout) -> Self {
        Self {
            resolver,
            layout,
            generation: AtomicU64::new(0),
            latest: Mutex::new(None),
        }
    }

    pub fn from_config(config: &SqlFlowConfig) -> Result<Self, RemoteError> {
        let remote = if config.remote.enabled {
            Some(RemoteParser::new(
                config.remote.endpoint.clone(),
                config.remote.timeout(),
            )?)
        } else {
            None
        };
        let resolver = Resolver::new(LineageParser::with_dialect(config.dialect.clone()), remote);
        let layout = FlowLayout::from_options(&config.classification, config.layout.clone());
        Ok(Self::new(resolver, layout))
    }

    /// Processes `sql`. Returns `None` when a newer submission started while
    /// this one was in flight; its result is discarded.
    pub fn submit(&self, sql: &str) -> Option<FlowOutcome> {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = process(self.resolver.resolve(sql), &self.layout);

        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        if self.generation.load(Ordering::SeqCst) != ticket {
            debug!("Discarding stale submission {}", ticket);
            return None;
        }
        if let Some(graph) = &outcome.graph {
            *latest = Some(graph.clone());
        }
        Some(outcome)
    }

    /// The last graph a successful submission produced
    pub fn latest_graph(&self) -> Option<FlowGraph> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
