use colored::Colorize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use log::info;
use walkdir::WalkDir;

use crate::config::SqlFlowConfig;
use crate::flow::export::{render, OutputFormat};
use crate::session::{FlowOutcome, FlowSession};

/// Where the SQL to parse comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlInput {
    /// A `.sql` file, or a directory walked for `.sql` files
    Path(PathBuf),
    Stdin,
    Inline(String),
}

impl SqlInput {
    pub fn from_file_arg(arg: &Path) -> Self {
        if arg.as_os_str() == "-" {
            SqlInput::Stdin
        } else {
            SqlInput::Path(arg.to_path_buf())
        }
    }
}

/// One script to process and the name it is reported under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlSource {
    pub name: String,
    pub sql: String,
}

/// The processed form of one script
#[derive(Debug)]
pub struct ParseReport {
    pub name: String,
    pub outcome: FlowOutcome,
    /// Graph in the requested format, empty when no graph was produced
    pub rendered: String,
}

/// Finds `.sql` files below `dir`, sorted for a stable order
pub fn find_sql_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().is_file() && e.path().extension().is_some_and(|ext| ext == "sql"))
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    Ok(files)
}

pub fn load_sources(input: &SqlInput) -> Result<Vec<SqlSource>> {
    match input {
        SqlInput::Inline(sql) => Ok(vec![SqlSource {
            name: "<inline>".to_string(),
            sql: sql.clone(),
        }]),
        SqlInput::Stdin => {
            let mut sql = String::new();
            std::io::stdin()
                .read_to_string(&mut sql)
                .context("Failed to read SQL from stdin")?;
            Ok(vec![SqlSource {
                name: "<stdin>".to_string(),
                sql,
            }])
        }
        SqlInput::Path(path) if path.is_dir() => find_sql_files(path)?
            .into_iter()
            .map(|file| read_source(&file))
            .collect(),
        SqlInput::Path(path) => Ok(vec![read_source(path)?]),
    }
}

fn read_source(path: &Path) -> Result<SqlSource> {
    let sql = fs::read_to_string(path)
        .with_context(|| format!("Failed to read SQL file: {}", path.display()))?;
    Ok(SqlSource {
        name: path.display().to_string(),
        sql,
    })
}

/// Runs every source through one session, in order
pub fn process_sources(
    sources: &[SqlSource],
    config: &SqlFlowConfig,
    format: OutputFormat,
) -> Result<Vec<ParseReport>> {
    let session = FlowSession::from_config(config).context("Failed to set up the remote parser")?;

    let mut reports = Vec::with_capacity(sources.len());
    for source in sources {
        // Submissions are sequential, so none can be superseded
        let Some(outcome) = session.submit(&source.sql) else {
            continue;
        };
        let rendered = match &outcome.graph {
            Some(graph) => render(graph, format).context("Failed to render flow graph")?,
            None => String::new(),
        };
        reports.push(ParseReport {
            name: source.name.clone(),
            outcome,
            rendered,
        });
    }
    Ok(reports)
}

/// Run the parse command. Returns the number of scripts that produced no graph.
pub fn parse_command(
    input: &SqlInput,
    format: OutputFormat,
    remote: Option<String>,
    config_path: Option<PathBuf>,
) -> Result<usize> {
    let start_time = Instant::now();

    let mut config = crate::config::read_config(config_path)?;
    if let Some(endpoint) = remote {
        config.remote.enabled = true;
        config.remote.endpoint = endpoint;
    }

    let sources = load_sources(input)?;
    info!("Processing {} SQL source(s)", sources.len());

    let reports = process_sources(&sources, &config, format)?;
    let mut failures = 0;

    for report in &reports {
        let notification = &report.outcome.notification;
        if notification.is_success() {
            eprintln!(
                "{} {} ({} parser)",
                report.name.bold(),
                notification.message().green(),
                report.outcome.source
            );
        } else {
            failures += 1;
            eprintln!("{} {}", report.name.bold(), notification.message().red());
        }

        if !report.rendered.is_empty() {
            println!("{}", report.rendered);
        }
    }

    eprintln!(
        "Processed {} SQL source(s) in {:.2?}",
        reports.len(),
        start_time.elapsed()
    );

    Ok(failures)
}
