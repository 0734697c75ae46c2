//! Tests for the parse command

use std::fs;
use std::path::Path;

use tempfile::tempdir;

use crate::commands::parse::{find_sql_files, load_sources, process_sources, SqlInput};
use crate::config::SqlFlowConfig;
use crate::flow::export::OutputFormat;

fn write(dir: &Path, relative: &str, sql: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, sql).unwrap();
}

#[test]
fn test_find_sql_files_walks_subdirectories() {
    let temp_dir = tempdir().unwrap();
    write(temp_dir.path(), "b.sql", "SELECT 1");
    write(temp_dir.path(), "nested/a.sql", "SELECT 1");
    write(temp_dir.path(), "notes.txt", "SELECT 1");

    let files = find_sql_files(temp_dir.path()).unwrap();
    let names: Vec<String> = files
        .iter()
        .map(|f| f.strip_prefix(temp_dir.path()).unwrap().display().to_string())
        .collect();
    assert_eq!(names, vec!["b.sql".to_string(), format!("nested{}a.sql", std::path::MAIN_SEPARATOR)]);
}

#[test]
fn test_find_sql_files_rejects_files() {
    let temp_dir = tempdir().unwrap();
    write(temp_dir.path(), "a.sql", "SELECT 1");
    assert!(find_sql_files(&temp_dir.path().join("a.sql")).is_err());
}

#[test]
fn test_missing_file_is_an_error() {
    let temp_dir = tempdir().unwrap();
    let input = SqlInput::Path(temp_dir.path().join("missing.sql"));
    assert!(load_sources(&input).is_err());
}

#[test]
fn test_directory_sources_are_processed_independently() {
    let temp_dir = tempdir().unwrap();
    write(
        temp_dir.path(),
        "good.sql",
        "WITH recent AS (SELECT * FROM sales) SELECT * FROM recent",
    );
    write(temp_dir.path(), "bad.sql", "SELEC * FORM x");

    let sources = load_sources(&SqlInput::Path(temp_dir.path().to_path_buf())).unwrap();
    assert_eq!(sources.len(), 2);

    let reports = process_sources(&sources, &SqlFlowConfig::default(), OutputFormat::Dot).unwrap();
    assert_eq!(reports.len(), 2);

    // Sorted: bad.sql first
    assert!(!reports[0].outcome.notification.is_success());
    assert!(reports[0].rendered.is_empty());

    assert!(reports[1].outcome.notification.is_success());
    assert!(reports[1].rendered.contains("\"source:sales\" -> \"cte:recent\";"));
}

#[test]
fn test_inline_json_output() {
    let sources = load_sources(&SqlInput::Inline(
        "SELECT * FROM orders o JOIN customers c ON o.cust_id = c.id".to_string(),
    ))
    .unwrap();
    let reports = process_sources(&sources, &SqlFlowConfig::default(), OutputFormat::Json).unwrap();

    let value: serde_json::Value = serde_json::from_str(&reports[0].rendered).unwrap();
    assert_eq!(value["nodes"].as_array().unwrap().len(), 3);
    assert_eq!(value["edges"].as_array().unwrap().len(), 2);
}

#[test]
fn test_dash_means_stdin() {
    assert_eq!(SqlInput::from_file_arg(Path::new("-")), SqlInput::Stdin);
    assert_eq!(
        SqlInput::from_file_arg(Path::new("q.sql")),
        SqlInput::Path("q.sql".into())
    );
}
