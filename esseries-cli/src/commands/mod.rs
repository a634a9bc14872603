pub mod init_config;
pub mod labels;
pub mod parse;

pub use init_config::run_init_config;
pub use labels::run_labels;
pub use parse::run_parse;

use anyhow::{Context, Result};
use esseries::QueryDefinition;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// A bare array of definitions, or `{"queries": [...]}` as sent by the UI
#[derive(Deserialize)]
#[serde(untagged)]
enum QueriesFile {
    List(Vec<QueryDefinition>),
    Wrapped { queries: Vec<QueryDefinition> },
}

/// Read query definitions from a JSON file
pub fn read_queries(path: &Path) -> Result<Vec<QueryDefinition>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let file: QueriesFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse query definitions in {:?}", path))?;
    Ok(match file {
        QueriesFile::List(queries) => queries,
        QueriesFile::Wrapped { queries } => queries,
    })
}
