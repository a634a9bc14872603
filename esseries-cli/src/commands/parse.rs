use super::read_queries;
use anyhow::{Context, Result};
use esseries::{MultiSearchResponse, ParserConfig, QueryReport, ResponseParser};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Parse a response file and print one report per refId as JSON
pub async fn run_parse(
    config: ParserConfig,
    queries_path: &Path,
    response_path: &Path,
    keyed: bool,
    pretty: bool,
) -> Result<()> {
    let queries = read_queries(queries_path)?;
    let bytes = fs::read(response_path)
        .with_context(|| format!("Failed to read response {:?}", response_path))?;

    let parser = ResponseParser::new(config);
    let results = if keyed {
        let responses: BTreeMap<String, Value> = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse keyed responses in {:?}", response_path))?;
        parser.parse_keyed(&queries, &responses)
    } else {
        let response = MultiSearchResponse::from_slice(&bytes)
            .with_context(|| format!("Failed to parse multi-search response in {:?}", response_path))?;
        parser.parse_concurrent(queries, response).await
    };

    let reports: Vec<QueryReport> = results
        .iter()
        .map(|(ref_id, outcome)| QueryReport::from_outcome(ref_id, outcome))
        .collect();
    let failed = results.values().filter(|o| o.is_err()).count();

    let output = if pretty {
        serde_json::to_string_pretty(&reports)?
    } else {
        serde_json::to_string(&reports)?
    };
    println!("{}", output);

    if failed > 0 {
        tracing::warn!("{} of {} queries failed", failed, results.len());
    }
    Ok(())
}
