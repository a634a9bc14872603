use super::read_queries;
use anyhow::Result;
use esseries::naming::expand_query;
use esseries::ParserConfig;
use std::path::Path;

/// Print the base series labels of every query, one per line
pub fn run_labels(config: &ParserConfig, queries_path: &Path) -> Result<()> {
    for query in read_queries(queries_path)? {
        if let Err(e) = query.validate() {
            println!("{}\t<invalid: {}>", query.ref_id, e);
            continue;
        }
        let labels = expand_query(&query, config);
        if labels.is_empty() {
            println!("{}\t<no visible metrics>", query.ref_id);
        }
        for label in labels {
            println!("{}\t{}", query.ref_id, label.label);
        }
    }
    Ok(())
}
