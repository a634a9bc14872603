//! Multi-query response parsing
//!
//! Each refID is parsed independently: a backend error, a missing response
//! or a malformed aggregation tree fails that refID only, and every other
//! refID in the batch still produces its result.

use crate::config::ParserConfig;
use crate::error::Error;
use crate::frames::QueryResult;
use crate::query::QueryDefinition;
use crate::response::{MultiSearchResponse, SearchResponse};
use crate::walker::TreeWalker;
use crate::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result or failure of one refID
pub type QueryOutcome = Result<QueryResult>;

/// Turns search responses into named series and tables
#[derive(Debug, Clone, Default)]
pub struct ResponseParser {
    config: Arc<ParserConfig>,
}

impl ResponseParser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parse one refID against its search response
    pub fn parse_query(&self, query: &QueryDefinition, response: Option<&Value>) -> QueryOutcome {
        query.validate()?;
        let body = response.ok_or_else(|| Error::MissingResponse(query.ref_id.clone()))?;
        let response = SearchResponse::new(body);
        if let Some(err) = response.error() {
            return Err(err);
        }
        let root = response.aggregations()?;
        TreeWalker::new(query, &self.config).walk(&root)
    }

    /// Parse a multi-search response, pairing queries and responses by position
    pub fn parse(&self, queries: &[QueryDefinition], response: &MultiSearchResponse) -> BTreeMap<String, QueryOutcome> {
        if queries.len() != response.responses.len() {
            warn!(
                queries = queries.len(),
                responses = response.responses.len(),
                "query and response counts differ"
            );
        }

        let mut results = BTreeMap::new();
        for (i, query) in queries.iter().enumerate() {
            if results.contains_key(&query.ref_id) {
                warn!(ref_id = %query.ref_id, "duplicate refId ignored");
                continue;
            }
            let outcome = self.parse_query(query, response.responses.get(i));
            log_outcome(&query.ref_id, &outcome);
            results.insert(query.ref_id.clone(), outcome);
        }

        info!(queries = results.len(), "parsed multi-search response");
        results
    }

    /// Parse responses already keyed by refID
    pub fn parse_keyed(
        &self,
        queries: &[QueryDefinition],
        responses: &BTreeMap<String, Value>,
    ) -> BTreeMap<String, QueryOutcome> {
        let mut results = BTreeMap::new();
        for query in queries {
            if results.contains_key(&query.ref_id) {
                warn!(ref_id = %query.ref_id, "duplicate refId ignored");
                continue;
            }
            let outcome = self.parse_query(query, responses.get(&query.ref_id));
            log_outcome(&query.ref_id, &outcome);
            results.insert(query.ref_id.clone(), outcome);
        }
        results
    }

    /// Like [`parse`](Self::parse), spreading refIDs over blocking tasks
    ///
    /// Falls back to sequential parsing when parallelism is disabled or the
    /// batch is smaller than `parallel.min_queries`. Output is identical
    /// either way.
    pub async fn parse_concurrent(
        &self,
        queries: Vec<QueryDefinition>,
        response: MultiSearchResponse,
    ) -> BTreeMap<String, QueryOutcome> {
        let parallel = &self.config.parallel;
        if !parallel.enabled || queries.len() < parallel.min_queries {
            return self.parse(&queries, &response);
        }

        debug!(queries = queries.len(), "parsing refIds concurrently");
        let ref_ids: Vec<String> = queries.iter().map(|q| q.ref_id.clone()).collect();
        let mut bodies = response.responses.into_iter();
        let tasks: Vec<_> = queries
            .into_iter()
            .map(|query| {
                let body = bodies.next();
                let parser = self.clone();
                tokio::task::spawn_blocking(move || parser.parse_query(&query, body.as_ref()))
            })
            .collect();

        let mut results = BTreeMap::new();
        for (ref_id, joined) in ref_ids.into_iter().zip(futures::future::join_all(tasks).await) {
            if results.contains_key(&ref_id) {
                warn!(ref_id = %ref_id, "duplicate refId ignored");
                continue;
            }
            let outcome = joined.unwrap_or_else(|e| Err(Error::Task(e.to_string())));
            log_outcome(&ref_id, &outcome);
            results.insert(ref_id, outcome);
        }

        info!(queries = results.len(), "parsed multi-search response");
        results
    }
}

fn log_outcome(ref_id: &str, outcome: &QueryOutcome) {
    match outcome {
        Ok(result) => debug!(
            ref_id,
            series = result.series.len(),
            tables = result.tables.len(),
            "query parsed"
        ),
        Err(e) => warn!(ref_id, kind = e.kind(), error = %e, "query failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn count_query(ref_id: &str) -> QueryDefinition {
        serde_json::from_value(json!({
            "refId": ref_id,
            "metrics": [{ "type": "count", "id": "1" }],
            "bucketAggs": [{ "type": "date_histogram", "field": "@timestamp", "id": "2" }]
        }))
        .unwrap()
    }

    #[test]
    fn test_missing_response() {
        let parser = ResponseParser::default();
        let response = MultiSearchResponse {
            responses: vec![json!({ "aggregations": { "2": { "buckets": [] } } })],
        };
        let results = parser.parse(&[count_query("A"), count_query("B")], &response);
        assert!(results["A"].is_ok());
        assert!(matches!(results["B"], Err(Error::MissingResponse(ref id)) if id == "B"));
    }

    #[test]
    fn test_invalid_query_isolated() {
        let mut bad = count_query("B");
        bad.metric_aggs.push(bad.metric_aggs[0].clone());
        let parser = ResponseParser::default();
        let response = MultiSearchResponse {
            responses: vec![
                json!({ "aggregations": { "2": { "buckets": [] } } }),
                json!({ "aggregations": { "2": { "buckets": [] } } }),
            ],
        };
        let results = parser.parse(&[count_query("A"), bad], &response);
        assert!(results["A"].is_ok());
        assert!(matches!(results["B"], Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn test_parse_keyed() {
        let parser = ResponseParser::default();
        let mut responses = BTreeMap::new();
        responses.insert(
            "B".to_string(),
            json!({ "aggregations": { "2": { "buckets": [{ "key": 1000, "doc_count": 3 }] } } }),
        );
        let results = parser.parse_keyed(&[count_query("A"), count_query("B")], &responses);
        assert!(results["A"].is_err());
        let b = results["B"].as_ref().unwrap();
        assert_eq!(b.series[0].values(), vec![Some(3.0)]);
    }
}
