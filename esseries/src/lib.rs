//! Elasticsearch aggregation responses as named time series
//!
//! Given the query definitions sent to `_msearch` and the response that came
//! back, this crate walks each refID's aggregation tree and produces named
//! time series (or tables, when the innermost bucket aggregation is not a
//! date_histogram).
//!
//! # Pipeline
//!
//! - [`response`] - typed, lazily decoded views over the response JSON
//! - [`naming`] - metric labels, group-key prefixes and alias patterns
//! - [`pipeline`] - bucket_script variables and expression evaluation
//! - [`walker`] - recursive descent over bucket aggregations
//! - [`parser`] - per-refID pairing and error isolation
//!
//! # Example
//!
//! ```
//! use esseries::{MultiSearchResponse, ParserConfig, QueryDefinition, ResponseParser};
//! use serde_json::json;
//!
//! let query: QueryDefinition = serde_json::from_value(json!({
//!     "refId": "A",
//!     "metrics": [{ "type": "count", "id": "1" }],
//!     "bucketAggs": [{ "type": "date_histogram", "field": "@timestamp", "id": "2" }]
//! })).unwrap();
//! let response: MultiSearchResponse = serde_json::from_value(json!({
//!     "responses": [{ "aggregations": { "2": { "buckets": [
//!         { "key": 1000, "doc_count": 10 },
//!         { "key": 2000, "doc_count": 15 }
//!     ] } } }]
//! })).unwrap();
//!
//! let results = ResponseParser::new(ParserConfig::default()).parse(&[query], &response);
//! let a = results["A"].as_ref().unwrap();
//! assert_eq!(a.series[0].name, "Count");
//! ```

pub mod config;
pub mod error;
pub mod frames;
pub mod naming;
pub mod parser;
pub mod pipeline;
pub mod query;
pub mod response;
pub mod walker;

pub use config::ParserConfig;
pub use error::{Error, ErrorReport};
pub use frames::{Cell, DataTable, NamedSeries, Point, QueryReport, QueryResult};
pub use parser::{QueryOutcome, ResponseParser};
pub use query::QueryDefinition;
pub use response::MultiSearchResponse;

/// Result type for response parsing
pub type Result<T> = std::result::Result<T, Error>;
