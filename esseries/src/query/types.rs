//! Query definition types
//!
//! These mirror the query model the visualization layer sends alongside each
//! refID: an ordered bucket aggregation chain plus a list of metric
//! aggregations. Settings stay open key-value maps; typed accessors below
//! read the handful of keys the response parser cares about.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Percents requested by Elasticsearch when a percentiles agg declares none
pub const DEFAULT_PERCENTS: [f64; 7] = [1.0, 5.0, 25.0, 50.0, 75.0, 95.0, 99.0];

/// One refID's query definition
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDefinition {
    #[serde(default, rename = "refId", alias = "refID")]
    pub ref_id: String,

    #[serde(default)]
    pub time_field: String,

    /// Series name template, e.g. `{{term host}} {{metric}}`
    #[serde(default, rename = "alias", alias = "aliasPattern")]
    pub alias_pattern: Option<String>,

    /// Evaluated in order; index N corresponds to nesting depth N
    #[serde(default)]
    pub bucket_aggs: Vec<BucketAggSpec>,

    #[serde(default, rename = "metrics", alias = "metricAggs")]
    pub metric_aggs: Vec<MetricAggSpec>,
}

impl QueryDefinition {
    /// Whether the last bucket aggregation groups by time
    pub fn is_time_series(&self) -> bool {
        self.bucket_aggs
            .last()
            .map(|agg| agg.agg_type == BucketAggType::DateHistogram)
            .unwrap_or(false)
    }

    pub fn metric(&self, id: &str) -> Option<&MetricAggSpec> {
        self.metric_aggs.iter().find(|m| m.id == id)
    }

    /// Alias pattern with surrounding whitespace removed; `None` when blank
    pub fn alias(&self) -> Option<&str> {
        self.alias_pattern
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }

    /// Reject definitions the walker cannot interpret unambiguously
    pub fn validate(&self) -> crate::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for metric in &self.metric_aggs {
            if !metric.id.is_empty() && !seen.insert(metric.id.as_str()) {
                return Err(crate::Error::InvalidQuery(format!(
                    "duplicate metric id {} in query {}",
                    metric.id, self.ref_id
                )));
            }
        }

        let mut bucket_ids = std::collections::HashSet::new();
        for agg in &self.bucket_aggs {
            if agg.id.is_empty() {
                return Err(crate::Error::InvalidQuery(format!(
                    "bucket aggregation of type {} in query {} has no id",
                    agg.agg_type, self.ref_id
                )));
            }
            if !bucket_ids.insert(agg.id.as_str()) {
                return Err(crate::Error::InvalidQuery(format!(
                    "duplicate bucket aggregation id {} in query {}",
                    agg.id, self.ref_id
                )));
            }
        }

        for metric in &self.metric_aggs {
            if metric.metric_type == MetricAggType::BucketScript && metric.script().is_none() {
                return Err(crate::Error::InvalidQuery(format!(
                    "bucket_script metric {} has no script",
                    metric.id
                )));
            }
        }

        Ok(())
    }
}

/// Bucket aggregation types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum BucketAggType {
    Terms,
    DateHistogram,
    Histogram,
    Filters,
    GeohashGrid,
    Nested,
    Other(String),
}

impl BucketAggType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Terms => "terms",
            Self::DateHistogram => "date_histogram",
            Self::Histogram => "histogram",
            Self::Filters => "filters",
            Self::GeohashGrid => "geohash_grid",
            Self::Nested => "nested",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for BucketAggType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "terms" => Self::Terms,
            "date_histogram" => Self::DateHistogram,
            "histogram" => Self::Histogram,
            "filters" => Self::Filters,
            "geohash_grid" => Self::GeohashGrid,
            "nested" => Self::Nested,
            _ => Self::Other(s),
        }
    }
}

impl From<BucketAggType> for String {
    fn from(t: BucketAggType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for BucketAggType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single filter of a `filters` bucket aggregation
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct FilterSpec {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl FilterSpec {
    /// Key under which the backend returns this filter's bucket
    pub fn key(&self) -> &str {
        match self.label.as_deref() {
            Some(label) if !label.is_empty() => label,
            _ if !self.query.is_empty() => &self.query,
            _ => "*",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BucketAggSpec {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub agg_type: BucketAggType,

    #[serde(default)]
    pub field: Option<String>,

    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl BucketAggSpec {
    /// Number of leading and trailing buckets to drop (date_histogram only)
    pub fn trim_edges(&self) -> usize {
        if self.agg_type != BucketAggType::DateHistogram {
            return 0;
        }
        self.settings
            .get("trimEdges")
            .and_then(value_as_f64)
            .filter(|n| *n > 0.0)
            .map(|n| n.min(u32::MAX as f64) as usize)
            .unwrap_or(0)
    }

    /// Declared filters, in declaration order
    pub fn filters(&self) -> Vec<FilterSpec> {
        self.settings
            .get("filters")
            .and_then(|v| serde_json::from_value::<Vec<FilterSpec>>(v.clone()).ok())
            .unwrap_or_default()
    }

    /// Name of the group-by dimension this level contributes
    pub fn group_field(&self) -> &str {
        match (&self.agg_type, self.field.as_deref()) {
            (BucketAggType::Filters, _) => "filter",
            (_, Some(field)) => field,
            (_, None) => self.id.as_str(),
        }
    }
}

/// Metric aggregation types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum MetricAggType {
    Count,
    Avg,
    Sum,
    Max,
    Min,
    Cardinality,
    Percentiles,
    ExtendedStats,
    TopMetrics,
    BucketScript,
    MovingAvg,
    MovingFn,
    Derivative,
    CumulativeSum,
    SerialDiff,
    Rate,
    RawDocument,
    RawData,
    Logs,
    Other(String),
}

impl MetricAggType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Count => "count",
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
            Self::Cardinality => "cardinality",
            Self::Percentiles => "percentiles",
            Self::ExtendedStats => "extended_stats",
            Self::TopMetrics => "top_metrics",
            Self::BucketScript => "bucket_script",
            Self::MovingAvg => "moving_avg",
            Self::MovingFn => "moving_fn",
            Self::Derivative => "derivative",
            Self::CumulativeSum => "cumulative_sum",
            Self::SerialDiff => "serial_diff",
            Self::Rate => "rate",
            Self::RawDocument => "raw_document",
            Self::RawData => "raw_data",
            Self::Logs => "logs",
            Self::Other(s) => s,
        }
    }

    /// Human-readable name used in series labels
    pub fn display_name(&self) -> &str {
        match self {
            Self::Count => "Count",
            Self::Avg => "Average",
            Self::Sum => "Sum",
            Self::Max => "Max",
            Self::Min => "Min",
            Self::Cardinality => "Unique Count",
            Self::Percentiles => "Percentiles",
            Self::ExtendedStats => "Extended Stats",
            Self::TopMetrics => "Top Metrics",
            Self::BucketScript => "Bucket Script",
            Self::MovingAvg => "Moving Average",
            Self::MovingFn => "Moving Function",
            Self::Derivative => "Derivative",
            Self::CumulativeSum => "Cumulative Sum",
            Self::SerialDiff => "Serial Difference",
            Self::Rate => "Rate",
            Self::RawDocument => "Raw Document",
            Self::RawData => "Raw Data",
            Self::Logs => "Logs",
            Self::Other(s) => s,
        }
    }

    /// Pipeline aggs whose `field` names a single upstream metric id
    pub fn is_single_path_pipeline(&self) -> bool {
        matches!(
            self,
            Self::MovingAvg
                | Self::MovingFn
                | Self::Derivative
                | Self::CumulativeSum
                | Self::SerialDiff
        )
    }

    /// Document retrieval types; these carry no aggregation values
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::RawDocument | Self::RawData | Self::Logs)
    }
}

impl From<String> for MetricAggType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "count" => Self::Count,
            "avg" => Self::Avg,
            "sum" => Self::Sum,
            "max" => Self::Max,
            "min" => Self::Min,
            "cardinality" => Self::Cardinality,
            "percentiles" => Self::Percentiles,
            "extended_stats" => Self::ExtendedStats,
            "top_metrics" => Self::TopMetrics,
            "bucket_script" => Self::BucketScript,
            "moving_avg" => Self::MovingAvg,
            "moving_fn" => Self::MovingFn,
            "derivative" => Self::Derivative,
            "cumulative_sum" => Self::CumulativeSum,
            "serial_diff" => Self::SerialDiff,
            "rate" => Self::Rate,
            "raw_document" => Self::RawDocument,
            "raw_data" => Self::RawData,
            "logs" => Self::Logs,
            _ => Self::Other(s),
        }
    }
}

impl From<MetricAggType> for String {
    fn from(t: MetricAggType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for MetricAggType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics an extended_stats metric can expose, in output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtendedStat {
    Max,
    StdDeviationBoundsLower,
    StdDeviationBoundsUpper,
    Min,
    Avg,
    Sum,
    Count,
    StdDeviation,
}

impl ExtendedStat {
    pub const ALL: [ExtendedStat; 8] = [
        Self::Max,
        Self::StdDeviationBoundsLower,
        Self::StdDeviationBoundsUpper,
        Self::Min,
        Self::Avg,
        Self::Sum,
        Self::Count,
        Self::StdDeviation,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::StdDeviationBoundsLower => "std_deviation_bounds_lower",
            Self::StdDeviationBoundsUpper => "std_deviation_bounds_upper",
            Self::Min => "min",
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Count => "count",
            Self::StdDeviation => "std_deviation",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Max => "Max",
            Self::StdDeviationBoundsLower => "Std Dev Lower",
            Self::StdDeviationBoundsUpper => "Std Dev Upper",
            Self::Min => "Min",
            Self::Avg => "Avg",
            Self::Sum => "Sum",
            Self::Count => "Count",
            Self::StdDeviation => "Std Dev",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.key() == key)
    }
}

/// Binds a script variable to an upstream metric
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineVariable {
    pub name: String,

    /// Metric id, `_count`, or a bracket path such as `1[99.0]`
    #[serde(rename = "pipelineAgg", alias = "pipelineAggID", alias = "pipelineAggId")]
    pub pipeline_agg_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricAggSpec {
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type")]
    pub metric_type: MetricAggType,

    #[serde(default)]
    pub field: Option<String>,

    #[serde(default)]
    pub hide: bool,

    #[serde(default)]
    pub settings: Map<String, Value>,

    /// Enabled extended_stats flags; also accepted under `settings.meta`
    #[serde(default)]
    pub meta: Map<String, Value>,

    #[serde(default)]
    pub pipeline_variables: Vec<PipelineVariable>,
}

impl MetricAggSpec {
    /// Declared field, ignoring the UI placeholder for unset fields
    pub fn field(&self) -> Option<&str> {
        self.field
            .as_deref()
            .filter(|f| !f.is_empty() && *f != "select field")
    }

    /// Percents declared in settings, sorted ascending
    pub fn percents(&self) -> Option<Vec<f64>> {
        let values = self.settings.get("percents")?.as_array()?;
        let mut percents: Vec<f64> = values.iter().filter_map(value_as_f64).collect();
        if percents.is_empty() {
            return None;
        }
        percents.sort_by(|a, b| a.total_cmp(b));
        percents.dedup();
        Some(percents)
    }

    /// Enabled extended stats in their fixed output order
    pub fn enabled_stats(&self) -> Vec<ExtendedStat> {
        let meta = if self.meta.is_empty() {
            self.settings.get("meta").and_then(Value::as_object)
        } else {
            Some(&self.meta)
        };
        let Some(meta) = meta else {
            return Vec::new();
        };
        ExtendedStat::ALL
            .iter()
            .copied()
            .filter(|stat| meta.get(stat.key()).and_then(Value::as_bool).unwrap_or(false))
            .collect()
    }

    /// bucket_script source text; accepts `"script": "..."` and `{"inline": "..."}`
    pub fn script(&self) -> Option<&str> {
        match self.settings.get("script")? {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => obj
                .get("inline")
                .or_else(|| obj.get("source"))
                .and_then(Value::as_str),
            _ => None,
        }
    }

    /// Fields requested by a top_metrics metric
    pub fn top_metrics_fields(&self) -> Vec<String> {
        self.settings
            .get("metrics")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Numbers and numeric strings are both common in settings maps
pub(crate) fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
