//! Typed access to Elasticsearch aggregation responses
//!
//! Responses stay as `serde_json::Value` and are decoded lazily: a node is a
//! borrowed view over one JSON object, and the caller states which bucket or
//! metric it expects. Decoding against the declared type is what lets a
//! version-skewed response surface as [`Error::MalformedResponse`] instead of
//! silently producing empty series.

use crate::error::Error;
use crate::query::{ExtendedStat, MetricAggSpec, MetricAggType};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `_msearch` response envelope
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MultiSearchResponse {
    #[serde(default)]
    pub responses: Vec<Value>,
}

impl MultiSearchResponse {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// View over one entry of a multi-search response
#[derive(Debug, Clone, Copy)]
pub struct SearchResponse<'a> {
    body: &'a Value,
}

impl<'a> SearchResponse<'a> {
    pub fn new(body: &'a Value) -> Self {
        Self { body }
    }

    /// Backend error carried in place of a result, if any
    pub fn error(&self) -> Option<Error> {
        let error = self.body.get("error")?;
        let status = self
            .body
            .get("status")
            .and_then(Value::as_u64)
            .map(|s| s as u16)
            .unwrap_or(500);

        let reason = error
            .get("root_cause")
            .and_then(Value::as_array)
            .and_then(|causes| causes.first())
            .and_then(|cause| cause.get("reason"))
            .or_else(|| error.get("reason"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });

        Some(Error::Backend { status, reason })
    }

    /// Root aggregation node; an absent `aggregations` key reads as empty
    pub fn aggregations(&self) -> Result<AggNode<'a>> {
        match self.body.get("aggregations") {
            None | Some(Value::Null) => Ok(AggNode::empty()),
            Some(Value::Object(map)) => Ok(AggNode::new(map, "aggregations")),
            Some(other) => Err(Error::malformed(
                "aggregations",
                format!("expected object, found {}", kind_of(other)),
            )),
        }
    }
}

static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();

/// Borrowed view over one aggregation node (the root or a bucket body)
#[derive(Debug, Clone)]
pub struct AggNode<'a> {
    fields: &'a Map<String, Value>,
    path: String,
}

impl<'a> AggNode<'a> {
    pub fn new(fields: &'a Map<String, Value>, path: impl Into<String>) -> Self {
        Self {
            fields,
            path: path.into(),
        }
    }

    pub fn empty() -> Self {
        Self::new(EMPTY.get_or_init(Map::new), "aggregations")
    }

    /// Parse a standalone node, as found under `aggregations`
    pub fn from_value(value: &'a Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::new(map, "aggregations")),
            other => Err(Error::malformed(
                "aggregations",
                format!("expected object, found {}", kind_of(other)),
            )),
        }
    }

    /// Location of this node, for error messages
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.fields.get(key)
    }

    pub fn doc_count(&self) -> Option<f64> {
        self.fields.get("doc_count").and_then(Value::as_f64)
    }

    /// Bucket collection produced by the bucket aggregation `id`
    pub fn buckets_for(&self, id: &str) -> Result<BucketSet<'a>> {
        let agg_path = format!("{}.{}", self.path, id);
        let agg = self
            .fields
            .get(id)
            .ok_or_else(|| Error::malformed(&agg_path, "bucket aggregation missing"))?;
        let buckets = agg
            .get("buckets")
            .ok_or_else(|| Error::malformed(&agg_path, "no buckets in aggregation result"))?;
        let buckets_path = format!("{}.buckets", agg_path);

        match buckets {
            Value::Array(entries) => entries
                .iter()
                .enumerate()
                .map(|(i, entry)| BucketEntry::parse(entry, format!("{}[{}]", buckets_path, i)))
                .collect::<Result<Vec<_>>>()
                .map(BucketSet::Array),
            Value::Object(entries) => entries
                .iter()
                .map(|(label, entry)| {
                    let path = format!("{}.{}", buckets_path, label);
                    match entry {
                        Value::Object(map) => Ok((label.clone(), AggNode::new(map, path))),
                        other => Err(Error::malformed(
                            path,
                            format!("expected keyed bucket object, found {}", kind_of(other)),
                        )),
                    }
                })
                .collect::<Result<Vec<_>>>()
                .map(BucketSet::Keyed),
            other => Err(Error::malformed(
                buckets_path,
                format!("expected array or object, found {}", kind_of(other)),
            )),
        }
    }

    /// Decode the result of `metric` in this bucket, per its declared type
    pub fn metric_value(&self, metric: &MetricAggSpec) -> Result<MetricValue<'a>> {
        if metric.metric_type == MetricAggType::Count {
            return Ok(MetricValue::Scalar(self.doc_count()));
        }

        let path = format!("{}.{}", self.path, metric.id);
        let Some(raw) = self.fields.get(&metric.id) else {
            return Ok(MetricValue::Missing);
        };

        match metric.metric_type {
            MetricAggType::Percentiles => decode_percentiles(raw, &path),
            MetricAggType::ExtendedStats => match raw {
                Value::Object(stats) => Ok(MetricValue::Stats(ExtendedStatsValue { stats, path })),
                other => Err(Error::malformed(
                    path,
                    format!("expected extended_stats object, found {}", kind_of(other)),
                )),
            },
            MetricAggType::TopMetrics => decode_top_metrics(raw, &path),
            _ => decode_single_value(raw, &path).map(MetricValue::Scalar),
        }
    }
}

/// Buckets of one bucket aggregation
#[derive(Debug, Clone)]
pub enum BucketSet<'a> {
    /// terms, histogram, date_histogram: response order is meaningful
    Array(Vec<BucketEntry<'a>>),
    /// filters and other keyed aggs: label -> bucket body
    Keyed(Vec<(String, AggNode<'a>)>),
}

/// One array-style bucket
#[derive(Debug, Clone)]
pub struct BucketEntry<'a> {
    pub key: &'a Value,
    pub key_as_string: Option<&'a str>,
    pub node: AggNode<'a>,
}

impl<'a> BucketEntry<'a> {
    fn parse(entry: &'a Value, path: String) -> Result<Self> {
        let Value::Object(map) = entry else {
            return Err(Error::malformed(
                path,
                format!("expected bucket object, found {}", kind_of(entry)),
            ));
        };
        let key = map
            .get("key")
            .ok_or_else(|| Error::malformed(&path, "bucket has no key"))?;
        Ok(Self {
            key,
            key_as_string: map.get("key_as_string").and_then(Value::as_str),
            node: AggNode::new(map, path),
        })
    }

    /// Display form of the key, as used for group-by labels
    pub fn key_label(&self) -> String {
        match self.key {
            Value::String(s) => s.clone(),
            Value::Number(n) => match self.key_as_string {
                Some(s) => s.to_string(),
                None => format_number(n.as_f64().unwrap_or_default()),
            },
            Value::Bool(b) => self
                .key_as_string
                .map(str::to_string)
                .unwrap_or_else(|| b.to_string()),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Key as epoch milliseconds, for date_histogram buckets
    pub fn timestamp_millis(&self) -> Result<i64> {
        match self.key {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| Error::malformed(self.node.path(), "bucket key is not a timestamp")),
            Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp_millis())
                .or_else(|_| s.parse::<i64>())
                .map_err(|_| {
                    Error::malformed(
                        self.node.path(),
                        format!("bucket key {:?} is not a timestamp", s),
                    )
                }),
            other => Err(Error::malformed(
                self.node.path(),
                format!("bucket key {} is not a timestamp", kind_of(other)),
            )),
        }
    }
}

/// Decoded value of one metric within one bucket
#[derive(Debug, Clone)]
pub enum MetricValue<'a> {
    /// The metric id is absent from the bucket (partial data)
    Missing,
    Scalar(Option<f64>),
    /// (percent, value) pairs in response order
    Percentiles(Vec<(f64, Option<f64>)>),
    Stats(ExtendedStatsValue<'a>),
    TopMetrics(Vec<TopHit<'a>>),
}

impl<'a> MetricValue<'a> {
    pub fn scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => *v,
            _ => None,
        }
    }

    pub fn percentile(&self, percent: f64) -> Option<f64> {
        match self {
            Self::Percentiles(values) => values
                .iter()
                .find(|(p, _)| (p - percent).abs() < 1e-9)
                .and_then(|(_, v)| *v),
            _ => None,
        }
    }

    pub fn stat(&self, stat: ExtendedStat) -> Result<Option<f64>> {
        match self {
            Self::Stats(stats) => stats.get(stat),
            _ => Ok(None),
        }
    }

    /// First hit's value for `field`
    pub fn top_metric(&self, field: &str) -> Result<Option<f64>> {
        match self {
            Self::TopMetrics(hits) => match hits.first() {
                Some(hit) => hit.metric(field),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtendedStatsValue<'a> {
    stats: &'a Map<String, Value>,
    path: String,
}

impl<'a> ExtendedStatsValue<'a> {
    pub fn get(&self, stat: ExtendedStat) -> Result<Option<f64>> {
        let (raw, path) = match stat {
            ExtendedStat::StdDeviationBoundsUpper | ExtendedStat::StdDeviationBoundsLower => {
                let side = if stat == ExtendedStat::StdDeviationBoundsUpper {
                    "upper"
                } else {
                    "lower"
                };
                let raw = self
                    .stats
                    .get("std_deviation_bounds")
                    .and_then(|bounds| bounds.get(side));
                (raw, format!("{}.std_deviation_bounds.{}", self.path, side))
            }
            other => (
                self.stats.get(other.key()),
                format!("{}.{}", self.path, other.key()),
            ),
        };
        match raw {
            Some(v) => number_or_null(v, &path),
            None => Ok(None),
        }
    }
}

/// One entry of a top_metrics `top` array
#[derive(Debug, Clone)]
pub struct TopHit<'a> {
    metrics: &'a Map<String, Value>,
    path: String,
}

impl<'a> TopHit<'a> {
    pub fn metric(&self, field: &str) -> Result<Option<f64>> {
        match self.metrics.get(field) {
            Some(v) => number_or_null(v, &format!("{}.metrics.{}", self.path, field)),
            None => Ok(None),
        }
    }
}

fn decode_single_value(raw: &Value, path: &str) -> Result<Option<f64>> {
    match raw {
        Value::Object(obj) => {
            if let Some(normalized) = obj.get("normalized_value") {
                return number_or_null(normalized, &format!("{}.normalized_value", path));
            }
            match obj.get("value") {
                Some(v) => number_or_null(v, &format!("{}.value", path)),
                None => Err(Error::malformed(path, "metric result has no value")),
            }
        }
        scalar => number_or_null(scalar, path),
    }
}

fn decode_percentiles<'a>(raw: &'a Value, path: &str) -> Result<MetricValue<'a>> {
    let values = raw
        .get("values")
        .ok_or_else(|| Error::malformed(path, "percentiles result has no values"))?;
    let values_path = format!("{}.values", path);

    let pairs = match values {
        Value::Object(map) => map
            .iter()
            .map(|(key, v)| {
                let percent = key.parse::<f64>().map_err(|_| {
                    Error::malformed(&values_path, format!("percentile key {:?} is not numeric", key))
                })?;
                Ok((percent, number_or_null(v, &format!("{}.{}", values_path, key))?))
            })
            .collect::<Result<Vec<_>>>()?,
        // keyed: false
        Value::Array(entries) => entries
            .iter()
            .map(|entry| {
                let percent = entry
                    .get("key")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| Error::malformed(&values_path, "percentile entry has no key"))?;
                let value = match entry.get("value") {
                    Some(v) => number_or_null(v, &values_path)?,
                    None => None,
                };
                Ok((percent, value))
            })
            .collect::<Result<Vec<_>>>()?,
        other => {
            return Err(Error::malformed(
                values_path,
                format!("expected object or array, found {}", kind_of(other)),
            ))
        }
    };
    Ok(MetricValue::Percentiles(pairs))
}

fn decode_top_metrics<'a>(raw: &'a Value, path: &str) -> Result<MetricValue<'a>> {
    let top = raw
        .get("top")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::malformed(path, "top_metrics result has no top array"))?;

    top.iter()
        .enumerate()
        .map(|(i, hit)| {
            let hit_path = format!("{}.top[{}]", path, i);
            let metrics = hit
                .get("metrics")
                .and_then(Value::as_object)
                .ok_or_else(|| Error::malformed(&hit_path, "top hit has no metrics object"))?;
            Ok(TopHit {
                metrics,
                path: hit_path,
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(MetricValue::TopMetrics)
}

/// Numbers and numeric strings decode; null and non-finite values read as absent
fn number_or_null(v: &Value, path: &str) -> Result<Option<f64>> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64().filter(|f| f.is_finite())),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| Some(f).filter(|f| f.is_finite()))
            .map_err(|_| Error::malformed(path, format!("expected number, found string {:?}", s))),
        other => Err(Error::malformed(
            path,
            format!("expected number, found {}", kind_of(other)),
        )),
    }
}

/// Format a number the way bucket keys and percents are displayed
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
