//! Aggregation tree walker
//!
//! Descends the response along the query's bucket aggregations. Each
//! non-time level contributes a group key; the trailing date_histogram (when
//! the query is a time series) contributes timestamps. At every leaf bucket
//! the visible metrics are read and appended to the series named from the
//! group keys, or to a table row when the query is not a time series.

use crate::config::ParserConfig;
use crate::error::Error;
use crate::frames::{Cell, DataTable, NamedSeries, Point, QueryResult};
use crate::naming::{expand_query, GroupKey, GroupKeyPath, SeriesLabel, SeriesNamer, ValueSelector};
use crate::pipeline::PipelineResolver;
use crate::query::{BucketAggSpec, BucketAggType, MetricAggSpec, QueryDefinition};
use crate::response::{AggNode, BucketEntry, BucketSet};
use crate::Result;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Walks one query's aggregation tree
#[derive(Debug)]
pub struct TreeWalker<'q> {
    query: &'q QueryDefinition,
    labels: Vec<SeriesLabel>,
    namer: SeriesNamer<'q>,
    pipeline: PipelineResolver<'q>,
    time_series: bool,
}

impl<'q> TreeWalker<'q> {
    pub fn new(query: &'q QueryDefinition, config: &ParserConfig) -> Self {
        let labels = expand_query(query, config);
        let namer = SeriesNamer::new(query, &labels);
        Self {
            query,
            namer,
            labels,
            pipeline: PipelineResolver::new(query, config),
            time_series: query.is_time_series(),
        }
    }

    /// Series labels in output order
    pub fn labels(&self) -> &[SeriesLabel] {
        &self.labels
    }

    /// Walk the tree rooted at `root`
    ///
    /// Structural problems in bucket aggregations fail the whole walk. A
    /// metric whose value has the wrong shape only loses its own series.
    pub fn walk(&self, root: &AggNode<'_>) -> Result<QueryResult> {
        let mut out = Collector::default();
        for warning in self.pipeline.warnings() {
            out.warn(warning.clone());
        }

        let mut path = LeafPath::default();
        self.descend(0, root, &mut path, &mut out)?;

        let result = self.finish(out);
        debug!(
            ref_id = %self.query.ref_id,
            series = result.series.len(),
            tables = result.tables.len(),
            warnings = result.warnings.len(),
            "walked aggregation tree"
        );
        Ok(result)
    }

    fn descend(&self, depth: usize, node: &AggNode<'_>, path: &mut LeafPath, out: &mut Collector) -> Result<()> {
        let Some(agg) = self.query.bucket_aggs.get(depth) else {
            self.visit_leaf(node, path, out);
            return Ok(());
        };
        let time_level = self.time_series && depth + 1 == self.query.bucket_aggs.len();

        match node.buckets_for(&agg.id)? {
            BucketSet::Array(entries) => {
                let entries = trim_edges(&entries, agg.trim_edges());
                if time_level {
                    // Named up front so an empty histogram still yields its series
                    self.register_series(&path.groups, out);
                    for entry in entries {
                        path.timestamp = Some(entry.timestamp_millis()?);
                        self.descend(depth + 1, &entry.node, path, out)?;
                    }
                    path.timestamp = None;
                } else {
                    for entry in entries {
                        path.push(agg, entry.key_label(), key_cell(entry));
                        let walked = self.descend(depth + 1, &entry.node, path, out);
                        path.pop();
                        walked?;
                    }
                }
            }
            BucketSet::Keyed(entries) => {
                if time_level {
                    return Err(Error::malformed(
                        format!("{}.{}.buckets", node.path(), agg.id),
                        "expected date_histogram bucket array, found keyed buckets",
                    ));
                }
                for (label, child) in order_keyed(agg, entries) {
                    path.push(agg, label.clone(), Cell::Text(label));
                    let walked = self.descend(depth + 1, &child, path, out);
                    path.pop();
                    walked?;
                }
            }
        }
        Ok(())
    }

    fn register_series(&self, groups: &[GroupKey], out: &mut Collector) {
        for (slot, label) in self.labels.iter().enumerate() {
            out.series_mut(SeriesKey::new(groups, slot), || self.namer.name(label, groups), label.metric_index);
        }
    }

    fn visit_leaf(&self, node: &AggNode<'_>, path: &LeafPath, out: &mut Collector) {
        let mut values = Vec::with_capacity(self.labels.len());
        for label in &self.labels {
            if out.failed.contains(&label.metric_index) {
                values.push(None);
                continue;
            }
            let metric = &self.query.metric_aggs[label.metric_index];
            match self.label_value(label, metric, node) {
                Ok(value) => values.push(value),
                Err(e) if e.is_recoverable() => {
                    debug!(metric_id = %metric.id, error = %e, "null point");
                    out.warn(e.to_string());
                    values.push(None);
                }
                Err(e) => {
                    warn!(ref_id = %self.query.ref_id, metric_id = %metric.id, error = %e,
                        "dropping metric with malformed result");
                    out.fail(label.metric_index, format!("metric {} dropped: {}", metric.id, e));
                    values.push(None);
                }
            }
        }

        match path.timestamp {
            Some(timestamp) if self.time_series => {
                for (slot, (label, value)) in self.labels.iter().zip(values).enumerate() {
                    if out.failed.contains(&label.metric_index) {
                        continue;
                    }
                    let key = SeriesKey::new(&path.groups, slot);
                    out.series_mut(key, || self.namer.name(label, &path.groups), label.metric_index)
                        .points
                        .push(Point { value, timestamp });
                }
            }
            _ => {
                let mut row = path.cells.clone();
                row.extend(values.into_iter().map(Cell::Number));
                out.rows.push(row);
            }
        }
    }

    fn label_value(&self, label: &SeriesLabel, metric: &MetricAggSpec, node: &AggNode<'_>) -> Result<Option<f64>> {
        match &label.selector {
            ValueSelector::Script => self.pipeline.resolve(label.metric_index, metric, node),
            ValueSelector::Single => Ok(node.metric_value(metric)?.scalar()),
            ValueSelector::Percentile(percent) => Ok(node.metric_value(metric)?.percentile(*percent)),
            ValueSelector::Stat(stat) => node.metric_value(metric)?.stat(*stat),
            ValueSelector::TopMetric(field) => node.metric_value(metric)?.top_metric(field),
        }
    }

    fn finish(&self, out: Collector) -> QueryResult {
        let Collector {
            series,
            rows,
            failed,
            warnings,
            ..
        } = out;

        let mut result = QueryResult {
            ref_id: self.query.ref_id.clone(),
            warnings,
            ..Default::default()
        };

        if self.time_series {
            result.series = series
                .into_iter()
                .filter(|(metric_index, _)| !failed.contains(metric_index))
                .map(|(_, s)| s)
                .collect();
            return result;
        }

        let group_columns = self.query.bucket_aggs.len();
        let keep: Vec<bool> = self
            .labels
            .iter()
            .map(|l| !failed.contains(&l.metric_index))
            .collect();

        let mut columns: Vec<String> = self
            .query
            .bucket_aggs
            .iter()
            .map(|agg| agg.group_field().to_string())
            .collect();
        columns.extend(
            self.labels
                .iter()
                .zip(&keep)
                .filter(|(_, keep)| **keep)
                .map(|(label, _)| label.label.clone()),
        );

        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .enumerate()
                    .filter(|(i, _)| *i < group_columns || keep[*i - group_columns])
                    .map(|(_, cell)| cell)
                    .collect()
            })
            .collect();

        result.tables.push(DataTable { columns, rows });
        result
    }
}

/// Group keys and table cells on the way down to the current bucket
#[derive(Debug, Default)]
struct LeafPath {
    groups: GroupKeyPath,
    cells: Vec<Cell>,
    timestamp: Option<i64>,
}

impl LeafPath {
    fn push(&mut self, agg: &BucketAggSpec, value: String, cell: Cell) {
        self.groups.push(GroupKey {
            field: agg.group_field().to_string(),
            value,
        });
        self.cells.push(cell);
    }

    fn pop(&mut self) {
        self.groups.pop();
        self.cells.pop();
    }
}

/// Group key values above the time level plus the label's position
///
/// Two branches whose names collide (an alias without group placeholders)
/// stay separate series, each in time order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    groups: Vec<String>,
    slot: usize,
}

impl SeriesKey {
    fn new(groups: &[GroupKey], slot: usize) -> Self {
        Self {
            groups: groups.iter().map(|g| g.value.clone()).collect(),
            slot,
        }
    }
}

/// Series in first-seen order, plus table rows
#[derive(Debug, Default)]
struct Collector {
    /// (metric index, series)
    series: Vec<(usize, NamedSeries)>,
    by_key: HashMap<SeriesKey, usize>,
    rows: Vec<Vec<Cell>>,
    failed: BTreeSet<usize>,
    warnings: Vec<String>,
    seen: HashSet<String>,
}

impl Collector {
    fn series_mut(&mut self, key: SeriesKey, name: impl FnOnce() -> String, metric_index: usize) -> &mut NamedSeries {
        let slot = match self.by_key.get(&key) {
            Some(slot) => *slot,
            None => {
                self.series.push((metric_index, NamedSeries::new(name())));
                self.by_key.insert(key, self.series.len() - 1);
                self.series.len() - 1
            }
        };
        &mut self.series[slot].1
    }

    fn fail(&mut self, metric_index: usize, message: String) {
        self.failed.insert(metric_index);
        self.warn(message);
    }

    /// Record a warning once
    fn warn(&mut self, message: String) {
        if self.seen.insert(message.clone()) {
            self.warnings.push(message);
        }
    }
}

fn trim_edges<T>(entries: &[T], n: usize) -> &[T] {
    if n == 0 {
        entries
    } else if n.saturating_mul(2) >= entries.len() {
        &[]
    } else {
        &entries[n..entries.len() - n]
    }
}

fn key_cell(entry: &BucketEntry<'_>) -> Cell {
    match entry.key {
        Value::Number(n) => Cell::Number(n.as_f64()),
        _ => Cell::Text(entry.key_label()),
    }
}

/// Declared filters first, in declaration order; any other keys sorted after
fn order_keyed<'a>(agg: &BucketAggSpec, mut entries: Vec<(String, AggNode<'a>)>) -> Vec<(String, AggNode<'a>)> {
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    if agg.agg_type != BucketAggType::Filters {
        return entries;
    }

    let mut ordered = Vec::with_capacity(entries.len());
    for filter in agg.filters() {
        if let Some(pos) = entries.iter().position(|(key, _)| key == filter.key()) {
            ordered.push(entries.remove(pos));
        }
    }
    ordered.extend(entries);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(value: Value) -> QueryDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn walk(q: &QueryDefinition, aggs: &Value) -> Result<QueryResult> {
        let walker = TreeWalker::new(q, &ParserConfig::default());
        walker.walk(&AggNode::from_value(aggs).unwrap())
    }

    #[test]
    fn test_trim_edges() {
        let v = [1, 2, 3, 4, 5];
        assert_eq!(trim_edges(&v, 0), &[1, 2, 3, 4, 5]);
        assert_eq!(trim_edges(&v, 1), &[2, 3, 4]);
        assert!(trim_edges(&v, 3).is_empty());
        assert!(trim_edges(&[1, 2], 1).is_empty());
        assert!(trim_edges(&v, usize::MAX).is_empty());
        assert!(trim_edges(&v, usize::MAX / 2 + 1).is_empty());
    }

    #[test]
    fn test_simple_count_series() {
        let q = query(json!({
            "refId": "A",
            "metrics": [{ "type": "count", "id": "1" }],
            "bucketAggs": [{ "type": "date_histogram", "field": "@timestamp", "id": "2" }]
        }));
        let aggs = json!({ "2": { "buckets": [
            { "doc_count": 10, "key": 1000 },
            { "doc_count": 15, "key": 2000 }
        ] } });
        let result = walk(&q, &aggs).unwrap();
        assert_eq!(result.series_names(), vec!["Count"]);
        assert_eq!(result.series[0].values(), vec![Some(10.0), Some(15.0)]);
        assert_eq!(result.series[0].timestamps(), vec![1000, 2000]);
        assert!(result.tables.is_empty());
    }

    #[test]
    fn test_empty_histogram_keeps_series() {
        let q = query(json!({
            "metrics": [{ "type": "count", "id": "1" }, { "type": "avg", "field": "v", "id": "3" }],
            "bucketAggs": [{ "type": "date_histogram", "field": "@timestamp", "id": "2" }]
        }));
        let result = walk(&q, &json!({ "2": { "buckets": [] } })).unwrap();
        assert_eq!(result.series_names(), vec!["Count", "Average v"]);
        assert!(result.series.iter().all(|s| s.points.is_empty()));
    }

    #[test]
    fn test_keyed_time_level_is_malformed() {
        let q = query(json!({
            "metrics": [{ "type": "count", "id": "1" }],
            "bucketAggs": [{ "type": "date_histogram", "field": "@timestamp", "id": "2" }]
        }));
        let err = walk(&q, &json!({ "2": { "buckets": { "a": { "doc_count": 1 } } } })).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }

    #[test]
    fn test_malformed_metric_dropped_with_warning() {
        let q = query(json!({
            "metrics": [{ "type": "count", "id": "1" }, { "type": "avg", "field": "v", "id": "3" }],
            "bucketAggs": [{ "type": "date_histogram", "field": "@timestamp", "id": "2" }]
        }));
        let aggs = json!({ "2": { "buckets": [
            { "doc_count": 1, "key": 1000, "3": { "value": 1 } },
            { "doc_count": 2, "key": 2000, "3": { "values": [] } }
        ] } });
        let result = walk(&q, &aggs).unwrap();
        assert_eq!(result.series_names(), vec!["Count"]);
        assert_eq!(result.series[0].points.len(), 2);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("metric 3 dropped"));
    }

    #[test]
    fn test_order_keyed_follows_declared_filters() {
        let q = query(json!({
            "metrics": [{ "type": "count", "id": "1" }],
            "bucketAggs": [
                { "id": "2", "type": "filters", "settings": { "filters": [
                    { "query": "@metric:cpu", "label": "" },
                    { "query": "@metric:logins.count", "label": "" }
                ] } },
                { "type": "date_histogram", "field": "@timestamp", "id": "3" }
            ]
        }));
        let aggs = json!({ "2": { "buckets": {
            "zz-extra": { "3": { "buckets": [] } },
            "@metric:logins.count": { "3": { "buckets": [] } },
            "@metric:cpu": { "3": { "buckets": [] } }
        } } });
        let result = walk(&q, &aggs).unwrap();
        assert_eq!(
            result.series_names(),
            vec!["@metric:cpu", "@metric:logins.count", "zz-extra"]
        );
    }

    #[test]
    fn test_same_name_in_two_branches_stays_separate() {
        let q = query(json!({
            "alias": "requests",
            "metrics": [{ "type": "count", "id": "1" }],
            "bucketAggs": [
                { "type": "terms", "field": "host", "id": "2" },
                { "type": "date_histogram", "field": "@timestamp", "id": "3" }
            ]
        }));
        let aggs = json!({ "2": { "buckets": [
            { "key": "a", "3": { "buckets": [{ "key": 1000, "doc_count": 1 }, { "key": 2000, "doc_count": 2 }] } },
            { "key": "b", "3": { "buckets": [{ "key": 1000, "doc_count": 3 }, { "key": 2000, "doc_count": 4 }] } }
        ] } });
        let result = walk(&q, &aggs).unwrap();
        assert_eq!(result.series_names(), vec!["requests", "requests"]);
        for series in &result.series {
            assert_eq!(series.timestamps(), vec![1000, 2000]);
        }
        assert_eq!(result.series[1].values(), vec![Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_table_without_bucket_aggs() {
        let q = query(json!({
            "metrics": [{ "type": "avg", "field": "v", "id": "1" }, { "type": "max", "field": "v", "id": "2" }]
        }));
        let result = walk(&q, &json!({ "1": { "value": 2.5 }, "2": { "value": 9 } })).unwrap();
        assert!(result.series.is_empty());
        let table = &result.tables[0];
        assert_eq!(table.columns, vec!["Average v", "Max v"]);
        assert_eq!(table.rows, vec![vec![Cell::Number(Some(2.5)), Cell::Number(Some(9.0))]]);
    }
}
