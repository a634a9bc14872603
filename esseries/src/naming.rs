//! Series naming
//!
//! Every visible metric expands into one or more [`SeriesLabel`]s (one per
//! percentile, enabled extended stat, or top_metrics field). The final series
//! name combines that label with the group-by keys active at the leaf, or is
//! produced from the query's alias pattern when one is set.

use crate::config::ParserConfig;
use crate::query::{ExtendedStat, MetricAggSpec, MetricAggType, QueryDefinition};
use crate::response::format_number;
use regex::{Captures, Regex};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Which part of a metric result a series carries
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSelector {
    /// `value`, `normalized_value` or doc_count for count
    Single,
    Percentile(f64),
    Stat(ExtendedStat),
    TopMetric(String),
    /// bucket_script, evaluated by the pipeline resolver
    Script,
}

/// Base label for one expanded metric output
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesLabel {
    /// Index into the query's metric list
    pub metric_index: usize,
    pub selector: ValueSelector,
    /// Label without group keys, e.g. `Average value` or `p95`
    pub label: String,
    /// Substituted for `{{metric}}`
    pub metric: String,
    /// Substituted for `{{field}}`
    pub field: String,
}

/// One group-by level on the way down to a leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupKey {
    /// Bucket aggregation field, or `filter` for filters aggs
    pub field: String,
    pub value: String,
}

/// Group keys accumulated while descending non-time bucket aggregations
pub type GroupKeyPath = Vec<GroupKey>;

/// Label of a metric as referenced from other metrics, e.g. `Sum @value`
pub fn describe_metric(metric: &MetricAggSpec, query: &QueryDefinition) -> String {
    describe_metric_at_depth(metric, query, 0)
}

fn describe_metric_at_depth(metric: &MetricAggSpec, query: &QueryDefinition, depth: usize) -> String {
    // Pipeline references can form cycles in hand-written definitions
    if depth > query.metric_aggs.len() {
        return metric.metric_type.display_name().to_string();
    }

    match &metric.metric_type {
        MetricAggType::Count => MetricAggType::Count.display_name().to_string(),
        MetricAggType::BucketScript => bucket_script_label(metric, query, depth),
        t if t.is_single_path_pipeline() => {
            let upstream = metric.field().and_then(|id| query.metric(id));
            match upstream {
                Some(upstream) => format!(
                    "{} {}",
                    t.display_name(),
                    describe_metric_at_depth(upstream, query, depth + 1)
                ),
                None => "Unset".to_string(),
            }
        }
        t => match metric.field() {
            Some(field) => format!("{} {}", t.display_name(), field),
            None => t.display_name().to_string(),
        },
    }
}

/// Script text with every `params.<var>` replaced by the referenced metric's label
fn bucket_script_label(metric: &MetricAggSpec, query: &QueryDefinition, depth: usize) -> String {
    let mut label = metric.script().unwrap_or_default().to_string();

    // Longest names first so `var1` never clobbers part of `var10`
    let mut variables: Vec<_> = metric.pipeline_variables.iter().collect();
    variables.sort_by(|a, b| b.name.len().cmp(&a.name.len()));

    for variable in variables {
        let (id, _) = split_reference(&variable.pipeline_agg_id);
        let replacement = if id == "_count" {
            MetricAggType::Count.display_name().to_string()
        } else {
            match query.metric(id) {
                Some(referenced) => describe_metric_at_depth(referenced, query, depth + 1),
                None => continue,
            }
        };
        label = label.replace(&format!("params.{}", variable.name), &replacement);
    }

    label
}

/// Split `1[99.0]` into (`1`, Some(`99.0`))
pub(crate) fn split_reference(reference: &str) -> (&str, Option<&str>) {
    match reference.split_once('[') {
        Some((id, rest)) => (id, rest.strip_suffix(']').or(Some(rest))),
        None => (reference, None),
    }
}

/// Expand one metric into its series labels, in output order
pub fn expand_metric(
    index: usize,
    metric: &MetricAggSpec,
    query: &QueryDefinition,
    config: &ParserConfig,
) -> Vec<SeriesLabel> {
    let field = metric.field().unwrap_or_default().to_string();
    let with_field = |name: &str| {
        if field.is_empty() {
            name.to_string()
        } else {
            format!("{} {}", name, field)
        }
    };

    match &metric.metric_type {
        MetricAggType::Percentiles => {
            let percents = metric
                .percents()
                .unwrap_or_else(|| config.default_percents.clone());
            percents
                .into_iter()
                .map(|percent| {
                    let name = format!("p{}", format_number(percent));
                    SeriesLabel {
                        metric_index: index,
                        selector: ValueSelector::Percentile(percent),
                        label: with_field(&name),
                        metric: name,
                        field: field.clone(),
                    }
                })
                .collect()
        }
        MetricAggType::ExtendedStats => metric
            .enabled_stats()
            .into_iter()
            .map(|stat| SeriesLabel {
                metric_index: index,
                selector: ValueSelector::Stat(stat),
                label: with_field(stat.display_name()),
                metric: stat.display_name().to_string(),
                field: field.clone(),
            })
            .collect(),
        MetricAggType::TopMetrics => metric
            .top_metrics_fields()
            .into_iter()
            .map(|top_field| SeriesLabel {
                metric_index: index,
                selector: ValueSelector::TopMetric(top_field.clone()),
                label: format!("{} {}", MetricAggType::TopMetrics.display_name(), top_field),
                metric: MetricAggType::TopMetrics.display_name().to_string(),
                field: top_field,
            })
            .collect(),
        MetricAggType::BucketScript => {
            let label = describe_metric(metric, query);
            vec![SeriesLabel {
                metric_index: index,
                selector: ValueSelector::Script,
                metric: label.clone(),
                label,
                field: String::new(),
            }]
        }
        t => vec![SeriesLabel {
            metric_index: index,
            selector: ValueSelector::Single,
            label: describe_metric(metric, query),
            metric: t.display_name().to_string(),
            field: if *t == MetricAggType::Count {
                String::new()
            } else {
                field.clone()
            },
        }],
    }
}

/// Labels for every visible metric of a query, in declaration order
pub fn expand_query(query: &QueryDefinition, config: &ParserConfig) -> Vec<SeriesLabel> {
    query
        .metric_aggs
        .iter()
        .enumerate()
        .filter(|(_, metric)| !metric.hide && !metric.metric_type.is_raw())
        .flat_map(|(index, metric)| expand_metric(index, metric, query, config))
        .collect()
}

/// Builds final series names for one query
#[derive(Debug, Clone)]
pub struct SeriesNamer<'q> {
    alias: Option<&'q str>,
    prefix_metric: bool,
}

impl<'q> SeriesNamer<'q> {
    pub fn new(query: &'q QueryDefinition, labels: &[SeriesLabel]) -> Self {
        let distinct: HashSet<&str> = labels.iter().map(|l| l.label.as_str()).collect();
        Self {
            alias: query.alias(),
            prefix_metric: distinct.len() > 1,
        }
    }

    pub fn name(&self, label: &SeriesLabel, groups: &[GroupKey]) -> String {
        if let Some(alias) = self.alias {
            return resolve_alias(alias, label, groups);
        }

        if groups.is_empty() {
            return label.label.clone();
        }

        let keys = groups
            .iter()
            .map(|g| g.value.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        if self.prefix_metric {
            format!("{} {}", keys, label.label)
        } else {
            keys
        }
    }
}

fn alias_regex() -> &'static Regex {
    static ALIAS: OnceLock<Regex> = OnceLock::new();
    ALIAS.get_or_init(|| Regex::new(r"\{\{([\s\S]+?)\}\}").expect("alias pattern regex is valid"))
}

/// Substitute `{{...}}` placeholders; unknown placeholders stay verbatim
pub fn resolve_alias(pattern: &str, label: &SeriesLabel, groups: &[GroupKey]) -> String {
    let lookup = |field: &str| {
        groups
            .iter()
            .find(|g| g.field == field)
            .map(|g| g.value.clone())
    };

    alias_regex()
        .replace_all(pattern, |caps: &Captures| {
            let placeholder = caps[1].trim();
            let resolved = if let Some(field) = placeholder.strip_prefix("term ") {
                lookup(field.trim())
            } else if placeholder == "metric" {
                Some(label.metric.clone())
            } else if placeholder == "field" {
                Some(label.field.clone())
            } else {
                lookup(placeholder)
            };
            resolved.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
