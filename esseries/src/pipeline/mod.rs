//! bucket_script resolution
//!
//! A bucket_script metric names its inputs through pipeline variables
//! (`var1 -> "1"`, `var2 -> "3[max]"`). Inputs are read from the same bucket
//! the script belongs to, never from siblings, and the script is evaluated
//! locally when possible. When local evaluation is disabled or the script
//! falls outside the supported arithmetic subset, the value Elasticsearch
//! computed for the script (`{id}.value`) is used as is.

pub mod script;

pub use script::Script;

use crate::config::ParserConfig;
use crate::error::Error;
use crate::naming::split_reference;
use crate::query::{ExtendedStat, MetricAggSpec, MetricAggType, PipelineVariable, QueryDefinition};
use crate::response::{AggNode, MetricValue};
use crate::Result;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Resolves bucket_script values for one query
#[derive(Debug)]
pub struct PipelineResolver<'q> {
    query: &'q QueryDefinition,
    /// Parsed scripts by metric index; absent entries use the backend value
    scripts: HashMap<usize, Script>,
    warnings: Vec<String>,
}

impl<'q> PipelineResolver<'q> {
    pub fn new(query: &'q QueryDefinition, config: &ParserConfig) -> Self {
        let mut scripts = HashMap::new();
        let mut warnings = Vec::new();

        if config.evaluate_scripts {
            for (index, metric) in query.metric_aggs.iter().enumerate() {
                if metric.metric_type != MetricAggType::BucketScript {
                    continue;
                }
                match Script::parse(metric.script().unwrap_or_default()) {
                    Ok(script) => match undeclared_variable(&script, metric) {
                        None => {
                            scripts.insert(index, script);
                        }
                        Some(name) => {
                            warn!(ref_id = %query.ref_id, metric_id = %metric.id, variable = name,
                                "bucket_script uses undeclared variable, using backend value");
                            warnings.push(format!(
                                "bucket_script {}: {:?} uses undeclared variable {}; using backend value",
                                metric.id,
                                script.source(),
                                name
                            ));
                        }
                    },
                    Err(e) => {
                        warn!(ref_id = %query.ref_id, metric_id = %metric.id, error = %e,
                            "bucket_script not evaluable, using backend value");
                        warnings.push(format!(
                            "bucket_script {}: {}; using backend value",
                            metric.id, e
                        ));
                    }
                }
            }
        }

        Self {
            query,
            scripts,
            warnings,
        }
    }

    /// Warnings raised while preparing scripts
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Value of the bucket_script metric at `index` within `node`
    ///
    /// Returns `Ok(None)` when any input is null or the result is not finite,
    /// and [`Error::UnresolvedPipelineVariable`] when an input is absent from
    /// the bucket altogether.
    pub fn resolve(&self, index: usize, metric: &MetricAggSpec, node: &AggNode<'_>) -> Result<Option<f64>> {
        let Some(script) = self.scripts.get(&index) else {
            return backend_value(metric, node);
        };

        let mut vars = HashMap::with_capacity(metric.pipeline_variables.len());
        let mut has_null = false;
        for variable in &metric.pipeline_variables {
            match self.variable_value(metric, variable, node)? {
                Some(value) => {
                    vars.insert(variable.name.clone(), value);
                }
                None => has_null = true,
            }
        }
        if has_null {
            return Ok(None);
        }

        match script.eval(&vars) {
            Ok(value) => Ok(Some(value).filter(|v| v.is_finite())),
            Err(e) => {
                debug!(metric_id = %metric.id, error = %e, "falling back to backend value");
                backend_value(metric, node)
            }
        }
    }

    fn variable_value(
        &self,
        metric: &MetricAggSpec,
        variable: &PipelineVariable,
        node: &AggNode<'_>,
    ) -> Result<Option<f64>> {
        let reference = variable.pipeline_agg_id.as_str();
        let unresolved = || Error::UnresolvedPipelineVariable {
            metric_id: metric.id.clone(),
            variable: variable.name.clone(),
            reference: reference.to_string(),
        };

        let (id, sub) = split_reference(reference);
        if id == "_count" {
            return node.doc_count().map(Some).ok_or_else(unresolved);
        }

        let referenced = self.query.metric(id).ok_or_else(unresolved)?;
        match (node.metric_value(referenced)?, sub) {
            (MetricValue::Missing, _) => Err(unresolved()),
            (MetricValue::Scalar(value), _) => Ok(value),
            (value @ MetricValue::Percentiles(_), Some(sub)) => {
                let percent = sub.trim().parse::<f64>().map_err(|_| unresolved())?;
                Ok(value.percentile(percent))
            }
            (value @ MetricValue::Stats(_), Some(sub)) => {
                let stat = ExtendedStat::from_key(sub.trim()).ok_or_else(unresolved)?;
                value.stat(stat)
            }
            (value @ MetricValue::TopMetrics(_), Some(sub)) => value.top_metric(sub.trim()),
            // multi-valued metric referenced without naming a value
            _ => Err(unresolved()),
        }
    }
}

/// First script variable with no matching pipeline variable
fn undeclared_variable<'s>(script: &'s Script, metric: &MetricAggSpec) -> Option<&'s str> {
    script
        .variables()
        .into_iter()
        .find(|name| !metric.pipeline_variables.iter().any(|v| v.name == *name))
}

fn backend_value(metric: &MetricAggSpec, node: &AggNode<'_>) -> Result<Option<f64>> {
    Ok(node.metric_value(metric)?.scalar())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn query(value: Value) -> QueryDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn script_query(script: &str, variables: Value) -> QueryDefinition {
        query(json!({ "metrics": [
            { "id": "1", "type": "sum", "field": "@value" },
            { "id": "3", "type": "max", "field": "@value" },
            { "id": "5", "type": "percentiles", "field": "lat", "settings": { "percents": ["99"] } },
            { "id": "6", "type": "extended_stats", "field": "lat", "meta": { "max": true } },
            {
                "id": "4",
                "type": "bucket_script",
                "pipelineVariables": variables,
                "settings": { "script": script }
            }
        ] }))
    }

    fn resolve(q: &QueryDefinition, config: &ParserConfig, bucket: &Value) -> Result<Option<f64>> {
        let resolver = PipelineResolver::new(q, config);
        let node = AggNode::from_value(bucket).unwrap();
        resolver.resolve(4, &q.metric_aggs[4], &node)
    }

    #[test]
    fn test_evaluates_from_same_bucket() {
        let q = script_query(
            "params.var1 * params.var2",
            json!([{ "name": "var1", "pipelineAgg": "1" }, { "name": "var2", "pipelineAgg": "3" }]),
        );
        let bucket = json!({ "doc_count": 2, "1": { "value": 2 }, "3": { "value": 3 }, "4": { "value": 99 } });
        assert_eq!(resolve(&q, &ParserConfig::default(), &bucket).unwrap(), Some(6.0));
    }

    #[test]
    fn test_backend_value_when_evaluation_disabled() {
        let q = script_query(
            "params.var1 * params.var2",
            json!([{ "name": "var1", "pipelineAgg": "1" }, { "name": "var2", "pipelineAgg": "3" }]),
        );
        let config = ParserConfig {
            evaluate_scripts: false,
            ..Default::default()
        };
        let bucket = json!({ "1": { "value": 2 }, "3": { "value": 3 }, "4": { "value": 99 } });
        assert_eq!(resolve(&q, &config, &bucket).unwrap(), Some(99.0));
    }

    #[test]
    fn test_backend_value_for_unsupported_script() {
        let q = script_query(
            "if (params.var1 > 0) { return 1 } else { return 0 }",
            json!([{ "name": "var1", "pipelineAgg": "1" }]),
        );
        let resolver = PipelineResolver::new(&q, &ParserConfig::default());
        assert_eq!(resolver.warnings().len(), 1);

        let bucket = json!({ "1": { "value": 2 }, "4": { "value": 1 } });
        let node = AggNode::from_value(&bucket).unwrap();
        assert_eq!(resolver.resolve(4, &q.metric_aggs[4], &node).unwrap(), Some(1.0));
    }

    #[test]
    fn test_backend_value_for_undeclared_script_variable() {
        let q = script_query("params.var1 + params.var9", json!([{ "name": "var1", "pipelineAgg": "1" }]));
        let resolver = PipelineResolver::new(&q, &ParserConfig::default());
        assert_eq!(resolver.warnings().len(), 1);
        assert!(resolver.warnings()[0].contains("var9"));
        assert!(resolver.warnings()[0].contains("params.var1 + params.var9"));

        let bucket = json!({ "1": { "value": 2 }, "4": { "value": 7 } });
        let node = AggNode::from_value(&bucket).unwrap();
        assert_eq!(resolver.resolve(4, &q.metric_aggs[4], &node).unwrap(), Some(7.0));
    }

    #[test]
    fn test_null_input_gives_null() {
        let q = script_query(
            "params.var1 + params.var2",
            json!([{ "name": "var1", "pipelineAgg": "1" }, { "name": "var2", "pipelineAgg": "3" }]),
        );
        let bucket = json!({ "1": { "value": null }, "3": { "value": 3 } });
        assert_eq!(resolve(&q, &ParserConfig::default(), &bucket).unwrap(), None);
    }

    #[test]
    fn test_absent_input_is_unresolved() {
        let q = script_query("params.var1 * 2", json!([{ "name": "var1", "pipelineAgg": "1" }]));
        let bucket = json!({ "3": { "value": 3 } });
        match resolve(&q, &ParserConfig::default(), &bucket) {
            Err(Error::UnresolvedPipelineVariable { metric_id, variable, reference }) => {
                assert_eq!(metric_id, "4");
                assert_eq!(variable, "var1");
                assert_eq!(reference, "1");
            }
            other => panic!("Expected unresolved variable, got {:?}", other),
        }
    }

    #[test]
    fn test_undeclared_reference_is_unresolved() {
        let q = script_query("params.var1", json!([{ "name": "var1", "pipelineAgg": "42" }]));
        let bucket = json!({ "42": { "value": 3 } });
        assert!(matches!(
            resolve(&q, &ParserConfig::default(), &bucket),
            Err(Error::UnresolvedPipelineVariable { .. })
        ));
    }

    #[test]
    fn test_doc_count_reference() {
        let q = script_query("params.c / 2", json!([{ "name": "c", "pipelineAgg": "_count" }]));
        let bucket = json!({ "doc_count": 10 });
        assert_eq!(resolve(&q, &ParserConfig::default(), &bucket).unwrap(), Some(5.0));
    }

    #[test]
    fn test_bracket_references() {
        let q = script_query(
            "params.p + params.m",
            json!([{ "name": "p", "pipelineAgg": "5[99.0]" }, { "name": "m", "pipelineAgg": "6[max]" }]),
        );
        let bucket = json!({
            "5": { "values": { "99.0": 4.0 } },
            "6": { "max": 6.0, "min": 1.0 }
        });
        assert_eq!(resolve(&q, &ParserConfig::default(), &bucket).unwrap(), Some(10.0));
    }

    #[test]
    fn test_multi_value_without_selector_is_unresolved() {
        let q = script_query("params.p", json!([{ "name": "p", "pipelineAgg": "5" }]));
        let bucket = json!({ "5": { "values": { "99.0": 4.0 } } });
        assert!(resolve(&q, &ParserConfig::default(), &bucket).is_err());
    }

    #[test]
    fn test_division_by_zero_gives_null() {
        let q = script_query(
            "params.var1 / params.var2",
            json!([{ "name": "var1", "pipelineAgg": "1" }, { "name": "var2", "pipelineAgg": "3" }]),
        );
        let bucket = json!({ "1": { "value": 1 }, "3": { "value": 0 } });
        assert_eq!(resolve(&q, &ParserConfig::default(), &bucket).unwrap(), None);
    }
}
