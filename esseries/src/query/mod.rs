//! Query definition model

pub mod types;

pub use types::{
    BucketAggSpec, BucketAggType, ExtendedStat, FilterSpec, MetricAggSpec, MetricAggType,
    PipelineVariable, QueryDefinition, DEFAULT_PERCENTS,
};
