//! Tests for config loading

use esseries::ParserConfig;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_load_or_default_without_file() {
    let temp = tempdir().unwrap();
    let config = ParserConfig::load_or_default(&temp.path().join("missing.toml")).unwrap();
    assert_eq!(config, ParserConfig::default());
}

#[test]
fn test_save_and_load() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("nested").join("esseries.toml");

    let mut config = ParserConfig::default();
    config.default_percents = vec![50.0, 99.9];
    config.evaluate_scripts = false;
    config.parallel.enabled = true;
    config.logging.format = "json".to_string();
    config.save(&path).unwrap();

    let loaded = ParserConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_partial_file() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("esseries.toml");
    fs::write(
        &path,
        r#"
default_percents = [90, 99]

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = ParserConfig::load(&path).unwrap();
    assert_eq!(config.default_percents, vec![90.0, 99.0]);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "text");
    assert!(config.evaluate_scripts);
}

#[test]
fn test_load_rejects_invalid_values() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("esseries.toml");

    fs::write(&path, "default_percents = [-1]\n").unwrap();
    assert!(ParserConfig::load(&path).is_err());

    fs::write(&path, "[logging]\nformat = \"yaml\"\n").unwrap();
    assert!(ParserConfig::load(&path).is_err());

    fs::write(&path, "evaluate_scripts = \"yes\"\n").unwrap();
    let err = ParserConfig::load(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("esseries.toml"));
}

#[test]
fn test_default_percents_feed_percentile_labels() {
    use esseries::naming::expand_query;
    use esseries::QueryDefinition;

    let config = ParserConfig {
        default_percents: vec![50.0, 95.0],
        ..Default::default()
    };
    let query: QueryDefinition = serde_json::from_value(serde_json::json!({
        "metrics": [{ "type": "percentiles", "id": "1" }]
    }))
    .unwrap();
    let labels: Vec<String> = expand_query(&query, &config)
        .into_iter()
        .map(|l| l.label)
        .collect();
    assert_eq!(labels, vec!["p50", "p95"]);
}
