//! Output model: named time series and tables per refID

use crate::error::ErrorReport;
use serde::Serialize;

/// One sample of a time series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    /// `None` marks a gap (null, NaN or unresolved value)
    pub value: Option<f64>,
    /// Epoch milliseconds
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedSeries {
    pub name: String,
    pub points: Vec<Point>,
}

impl NamedSeries {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            points: Vec::new(),
        }
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.points.iter().map(|p| p.timestamp).collect()
    }
}

/// Table cell; group keys are text unless the bucket key was numeric
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Text(String),
    Number(Option<f64>),
}

impl Cell {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => *n,
            Self::Text(_) => None,
        }
    }
}

/// Rows of group keys followed by metric values
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

/// Everything produced for one refID
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub ref_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<NamedSeries>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<DataTable>,
    /// Non-fatal problems: dropped metrics, unresolved variables
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl QueryResult {
    pub fn series(&self, name: &str) -> Option<&NamedSeries> {
        self.series.iter().find(|s| s.name == name)
    }

    pub fn series_names(&self) -> Vec<&str> {
        self.series.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Serializable outcome of one refID, as printed by the CLI
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryReport {
    Ok(QueryResult),
    Failed {
        #[serde(rename = "refId")]
        ref_id: String,
        error: ErrorReport,
    },
}

impl QueryReport {
    pub fn from_outcome(ref_id: &str, outcome: &crate::Result<QueryResult>) -> Self {
        match outcome {
            Ok(result) => Self::Ok(result.clone()),
            Err(e) => Self::Failed {
                ref_id: ref_id.to_string(),
                error: e.to_report(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_series_accessors() {
        let mut series = NamedSeries::new("Count");
        series.points.push(Point {
            value: Some(10.0),
            timestamp: 1000,
        });
        series.points.push(Point {
            value: None,
            timestamp: 2000,
        });
        assert_eq!(series.values(), vec![Some(10.0), None]);
        assert_eq!(series.timestamps(), vec![1000, 2000]);
    }

    #[test]
    fn test_cell_serialization() {
        let row = vec![
            Cell::Text("server1".to_string()),
            Cell::Number(Some(1.5)),
            Cell::Number(None),
        ];
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"["server1",1.5,null]"#
        );
    }

    #[test]
    fn test_failed_report() {
        let outcome: crate::Result<QueryResult> = Err(Error::MissingResponse("B".to_string()));
        let json = serde_json::to_value(QueryReport::from_outcome("B", &outcome)).unwrap();
        assert_eq!(json["refId"], "B");
        assert_eq!(json["error"]["type"], "missing_response");
    }

    #[test]
    fn test_empty_collections_skipped() {
        let result = QueryResult {
            ref_id: "A".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({ "refId": "A" }));
    }
}
