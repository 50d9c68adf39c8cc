use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// A single `(name, value)` check parameter, looked up by name with
/// first-match semantics (`InputFileDetails::checks` carries a `Vec` of
/// these per check, not a map, so order/duplicates are caller-controlled).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckParam {
    pub name: String,
    pub value: CheckParamValue,
}

impl CheckParam {
    pub fn new(name: impl Into<String>, value: impl Into<CheckParamValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckParamValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl CheckParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CheckParamValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CheckParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CheckParamValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for CheckParamValue {
    fn from(v: bool) -> Self {
        CheckParamValue::Bool(v)
    }
}

impl From<f64> for CheckParamValue {
    fn from(v: f64) -> Self {
        CheckParamValue::Number(v)
    }
}

impl From<i64> for CheckParamValue {
    fn from(v: i64) -> Self {
        CheckParamValue::Number(v as f64)
    }
}

impl From<String> for CheckParamValue {
    fn from(v: String) -> Self {
        CheckParamValue::String(v)
    }
}

impl From<&str> for CheckParamValue {
    fn from(v: &str) -> Self {
        CheckParamValue::String(v.to_owned())
    }
}

/// Looks up the first parameter with a matching name. Mirrors
/// `GridCheck.get_param` in the reference implementation: first match wins,
/// absence is `None` rather than an error.
pub fn get_param<'a>(params: &'a [CheckParam], name: &str) -> Option<&'a CheckParamValue> {
    params.iter().find(|p| p.name == name).map(|p| &p.value)
}

/// `draft -> running -> completed | failed | aborted`. `Aborted` is set by
/// the check itself when a required band is missing; `Failed` is set by the
/// Executor when `run` returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Draft,
    Running,
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridCheckState {
    Pass,
    Warning,
    Fail,
}

fn serialize_timestamp<S>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match ts {
        Some(ts) => serializer.serialize_some(&ts.to_rfc3339_opts(SecondsFormat::Micros, true)),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckExecution {
    #[serde(serialize_with = "serialize_timestamp")]
    pub start: Option<DateTime<Utc>>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub end: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub error: Option<String>,
}

impl CheckExecution {
    pub fn draft() -> Self {
        Self {
            start: None,
            end: None,
            status: ExecutionStatus::Draft,
            error: None,
        }
    }
}

/// `data.chart` for checks that expose a histogram (currently only
/// `DensityCheck`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramChart {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl HistogramChart {
    /// Builds a histogram chart from a sounding-count -> occurrence map,
    /// with keys stringified and sorted ascending by the original integer
    /// key (spec §4.6, `DensityCheck`).
    pub fn from_counts(counts: &std::collections::BTreeMap<i64, u64>) -> Self {
        let mut data = serde_json::Map::new();
        for (k, v) in counts {
            data.insert(k.to_string(), serde_json::Value::from(*v));
        }
        HistogramChart {
            kind: "histogram".to_string(),
            data,
        }
    }
}

/// Free-form per-check output payload. Known fields are typed; anything else
/// a check wants to expose (counts, `grid_resolution`, ...) goes into
/// `extra` via `#[serde(flatten)]`, matching the open-ended `data{}` of the
/// QA-JSON schema (out of this core's scope to fully define, per spec §1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<HistogramChart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
    /// WGS-84 `MultiPolygon` of failed regions, `(lat, lon)` coordinate
    /// order (spec §6 — documented here because it is observable and easy
    /// to get backwards).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<geojson::Geometry>,
    /// WGS-84 `MultiPolygon` of the dataset's full extent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extents: Option<geojson::Geometry>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutput {
    pub execution: CheckExecution,
    pub messages: Vec<String>,
    pub data: CheckData,
    pub state: GridCheckState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_param_first_match_wins() {
        let params = vec![
            CheckParam::new("a", 1.0),
            CheckParam::new("a", 2.0),
            CheckParam::new("b", true),
        ];
        assert_eq!(get_param(&params, "a").and_then(|v| v.as_f64()), Some(1.0));
        assert_eq!(get_param(&params, "missing"), None);
    }

    #[test]
    fn histogram_keys_are_stringified() {
        let mut counts = std::collections::BTreeMap::new();
        counts.insert(10, 3u64);
        counts.insert(2, 1u64);
        let chart = HistogramChart::from_counts(&counts);
        assert_eq!(chart.data.get("10").unwrap(), &serde_json::json!(3));
        assert_eq!(chart.data.get("2").unwrap(), &serde_json::json!(1));
    }
}
