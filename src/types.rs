use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

// ---------------------------------------------------------------------------
// Job request / handle
// ---------------------------------------------------------------------------

/// Where a run writes its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// A freshly created sheet with a generated unique name.
    #[default]
    NewSheet,
    /// The sheet that is active at write time, appended to.
    ActiveSheet,
}

impl Destination {
    pub fn toggled(self) -> Self {
        match self {
            Destination::NewSheet => Destination::ActiveSheet,
            Destination::ActiveSheet => Destination::NewSheet,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Destination::NewSheet => "new",
            Destination::ActiveSheet => "active",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Destination {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "new" | "new_sheet" | "new-sheet" => Ok(Destination::NewSheet),
            "active" | "active_sheet" | "active-sheet" | "existing" => Ok(Destination::ActiveSheet),
            other => Err(BridgeError::Config(format!(
                "unknown destination {other:?} (expected \"new\" or \"active\")"
            ))),
        }
    }
}

/// One search submission. Built by the host from its input fields at
/// trigger time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub target_url: String,
    pub keywords: String,
    pub destination: Destination,
}

impl JobRequest {
    pub fn new(target_url: impl Into<String>, keywords: impl Into<String>, destination: Destination) -> Self {
        Self {
            target_url: target_url.into(),
            keywords: keywords.into(),
            destination,
        }
    }
}

/// Backend-issued job identifier. The job client never constructs one
/// from an empty id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    job_id: String,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>) -> Option<Self> {
        let job_id = job_id.into();
        if job_id.trim().is_empty() {
            None
        } else {
            Some(Self { job_id })
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.job_id)
    }
}

// ---------------------------------------------------------------------------
// Poll results
// ---------------------------------------------------------------------------

/// Raw backend payload of a finished job, kept as JSON until extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEnvelope(Value);

impl RawEnvelope {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Positional records, when the payload is a JSON array.
    pub fn records(&self) -> Option<&[Value]> {
        self.0.as_array().map(|a| a.as_slice())
    }
}

/// What one status query produced.
#[derive(Debug)]
pub enum JobStatus {
    Processing,
    Ready(RawEnvelope),
    Failed(BridgeError),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

// ---------------------------------------------------------------------------
// Extracted data
// ---------------------------------------------------------------------------

/// Price summary carried in the first envelope record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSummary {
    pub lowest: String,
    pub average: String,
    pub highest: String,
    pub trend: String,
}

impl PriceSummary {
    pub fn is_empty(&self) -> bool {
        self.lowest.is_empty() && self.average.is_empty() && self.highest.is_empty() && self.trend.is_empty()
    }
}

/// One data record: column name → raw cell value.
pub type Row = serde_json::Map<String, Value>;

/// Normalized table. `headers` are unique and in display order; rows may
/// omit columns, which are defaulted when written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    /// Cell values for every row in header order; absent or null fields become `""`.
    pub fn value_grid(&self) -> Vec<Vec<CellValue>> {
        self.rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .map(|h| row.get(h).map(CellValue::from_json).unwrap_or_default())
                    .collect()
            })
            .collect()
    }

    pub fn header_cells(&self) -> Vec<CellValue> {
        self.headers.iter().cloned().map(CellValue::Text).collect()
    }
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl Default for CellValue {
    fn default() -> Self {
        CellValue::Text(String::new())
    }
}

impl CellValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => CellValue::default(),
            Value::Bool(b) => CellValue::Bool(*b),
            Value::Number(n) => n
                .as_f64()
                .map(CellValue::Number)
                .unwrap_or_else(|| CellValue::Text(n.to_string())),
            Value::String(s) => CellValue::Text(s.clone()),
            // nested values land in a single cell as their JSON text
            other => CellValue::Text(other.to_string()),
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, CellValue::Text(s) if s.is_empty())
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Text(s) => write!(f, "{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_and_null_fields_default_to_empty_string() {
        let table = Table {
            headers: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            rows: vec![json!({"A": "x", "C": null}).as_object().cloned().unwrap_or_default()],
        };
        let grid = table.value_grid();
        assert_eq!(
            grid,
            vec![vec![
                CellValue::Text("x".to_string()),
                CellValue::Text(String::new()),
                CellValue::Text(String::new()),
            ]]
        );
    }

    #[test]
    fn numbers_and_zero_survive_conversion() {
        assert_eq!(CellValue::from_json(&json!(0)), CellValue::Number(0.0));
        assert_eq!(CellValue::from_json(&json!(12.5)), CellValue::Number(12.5));
        assert_eq!(CellValue::from_json(&json!(false)), CellValue::Bool(false));
        assert_eq!(
            CellValue::from_json(&json!(["a", 1])),
            CellValue::Text("[\"a\",1]".to_string())
        );
    }

    #[test]
    fn cell_display() {
        assert_eq!(CellValue::Number(42.0).to_string(), "42");
        assert_eq!(CellValue::Number(1.25).to_string(), "1.25");
        assert_eq!(CellValue::Bool(true).to_string(), "TRUE");
    }

    #[test]
    fn destination_parsing() {
        assert_eq!("new".parse::<Destination>().ok(), Some(Destination::NewSheet));
        assert_eq!("Active".parse::<Destination>().ok(), Some(Destination::ActiveSheet));
        assert!("elsewhere".parse::<Destination>().is_err());
        assert_eq!(Destination::NewSheet.toggled(), Destination::ActiveSheet);
    }

    #[test]
    fn job_handle_rejects_blank_ids() {
        assert!(JobHandle::new("").is_none());
        assert!(JobHandle::new("   ").is_none());
        assert_eq!(JobHandle::new("abc").map(|h| h.job_id().to_string()), Some("abc".to_string()));
    }
}
