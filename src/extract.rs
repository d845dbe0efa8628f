use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::{BridgeError, Result};
use crate::types::{PriceSummary, RawEnvelope, Row, Table};

/// Minimum positional envelope: summary, header record, one data record.
pub const MIN_ENVELOPE_RECORDS: usize = 3;

/// Envelope split into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEnvelope {
    pub summary: PriceSummary,
    pub table: Table,
}

/// Decode the header and data records into a [`Table`].
pub fn extract(envelope: &RawEnvelope) -> Result<Table> {
    decode(envelope).map(|d| d.table)
}

/// Price summary for the status display. Never fails: a missing or
/// non-object summary record yields empty fields.
pub fn summary(envelope: &RawEnvelope) -> PriceSummary {
    let record = match envelope.as_value() {
        Value::Array(records) => records.first(),
        Value::Object(obj) => obj.get("summary"),
        _ => None,
    };
    record.and_then(|r| r.as_object()).map(parse_summary).unwrap_or_default()
}

/// Accepts either layout the proxy produces:
///
/// - positional: `[summary, {"headers": [..]}, row, row, ..]`
/// - named: `{"summary": {..}, "header": {"headers": [..]} | [..], "rows": [..]}`
pub fn decode(envelope: &RawEnvelope) -> Result<DecodedEnvelope> {
    match envelope.as_value() {
        Value::Array(records) => decode_positional(records),
        Value::Object(obj) if obj.contains_key("rows") => decode_named(obj),
        Value::Object(_) => Err(BridgeError::malformed(
            "envelope object has no rows field",
        )),
        other => Err(BridgeError::malformed(format!(
            "expected an array of records, got {}",
            json_type(other)
        ))),
    }
}

fn decode_positional(records: &[Value]) -> Result<DecodedEnvelope> {
    if records.len() < MIN_ENVELOPE_RECORDS {
        return Err(BridgeError::malformed(format!(
            "envelope has {} record(s), expected at least {MIN_ENVELOPE_RECORDS}",
            records.len()
        )));
    }

    let summary = records[0].as_object().map(parse_summary).unwrap_or_default();
    let headers = records[1]
        .get("headers")
        .ok_or_else(|| BridgeError::malformed("record 1 has no headers list"))
        .and_then(|h| parse_headers(h, "record 1"))?;
    let rows = parse_rows(&records[2..], 2)?;

    Ok(DecodedEnvelope {
        summary,
        table: Table { headers, rows },
    })
}

fn decode_named(obj: &Map<String, Value>) -> Result<DecodedEnvelope> {
    let summary = obj
        .get("summary")
        .and_then(|s| s.as_object())
        .map(parse_summary)
        .unwrap_or_default();

    let header = obj
        .get("header")
        .or_else(|| obj.get("headers"))
        .ok_or_else(|| BridgeError::malformed("envelope has no header field"))?;
    let headers = match header {
        Value::Object(h) => h
            .get("headers")
            .ok_or_else(|| BridgeError::malformed("header field has no headers list"))
            .and_then(|list| parse_headers(list, "header"))?,
        list => parse_headers(list, "header")?,
    };

    let rows = match obj.get("rows") {
        Some(Value::Array(rows)) => parse_rows(rows, 0)?,
        Some(other) => {
            return Err(BridgeError::malformed(format!(
                "rows must be an array, got {}",
                json_type(other)
            )))
        }
        None => Vec::new(),
    };

    Ok(DecodedEnvelope {
        summary,
        table: Table { headers, rows },
    })
}

fn parse_headers(v: &Value, origin: &str) -> Result<Vec<String>> {
    let list = v
        .as_array()
        .ok_or_else(|| BridgeError::malformed(format!("{origin} headers is not a list")))?;

    let mut seen = HashSet::with_capacity(list.len());
    let mut headers = Vec::with_capacity(list.len());
    for (i, h) in list.iter().enumerate() {
        let name = h
            .as_str()
            .ok_or_else(|| BridgeError::malformed(format!("{origin} header {i} is not a string")))?;
        if !seen.insert(name) {
            return Err(BridgeError::malformed(format!("duplicate header {name:?}")));
        }
        headers.push(name.to_string());
    }
    Ok(headers)
}

/// `offset` is the index of the first row within the envelope, for messages.
fn parse_rows(records: &[Value], offset: usize) -> Result<Vec<Row>> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            r.as_object().cloned().ok_or_else(|| {
                BridgeError::malformed(format!(
                    "record {} is {}, expected an object",
                    i + offset,
                    json_type(r)
                ))
            })
        })
        .collect()
}

fn parse_summary(record: &Map<String, Value>) -> PriceSummary {
    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| record.get(*k))
            .map(display_value)
            .unwrap_or_default()
    };
    PriceSummary {
        lowest: field(&["Lowest Price", "lowest"]),
        average: field(&["Average Price", "average"]),
        highest: field(&["Highest Price", "highest"]),
        trend: field(&["Trend", "trend"]),
    }
}

fn display_value(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn env(v: Value) -> RawEnvelope {
        RawEnvelope::new(v)
    }

    #[test]
    fn three_records_yield_one_row_with_verbatim_headers() {
        let e = env(json!([
            {"Lowest Price": "$10", "Average Price": "$15", "Highest Price": "$20", "Trend": "flat"},
            {"headers": ["Zeta", "Alpha", "Mid"]},
            {"Zeta": "z", "Alpha": 1, "Mid": true}
        ]));
        let table = extract(&e).expect("extract ok");
        assert_eq!(table.headers, vec!["Zeta", "Alpha", "Mid"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].get("Alpha"), Some(&json!(1)));
    }

    #[test]
    fn row_count_is_envelope_len_minus_two() {
        let e = env(json!([{}, {"headers": ["a"]}, {"a": 1}, {"a": 2}, {}]));
        assert_eq!(extract(&e).unwrap().rows.len(), 3);
    }

    #[test]
    fn fewer_than_three_records_is_malformed() {
        for v in [json!([]), json!([{}]), json!([{}, {"headers": ["a"]}])] {
            let err = extract(&env(v)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedPayload);
        }
    }

    #[test]
    fn missing_headers_list_is_malformed() {
        let err = extract(&env(json!([{}, {"columns": ["a"]}, {}]))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
        let err = extract(&env(json!([{}, {"headers": "a,b"}, {}]))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
    }

    #[test]
    fn rows_are_not_validated_against_headers() {
        let e = env(json!([{}, {"headers": ["a", "b"]}, {"c": 3}]));
        let table = extract(&e).unwrap();
        assert_eq!(table.rows[0].get("c"), Some(&json!(3)));
        assert!(table.rows[0].get("a").is_none());
    }

    #[test]
    fn non_object_row_and_duplicate_headers_rejected() {
        assert!(extract(&env(json!([{}, {"headers": ["a"]}, [1, 2]]))).is_err());
        assert!(extract(&env(json!([{}, {"headers": ["a", "a"]}, {}]))).is_err());
    }

    #[test]
    fn non_array_payload_rejected() {
        let err = extract(&env(json!({"status": "done"}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
        assert!(extract(&env(json!("nope"))).is_err());
    }

    #[test]
    fn summary_reads_first_record() {
        let e = env(json!([
            {"Lowest Price": 9.5, "Average Price": "12", "Highest Price": null, "Trend": "Prices are rising."},
            {"headers": []},
            {}
        ]));
        let s = summary(&e);
        assert_eq!(s.lowest, "9.5");
        assert_eq!(s.average, "12");
        assert_eq!(s.highest, "");
        assert_eq!(s.trend, "Prices are rising.");
        assert_eq!(summary(&env(json!([1, 2, 3]))), PriceSummary::default());
    }

    #[test]
    fn named_envelope_decodes_like_positional() {
        let positional = env(json!([
            {"Lowest Price": "1", "Trend": "up"},
            {"headers": ["x", "y"]},
            {"x": 1, "y": 2}
        ]));
        let named = env(json!({
            "summary": {"Lowest Price": "1", "Trend": "up"},
            "header": {"headers": ["x", "y"]},
            "rows": [{"x": 1, "y": 2}]
        }));
        let bare_header = env(json!({
            "summary": {"lowest": "1", "trend": "up"},
            "header": ["x", "y"],
            "rows": [{"x": 1, "y": 2}]
        }));
        let expected = decode(&positional).unwrap();
        assert_eq!(decode(&named).unwrap(), expected);
        assert_eq!(decode(&bare_header).unwrap(), expected);
    }

    #[test]
    fn named_envelope_requires_header() {
        let err = decode(&env(json!({"rows": []}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
    }
}
