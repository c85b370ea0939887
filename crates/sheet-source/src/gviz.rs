//! Decoders for the two spreadsheet response shapes.

use serde::Deserialize;
use serde_json::Value;

use crate::SheetError;

#[derive(Debug, Deserialize)]
struct GvizResponse {
    table: GvizTable,
}

#[derive(Debug, Deserialize)]
struct GvizTable {
    #[serde(default)]
    rows: Vec<GvizRow>,
}

#[derive(Debug, Deserialize)]
struct GvizRow {
    #[serde(default)]
    c: Option<Vec<Option<GvizCell>>>,
}

#[derive(Debug, Deserialize)]
struct GvizCell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// The visualization endpoint wraps its JSON in a JSONP style callback.
/// Keeps everything from the first `{` to the last `}`.
pub fn strip_wrapper(body: &str) -> Option<&str> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

/// Non-empty first-column cells of a visualization response, in row order.
pub fn parse_gviz(body: &str) -> Result<Vec<String>, SheetError> {
    let json = strip_wrapper(body)
        .ok_or_else(|| SheetError::Parse("response contains no JSON object".into()))?;
    let response: GvizResponse =
        serde_json::from_str(json).map_err(|err| SheetError::Parse(err.to_string()))?;
    Ok(response
        .table
        .rows
        .into_iter()
        .filter_map(|row| row.c?.into_iter().next().flatten())
        .filter_map(|cell| cell_text(&cell.v))
        .collect())
}

/// First-column cells of a values API response, skipping blank cells.
pub fn parse_values(body: &str) -> Result<Vec<String>, SheetError> {
    let response: ValuesResponse =
        serde_json::from_str(body).map_err(|err| SheetError::Parse(err.to_string()))?;
    Ok(response
        .values
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .filter_map(|cell| cell_text(&cell))
        .filter(|text| !text.trim().is_empty())
        .collect())
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => {
            let n = number.as_f64()?;
            if n == 0.0 {
                None
            } else if n.fract() == 0.0 && n.abs() < 1e15 {
                Some((n as i64).to_string())
            } else {
                Some(n.to_string())
            }
        }
        Value::Bool(true) => Some("true".into()),
        _ => None,
    }
}
