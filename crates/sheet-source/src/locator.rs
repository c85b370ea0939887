use url::Url;

use crate::SheetError;

const ID_MARKER: &str = "/spreadsheets/d/";

/// First sheet, first column.
pub const DEFAULT_RANGE: &str = "Sheet1!A:A";

/// Which tab and columns of a spreadsheet hold the script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRange {
    pub sheet: String,
    pub columns: String,
}

impl SheetRange {
    /// Parses A1 notation such as `Sheet1!A:A` or `B:B`. A range without a
    /// sheet name targets the first sheet.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.split_once('!') {
            Some((sheet, columns)) => Self {
                sheet: non_empty_or(sheet, "Sheet1"),
                columns: non_empty_or(columns, "A:A"),
            },
            None => Self {
                sheet: "Sheet1".into(),
                columns: non_empty_or(raw, "A:A"),
            },
        }
    }

    pub fn to_a1(&self) -> String {
        format!("{}!{}", self.sheet, self.columns)
    }
}

impl Default for SheetRange {
    fn default() -> Self {
        SheetRange::parse(DEFAULT_RANGE)
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.trim().to_string()
    }
}

/// A spreadsheet identifier plus the range to read from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLocator {
    pub id: String,
    pub range: SheetRange,
}

impl SheetLocator {
    /// Extracts the spreadsheet id from a `.../spreadsheets/d/<id>/...` URL.
    /// A `range` query parameter, when present, overrides the default range.
    pub fn parse(source_url: &str) -> Result<Self, SheetError> {
        let id = extract_id(source_url).ok_or_else(|| SheetError::NotFound {
            source_url: source_url.to_string(),
        })?;
        let range = Url::parse(source_url)
            .ok()
            .and_then(|url| {
                url.query_pairs()
                    .find(|(key, _)| key == "range")
                    .map(|(_, value)| SheetRange::parse(&value))
            })
            .unwrap_or_default();
        Ok(Self { id, range })
    }

    pub fn with_range(mut self, range: SheetRange) -> Self {
        self.range = range;
        self
    }
}

fn extract_id(source_url: &str) -> Option<String> {
    let start = source_url.find(ID_MARKER)? + ID_MARKER.len();
    let id: String = source_url[start..]
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
        .collect();
    (!id.is_empty()).then_some(id)
}

/// Cheap pre-check used before attempting a fetch.
pub fn validate(source_url: &str) -> bool {
    source_url.contains("docs.google.com/spreadsheets")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_from_edit_url() {
        let locator = SheetLocator::parse(
            "https://docs.google.com/spreadsheets/d/1AbC-xyz_09/edit#gid=0",
        )
        .expect("locator");
        assert_eq!(locator.id, "1AbC-xyz_09");
        assert_eq!(locator.range, SheetRange::default());
    }

    #[test]
    fn extracts_id_without_trailing_segment() {
        let locator =
            SheetLocator::parse("https://docs.google.com/spreadsheets/d/abc123").expect("locator");
        assert_eq!(locator.id, "abc123");
    }

    #[test]
    fn missing_id_is_not_found() {
        let err = SheetLocator::parse("https://example.com/doc/abc").unwrap_err();
        assert!(matches!(err, SheetError::NotFound { .. }));
        let err = SheetLocator::parse("https://docs.google.com/spreadsheets/d/").unwrap_err();
        assert!(matches!(err, SheetError::NotFound { .. }));
    }

    #[test]
    fn range_query_overrides_default() {
        let locator = SheetLocator::parse(
            "https://docs.google.com/spreadsheets/d/abc/edit?range=Script!B:B",
        )
        .expect("locator");
        assert_eq!(locator.range.sheet, "Script");
        assert_eq!(locator.range.columns, "B:B");
        assert_eq!(locator.range.to_a1(), "Script!B:B");
    }

    #[test]
    fn bare_columns_target_first_sheet() {
        let range = SheetRange::parse("C:C");
        assert_eq!(range.sheet, "Sheet1");
        assert_eq!(range.columns, "C:C");
        assert_eq!(SheetRange::parse("  "), SheetRange::default());
    }

    #[test]
    fn validate_checks_host_shape() {
        assert!(validate("https://docs.google.com/spreadsheets/d/abc/edit"));
        assert!(!validate("https://example.com"));
    }
}
