//! Content source for the prompter: reads a script out of a spreadsheet.
//!
//! Public sheets are read through the visualization endpoint without any
//! credentials. When an API key is configured the values API is used instead.
//! Either way the first column of the requested range becomes the script, one
//! line per row.

use reqwest::Client;
use thiserror::Error;
use tracing::debug;
use url::Url;

mod gviz;
mod locator;

pub use gviz::{parse_gviz, parse_values, strip_wrapper};
pub use locator::{validate, SheetLocator, SheetRange, DEFAULT_RANGE};

pub const DEFAULT_DOCS_BASE: &str = "https://docs.google.com";
pub const DEFAULT_VALUES_BASE: &str = "https://sheets.googleapis.com/v4";

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("'{source_url}' is not a Google Sheets link")]
    NotASheet { source_url: String },
    #[error("no spreadsheet id found in '{source_url}'")]
    NotFound { source_url: String },
    #[error("sheet request failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("sheet request returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("unexpected sheet response: {0}")]
    Parse(String),
    #[error("invalid sheet endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

#[derive(Clone, Debug)]
pub struct SheetClient {
    http: Client,
    docs_base: String,
    values_base: String,
    api_key: Option<String>,
}

impl Default for SheetClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SheetClient {
    pub fn new() -> Self {
        Self::with_bases(DEFAULT_DOCS_BASE, DEFAULT_VALUES_BASE)
    }

    pub fn with_bases(docs_base: impl Into<String>, values_base: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            docs_base: docs_base.into().trim_end_matches('/').to_string(),
            values_base: values_base.into().trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }

    /// Fetches the script behind `source_url` as newline separated text.
    pub async fn fetch_document(&self, source_url: &str) -> Result<String, SheetError> {
        let locator = SheetLocator::parse(source_url)?;
        self.fetch(&locator).await
    }

    pub async fn fetch(&self, locator: &SheetLocator) -> Result<String, SheetError> {
        Ok(self.fetch_lines(locator).await?.join("\n"))
    }

    pub async fn fetch_lines(&self, locator: &SheetLocator) -> Result<Vec<String>, SheetError> {
        let (url, keyed) = match self.api_key.as_deref() {
            Some(key) => (self.values_url(locator, key)?, true),
            None => (self.gviz_url(locator)?, false),
        };
        debug!(target = "sheet_source", sheet = %locator.id, keyed, "fetching sheet");

        let res = self.http.get(url).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(SheetError::Status { status, body });
        }
        let body = res.text().await?;
        let lines = if keyed {
            parse_values(&body)?
        } else {
            parse_gviz(&body)?
        };
        debug!(target = "sheet_source", sheet = %locator.id, lines = lines.len(), "sheet fetched");
        Ok(lines)
    }

    fn gviz_url(&self, locator: &SheetLocator) -> Result<Url, SheetError> {
        let mut url = Url::parse(&format!(
            "{}/spreadsheets/d/{}/gviz/tq",
            self.docs_base, locator.id
        ))?;
        url.query_pairs_mut()
            .append_pair("tqx", "out:json")
            .append_pair("sheet", &locator.range.sheet)
            .append_pair("range", &locator.range.columns);
        Ok(url)
    }

    fn values_url(&self, locator: &SheetLocator, key: &str) -> Result<Url, SheetError> {
        let mut url = Url::parse(&format!(
            "{}/spreadsheets/{}/values/",
            self.values_base, locator.id
        ))?;
        url.path_segments_mut()
            .map_err(|_| SheetError::InvalidEndpoint(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push(&locator.range.to_a1());
        url.query_pairs_mut().append_pair("key", key);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gviz_url_carries_sheet_and_columns() {
        let client = SheetClient::with_bases("http://docs.test/", "http://values.test");
        let locator = SheetLocator::parse("https://docs.google.com/spreadsheets/d/abc/edit")
            .expect("locator");
        let url = client.gviz_url(&locator).expect("url");
        assert_eq!(
            url.as_str(),
            "http://docs.test/spreadsheets/d/abc/gviz/tq?tqx=out%3Ajson&sheet=Sheet1&range=A%3AA"
        );
    }

    #[test]
    fn values_url_escapes_range_segment() {
        let client = SheetClient::with_bases("http://docs.test", "http://values.test/v4");
        let locator = SheetLocator::parse("https://docs.google.com/spreadsheets/d/abc")
            .expect("locator")
            .with_range(SheetRange::parse("My Script!A:A"));
        let url = client.values_url(&locator, "k").expect("url");
        assert_eq!(
            url.as_str(),
            "http://values.test/v4/spreadsheets/abc/values/My%20Script!A:A?key=k"
        );
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let client = SheetClient::new().with_api_key(Some("  ".into()));
        assert!(client.api_key.is_none());
    }
}
