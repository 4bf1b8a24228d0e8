//! Yahoo Finance lookup issuer.
//!
//! Queries the `v1/finance/lookup` endpoint, one term and one instrument type
//! per request. The endpoint is unofficial and unauthenticated; anything that
//! does not match the expected shape is reported as a payload failure rather
//! than guessed at.

use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::provider::LookupIssuer;
use crate::domain::{FetchError, FetchOutcome, LookupQuery, LookupRecord, TransportKind};

pub const DEFAULT_ENDPOINT: &str = "https://query1.finance.yahoo.com/v1/finance/lookup";

/// Per-request timeout; a timed-out lookup is retried on the next pass.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Page size requested per lookup; the service caps it well below this.
const PAGE_SIZE: &str = "10000";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Deserialize)]
struct LookupResponse {
    finance: FinanceBody,
}

#[derive(Debug, Deserialize)]
struct FinanceBody {
    #[serde(default)]
    result: Option<Vec<LookupResult>>,
    #[serde(default)]
    error: Option<FinanceError>,
}

#[derive(Debug, Deserialize)]
struct FinanceError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct LookupResult {
    documents: Vec<LookupRecord>,
}

#[derive(Debug, Error)]
pub enum LookupSetupError {
    #[error("invalid lookup endpoint '{url}': {reason}")]
    Endpoint { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Yahoo Finance lookup issuer.
///
/// Holds one blocking client (and therefore one connection pool) shared by
/// every worker thread.
pub struct YahooLookup {
    client: reqwest::blocking::Client,
    endpoint: Url,
}

impl YahooLookup {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, LookupSetupError> {
        let endpoint = Url::parse(endpoint).map_err(|e| LookupSetupError::Endpoint {
            url: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(LookupSetupError::Endpoint {
                url: endpoint.to_string(),
                reason: "not an http(s) url".into(),
            });
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client, endpoint })
    }

    pub fn with_defaults() -> Result<Self, LookupSetupError> {
        Self::new(DEFAULT_ENDPOINT, DEFAULT_TIMEOUT)
    }

    /// Full request URL for a descriptor.
    pub fn lookup_url(&self, query: &LookupQuery) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("formatted", "true")
            .append_pair("lang", "en-US")
            .append_pair("region", "US")
            .append_pair("query", &query.term)
            .append_pair("type", query.category.as_str())
            .append_pair("count", PAGE_SIZE)
            .append_pair("start", "0")
            .append_pair("corsDomain", "finance.yahoo.com");
        url
    }

    /// Parse a lookup response body into its documents.
    pub fn parse_body(body: &str) -> Result<Vec<LookupRecord>, FetchError> {
        let resp: LookupResponse = serde_json::from_str(body)
            .map_err(|e| FetchError::Payload(format!("unexpected response shape: {e}")))?;

        if let Some(err) = resp.finance.error {
            return Err(FetchError::Payload(format!(
                "{}: {}",
                err.code, err.description
            )));
        }

        let first = resp
            .finance
            .result
            .ok_or_else(|| FetchError::Payload("no result in response".into()))?
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::Payload("result array is empty".into()))?;

        Ok(first.documents)
    }

    fn fetch(&self, query: &LookupQuery) -> Result<Vec<LookupRecord>, FetchError> {
        let url = self.lookup_url(query);
        let resp = self.client.get(url).send().map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp.text().map_err(classify)?;
        Self::parse_body(&body)
    }
}

fn classify(e: reqwest::Error) -> FetchError {
    let kind = if e.is_timeout() {
        TransportKind::Timeout
    } else if e.is_connect() {
        TransportKind::Connect
    } else {
        TransportKind::Other
    };
    FetchError::transport(kind, e.to_string())
}

impl LookupIssuer for YahooLookup {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn issue(&self, query: &LookupQuery) -> FetchOutcome {
        let result = self.fetch(query);
        if let Err(e) = &result {
            debug!(query = %query, error = %e, "lookup failed");
        }
        result.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;

    #[test]
    fn url_carries_term_and_type() {
        let lookup = YahooLookup::with_defaults().unwrap();
        let url = lookup.lookup_url(&LookupQuery::new("b=", Category::new("etf")));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("query".into(), "b=".into())));
        assert!(pairs.contains(&("type".into(), "etf".into())));
        assert!(pairs.contains(&("count".into(), "10000".into())));
        assert!(url.as_str().starts_with(DEFAULT_ENDPOINT));
        // '=' must be escaped so it is not read as a separator.
        assert!(url.as_str().contains("query=b%3D"));
    }

    #[test]
    fn rejects_bad_endpoint() {
        assert!(matches!(
            YahooLookup::new("not a url", DEFAULT_TIMEOUT),
            Err(LookupSetupError::Endpoint { .. })
        ));
    }

    #[test]
    fn parses_documents() {
        let body = r#"{"finance":{"result":[{"documents":[
            {"symbol":"AAPL","shortName":"Apple Inc.","exchange":"NMS","quoteType":"EQUITY","rank":{"raw":1,"fmt":"1"}},
            {"symbol":"AAPL.MX","exchange":"MEX","quoteType":"EQUITY"}
        ]}],"error":null}}"#;
        let docs = YahooLookup::parse_body(body).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].rank, Some(1));
        assert!(docs[1].short_name.is_none());
    }

    #[test]
    fn empty_documents_is_success() {
        let body = r#"{"finance":{"result":[{"documents":[]}]}}"#;
        assert_eq!(YahooLookup::parse_body(body).unwrap().len(), 0);
    }

    #[test]
    fn service_error_is_payload_failure() {
        let body = r#"{"finance":{"result":null,"error":{"code":"Bad Request","description":"Invalid type"}}}"#;
        let err = YahooLookup::parse_body(body).unwrap_err();
        assert_eq!(
            err,
            FetchError::Payload("Bad Request: Invalid type".into())
        );
    }

    #[test]
    fn missing_path_is_payload_failure() {
        assert!(matches!(
            YahooLookup::parse_body(r#"{"chart":{}}"#),
            Err(FetchError::Payload(_))
        ));
        assert!(matches!(
            YahooLookup::parse_body(r#"{"finance":{"result":[]}}"#),
            Err(FetchError::Payload(_))
        ));
        assert!(matches!(
            YahooLookup::parse_body("<html>rate limited</html>"),
            Err(FetchError::Payload(_))
        ));
    }

    #[test]
    fn malformed_symbol_keeps_sibling_documents() {
        let body = r#"{"finance":{"result":[{"documents":[
            {"symbol":"AAPL","exchange":"NMS","quoteType":"EQUITY"},
            {"symbol":12345,"exchange":"NMS","quoteType":"EQUITY"}
        ]}]}}"#;
        let docs = YahooLookup::parse_body(body).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].symbol.as_deref(), Some("AAPL"));
        assert!(docs[1].symbol.is_none());
    }

    #[test]
    fn document_without_exchange_fails_the_response() {
        let body = r#"{"finance":{"result":[{"documents":[{"symbol":"X","quoteType":"EQUITY"}]}]}}"#;
        assert!(matches!(
            YahooLookup::parse_body(body),
            Err(FetchError::Payload(_))
        ));
    }
}
